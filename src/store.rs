//! Block persistence collaborator
//!
//! Stores sealed blocks by hash. Callers validate before appending; the
//! store does not re-check linkage.

use crate::block::Block;
use crate::types::Hash;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Persistence for sealed blocks
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Store name for logging
    fn store_type(&self) -> &'static str;

    /// Persist a block that has already been validated
    async fn append(&self, block: &Block) -> Result<()>;

    /// Look up a block by its hash
    async fn get_by_hash(&self, hash: &Hash) -> Result<Block>;

    /// Number of stored blocks
    async fn len(&self) -> Result<usize>;

    /// Every stored block ordered by index
    async fn load_all(&self) -> Result<Vec<Block>>;
}

/// In-memory store keyed by hash
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: Arc<DashMap<Hash, Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    fn store_type(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, block: &Block) -> Result<()> {
        self.blocks.insert(block.hash.clone(), block.clone());
        Ok(())
    }

    async fn get_by_hash(&self, hash: &Hash) -> Result<Block> {
        self.blocks
            .get(hash)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(hash.to_hex()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.blocks.len())
    }

    async fn load_all(&self) -> Result<Vec<Block>> {
        let mut blocks: Vec<Block> = self.blocks.iter().map(|e| e.value().clone()).collect();
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }
}

/// One pretty-printed JSON file per block, named `<hash-hex>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Using block store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, hash: &Hash) -> PathBuf {
        self.dir.join(format!("{}.json", hash.to_hex()))
    }

    /// Files named `<64 hex digits>.json`; anything else in the directory is ignored
    async fn block_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_block_file(&path) {
                files.push(path);
            } else {
                debug!("Skipping {} in block store", path.display());
            }
        }
        Ok(files)
    }
}

fn is_block_file(path: &Path) -> bool {
    let has_json_ext = path.extension().is_some_and(|ext| ext == "json");
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
    has_json_ext && stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit())
}

#[async_trait]
impl BlockStore for JsonFileStore {
    fn store_type(&self) -> &'static str {
        "json-file"
    }

    async fn append(&self, block: &Block) -> Result<()> {
        let path = self.path_for(&block.hash);
        let json = serde_json::to_vec_pretty(block)?;

        // Readers only ever see complete files
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!("Wrote block {} to {}", block.index, path.display());
        Ok(())
    }

    async fn get_by_hash(&self, hash: &Hash) -> Result<Block> {
        match tokio::fs::read(self.path_for(hash)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(hash.to_hex())),
            Err(e) => Err(e.into()),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.block_files().await?.len())
    }

    async fn load_all(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for path in self.block_files().await? {
            let bytes = tokio::fs::read(&path).await?;
            blocks.push(serde_json::from_slice::<Block>(&bytes)?);
        }
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }
}

//! Chain validation and the append-only chain container
//!
//! Validation is a single-threaded linear scan. Each block's hash is
//! recomputed from its own fields with the same pre-image used at mining
//! time, and each non-genesis block must point at its predecessor's hash.
//! The first violation ends the scan.
//!
//! The validator assumes nobody appends while it scans; [`Chain`] serializes
//! this by requiring `&mut self` for appends.

use crate::block::Block;
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, warn};

/// Why a block failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    /// Stored hash differs from the recomputed one
    HashMismatch,
    /// Previous-hash field does not equal the predecessor's hash
    PrevHashMismatch,
    /// Index is not one past the predecessor's
    IndexMismatch,
    /// Hash is not under the block's own target
    InsufficientWork,
}

impl fmt::Display for LinkFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFault::HashMismatch => write!(f, "stored hash does not match recomputed hash"),
            LinkFault::PrevHashMismatch => write!(f, "previous hash does not match predecessor"),
            LinkFault::IndexMismatch => write!(f, "index does not follow predecessor"),
            LinkFault::InsufficientWork => write!(f, "hash does not meet block target"),
        }
    }
}

/// Verifies hash recomputation and previous-hash linkage
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainValidator {
    require_work: bool,
}

impl ChainValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require every non-genesis hash to meet its block's own target
    ///
    /// The difficulty bits are not part of the hash pre-image, so this only
    /// proves the hash is under whatever target the block claims. It does not
    /// check the claim against the difficulty expected at that height.
    pub fn with_work_check(mut self, require_work: bool) -> Self {
        self.require_work = require_work;
        self
    }

    /// Scan `blocks` and report the first broken block
    ///
    /// An empty slice is trivially valid. The first block is only checked
    /// against its own recomputed hash.
    pub fn validate(&self, blocks: &[Block]) -> Result<()> {
        let Some(first) = blocks.first() else {
            return Ok(());
        };

        if !first.has_valid_hash() {
            return Err(Error::link(first.index, LinkFault::HashMismatch));
        }

        for pair in blocks.windows(2) {
            let (previous, block) = (&pair[0], &pair[1]);
            self.check_block(previous, block)?;
        }

        debug!("Validated {} blocks", blocks.len());
        Ok(())
    }

    /// Boolean form of [`validate`](Self::validate)
    pub fn is_valid(&self, blocks: &[Block]) -> bool {
        match self.validate(blocks) {
            Ok(()) => true,
            Err(e) => {
                warn!("Chain rejected: {}", e);
                false
            }
        }
    }

    /// Check a block about to be appended after `previous`
    ///
    /// Stricter than the scan: the index must also be consecutive.
    pub fn validate_next(&self, previous: &Block, block: &Block) -> Result<()> {
        if previous.index.checked_add(1) != Some(block.index) {
            return Err(Error::link(block.index, LinkFault::IndexMismatch));
        }
        self.check_block(previous, block)
    }

    fn check_block(&self, previous: &Block, block: &Block) -> Result<()> {
        if !block.has_valid_hash() {
            return Err(Error::link(block.index, LinkFault::HashMismatch));
        }
        if block.prev_hash != previous.hash {
            return Err(Error::link(block.index, LinkFault::PrevHashMismatch));
        }
        if self.require_work && !block.meets_target()? {
            return Err(Error::link(block.index, LinkFault::InsufficientWork));
        }
        Ok(())
    }
}

/// Append-only sequence of blocks starting at genesis
#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
    validator: ChainValidator,
}

impl Chain {
    /// A chain holding only the genesis block
    pub fn new() -> Self {
        Self::with_validator(ChainValidator::new())
    }

    /// A genesis-only chain that checks appends with `validator`
    pub fn with_validator(validator: ChainValidator) -> Self {
        Self {
            blocks: vec![Block::genesis()],
            validator,
        }
    }

    /// Rebuild a chain from stored blocks, validating them first
    pub fn from_blocks(blocks: Vec<Block>, validator: ChainValidator) -> Result<Self> {
        match blocks.first() {
            None => return Ok(Self::with_validator(validator)),
            Some(first) if first.index != 0 => {
                return Err(Error::link(first.index, LinkFault::IndexMismatch));
            }
            Some(_) => {}
        }

        validator.validate(&blocks)?;
        for pair in blocks.windows(2) {
            if pair[0].index.checked_add(1) != Some(pair[1].index) {
                return Err(Error::link(pair[1].index, LinkFault::IndexMismatch));
            }
        }

        Ok(Self { blocks, validator })
    }

    /// Check `block` against the tip without appending it
    pub fn check_next(&self, block: &Block) -> Result<()> {
        self.validator.validate_next(self.tip(), block)
    }

    /// Validate `block` against the tip and push it
    pub fn append(&mut self, block: Block) -> Result<()> {
        self.check_next(&block)?;
        debug!("Appending block {} {}", block.index, block.hash);
        self.blocks.push(block);
        Ok(())
    }

    /// Most recent block
    pub fn tip(&self) -> &Block {
        // Never empty: every constructor seeds at least the genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Index of the tip
    pub fn height(&self) -> u64 {
        self.tip().index
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Re-run the full scan over the stored blocks
    pub fn is_valid(&self) -> bool {
        self.validator.is_valid(&self.blocks)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

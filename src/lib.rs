//! Proof-of-work blockchain core
//!
//! Seals batches of transactions into hash-linked blocks:
//! - Compact difficulty encoding and 256-bit targets
//! - Merkle commitment over transaction fingerprints
//! - Parallel nonce search with deadline and cancellation
//! - Block assembly and linear chain validation
//! - A mining node wiring pool, store and broadcast around the core

pub mod block;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod merkle;
pub mod network;
pub mod node;
pub mod pool;
pub mod pow;
pub mod store;
pub mod types;
pub mod utils;
pub mod worker;

pub use block::{Block, BlockAssembler, BlockTemplate, Transaction};
pub use chain::{Chain, ChainValidator, LinkFault};
pub use config::Config;
pub use difficulty::{adjust_difficulty, decode_target, encode_compact, CompactBits, Target};
pub use error::{Error, Result};
pub use merkle::merkle_root;
pub use node::{MiningNode, NodeSettings};
pub use pow::ProofOfWork;
pub use types::*;

/// Application information
pub const APP_NAME: &str = "powchain";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

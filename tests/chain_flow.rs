//! Integration tests for the assemble, seal and validate flow

use powchain::{
    block::{Block, BlockAssembler, Transaction},
    chain::{Chain, ChainValidator},
    crypto::{double_sha256, sha256},
    difficulty::encode_compact,
    merkle::merkle_root,
    types::MinerId,
    worker::{self, CpuWorker},
};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(60)
}

fn build_chain(length: u64) -> Vec<Block> {
    let assembler = BlockAssembler::new(CpuWorker::new(4), MinerId::new("itest").unwrap());
    let mut chain = Chain::new();

    for index in 1..length {
        let transactions = (0..index)
            .map(|i| Transaction::new(format!("block {} tx {}", index, i).into_bytes()))
            .collect();
        let template = assembler.new_block(index, transactions, chain.tip().hash.clone());
        let block = assembler
            .finalize(template, 8, deadline(), &CancellationToken::new())
            .unwrap();
        chain.append(block).unwrap();
    }

    chain.blocks().to_vec()
}

#[test]
fn test_five_block_chain_is_valid() {
    let blocks = build_chain(5);
    assert_eq!(blocks.len(), 5);
    assert!(ChainValidator::new().is_valid(&blocks));
    assert!(ChainValidator::new().with_work_check(true).is_valid(&blocks));
}

#[test]
fn test_any_single_byte_mutation_is_detected() {
    let blocks = build_chain(5);
    let validator = ChainValidator::new();

    for i in 1..blocks.len() {
        for byte in 0..blocks[i].hash.len() {
            let mut tampered = blocks.clone();
            tampered[i].hash.as_bytes_mut()[byte] ^= 0x01;
            assert!(!validator.is_valid(&tampered), "hash byte {} of block {}", byte, i);
        }
        for byte in 0..blocks[i].prev_hash.len() {
            let mut tampered = blocks.clone();
            tampered[i].prev_hash.as_bytes_mut()[byte] ^= 0x01;
            assert!(!validator.is_valid(&tampered), "prev hash byte {} of block {}", byte, i);
        }
    }
}

#[test]
fn test_hundred_trials_meet_target() {
    let target = encode_compact(8).unwrap().to_target().unwrap();

    for trial in 0..100u32 {
        let data = format!("trial {}", trial).into_bytes();
        let nonce = worker::mine(&data, &target, 2, deadline()).unwrap();

        let mut preimage = data.clone();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        assert!(target.is_met_by(&double_sha256(&preimage)), "trial {}", trial);
    }
}

#[test]
fn test_genesis_is_reproducible() {
    let genesis = Block::genesis();
    assert_eq!(
        genesis.hash.to_hex(),
        "7e79e007945c99216030078e9317d15d6f83f25903d837b08fc223fd8406fec9"
    );
    assert_eq!(Block::genesis(), genesis);
}

#[test]
fn test_merkle_properties() {
    let single = Transaction::new(b"solo".to_vec());
    assert_eq!(merkle_root(&[single.fingerprint()]), sha256(b"solo"));

    let leaves: Vec<_> = [b"alpha".as_slice(), b"beta", b"gamma"]
        .iter()
        .map(|p| Transaction::new(p.to_vec()).fingerprint())
        .collect();
    let mut last_pair = [0u8; 64];
    last_pair[..32].copy_from_slice(&leaves[2]);
    last_pair[32..].copy_from_slice(&leaves[2]);
    let mut first_pair = [0u8; 64];
    first_pair[..32].copy_from_slice(&leaves[0]);
    first_pair[32..].copy_from_slice(&leaves[1]);
    let mut top = [0u8; 64];
    top[..32].copy_from_slice(&sha256(&first_pair));
    top[32..].copy_from_slice(&sha256(&last_pair));

    assert_eq!(merkle_root(&leaves), sha256(&top));
}

#[test]
fn test_chain_survives_json_roundtrip() {
    let blocks = build_chain(3);
    let json = serde_json::to_string(&blocks).unwrap();
    let restored: Vec<Block> = serde_json::from_str(&json).unwrap();

    let chain = Chain::from_blocks(restored, ChainValidator::new()).unwrap();
    assert_eq!(chain.height(), 2);
    assert!(chain.is_valid());
}

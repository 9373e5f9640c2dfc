//! Oversized values for the adversarial scenarios.
use rand::RngCore;

use crate::block::{Block, BlockBody, Header};
use crate::crypto::{keccak256, random_bytes};
use crate::rlp;
use crate::types::Quantity;

/// Random bytes.
pub fn large_buffer(size: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut buffer);
    buffer
}

/// A random string of `size` hex characters.
pub fn large_string(size: usize) -> String {
    let mut text = hex::encode(large_buffer(size / 2 + 1));
    text.truncate(size);
    text
}

/// A random number exactly `size` bytes wide.
pub fn large_number(size: usize) -> Quantity {
    let mut buffer = large_buffer(size);
    if let Some(first) = buffer.first_mut() {
        *first |= 0x80;
    }
    Quantity::from_be_bytes(&buffer)
}

/// A block with random hashes whose number and difficulty are `size` byte numbers.
pub fn large_block(size: usize) -> Block {
    let header = Header {
        parent_hash: random_bytes(),
        uncle_hash: keccak256(&rlp::encode_list::<Header>(&[])),
        state_root: random_bytes(),
        transactions_root: random_bytes(),
        receipts_root: random_bytes(),
        mix_hash: random_bytes(),
        difficulty: large_number(size),
        number: large_number(size),
        timestamp: 1337,
        ..Header::default()
    };
    Block::new(header, BlockBody::default())
}

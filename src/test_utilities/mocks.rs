use crate::block::{Block, BlockBody, Header};
use crate::blockchain::{Blockchain, ChainConfig};
use crate::crypto::keccak256;
use crate::rlp::{self, RawValue, RlpStream};
use crate::types::Quantity;

pub const MOCK_CHAIN_ID: u64 = 1337;
pub const MOCK_DIFFICULTY: u64 = 131_072;

pub fn mock_chain_config() -> ChainConfig {
    ChainConfig {
        chain_id: MOCK_CHAIN_ID,
        forks: vec![5, 200],
    }
}

// a legacy-shaped transaction, opaque to everything but the hash
fn make_mock_transaction(number: u64, index: u64) -> RawValue {
    let mut stream = RlpStream::new_list();
    stream
        .append(&index)
        .append(&1_000_000_000u64)
        .append(&21_000u64)
        .append(&[0x42u8; 20])
        .append(&(number * 100 + index))
        .append_bytes(b"")
        .append(&27u64)
        .append(&keccak256(&number.to_be_bytes()))
        .append(&keccak256(&index.to_be_bytes()));
    RawValue(stream.out())
}

pub fn make_mock_genesis() -> Block {
    let header = Header {
        uncle_hash: keccak256(&rlp::encode_list::<Header>(&[])),
        difficulty: Quantity::from(MOCK_DIFFICULTY),
        number: Quantity::zero(),
        gas_limit: 8_000_000,
        extra_data: b"devp2p mock genesis".to_vec(),
        ..Header::default()
    };
    Block::new(header, BlockBody::default())
}

/// A child of `parent` carrying one or two transactions.
pub fn make_mock_block(parent: &Block, number: u64) -> Block {
    let transactions: Vec<RawValue> = (0..1 + number % 2)
        .map(|index| make_mock_transaction(number, index))
        .collect();
    let header = Header {
        parent_hash: parent.hash(),
        uncle_hash: keccak256(&rlp::encode_list::<Header>(&[])),
        coinbase: [0x11; 20],
        state_root: keccak256(&number.to_be_bytes()),
        transactions_root: keccak256(&rlp::encode_list(&transactions)),
        difficulty: Quantity::from(MOCK_DIFFICULTY + number),
        number: Quantity::from(number),
        gas_limit: 8_000_000,
        gas_used: 21_000 * transactions.len() as u64,
        timestamp: 1_600_000_000 + 13 * number,
        extra_data: b"mock".to_vec(),
        ..Header::default()
    };
    Block::new(
        header,
        BlockBody {
            transactions,
            ..BlockBody::default()
        },
    )
}

/// A chain of `length` blocks starting at a genesis block.
pub fn make_mock_chain(length: usize) -> Blockchain {
    let mut blocks = vec![make_mock_genesis()];
    while blocks.len() < length {
        let number = blocks.len() as u64;
        let block = make_mock_block(&blocks[blocks.len() - 1], number);
        blocks.push(block);
    }
    Blockchain::new(blocks, mock_chain_config()).unwrap()
}

use std::fmt;

use crate::crypto::{keccak256, H256};
use crate::rlp::{self, Decodable, DecodeResult, Encodable, RawValue, Rlp, RlpStream};
use crate::types::Quantity;

pub const BLOOM_LENGTH: usize = 256;

// number of positional header fields before the extension tail
const HEADER_FIELDS: usize = 15;

#[derive(Clone, PartialEq, Eq)]
pub struct Bloom(pub [u8; BLOOM_LENGTH]);

impl Default for Bloom {
    fn default() -> Self {
        Bloom([0u8; BLOOM_LENGTH])
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| *b == 0) {
            write!(f, "Bloom(empty)")
        } else {
            write!(f, "Bloom(0x{}..)", hex::encode(&self.0[..8]))
        }
    }
}

///
/// A block header. The fifteen legacy fields are typed; anything a later fork appends
/// (base fee and friends) is carried verbatim in `extensions`, so headers read from a
/// fixture re-encode to exactly the bytes they were read from.
///
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    pub coinbase: [u8; 20],
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: Quantity,
    pub number: Quantity,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: [u8; 8],
    pub extensions: Vec<RawValue>,
}

impl Header {
    pub fn hash(&self) -> H256 {
        keccak256(&rlp::encode(self))
    }

    pub fn number_u64(&self) -> Option<u64> {
        self.number.to_u64()
    }
}

impl Encodable for Header {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream
            .append(&self.parent_hash)
            .append(&self.uncle_hash)
            .append(&self.coinbase)
            .append(&self.state_root)
            .append(&self.transactions_root)
            .append(&self.receipts_root)
            .append(&self.logs_bloom.0)
            .append(&self.difficulty)
            .append(&self.number)
            .append(&self.gas_limit)
            .append(&self.gas_used)
            .append(&self.timestamp)
            .append_bytes(&self.extra_data)
            .append(&self.mix_hash)
            .append(&self.nonce);
        for extension in &self.extensions {
            stream.append(extension);
        }
        stream.end_list();
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(HEADER_FIELDS)?;
        Ok(Header {
            parent_hash: items[0].as_val()?,
            uncle_hash: items[1].as_val()?,
            coinbase: items[2].as_val()?,
            state_root: items[3].as_val()?,
            transactions_root: items[4].as_val()?,
            receipts_root: items[5].as_val()?,
            logs_bloom: Bloom(items[6].as_val()?),
            difficulty: items[7].as_val()?,
            number: items[8].as_val()?,
            gas_limit: items[9].as_val()?,
            gas_used: items[10].as_val()?,
            timestamp: items[11].as_val()?,
            extra_data: items[12].data()?.to_vec(),
            mix_hash: items[13].as_val()?,
            nonce: items[14].as_val()?,
            extensions: items[HEADER_FIELDS..]
                .iter()
                .map(|item| item.as_val())
                .collect::<DecodeResult<_>>()?,
        })
    }
}

/// The transactions and uncles of a block. Transactions stay opaque.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockBody {
    pub transactions: Vec<RawValue>,
    pub uncles: Vec<Header>,
    pub extensions: Vec<RawValue>,
}

fn append_body_fields(stream: &mut RlpStream, body: &BlockBody) {
    stream.append_list(&body.transactions);
    stream.append_list(&body.uncles);
    for extension in &body.extensions {
        stream.append(extension);
    }
}

fn decode_body_fields(items: &[Rlp<'_>]) -> DecodeResult<BlockBody> {
    Ok(BlockBody {
        transactions: items[0].as_list()?,
        uncles: items[1].as_list()?,
        extensions: items[2..]
            .iter()
            .map(|item| item.as_val())
            .collect::<DecodeResult<_>>()?,
    })
}

impl Encodable for BlockBody {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        append_body_fields(stream, self);
        stream.end_list();
    }
}

impl Decodable for BlockBody {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        decode_body_fields(&rlp.items_at_least(2)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub header: Header,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: Header, body: BlockBody) -> Self {
        Block { header, body }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn number(&self) -> Option<u64> {
        self.header.number_u64()
    }

    pub fn difficulty(&self) -> &Quantity {
        &self.header.difficulty
    }
}

impl Encodable for Block {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append(&self.header);
        append_body_fields(stream, &self.body);
        stream.end_list();
    }
}

impl Decodable for Block {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(3)?;
        Ok(Block {
            header: items[0].as_val()?,
            body: decode_body_fields(&items[1..])?,
        })
    }
}

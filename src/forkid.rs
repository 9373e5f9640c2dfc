//! EIP-2124 fork identifiers.
use crate::crypto::H256;
use crate::rlp::{Decodable, DecodeResult, Encodable, Rlp, RlpStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForkId {
    /// CRC32 over the genesis hash and every fork block passed so far
    pub hash: [u8; 4],
    /// Next scheduled fork block, zero if none is known
    pub next: u64,
}

impl ForkId {
    /// `forks` must be sorted ascending without duplicates or zeros, see `gather_forks`.
    pub fn new(genesis_hash: &H256, forks: &[u64], head: u64) -> ForkId {
        let mut checksum = crc32fast::hash(genesis_hash);
        for fork in forks {
            if *fork > head {
                return ForkId {
                    hash: checksum.to_be_bytes(),
                    next: *fork,
                };
            }
            let mut hasher = crc32fast::Hasher::new_with_initial(checksum);
            hasher.update(&fork.to_be_bytes());
            checksum = hasher.finalize();
        }
        ForkId {
            hash: checksum.to_be_bytes(),
            next: 0,
        }
    }
}

/// Collect the fork schedule from a genesis `config` object: every `*Block` entry.
pub fn gather_forks(config: &serde_json::Map<String, serde_json::Value>) -> Vec<u64> {
    let mut forks: Vec<u64> = config
        .iter()
        .filter(|(key, _)| key.ends_with("Block"))
        .filter_map(|(_, value)| value.as_u64())
        .filter(|block| *block != 0)
        .collect();
    forks.sort_unstable();
    forks.dedup();
    forks
}

impl Encodable for ForkId {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append(&self.hash).append(&self.next);
        stream.end_list();
    }
}

impl Decodable for ForkId {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(2)?;
        Ok(ForkId {
            hash: items[0].as_val()?,
            next: items[1].as_val()?,
        })
    }
}

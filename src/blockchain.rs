use bigint::U256;
use tracing::{event, Level};

use crate::block::{Block, BlockBody, Header};
use crate::crypto::H256;
use crate::error::ChainError;
use crate::forkid::{gather_forks, ForkId};
use crate::networking::message::{GetBlockHeaders, HashOrNumber, Status};
use crate::storage::Storage;
use crate::types::Quantity;

/// The parts of a genesis file the harness needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Sorted, de-duplicated, non-zero fork block numbers.
    pub forks: Vec<u64>,
}

impl ChainConfig {
    pub fn from_genesis_json(genesis: &serde_json::Value) -> Result<ChainConfig, ChainError> {
        let config = genesis
            .get("config")
            .and_then(|config| config.as_object())
            .ok_or_else(|| ChainError::Genesis("missing config object".to_string()))?;
        let chain_id = config
            .get("chainId")
            .and_then(|id| id.as_u64())
            .ok_or_else(|| ChainError::Genesis("missing config.chainId".to_string()))?;
        Ok(ChainConfig {
            chain_id,
            forks: gather_forks(config),
        })
    }
}

///
/// Read-only view over the fixture chain the remote node is expected to serve.
///
/// Block hashes and cumulative difficulty are computed once on load, `total_difficulty[i]`
/// holds the sum of difficulties of blocks `0..=i`.
///
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    hashes: Vec<H256>,
    total_difficulty: Vec<U256>,
    config: ChainConfig,
}

impl Blockchain {
    pub fn new(blocks: Vec<Block>, config: ChainConfig) -> Result<Blockchain, ChainError> {
        let genesis = blocks.first().ok_or(ChainError::Empty)?;
        if genesis.number() != Some(0) {
            return Err(ChainError::MissingGenesis(genesis.header.number.to_string()));
        }
        let mut blockchain = Blockchain {
            blocks: Vec::with_capacity(blocks.len()),
            hashes: Vec::with_capacity(blocks.len()),
            total_difficulty: Vec::with_capacity(blocks.len()),
            config,
        };
        for block in blocks {
            blockchain.append(block)?;
        }
        Ok(blockchain)
    }

    /// Load a chain file (optionally gzipped) and the genesis JSON holding its configuration.
    pub fn load(chain_path: &str, genesis_path: &str) -> Result<Blockchain, ChainError> {
        let config = ChainConfig::from_genesis_json(&Storage::load_json(genesis_path)?)?;
        let blockchain = Blockchain::new(Storage::load_blocks(chain_path)?, config)?;
        event!(
            Level::INFO,
            "chain fixture: {} blocks, chain id {}, forks {:?}",
            blockchain.len(),
            blockchain.config.chain_id,
            blockchain.config.forks
        );
        Ok(blockchain)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn network_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn block_hash(&self, index: usize) -> Option<H256> {
        self.hashes.get(index).copied()
    }

    // new() refuses an empty chain and nothing removes blocks, so index 0 and
    // len - 1 are always present
    pub fn head(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn head_hash(&self) -> H256 {
        self.hashes[self.hashes.len() - 1]
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn genesis_hash(&self) -> H256 {
        self.hashes[0]
    }

    pub fn index_of(&self, hash: &H256) -> Option<usize> {
        self.hashes.iter().position(|candidate| candidate == hash)
    }

    /// Sum of the difficulties of the first `height` blocks.
    pub fn total_difficulty(&self, height: usize) -> Quantity {
        match height.min(self.len()) {
            0 => Quantity::zero(),
            height => Quantity::from(self.total_difficulty[height - 1]),
        }
    }

    pub fn fork_id(&self) -> ForkId {
        let head = self.head().number().unwrap_or(0);
        ForkId::new(&self.genesis_hash(), &self.config.forks, head)
    }

    /// The Status this chain announces when speaking eth/`protocol_version`.
    pub fn status(&self, protocol_version: u32) -> Status {
        Status {
            protocol_version,
            network_id: self.network_id(),
            total_difficulty: self.total_difficulty(self.len()),
            head: self.head_hash(),
            genesis: self.genesis_hash(),
            fork_id: self.fork_id(),
        }
    }

    fn origin_index(&self, origin: &HashOrNumber) -> Option<usize> {
        match origin {
            HashOrNumber::Hash(hash) => self.index_of(hash),
            HashOrNumber::Number(number) => {
                let index = usize::try_from(*number).ok()?;
                (index < self.len()).then(|| index)
            }
        }
    }

    /// Answer a header query. The walk stops early at either end of the chain.
    pub fn headers_for(&self, request: &GetBlockHeaders) -> Result<Vec<Header>, ChainError> {
        if request.amount == 0 {
            return Err(ChainError::NoHeadersRequested);
        }
        let mut index = self
            .origin_index(&request.origin)
            .ok_or_else(|| ChainError::UnknownOrigin(request.origin.to_string()))?;
        let step = usize::try_from(request.skip)
            .unwrap_or(usize::MAX)
            .saturating_add(1);

        let mut headers = vec![];
        while (headers.len() as u64) < request.amount {
            headers.push(self.blocks[index].header.clone());
            let next = if request.reverse {
                index.checked_sub(step)
            } else {
                index.checked_add(step).filter(|next| *next < self.len())
            };
            match next {
                Some(next) => index = next,
                None => break,
            }
        }
        Ok(headers)
    }

    /// Bodies for the hashes this chain knows, in request order; unknown hashes are skipped.
    pub fn bodies_for(&self, hashes: &[H256]) -> Vec<BlockBody> {
        hashes
            .iter()
            .filter_map(|hash| self.index_of(hash))
            .map(|index| self.blocks[index].body.clone())
            .collect()
    }

    /// A copy holding only the first `height` blocks (at least the genesis block).
    pub fn shorten(&self, height: usize) -> Blockchain {
        let height = height.clamp(1, self.len());
        Blockchain {
            blocks: self.blocks[..height].to_vec(),
            hashes: self.hashes[..height].to_vec(),
            total_difficulty: self.total_difficulty[..height].to_vec(),
            config: self.config.clone(),
        }
    }

    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        let index = self.blocks.len();
        let overflow = || ChainError::DifficultyOverflow(index);
        let difficulty = block.difficulty().to_u256().ok_or_else(overflow)?;
        let previous = self.total_difficulty.last().copied().unwrap_or_else(U256::zero);
        let (total, overflowed) = previous.overflowing_add(difficulty);
        if overflowed {
            return Err(overflow());
        }
        self.hashes.push(block.hash());
        self.total_difficulty.push(total);
        self.blocks.push(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::mocks::{make_mock_block, make_mock_chain, mock_chain_config};

    fn headers(chain: &Blockchain, origin: HashOrNumber, amount: u64, skip: u64, reverse: bool) -> Vec<u64> {
        chain
            .headers_for(&GetBlockHeaders {
                origin,
                amount,
                skip,
                reverse,
            })
            .unwrap()
            .iter()
            .map(|header| header.number_u64().unwrap())
            .collect()
    }

    #[test]
    fn headers_for_skip_test() {
        let chain = make_mock_chain(20);
        let origin = HashOrNumber::Hash(chain.block_hash(1).unwrap());
        assert_eq!(headers(&chain, origin, 2, 1, false), vec![1, 3]);
        assert_eq!(headers(&chain, HashOrNumber::Number(0), 3, 0, false), vec![0, 1, 2]);
        assert_eq!(headers(&chain, HashOrNumber::Number(10), 3, 2, true), vec![10, 7, 4]);
    }

    #[test]
    fn headers_for_stops_at_chain_ends_test() {
        let chain = make_mock_chain(10);
        assert_eq!(headers(&chain, HashOrNumber::Number(8), 5, 0, false), vec![8, 9]);
        assert_eq!(headers(&chain, HashOrNumber::Number(1), 5, 0, true), vec![1, 0]);
        assert_eq!(headers(&chain, HashOrNumber::Number(0), 5, u64::MAX, false), vec![0]);
    }

    #[test]
    fn headers_for_errors_test() {
        let chain = make_mock_chain(10);
        let request = GetBlockHeaders {
            origin: HashOrNumber::Number(3),
            amount: 0,
            skip: 0,
            reverse: false,
        };
        assert!(matches!(chain.headers_for(&request), Err(ChainError::NoHeadersRequested)));

        let request = GetBlockHeaders {
            origin: HashOrNumber::Hash([7u8; 32]),
            amount: 1,
            ..request
        };
        assert!(matches!(chain.headers_for(&request), Err(ChainError::UnknownOrigin(_))));

        let request = GetBlockHeaders {
            origin: HashOrNumber::Number(10),
            ..request
        };
        assert!(matches!(chain.headers_for(&request), Err(ChainError::UnknownOrigin(_))));
    }

    #[test]
    fn total_difficulty_test() {
        let chain = make_mock_chain(5);
        let expected: u64 = (0..5)
            .map(|i| chain.block(i).unwrap().difficulty().to_u64().unwrap())
            .sum();
        assert_eq!(chain.total_difficulty(5), Quantity::from(expected));
        assert_eq!(chain.total_difficulty(50), Quantity::from(expected));
        assert_eq!(chain.total_difficulty(0), Quantity::zero());
        assert_eq!(
            chain.total_difficulty(1),
            chain.genesis().difficulty().clone()
        );
    }

    #[test]
    fn shorten_and_append_test() {
        let full = make_mock_chain(12);
        let mut short = full.shorten(10);
        assert_eq!(short.len(), 10);
        assert_eq!(full.len(), 12);
        assert_eq!(short.genesis_hash(), full.genesis_hash());
        assert_eq!(short.total_difficulty(10), full.total_difficulty(10));

        short.append(full.block(10).unwrap().clone()).unwrap();
        assert_eq!(short.head_hash(), full.block_hash(10).unwrap());
        assert_eq!(short.total_difficulty(11), full.total_difficulty(11));
        assert_eq!(short.status(66).total_difficulty, full.total_difficulty(11));

        assert_eq!(full.shorten(0).len(), 1);
    }

    #[test]
    fn bodies_for_test() {
        let chain = make_mock_chain(10);
        let hashes = [chain.block_hash(4).unwrap(), [9u8; 32], chain.block_hash(2).unwrap()];
        let bodies = chain.bodies_for(&hashes);
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0], chain.block(4).unwrap().body);
        assert_eq!(bodies[1], chain.block(2).unwrap().body);
    }

    #[test]
    fn new_requires_genesis_test() {
        let chain = make_mock_chain(3);
        let orphan = make_mock_block(chain.head(), 3);
        assert!(matches!(
            Blockchain::new(vec![orphan], mock_chain_config()),
            Err(ChainError::MissingGenesis(_))
        ));
        assert!(matches!(
            Blockchain::new(vec![], mock_chain_config()),
            Err(ChainError::Empty)
        ));
    }

    #[test]
    fn chain_config_from_genesis_test() {
        let genesis: serde_json::Value = serde_json::from_str(
            r#"{"config": {"chainId": 19763, "homesteadBlock": 0, "berlinBlock": 40}, "difficulty": "0x20000"}"#,
        )
        .unwrap();
        let config = ChainConfig::from_genesis_json(&genesis).unwrap();
        assert_eq!(config.chain_id, 19763);
        assert_eq!(config.forks, vec![40]);

        let missing: serde_json::Value = serde_json::from_str(r#"{"config": {}}"#).unwrap();
        assert!(ChainConfig::from_genesis_json(&missing).is_err());
    }

    #[test]
    fn fork_id_tracks_head_test() {
        let chain = make_mock_chain(10);
        let config = mock_chain_config();
        assert_eq!(
            chain.fork_id(),
            ForkId::new(&chain.genesis_hash(), &config.forks, 9)
        );
    }
}

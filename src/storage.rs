use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};

use tracing::{event, Level};

use crate::block::Block;
use crate::error::ChainError;
use crate::rlp;

pub struct Storage {}

impl Storage {
    /// read from a path to a Vec<u8>, gunzipping files that end in `.gz`
    pub fn read(path: &str) -> io::Result<Vec<u8>> {
        let f = File::open(path)?;
        let mut data = Vec::<u8>::new();
        if path.ends_with(".gz") {
            GzDecoder::new(f).read_to_end(&mut data)?;
        } else {
            let mut f = f;
            f.read_to_end(&mut data)?;
        }
        Ok(data)
    }

    /// Decode a file of back-to-back RLP blocks.
    pub fn load_blocks(path: &str) -> Result<Vec<Block>, ChainError> {
        let data = Storage::read(path).map_err(|source| ChainError::Io {
            path: path.to_string(),
            source,
        })?;
        let blocks = Storage::decode_blocks(&data)?;
        event!(Level::INFO, "loaded {} blocks from {}", blocks.len(), path);
        Ok(blocks)
    }

    pub fn decode_blocks(mut data: &[u8]) -> Result<Vec<Block>, ChainError> {
        let mut blocks = vec![];
        while !data.is_empty() {
            let index = blocks.len();
            let (item, rest) = rlp::split_first(data)
                .map_err(|source| ChainError::BlockDecode { index, source })?;
            let block: Block = item
                .as_val()
                .map_err(|source| ChainError::BlockDecode { index, source })?;
            blocks.push(block);
            data = rest;
        }
        Ok(blocks)
    }

    pub fn load_json(path: &str) -> Result<serde_json::Value, ChainError> {
        let data = Storage::read(path).map_err(|source| ChainError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|err| ChainError::Genesis(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::test_utilities::mocks::make_mock_chain;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn encode_chain(length: usize) -> (Vec<Block>, Vec<u8>) {
        let chain = make_mock_chain(length);
        let blocks: Vec<Block> = (0..length).map(|i| chain.block(i).unwrap().clone()).collect();
        let mut data = vec![];
        for block in &blocks {
            data.extend(rlp::encode(block));
        }
        (blocks, data)
    }

    #[test]
    fn decode_blocks_test() {
        let (blocks, data) = encode_chain(5);
        assert_eq!(Storage::decode_blocks(&data).unwrap(), blocks);
        assert!(Storage::decode_blocks(&[]).unwrap().is_empty());
    }

    #[test]
    fn decode_blocks_reports_index_test() {
        let (_, mut data) = encode_chain(3);
        data.extend(rlp::encode(&5u64));
        match Storage::decode_blocks(&data) {
            Err(ChainError::BlockDecode { index, source }) => {
                assert_eq!(index, 3);
                assert_eq!(source, DecodeError::ExpectedList);
            }
            other => panic!("unexpected result {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn load_gzipped_blocks_test() {
        let (blocks, data) = encode_chain(4);
        let path = std::env::temp_dir().join(format!("devp2p-chain-{}.rlp.gz", std::process::id()));
        let path = path.to_str().unwrap().to_string();
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(&data).unwrap();
        encoder.finish().unwrap();

        assert_eq!(Storage::load_blocks(&path).unwrap(), blocks);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            Storage::load_blocks("/nonexistent/chain.rlp"),
            Err(ChainError::Io { .. })
        ));
    }
}

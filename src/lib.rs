/*!
# devp2p-rust

devp2p-rust speaks the **RLPx** transport used by Ethereum nodes and drives a remote node
through the `eth` wire protocol conformance suite.

The crate is split in three layers:

* the transport: an ECIES authenticated key exchange, the MAC-chained frame codec and the
  message codec (`networking`),
* the chain fixture the suite is validated against (`blockchain`, `block`, `storage`),
* the conformance harness itself (`ethtest`) and the `devp2p` command line front end.

# Usage

```bash
devp2p rlpx ping enode://<pubkey>@127.0.0.1:30303
devp2p rlpx eth-test enode://<pubkey>@127.0.0.1:30303 chain.rlp.gz genesis.json --run 'Status|Broadcast'
```

Settings are read from an optional `--config` file and `DEVP2P_*` environment variables,
see `config::Settings`.
*/
pub mod block;
pub mod blockchain;
pub mod command;
pub mod config;
pub mod crypto;
pub mod ecies;
pub mod error;
pub mod ethtest;
pub mod forkid;
pub mod keypair;
pub mod networking;
pub mod rlp;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod test_utilities;

pub use crate::error::Error;

/// A specialized `Result` type for devp2p operations.
pub type Result<T> = std::result::Result<T, Error>;

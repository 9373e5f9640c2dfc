/*!
# devp2p Command Line Interface

## Help

```bash
devp2p help
```

## Example Usage

```bash
devp2p rlpx ping enode://<node id>@127.0.0.1:30303
devp2p rlpx eth-test enode://<node id>@127.0.0.1:30303 chain.rlp.gz genesis.json --run 'Status'
```

## Dev

To run from source:

```bash
cargo run -- --help
cargo run -- rlpx status enode://<node id>@127.0.0.1:30303
```
*/
use std::process;

use devp2p_rust::command;

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt::init();
    let code = match command::run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    };
    process::exit(code);
}

/*!
The `devp2p` command line front end.

```bash
devp2p rlpx ping enode://<node id>@127.0.0.1:30303
devp2p rlpx status enode://<node id>@127.0.0.1:30303
devp2p --config devp2p.toml rlpx eth-test enode://<node id>@127.0.0.1:30303 chain.rlp.gz genesis.json --run 'Status|Broadcast'
```
*/
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use regex::Regex;
use tracing::info;

use crate::config::Settings;
use crate::error::ProtocolError;
use crate::ethtest::suite::{Protocol, Suite};
use crate::ethtest::{report, run_tests};
use crate::networking::message::{dump, Message};
use crate::networking::peer::Peer;
use crate::networking::session::Session;
use crate::Result;

fn node_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("node")
        .required(true)
        .takes_value(true)
        .help("enode URL of the remote node")
}

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("devp2p")
        .about("RLPx transport tool and eth protocol conformance suite")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .global(true)
                .help("path to a settings file"),
        )
        .subcommand(
            SubCommand::with_name("rlpx")
                .about("RLPx commands")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("ping")
                        .about("performs the handshake and prints the remote Hello")
                        .arg(node_arg()),
                )
                .subcommand(
                    SubCommand::with_name("status")
                        .about("performs the handshake and Hello exchange and prints the remote Status")
                        .arg(node_arg()),
                )
                .subcommand(
                    SubCommand::with_name("eth-test")
                        .about("runs the eth protocol conformance suite against a node")
                        .arg(node_arg())
                        .arg(
                            Arg::with_name("chain")
                                .required(true)
                                .takes_value(true)
                                .help("chain fixture, RLP encoded blocks (gzip when ending in .gz)"),
                        )
                        .arg(
                            Arg::with_name("genesis")
                                .required(true)
                                .takes_value(true)
                                .help("genesis.json of the chain fixture"),
                        )
                        .arg(
                            Arg::with_name("run")
                                .long("run")
                                .takes_value(true)
                                .help("only run scenarios whose name matches this regex"),
                        ),
                ),
        )
}

fn peer_of(matches: &ArgMatches<'_>) -> Result<Peer> {
    matches.value_of("node").unwrap_or_default().parse()
}

async fn ping(peer: &Peer, settings: &Settings) -> Result<i32> {
    let mut session = Session::dial(peer, Protocol::Eth66.capabilities(), settings).await?;
    let hello = session.exchange_hello().await?;
    println!("{}", dump(&Message::Hello(hello), settings.pretty));
    Ok(0)
}

async fn status(peer: &Peer, settings: &Settings) -> Result<i32> {
    let mut session = Session::dial(peer, Protocol::Eth66.capabilities(), settings).await?;
    session.exchange_hello().await?;
    loop {
        match session.receive(settings.status_timeout()).await? {
            Message::Status(status) => {
                println!("{}", dump(&Message::Status(status), settings.pretty));
                return Ok(0);
            }
            Message::Ping => session.send(&Message::Pong).await?,
            Message::Disconnect(reason) => return Err(ProtocolError::Disconnected(reason).into()),
            other => {
                return Err(ProtocolError::UnexpectedMessage(dump(&other, settings.pretty)).into())
            }
        }
    }
}

async fn eth_test(matches: &ArgMatches<'_>, settings: Settings) -> Result<i32> {
    let peer = peer_of(matches)?;
    let filter = matches.value_of("run").map(Regex::new).transpose()?;
    let mut suite = Suite::new(
        peer,
        matches.value_of("chain").unwrap_or_default(),
        matches.value_of("genesis").unwrap_or_default(),
        settings,
    )?;
    info!(
        "loaded chain of {} blocks, node expected at {}",
        suite.full_chain.len(),
        suite.chain.len()
    );
    let results = run_tests(&mut suite, filter.as_ref()).await;
    let failed = report(&results);
    Ok(if failed > 0 { 1 } else { 0 })
}

/// Parse the process arguments and run the selected command. Returns the process exit code.
pub async fn run() -> Result<i32> {
    let matches = app().get_matches();
    run_matches(&matches).await
}

pub async fn run_matches(matches: &ArgMatches<'_>) -> Result<i32> {
    if let Some(rlpx) = matches.subcommand_matches("rlpx") {
        let config = rlpx
            .value_of("config")
            .or_else(|| matches.value_of("config"));
        let settings = Settings::load(config)?;
        match rlpx.subcommand() {
            ("ping", Some(matches)) => return ping(&peer_of(matches)?, &settings).await,
            ("status", Some(matches)) => return status(&peer_of(matches)?, &settings).await,
            ("eth-test", Some(matches)) => return eth_test(matches, settings).await,
            _ => {}
        }
    }
    eprintln!("{}", matches.usage());
    Ok(1)
}

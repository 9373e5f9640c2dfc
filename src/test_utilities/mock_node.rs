use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, event, Level};

use crate::blockchain::Blockchain;
use crate::config::Settings;
use crate::crypto::node_id;
use crate::error::Error;
use crate::keypair::Keypair;
use crate::networking::message::{
    Capability, DisconnectReason, Hello, Message, NewBlock, Status,
};
use crate::networking::peer::Peer;
use crate::networking::session::Session;

// geth refuses announced total difficulties wider than this
const MAX_TD_BITS: usize = 100;
const MAX_CAPABILITY_NAME: usize = 8;
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type Relay = broadcast::Sender<(u64, NewBlock)>;

///
/// An in-process eth node for exercising the harness: it accepts RLPx connections,
/// speaks eth/64 to eth/66, serves its chain, rejects malformed Hello and Status
/// messages and oversized announcements, and imports and relays valid new blocks.
///
pub struct MockNode {
    identity: Keypair,
    address: SocketAddr,
    chain: Arc<RwLock<Blockchain>>,
    task: JoinHandle<()>,
}

impl MockNode {
    pub async fn start(chain: Blockchain) -> MockNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let identity = Keypair::new();
        let chain = Arc::new(RwLock::new(chain));
        let (relay, _) = broadcast::channel(16);
        let ids = Arc::new(AtomicU64::new(0));

        let task = {
            let identity = identity.clone();
            let chain = chain.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let id = ids.fetch_add(1, Ordering::SeqCst);
                    let identity = identity.clone();
                    let chain = chain.clone();
                    let relay = relay.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(id, stream, identity, chain, relay).await {
                            debug!("mock connection {} ended: {}", id, err);
                        }
                    });
                }
            })
        };

        MockNode {
            identity,
            address,
            chain,
            task,
        }
    }

    pub fn peer(&self) -> Peer {
        Peer::new(*self.identity.public_key(), self.address)
    }

    pub async fn chain_length(&self) -> usize {
        self.chain.read().await.len()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn capabilities() -> Vec<Capability> {
    vec![Capability::eth(64), Capability::eth(65), Capability::eth(66)]
}

fn check_hello(hello: &Hello, session: &Session<TcpStream>) -> Option<DisconnectReason> {
    if hello.id.len() != 64 {
        return Some(DisconnectReason::InvalidIdentity);
    }
    if hello.id[..] != node_id(session.remote_id())[..] {
        return Some(DisconnectReason::UnexpectedIdentity);
    }
    if hello
        .capabilities
        .iter()
        .any(|cap| cap.name.len() > MAX_CAPABILITY_NAME)
    {
        return Some(DisconnectReason::ProtocolError);
    }
    None
}

fn check_status(status: &Status, ours: &Status) -> bool {
    status.protocol_version == ours.protocol_version
        && status.network_id == ours.network_id
        && status.genesis == ours.genesis
        && status.fork_id == ours.fork_id
        && status.total_difficulty.bits() <= MAX_TD_BITS
}

async fn serve_connection(
    id: u64,
    stream: TcpStream,
    identity: Keypair,
    chain: Arc<RwLock<Blockchain>>,
    relay: Relay,
) -> crate::Result<()> {
    let mut relayed = relay.subscribe();
    let settings = Settings {
        client_name: "devp2p-mock".to_string(),
        ..Settings::default()
    };
    let mut session = Session::accept(stream, identity, capabilities(), &settings).await?;

    let hello = session.hello();
    session.send(&Message::Hello(hello)).await?;
    let hello = match session.receive(settings.handshake_timeout()).await? {
        Message::Hello(hello) => hello,
        _ => return session.disconnect(DisconnectReason::ProtocolError).await,
    };
    if let Some(reason) = check_hello(&hello, &session) {
        event!(Level::DEBUG, "mock {} rejects hello: {}", id, reason);
        return session.disconnect(reason).await;
    }
    if session.complete_hello(&hello).is_err() {
        return session.disconnect(DisconnectReason::UselessPeer).await;
    }

    let ours = chain.read().await.status(session.eth_version());
    session.send(&Message::Status(ours.clone())).await?;
    match session.receive(settings.status_timeout()).await? {
        Message::Status(status) if check_status(&status, &ours) => session.mark_ready(),
        _ => return session.disconnect(DisconnectReason::SubprotocolError).await,
    }

    loop {
        tokio::select! {
            received = session.receive(IDLE_TIMEOUT) => {
                let message = match received {
                    Ok(message) => message,
                    Err(Error::Timeout(_)) => continue,
                    Err(Error::Decode(_)) => {
                        return session.disconnect(DisconnectReason::ProtocolError).await
                    }
                    Err(err) => return Err(err),
                };
                if !handle(id, &mut session, &chain, &relay, message).await? {
                    return Ok(());
                }
            }
            announce = relayed.recv() => {
                match announce {
                    Ok((from, announce)) if from != id => {
                        session.send(&Message::NewBlock(Box::new(announce))).await?
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

// false once the connection is finished
async fn handle(
    id: u64,
    session: &mut Session<TcpStream>,
    chain: &RwLock<Blockchain>,
    relay: &Relay,
    message: Message,
) -> crate::Result<bool> {
    match message {
        Message::Ping => session.send(&Message::Pong).await?,
        Message::GetBlockHeaders {
            request_id,
            request,
        } => {
            let headers = chain.read().await.headers_for(&request).unwrap_or_default();
            session
                .send(&Message::BlockHeaders {
                    request_id,
                    headers,
                })
                .await?
        }
        Message::GetBlockBodies { request_id, hashes } => {
            let bodies = chain.read().await.bodies_for(&hashes);
            session
                .send(&Message::BlockBodies { request_id, bodies })
                .await?
        }
        Message::NewBlock(announce) => {
            if announce.block.number().is_none()
                || announce.total_difficulty.bits() > MAX_TD_BITS
            {
                session.disconnect(DisconnectReason::SubprotocolError).await?;
                return Ok(false);
            }
            let imported = {
                let mut chain = chain.write().await;
                if announce.block.header.parent_hash == chain.head_hash() {
                    chain.append(announce.block.clone())?;
                    true
                } else {
                    false
                }
            };
            if imported {
                event!(
                    Level::DEBUG,
                    "mock {} imported block {:?}",
                    id,
                    announce.block.number()
                );
                // no receivers is fine
                let _ = relay.send((id, *announce));
            }
        }
        Message::Disconnect(_) => return Ok(false),
        Message::Hello(_) | Message::Status(_) => {
            session.disconnect(DisconnectReason::ProtocolError).await?;
            return Ok(false);
        }
        Message::NewBlockHashes(_) | Message::BlockHeaders { .. } | Message::BlockBodies { .. } | Message::Pong => {}
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::mocks::make_mock_chain;

    #[tokio::test]
    async fn mock_node_answers_status_test() {
        let chain = make_mock_chain(20);
        let node = MockNode::start(chain.clone()).await;
        let settings = Settings::default();
        let mut session = Session::dial(&node.peer(), vec![Capability::eth(65)], &settings)
            .await
            .unwrap();
        session.exchange_hello().await.unwrap();
        let status = session
            .exchange_status(&chain, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, chain.status(65));
        assert_eq!(node.chain_length().await, 20);
    }
}

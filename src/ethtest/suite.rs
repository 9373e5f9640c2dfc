use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::Settings;
use crate::error::{ChainError, Error, ProtocolError};
use crate::ethtest::large::{large_block, large_buffer, large_number, large_string};
use crate::keypair::Keypair;
use crate::networking::message::{
    dump, Capability, GetBlockHeaders, HashOrNumber, Hello, Message, NewBlock, Status,
    BASE_PROTOCOL_VERSION,
};
use crate::networking::peer::Peer;
use crate::networking::session::Session;
use crate::Result;

pub const HEADERS_REQUEST_ID: u64 = 3;
pub const BODIES_REQUEST_ID: u64 = 55;

/// Which eth revision a scenario speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// eth/64 and eth/65, no request ids
    Eth65,
    /// adds eth/66 with request ids
    Eth66,
}

impl Protocol {
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = vec![Capability::eth(64), Capability::eth(65)];
        if *self == Protocol::Eth66 {
            capabilities.push(Capability::eth(66));
        }
        capabilities
    }

    pub fn request_id(&self, id: u64) -> Option<u64> {
        match self {
            Protocol::Eth65 => None,
            Protocol::Eth66 => Some(id),
        }
    }
}

fn unexpected(message: &Message, pretty: bool) -> Error {
    ProtocolError::UnexpectedMessage(dump(message, pretty)).into()
}

fn assertion(text: String) -> Error {
    ProtocolError::Assertion(text).into()
}

///
/// The conformance suite against one remote node.
///
/// `chain` is the part of the fixture the node is expected to have imported, `full_chain` the
/// whole fixture; blocks beyond `chain` are what the broadcast scenarios announce. A successful
/// announcement appends the block to `chain`.
///
pub struct Suite {
    pub dest: Peer,
    pub chain: Blockchain,
    pub full_chain: Blockchain,
    pub settings: Settings,
}

impl Suite {
    pub fn new(dest: Peer, chain_path: &str, genesis_path: &str, settings: Settings) -> Result<Suite> {
        let full_chain = Blockchain::load(chain_path, genesis_path)?;
        Suite::from_chain(dest, full_chain, settings)
    }

    pub fn from_chain(dest: Peer, full_chain: Blockchain, settings: Settings) -> Result<Suite> {
        if full_chain.len() < settings.chain_length {
            return Err(ChainError::TooShort {
                have: full_chain.len(),
                need: settings.chain_length,
            }
            .into());
        }
        Ok(Suite {
            dest,
            chain: full_chain.shorten(settings.chain_length),
            full_chain,
            settings,
        })
    }

    pub async fn dial(&self, protocol: Protocol) -> Result<Session<TcpStream>> {
        Session::dial(&self.dest, protocol.capabilities(), &self.settings).await
    }

    /// Dial and run the Hello and Status exchanges.
    pub async fn setup_connection(&self, protocol: Protocol) -> Result<Session<TcpStream>> {
        let mut session = self.dial(protocol).await?;
        session.exchange_hello().await?;
        session
            .exchange_status(&self.chain, None, self.settings.status_timeout())
            .await?;
        Ok(session)
    }

    fn next_block(&self) -> Result<(usize, Block)> {
        let next = self.chain.len();
        let block = self.full_chain.block(next).cloned().ok_or(ChainError::TooShort {
            have: self.full_chain.len(),
            need: next + 1,
        })?;
        Ok((next, block))
    }

    fn accepts_disconnect(&self, outcome: Result<Message>) -> Result<()> {
        match outcome {
            Ok(Message::Disconnect(reason)) => {
                debug!("remote disconnected as expected: {}", reason);
                Ok(())
            }
            Err(err) if err.is_connection_failure() => {
                debug!("connection dropped as expected: {}", err);
                Ok(())
            }
            Ok(other) => Err(unexpected(&other, self.settings.pretty)),
            Err(err) => Err(err),
        }
    }

    pub async fn test_status(&mut self, protocol: Protocol) -> Result<()> {
        let session = self.setup_connection(protocol).await?;
        info!("status exchanged over eth/{}", session.eth_version());
        Ok(())
    }

    /// Request headers 1 and 3 by hash and compare them with the fixture.
    pub async fn test_get_block_headers(&mut self, protocol: Protocol) -> Result<()> {
        let mut session = self.setup_connection(protocol).await?;
        let origin = self
            .chain
            .block_hash(1)
            .ok_or(ChainError::TooShort { have: self.chain.len(), need: 2 })?;
        let request = GetBlockHeaders {
            origin: HashOrNumber::Hash(origin),
            amount: 2,
            skip: 1,
            reverse: false,
        };
        let request_id = protocol.request_id(HEADERS_REQUEST_ID);
        session
            .send(&Message::GetBlockHeaders {
                request_id,
                request: request.clone(),
            })
            .await?;

        let expected = self.chain.headers_for(&request)?;
        match session
            .drive_until(&self.chain, request_id, self.settings.message_timeout())
            .await?
        {
            Message::BlockHeaders { headers, .. } if headers == expected => Ok(()),
            Message::BlockHeaders { headers, .. } => Err(assertion(format!(
                "wrong headers: got {} headers, want blocks {:?}",
                headers.len(),
                expected.iter().map(|h| h.number_u64()).collect::<Vec<_>>()
            ))),
            other => Err(unexpected(&other, self.settings.pretty)),
        }
    }

    /// Request the bodies of blocks 54 and 75.
    pub async fn test_get_block_bodies(&mut self, protocol: Protocol) -> Result<()> {
        let mut session = self.setup_connection(protocol).await?;
        let last = self.chain.len() - 1;
        let hashes: Vec<_> = [54, 75]
            .iter()
            .filter_map(|index: &usize| self.chain.block_hash((*index).min(last)))
            .collect();
        let request_id = protocol.request_id(BODIES_REQUEST_ID);
        session
            .send(&Message::GetBlockBodies {
                request_id,
                hashes: hashes.clone(),
            })
            .await?;

        let expected = self.chain.bodies_for(&hashes);
        match session
            .drive_until(&self.chain, request_id, self.settings.message_timeout())
            .await?
        {
            Message::BlockBodies { bodies, .. } if bodies == expected => Ok(()),
            Message::BlockBodies { bodies, .. } => Err(assertion(format!(
                "wrong bodies: got {}, want {}",
                bodies.len(),
                expected.len()
            ))),
            other => Err(unexpected(&other, self.settings.pretty)),
        }
    }

    pub async fn test_broadcast(&mut self, protocol: Protocol) -> Result<()> {
        self.send_next_block(protocol).await
    }

    /// Announce the next fixture block on one connection, expect it on another and wait until
    /// the node serves it.
    async fn send_next_block(&mut self, protocol: Protocol) -> Result<()> {
        let mut sender = self.setup_connection(protocol).await?;
        let mut receiver = self.setup_connection(protocol).await?;
        let (next, block) = self.next_block()?;
        let announce = NewBlock {
            block: block.clone(),
            total_difficulty: self.full_chain.total_difficulty(next + 1),
        };
        self.test_announce(&mut sender, &mut receiver, &announce).await?;
        receiver
            .wait_for_block(
                &self.chain,
                &block,
                self.settings.message_timeout(),
                self.settings.block_poll_interval(),
            )
            .await?;
        self.chain.append(block)?;
        info!("node imported block {}", next);
        Ok(())
    }

    async fn test_announce(
        &self,
        sender: &mut Session<TcpStream>,
        receiver: &mut Session<TcpStream>,
        announce: &NewBlock,
    ) -> Result<()> {
        sender
            .send(&Message::NewBlock(Box::new(announce.clone())))
            .await?;
        self.wait_announce(receiver, announce).await
    }

    async fn wait_announce(&self, receiver: &mut Session<TcpStream>, announce: &NewBlock) -> Result<()> {
        match receiver
            .drive_until(&self.chain, None, self.settings.message_timeout())
            .await?
        {
            Message::NewBlock(got) => {
                if got.block.header != announce.block.header {
                    return Err(assertion(format!(
                        "wrong block header in announcement: got {:?}, want {:?}",
                        got.block.number(),
                        announce.block.number()
                    )));
                }
                if got.total_difficulty != announce.total_difficulty {
                    return Err(assertion(format!(
                        "wrong TD in announcement: got {}, want {}",
                        got.total_difficulty, announce.total_difficulty
                    )));
                }
                Ok(())
            }
            Message::NewBlockHashes(hashes) => match hashes.first() {
                Some(first) if first.hash == announce.block.hash() => Ok(()),
                _ => Err(assertion(format!(
                    "wrong block hash in announcement: got {:?}",
                    hashes.first().map(|entry| hex::encode(entry.hash))
                ))),
            },
            other => Err(unexpected(&other, self.settings.pretty)),
        }
    }

    /// Oversized announcements must get the sender disconnected; a valid one afterwards must
    /// still propagate.
    pub async fn test_large_announce(&mut self, protocol: Protocol) -> Result<()> {
        let size = self.settings.large_payload_bytes;
        let (next, block) = self.next_block()?;
        let announcements = vec![
            NewBlock {
                block: large_block(size),
                total_difficulty: self.full_chain.total_difficulty(next + 1),
            },
            NewBlock {
                block,
                total_difficulty: large_number(size),
            },
            NewBlock {
                block: large_block(size),
                total_difficulty: large_number(size),
            },
        ];
        for (index, announce) in announcements.into_iter().enumerate() {
            self.reject_announcement(protocol, announce)
                .await
                .map_err(|err| assertion(format!("large announcement {}: {}", index, err)))?;
        }
        self.send_next_block(protocol).await
    }

    async fn reject_announcement(&self, protocol: Protocol, announce: NewBlock) -> Result<()> {
        let mut sender = self.setup_connection(protocol).await?;
        if !self
            .send_rejected(&mut sender, &Message::NewBlock(Box::new(announce)))
            .await?
        {
            return Ok(());
        }
        let outcome = sender
            .drive_until(&self.chain, None, self.settings.read_timeout())
            .await;
        self.accepts_disconnect(outcome)
    }

    // false when the remote already hung up on us
    async fn send_rejected(&self, session: &mut Session<TcpStream>, message: &Message) -> Result<bool> {
        match session.send(message).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_connection_failure() => {
                debug!("connection dropped while sending {}: {}", message.kind(), err);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Send malformed Hello messages on fresh connections and expect a disconnect for each.
    pub async fn test_malicious_handshake(&mut self, protocol: Protocol) -> Result<()> {
        let size = self.settings.large_payload_bytes;
        let capabilities = protocol.capabilities();
        let mut large_capability = vec![Capability::new(&large_string(size), 64)];
        large_capability.extend(capabilities.iter().cloned());

        let identity = Keypair::new();
        let id = identity.node_id().to_vec();
        let mut doubled = id.clone();
        doubled.extend_from_slice(&id);
        let mut extended = id.clone();
        extended.push(0);

        let variants: Vec<(Vec<Capability>, Vec<u8>)> = vec![
            (large_capability, id.clone()),
            (capabilities.clone(), extended),
            (capabilities.clone(), doubled),
            (capabilities.clone(), large_buffer(size)),
            (vec![Capability::new(&large_string(size), 64)], large_buffer(size)),
        ];

        for (index, (capabilities, id)) in variants.into_iter().enumerate() {
            let mut session = Session::dial_as(
                &self.dest,
                identity.clone(),
                protocol.capabilities(),
                &self.settings,
            )
            .await?;
            let hello = Message::Hello(Hello {
                version: BASE_PROTOCOL_VERSION,
                name: self.settings.client_name.clone(),
                capabilities,
                listen_port: 0,
                id,
                rest: vec![],
            });
            let outcome = match self.send_rejected(&mut session, &hello).await {
                Ok(true) => self.expect_disconnect_after_hello(&mut session).await,
                Ok(false) => Ok(()),
                Err(err) => Err(err),
            };
            outcome.map_err(|err| assertion(format!("malicious hello {}: {}", index, err)))?;
        }
        Ok(())
    }

    // the remote's own Hello may arrive first
    async fn expect_disconnect_after_hello(&self, session: &mut Session<TcpStream>) -> Result<()> {
        let wait = self.settings.message_timeout();
        for _ in 0..2 {
            match session.receive(wait).await {
                Ok(Message::Hello(_)) => continue,
                outcome => return self.accepts_disconnect(outcome),
            }
        }
        Err(assertion("remote did not disconnect".to_string()))
    }

    /// A Status claiming an absurd total difficulty must get us disconnected.
    pub async fn test_malicious_status(&mut self, protocol: Protocol) -> Result<()> {
        let mut session = self.dial(protocol).await?;
        session.exchange_hello().await?;
        let status = Status {
            total_difficulty: large_number(self.settings.large_payload_bytes),
            ..self.chain.status(session.eth_version())
        };
        session
            .exchange_status(&self.chain, Some(status), self.settings.status_timeout())
            .await?;
        let outcome = session
            .drive_until(&self.chain, None, self.settings.message_timeout())
            .await;
        self.accepts_disconnect(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::mock_node::MockNode;
    use crate::test_utilities::mocks::make_mock_chain;
    use tokio::net::TcpListener;

    fn test_settings() -> Settings {
        Settings {
            chain_length: 60,
            large_payload_bytes: 1024,
            message_timeout_secs: 5,
            read_timeout_secs: 5,
            ..Settings::default()
        }
    }

    // a node that completes the RLPx handshake (and optionally Hello and Status) and then
    // closes the socket
    async fn start_hanging_up_node(chain: Blockchain, exchange_status: bool) -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let identity = Keypair::new();
        let peer = Peer::new(*identity.public_key(), address);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let identity = identity.clone();
                let chain = chain.clone();
                tokio::spawn(async move {
                    let _ = hang_up(stream, identity, chain, exchange_status).await;
                });
            }
        });
        peer
    }

    async fn hang_up(
        stream: TcpStream,
        identity: Keypair,
        chain: Blockchain,
        exchange_status: bool,
    ) -> Result<()> {
        let settings = Settings::default();
        let wait = settings.handshake_timeout();
        let mut session =
            Session::accept(stream, identity, Protocol::Eth66.capabilities(), &settings).await?;
        if exchange_status {
            let hello = session.hello();
            session.send(&Message::Hello(hello)).await?;
            if let Message::Hello(hello) = session.receive(wait).await? {
                session.complete_hello(&hello)?;
            }
            let status = chain.status(session.eth_version());
            session.send(&Message::Status(status)).await?;
            session.receive(wait).await?;
        }
        drop(session);
        Ok(())
    }

    #[tokio::test]
    async fn malicious_handshake_accepts_dropped_connection_test() {
        let chain = make_mock_chain(10);
        let peer = start_hanging_up_node(chain.clone(), false).await;
        let settings = Settings {
            chain_length: 10,
            ..Settings::default()
        };
        let mut suite = Suite::from_chain(peer, chain, settings).unwrap();
        suite.test_malicious_handshake(Protocol::Eth65).await.unwrap();
        suite.test_malicious_handshake(Protocol::Eth66).await.unwrap();
    }

    #[tokio::test]
    async fn large_announcement_accepts_dropped_connection_test() {
        let chain = make_mock_chain(10);
        let peer = start_hanging_up_node(chain.clone(), true).await;
        let settings = Settings {
            chain_length: 10,
            ..Settings::default()
        };
        let size = settings.large_payload_bytes;
        let suite = Suite::from_chain(peer, chain, settings).unwrap();
        for protocol in [Protocol::Eth65, Protocol::Eth66] {
            let announce = NewBlock {
                block: large_block(size),
                total_difficulty: large_number(size),
            };
            suite.reject_announcement(protocol, announce).await.unwrap();
        }
    }

    #[test]
    fn suite_requires_long_enough_chain_test() {
        let node_peer: Peer = format!(
            "enode://{}@127.0.0.1:30303",
            hex::encode(Keypair::new().node_id())
        )
        .parse()
        .unwrap();
        assert!(matches!(
            Suite::from_chain(node_peer, make_mock_chain(10), test_settings()),
            Err(Error::Chain(ChainError::TooShort { have: 10, need: 60 }))
        ));
    }

    #[tokio::test]
    async fn broadcast_extends_chain_test() {
        let full_chain = make_mock_chain(70);
        let node = MockNode::start(full_chain.shorten(60)).await;
        let mut suite = Suite::from_chain(node.peer(), full_chain, test_settings()).unwrap();
        suite.test_broadcast(Protocol::Eth66).await.unwrap();
        assert_eq!(suite.chain.len(), 61);
        assert_eq!(node.chain_length().await, 61);
        suite.test_status(Protocol::Eth65).await.unwrap();
    }

    #[tokio::test]
    async fn headers_and_bodies_test() {
        let full_chain = make_mock_chain(70);
        let node = MockNode::start(full_chain.shorten(60)).await;
        let mut suite = Suite::from_chain(node.peer(), full_chain, test_settings()).unwrap();
        for protocol in [Protocol::Eth65, Protocol::Eth66] {
            suite.test_get_block_headers(protocol).await.unwrap();
            suite.test_get_block_bodies(protocol).await.unwrap();
        }
    }

    #[tokio::test]
    async fn status_against_wrong_chain_fails_test() {
        let full_chain = make_mock_chain(70);
        let node = MockNode::start(full_chain.shorten(50)).await;
        let mut suite = Suite::from_chain(node.peer(), full_chain, test_settings()).unwrap();
        assert!(matches!(
            suite.test_status(Protocol::Eth65).await,
            Err(Error::Protocol(ProtocolError::StatusMismatch { .. }))
        ));
    }

    #[test]
    fn protocol_capabilities_test() {
        assert_eq!(
            Protocol::Eth65.capabilities(),
            vec![Capability::eth(64), Capability::eth(65)]
        );
        assert_eq!(Protocol::Eth66.capabilities().len(), 3);
        assert_eq!(Protocol::Eth65.request_id(3), None);
        assert_eq!(Protocol::Eth66.request_id(3), Some(3));
    }
}

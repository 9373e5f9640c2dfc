use std::fmt;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use secp256k1::PublicKey;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, event, info, warn, Level};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::config::Settings;
use crate::crypto::node_id;
use crate::error::{Error, ProtocolError};
use crate::keypair::Keypair;
use crate::networking::frame::FrameCodec;
use crate::networking::handshake::{self, Secrets};
use crate::networking::message::{
    dump, negotiate_eth, Capability, DisconnectReason, GetBlockHeaders, HashOrNumber, Hello,
    Message, MessageCodec, MessageKind, Status, BASE_PROTOCOL_VERSION, ETH66,
};
use crate::networking::peer::Peer;
use crate::Result;

/// Request id used by `wait_for_block` on eth/66 sessions.
pub const BLOCK_POLL_REQUEST_ID: u64 = 54;

// base protocol version from which payloads are snappy compressed
const SNAPPY_PROTOCOL_VERSION: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    CapabilityExchange,
    StatusExchange,
    Ready,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting",
            SessionState::Handshaking => "Handshaking",
            SessionState::CapabilityExchange => "CapabilityExchange",
            SessionState::StatusExchange => "StatusExchange",
            SessionState::Ready => "Ready",
            SessionState::Closed => "Closed",
        }
    }

    fn allows(&self, kind: MessageKind) -> bool {
        match (self, kind) {
            (SessionState::Connecting | SessionState::Handshaking | SessionState::Closed, _) => {
                false
            }
            (_, MessageKind::Disconnect | MessageKind::Ping | MessageKind::Pong) => true,
            (SessionState::CapabilityExchange, MessageKind::Hello) => true,
            (SessionState::StatusExchange | SessionState::Ready, MessageKind::Status) => true,
            (SessionState::Ready, kind) => kind != MessageKind::Hello,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

///
/// One RLPx connection.
///
/// A session owns its socket, the frame codec with both MAC states and the negotiated message
/// codec. It is driven by one task at a time: `send` writes a whole frame before returning and
/// `receive` buffers partial frames across calls, so timeouts never leave half a frame behind.
///
pub struct Session<S = TcpStream> {
    stream: S,
    frames: FrameCodec,
    messages: MessageCodec,
    buffer: BytesMut,
    state: SessionState,
    identity: Keypair,
    remote: PublicKey,
    capabilities: Vec<Capability>,
    remote_hello: Option<Hello>,
    settings: Settings,
}

impl Session<TcpStream> {
    /// Connect to `peer` with a fresh identity and run the initiator handshake.
    pub async fn dial(
        peer: &Peer,
        capabilities: Vec<Capability>,
        settings: &Settings,
    ) -> Result<Session<TcpStream>> {
        Session::dial_as(peer, Keypair::new(), capabilities, settings).await
    }

    /// Connect to `peer` as `identity`. Both the connect and the handshake are bounded.
    pub async fn dial_as(
        peer: &Peer,
        identity: Keypair,
        capabilities: Vec<Capability>,
        settings: &Settings,
    ) -> Result<Session<TcpStream>> {
        debug!("{} {}", SessionState::Connecting, peer);
        let stream = match timeout(settings.dial_timeout(), TcpStream::connect(peer.address)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(Error::Timeout(settings.dial_timeout())),
        };
        stream.set_nodelay(true)?;
        Session::initiate(stream, identity, &peer.id, capabilities, settings).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn established(
        stream: S,
        secrets: Secrets,
        identity: Keypair,
        capabilities: Vec<Capability>,
        settings: &Settings,
    ) -> Self {
        let remote = secrets.remote;
        event!(
            Level::DEBUG,
            "{} with {}",
            SessionState::CapabilityExchange,
            hex::encode(&node_id(&remote)[..8])
        );
        Session {
            stream,
            frames: FrameCodec::new(secrets),
            messages: MessageCodec::default(),
            buffer: BytesMut::with_capacity(64 * 1024),
            state: SessionState::CapabilityExchange,
            identity,
            remote,
            capabilities,
            remote_hello: None,
            settings: settings.clone(),
        }
    }

    /// Run the initiator handshake over an already connected stream.
    pub async fn initiate(
        mut stream: S,
        identity: Keypair,
        remote: &PublicKey,
        capabilities: Vec<Capability>,
        settings: &Settings,
    ) -> Result<Session<S>> {
        let secrets = timeout(
            settings.handshake_timeout(),
            handshake::initiate(&mut stream, &identity, remote),
        )
        .await
        .map_err(|_| Error::Timeout(settings.handshake_timeout()))??;
        Ok(Session::established(stream, secrets, identity, capabilities, settings))
    }

    /// Run the recipient handshake over an accepted stream.
    pub async fn accept(
        mut stream: S,
        identity: Keypair,
        capabilities: Vec<Capability>,
        settings: &Settings,
    ) -> Result<Session<S>> {
        let secrets = timeout(
            settings.handshake_timeout(),
            handshake::respond(&mut stream, &identity),
        )
        .await
        .map_err(|_| Error::Timeout(settings.handshake_timeout()))??;
        Ok(Session::established(stream, secrets, identity, capabilities, settings))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    pub fn remote_id(&self) -> &PublicKey {
        &self.remote
    }

    pub fn remote_hello(&self) -> Option<&Hello> {
        self.remote_hello.as_ref()
    }

    /// Negotiated eth version, 0 before the Hello exchange completed.
    pub fn eth_version(&self) -> u32 {
        self.messages.eth_version()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn transition(&mut self, state: SessionState) {
        if self.state != state {
            event!(Level::DEBUG, "session {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn close(&mut self) {
        self.transition(SessionState::Closed);
    }

    pub(crate) fn mark_ready(&mut self) {
        self.transition(SessionState::Ready);
    }

    /// The Hello this session announces.
    pub fn hello(&self) -> Hello {
        Hello {
            version: BASE_PROTOCOL_VERSION,
            name: self.settings.client_name.clone(),
            capabilities: self.capabilities.clone(),
            listen_port: 0,
            id: self.identity.node_id().to_vec(),
            rest: vec![],
        }
    }

    /// Encode and write one message. A failed or timed out write closes the session.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::Closed);
        }
        let kind = message.kind();
        if !self.state.allows(kind) {
            return Err(ProtocolError::InvalidState {
                kind: kind.name(),
                state: self.state.name(),
            }
            .into());
        }
        let (code, payload) = self.messages.encode(message)?;
        let frame = match self.frames.write_frame(code, &payload) {
            Ok(frame) => frame,
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };

        let write_timeout = self.settings.message_timeout();
        let stream = &mut self.stream;
        let written = timeout(write_timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {
                debug!("sent {} ({} bytes)", kind, frame.len());
                Ok(())
            }
            Ok(Err(err)) => {
                self.close();
                Err(err.into())
            }
            Err(_) => {
                self.close();
                Err(Error::Timeout(write_timeout))
            }
        }
    }

    /// Read the next message, waiting at most `wait`.
    pub async fn receive(&mut self, wait: Duration) -> Result<Message> {
        self.receive_until(Instant::now() + wait, wait).await
    }

    async fn receive_until(&mut self, deadline: Instant, wait: Duration) -> Result<Message> {
        loop {
            if self.state == SessionState::Closed {
                return Err(Error::Closed);
            }
            match self.frames.read_frame(&mut self.buffer) {
                Ok(Some((code, payload))) => return self.decode(code, &payload),
                Ok(None) => {}
                Err(err) => {
                    self.close();
                    return Err(err.into());
                }
            }
            match timeout_at(deadline, self.stream.read_buf(&mut self.buffer)).await {
                Ok(Ok(0)) => {
                    self.close();
                    return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    self.close();
                    return Err(err.into());
                }
                Err(_) => return Err(Error::Timeout(wait)),
            }
        }
    }

    fn decode(&mut self, code: u64, payload: &[u8]) -> Result<Message> {
        let message = self.messages.decode(code, payload)?;
        if let Message::Disconnect(reason) = &message {
            info!("remote disconnected: {}", reason);
            self.close();
        }
        Ok(message)
    }

    ///
    /// Validate the remote Hello against ours and switch to status exchange. Snappy is turned
    /// on when the remote announced base protocol version 5 or later.
    ///
    pub fn complete_hello(&mut self, hello: &Hello) -> Result<u32> {
        let version = negotiate_eth(&self.capabilities, &hello.capabilities).ok_or_else(|| {
            ProtocolError::NoMatchingCapability {
                ours: join(&self.capabilities),
                theirs: join(&hello.capabilities),
            }
        })?;
        self.messages = MessageCodec::new(version);
        self.frames
            .set_snappy(hello.version >= SNAPPY_PROTOCOL_VERSION);
        self.remote_hello = Some(hello.clone());
        info!(
            "negotiated eth/{} with {} (snappy {})",
            version,
            hello.name,
            self.frames.snappy()
        );
        self.transition(SessionState::StatusExchange);
        Ok(version)
    }

    /// Send our Hello and wait for theirs.
    pub async fn exchange_hello(&mut self) -> Result<Hello> {
        self.send(&Message::Hello(self.hello())).await?;
        let wait = self.settings.handshake_timeout();
        let deadline = Instant::now() + wait;
        loop {
            match self.receive_until(deadline, wait).await? {
                Message::Hello(hello) => {
                    self.complete_hello(&hello)?;
                    return Ok(hello);
                }
                Message::Ping => self.send(&Message::Pong).await?,
                Message::Disconnect(reason) => {
                    return Err(ProtocolError::Disconnected(reason).into())
                }
                other => {
                    return Err(ProtocolError::UnexpectedMessage(dump(&other, self.settings.pretty)).into())
                }
            }
        }
    }

    ///
    /// Wait for the remote Status, check it against `chain`, then answer with `status` (or the
    /// chain's own Status). The remote Status is returned once the session is ready.
    ///
    pub async fn exchange_status(
        &mut self,
        chain: &Blockchain,
        status: Option<Status>,
        wait: Duration,
    ) -> Result<Status> {
        let deadline = Instant::now() + wait;
        let remote = loop {
            match self.receive_until(deadline, wait).await? {
                Message::Status(remote) => break remote,
                Message::Ping => self.send(&Message::Pong).await?,
                Message::Disconnect(reason) => {
                    return Err(ProtocolError::Disconnected(reason).into())
                }
                other => {
                    return Err(ProtocolError::UnexpectedMessage(dump(&other, self.settings.pretty)).into())
                }
            }
        };
        check_status(&remote, &chain.status(self.eth_version()))?;

        let status = status.unwrap_or_else(|| chain.status(self.eth_version()));
        self.send(&Message::Status(status)).await?;
        self.mark_ready();
        Ok(remote)
    }

    async fn serve(&mut self, chain: &Blockchain, message: &Message) -> Result<bool> {
        match message {
            Message::Ping => self.send(&Message::Pong).await?,
            Message::GetBlockHeaders {
                request_id,
                request,
            } => {
                let headers = chain.headers_for(request)?;
                debug!("serving {} headers from {}", headers.len(), request.origin);
                self.send(&Message::BlockHeaders {
                    request_id: *request_id,
                    headers,
                })
                .await?
            }
            Message::GetBlockBodies { request_id, hashes } => {
                let bodies = chain.bodies_for(hashes);
                debug!("serving {} of {} bodies", bodies.len(), hashes.len());
                self.send(&Message::BlockBodies {
                    request_id: *request_id,
                    bodies,
                })
                .await?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    ///
    /// Read until a message arrives that is not a Ping or a header or body query, answering
    /// those from `chain` in the order they came in.
    ///
    /// When `awaiting` is set the session is waiting for the response to its own request with
    /// that id. Every request or response read meanwhile must carry the same id, otherwise the
    /// exchange fails with `RequestIdMismatch` before anything is served.
    ///
    pub async fn drive_until(
        &mut self,
        chain: &Blockchain,
        awaiting: Option<u64>,
        wait: Duration,
    ) -> Result<Message> {
        let deadline = Instant::now() + wait;
        loop {
            let message = self.receive_until(deadline, wait).await?;
            if let (Some(expected), true) = (awaiting, message.kind().is_request_response()) {
                let got = message.request_id().unwrap_or_default();
                if got != expected {
                    return Err(ProtocolError::RequestIdMismatch { expected, got }.into());
                }
            }
            if self.serve(chain, &message).await? {
                continue;
            }
            return Ok(message);
        }
    }

    ///
    /// Poll the remote with header queries for `block` until it knows it, serving the remote's
    /// own queries in between.
    ///
    pub async fn wait_for_block(
        &mut self,
        chain: &Blockchain,
        block: &Block,
        wait: Duration,
        poll: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + wait;
        let request_id = (self.eth_version() >= ETH66).then(|| BLOCK_POLL_REQUEST_ID);
        let request = GetBlockHeaders {
            origin: HashOrNumber::Hash(block.hash()),
            amount: 1,
            skip: 0,
            reverse: false,
        };
        loop {
            self.send(&Message::GetBlockHeaders {
                request_id,
                request: request.clone(),
            })
            .await?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.drive_until(chain, request_id, remaining).await? {
                Message::BlockHeaders { headers, .. } if !headers.is_empty() => return Ok(()),
                Message::BlockHeaders { .. } => {}
                other => {
                    return Err(ProtocolError::UnexpectedMessage(dump(&other, self.settings.pretty)).into())
                }
            }
            if Instant::now() + poll >= deadline {
                return Err(Error::Timeout(wait));
            }
            sleep(poll).await;
        }
    }

    /// Tell the remote why we hang up and close the session.
    pub async fn disconnect(&mut self, reason: DisconnectReason) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let result = self.send(&Message::Disconnect(reason)).await;
        if let Err(err) = &result {
            warn!("could not send disconnect: {}", err);
        }
        self.close();
        result
    }
}

fn join(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|cap| cap.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn mismatch(field: &'static str, have: impl fmt::Display, want: impl fmt::Display) -> Error {
    ProtocolError::StatusMismatch {
        field,
        have: have.to_string(),
        want: want.to_string(),
    }
    .into()
}

/// Compare a received Status with the one expected from the local chain.
pub fn check_status(have: &Status, want: &Status) -> Result<()> {
    if have.protocol_version != want.protocol_version {
        return Err(mismatch("protocol version", have.protocol_version, want.protocol_version));
    }
    if have.network_id != want.network_id {
        return Err(mismatch("network id", have.network_id, want.network_id));
    }
    if have.genesis != want.genesis {
        return Err(mismatch("genesis", hex::encode(have.genesis), hex::encode(want.genesis)));
    }
    if have.head != want.head {
        return Err(mismatch("head block", hex::encode(have.head), hex::encode(want.head)));
    }
    if have.total_difficulty != want.total_difficulty {
        return Err(mismatch("total difficulty", &have.total_difficulty, &want.total_difficulty));
    }
    if have.fork_id != want.fork_id {
        return Err(mismatch(
            "fork id",
            format!("{:?}", have.fork_id),
            format!("{:?}", want.fork_id),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities::mocks::make_mock_chain;
    use tokio::io::{duplex, DuplexStream};

    async fn session_pair(
        ours: Vec<Capability>,
        theirs: Vec<Capability>,
    ) -> (Session<DuplexStream>, Session<DuplexStream>) {
        let settings = Settings::default();
        let (dialer, listener) = duplex(1 << 20);
        let remote = Keypair::new();
        let remote_public = *remote.public_key();
        let accept_settings = settings.clone();
        let accepted = tokio::spawn(async move {
            Session::accept(listener, remote, theirs, &accept_settings).await
        });
        let dialed = Session::initiate(dialer, Keypair::new(), &remote_public, ours, &settings)
            .await
            .unwrap();
        (dialed, accepted.await.unwrap().unwrap())
    }

    async fn ready_pair(version: u32, chain: &Blockchain) -> (Session<DuplexStream>, Session<DuplexStream>) {
        let caps = vec![Capability::eth(version)];
        let (mut ours, mut theirs) = session_pair(caps.clone(), caps).await;
        let hello = theirs.hello();
        theirs.send(&Message::Hello(hello)).await.unwrap();
        ours.exchange_hello().await.unwrap();
        match theirs.receive(Duration::from_secs(5)).await.unwrap() {
            Message::Hello(hello) => theirs.complete_hello(&hello).unwrap(),
            other => panic!("expected hello, got {:?}", other),
        };

        theirs.send(&Message::Status(chain.status(version))).await.unwrap();
        ours.exchange_status(chain, None, Duration::from_secs(5))
            .await
            .unwrap();
        match theirs.receive(Duration::from_secs(5)).await.unwrap() {
            Message::Status(status) => check_status(&status, &chain.status(version)).unwrap(),
            other => panic!("expected status, got {:?}", other),
        }
        theirs.mark_ready();
        (ours, theirs)
    }

    #[tokio::test]
    async fn hello_negotiates_highest_common_version_test() {
        let (mut ours, mut theirs) = session_pair(
            vec![Capability::eth(64), Capability::eth(65), Capability::eth(66)],
            vec![Capability::eth(65), Capability::eth(66), Capability::new("snap", 1)],
        )
        .await;
        assert_eq!(ours.state(), SessionState::CapabilityExchange);
        let hello = theirs.hello();
        theirs.send(&Message::Hello(hello)).await.unwrap();
        let remote = ours.exchange_hello().await.unwrap();
        assert_eq!(remote.id, theirs.identity().node_id().to_vec());
        assert_eq!(ours.eth_version(), 66);
        assert_eq!(ours.state(), SessionState::StatusExchange);
        assert_eq!(ours.remote_id(), theirs.identity().public_key());
    }

    #[tokio::test]
    async fn hello_without_common_capability_test() {
        let (mut ours, mut theirs) =
            session_pair(vec![Capability::eth(64)], vec![Capability::eth(66)]).await;
        let hello = theirs.hello();
        theirs.send(&Message::Hello(hello)).await.unwrap();
        assert!(matches!(
            ours.exchange_hello().await,
            Err(Error::Protocol(ProtocolError::NoMatchingCapability { .. }))
        ));
    }

    #[tokio::test]
    async fn send_is_gated_by_state_test() {
        let chain = make_mock_chain(4);
        let (mut ours, _theirs) = session_pair(vec![Capability::eth(65)], vec![Capability::eth(65)]).await;
        assert!(matches!(
            ours.send(&Message::Status(chain.status(65))).await,
            Err(Error::Protocol(ProtocolError::InvalidState { kind: "Status", .. }))
        ));
        ours.disconnect(DisconnectReason::Requested).await.unwrap();
        assert_eq!(ours.state(), SessionState::Closed);
        assert!(matches!(ours.send(&Message::Ping).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn status_mismatch_is_reported_test() {
        let chain = make_mock_chain(10);
        let caps = vec![Capability::eth(65)];
        let (mut ours, mut theirs) = session_pair(caps.clone(), caps).await;
        let hello = theirs.hello();
        theirs.send(&Message::Hello(hello)).await.unwrap();
        ours.exchange_hello().await.unwrap();
        if let Message::Hello(hello) = theirs.receive(Duration::from_secs(5)).await.unwrap() {
            theirs.complete_hello(&hello).unwrap();
        }

        let mut status = chain.shorten(5).status(65);
        status.fork_id = chain.fork_id();
        theirs.send(&Message::Status(status)).await.unwrap();
        assert!(matches!(
            ours.exchange_status(&chain, None, Duration::from_secs(5)).await,
            Err(Error::Protocol(ProtocolError::StatusMismatch { field: "head block", .. }))
        ));
    }

    fn headers_query(request_id: Option<u64>) -> Message {
        Message::GetBlockHeaders {
            request_id,
            request: GetBlockHeaders {
                origin: HashOrNumber::Number(2),
                amount: 3,
                skip: 0,
                reverse: false,
            },
        }
    }

    #[tokio::test]
    async fn drive_until_serves_while_waiting_test() {
        let chain = make_mock_chain(20);
        let (mut ours, mut theirs) = ready_pair(66, &chain).await;

        // the remote queries us before answering our own request
        theirs.send(&Message::Ping).await.unwrap();
        theirs.send(&headers_query(Some(3))).await.unwrap();
        theirs
            .send(&Message::BlockHeaders {
                request_id: Some(3),
                headers: vec![chain.block(1).unwrap().header.clone()],
            })
            .await
            .unwrap();

        match ours.drive_until(&chain, Some(3), Duration::from_secs(5)).await.unwrap() {
            Message::BlockHeaders { request_id, headers } => {
                assert_eq!(request_id, Some(3));
                assert_eq!(headers.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(theirs.receive(Duration::from_secs(5)).await.unwrap(), Message::Pong);
        match theirs.receive(Duration::from_secs(5)).await.unwrap() {
            Message::BlockHeaders { request_id, headers } => {
                assert_eq!(request_id, Some(3));
                let numbers: Vec<u64> = headers.iter().map(|h| h.number_u64().unwrap()).collect();
                assert_eq!(numbers, vec![2, 3, 4]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn drive_until_rejects_query_with_other_id_test() {
        let chain = make_mock_chain(20);
        let (mut ours, mut theirs) = ready_pair(66, &chain).await;
        theirs.send(&headers_query(Some(777))).await.unwrap();
        assert!(matches!(
            ours.drive_until(&chain, Some(3), Duration::from_secs(5)).await,
            Err(Error::Protocol(ProtocolError::RequestIdMismatch { expected: 3, got: 777 }))
        ));
        // the query was not answered
        assert!(matches!(
            theirs.receive(Duration::from_millis(100)).await,
            Err(Error::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn drive_until_serves_any_id_when_not_waiting_test() {
        let chain = make_mock_chain(20);
        let (mut ours, mut theirs) = ready_pair(66, &chain).await;
        theirs.send(&headers_query(Some(777))).await.unwrap();
        theirs.send(&Message::NewBlockHashes(vec![])).await.unwrap();
        assert_eq!(
            ours.drive_until(&chain, None, Duration::from_secs(5)).await.unwrap(),
            Message::NewBlockHashes(vec![])
        );
        match theirs.receive(Duration::from_secs(5)).await.unwrap() {
            Message::BlockHeaders { request_id, headers } => {
                assert_eq!(request_id, Some(777));
                assert_eq!(headers.len(), 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn drive_until_checks_request_id_test() {
        let chain = make_mock_chain(5);
        let (mut ours, mut theirs) = ready_pair(66, &chain).await;
        theirs
            .send(&Message::BlockBodies {
                request_id: Some(9),
                bodies: vec![],
            })
            .await
            .unwrap();
        assert!(matches!(
            ours.drive_until(&chain, Some(55), Duration::from_secs(5)).await,
            Err(Error::Protocol(ProtocolError::RequestIdMismatch { expected: 55, got: 9 }))
        ));
    }

    #[tokio::test]
    async fn drive_until_times_out_test() {
        let chain = make_mock_chain(5);
        let (mut ours, _theirs) = ready_pair(65, &chain).await;
        let result = ours
            .drive_until(&chain, None, Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        // a timed out read leaves the session usable
        assert_eq!(ours.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn disconnect_closes_receiver_test() {
        let chain = make_mock_chain(5);
        let (mut ours, mut theirs) = ready_pair(65, &chain).await;
        theirs.disconnect(DisconnectReason::UselessPeer).await.unwrap();
        assert_eq!(
            ours.drive_until(&chain, None, Duration::from_secs(5)).await.unwrap(),
            Message::Disconnect(DisconnectReason::UselessPeer)
        );
        assert_eq!(ours.state(), SessionState::Closed);
        assert!(matches!(ours.receive(Duration::from_secs(1)).await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn dropped_peer_is_a_connection_failure_test() {
        let chain = make_mock_chain(5);
        let (mut ours, theirs) = ready_pair(65, &chain).await;
        drop(theirs);
        let err = ours.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(ours.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn dial_as_presents_given_identity_test() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote = Keypair::new();
        let peer = Peer::new(*remote.public_key(), listener.local_addr().unwrap());
        let settings = Settings::default();
        let accept_settings = settings.clone();
        let accepted = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Session::accept(stream, remote, vec![Capability::eth(65)], &accept_settings).await
        });

        let identity = Keypair::new();
        let dialed = Session::dial_as(&peer, identity.clone(), vec![Capability::eth(65)], &settings)
            .await
            .unwrap();
        let accepted = accepted.await.unwrap().unwrap();
        assert_eq!(accepted.remote_id(), identity.public_key());
        assert_eq!(dialed.remote_id(), &peer.id);
        assert_eq!(dialed.identity(), &identity);
    }
}

//! Typed devp2p base-protocol and eth sub-protocol messages.
//!
//! `MessageCodec` turns a `Message` into a frame code plus RLP payload and back. Decoding
//! dispatches on the closed `MessageKind` table, so an unknown code is a `DecodeError` and
//! never a panic.
use std::convert::TryFrom;
use std::fmt;

use crate::block::{Block, BlockBody, Header};
use crate::crypto::H256;
use crate::error::{DecodeError, ProtocolError};
use crate::forkid::ForkId;
use crate::rlp::{self, Decodable, DecodeResult, Encodable, RawValue, Rlp, RlpStream};
use crate::types::Quantity;
use crate::Result;

/// Base protocol version announced in our Hello. Version 5 turns on snappy.
pub const BASE_PROTOCOL_VERSION: u64 = 5;
/// First eth version that wraps request/response pairs with a request id.
pub const ETH66: u32 = 66;

// dumps of adversarial messages are cut here
const MAX_DUMP_LENGTH: usize = 2048;

pub mod code {
    pub const HELLO: u64 = 0x00;
    pub const DISCONNECT: u64 = 0x01;
    pub const PING: u64 = 0x02;
    pub const PONG: u64 = 0x03;

    // eth sub-protocol, offset past the 16 reserved base codes
    pub const STATUS: u64 = 0x10;
    pub const NEW_BLOCK_HASHES: u64 = 0x11;
    pub const GET_BLOCK_HEADERS: u64 = 0x13;
    pub const BLOCK_HEADERS: u64 = 0x14;
    pub const GET_BLOCK_BODIES: u64 = 0x15;
    pub const BLOCK_BODIES: u64 = 0x16;
    pub const NEW_BLOCK: u64 = 0x17;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    Disconnect,
    Ping,
    Pong,
    Status,
    NewBlockHashes,
    GetBlockHeaders,
    BlockHeaders,
    GetBlockBodies,
    BlockBodies,
    NewBlock,
}

impl MessageKind {
    pub fn code(&self) -> u64 {
        match self {
            MessageKind::Hello => code::HELLO,
            MessageKind::Disconnect => code::DISCONNECT,
            MessageKind::Ping => code::PING,
            MessageKind::Pong => code::PONG,
            MessageKind::Status => code::STATUS,
            MessageKind::NewBlockHashes => code::NEW_BLOCK_HASHES,
            MessageKind::GetBlockHeaders => code::GET_BLOCK_HEADERS,
            MessageKind::BlockHeaders => code::BLOCK_HEADERS,
            MessageKind::GetBlockBodies => code::GET_BLOCK_BODIES,
            MessageKind::BlockBodies => code::BLOCK_BODIES,
            MessageKind::NewBlock => code::NEW_BLOCK,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Hello => "Hello",
            MessageKind::Disconnect => "Disconnect",
            MessageKind::Ping => "Ping",
            MessageKind::Pong => "Pong",
            MessageKind::Status => "Status",
            MessageKind::NewBlockHashes => "NewBlockHashes",
            MessageKind::GetBlockHeaders => "GetBlockHeaders",
            MessageKind::BlockHeaders => "BlockHeaders",
            MessageKind::GetBlockBodies => "GetBlockBodies",
            MessageKind::BlockBodies => "BlockBodies",
            MessageKind::NewBlock => "NewBlock",
        }
    }

    /// True for the request/response pairs that carry a request id on eth/66.
    pub fn is_request_response(&self) -> bool {
        matches!(
            self,
            MessageKind::GetBlockHeaders
                | MessageKind::BlockHeaders
                | MessageKind::GetBlockBodies
                | MessageKind::BlockBodies
        )
    }
}

impl TryFrom<u64> for MessageKind {
    type Error = DecodeError;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            code::HELLO => MessageKind::Hello,
            code::DISCONNECT => MessageKind::Disconnect,
            code::PING => MessageKind::Ping,
            code::PONG => MessageKind::Pong,
            code::STATUS => MessageKind::Status,
            code::NEW_BLOCK_HASHES => MessageKind::NewBlockHashes,
            code::GET_BLOCK_HEADERS => MessageKind::GetBlockHeaders,
            code::BLOCK_HEADERS => MessageKind::BlockHeaders,
            code::GET_BLOCK_BODIES => MessageKind::GetBlockBodies,
            code::BLOCK_BODIES => MessageKind::BlockBodies,
            code::NEW_BLOCK => MessageKind::NewBlock,
            other => return Err(DecodeError::UnknownCode(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    pub name: String,
    pub version: u32,
}

impl Capability {
    pub fn new(name: &str, version: u32) -> Self {
        Capability {
            name: name.to_string(),
            version,
        }
    }

    pub fn eth(version: u32) -> Self {
        Capability::new("eth", version)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl Encodable for Capability {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append(&self.name).append(&self.version);
        stream.end_list();
    }
}

impl Decodable for Capability {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(2)?;
        Ok(Capability {
            name: items[0].as_val()?,
            version: items[1].as_val()?,
        })
    }
}

/// The highest eth version both capability lists name exactly.
pub fn negotiate_eth(ours: &[Capability], theirs: &[Capability]) -> Option<u32> {
    ours.iter()
        .filter(|cap| cap.name == "eth" && theirs.contains(cap))
        .map(|cap| cap.version)
        .max()
}

/// Base protocol handshake message. `id` is kept as raw bytes so malformed identities
/// can be both sent and rejected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hello {
    pub version: u64,
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub listen_port: u64,
    pub id: Vec<u8>,
    pub rest: Vec<RawValue>,
}

impl Encodable for Hello {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream
            .append(&self.version)
            .append(&self.name)
            .append_list(&self.capabilities)
            .append(&self.listen_port)
            .append_bytes(&self.id);
        for item in &self.rest {
            stream.append(item);
        }
        stream.end_list();
    }
}

impl Decodable for Hello {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(5)?;
        Ok(Hello {
            version: items[0].as_val()?,
            name: items[1].as_val()?,
            capabilities: items[2].as_list()?,
            listen_port: items[3].as_val()?,
            id: items[4].data()?.to_vec(),
            rest: items[5..]
                .iter()
                .map(|item| item.as_val())
                .collect::<DecodeResult<_>>()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    NetworkError,
    ProtocolError,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    Quitting,
    UnexpectedIdentity,
    SelfConnection,
    ReadTimeout,
    SubprotocolError,
    Other(u8),
}

impl DisconnectReason {
    pub fn code(&self) -> u8 {
        match self {
            DisconnectReason::Requested => 0x00,
            DisconnectReason::NetworkError => 0x01,
            DisconnectReason::ProtocolError => 0x02,
            DisconnectReason::UselessPeer => 0x03,
            DisconnectReason::TooManyPeers => 0x04,
            DisconnectReason::AlreadyConnected => 0x05,
            DisconnectReason::IncompatibleVersion => 0x06,
            DisconnectReason::InvalidIdentity => 0x07,
            DisconnectReason::Quitting => 0x08,
            DisconnectReason::UnexpectedIdentity => 0x09,
            DisconnectReason::SelfConnection => 0x0a,
            DisconnectReason::ReadTimeout => 0x0b,
            DisconnectReason::SubprotocolError => 0x10,
            DisconnectReason::Other(code) => *code,
        }
    }
}

impl From<u8> for DisconnectReason {
    fn from(code: u8) -> Self {
        match code {
            0x00 => DisconnectReason::Requested,
            0x01 => DisconnectReason::NetworkError,
            0x02 => DisconnectReason::ProtocolError,
            0x03 => DisconnectReason::UselessPeer,
            0x04 => DisconnectReason::TooManyPeers,
            0x05 => DisconnectReason::AlreadyConnected,
            0x06 => DisconnectReason::IncompatibleVersion,
            0x07 => DisconnectReason::InvalidIdentity,
            0x08 => DisconnectReason::Quitting,
            0x09 => DisconnectReason::UnexpectedIdentity,
            0x0a => DisconnectReason::SelfConnection,
            0x0b => DisconnectReason::ReadTimeout,
            0x10 => DisconnectReason::SubprotocolError,
            other => DisconnectReason::Other(other),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Requested => "disconnect requested",
            DisconnectReason::NetworkError => "network error",
            DisconnectReason::ProtocolError => "breach of protocol",
            DisconnectReason::UselessPeer => "useless peer",
            DisconnectReason::TooManyPeers => "too many peers",
            DisconnectReason::AlreadyConnected => "already connected",
            DisconnectReason::IncompatibleVersion => "incompatible p2p protocol version",
            DisconnectReason::InvalidIdentity => "invalid node identity",
            DisconnectReason::Quitting => "client quitting",
            DisconnectReason::UnexpectedIdentity => "unexpected identity",
            DisconnectReason::SelfConnection => "connected to self",
            DisconnectReason::ReadTimeout => "read timeout",
            DisconnectReason::SubprotocolError => "subprotocol error",
            DisconnectReason::Other(code) => return write!(f, "unknown disconnect reason {}", code),
        };
        f.write_str(text)
    }
}

impl Encodable for DisconnectReason {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append_u64(self.code() as u64);
        stream.end_list();
    }
}

impl Decodable for DisconnectReason {
    // peers send either [reason] or a bare reason
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let code: u64 = if rlp.is_list() {
            rlp.items_at_least(1)?[0].as_val()?
        } else {
            rlp.as_val()?
        };
        u8::try_from(code)
            .map(DisconnectReason::from)
            .map_err(|_| DecodeError::IntegerOverflow(8))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub protocol_version: u32,
    pub network_id: u64,
    pub total_difficulty: Quantity,
    pub head: H256,
    pub genesis: H256,
    pub fork_id: ForkId,
}

impl Encodable for Status {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream
            .append(&self.protocol_version)
            .append(&self.network_id)
            .append(&self.total_difficulty)
            .append(&self.head)
            .append(&self.genesis)
            .append(&self.fork_id);
        stream.end_list();
    }
}

impl Decodable for Status {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(6)?;
        Ok(Status {
            protocol_version: items[0].as_val()?,
            network_id: items[1].as_val()?,
            total_difficulty: items[2].as_val()?,
            head: items[3].as_val()?,
            genesis: items[4].as_val()?,
            fork_id: items[5].as_val()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHashNumber {
    pub hash: H256,
    pub number: u64,
}

impl Encodable for BlockHashNumber {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append(&self.hash).append(&self.number);
        stream.end_list();
    }
}

impl Decodable for BlockHashNumber {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(2)?;
        Ok(BlockHashNumber {
            hash: items[0].as_val()?,
            number: items[1].as_val()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub block: Block,
    pub total_difficulty: Quantity,
}

impl Encodable for NewBlock {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream.append(&self.block).append(&self.total_difficulty);
        stream.end_list();
    }
}

impl Decodable for NewBlock {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(2)?;
        Ok(NewBlock {
            block: items[0].as_val()?,
            total_difficulty: items[1].as_val()?,
        })
    }
}

/// Origin of a header query. On the wire a 32 byte string is a hash and anything up to
/// 8 bytes is a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(H256),
    Number(u64),
}

impl fmt::Display for HashOrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashOrNumber::Hash(hash) => write!(f, "0x{}", hex::encode(hash)),
            HashOrNumber::Number(number) => write!(f, "#{}", number),
        }
    }
}

impl Encodable for HashOrNumber {
    fn rlp_append(&self, stream: &mut RlpStream) {
        match self {
            HashOrNumber::Hash(hash) => stream.append(hash),
            HashOrNumber::Number(number) => stream.append(number),
        };
    }
}

impl Decodable for HashOrNumber {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        match rlp.data()?.len() {
            32 => Ok(HashOrNumber::Hash(rlp.as_val()?)),
            0..=8 => Ok(HashOrNumber::Number(rlp.as_val()?)),
            other => Err(DecodeError::OriginLength(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockHeaders {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

impl Encodable for GetBlockHeaders {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list();
        stream
            .append(&self.origin)
            .append(&self.amount)
            .append(&self.skip)
            .append(&self.reverse);
        stream.end_list();
    }
}

impl Decodable for GetBlockHeaders {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let items = rlp.items_at_least(4)?;
        Ok(GetBlockHeaders {
            origin: items[0].as_val()?,
            amount: items[1].as_val()?,
            skip: items[2].as_val()?,
            reverse: items[3].as_val()?,
        })
    }
}

///
/// Every message the harness sends or understands.
///
/// The four request/response variants carry `request_id`, which must be `Some` on an
/// eth/66 session and `None` before it. `MessageCodec::encode` enforces this.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Disconnect(DisconnectReason),
    Ping,
    Pong,
    Status(Status),
    NewBlockHashes(Vec<BlockHashNumber>),
    GetBlockHeaders {
        request_id: Option<u64>,
        request: GetBlockHeaders,
    },
    BlockHeaders {
        request_id: Option<u64>,
        headers: Vec<Header>,
    },
    GetBlockBodies {
        request_id: Option<u64>,
        hashes: Vec<H256>,
    },
    BlockBodies {
        request_id: Option<u64>,
        bodies: Vec<BlockBody>,
    },
    NewBlock(Box<NewBlock>),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello(_) => MessageKind::Hello,
            Message::Disconnect(_) => MessageKind::Disconnect,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
            Message::Status(_) => MessageKind::Status,
            Message::NewBlockHashes(_) => MessageKind::NewBlockHashes,
            Message::GetBlockHeaders { .. } => MessageKind::GetBlockHeaders,
            Message::BlockHeaders { .. } => MessageKind::BlockHeaders,
            Message::GetBlockBodies { .. } => MessageKind::GetBlockBodies,
            Message::BlockBodies { .. } => MessageKind::BlockBodies,
            Message::NewBlock(_) => MessageKind::NewBlock,
        }
    }

    pub fn code(&self) -> u64 {
        self.kind().code()
    }

    pub fn request_id(&self) -> Option<u64> {
        match self {
            Message::GetBlockHeaders { request_id, .. }
            | Message::BlockHeaders { request_id, .. }
            | Message::GetBlockBodies { request_id, .. }
            | Message::BlockBodies { request_id, .. } => *request_id,
            _ => None,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            Message::Hello(hello) => rlp::encode(hello),
            Message::Disconnect(reason) => rlp::encode(reason),
            Message::Ping | Message::Pong => RlpStream::new_list().out(),
            Message::Status(status) => rlp::encode(status),
            Message::NewBlockHashes(announces) => rlp::encode_list(announces),
            Message::GetBlockHeaders { request, .. } => rlp::encode(request),
            Message::BlockHeaders { headers, .. } => rlp::encode_list(headers),
            Message::GetBlockBodies { hashes, .. } => rlp::encode_list(hashes),
            Message::BlockBodies { bodies, .. } => rlp::encode_list(bodies),
            Message::NewBlock(announce) => rlp::encode(announce.as_ref()),
        }
    }
}

/// Truncated `Debug` rendering for logs and failure reports.
pub fn dump(message: &Message, pretty: bool) -> String {
    let mut text = if pretty {
        format!("{:#?}", message)
    } else {
        format!("{:?}", message)
    };
    if text.len() > MAX_DUMP_LENGTH {
        let mut cut = MAX_DUMP_LENGTH;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let total = text.len();
        text.truncate(cut);
        text.push_str(&format!("... ({} bytes total)", total));
    }
    text
}

/// Maps messages to (code, payload) pairs for one negotiated eth version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageCodec {
    eth_version: u32,
}

impl MessageCodec {
    /// `eth_version` 0 means nothing is negotiated yet, only base messages make sense.
    pub fn new(eth_version: u32) -> Self {
        MessageCodec { eth_version }
    }

    pub fn eth_version(&self) -> u32 {
        self.eth_version
    }

    fn wraps_requests(&self) -> bool {
        self.eth_version >= ETH66
    }

    pub fn encode(&self, message: &Message) -> Result<(u64, Vec<u8>)> {
        let kind = message.kind();
        if !kind.is_request_response() {
            return Ok((kind.code(), message.body()));
        }
        match (message.request_id(), self.wraps_requests()) {
            (Some(request_id), true) => {
                let mut stream = RlpStream::new_list();
                stream.append(&request_id).append_raw(&message.body());
                Ok((kind.code(), stream.out()))
            }
            (None, false) => Ok((kind.code(), message.body())),
            (None, true) => Err(ProtocolError::RequestIdRequired(self.eth_version).into()),
            (Some(_), false) => Err(ProtocolError::RequestIdUnsupported(self.eth_version).into()),
        }
    }

    pub fn decode(&self, code: u64, payload: &[u8]) -> DecodeResult<Message> {
        let kind = MessageKind::try_from(code)?;
        let (item, rest) = rlp::split_first(payload)?;
        if !rest.is_empty() {
            return Err(DecodeError::TrailingBytes(rest.len()));
        }

        let (request_id, body) = if kind.is_request_response() && self.wraps_requests() {
            let items = item.items_at_least(2)?;
            (Some(items[0].as_val::<u64>()?), items[1])
        } else {
            (None, item)
        };

        Ok(match kind {
            MessageKind::Hello => Message::Hello(body.as_val()?),
            MessageKind::Disconnect => Message::Disconnect(body.as_val()?),
            MessageKind::Ping => Message::Ping,
            MessageKind::Pong => Message::Pong,
            MessageKind::Status => Message::Status(body.as_val()?),
            MessageKind::NewBlockHashes => Message::NewBlockHashes(body.as_list()?),
            MessageKind::GetBlockHeaders => Message::GetBlockHeaders {
                request_id,
                request: body.as_val()?,
            },
            MessageKind::BlockHeaders => Message::BlockHeaders {
                request_id,
                headers: body.as_list()?,
            },
            MessageKind::GetBlockBodies => Message::GetBlockBodies {
                request_id,
                hashes: body.as_list()?,
            },
            MessageKind::BlockBodies => Message::BlockBodies {
                request_id,
                bodies: body.as_list()?,
            },
            MessageKind::NewBlock => Message::NewBlock(Box::new(body.as_val()?)),
        })
    }
}

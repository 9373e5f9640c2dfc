use std::time::Duration;

use thiserror::Error;

use crate::networking::message::DisconnectReason;

/// Top level error for every devp2p operation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("no message received within {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid test filter: {0}")]
    Filter(#[from] regex::Error),
}

impl Error {
    /// True when the error means the remote end dropped or poisoned the connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Integrity(_) | Error::Closed
        )
    }
}

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("secp256k1: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    #[error("ECIES message too short ({0} bytes)")]
    EciesTooShort(usize),

    #[error("unsupported ECIES public key prefix {0:#04x}")]
    EciesKeyPrefix(u8),

    #[error("ECIES message tag mismatch")]
    EciesTag,

    #[error("handshake packet size {size} underflows minimum {min}")]
    SizeUnderflow { size: usize, min: usize },

    #[error("malformed {kind} message: {source}")]
    Malformed {
        kind: &'static str,
        source: DecodeError,
    },
}

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("bad header MAC")]
    HeaderMac,

    #[error("bad frame MAC")]
    FrameMac,

    #[error("message size {0} overflows uint24")]
    FrameTooLarge(usize),

    #[error("message length >= 16MB ({0} bytes)")]
    PlainTooLarge(usize),

    #[error("snappy: {0}")]
    Snappy(#[from] snap::Error),

    #[error("can't read message code: {0}")]
    MessageCode(DecodeError),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("no matching eth capability: ours {ours}, theirs {theirs}")]
    NoMatchingCapability { ours: String, theirs: String },

    #[error("request id mismatch: expected {expected}, got {got}")]
    RequestIdMismatch { expected: u64, got: u64 },

    #[error("request id is required on eth/{0}")]
    RequestIdRequired(u32),

    #[error("request ids are not supported on eth/{0}")]
    RequestIdUnsupported(u32),

    #[error("wrong {field} in status: have {have}, want {want}")]
    StatusMismatch {
        field: &'static str,
        have: String,
        want: String,
    },

    #[error("{kind} can not be sent in state {state}")]
    InvalidState {
        kind: &'static str,
        state: &'static str,
    },

    #[error("disconnected: {0}")]
    Disconnected(DisconnectReason),

    #[error("invalid node URL {url}: {reason}")]
    InvalidNode { url: String, reason: String },

    #[error("{0}")]
    Assertion(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("input too short")]
    InputTooShort,

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    #[error("expected list")]
    ExpectedList,

    #[error("expected string")]
    ExpectedString,

    #[error("non-canonical size information")]
    NonCanonicalSize,

    #[error("non-canonical integer (leading zero bytes)")]
    LeadingZero,

    #[error("integer overflows {0} bits")]
    IntegerOverflow(u32),

    #[error("wrong length: expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("too few list elements: expected at least {expected}, got {got}")]
    TooFewItems { expected: usize, got: usize },

    #[error("invalid boolean")]
    InvalidBool,

    #[error("invalid hash-or-number length {0}")]
    OriginLength(usize),

    #[error("unknown message code {0:#04x}")]
    UnknownCode(u64),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid block at index {index}: {source}")]
    BlockDecode { index: usize, source: DecodeError },

    #[error("invalid genesis config: {0}")]
    Genesis(String),

    #[error("chain fixture is empty")]
    Empty,

    #[error("first fixture block has number {0}, expected the genesis block")]
    MissingGenesis(String),

    #[error("total difficulty overflows 256 bits at block {0}")]
    DifficultyOverflow(usize),

    #[error("no block headers requested")]
    NoHeadersRequested,

    #[error("no headers found for origin {0}")]
    UnknownOrigin(String),

    #[error("fixture has {have} blocks, need at least {need}")]
    TooShort { have: usize, need: usize },
}

use rand::{Rng, RngCore};
use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{event, Level};

use crate::crypto::{
    ecdh_x, keccak256, keccak256_concat, node_id, public_key_from_node_id, random_bytes, xor, H256,
};
use crate::ecies;
use crate::error::{DecodeError, HandshakeError};
use crate::keypair::{recover, Keypair, SIGNATURE_LENGTH};
use crate::rlp::{self, RlpStream};
use crate::Result;

/// Handshake version we announce.
pub const AUTH_VERSION: u64 = 4;

// pre-EIP-8 packet sizes
pub const AUTH_V4_LENGTH: usize = 307;
pub const ACK_V4_LENGTH: usize = 210;

const AUTH_V4_PLAIN_LENGTH: usize = SIGNATURE_LENGTH + 32 + 64 + 32 + 1;
const ACK_V4_PLAIN_LENGTH: usize = 64 + 32 + 1;
const EIP8_PREFIX_LENGTH: usize = 2;
const MIN_PADDING: usize = 100;
const MAX_PADDING: usize = 300;

///
/// Keys agreed by a successful handshake.
///
/// `egress_mac` and `ingress_mac` are Keccak256 states that already absorbed the handshake
/// packets; the frame codec keeps absorbing into them.
///
#[derive(Clone)]
pub struct Secrets {
    pub aes: H256,
    pub mac: H256,
    pub egress_mac: Keccak256,
    pub ingress_mac: Keccak256,
    pub remote: PublicKey,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secrets(remote {})", hex::encode(&node_id(&self.remote)[..8]))
    }
}

/// Wire layout of a handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    /// fixed size, encrypted without shared MAC data
    Legacy,
    /// size prefixed RLP with random padding
    Eip8,
}

#[derive(Debug, Clone, PartialEq)]
struct AuthMessage {
    signature: [u8; SIGNATURE_LENGTH],
    initiator: PublicKey,
    nonce: H256,
}

impl AuthMessage {
    fn encode(&self, format: PacketFormat, ephemeral: &PublicKey) -> Vec<u8> {
        match format {
            PacketFormat::Eip8 => {
                let mut stream = RlpStream::new_list();
                stream
                    .append(&self.signature)
                    .append(&node_id(&self.initiator))
                    .append(&self.nonce)
                    .append(&AUTH_VERSION);
                stream.out()
            }
            PacketFormat::Legacy => {
                let mut plain = Vec::with_capacity(AUTH_V4_PLAIN_LENGTH);
                plain.extend_from_slice(&self.signature);
                plain.extend_from_slice(&keccak256(&node_id(ephemeral)));
                plain.extend_from_slice(&node_id(&self.initiator));
                plain.extend_from_slice(&self.nonce);
                plain.push(0);
                plain
            }
        }
    }

    fn decode(plain: &[u8], format: PacketFormat) -> std::result::Result<Self, HandshakeError> {
        let malformed = |source| HandshakeError::Malformed { kind: "auth", source };
        match format {
            PacketFormat::Eip8 => {
                // anything after the list is padding
                let (item, _) = rlp::split_first(plain).map_err(malformed)?;
                let items = item.items_at_least(4).map_err(malformed)?;
                let id: [u8; 64] = items[1].as_val().map_err(malformed)?;
                Ok(AuthMessage {
                    signature: items[0].as_val().map_err(malformed)?,
                    initiator: public_key_from_node_id(&id)?,
                    nonce: items[2].as_val().map_err(malformed)?,
                })
            }
            PacketFormat::Legacy => {
                if plain.len() < AUTH_V4_PLAIN_LENGTH {
                    return Err(malformed(DecodeError::InputTooShort));
                }
                let mut signature = [0u8; SIGNATURE_LENGTH];
                signature.copy_from_slice(&plain[..SIGNATURE_LENGTH]);
                let mut nonce = [0u8; 32];
                nonce.copy_from_slice(&plain[161..193]);
                Ok(AuthMessage {
                    signature,
                    initiator: public_key_from_node_id(&plain[97..161])?,
                    nonce,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AckMessage {
    ephemeral: PublicKey,
    nonce: H256,
}

impl AckMessage {
    fn encode(&self, format: PacketFormat) -> Vec<u8> {
        match format {
            PacketFormat::Eip8 => {
                let mut stream = RlpStream::new_list();
                stream
                    .append(&node_id(&self.ephemeral))
                    .append(&self.nonce)
                    .append(&AUTH_VERSION);
                stream.out()
            }
            PacketFormat::Legacy => {
                let mut plain = Vec::with_capacity(ACK_V4_PLAIN_LENGTH);
                plain.extend_from_slice(&node_id(&self.ephemeral));
                plain.extend_from_slice(&self.nonce);
                plain.push(0);
                plain
            }
        }
    }

    fn decode(plain: &[u8], format: PacketFormat) -> std::result::Result<Self, HandshakeError> {
        let malformed = |source| HandshakeError::Malformed { kind: "ack", source };
        match format {
            PacketFormat::Eip8 => {
                let (item, _) = rlp::split_first(plain).map_err(malformed)?;
                let items = item.items_at_least(3).map_err(malformed)?;
                let id: [u8; 64] = items[0].as_val().map_err(malformed)?;
                Ok(AckMessage {
                    ephemeral: public_key_from_node_id(&id)?,
                    nonce: items[1].as_val().map_err(malformed)?,
                })
            }
            PacketFormat::Legacy => {
                if plain.len() < ACK_V4_PLAIN_LENGTH {
                    return Err(malformed(DecodeError::InputTooShort));
                }
                let mut nonce = [0u8; 32];
                nonce.copy_from_slice(&plain[64..96]);
                Ok(AckMessage {
                    ephemeral: public_key_from_node_id(&plain[..64])?,
                    nonce,
                })
            }
        }
    }
}

/// Encrypt a handshake body to `remote`. EIP-8 packets get random padding and a size prefix
/// that doubles as the ECIES shared MAC data.
fn seal(format: PacketFormat, body: &[u8], remote: &PublicKey) -> std::result::Result<Vec<u8>, HandshakeError> {
    match format {
        PacketFormat::Legacy => ecies::encrypt(remote, body, &[]),
        PacketFormat::Eip8 => {
            let mut rng = rand::thread_rng();
            let mut plain = body.to_vec();
            let mut padding = vec![0u8; rng.gen_range(MIN_PADDING..MAX_PADDING)];
            rng.fill_bytes(&mut padding);
            plain.extend_from_slice(&padding);

            let prefix = ((plain.len() + ecies::OVERHEAD) as u16).to_be_bytes();
            let mut packet = prefix.to_vec();
            packet.extend(ecies::encrypt(remote, &plain, &prefix)?);
            Ok(packet)
        }
    }
}

/// Read one handshake packet whose legacy size is `plain_size`, returning the packet bytes as
/// received, the decrypted body and the format it came in.
async fn read_packet<S>(
    stream: &mut S,
    keypair: &Keypair,
    plain_size: usize,
) -> Result<(Vec<u8>, Vec<u8>, PacketFormat)>
where
    S: AsyncRead + Unpin,
{
    let mut packet = vec![0u8; plain_size];
    stream.read_exact(&mut packet).await?;
    if let Ok(plain) = ecies::decrypt(keypair.secret_key(), &packet, &[]) {
        return Ok((packet, plain, PacketFormat::Legacy));
    }

    let size = u16::from_be_bytes([packet[0], packet[1]]) as usize;
    if size + EIP8_PREFIX_LENGTH < plain_size {
        return Err(HandshakeError::SizeUnderflow {
            size,
            min: plain_size - EIP8_PREFIX_LENGTH,
        }
        .into());
    }
    packet.resize(size + EIP8_PREFIX_LENGTH, 0);
    stream.read_exact(&mut packet[plain_size..]).await?;
    let plain = ecies::decrypt(
        keypair.secret_key(),
        &packet[EIP8_PREFIX_LENGTH..],
        &packet[..EIP8_PREFIX_LENGTH],
    )?;
    Ok((packet, plain, PacketFormat::Eip8))
}

struct Exchange<'a> {
    initiator: bool,
    ephemeral: &'a Keypair,
    remote_ephemeral: &'a PublicKey,
    local_nonce: &'a H256,
    remote_nonce: &'a H256,
    auth_packet: &'a [u8],
    ack_packet: &'a [u8],
    remote: PublicKey,
}

impl Exchange<'_> {
    fn secrets(&self) -> std::result::Result<Secrets, HandshakeError> {
        let ephemeral_key = ecdh_x(self.remote_ephemeral, self.ephemeral.secret_key())?;
        let (initiator_nonce, recipient_nonce) = if self.initiator {
            (self.local_nonce, self.remote_nonce)
        } else {
            (self.remote_nonce, self.local_nonce)
        };

        let nonce_hash = keccak256_concat(&[recipient_nonce, initiator_nonce]);
        let shared_secret = keccak256_concat(&[&ephemeral_key, &nonce_hash]);
        let aes = keccak256_concat(&[&ephemeral_key, &shared_secret]);
        let mac = keccak256_concat(&[&ephemeral_key, &aes]);

        let mut initiator_mac = Keccak256::new();
        initiator_mac.update(xor(&mac, recipient_nonce));
        initiator_mac.update(self.auth_packet);
        let mut recipient_mac = Keccak256::new();
        recipient_mac.update(xor(&mac, initiator_nonce));
        recipient_mac.update(self.ack_packet);

        let (egress_mac, ingress_mac) = if self.initiator {
            (initiator_mac, recipient_mac)
        } else {
            (recipient_mac, initiator_mac)
        };
        Ok(Secrets {
            aes,
            mac,
            egress_mac,
            ingress_mac,
            remote: self.remote,
        })
    }
}

/// Run the initiator side of the handshake against a node whose static key is `remote`.
pub async fn initiate<S>(stream: &mut S, identity: &Keypair, remote: &PublicKey) -> Result<Secrets>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ephemeral = Keypair::new();
    let nonce: H256 = random_bytes();
    let static_shared = ecdh_x(remote, identity.secret_key()).map_err(HandshakeError::from)?;
    let auth = AuthMessage {
        signature: ephemeral
            .sign_recoverable(&xor(&static_shared, &nonce))
            .map_err(HandshakeError::from)?,
        initiator: *identity.public_key(),
        nonce,
    };
    let auth_packet = seal(
        PacketFormat::Eip8,
        &auth.encode(PacketFormat::Eip8, ephemeral.public_key()),
        remote,
    )?;
    stream.write_all(&auth_packet).await?;
    stream.flush().await?;

    let (ack_packet, plain, format) = read_packet(stream, identity, ACK_V4_LENGTH).await?;
    let ack = AckMessage::decode(&plain, format)?;
    event!(Level::DEBUG, "received {:?} ack from {}", format, hex::encode(&node_id(remote)[..8]));

    Ok(Exchange {
        initiator: true,
        ephemeral: &ephemeral,
        remote_ephemeral: &ack.ephemeral,
        local_nonce: &nonce,
        remote_nonce: &ack.nonce,
        auth_packet: &auth_packet,
        ack_packet: &ack_packet,
        remote: *remote,
    }
    .secrets()?)
}

/// Run the recipient side of the handshake. The initiator's identity ends up in `Secrets::remote`.
pub async fn respond<S>(stream: &mut S, identity: &Keypair) -> Result<Secrets>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (auth_packet, plain, format) = read_packet(stream, identity, AUTH_V4_LENGTH).await?;
    let auth = AuthMessage::decode(&plain, format)?;

    let static_shared = ecdh_x(&auth.initiator, identity.secret_key()).map_err(HandshakeError::from)?;
    let remote_ephemeral =
        recover(&auth.signature, &xor(&static_shared, &auth.nonce)).map_err(HandshakeError::from)?;

    let ephemeral = Keypair::new();
    let nonce: H256 = random_bytes();
    let ack = AckMessage {
        ephemeral: *ephemeral.public_key(),
        nonce,
    };
    // answer in the format we were spoken to
    let ack_packet = seal(format, &ack.encode(format), &auth.initiator)?;
    stream.write_all(&ack_packet).await?;
    stream.flush().await?;
    event!(Level::DEBUG, "answered {:?} auth from {}", format, hex::encode(&node_id(&auth.initiator)[..8]));

    Ok(Exchange {
        initiator: false,
        ephemeral: &ephemeral,
        remote_ephemeral: &remote_ephemeral,
        local_nonce: &nonce,
        remote_nonce: &auth.nonce,
        auth_packet: &auth_packet,
        ack_packet: &ack_packet,
        remote: auth.initiator,
    }
    .secrets()?)
}

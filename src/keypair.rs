use crate::crypto::{context, node_id, random_secret_key, H256, NodeId};
use secp256k1::recovery::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey};
use std::fmt;

/// Length of a recoverable signature laid out as `r || s || v`.
pub const SIGNATURE_LENGTH: usize = 65;

/// An secp256k1 keypair used as a node identity or as a handshake ephemeral key
#[derive(Debug, Clone, PartialEq)]
pub struct Keypair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl Keypair {
    /// Create and return a keypair with a randomly generated private key.
    pub fn new() -> Keypair {
        let secret_key = random_secret_key();
        let public_key = PublicKey::from_secret_key(context(), &secret_key);
        Keypair {
            secret_key,
            public_key,
        }
    }

    /// Create and return a keypair with the given u8 slice as the private key
    pub fn from_secret_slice(slice: &[u8]) -> Result<Keypair, secp256k1::Error> {
        let secret_key = SecretKey::from_slice(slice)?;
        let public_key = PublicKey::from_secret_key(context(), &secret_key);

        Ok(Keypair {
            secret_key,
            public_key,
        })
    }

    /// Create and return a keypair with the given hex string as the private key
    pub fn from_secret_hex(secret_hex: &str) -> Result<Keypair, Box<dyn std::error::Error>> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret_hex, &mut bytes as &mut [u8])?;
        Ok(Keypair::from_secret_slice(&bytes)?)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// The 64 byte node id advertised in Hello messages.
    pub fn node_id(&self) -> NodeId {
        node_id(&self.public_key)
    }

    /// Sign a 32 byte digest and return `r || s || v` with `v` in {0, 1}
    pub fn sign_recoverable(&self, digest: &H256) -> Result<[u8; SIGNATURE_LENGTH], secp256k1::Error> {
        let message = Message::from_slice(digest)?;
        let signature = context().sign_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&compact);
        out[64] = recovery_id.to_i32() as u8;
        Ok(out)
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Keypair::new()
    }
}

/// Recover the public key that produced a `r || s || v` signature over `digest`.
pub fn recover(signature: &[u8], digest: &H256) -> Result<PublicKey, secp256k1::Error> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(secp256k1::Error::InvalidSignature);
    }
    let recovery_id = RecoveryId::from_i32(signature[64] as i32)?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let message = Message::from_slice(digest)?;
    context().recover(&message, &signature)
}

impl fmt::Display for Keypair {
    /// formats a Keypair as its node id
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.node_id()))
    }
}

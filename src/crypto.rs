use rand::RngCore;
use secp256k1::{All, PublicKey, Secp256k1, SecretKey, SECP256K1};
use sha3::{Digest, Keccak256};

pub type H256 = [u8; 32];
/// A node id is the uncompressed secp256k1 public key without its 0x04 prefix.
pub type NodeId = [u8; 64];

pub fn context() -> &'static Secp256k1<All> {
    &SECP256K1
}

pub fn keccak256(data: &[u8]) -> H256 {
    keccak256_concat(&[data])
}

pub fn keccak256_concat(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(hasher.finalize().as_slice());
    out
}

pub fn xor(a: &H256, b: &H256) -> H256 {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Raw ECDH agreement: the x coordinate of `secret_key * public_key`.
pub fn ecdh_x(public_key: &PublicKey, secret_key: &SecretKey) -> Result<H256, secp256k1::Error> {
    let mut point = *public_key;
    point.mul_assign(context(), &secret_key[..])?;
    let mut x = [0u8; 32];
    x.copy_from_slice(&point.serialize_uncompressed()[1..33]);
    Ok(x)
}

pub fn node_id(public_key: &PublicKey) -> NodeId {
    let mut id = [0u8; 64];
    id.copy_from_slice(&public_key.serialize_uncompressed()[1..]);
    id
}

pub fn public_key_from_node_id(id: &[u8]) -> Result<PublicKey, secp256k1::Error> {
    if id.len() != 64 {
        return Err(secp256k1::Error::InvalidPublicKey);
    }
    let mut bytes = [0u8; 65];
    bytes[0] = 0x04;
    bytes[1..].copy_from_slice(id);
    PublicKey::from_slice(&bytes)
}

pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

pub fn random_secret_key() -> SecretKey {
    loop {
        if let Ok(secret_key) = SecretKey::from_slice(&random_bytes::<32>()) {
            return secret_key;
        }
    }
}

//! ECIES over secp256k1 as used by the RLPx handshake: concat KDF with SHA-256,
//! AES-128-CTR and HMAC-SHA256.
//!
//! ```bytes
//! 0       0x04
//! 1..65   ephemeral public key R
//! 65..81  iv
//! 81..n   ciphertext
//! n..n+32 HMAC-SHA256(km, iv || ciphertext || shared_mac_data)
//! ```
use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use ctr::cipher::{NewCipher, StreamCipher};
use ring::{constant_time, digest, hmac};
use secp256k1::{PublicKey, SecretKey};

use crate::crypto::{context, ecdh_x, random_bytes, random_secret_key};
use crate::error::HandshakeError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const PUBLIC_KEY_LENGTH: usize = 65;
const IV_LENGTH: usize = 16;
const TAG_LENGTH: usize = 32;
const KEY_LENGTH: usize = 16;

/// Bytes added to a plaintext by `encrypt`.
pub const OVERHEAD: usize = PUBLIC_KEY_LENGTH + IV_LENGTH + TAG_LENGTH;

// NIST SP 800-56 concatenation KDF with an empty s1.
fn concat_kdf(z: &[u8], length: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(length + 32);
    let mut counter: u32 = 1;
    while key.len() < length {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(&counter.to_be_bytes());
        ctx.update(z);
        key.extend_from_slice(ctx.finish().as_ref());
        counter += 1;
    }
    key.truncate(length);
    key
}

fn derive_keys(shared: &[u8]) -> ([u8; KEY_LENGTH], hmac::Key) {
    let key = concat_kdf(shared, 2 * KEY_LENGTH);
    let mut encryption_key = [0u8; KEY_LENGTH];
    encryption_key.copy_from_slice(&key[..KEY_LENGTH]);
    let mac_key = digest::digest(&digest::SHA256, &key[KEY_LENGTH..]);
    (
        encryption_key,
        hmac::Key::new(hmac::HMAC_SHA256, mac_key.as_ref()),
    )
}

fn tag(key: &hmac::Key, iv_and_ciphertext: &[u8], shared_mac_data: &[u8]) -> hmac::Tag {
    let mut ctx = hmac::Context::with_key(key);
    ctx.update(iv_and_ciphertext);
    ctx.update(shared_mac_data);
    ctx.sign()
}

fn apply_ctr(key: &[u8; KEY_LENGTH], iv: &[u8], data: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    cipher.apply_keystream(data);
}

/// Encrypt `plain` to `remote`, authenticating `shared_mac_data` alongside it.
pub fn encrypt(
    remote: &PublicKey,
    plain: &[u8],
    shared_mac_data: &[u8],
) -> Result<Vec<u8>, HandshakeError> {
    let ephemeral = random_secret_key();
    let shared = ecdh_x(remote, &ephemeral)?;
    let (encryption_key, mac_key) = derive_keys(&shared);

    let iv = random_bytes::<IV_LENGTH>();
    let mut out = Vec::with_capacity(plain.len() + OVERHEAD);
    out.extend_from_slice(&PublicKey::from_secret_key(context(), &ephemeral).serialize_uncompressed());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plain);
    apply_ctr(&encryption_key, &iv, &mut out[PUBLIC_KEY_LENGTH + IV_LENGTH..]);

    let tag = tag(&mac_key, &out[PUBLIC_KEY_LENGTH..], shared_mac_data);
    out.extend_from_slice(tag.as_ref());
    Ok(out)
}

/// Decrypt a message produced by `encrypt` with the recipient's secret key.
pub fn decrypt(
    secret_key: &SecretKey,
    data: &[u8],
    shared_mac_data: &[u8],
) -> Result<Vec<u8>, HandshakeError> {
    if data.len() < OVERHEAD {
        return Err(HandshakeError::EciesTooShort(data.len()));
    }
    if data[0] != 0x04 {
        return Err(HandshakeError::EciesKeyPrefix(data[0]));
    }
    let ephemeral = PublicKey::from_slice(&data[..PUBLIC_KEY_LENGTH])?;
    let shared = ecdh_x(&ephemeral, secret_key)?;
    let (encryption_key, mac_key) = derive_keys(&shared);

    let message_end = data.len() - TAG_LENGTH;
    let expected = tag(&mac_key, &data[PUBLIC_KEY_LENGTH..message_end], shared_mac_data);
    constant_time::verify_slices_are_equal(expected.as_ref(), &data[message_end..])
        .map_err(|_| HandshakeError::EciesTag)?;

    let iv = &data[PUBLIC_KEY_LENGTH..PUBLIC_KEY_LENGTH + IV_LENGTH];
    let mut plain = data[PUBLIC_KEY_LENGTH + IV_LENGTH..message_end].to_vec();
    apply_ctr(&encryption_key, iv, &mut plain);
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::Keypair;

    #[test]
    fn concat_kdf_test() {
        assert_eq!(hex::encode(concat_kdf(b"input", 6)), "858b192fa2ed");
        assert_eq!(
            hex::encode(concat_kdf(b"input", 32)),
            "858b192fa2ed4395e2bf88dd8d5770d67dc284ee539f12da8bceaa45d06ebae0"
        );
        assert_eq!(concat_kdf(b"input", 48).len(), 48);
        assert_eq!(concat_kdf(b"input", 48)[..32], concat_kdf(b"input", 32)[..]);
    }

    // sealed to key B of the EIP-8 vectors with ephemeral key A and iv 00..0f
    #[test]
    fn decrypt_known_message_test() {
        let recipient =
            Keypair::from_secret_hex("b71c71a67e1177ad4e901695e1b4b9ee17ae16c6668d313eac2f96dbcda3f291")
                .unwrap();
        let sealed = hex::decode(
            "04654d1044b69c577a44e5f01a1209523adb4026e70c62d1c13a067acabc09d2667a49821a0ad4b634554d33\
             0a15a58fe61f8a8e0544b310c6de7b0c8da7528a8d000102030405060708090a0b0c0d0e0fb8afbbb1cb26\
             bba8a3bc5582ff0f889014a0131256fe142752d12d6ce5040ea5a87b633a3336da1486cd3cf67d853ad765\
             252800b327",
        )
        .unwrap();
        let opened = decrypt(recipient.secret_key(), &sealed, &[0x01, 0x9b]).unwrap();
        assert_eq!(opened, b"known answer plaintext");
        assert!(matches!(
            decrypt(recipient.secret_key(), &sealed, &[0x01, 0x9c]),
            Err(HandshakeError::EciesTag)
        ));
    }

    #[test]
    fn encrypt_decrypt_test() {
        let keypair = Keypair::new();
        let sealed = encrypt(keypair.public_key(), b"hello handshake", b"\x01\x02").unwrap();
        assert_eq!(sealed.len(), 15 + OVERHEAD);
        let opened = decrypt(keypair.secret_key(), &sealed, b"\x01\x02").unwrap();
        assert_eq!(opened, b"hello handshake");
    }

    #[test]
    fn decrypt_rejects_tampering_test() {
        let keypair = Keypair::new();
        let mut sealed = encrypt(keypair.public_key(), b"payload", &[]).unwrap();

        assert!(matches!(
            decrypt(keypair.secret_key(), &sealed, b"other"),
            Err(HandshakeError::EciesTag)
        ));

        let last = sealed.len() - 40;
        sealed[last] ^= 0xff;
        assert!(matches!(
            decrypt(keypair.secret_key(), &sealed, &[]),
            Err(HandshakeError::EciesTag)
        ));

        assert!(decrypt(Keypair::new().secret_key(), &sealed, &[]).is_err());
        assert!(matches!(
            decrypt(keypair.secret_key(), &sealed[..50], &[]),
            Err(HandshakeError::EciesTooShort(50))
        ));
    }
}

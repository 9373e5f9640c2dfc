use aes::cipher::generic_array::GenericArray;
use aes::{Aes256, BlockEncrypt, NewBlockCipher};
use bytes::{Buf, BytesMut};
use ctr::cipher::{NewCipher, StreamCipher};
use ring::constant_time;
use sha3::{Digest, Keccak256};

use crate::crypto::H256;
use crate::error::IntegrityError;
use crate::networking::handshake::Secrets;
use crate::rlp;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Largest frame size the 24-bit header field can carry.
pub const MAX_FRAME_SIZE: usize = 0xFF_FFFF;

const HEADER_LENGTH: usize = 16;
const MAC_LENGTH: usize = 16;
// rlp([0, 0]), the capability-id and context-id of a header
const HEADER_DATA: [u8; 3] = [0xc2, 0x80, 0x80];

type Result<T> = std::result::Result<T, IntegrityError>;

fn padded(size: usize) -> usize {
    (size + 15) / 16 * 16
}

/// The keyed Keccak256 MAC that chains over every frame of one direction.
struct HashMac {
    cipher: Aes256,
    hash: Keccak256,
}

impl HashMac {
    fn new(secret: &H256, hash: Keccak256) -> Self {
        HashMac {
            cipher: Aes256::new(GenericArray::from_slice(secret)),
            hash,
        }
    }

    fn sum(&self) -> [u8; MAC_LENGTH] {
        let mut sum = [0u8; MAC_LENGTH];
        sum.copy_from_slice(&self.hash.clone().finalize()[..MAC_LENGTH]);
        sum
    }

    // hash.update(aes(sum) ^ seed), then the new sum
    fn compute(&mut self, seed: &[u8]) -> [u8; MAC_LENGTH] {
        let mut block = GenericArray::clone_from_slice(&self.sum());
        self.cipher.encrypt_block(&mut block);
        for (byte, seed) in block.iter_mut().zip(seed) {
            *byte ^= seed;
        }
        self.hash.update(&block);
        self.sum()
    }

    fn compute_header(&mut self, header: &[u8]) -> [u8; MAC_LENGTH] {
        self.compute(header)
    }

    fn compute_frame(&mut self, frame: &[u8]) -> [u8; MAC_LENGTH] {
        self.hash.update(frame);
        let seed = self.sum();
        self.compute(&seed)
    }
}

///
/// Encrypts and authenticates frames in one direction and checks them in the other.
///
/// Reading is sans-IO: callers append whatever arrived from the socket to a `BytesMut` and call
/// `read_frame` until it yields a frame. Cipher and MAC state only move once a complete header or
/// a complete body is buffered, so dropping a read half way (a timeout) never desynchronizes the
/// stream.
///
pub struct FrameCodec {
    egress_aes: Aes256Ctr,
    ingress_aes: Aes256Ctr,
    egress_mac: HashMac,
    ingress_mac: HashMac,
    snappy: bool,
    // frame size from a header that was already authenticated
    pending_size: Option<usize>,
}

impl FrameCodec {
    pub fn new(secrets: Secrets) -> Self {
        let iv = [0u8; 16];
        let key = GenericArray::from_slice(&secrets.aes);
        FrameCodec {
            egress_aes: Aes256Ctr::new(key, GenericArray::from_slice(&iv)),
            ingress_aes: Aes256Ctr::new(key, GenericArray::from_slice(&iv)),
            egress_mac: HashMac::new(&secrets.mac, secrets.egress_mac),
            ingress_mac: HashMac::new(&secrets.mac, secrets.ingress_mac),
            snappy: false,
            pending_size: None,
        }
    }

    pub fn set_snappy(&mut self, enabled: bool) {
        self.snappy = enabled;
    }

    pub fn snappy(&self) -> bool {
        self.snappy
    }

    /// Build the bytes of one frame. Size limits are checked before any cipher state is touched.
    pub fn write_frame(&mut self, code: u64, payload: &[u8]) -> Result<Vec<u8>> {
        let compressed;
        let payload = if self.snappy {
            if payload.len() > MAX_FRAME_SIZE {
                return Err(IntegrityError::PlainTooLarge(payload.len()));
            }
            compressed = snap::raw::Encoder::new().compress_vec(payload)?;
            &compressed[..]
        } else {
            payload
        };
        let code = rlp::encode(&code);
        let frame_size = code.len() + payload.len();
        if frame_size > MAX_FRAME_SIZE {
            return Err(IntegrityError::FrameTooLarge(frame_size));
        }

        let mut out = Vec::with_capacity(HEADER_LENGTH + MAC_LENGTH * 2 + padded(frame_size));
        let mut header = [0u8; HEADER_LENGTH];
        header[..3].copy_from_slice(&(frame_size as u32).to_be_bytes()[1..]);
        header[3..6].copy_from_slice(&HEADER_DATA);
        self.egress_aes.apply_keystream(&mut header);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.egress_mac.compute_header(&header));

        let frame_start = out.len();
        out.extend_from_slice(&code);
        out.extend_from_slice(payload);
        out.resize(frame_start + padded(frame_size), 0);
        self.egress_aes.apply_keystream(&mut out[frame_start..]);
        let frame_mac = self.egress_mac.compute_frame(&out[frame_start..]);
        out.extend_from_slice(&frame_mac);
        Ok(out)
    }

    /// Take one frame off the front of `buffer`, or `None` until enough bytes arrived.
    pub fn read_frame(&mut self, buffer: &mut BytesMut) -> Result<Option<(u64, Vec<u8>)>> {
        let frame_size = match self.pending_size {
            Some(size) => size,
            None => {
                if buffer.len() < HEADER_LENGTH + MAC_LENGTH {
                    return Ok(None);
                }
                let mut header = [0u8; HEADER_LENGTH];
                header.copy_from_slice(&buffer[..HEADER_LENGTH]);
                let expected = self.ingress_mac.compute_header(&header);
                constant_time::verify_slices_are_equal(
                    &expected,
                    &buffer[HEADER_LENGTH..HEADER_LENGTH + MAC_LENGTH],
                )
                .map_err(|_| IntegrityError::HeaderMac)?;
                buffer.advance(HEADER_LENGTH + MAC_LENGTH);

                self.ingress_aes.apply_keystream(&mut header);
                let size = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
                self.pending_size = Some(size);
                size
            }
        };

        let body_length = padded(frame_size);
        if buffer.len() < body_length + MAC_LENGTH {
            return Ok(None);
        }
        let mut frame = buffer.split_to(body_length + MAC_LENGTH);
        let expected = self.ingress_mac.compute_frame(&frame[..body_length]);
        constant_time::verify_slices_are_equal(&expected, &frame[body_length..])
            .map_err(|_| IntegrityError::FrameMac)?;
        self.pending_size = None;
        self.ingress_aes.apply_keystream(&mut frame[..body_length]);

        let (code, payload) =
            rlp::split_first(&frame[..frame_size]).map_err(IntegrityError::MessageCode)?;
        let code: u64 = code.as_val().map_err(IntegrityError::MessageCode)?;
        if !self.snappy {
            return Ok(Some((code, payload.to_vec())));
        }
        let length = snap::raw::decompress_len(payload)?;
        if length > MAX_FRAME_SIZE {
            return Err(IntegrityError::PlainTooLarge(length));
        }
        let payload = snap::raw::Decoder::new().decompress_vec(payload)?;
        Ok(Some((code, payload)))
    }
}

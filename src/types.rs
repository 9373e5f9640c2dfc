use bigint::U256;
use std::cmp::Ordering;
use std::fmt;

use crate::error::DecodeError;
use crate::rlp::{Decodable, DecodeResult, Encodable, Rlp, RlpStream};

/// An arbitrary precision unsigned integer kept as canonical big-endian bytes.
///
/// Block numbers, difficulties and total difficulty travel as `Quantity` so that oversized
/// values can be both sent and received; arithmetic on fixture data happens in `U256`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Quantity(Vec<u8>);

impl Quantity {
    pub fn zero() -> Self {
        Quantity(vec![])
    }

    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        Quantity(bytes[skip..].to_vec())
    }

    pub fn as_be_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of significant bits.
    pub fn bits(&self) -> usize {
        match self.0.first() {
            Some(first) => (self.0.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
            None => 0,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        if self.0.len() > 8 {
            return None;
        }
        Some(self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn to_u256(&self) -> Option<U256> {
        match self.0.len() {
            0 => Some(U256::zero()),
            1..=32 => Some(U256::from_big_endian(&self.0)),
            _ => None,
        }
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Quantity::from_be_bytes(&value.to_be_bytes())
    }
}

impl From<U256> for Quantity {
    fn from(value: U256) -> Self {
        let mut bytes = [0u8; 32];
        value.to_big_endian(&mut bytes);
        Quantity::from_be_bytes(&bytes)
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 16 {
            let value = self.0.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128);
            write!(f, "{}", value)
        } else {
            // adversarial values run to megabytes
            write!(f, "0x{}..({} bits)", hex::encode(&self.0[..8]), self.bits())
        }
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Encodable for Quantity {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_bytes(&self.0);
    }
}

impl Decodable for Quantity {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let data = rlp.data()?;
        if data.first() == Some(&0) {
            return Err(DecodeError::LeadingZero);
        }
        Ok(Quantity(data.to_vec()))
    }
}

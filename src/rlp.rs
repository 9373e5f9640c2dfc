//! Recursive Length Prefix encoding.
//!
//! `RlpStream` builds encodings, `Rlp` is a zero-copy view over exactly one encoded item.
//! Decoding is strict: sizes and integers must be canonical.
use std::convert::TryFrom;
use std::fmt;

use crate::error::DecodeError;

const STRING_OFFSET: u8 = 0x80;
const LIST_OFFSET: u8 = 0xc0;

pub type DecodeResult<T> = Result<T, DecodeError>;

pub trait Encodable {
    fn rlp_append(&self, stream: &mut RlpStream);
}

pub trait Decodable: Sized {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self>;
}

fn write_header(out: &mut Vec<u8>, offset: u8, length: usize) {
    if length < 56 {
        out.push(offset + length as u8);
    } else {
        let bytes = (length as u64).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(offset + 55 + (8 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Incremental RLP encoder. Lists are opened with `begin_list` and closed with `end_list`;
/// `out` closes any list still open.
#[derive(Debug, Default)]
pub struct RlpStream {
    out: Vec<u8>,
    open_lists: Vec<usize>,
}

impl RlpStream {
    pub fn new() -> Self {
        RlpStream::default()
    }

    pub fn new_list() -> Self {
        let mut stream = RlpStream::new();
        stream.begin_list();
        stream
    }

    pub fn begin_list(&mut self) -> &mut Self {
        self.open_lists.push(self.out.len());
        self
    }

    pub fn end_list(&mut self) -> &mut Self {
        if let Some(start) = self.open_lists.pop() {
            let mut header = Vec::with_capacity(9);
            write_header(&mut header, LIST_OFFSET, self.out.len() - start);
            self.out.splice(start..start, header);
        }
        self
    }

    pub fn append<E: Encodable + ?Sized>(&mut self, value: &E) -> &mut Self {
        value.rlp_append(self);
        self
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        if bytes.len() == 1 && bytes[0] < STRING_OFFSET {
            self.out.push(bytes[0]);
        } else {
            write_header(&mut self.out, STRING_OFFSET, bytes.len());
            self.out.extend_from_slice(bytes);
        }
        self
    }

    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        self.append_bytes(&bytes[skip..])
    }

    pub fn append_list<E: Encodable>(&mut self, items: &[E]) -> &mut Self {
        self.begin_list();
        for item in items {
            item.rlp_append(self);
        }
        self.end_list()
    }

    /// Append an already encoded item verbatim.
    pub fn append_raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.out.extend_from_slice(encoded);
        self
    }

    pub fn out(mut self) -> Vec<u8> {
        while !self.open_lists.is_empty() {
            self.end_list();
        }
        self.out
    }
}

pub fn encode<E: Encodable + ?Sized>(value: &E) -> Vec<u8> {
    let mut stream = RlpStream::new();
    stream.append(value);
    stream.out()
}

pub fn encode_list<E: Encodable>(items: &[E]) -> Vec<u8> {
    let mut stream = RlpStream::new();
    stream.append_list(items);
    stream.out()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PayloadInfo {
    header_len: usize,
    value_len: usize,
    is_list: bool,
}

impl PayloadInfo {
    fn total(&self) -> usize {
        self.header_len + self.value_len
    }
}

fn long_length(bytes: &[u8], length_of_length: usize) -> DecodeResult<usize> {
    let raw = bytes
        .get(1..1 + length_of_length)
        .ok_or(DecodeError::InputTooShort)?;
    if raw[0] == 0 {
        return Err(DecodeError::NonCanonicalSize);
    }
    let length = raw.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    if length < 56 {
        return Err(DecodeError::NonCanonicalSize);
    }
    usize::try_from(length).map_err(|_| DecodeError::IntegerOverflow(usize::BITS))
}

fn payload_info(bytes: &[u8]) -> DecodeResult<PayloadInfo> {
    let first = *bytes.first().ok_or(DecodeError::InputTooShort)?;
    let info = match first {
        0x00..=0x7f => PayloadInfo {
            header_len: 0,
            value_len: 1,
            is_list: false,
        },
        0x80..=0xb7 => {
            let value_len = (first - STRING_OFFSET) as usize;
            if value_len == 1 && bytes.get(1).map_or(false, |b| *b < STRING_OFFSET) {
                return Err(DecodeError::NonCanonicalSize);
            }
            PayloadInfo {
                header_len: 1,
                value_len,
                is_list: false,
            }
        }
        0xb8..=0xbf => {
            let length_of_length = (first - 0xb7) as usize;
            PayloadInfo {
                header_len: 1 + length_of_length,
                value_len: long_length(bytes, length_of_length)?,
                is_list: false,
            }
        }
        0xc0..=0xf7 => PayloadInfo {
            header_len: 1,
            value_len: (first - LIST_OFFSET) as usize,
            is_list: true,
        },
        0xf8..=0xff => {
            let length_of_length = (first - 0xf7) as usize;
            PayloadInfo {
                header_len: 1 + length_of_length,
                value_len: long_length(bytes, length_of_length)?,
                is_list: true,
            }
        }
    };
    match info.header_len.checked_add(info.value_len) {
        Some(total) if total <= bytes.len() => Ok(info),
        _ => Err(DecodeError::InputTooShort),
    }
}

/// A view over one encoded item.
#[derive(Clone, Copy)]
pub struct Rlp<'a> {
    bytes: &'a [u8],
}

impl<'a> Rlp<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Rlp { bytes }
    }

    pub fn as_raw(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn is_list(&self) -> bool {
        matches!(self.bytes.first(), Some(b) if *b >= LIST_OFFSET)
    }

    fn payload(&self) -> DecodeResult<(PayloadInfo, &'a [u8])> {
        let info = payload_info(self.bytes)?;
        Ok((info, &self.bytes[info.header_len..info.total()]))
    }

    /// The content of a string item.
    pub fn data(&self) -> DecodeResult<&'a [u8]> {
        match self.payload()? {
            (info, _) if info.is_list => Err(DecodeError::ExpectedString),
            (_, data) => Ok(data),
        }
    }

    pub fn iter(&self) -> DecodeResult<RlpIter<'a>> {
        match self.payload()? {
            (info, rest) if info.is_list => Ok(RlpIter { rest }),
            _ => Err(DecodeError::ExpectedList),
        }
    }

    pub fn items(&self) -> DecodeResult<Vec<Rlp<'a>>> {
        self.iter()?.collect()
    }

    /// List items, failing unless at least `expected` are present.
    pub fn items_at_least(&self, expected: usize) -> DecodeResult<Vec<Rlp<'a>>> {
        let items = self.items()?;
        if items.len() < expected {
            return Err(DecodeError::TooFewItems {
                expected,
                got: items.len(),
            });
        }
        Ok(items)
    }

    pub fn item_count(&self) -> DecodeResult<usize> {
        self.iter()?.try_fold(0, |count, item| item.map(|_| count + 1))
    }

    pub fn as_val<T: Decodable>(&self) -> DecodeResult<T> {
        T::decode(self)
    }

    pub fn as_list<T: Decodable>(&self) -> DecodeResult<Vec<T>> {
        self.iter()?
            .map(|item| item.and_then(|rlp| T::decode(&rlp)))
            .collect()
    }
}

impl fmt::Debug for Rlp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rlp({} bytes)", self.bytes.len())
    }
}

pub struct RlpIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for RlpIter<'a> {
    type Item = DecodeResult<Rlp<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match payload_info(self.rest) {
            Ok(info) => {
                let (item, rest) = self.rest.split_at(info.total());
                self.rest = rest;
                Some(Ok(Rlp::new(item)))
            }
            Err(err) => {
                self.rest = &[];
                Some(Err(err))
            }
        }
    }
}

/// Split the first complete item off `bytes`, returning it and whatever follows.
pub fn split_first(bytes: &[u8]) -> DecodeResult<(Rlp<'_>, &[u8])> {
    let info = payload_info(bytes)?;
    let (item, rest) = bytes.split_at(info.total());
    Ok((Rlp::new(item), rest))
}

/// Decode exactly one item; trailing bytes are an error.
pub fn decode<T: Decodable>(bytes: &[u8]) -> DecodeResult<T> {
    let (item, rest) = split_first(bytes)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    T::decode(&item)
}

fn decode_uint(rlp: &Rlp<'_>, bits: u32) -> DecodeResult<u64> {
    let data = rlp.data()?;
    if data.len() * 8 > bits as usize {
        return Err(DecodeError::IntegerOverflow(bits));
    }
    if data.first() == Some(&0) {
        return Err(DecodeError::LeadingZero);
    }
    Ok(data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

impl Encodable for u64 {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_u64(*self);
    }
}

impl Decodable for u64 {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        decode_uint(rlp, 64)
    }
}

impl Encodable for u32 {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_u64(*self as u64);
    }
}

impl Decodable for u32 {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        decode_uint(rlp, 32).map(|value| value as u32)
    }
}

impl Encodable for bool {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_u64(*self as u64);
    }
}

impl Decodable for bool {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        match rlp.data()? {
            [] => Ok(false),
            [1] => Ok(true),
            _ => Err(DecodeError::InvalidBool),
        }
    }
}

impl<const N: usize> Encodable for [u8; N] {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_bytes(self);
    }
}

impl<const N: usize> Decodable for [u8; N] {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        let data = rlp.data()?;
        if data.len() != N {
            return Err(DecodeError::WrongLength {
                expected: N,
                got: data.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(data);
        Ok(out)
    }
}

impl Encodable for str {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_bytes(self.as_bytes());
    }
}

impl Encodable for String {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_bytes(self.as_bytes());
    }
}

impl Decodable for String {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        Ok(String::from_utf8_lossy(rlp.data()?).into_owned())
    }
}

/// An already encoded item carried through without interpretation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawValue(pub Vec<u8>);

impl Encodable for RawValue {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.append_raw(&self.0);
    }
}

impl Decodable for RawValue {
    fn decode(rlp: &Rlp<'_>) -> DecodeResult<Self> {
        Ok(RawValue(rlp.as_raw().to_vec()))
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({} bytes)", self.0.len())
    }
}

//! Order-preserving key codec
//!
//! Keys are encoded into a [`BitSequence`] whose lexicographic bit order is
//! the natural order of the keys. Every index comparison works on encoded
//! keys, so the tree never needs to know about key types.
//!
//! ## Layout
//!
//! Each value starts with a 4-bit type tag. Tag order is type precedence:
//!
//! | Tag | Type | Payload |
//! |-----|------|---------|
//! | 0 | end of array | none |
//! | 1 | null | none |
//! | 2 | false | none |
//! | 3 | true | none |
//! | 4 | number | sign(1) exponent(11) mantissa(20 + 32) |
//! | 5 | string | UTF-8 bytes, then a zero byte |
//! | 6 | id8 | 16 nibbles |
//! | 7 | id14 | 28 nibbles |
//! | 15 | array | encoded elements, then tag 0 |
//!
//! Numbers store the sign inverted (1 = non-negative) so negatives sort
//! first; negative numbers also complement exponent and mantissa so that a
//! larger magnitude gives a smaller pattern. `-0` is written as `0` and every
//! NaN is written as one canonical quiet NaN, which sorts above `+Infinity`.
//! Subnormals keep exponent 0 with `mantissa = |x| / 2^-1074`.

use crate::error::{Error, Result};
use crate::key::Key;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Type tags
pub mod tag {
    /// End of an array (the reserved "undefined" code)
    pub const END: u32 = 0;
    /// null
    pub const NULL: u32 = 1;
    /// false
    pub const FALSE: u32 = 2;
    /// true
    pub const TRUE: u32 = 3;
    /// number
    pub const NUMBER: u32 = 4;
    /// string
    pub const STRING: u32 = 5;
    /// 8-byte id
    pub const ID8: u32 = 6;
    /// 14-byte id
    pub const ID14: u32 = 7;
    /// array
    pub const ARRAY: u32 = 15;
}

const TAG_BITS: u32 = 4;
const MANTISSA_MASK: u64 = (1 << 52) - 1;
const EXPONENT_MASK: u32 = 0x7FF;
const CANONICAL_NAN_MANTISSA: u64 = 1 << 51;

// ============================================================================
// BitSequence
// ============================================================================

/// Growable bit string backed by 32-bit words
///
/// Bits are written most-significant first. Writes append at the end; reads
/// consume from an independent read cursor. Bits past `len` are always zero,
/// which lets comparison work word by word.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BitSequence {
    words: Vec<u32>,
    len: usize,
    #[serde(skip)]
    cursor: usize,
}

impl BitSequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits written
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no bits have been written
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing words (trailing bits of the last word are zero)
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of bits left to read
    pub fn remaining(&self) -> usize {
        self.len - self.cursor
    }

    /// Move the read cursor back to the first bit
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Append the low `bits` bits of `value` (1..=32)
    pub fn write(&mut self, value: u32, bits: u32) {
        debug_assert!((1..=32).contains(&bits), "chunk width out of range: {}", bits);
        let value = if bits == 32 {
            value
        } else {
            value & ((1u32 << bits) - 1)
        };

        let offset = (self.len % 32) as u32;
        if offset == 0 {
            self.words.push(0);
        }
        let last = self.words.len() - 1;
        let free = 32 - offset;
        if bits <= free {
            self.words[last] |= value << (free - bits);
        } else {
            let spill = bits - free;
            self.words[last] |= value >> spill;
            self.words.push(value << (32 - spill));
        }
        self.len += bits as usize;
    }

    /// Read the next `bits` bits (1..=32) at the read cursor
    pub fn read(&mut self, bits: u32) -> Result<u32> {
        debug_assert!((1..=32).contains(&bits), "chunk width out of range: {}", bits);
        if self.cursor + bits as usize > self.len {
            return Err(Error::Corrupted(format!(
                "key ended after {} bits, wanted {} more",
                self.cursor, bits
            )));
        }

        let index = self.cursor / 32;
        let offset = (self.cursor % 32) as u32;
        let available = 32 - offset;
        let word = self.words[index] << offset;
        let value = if bits <= available {
            word >> (32 - bits)
        } else {
            let spill = bits - available;
            let high = word >> offset;
            let low = self.words[index + 1] >> (32 - spill);
            (high << spill) | low
        };
        self.cursor += bits as usize;
        Ok(value)
    }

    /// Bit at `position` (0 = first written)
    pub fn bit(&self, position: usize) -> bool {
        debug_assert!(position < self.len);
        let word = self.words[position / 32];
        (word >> (31 - (position % 32) as u32)) & 1 == 1
    }

    /// Drop the last `bits` bits
    pub fn truncate(&mut self, bits: usize) {
        let len = self.len.saturating_sub(bits);
        self.words.truncate((len + 31) / 32);
        let tail = (len % 32) as u32;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= !(u32::MAX >> tail);
            }
        }
        self.len = len;
        self.cursor = self.cursor.min(len);
    }

    /// Set the last written bit to one
    fn set_last_bit(&mut self) {
        if self.len == 0 {
            return;
        }
        let position = self.len - 1;
        self.words[position / 32] |= 1 << (31 - (position % 32) as u32);
    }
}

impl PartialEq for BitSequence {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.words == other.words
    }
}

impl Eq for BitSequence {}

impl std::hash::Hash for BitSequence {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        self.words.hash(state);
    }
}

impl Ord for BitSequence {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for BitSequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for BitSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitSequence({} bits:", self.len)?;
        for word in &self.words {
            write!(f, " {:08x}", word)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Encode / decode / compare
// ============================================================================

/// Compare two encoded keys lexicographically by bit
pub fn compare(a: &BitSequence, b: &BitSequence) -> Ordering {
    for (x, y) in a.words.iter().zip(&b.words) {
        match x.cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len.cmp(&b.len)
}

/// Encode a key
pub fn encode(key: &Key) -> Result<BitSequence> {
    let mut out = BitSequence::new();
    encode_into(key, &mut out)?;
    Ok(out)
}

/// Decode an encoded key
///
/// Fails with `Corrupted` on an unknown tag, a truncated payload, invalid
/// UTF-8, or trailing bits.
pub fn decode(bits: &BitSequence) -> Result<Key> {
    let mut reader = bits.clone();
    reader.rewind();
    let first = reader.read(TAG_BITS)?;
    if first == tag::END {
        return Err(Error::Corrupted(
            "end-of-array tag outside of an array".to_string(),
        ));
    }
    let key = decode_tagged(&mut reader, first)?;
    if reader.remaining() != 0 {
        return Err(Error::Corrupted(format!(
            "{} trailing bits after key",
            reader.remaining()
        )));
    }
    Ok(key)
}

/// Smallest bit string greater than every extension of `prefix`
///
/// Strips trailing one bits and sets the last remaining bit. Returns `None`
/// when `prefix` is all ones (no upper bound exists).
pub fn prefix_upper_bound(prefix: &BitSequence) -> Option<BitSequence> {
    let mut bound = prefix.clone();
    while !bound.is_empty() && bound.bit(bound.len() - 1) {
        bound.truncate(1);
    }
    if bound.is_empty() {
        return None;
    }
    bound.set_last_bit();
    Some(bound)
}

/// Bounds matching every key that starts with `prefix`
///
/// A string prefix matches string keys starting with it; an array prefix
/// matches array keys whose leading elements equal it. The lower bound is
/// inclusive, the upper bound exclusive (`None` = unbounded).
pub fn prefix_bounds(prefix: &Key) -> Result<(BitSequence, Option<BitSequence>)> {
    let terminator = match prefix {
        Key::String(_) => 8,
        Key::Array(_) => TAG_BITS as usize,
        other => {
            return Err(Error::InvalidQuery(format!(
                "$like needs a string or array prefix, got {}",
                other.type_name()
            )))
        }
    };
    let mut lower = encode(prefix)?;
    lower.truncate(terminator);
    let upper = prefix_upper_bound(&lower);
    Ok((lower, upper))
}

/// Sort key of a number: the 64-bit pattern the codec writes for it
pub fn number_sort_bits(x: f64) -> u64 {
    let (sign, exponent, mantissa) = number_fields(x);
    (sign as u64) << 63 | (exponent as u64) << 52 | mantissa
}

fn number_fields(x: f64) -> (u32, u32, u64) {
    if x == 0.0 {
        return (1, 0, 0);
    }
    if x.is_nan() {
        return (1, EXPONENT_MASK, CANONICAL_NAN_MANTISSA);
    }
    let bits = x.to_bits();
    let exponent = ((bits >> 52) as u32) & EXPONENT_MASK;
    let mantissa = bits & MANTISSA_MASK;
    if x.is_sign_negative() {
        (0, !exponent & EXPONENT_MASK, !mantissa & MANTISSA_MASK)
    } else {
        (1, exponent, mantissa)
    }
}

fn write_number(x: f64, out: &mut BitSequence) {
    let (sign, exponent, mantissa) = number_fields(x);
    out.write(sign, 1);
    out.write(exponent, 11);
    out.write((mantissa >> 32) as u32, 20);
    out.write(mantissa as u32, 32);
}

fn read_number(bits: &mut BitSequence) -> Result<f64> {
    let sign = bits.read(1)?;
    let mut exponent = bits.read(11)?;
    let high = bits.read(20)? as u64;
    let low = bits.read(32)? as u64;
    let mut mantissa = high << 32 | low;
    let negative = sign == 0;
    if negative {
        exponent = !exponent & EXPONENT_MASK;
        mantissa = !mantissa & MANTISSA_MASK;
    }
    let raw = (negative as u64) << 63 | (exponent as u64) << 52 | mantissa;
    Ok(f64::from_bits(raw))
}

fn write_nibbles(bytes: &[u8], out: &mut BitSequence) {
    for byte in bytes {
        out.write((*byte >> 4) as u32, 4);
        out.write((*byte & 0x0F) as u32, 4);
    }
}

fn read_nibbles(bits: &mut BitSequence, out: &mut [u8]) -> Result<()> {
    for byte in out.iter_mut() {
        let hi = bits.read(4)?;
        let lo = bits.read(4)?;
        *byte = (hi << 4 | lo) as u8;
    }
    Ok(())
}

fn encode_into(key: &Key, out: &mut BitSequence) -> Result<()> {
    match key {
        Key::Null => out.write(tag::NULL, TAG_BITS),
        Key::Bool(false) => out.write(tag::FALSE, TAG_BITS),
        Key::Bool(true) => out.write(tag::TRUE, TAG_BITS),
        Key::Number(x) => {
            out.write(tag::NUMBER, TAG_BITS);
            write_number(*x, out);
        }
        Key::String(s) => {
            if s.contains('\0') {
                return Err(Error::InvalidKey(
                    "string keys must not contain U+0000".to_string(),
                ));
            }
            out.write(tag::STRING, TAG_BITS);
            for byte in s.bytes() {
                out.write(byte as u32, 8);
            }
            out.write(0, 8);
        }
        Key::Id8(bytes) => {
            out.write(tag::ID8, TAG_BITS);
            write_nibbles(bytes, out);
        }
        Key::Id14(bytes) => {
            out.write(tag::ID14, TAG_BITS);
            write_nibbles(bytes, out);
        }
        Key::Array(items) => {
            out.write(tag::ARRAY, TAG_BITS);
            for item in items {
                encode_into(item, out)?;
            }
            out.write(tag::END, TAG_BITS);
        }
    }
    Ok(())
}

fn decode_tagged(bits: &mut BitSequence, type_tag: u32) -> Result<Key> {
    match type_tag {
        tag::NULL => Ok(Key::Null),
        tag::FALSE => Ok(Key::Bool(false)),
        tag::TRUE => Ok(Key::Bool(true)),
        tag::NUMBER => Ok(Key::Number(read_number(bits)?)),
        tag::STRING => {
            let mut bytes = Vec::new();
            loop {
                let byte = bits.read(8)? as u8;
                if byte == 0 {
                    break;
                }
                bytes.push(byte);
            }
            String::from_utf8(bytes)
                .map(Key::String)
                .map_err(|e| Error::Corrupted(format!("string key is not UTF-8: {}", e)))
        }
        tag::ID8 => {
            let mut out = [0u8; 8];
            read_nibbles(bits, &mut out)?;
            Ok(Key::Id8(out))
        }
        tag::ID14 => {
            let mut out = [0u8; 14];
            read_nibbles(bits, &mut out)?;
            Ok(Key::Id14(out))
        }
        tag::ARRAY => {
            let mut items = Vec::new();
            loop {
                let next = bits.read(TAG_BITS)?;
                if next == tag::END {
                    break;
                }
                items.push(decode_tagged(bits, next)?);
            }
            Ok(Key::Array(items))
        }
        other => Err(Error::Corrupted(format!("unknown key type tag {}", other))),
    }
}

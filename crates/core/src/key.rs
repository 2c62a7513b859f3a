//! Index keys
//!
//! [`Key`] is the closed set of values that can be stored as an index key.
//! Keys are totally ordered; the order is the one the codec preserves
//! byte-wise (see [`crate::codec`]):
//!
//! ```text
//! null < false < true < number < string < id8 < id14 < array
//! ```
//!
//! Numbers follow IEEE-754 order with `-0 == 0` and a single NaN that sorts
//! above `+Infinity`. Strings compare by UTF-8 bytes. Arrays compare
//! lexicographically, a proper prefix sorting first.

use crate::codec::number_sort_bits;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Index key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Key {
    /// Null key (sorts first)
    Null,
    /// Boolean key, `false < true`
    Bool(bool),
    /// 64-bit float key
    Number(f64),
    /// UTF-8 string key; must not contain U+0000
    String(String),
    /// 8-byte identifier
    Id8([u8; 8]),
    /// 14-byte identifier
    Id14([u8; 14]),
    /// Array of keys
    Array(Vec<Key>),
}

impl Key {
    /// Returns the type name as a string (for error messages)
    pub fn type_name(&self) -> &'static str {
        match self {
            Key::Null => "Null",
            Key::Bool(_) => "Bool",
            Key::Number(_) => "Number",
            Key::String(_) => "String",
            Key::Id8(_) => "Id8",
            Key::Id14(_) => "Id14",
            Key::Array(_) => "Array",
        }
    }

    /// Build an array key
    pub fn array<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<Key>,
    {
        Key::Array(items.into_iter().map(Into::into).collect())
    }

    /// Parse a fixed-length id from 16 or 28 hex digits
    pub fn id_from_hex(hex: &str) -> Result<Self> {
        fn nibble(c: u8) -> Option<u8> {
            match c {
                b'0'..=b'9' => Some(c - b'0'),
                b'a'..=b'f' => Some(c - b'a' + 10),
                b'A'..=b'F' => Some(c - b'A' + 10),
                _ => None,
            }
        }

        fn fill(digits: &[u8], out: &mut [u8]) -> Option<()> {
            for (byte, pair) in out.iter_mut().zip(digits.chunks(2)) {
                *byte = nibble(pair[0])? << 4 | nibble(pair[1])?;
            }
            Some(())
        }

        let digits = hex.as_bytes();
        let invalid = || Error::InvalidKey(format!("invalid hex id: {}", hex));
        match digits.len() {
            16 => {
                let mut out = [0u8; 8];
                fill(digits, &mut out).ok_or_else(invalid)?;
                Ok(Key::Id8(out))
            }
            28 => {
                let mut out = [0u8; 14];
                fill(digits, &mut out).ok_or_else(invalid)?;
                Ok(Key::Id14(out))
            }
            n => Err(Error::InvalidKey(format!(
                "id must be 16 or 28 hex digits, got {}",
                n
            ))),
        }
    }

    /// Hex rendering of an id key
    pub fn id_hex(&self) -> Option<String> {
        let bytes: &[u8] = match self {
            Key::Id8(b) => b,
            Key::Id14(b) => b,
            _ => return None,
        };
        Some(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Reject keys the codec cannot represent unambiguously
    pub fn validate(&self) -> Result<()> {
        match self {
            Key::String(s) if s.contains('\0') => Err(Error::InvalidKey(
                "string keys must not contain U+0000".to_string(),
            )),
            Key::Array(items) => items.iter().try_for_each(Key::validate),
            _ => Ok(()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Null => 0,
            Key::Bool(false) => 1,
            Key::Bool(true) => 2,
            Key::Number(_) => 3,
            Key::String(_) => 4,
            Key::Id8(_) => 5,
            Key::Id14(_) => 6,
            Key::Array(_) => 7,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => number_sort_bits(*a).cmp(&number_sort_bits(*b)),
            (Key::String(a), Key::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Key::Id8(a), Key::Id8(b)) => a.cmp(b),
            (Key::Id14(a), Key::Id14(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Null => write!(f, "null"),
            Key::Bool(b) => write!(f, "{}", b),
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Id8(_) | Key::Id14(_) => {
                write!(f, "#{}", self.id_hex().unwrap_or_default())
            }
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        Key::Number(n)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(n as f64)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

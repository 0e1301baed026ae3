//! Fixed-size ledger values.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing 0x prefix in '{0}'")]
    MissingPrefix(String),

    #[error("expected {expected} hex digits, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    Hex(String),

    #[error("invalid quantity '{0}'")]
    Quantity(String),
}

fn parse_prefixed<const N: usize>(text: &str) -> Result<[u8; N], ParseError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| ParseError::MissingPrefix(text.to_string()))?;
    if digits.len() != N * 2 {
        return Err(ParseError::Length {
            expected: N * 2,
            actual: digits.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out).map_err(|e| ParseError::Hex(e.to_string()))?;
    Ok(out)
}

/// Decode `0x`-prefixed hex of any length (`0x` alone is empty).
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, ParseError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| ParseError::MissingPrefix(text.to_string()))?;
    hex::decode(digits).map_err(|e| ParseError::Hex(e.to_string()))
}

pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a JSON-RPC quantity such as `0x1b4`.
pub fn parse_quantity(text: &str) -> Result<u64, ParseError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| ParseError::MissingPrefix(text.to_string()))?;
    if digits.is_empty() {
        return Err(ParseError::Quantity(text.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| ParseError::Quantity(text.to_string()))
}

macro_rules! hex_value {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                parse_prefixed::<$len>(text).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_value!(
    /// 20-byte account or contract address. Comparison is on bytes, so the
    /// hex case of the source text never matters.
    Address,
    20
);

hex_value!(
    /// Transaction hash.
    TxHash,
    32
);

hex_value!(
    /// Raw 32-byte word: log topics and `bytes32` values.
    H256,
    32
);

/// Unsigned 256-bit integer, big-endian.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uint256([u8; 32]);

impl Uint256 {
    pub const ZERO: Uint256 = Uint256([0; 32]);

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The value when it fits into `u64`.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(low))
    }

    fn to_decimal(self) -> String {
        let mut digits = Vec::new();
        let mut value = self.0;
        while value.iter().any(|b| *b != 0) {
            let mut remainder = 0u32;
            for byte in value.iter_mut() {
                let acc = (remainder << 8) | u32::from(*byte);
                *byte = (acc / 10) as u8;
                remainder = acc % 10;
            }
            digits.push(b'0' + remainder as u8);
        }
        if digits.is_empty() {
            return "0".to_string();
        }
        digits.reverse();
        String::from_utf8_lossy(&digits).into_owned()
    }
}

impl From<u64> for Uint256 {
    fn from(value: u64) -> Self {
        Self::from(u128::from(value))
    }
}

impl From<u128> for Uint256 {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl fmt::Debug for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uint256({})", self)
    }
}

impl Serialize for Uint256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Signed 256-bit integer, two's complement, big-endian.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Int256([u8; 32]);

impl Int256 {
    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    /// Absolute value. `|MIN|` still fits since the result is unsigned.
    pub fn unsigned_abs(&self) -> Uint256 {
        if !self.is_negative() {
            return Uint256(self.0);
        }
        let mut magnitude = self.0.map(|b| !b);
        for byte in magnitude.iter_mut().rev() {
            let (sum, carry) = byte.overflowing_add(1);
            *byte = sum;
            if !carry {
                break;
            }
        }
        Uint256(magnitude)
    }
}

impl From<i64> for Int256 {
    fn from(value: i64) -> Self {
        Self::from(i128::from(value))
    }
}

impl From<i128> for Int256 {
    fn from(value: i128) -> Self {
        let fill = if value < 0 { 0xff } else { 0 };
        let mut bytes = [fill; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Int256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-{}", self.unsigned_abs())
        } else {
            write!(f, "{}", self.unsigned_abs())
        }
    }
}

impl fmt::Debug for Int256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Int256({})", self)
    }
}

impl Serialize for Int256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! Size literals, as they appear in partition specs. A literal is a decimal
//! number with an optional single-character suffix:
//!
//! * none: bytes
//! * `k`, `m`, `g`: KiB, MiB, GiB
//! * `s`: sectors
//!
//! Suffixes are case-insensitive. All conversions are integer operations and
//! division truncates.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Sector size used by the `s` suffix when converting to [`Unit::Sector`].
const LEGACY_SECTOR_SIZE: u64 = 512;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Unknown size {0:?}")]
    InvalidLiteral(String),
    #[error("Unknown unit {0:?}")]
    InvalidUnit(String),
    #[error("Size {0:?} is too large")]
    Overflow(String),
    #[error("Block size cannot be zero")]
    ZeroBlockSize,
}

type Result<T> = std::result::Result<T, Error>;

/// The measurement unit that a literal is converted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Byte,
    Sector,
    Kib,
    Mib,
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "b" | "B" => Ok(Self::Byte),
            "s" | "S" => Ok(Self::Sector),
            "k" | "K" => Ok(Self::Kib),
            "m" | "M" => Ok(Self::Mib),
            _ => Err(Error::InvalidUnit(s.to_owned())),
        }
    }
}

impl Unit {
    fn divisor(self, block_size: u64) -> u64 {
        match self {
            Self::Byte => 1,
            Self::Sector => block_size,
            Self::Kib => KIB,
            Self::Mib => MIB,
        }
    }
}

/// Convert `literal` to `unit`. `block_size` is the size in bytes of one
/// sector.
pub fn convert(literal: &str, unit: Unit, block_size: u64) -> Result<u64> {
    if block_size == 0 {
        return Err(Error::ZeroBlockSize);
    }

    let invalid = || Error::InvalidLiteral(literal.to_owned());

    let (digits, multiplier) = match literal.char_indices().next_back() {
        None => return Err(invalid()),
        Some((_, c)) if c.is_ascii_digit() => (literal, 1),
        Some((i, c)) => {
            let multiplier = match c.to_ascii_lowercase() {
                'k' => KIB,
                'm' => MIB,
                'g' => GIB,
                // Sector literals converted to sectors are always counted in
                // 512-byte units.
                's' if unit == Unit::Sector => LEGACY_SECTOR_SIZE,
                's' => block_size,
                _ => return Err(invalid()),
            };

            (&literal[..i], multiplier)
        }
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let overflow = || Error::Overflow(literal.to_owned());

    let value: u64 = digits.parse().map_err(|_| overflow())?;
    let bytes = value.checked_mul(multiplier).ok_or_else(overflow)?;

    Ok(bytes / unit.divisor(block_size))
}

/// Convert `literal` to bytes.
pub fn to_bytes(literal: &str, block_size: u64) -> Result<u64> {
    convert(literal, Unit::Byte, block_size)
}

/// A size literal from a JSON document. Both strings (`"4M"`) and plain
/// non-negative integers (byte counts) are accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct SizeLiteral(String);

impl SizeLiteral {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self, block_size: u64) -> Result<u64> {
        to_bytes(&self.0, block_size)
    }
}

impl fmt::Debug for SizeLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for SizeLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SizeLiteral {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl<'de> Deserialize<'de> for SizeLiteral {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = SizeLiteral;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a size string or a non-negative integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(SizeLiteral(v.to_owned()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(SizeLiteral(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                u64::try_from(v)
                    .map(|v| SizeLiteral(v.to_string()))
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

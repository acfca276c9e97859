//! Difficulty codec
//!
//! Converts a linear difficulty into the compact 32-bit "bits" encoding and
//! derives the numeric target a valid hash must fall under.
//!
//! A difficulty `d` stands for the target `2^(256 - d)`. The compact form
//! packs the target's byte length into the top byte and its three most
//! significant bytes into the low 23 bits; bit 23 is kept clear, so a
//! mantissa whose top byte would set it is shifted down one byte and the
//! exponent bumped. Targets shorter than three bytes are left-padded and
//! carry exponent 3, so every encoded value has `exponent >= 3`.

use crate::{Error, Result};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// Easiest difficulty the codec accepts (target `2^255`)
pub const MIN_DIFFICULTY: u32 = 1;

/// Hardest difficulty the codec accepts (target `2`)
pub const MAX_DIFFICULTY: u32 = 255;

const MANTISSA_MASK: u32 = 0x007f_ffff;
const SIGN_BIT: u32 = 0x0080_0000;
const MIN_EXPONENT: u32 = 3;

/// Compact difficulty bits: `(exponent << 24) | mantissa`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompactBits(pub u32);

impl CompactBits {
    /// Get the raw 32-bit word
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Byte length of the encoded target
    pub fn exponent(&self) -> u32 {
        self.0 >> 24
    }

    /// Most significant target bytes
    pub fn mantissa(&self) -> u32 {
        self.0 & MANTISSA_MASK
    }

    /// Encode an arbitrary positive target
    pub fn from_target(target: &BigUint) -> Result<Self> {
        if target.is_zero() {
            return Err(Error::difficulty("target must be positive"));
        }
        if target.bits() > 256 {
            return Err(Error::difficulty("target exceeds 256 bits"));
        }

        let bytes = target.to_bytes_be();
        let (mut exponent, mut mantissa) = if bytes.len() >= MIN_EXPONENT as usize {
            let top = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
            (bytes.len() as u32, top)
        } else {
            let mut padded = [0u8; 4];
            padded[4 - bytes.len()..].copy_from_slice(&bytes);
            (MIN_EXPONENT, u32::from_be_bytes(padded))
        };

        if mantissa & SIGN_BIT != 0 {
            mantissa >>= 8;
            exponent += 1;
        }

        if exponent > 0xff {
            return Err(Error::difficulty(format!(
                "exponent {} is not representable",
                exponent
            )));
        }

        Ok(Self((exponent << 24) | mantissa))
    }

    /// Decode into the target threshold
    pub fn to_target(&self) -> Result<Target> {
        decode_target(*self)
    }
}

impl fmt::Display for CompactBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Encode a linear difficulty into compact bits
pub fn encode_compact(difficulty: u32) -> Result<CompactBits> {
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        return Err(Error::difficulty(format!(
            "difficulty {} outside {}..={}",
            difficulty, MIN_DIFFICULTY, MAX_DIFFICULTY
        )));
    }

    let target = BigUint::one() << (256 - difficulty) as usize;
    CompactBits::from_target(&target)
}

/// Decode compact bits into a target
///
/// Rejects a set sign bit, an exponent below 3, a zero mantissa and any
/// value that would not fit in 256 bits.
pub fn decode_target(bits: CompactBits) -> Result<Target> {
    if bits.0 & SIGN_BIT != 0 {
        return Err(Error::difficulty(format!("bits {} encode a negative target", bits)));
    }

    let exponent = bits.exponent();
    if exponent < MIN_EXPONENT {
        return Err(Error::difficulty(format!(
            "exponent {} below minimum {}",
            exponent, MIN_EXPONENT
        )));
    }

    let mantissa = bits.mantissa();
    if mantissa == 0 {
        return Err(Error::difficulty(format!("bits {} encode a zero target", bits)));
    }

    let value = BigUint::from(mantissa) << (8 * (exponent - MIN_EXPONENT)) as usize;
    Target::from_biguint(value)
}

/// Numeric threshold a valid hash must fall strictly under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    value: BigUint,
    /// Big-endian 32-byte form for the hot comparison path
    bytes: [u8; 32],
}

impl Target {
    /// Create from an integer below `2^256`
    pub fn from_biguint(value: BigUint) -> Result<Self> {
        if value.bits() > 256 {
            return Err(Error::difficulty("target exceeds 256 bits"));
        }

        let raw = value.to_bytes_be();
        let mut bytes = [0u8; 32];
        if !value.is_zero() {
            bytes[32 - raw.len()..].copy_from_slice(&raw);
        }

        Ok(Self { value, bytes })
    }

    /// Create from 32 big-endian bytes
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self {
            value: BigUint::from_bytes_be(&bytes),
            bytes,
        }
    }

    /// Target that no hash meets
    pub fn zero() -> Self {
        Self::from_be_bytes([0u8; 32])
    }

    /// Integer value
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Whether a hash, read as a big-endian integer, is strictly below this target
    pub fn is_met_by(&self, hash: &[u8]) -> bool {
        match hash.len().cmp(&32) {
            Ordering::Equal => hash < &self.bytes[..],
            Ordering::Less => BigUint::from_bytes_be(hash) < self.value,
            Ordering::Greater => false,
        }
    }

    /// Approximate number of leading zero bits a hash needs
    pub fn difficulty_level(&self) -> u32 {
        256 - self.value.bits() as u32
    }

    /// Compact encoding of this target
    pub fn to_compact(&self) -> Result<CompactBits> {
        CompactBits::from_target(&self.value)
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.bytes))
    }
}

/// Step the difficulty by one based on how long the last block took
///
/// Faster than 0.75x the expected time raises it, slower than 1.25x lowers
/// it, anything in between leaves it unchanged. Clamped to the codec range.
pub fn adjust_difficulty(current: u32, actual: Duration, expected: Duration) -> u32 {
    if expected.is_zero() {
        return current;
    }

    let ratio = actual.as_secs_f64() / expected.as_secs_f64();
    let adjusted = if ratio < 0.75 {
        current.saturating_add(1)
    } else if ratio > 1.25 {
        current.saturating_sub(1)
    } else {
        current
    };

    adjusted.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

//! Identifier and key types shared across the LoRaWAN frame codec.
//!
//! All multi-byte identifiers (DevEUI, AppEUI, DevAddr) travel
//! little-endian on the wire but are displayed big-endian (the human
//! convention used on device labels), so the wire accessors are explicit
//! about byte order.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors for identifier parsing and conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid hexadecimal string")]
    InvalidHex,
}

macro_rules! hex_serde {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

/// 64-bit extended unique identifier (DevEUI / AppEUI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64([u8; 8]);

impl Eui64 {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Eui64(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Read from the wire (little-endian byte order).
    pub fn from_le_slice(slice: &[u8]) -> Result<Self, TypeError> {
        if slice.len() != 8 {
            return Err(TypeError::InvalidLength {
                expected: 8,
                actual: slice.len(),
            });
        }
        let mut b = [0u8; 8];
        for (i, v) in slice.iter().enumerate() {
            b[7 - i] = *v;
        }
        Ok(Eui64(b))
    }

    /// Wire representation (little-endian byte order).
    pub fn to_le_bytes(&self) -> [u8; 8] {
        let mut b = self.0;
        b.reverse();
        b
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Eui64 {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = hex::decode(s).map_err(|_| TypeError::InvalidHex)?;
        let b: [u8; 8] = v.try_into().map_err(|v: Vec<u8>| TypeError::InvalidLength {
            expected: 8,
            actual: v.len(),
        })?;
        Ok(Eui64(b))
    }
}

hex_serde!(Eui64);

/// 32-bit short device address. The 7 MSBs carry the low bits of the
/// NetID, the remaining 25 bits are network-assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        DevAddr(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn from_le_slice(slice: &[u8]) -> Result<Self, TypeError> {
        if slice.len() != 4 {
            return Err(TypeError::InvalidLength {
                expected: 4,
                actual: slice.len(),
            });
        }
        Ok(DevAddr([slice[3], slice[2], slice[1], slice[0]]))
    }

    pub fn to_le_bytes(&self) -> [u8; 4] {
        let mut b = self.0;
        b.reverse();
        b
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(v: u32) -> Self {
        DevAddr(v.to_be_bytes())
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for DevAddr {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = hex::decode(s).map_err(|_| TypeError::InvalidHex)?;
        let b: [u8; 4] = v.try_into().map_err(|v: Vec<u8>| TypeError::InvalidLength {
            expected: 4,
            actual: v.len(),
        })?;
        Ok(DevAddr(b))
    }
}

hex_serde!(DevAddr);

/// 24-bit network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetId([u8; 3]);

impl NetId {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        NetId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }

    /// NwkID: the 7 LSBs of the NetID, placed in the 7 MSBs of every
    /// DevAddr assigned under this network.
    pub fn nwk_id(&self) -> u8 {
        self.0[2] & 0x7f
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for NetId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = hex::decode(s).map_err(|_| TypeError::InvalidHex)?;
        let b: [u8; 3] = v.try_into().map_err(|v: Vec<u8>| TypeError::InvalidLength {
            expected: 3,
            actual: v.len(),
        })?;
        Ok(NetId(b))
    }
}

hex_serde!(NetId);

/// AES-128 session or application key.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Aes128Key([u8; 16]);

impl Aes128Key {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Aes128Key(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypeError> {
        let b: [u8; 16] = slice
            .try_into()
            .map_err(|_| TypeError::InvalidLength {
                expected: 16,
                actual: slice.len(),
            })?;
        Ok(Aes128Key(b))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

// Keys are deliberately opaque in Debug output.
impl fmt::Debug for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aes128Key(..)")
    }
}

impl fmt::Display for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Aes128Key {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = hex::decode(s).map_err(|_| TypeError::InvalidHex)?;
        let b: [u8; 16] = v.try_into().map_err(|v: Vec<u8>| TypeError::InvalidLength {
            expected: 16,
            actual: v.len(),
        })?;
        Ok(Aes128Key(b))
    }
}

hex_serde!(Aes128Key);

//! Blake3 ID type for content-addressed identifiers.
//!
//! `B3Id` is used for chunk addresses (data points), header addresses and
//! entity tags. The all-zero id is reserved as the "unset" reference.

use std::{array::TryFromSliceError, fmt, ops::Deref, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Newtype for blake3 hashes used as content addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct B3Id(pub blake3::Hash);

impl B3Id {
    /// The unset reference.
    pub const ZERO: Self = Self(blake3::Hash::from_bytes([0; 32]));

    /// Create a B3Id by hashing the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Whether this is the unset reference.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Get the underlying bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_bytes().as_slice()
    }

    /// Get the hex-encoded representation of this ID.
    pub fn as_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl Default for B3Id {
    fn default() -> Self {
        Self::ZERO
    }
}

impl AsRef<[u8]> for B3Id {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes().as_slice()
    }
}

impl Deref for B3Id {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        self.0.as_bytes()
    }
}

impl TryFrom<Vec<u8>> for B3Id {
    type Error = TryFromSliceError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Ok(Self(blake3::Hash::from_bytes(bytes.as_slice().try_into()?)))
    }
}

impl From<[u8; 32]> for B3Id {
    fn from(value: [u8; 32]) -> Self {
        B3Id(blake3::Hash::from_bytes(value))
    }
}

impl From<blake3::Hash> for B3Id {
    fn from(value: blake3::Hash) -> Self {
        Self(value)
    }
}

impl fmt::Display for B3Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

/// Error parsing a hex-encoded id.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("id must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for B3Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| ParseIdError::Length(len))?;
        Ok(Self::from(bytes))
    }
}

impl Serialize for B3Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for B3Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl ToSql for B3Id {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(self.as_slice())))
    }
}

impl FromSql for B3Id {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; 32] = blob.try_into().map_err(|_| FromSqlError::InvalidBlobSize {
            expected_size: 32,
            blob_size: blob.len(),
        })?;
        Ok(Self::from(bytes))
    }
}

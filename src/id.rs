//! Opaque record identifiers.
//!
//! Every record carries a 32-byte `Id`. The canonical mint writes the
//! current wall-clock nanoseconds into the first 8 bytes (so ids sort
//! roughly by creation time) and fills the remaining 24 bytes with random
//! data. Equality is bytewise and the printable form is lowercase hex.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bytes in an [`Id`].
pub const ID_LEN: usize = 32;

/// Opaque 32-byte record identifier.
///
/// # Examples
///
/// ```
/// use rippledb::Id;
///
/// let id = Id::from_bytes([7; 32]);
/// assert_eq!(id.to_string().len(), 64);
/// assert_eq!(id.to_string().parse::<Id>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// Wraps raw bytes as an id.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Mints a fresh id: wall-clock nanoseconds followed by random bytes.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ID_LEN];
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        bytes[..8].copy_from_slice(&nanos.to_be_bytes());
        rng.fill(&mut bytes[8..]);
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns the lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Reads the creation timestamp back out of the id's prefix. Only
    /// meaningful for ids minted by [`Id::generate`].
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let nanos = i64::from_be_bytes(self.0[..8].try_into().ok()?);
        Some(DateTime::from_timestamp_nanos(nanos))
    }
}

impl Default for Id {
    /// The all-zero id. Placeholder only; minted ids come from
    /// [`Id::generate`].
    fn default() -> Self {
        Self([0; ID_LEN])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Error parsing an id from hex.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid id: {reason}")]
pub struct ParseIdError {
    reason: String,
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_LEN * 2 {
            return Err(ParseIdError {
                reason: format!("expected {} hex characters, got {}", ID_LEN * 2, s.len()),
            });
        }
        let mut bytes = [0u8; ID_LEN];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| ParseIdError {
                reason: "non-ascii input".to_string(),
            })?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| ParseIdError {
                reason: format!("invalid hex pair {pair:?}"),
            })?;
        }
        Ok(Self(bytes))
    }
}

impl ToSql for Id {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(&self.0[..]))
    }
}

impl FromSql for Id {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let blob = value.as_blob()?;
        let bytes: [u8; ID_LEN] = blob
            .try_into()
            .map_err(|_| FromSqlError::InvalidBlobSize {
                expected_size: ID_LEN,
                blob_size: blob.len(),
            })?;
        Ok(Self(bytes))
    }
}

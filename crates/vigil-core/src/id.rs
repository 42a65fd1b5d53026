//! Strongly-typed identifier for tracked operations.
//!
//! Operation ids are 12-byte values rendered as 24 hex characters on
//! the wire, matching the persisted `_id` of the backing collection.
//! The newtype prevents mixing operation ids with other strings at
//! compile time and centralises parse validation.

use std::fmt;
use std::str::FromStr;

use bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A unique identifier for a tracked operation.
///
/// Ids are assigned at registration and stable for the lifetime of the
/// record. The wire form is the hex encoding of the underlying
/// 12-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(ObjectId);

impl OperationId {
    /// Generates a new unique operation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    /// Creates an operation id from a raw `ObjectId`.
    #[must_use]
    pub const fn from_object_id(oid: ObjectId) -> Self {
        Self(oid)
    }

    /// Returns the underlying `ObjectId`.
    #[must_use]
    pub const fn as_object_id(&self) -> ObjectId {
        self.0
    }

    /// Returns the hex wire form of the id.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ObjectId::parse_str(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid operation id '{s}': {e}"),
        })
    }
}

// JSON carries the plain hex string, never the `{"$oid": ...}` shape
// the raw ObjectId would produce outside of BSON.
impl Serialize for OperationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.to_hex())
    }
}

impl<'de> Deserialize<'de> for OperationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

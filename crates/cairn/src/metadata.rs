//! Per-resource metadata.

use serde::{Deserialize, Serialize};

use crate::id::B3Id;

/// Two-byte codes describing the representation of a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceProperties {
    pub mime_type: [u8; 2],
    pub charset: [u8; 2],
    pub encoding: [u8; 2],
    pub language: [u8; 2],
}

impl ResourceProperties {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..2].copy_from_slice(&self.mime_type);
        out[2..4].copy_from_slice(&self.charset);
        out[4..6].copy_from_slice(&self.encoding);
        out[6..8].copy_from_slice(&self.language);
        out
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            mime_type: [bytes[0], bytes[1]],
            charset: [bytes[2], bytes[3]],
            encoding: [bytes[4], bytes[5]],
            language: [bytes[6], bytes[7]],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub properties: ResourceProperties,
    /// Sum of chunk sizes in bytes.
    pub size: u64,
    /// Incremented on every successful write.
    pub version: u64,
    /// Unix seconds.
    pub last_modified: i64,
    /// Stored header address; zero means the site default header.
    pub header: B3Id,
}

/// Existence of a path in the resource store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Never created.
    Absent,
    /// Created and later deleted.
    Gone,
    Present,
}

/// A stored chunk reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRef {
    pub address: B3Id,
    pub size: u64,
}

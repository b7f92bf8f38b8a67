//! Represents a streamable object held by the upstream backend.

use serde::{Deserialize, Serialize};

/// Number of leading fingerprint characters embedded in public links.
pub const FINGERPRINT_LEN: usize = 6;

/// Identity of a streamable object as parsed from an incoming URL.
///
/// The fingerprint is a path-guessing guard taken from the backend's unique id,
/// not a cryptographic hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectReference {
    /// Numeric object identifier on the backend.
    pub object_id: i64,

    /// Fingerprint supplied by the caller (expected to be 6 characters).
    pub fingerprint: String,
}

impl ObjectReference {
    pub fn new(object_id: i64, fingerprint: impl Into<String>) -> Self {
        Self {
            object_id,
            fingerprint: fingerprint.into(),
        }
    }
}

/// Metadata for one object, fetched fresh from the backend for every request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Total object size in bytes.
    pub size_bytes: u64,

    /// Content type reported by the backend, if any.
    pub mime_type: Option<String>,

    /// Original file name, if any.
    pub file_name: Option<String>,

    /// Opaque unique id from the backend; its first 6 characters are the fingerprint.
    pub fingerprint: String,
}

impl ObjectMetadata {
    /// The public fingerprint: the first [`FINGERPRINT_LEN`] characters of the unique id.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint.chars().take(FINGERPRINT_LEN).collect()
    }

    /// Exact comparison against a caller-supplied fingerprint.
    pub fn matches_fingerprint(&self, candidate: &str) -> bool {
        candidate.chars().count() == FINGERPRINT_LEN && self.short_fingerprint() == candidate
    }
}

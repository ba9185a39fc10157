//! Parameter-derived artifact names.
//!
//! An artifact name is `<prefix>_<hash>` where `hash` is the first
//! [`HASH_LEN`] hex characters of the SHA-256 of the JSON encoding of the
//! parameters that produced the artifact. Struct fields serialize in
//! declaration order, so equal parameters always give equal names.

use std::fmt;

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::StoreError;

/// Number of hex characters of the digest kept in a name.
pub const HASH_LEN: usize = 12;

/// Name of a persisted artifact. Always a lowercase SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Wraps a fixed name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] unless the name starts with a
    /// lowercase letter and contains only `[a-z0-9_]`.
    pub fn new(name: impl Into<String>) -> Result<Self, StoreError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_rest =
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if valid_start && valid_rest {
            Ok(Self(name))
        } else {
            Err(StoreError::InvalidName { name })
        }
    }

    /// Derives a name from a prefix and the parameters of the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the parameters cannot be encoded or the
    /// prefix is not a valid identifier.
    pub fn derive<P: Serialize>(prefix: &str, params: &P) -> Result<Self, StoreError> {
        let encoded = serde_json::to_vec(params)?;
        let digest = hex::encode(Sha256::digest(&encoded));
        Self::new(format!("{prefix}_{}", &digest[..HASH_LEN]))
    }

    /// The artifact name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

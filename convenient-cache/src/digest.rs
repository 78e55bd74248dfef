//! File content digests

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Digest recorded for a dependency that does not exist
pub const MISSING_FILE_DIGEST: &str = "_no_file_";

/// Lowercase hex SHA-256 of a file's content, or the missing-file sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Hash raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Stream a file through SHA-256
    ///
    /// A path that does not exist yields [`Digest::missing`] instead of an
    /// error so that "file absent" can itself be recorded as a dependency.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::missing()),
            Err(e) => return Err(e),
        };

        let mut hasher = Sha256::new();
        let _ = io::copy(&mut file, &mut hasher)?;
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The sentinel digest for absent files
    pub fn missing() -> Self {
        Self(MISSING_FILE_DIGEST.to_string())
    }

    /// Whether this digest stands for an absent file
    pub fn is_missing(&self) -> bool {
        self.0 == MISSING_FILE_DIGEST
    }

    /// Hex string (or sentinel)
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use blake3::Hash;
use thiserror::Error;

/// Identity token for a video file, used as the watched-state key.
///
/// Derived from the file's name and size (and optionally its modification
/// time), never from its content or full path: fingerprinting stays cheap
/// on large libraries and moving a file between directories keeps its
/// identity, but two files with matching metadata collide and a rename or
/// edit produces a fresh fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub Hash);

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("cannot stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{0} has no file name")]
    NoFileName(PathBuf),

    #[error("file name of {0} is not valid UTF-8")]
    NonUtf8Name(PathBuf),

    #[error("invalid fingerprint hex: {0}")]
    InvalidHex(String),
}

impl FingerprintError {
    /// True when the failure means the file does not exist at all.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FingerprintError::Stat { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl Fingerprint {
    /// Fingerprint the file at `path`, statting it for size and mtime.
    ///
    /// The file must exist and carry a UTF-8 file name; anything else is
    /// reported as an error and the caller is expected to exclude the file
    /// from watched-state operations.
    pub fn from_path(path: &Path, include_mtime: bool) -> Result<Self, FingerprintError> {
        let metadata = std::fs::metadata(path).map_err(|source| FingerprintError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        let name = path
            .file_name()
            .ok_or_else(|| FingerprintError::NoFileName(path.to_path_buf()))?
            .to_str()
            .ok_or_else(|| FingerprintError::NonUtf8Name(path.to_path_buf()))?;

        let mtime = if include_mtime {
            let modified = metadata
                .modified()
                .map_err(|source| FingerprintError::Stat {
                    path: path.to_path_buf(),
                    source,
                })?;
            // Pre-epoch mtimes clamp to zero rather than failing.
            Some(
                modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
            )
        } else {
            None
        };

        Ok(Self::from_metadata(name, metadata.len(), mtime))
    }

    /// Pure core of [`Fingerprint::from_path`]: same inputs, same digest,
    /// no filesystem involved.
    pub fn from_metadata(name: &str, size: u64, mtime: Option<u64>) -> Self {
        let input = match mtime {
            Some(mtime) => format!("{name}_{size}_{mtime}"),
            None => format!("{name}_{size}"),
        };
        Self(blake3::hash(input.as_bytes()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes))
    }

    pub fn from_hex(hex: &str) -> Result<Self, FingerprintError> {
        Hash::from_hex(hex)
            .map(Self)
            .map_err(|_| FingerprintError::InvalidHex(hex.to_string()))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

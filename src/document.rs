//! Source documents and their change-detection fingerprints.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Content hash plus modification time of a document.
///
/// Two fingerprints are equal only when both the content digest and the
/// modification time match; either changing triggers a re-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    /// SHA256 of the raw document text
    pub content_hash: [u8; 32],
    /// Modification time in seconds since the unix epoch
    pub modified: u64,
}

impl Fingerprint {
    pub fn new(text: &str, modified: u64) -> Self {
        Self {
            content_hash: content_hash(text),
            modified,
        }
    }

    /// Short hex form of the content hash, for logs.
    pub fn short_hex(&self) -> String {
        self.content_hash[..6]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// A document to be indexed.
#[derive(Debug, Clone)]
pub struct Document {
    /// Stable path-derived key (vault-relative, `/`-separated)
    pub key: String,
    /// Path to the source file as it should be cited
    pub source_path: PathBuf,
    pub text: String,
    pub fingerprint: Fingerprint,
}

impl Document {
    pub fn new(
        key: impl Into<String>,
        source_path: impl Into<PathBuf>,
        text: impl Into<String>,
        modified: u64,
    ) -> Self {
        let text = text.into();
        let fingerprint = Fingerprint::new(&text, modified);
        Self {
            key: key.into(),
            source_path: source_path.into(),
            text,
            fingerprint,
        }
    }

    /// Load a single file that lives under `vault_root`.
    ///
    /// The document key is the vault-relative path. Files outside the vault
    /// keep their full path as key.
    pub fn from_file(vault_root: &Path, path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let modified = std::fs::metadata(path)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let relative = path.strip_prefix(vault_root).unwrap_or(path);

        Ok(Self::new(
            document_key(relative),
            relative.to_path_buf(),
            text,
            modified,
        ))
    }
}

/// Build a platform independent key from a relative path.
pub fn document_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Compute the SHA256 digest of a document's text.
pub fn content_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

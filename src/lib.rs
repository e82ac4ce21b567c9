//! Local semantic search and RAG context assembly over a folder of text
//! documents.
//!
//! ```no_run
//! use std::path::Path;
//! use orag::{Document, Vault};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new("/home/me/notes");
//! let vault = Vault::open(root)?;
//!
//! let doc = Document::from_file(root, &root.join("rust.md"))?;
//! let report = vault.sync(&[doc], false)?;
//! println!("{} added, {} failed", report.added, report.failed.len());
//!
//! let rag = vault.rag_context("how do lifetimes work?", None, None)?;
//! println!("{}", rag.context);
//! vault.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod document;
pub mod errors;
pub mod lock;
pub mod logging;
pub mod rag;
pub mod semantic;
pub mod vault;

#[cfg(test)]
mod tests;

pub use config::{find_vault_root, GlobalConfig, VaultConfig};
pub use document::{Document, Fingerprint};
pub use errors::{OragError, Result};
pub use rag::{assemble, RagContext, SourceRef};
pub use semantic::{Embedder, IndexReport, QueryResult, SimilarityMetric, VectorStore};
pub use vault::{RagResponse, SearchResponse, Vault, VaultStats};

//! Markdown note vault with YAML frontmatter, tag management and a batched
//! semantic index.
//!
//! ```no_run
//! use mdvault::{NoteRef, Vault, VaultConfig};
//!
//! # fn main() -> mdvault::Result<()> {
//! let config = VaultConfig::new("/path/to/vault").with_env_overrides()?;
//! let vault = Vault::open(config, None, None)?;
//! vault.create_note("Remember the milk", "groceries", None, None, false)?;
//! vault.add_tag(&NoteRef::filename("groceries"), "Errands")?;
//! assert_eq!(vault.list_all_tags(None)?, vec!["errands"]);
//! vault.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frontmatter;
pub mod indexing;
pub mod lock;
pub mod storage;
pub mod tags;
pub mod vault;

#[cfg(test)]
mod tag_scenarios_test;

pub use config::{IndexingConfig, IndexingStrategy, VaultConfig};
pub use error::{ErrorKind, Result, VaultError};
pub use frontmatter::types::{Assembled, FrontmatterBlock, Post};
pub use frontmatter::{FrontmatterManager, FrontmatterParser};
pub use indexing::watcher::VaultWatcher;
pub use indexing::{
    create_batch_indexer, BatchIndexer, EmbeddingProvider, IndexOperation, IndexerStats,
    IndexingTask, SearchHit, VectorStore,
};
pub use storage::NoteRef;
pub use tags::operations::TagOperations;
pub use vault::{Note, Vault};

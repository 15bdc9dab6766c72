//! The vault: note CRUD, tag operations and semantic search behind one handle.

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_yaml::Mapping;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{IndexingStrategy, VaultConfig};
use crate::error::{Result, VaultError};
use crate::frontmatter::types::FrontmatterBlock;
use crate::frontmatter::{FrontmatterManager, FrontmatterParser};
use crate::indexing::watcher::VaultWatcher;
use crate::indexing::{
    apply_task, create_batch_indexer, schema_probe, BatchIndexer, EmbeddingProvider,
    IndexOperation, IndexerSlot, IndexerStats, IndexingTask, SearchHit, VectorStore,
};
use crate::lock::NoteLocks;
use crate::storage::{self, collect_md_files, resolve_note_path, NoteRef};
use crate::tags::operations::TagOperations;

/// A note as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub path: PathBuf,
    pub frontmatter: Mapping,
    pub body: String,
}

pub struct Vault {
    config: VaultConfig,
    frontmatter: Arc<FrontmatterManager>,
    tags: TagOperations,
    locks: Arc<NoteLocks>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
    indexer: IndexerSlot,
    /// Schema state for the immediate strategy, which bypasses the queue.
    immediate_schema: OnceCell<()>,
}

impl Vault {
    pub fn open(
        config: VaultConfig,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        store: Option<Arc<dyn VectorStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let notes_dir = config.notes_dir();
        fs::create_dir_all(&notes_dir).map_err(|e| VaultError::io("open_vault", &notes_dir, &e))?;

        let frontmatter = Arc::new(FrontmatterManager::new(
            &config.vault_path,
            &config.default_notes_dir,
            &config.default_author,
        ));
        let locks = Arc::new(NoteLocks::new());
        let tags = TagOperations::new(
            &config.vault_path,
            &config.default_notes_dir,
            Arc::clone(&frontmatter),
            Arc::clone(&locks),
        );

        log::info!(
            "[Vault] Opened {} (strategy: {}, vector search: {})",
            config.vault_path.display(),
            config.indexing.strategy,
            config.vector_search_enabled
        );

        Ok(Self {
            config,
            frontmatter,
            tags,
            locks,
            embedder,
            store,
            indexer: IndexerSlot::new(),
            immediate_schema: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.vault_path
    }

    pub fn frontmatter(&self) -> &FrontmatterManager {
        &self.frontmatter
    }

    pub fn tags(&self) -> &TagOperations {
        &self.tags
    }

    fn resolve(&self, note: &NoteRef) -> Result<PathBuf> {
        note.resolve(&self.config.vault_path, &self.config.default_notes_dir)
    }

    // ========================================================================
    // Notes
    // ========================================================================

    /// Write a note. `text` may carry its own frontmatter block, which is
    /// merged with stamped author and timestamps.
    pub fn create_note(
        &self,
        text: &str,
        filename: &str,
        author: Option<&str>,
        default_path: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let (directory, base) = resolve_note_path(
            &self.config.vault_path,
            &self.config.default_notes_dir,
            filename,
            default_path,
        )?;
        let path = directory.join(base);

        let (content, operation) = self.locks.with_lock(&path, || -> Result<_> {
            let exists = path.exists();
            if exists && !overwrite {
                return Err(VaultError::exists(
                    "create_note",
                    format!("Note already exists: {}", path.display()),
                )
                .with_context("path", path.display().to_string()));
            }
            let assembled = self
                .frontmatter
                .assemble(text, filename, author, default_path, !exists)?;
            storage::write_note(&assembled.path(), &assembled.content, overwrite)?;
            log::info!("[Vault] {} {}", if exists { "Overwrote" } else { "Created" }, path.display());

            let operation = if exists {
                IndexOperation::Update
            } else {
                IndexOperation::Add
            };
            Ok((assembled.content, operation))
        })?;

        self.notify(&path, &content, operation);
        Ok(path)
    }

    /// Replace a note's body and merge any frontmatter in `text`.
    pub fn edit_note(&self, note: &NoteRef, text: &str, author: Option<&str>) -> Result<PathBuf> {
        let path = self.resolve(note)?;

        let content = self.locks.with_lock(&path, || -> Result<_> {
            if !path.is_file() {
                return Err(VaultError::not_found(
                    "edit_note",
                    format!("Note does not exist: {}", path.display()),
                )
                .with_context("path", path.display().to_string()));
            }
            let assembled = self.frontmatter.assemble_at(&path, text, author, false)?;
            storage::write_note(&path, &assembled.content, true)?;
            Ok(assembled.content)
        })?;

        log::info!("[Vault] Edited {}", path.display());
        self.notify(&path, &content, IndexOperation::Update);
        Ok(path)
    }

    pub fn read_note(&self, note: &NoteRef) -> Result<Note> {
        let path = self.resolve(note)?;
        let content = storage::read_note(&path)?;
        let (block, body) = FrontmatterParser::parse(&content);
        if matches!(block, FrontmatterBlock::WrongShape(_) | FrontmatterBlock::Invalid(_)) {
            log::warn!("[Vault] {} has unusable frontmatter, reading it as empty", path.display());
        }
        Ok(Note {
            path,
            frontmatter: block.into_mapping(),
            body,
        })
    }

    pub fn delete_note(&self, note: &NoteRef) -> Result<PathBuf> {
        let path = self.resolve(note)?;
        self.locks.with_lock(&path, || storage::delete_note(&path))?;
        log::info!("[Vault] Deleted {}", path.display());
        self.notify(&path, "", IndexOperation::Remove);
        Ok(path)
    }

    /// Markdown notes under `directory` (relative to the vault root), or the
    /// whole vault.
    pub fn list_notes(&self, directory: Option<&Path>) -> Result<Vec<PathBuf>> {
        let root = match directory {
            None => self.config.vault_path.clone(),
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.config.vault_path.join(dir),
        };
        if !root.is_dir() {
            return Err(VaultError::not_found(
                "list_notes",
                format!("Directory does not exist: {}", root.display()),
            )
            .with_context("directory", root.display().to_string()));
        }
        Ok(collect_md_files(&root))
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn get_tags(&self, note: &NoteRef) -> Result<Vec<String>> {
        self.tags.get_tags(note)
    }

    pub fn add_tag(&self, note: &NoteRef, tag: &str) -> Result<PathBuf> {
        let path = self.tags.add_tag(note, tag)?;
        self.notify_rewrite(&path);
        Ok(path)
    }

    pub fn remove_tag(&self, note: &NoteRef, tag: &str) -> Result<PathBuf> {
        let path = self.tags.remove_tag(note, tag)?;
        self.notify_rewrite(&path);
        Ok(path)
    }

    pub fn rename_tag(
        &self,
        old_tag: &str,
        new_tag: &str,
        directory: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let modified = self.tags.rename_tag(old_tag, new_tag, directory)?;
        for path in &modified {
            self.notify_rewrite(path);
        }
        Ok(modified)
    }

    pub fn list_all_tags(&self, directory: Option<&Path>) -> Result<Vec<String>> {
        self.tags.list_all_tags(directory)
    }

    pub fn find_notes_with_tag(&self, tag: &str, directory: Option<&Path>) -> Result<Vec<PathBuf>> {
        self.tags.find_notes_with_tag(tag, directory)
    }

    // ========================================================================
    // Indexing and search
    // ========================================================================

    /// Nearest notes to `query` by embedding similarity.
    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.config.vector_search_enabled {
            return Err(VaultError::configuration(
                "semantic_search",
                "Vector search is disabled",
            ));
        }
        let (embedder, store) = match (&self.embedder, &self.store) {
            (Some(embedder), Some(store)) => (embedder, store),
            _ => {
                return Err(VaultError::configuration(
                    "semantic_search",
                    "No embedding provider or vector store configured",
                ))
            }
        };
        let vector = embedder.embed(query)?;
        store.search(&vector, limit)
    }

    /// The queueing indexer, built on first use. `None` under the immediate
    /// strategy, and when vector search is off or has no embedding provider
    /// and vector store.
    pub fn indexer(&self) -> Result<Option<Arc<BatchIndexer>>> {
        self.indexer.get_or_create(|| {
            create_batch_indexer(
                &self.config,
                self.config.indexing.strategy,
                self.embedder.clone(),
                self.store.clone(),
            )
        })
    }

    /// Counters of the indexer, if one has been created.
    pub fn indexing_stats(&self) -> Option<IndexerStats> {
        self.indexer.get().map(|indexer| indexer.get_stats())
    }

    /// Watch the vault for edits made outside this handle and queue them for
    /// indexing.
    pub fn watch(&self) -> Result<VaultWatcher> {
        match self.indexer()? {
            Some(indexer) => VaultWatcher::start(&self.config.vault_path, indexer),
            None => Err(VaultError::configuration(
                "watch",
                "Watching requires vector search with an embedding provider, a vector store \
                 and the batch or background indexing strategy",
            )),
        }
    }

    pub fn shutdown(&self) {
        if let Some(indexer) = self.indexer.get() {
            indexer.stop();
        }
        log::info!("[Vault] Shut down {}", self.config.vault_path.display());
    }

    /// Whether changes can reach a vector store at all.
    fn indexes_changes(&self) -> bool {
        self.config.vector_search_enabled && self.embedder.is_some() && self.store.is_some()
    }

    fn notify_rewrite(&self, path: &Path) {
        if !self.indexes_changes() {
            return;
        }
        match storage::read_note(path) {
            Ok(content) => self.notify(path, &content, IndexOperation::Update),
            Err(e) => log::warn!("[Vault] Could not re-read {} for indexing: {}", path.display(), e),
        }
    }

    /// Hand a change to the index. Never fails the caller.
    fn notify(&self, path: &Path, content: &str, operation: IndexOperation) {
        if !self.indexes_changes() {
            return;
        }
        if self.config.indexing.strategy == IndexingStrategy::Immediate {
            self.index_now(&IndexingTask::new(path, content, operation));
            return;
        }
        match self.indexer() {
            Ok(Some(indexer)) => indexer.queue_task(path, content, operation),
            Ok(None) => {}
            Err(e) => log::error!("[Vault] Indexer unavailable, {} not queued: {}", path.display(), e),
        }
    }

    fn index_now(&self, task: &IndexingTask) {
        let (embedder, store) = match (&self.embedder, &self.store) {
            (Some(embedder), Some(store)) => (embedder.as_ref(), store.as_ref()),
            _ => return,
        };
        let ready = self.immediate_schema.get_or_try_init(|| {
            let vector = embedder.embed(&schema_probe(&task.content))?;
            store.initialize_schema(vector.len())
        });
        let result = ready.and_then(|_| apply_task(embedder, store, task));
        if let Err(e) = result {
            log::error!(
                "[Vault] Immediate {} of {} failed: {}",
                task.operation,
                task.file_path.display(),
                e
            );
        }
    }
}

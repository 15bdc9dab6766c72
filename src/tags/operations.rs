//! Per-note and vault-wide tag mutations.
//!
//! Every mutation is a full frontmatter rewrite: the whole `tags` list is
//! renormalized and `updated` is bumped, even when only one tag changed.

use rayon::prelude::*;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{normalize, normalize_tags, validate_normalized, validate_raw};
use crate::error::{Result, VaultError};
use crate::frontmatter::types::{AUTHOR, TAGS};
use crate::frontmatter::{tag_text, FrontmatterManager, FrontmatterParser};
use crate::lock::NoteLocks;
use crate::storage::{self, collect_md_files, NoteRef};

pub struct TagOperations {
    vault_root: PathBuf,
    default_notes_dir: String,
    frontmatter: Arc<FrontmatterManager>,
    locks: Arc<NoteLocks>,
}

impl TagOperations {
    pub fn new(
        vault_root: &Path,
        default_notes_dir: &str,
        frontmatter: Arc<FrontmatterManager>,
        locks: Arc<NoteLocks>,
    ) -> Self {
        Self {
            vault_root: vault_root.to_path_buf(),
            default_notes_dir: default_notes_dir.to_string(),
            frontmatter,
            locks,
        }
    }

    fn resolve(&self, note: &NoteRef) -> Result<PathBuf> {
        note.resolve(&self.vault_root, &self.default_notes_dir)
    }

    fn resolve_existing(&self, note: &NoteRef, operation: &str) -> Result<PathBuf> {
        let path = self.resolve(note)?;
        if !path.is_file() {
            return Err(VaultError::not_found(
                operation,
                format!("Note does not exist: {}", path.display()),
            )
            .with_context("path", path.display().to_string()));
        }
        Ok(path)
    }

    /// Directory a scan starts from. `None` is the vault root, never the
    /// default notes directory.
    fn scan_root(&self, directory: Option<&Path>, operation: &str) -> Result<PathBuf> {
        let root = match directory {
            None => self.vault_root.clone(),
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.vault_root.join(dir),
        };
        if !root.is_dir() {
            return Err(VaultError::not_found(
                operation,
                format!("Directory does not exist: {}", root.display()),
            )
            .with_context("directory", root.display().to_string()));
        }
        Ok(root)
    }

    /// Stored tags in their original casing. Anything unreadable or
    /// malformed reads as no tags.
    fn tags_at(&self, path: &Path) -> Vec<String> {
        let frontmatter = match self.frontmatter.read_existing(path) {
            Ok(Some(frontmatter)) => frontmatter,
            Ok(None) => return Vec::new(),
            Err(e) => {
                log::warn!("[Tags] Could not read tags from {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        match frontmatter.get(TAGS) {
            Some(Value::Sequence(seq)) => seq.iter().filter_map(tag_text).collect(),
            _ => Vec::new(),
        }
    }

    fn normalized_tags_at(&self, path: &Path) -> Vec<String> {
        normalize_tags(self.tags_at(path))
    }

    /// Rewrite the note at `path` with `tags` as its tag list. Caller holds
    /// the note lock. Returns the written content.
    fn rewrite(&self, path: &Path, tags: Vec<String>, operation: &str) -> Result<String> {
        let content = storage::read_note(path)?;
        let (block, body) = FrontmatterParser::parse(&content);
        let existing = block.into_mapping();
        let author = existing.get(AUTHOR).and_then(Value::as_str);

        let mut update = Mapping::new();
        update.insert(
            Value::from(TAGS),
            Value::Sequence(tags.into_iter().map(Value::String).collect()),
        );
        let text = FrontmatterParser::combine(&update, &body)?;

        let assembled = self.frontmatter.assemble_at(path, &text, author, false)?;
        storage::write_note(path, &assembled.content, true)?;
        log::debug!("[Tags] {} rewrote {}", operation, path.display());
        Ok(assembled.content)
    }

    /// Tags stored on a note, original casing preserved.
    pub fn get_tags(&self, note: &NoteRef) -> Result<Vec<String>> {
        let path = self.resolve(note)?;
        Ok(self.tags_at(&path))
    }

    pub fn add_tag(&self, note: &NoteRef, tag: &str) -> Result<PathBuf> {
        validate_raw(tag)?;
        let path = self.resolve_existing(note, "add_tag")?;

        self.locks.with_lock(&path, || {
            let mut tags = self.tags_at(&path);
            tags.push(tag.to_string());
            self.rewrite(&path, normalize_tags(tags), "add_tag")
        })?;
        Ok(path)
    }

    /// Remove a tag. Always rewrites, even when the tag was not present.
    pub fn remove_tag(&self, note: &NoteRef, tag: &str) -> Result<PathBuf> {
        let path = self.resolve_existing(note, "remove_tag")?;
        let target = normalize(tag);

        self.locks.with_lock(&path, || {
            let remaining: Vec<String> = self
                .normalized_tags_at(&path)
                .into_iter()
                .filter(|t| *t != target)
                .collect();
            self.rewrite(&path, remaining, "remove_tag")
        })?;
        Ok(path)
    }

    /// Rename a tag in every note under `directory`. Returns the notes that
    /// were rewritten, in scan order.
    pub fn rename_tag(
        &self,
        old_tag: &str,
        new_tag: &str,
        directory: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let new_tag = normalize(new_tag);
        if !validate_normalized(&new_tag) {
            return Err(VaultError::validation(
                "rename_tag",
                format!("Invalid new tag: {:?}", new_tag),
            )
            .with_context("new_tag", new_tag));
        }
        let old_tag = normalize(old_tag);
        let root = self.scan_root(directory, "rename_tag")?;

        let mut modified = Vec::new();
        for path in collect_md_files(&root) {
            let rewritten = self.locks.with_lock(&path, || -> Result<bool> {
                let current = self.normalized_tags_at(&path);
                if !current.contains(&old_tag) {
                    return Ok(false);
                }
                let renamed = normalize_tags(
                    current
                        .iter()
                        .map(|t| if *t == old_tag { new_tag.as_str() } else { t.as_str() }),
                );

                let before: HashSet<&String> = current.iter().collect();
                let after: HashSet<&String> = renamed.iter().collect();
                if before == after {
                    log::debug!("[Tags] rename_tag: {} unchanged after normalization", path.display());
                    return Ok(false);
                }

                self.rewrite(&path, renamed, "rename_tag")?;
                Ok(true)
            })?;
            if rewritten {
                modified.push(path);
            }
        }

        log::info!(
            "[Tags] Renamed {:?} -> {:?} in {} notes",
            old_tag,
            new_tag,
            modified.len()
        );
        Ok(modified)
    }

    /// Every normalized tag used under `directory`, sorted.
    pub fn list_all_tags(&self, directory: Option<&Path>) -> Result<Vec<String>> {
        let root = self.scan_root(directory, "list_all_tags")?;
        let tags: BTreeSet<String> = collect_md_files(&root)
            .par_iter()
            .flat_map_iter(|path| self.normalized_tags_at(path))
            .collect();
        Ok(tags.into_iter().collect())
    }

    /// Notes under `directory` carrying `tag`. A blank tag matches nothing
    /// and does not touch the filesystem.
    pub fn find_notes_with_tag(&self, tag: &str, directory: Option<&Path>) -> Result<Vec<PathBuf>> {
        let tag = normalize(tag);
        if tag.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.scan_root(directory, "find_notes_with_tag")?;
        Ok(collect_md_files(&root)
            .into_par_iter()
            .filter(|path| self.normalized_tags_at(path).contains(&tag))
            .collect())
    }
}

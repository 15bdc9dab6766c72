//! File-level primitives: note addressing, path resolution, atomic writes and
//! Markdown enumeration.

use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, VaultError};

/// Suffix of the temp file used by [`atomic_write_file`]
pub const TEMP_SUFFIX: &str = ".mdvault-tmp";

/// How a caller points at a note: by filename relative to a notes directory,
/// or by an absolute filepath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteRef {
    Filename {
        name: String,
        /// Overrides the configured default notes directory.
        default_path: Option<String>,
    },
    Filepath(PathBuf),
}

impl NoteRef {
    pub fn filename(name: &str) -> Self {
        NoteRef::Filename {
            name: name.to_string(),
            default_path: None,
        }
    }

    pub fn filename_in(name: &str, default_path: &str) -> Self {
        NoteRef::Filename {
            name: name.to_string(),
            default_path: Some(default_path.to_string()),
        }
    }

    pub fn filepath(path: impl Into<PathBuf>) -> Self {
        NoteRef::Filepath(path.into())
    }

    /// Build from loosely-typed request parameters. Exactly one of `filename`
    /// and `filepath` must be given.
    pub fn from_parts(
        filename: Option<&str>,
        filepath: Option<&Path>,
        default_path: Option<&str>,
    ) -> Result<Self> {
        match (filename, filepath) {
            (Some(name), None) => Ok(NoteRef::Filename {
                name: name.to_string(),
                default_path: default_path.map(str::to_string),
            }),
            (None, Some(path)) => Ok(NoteRef::Filepath(path.to_path_buf())),
            (Some(_), Some(_)) => Err(VaultError::validation(
                "resolve_note",
                "Provide either filename or filepath, not both",
            )),
            (None, None) => Err(VaultError::validation(
                "resolve_note",
                "Either filename or filepath is required",
            )),
        }
    }

    /// Turn the reference into a concrete path.
    pub fn resolve(&self, vault_root: &Path, default_notes_dir: &str) -> Result<PathBuf> {
        match self {
            NoteRef::Filename { name, default_path } => {
                let (dir, base) =
                    resolve_note_path(vault_root, default_notes_dir, name, default_path.as_deref())?;
                Ok(dir.join(base))
            }
            NoteRef::Filepath(path) => {
                if !path.is_absolute() {
                    return Err(VaultError::validation(
                        "resolve_note",
                        format!("Filepath must be absolute: {}", path.display()),
                    ));
                }
                Ok(path.clone())
            }
        }
    }
}

fn check_relative(operation: &str, value: &str) -> Result<()> {
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(VaultError::validation(
            operation,
            format!("Path must be relative to the vault: {}", value),
        ));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(VaultError::validation(
            operation,
            format!("Path must not contain '..': {}", value),
        ));
    }
    Ok(())
}

/// Split a user-supplied filename into the directory it lives in and its base
/// name with a `.md` extension.
///
/// `projects/alpha` resolves to `<vault>/<notes dir>/projects` and `alpha.md`.
/// `default_path` replaces the configured notes directory.
pub fn resolve_note_path(
    vault_root: &Path,
    default_notes_dir: &str,
    filename: &str,
    default_path: Option<&str>,
) -> Result<(PathBuf, String)> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(VaultError::validation("resolve_note_path", "Filename cannot be empty"));
    }
    check_relative("resolve_note_path", filename)?;

    let base_dir = match default_path {
        Some(dir) => {
            check_relative("resolve_note_path", dir)?;
            vault_root.join(dir)
        }
        None => vault_root.join(default_notes_dir),
    };

    let relative = Path::new(filename);
    let base = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| {
            VaultError::validation("resolve_note_path", format!("Invalid filename: {}", filename))
        })?;
    let directory = match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => base_dir.join(parent),
        _ => base_dir,
    };

    let base = if base.ends_with(".md") {
        base
    } else {
        format!("{}.md", base)
    };

    Ok((directory, base))
}

/// Atomic file write: write to a temp file in the same directory, then rename,
/// so a watcher never picks up a half-written note.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));

    let mut file =
        fs::File::create(&temp_path).map_err(|e| VaultError::io("write", &temp_path, &e))?;
    file.write_all(content)
        .map_err(|e| VaultError::io("write", &temp_path, &e))?;
    file.sync_all()
        .map_err(|e| VaultError::io("write", &temp_path, &e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        VaultError::io("write", path, &e)
    })?;

    Ok(())
}

/// Write a note, creating parent directories. Refuses to replace an existing
/// file unless `overwrite` is set.
pub fn write_note(path: &Path, content: &str, overwrite: bool) -> Result<PathBuf> {
    if path.exists() && !overwrite {
        return Err(
            VaultError::exists("write", format!("Note already exists: {}", path.display()))
                .with_context("path", path.display().to_string()),
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| VaultError::io("write", parent, &e))?;
    }
    atomic_write_file(path, content.as_bytes())?;
    Ok(path.to_path_buf())
}

pub fn read_note(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        if e.kind() == IoErrorKind::NotFound {
            VaultError::not_found("read", format!("Note does not exist: {}", path.display()))
                .with_context("path", path.display().to_string())
        } else {
            VaultError::io("read", path, &e)
        }
    })
}

pub fn delete_note(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(
            VaultError::not_found("delete", format!("Note does not exist: {}", path.display()))
                .with_context("path", path.display().to_string()),
        );
    }
    fs::remove_file(path).map_err(|e| VaultError::io("delete", path, &e))?;
    Ok(path.to_path_buf())
}

/// Hidden entries, attachment folders and temp files are never notes.
fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name.ends_with("_att") || name.ends_with(TEMP_SUFFIX)
}

/// Collect all .md files under `dir` recursively, sorted by name within each
/// directory.
pub fn collect_md_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file() && entry.file_name().to_string_lossy().ends_with(".md")
        })
        .map(|entry| entry.into_path())
        .collect()
}

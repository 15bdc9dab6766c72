use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{BatchIndexer, IndexOperation};
use crate::error::{Result, VaultError};
use crate::storage::TEMP_SUFFIX;

/// A path must be quiet this long before it is queued.
const DEBOUNCE: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(250);

/// Feeds changes made outside the vault API (editors, sync clients) into the
/// indexing queue.
pub struct VaultWatcher {
    _watcher: RecommendedWatcher,
}

impl VaultWatcher {
    /// Watch `vault_root` recursively. The event thread ends when the
    /// returned watcher is dropped.
    pub fn start(vault_root: &Path, indexer: Arc<BatchIndexer>) -> Result<Self> {
        let vault = vault_root.to_path_buf();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default())
            .map_err(|e| VaultError::indexing("watch", e.to_string()))?;
        watcher
            .watch(vault.as_path(), RecursiveMode::Recursive)
            .map_err(|e| {
                VaultError::indexing("watch", e.to_string())
                    .with_context("path", vault.display().to_string())
            })?;

        thread::spawn(move || {
            let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

            loop {
                match rx.recv_timeout(TICK) {
                    Ok(Ok(event)) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            continue;
                        }
                        let now = Instant::now();
                        for path in event.paths {
                            if should_process_path(&path, &vault) {
                                pending.insert(path, now);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("[Watcher] File watcher error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let stable = take_stable(&mut pending, Instant::now());
                        if !stable.is_empty() {
                            log::debug!("[Watcher] Processing {} stable paths", stable.len());
                        }
                        for path in stable {
                            queue_change(&indexer, &path);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("[Watcher] Event loop ended for {}", vault.display());
        });

        log::info!("[Watcher] Watching {}", vault_root.display());
        Ok(VaultWatcher { _watcher: watcher })
    }
}

/// Remove and return paths that have been quiet for [`DEBOUNCE`].
fn take_stable(pending: &mut HashMap<PathBuf, Instant>, now: Instant) -> Vec<PathBuf> {
    let mut stable: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, last_event)| now.duration_since(**last_event) >= DEBOUNCE)
        .map(|(path, _)| path.clone())
        .collect();
    for path in &stable {
        pending.remove(path);
    }
    stable.sort();
    stable
}

fn queue_change(indexer: &BatchIndexer, path: &Path) {
    if path.is_file() {
        match fs::read_to_string(path) {
            Ok(content) => indexer.queue_task(path, &content, IndexOperation::Update),
            Err(e) => log::warn!("[Watcher] Failed to read {}: {}", path.display(), e),
        }
    } else if !path.exists() {
        indexer.queue_task(path, "", IndexOperation::Remove);
    }
}

fn should_process_path(path: &Path, vault_root: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name.ends_with(TEMP_SUFFIX) {
        return false;
    }
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        return false;
    }

    let relative = path.strip_prefix(vault_root).unwrap_or(path);
    !relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name.ends_with("_att")
        }
        _ => false,
    })
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Vault access: file listing, reads and change events

use crate::error::{ModuleError, Result};
use crate::paths::normalize_path;
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A change to a vault file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Create(String),
    Modify(String),
    Delete(String),
    Rename { from: String, to: String },
}

/// Read access to the files of a vault
#[async_trait]
pub trait Vault: Send + Sync {
    /// Paths of every file in the vault
    fn files(&self) -> Vec<String>;

    /// Whether `path` names a file
    fn is_file(&self, path: &str) -> bool;

    /// Read a file, allowing a cached copy
    async fn cached_read(&self, path: &str) -> io::Result<String>;

    /// Read a file from storage
    async fn read(&self, path: &str) -> io::Result<String>;
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such vault file: {path}"))
}

/// Vault held entirely in memory
///
/// Mutations return the [`VaultEvent`] they correspond to so callers can
/// forward it to a file cache.
#[derive(Default)]
pub struct MemoryVault {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vault from `(path, content)` pairs
    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: Into<String>,
        C: Into<String>,
    {
        let vault = Self::new();
        for (path, content) in files {
            vault.write(path, content);
        }
        vault
    }

    /// Create or replace a file
    pub fn write(&self, path: impl Into<String>, content: impl Into<String>) -> VaultEvent {
        let path = normalize_path(&path.into());
        let previous = self.files.write().insert(path.clone(), content.into());
        match previous {
            Some(_) => VaultEvent::Modify(path),
            None => VaultEvent::Create(path),
        }
    }

    /// Delete a file
    pub fn remove(&self, path: &str) -> VaultEvent {
        let path = normalize_path(path);
        self.files.write().remove(&path);
        VaultEvent::Delete(path)
    }

    /// Move a file
    pub fn rename(&self, from: &str, to: &str) -> VaultEvent {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let mut files = self.files.write();
        if let Some(content) = files.remove(&from) {
            files.insert(to.clone(), content);
        }
        VaultEvent::Rename { from, to }
    }
}

#[async_trait]
impl Vault for MemoryVault {
    fn files(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    fn is_file(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }

    async fn cached_read(&self, path: &str) -> io::Result<String> {
        self.read(path).await
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        self.files.read().get(path).cloned().ok_or_else(|| not_found(path))
    }
}

/// Vault backed by a directory on disk
pub struct DirectoryVault {
    root: PathBuf,
}

impl DirectoryVault {
    /// Open a vault rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ModuleError::Config(format!(
                "vault root is not a directory: {}",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Vault path of an absolute file path, if it lies inside the vault
    pub fn vault_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative
            .components()
            .any(|component| component.as_os_str().to_string_lossy().starts_with('.'))
        {
            return None;
        }
        let joined: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!joined.is_empty()).then(|| joined.join("/"))
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |full, segment| full.join(segment))
    }

    /// Watch the directory and translate file system events
    ///
    /// The returned watcher must be kept alive for events to flow.
    pub fn watch(&self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<VaultEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let root = self.root.clone();
        let vault = DirectoryVault { root: root.clone() };
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("vault watcher error: {e}");
                    return;
                }
            };
            for vault_event in vault.translate(event) {
                if tx.send(vault_event).is_err() {
                    debug!("vault event receiver dropped");
                    return;
                }
            }
        })
        .map_err(|e| ModuleError::Config(format!("cannot watch vault: {e}")))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ModuleError::Config(format!("cannot watch {}: {e}", root.display())))?;
        Ok((watcher, rx))
    }

    fn translate(&self, event: notify::Event) -> Vec<VaultEvent> {
        let paths: Vec<String> = event.paths.iter().filter_map(|p| self.vault_path(p)).collect();
        match event.kind {
            EventKind::Create(_) => paths.into_iter().map(VaultEvent::Create).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
                vec![VaultEvent::Rename {
                    from: paths[0].clone(),
                    to: paths[1].clone(),
                }]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                paths.into_iter().map(VaultEvent::Delete).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                paths.into_iter().map(VaultEvent::Create).collect()
            }
            // backends that cannot tell the two sides apart report each path alone
            EventKind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|path| {
                    if self.is_file(&path) {
                        VaultEvent::Create(path)
                    } else {
                        VaultEvent::Delete(path)
                    }
                })
                .collect(),
            EventKind::Modify(_) => paths.into_iter().map(VaultEvent::Modify).collect(),
            EventKind::Remove(_) => paths.into_iter().map(VaultEvent::Delete).collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Vault for DirectoryVault {
    fn files(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.vault_path(entry.path()))
            .collect()
    }

    fn is_file(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    async fn cached_read(&self, path: &str) -> io::Result<String> {
        self.read(path).await
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.full_path(path)).await
    }
}

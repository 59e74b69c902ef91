// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Snapshot of vault files keyed by path
//!
//! Every time a file is (re)cached it receives a fresh [`Identity`]. Caches
//! further down the pipeline key their entries by the identity's token, and
//! a token stays valid only while its identity is the current one for its
//! path.

use crate::error::Result;
use crate::events::EventEmitter;
use crate::paths;
use crate::rules::PathRules;
use crate::vault::{Vault, VaultEvent};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Unique token of a cached file version or fetched remote module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityToken(u64);

impl IdentityToken {
    /// Allocate a token that has never been handed out before
    pub fn fresh() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// One cached version of a vault file
#[derive(Debug)]
pub struct Identity {
    token: IdentityToken,
    path: String,
    content: Option<Arc<str>>,
}

impl Identity {
    pub fn token(&self) -> IdentityToken {
        self.token
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Preloaded content; `None` for reference-only entries
    pub fn content(&self) -> Option<&Arc<str>> {
        self.content.as_ref()
    }

    pub fn extension(&self) -> &str {
        paths::extension(&self.path)
    }
}

/// Notification that the identity cached for a path changed
#[derive(Debug, Clone)]
pub struct CacheInvalidation {
    pub path: String,
    /// Identity that was replaced or removed
    pub previous: Option<Arc<Identity>>,
    /// New identity, `None` when the path was removed
    pub current: Option<Arc<Identity>>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<Identity>>,
    current: HashSet<IdentityToken>,
}

/// Snapshot of vault files with preloaded content for files matching the
/// preloading rules
pub struct FileCache {
    vault: Arc<dyn Vault>,
    rules: RwLock<PathRules>,
    state: RwLock<CacheState>,
    on_invalidate: EventEmitter<CacheInvalidation>,
}

impl FileCache {
    /// Create an empty cache; call [`FileCache::rebuild`] to populate it
    pub fn new(vault: Arc<dyn Vault>, rules: PathRules) -> Arc<Self> {
        Arc::new(Self {
            vault,
            rules: RwLock::new(rules),
            state: RwLock::new(CacheState::default()),
            on_invalidate: EventEmitter::new(),
        })
    }

    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    /// Fired whenever a path's identity changes
    pub fn on_invalidate(&self) -> &EventEmitter<CacheInvalidation> {
        &self.on_invalidate
    }

    /// Current identity for a path
    pub fn get(&self, path: &str) -> Option<Arc<Identity>> {
        self.state.read().entries.get(path).cloned()
    }

    /// Whether a token belongs to a path's current identity
    pub fn is_current(&self, token: IdentityToken) -> bool {
        self.state.read().current.contains(&token)
    }

    /// Cached paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.state.read().entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Replace the preloading rules and rebuild the snapshot
    pub async fn set_rules(&self, rules: PathRules) {
        *self.rules.write() = rules;
        self.rebuild().await;
    }

    /// Re-scan the vault, caching every file and dropping vanished ones
    pub async fn rebuild(&self) {
        let files = self.vault.files();
        let listed: HashSet<&str> = files.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .state
            .read()
            .entries
            .keys()
            .filter(|path| !listed.contains(path.as_str()))
            .cloned()
            .collect();
        for path in stale {
            self.uncache(&path);
        }
        for path in &files {
            if let Err(e) = self.cache(path).await {
                warn!("failed to cache {path}: {e}");
            }
        }
        debug!(files = files.len(), "file cache rebuilt");
    }

    /// Cache the current version of a file under a fresh identity
    pub async fn cache(&self, path: &str) -> Result<Arc<Identity>> {
        let preload = self.rules.read().test(path);
        let content = if preload {
            Some(Arc::from(self.vault.cached_read(path).await?))
        } else {
            None
        };
        let identity = Arc::new(Identity {
            token: IdentityToken::fresh(),
            path: path.to_string(),
            content,
        });
        let previous = {
            let mut state = self.state.write();
            let previous = state.entries.insert(path.to_string(), Arc::clone(&identity));
            if let Some(previous) = &previous {
                state.current.remove(&previous.token);
            }
            state.current.insert(identity.token);
            previous
        };
        self.on_invalidate.emit(&CacheInvalidation {
            path: path.to_string(),
            previous,
            current: Some(Arc::clone(&identity)),
        });
        Ok(identity)
    }

    /// Drop a path from the cache
    pub fn uncache(&self, path: &str) -> Option<Arc<Identity>> {
        let previous = {
            let mut state = self.state.write();
            let previous = state.entries.remove(path)?;
            state.current.remove(&previous.token);
            previous
        };
        self.on_invalidate.emit(&CacheInvalidation {
            path: path.to_string(),
            previous: Some(Arc::clone(&previous)),
            current: None,
        });
        Some(previous)
    }

    /// Apply a vault change
    pub async fn handle_event(&self, event: VaultEvent) {
        match event {
            VaultEvent::Create(path) | VaultEvent::Modify(path) => {
                if self.vault.is_file(&path) {
                    if let Err(e) = self.cache(&path).await {
                        warn!("failed to cache {path}: {e}");
                    }
                }
            }
            VaultEvent::Delete(path) => {
                self.uncache(&path);
            }
            VaultEvent::Rename { from, to } => {
                self.uncache(&from);
                if self.vault.is_file(&to) {
                    if let Err(e) = self.cache(&to).await {
                        warn!("failed to cache {to}: {e}");
                    }
                }
            }
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Resolvers backed by vault files
//!
//! A [`FileResolve`] turns a specifier into a vault path through its
//! [`PathStrategy`], looks the path up in the [`FileCache`] and runs the
//! content through the transpiler chain. Transpiled code is kept per path
//! together with the identities of the files the module depended on the
//! last time it was evaluated; if any of those identities has since been
//! replaced, the code is recomputed and the module is reported uncached.

use super::links::LinkIndex;
use super::{Resolve, Resolved, TrackedIds};
use crate::context::Context;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::file_cache::{CacheInvalidation, FileCache, Identity, IdentityToken};
use crate::links::{link_path, parse_markdown_link, parse_wikilink};
use crate::paths::{parse_path, working_directory};
use crate::transpile::{Source, Transpile};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Maps a specifier to a vault path
pub trait PathStrategy: Send + Sync + 'static {
    fn resolve_path(&self, id: &str, context: &Context) -> Option<String>;
}

/// Paths relative to the innermost working directory
pub struct RelativePathStrategy;

impl PathStrategy for RelativePathStrategy {
    fn resolve_path(&self, id: &str, context: &Context) -> Option<String> {
        Some(parse_path(&format!("{}/{id}", context.cwd().unwrap_or(""))))
    }
}

/// Paths from the vault root
pub struct VaultPathStrategy;

impl PathStrategy for VaultPathStrategy {
    fn resolve_path(&self, id: &str, _context: &Context) -> Option<String> {
        Some(parse_path(id))
    }
}

/// `[[wikilink]]` specifiers
pub struct WikilinkStrategy {
    links: Arc<dyn LinkIndex>,
}

impl WikilinkStrategy {
    pub fn new(links: Arc<dyn LinkIndex>) -> Self {
        Self { links }
    }
}

impl PathStrategy for WikilinkStrategy {
    fn resolve_path(&self, id: &str, context: &Context) -> Option<String> {
        let link = parse_wikilink(id)?;
        self.links
            .first_link_path_dest(link_path(&link.path), context.cwd().unwrap_or(""))
    }
}

/// `[text](path)` specifiers
pub struct MarkdownLinkStrategy {
    links: Arc<dyn LinkIndex>,
}

impl MarkdownLinkStrategy {
    pub fn new(links: Arc<dyn LinkIndex>) -> Self {
        Self { links }
    }
}

impl PathStrategy for MarkdownLinkStrategy {
    fn resolve_path(&self, id: &str, context: &Context) -> Option<String> {
        let link = parse_markdown_link(id)?;
        self.links
            .first_link_path_dest(link_path(&link.path), context.cwd().unwrap_or(""))
    }
}

struct Entry {
    identity: IdentityToken,
    /// CommonJS output of the synchronous chain
    code: Option<String>,
    /// Output of the asynchronous chain
    acode: Option<String>,
    dependencies: HashSet<IdentityToken>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Identities each transpiler (by chain position) produced output for
    transpiled: HashMap<usize, HashSet<IdentityToken>>,
}

/// Resolver for vault files located by a [`PathStrategy`]
pub struct FileResolve<S: PathStrategy> {
    strategy: S,
    cache: Arc<FileCache>,
    transpiles: Vec<Arc<dyn Transpile>>,
    tracked: TrackedIds,
    state: Mutex<State>,
}

impl<S: PathStrategy> FileResolve<S> {
    /// Create a resolver and subscribe it to cache and transpiler notices
    pub fn new(strategy: S, cache: Arc<FileCache>, transpiles: Vec<Arc<dyn Transpile>>) -> Arc<Self> {
        let resolve = Arc::new(Self {
            strategy,
            cache: Arc::clone(&cache),
            transpiles,
            tracked: TrackedIds::default(),
            state: Mutex::new(State::default()),
        });

        let weak = Arc::downgrade(&resolve);
        cache.on_invalidate().listen(move |event: &CacheInvalidation| {
            if let Some(resolve) = weak.upgrade() {
                resolve.file_changed(event);
            }
        });
        for (index, transpile) in resolve.transpiles.iter().enumerate() {
            let weak: Weak<Self> = Arc::downgrade(&resolve);
            transpile.on_invalidate().listen(move |_| {
                if let Some(resolve) = weak.upgrade() {
                    resolve.transpiler_changed(index);
                }
            });
        }
        resolve
    }

    fn file_changed(&self, event: &CacheInvalidation) {
        self.state.lock().entries.remove(&event.path);
        if let Some(previous) = &event.previous {
            self.forget_identity(previous.token());
        }
        self.tracked.invalidate(&event.path, true);
    }

    fn transpiler_changed(&self, index: usize) {
        let (stale, tokens) = {
            let mut state = self.state.lock();
            let Some(tokens) = state.transpiled.remove(&index) else {
                return;
            };
            let paths: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| tokens.contains(&entry.identity))
                .map(|(path, _)| path.clone())
                .collect();
            for path in &paths {
                state.entries.remove(path);
            }
            (paths, tokens)
        };
        // outputs chained through other transpilers are keyed by the same identity
        for token in tokens {
            for transpile in &self.transpiles {
                transpile.invalidate(token);
            }
        }
        for path in stale {
            self.tracked.invalidate(&path, true);
        }
    }

    fn forget_identity(&self, token: IdentityToken) {
        {
            let mut state = self.state.lock();
            for tokens in state.transpiled.values_mut() {
                tokens.remove(&token);
            }
        }
        for transpile in &self.transpiles {
            transpile.invalidate(token);
        }
    }

    /// Cached code for an identity and whether a dependency went stale
    fn lookup(&self, identity: &Identity, asynchronous: bool) -> (Option<String>, bool) {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get(identity.path()) else {
            return (None, false);
        };
        if entry.identity != identity.token() {
            return (None, false);
        }
        if !entry
            .dependencies
            .iter()
            .all(|token| self.cache.is_current(*token))
        {
            state.entries.remove(identity.path());
            return (None, true);
        }
        let code = if asynchronous { &entry.acode } else { &entry.code };
        (code.clone(), false)
    }

    fn store(&self, identity: &Identity, code: &str, asynchronous: bool) {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(identity.path().to_string())
            .or_insert_with(|| Entry {
                identity: identity.token(),
                code: None,
                acode: None,
                dependencies: HashSet::new(),
            });
        if entry.identity != identity.token() {
            *entry = Entry {
                identity: identity.token(),
                code: None,
                acode: None,
                dependencies: HashSet::new(),
            };
        }
        let slot = if asynchronous { &mut entry.acode } else { &mut entry.code };
        *slot = Some(code.to_string());
    }

    fn source(content: &str, path: &str, identity: Option<IdentityToken>) -> Source {
        let source = Source::new(content).with_path(path);
        match identity {
            Some(identity) => source.with_identity(identity),
            None => source,
        }
    }

    fn note_transpiled(&self, index: usize, identity: Option<IdentityToken>) {
        if let Some(identity) = identity {
            self.state
                .lock()
                .transpiled
                .entry(index)
                .or_default()
                .insert(identity);
        }
    }

    fn transpile(&self, source: &Source) -> Result<String> {
        for (index, transpile) in self.transpiles.iter().enumerate() {
            if let Some(code) = transpile.transpile(source)? {
                self.note_transpiled(index, source.identity);
                return Ok(code);
            }
        }
        Ok(source.content.to_string())
    }

    async fn atranspile(&self, source: &Source) -> Result<String> {
        for (index, transpile) in self.transpiles.iter().enumerate() {
            if let Some(code) = transpile.atranspile(source).await? {
                self.note_transpiled(index, source.identity);
                return Ok(code);
            }
        }
        Ok(source.content.to_string())
    }

    fn resolved(path: String, code: String, cache: bool) -> Resolved {
        let cwd = working_directory(&path);
        Resolved::new(path, code).with_cwd(cwd).with_cache(cache)
    }
}

#[async_trait]
impl<S: PathStrategy> Resolve for FileResolve<S> {
    fn resolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        self.tracked.validate(id);
        let Some(path) = self.strategy.resolve_path(id, context) else {
            return Ok(None);
        };
        let Some(identity) = self.cache.get(&path) else {
            return Ok(None);
        };
        let Some(content) = identity.content() else {
            debug!("{path} is not preloaded and cannot be required synchronously");
            return Ok(None);
        };
        self.tracked.validate(&path);

        let (cached, stale) = self.lookup(&identity, false);
        let code = match cached {
            Some(code) => code,
            None => {
                if stale {
                    self.forget_identity(identity.token());
                }
                let code = self.transpile(&Self::source(content, &path, Some(identity.token())))?;
                self.store(&identity, &code, false);
                code
            }
        };
        Ok(Some(Self::resolved(path, code, !stale)))
    }

    async fn aresolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        self.tracked.validate(id);
        let Some(path) = self.strategy.resolve_path(id, context) else {
            return Ok(None);
        };
        let Some(identity) = self.cache.get(&path) else {
            let content = match self.cache.vault().read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    debug!("cannot read {path}: {e}");
                    return Ok(None);
                }
            };
            self.tracked.validate(&path);
            let code = self.atranspile(&Self::source(&content, &path, None)).await?;
            return Ok(Some(Self::resolved(path, code, false)));
        };
        self.tracked.validate(&path);

        let (cached, stale) = self.lookup(&identity, true);
        if let Some(code) = cached {
            return Ok(Some(Self::resolved(path, code, true)));
        }
        if stale {
            self.forget_identity(identity.token());
        }
        let content: Arc<str> = match identity.content() {
            Some(content) => Arc::clone(content),
            None => match self.cache.vault().cached_read(&path).await {
                Ok(content) => Arc::from(content),
                Err(e) => {
                    debug!("cannot read {path}: {e}");
                    return Ok(None);
                }
            },
        };
        let code = self
            .atranspile(&Self::source(&content, &path, Some(identity.token())))
            .await?;
        if !self.cache.is_current(identity.token()) {
            // replaced while compiling; its outputs were keyed after the file change dropped them
            self.forget_identity(identity.token());
            return Ok(Some(Self::resolved(path, code, false)));
        }
        self.store(&identity, &code, true);
        Ok(Some(Self::resolved(path, code, !stale)))
    }

    fn invalidate(&self, id: &str) {
        self.tracked.invalidate(id, false);
        self.state.lock().entries.remove(id);
        if let Some(identity) = self.cache.get(id) {
            self.forget_identity(identity.token());
        }
    }

    fn invalidate_all(&self) {
        self.tracked.invalidate_all(false);
        let tokens: HashSet<IdentityToken> = {
            let mut state = self.state.lock();
            let mut tokens: HashSet<IdentityToken> =
                state.entries.drain().map(|(_, entry)| entry.identity).collect();
            for (_, produced) in state.transpiled.drain() {
                tokens.extend(produced);
            }
            tokens
        };
        for token in tokens {
            for transpile in &self.transpiles {
                transpile.invalidate(token);
            }
        }
    }

    fn on_invalidate(&self) -> &EventEmitter<String> {
        self.tracked.on_invalidate()
    }

    fn record_dependency(&self, parent: &str, dependency: &str) {
        let Some(identity) = self.cache.get(dependency) else {
            return;
        };
        if let Some(entry) = self.state.lock().entries.get_mut(parent) {
            entry.dependencies.insert(identity.token());
        }
    }
}

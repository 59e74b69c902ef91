// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module resolution
//!
//! A resolver maps a specifier and the current [`Context`] to a canonical
//! id plus code. Resolvers are composed into an ordered chain where the
//! first match wins:
//!
//! 1. host-native modules
//! 2. paths relative to the current working directory
//! 3. vault-absolute paths
//! 4. `[[wikilinks]]`
//! 5. `[markdown](links)`
//! 6. `http(s)` URLs

mod composite;
mod external;
mod file;
mod internal;
mod links;

pub use composite::CompositeResolve;
pub use external::{ExternalLinkResolve, normalize_url};
pub use file::{
    FileResolve, MarkdownLinkStrategy, PathStrategy, RelativePathStrategy, VaultPathStrategy,
    WikilinkStrategy,
};
pub use internal::{BuiltinModules, InternalModulesResolve, NativeModules};
pub use links::{LinkIndex, VaultLinkIndex};

use crate::context::Context;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;

/// A successfully resolved module
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Canonical id
    pub id: String,
    pub code: String,
    /// Ready-to-run CommonJS body; skips the syntax check when present
    pub compiled_sync_code: Option<String>,
    /// `false` asks the loader to drop any cached evaluation of `id`
    pub cache: bool,
    /// Pre-built value returned as-is instead of evaluating `code`
    pub value: Option<Value>,
    /// Working directory pushed while the module evaluates
    pub cwd: Option<String>,
}

impl Resolved {
    pub fn new(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            compiled_sync_code: None,
            cache: true,
            value: None,
            cwd: None,
        }
    }

    /// A host-provided value
    pub fn native(id: impl Into<String>, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::new(id, "")
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_compiled_sync_code(mut self, code: impl Into<String>) -> Self {
        self.compiled_sync_code = Some(code.into());
        self
    }
}

/// Maps specifiers to modules
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve synchronously; `Ok(None)` when this resolver does not apply
    fn resolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>>;

    /// Resolve, allowing I/O
    async fn aresolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>>;

    /// Forget an id without notifying listeners
    fn invalidate(&self, id: &str);

    /// Forget every id without notifying listeners
    fn invalidate_all(&self);

    /// Fired with an id whose resolution may have changed
    fn on_invalidate(&self) -> &EventEmitter<String>;

    /// Record that module `parent` loaded module `dependency`
    ///
    /// Resolvers that cache code use this to notice when a dependency's
    /// underlying file changed identity.
    fn record_dependency(&self, _parent: &str, _dependency: &str) {}
}

/// Set of ids a resolver has answered for
///
/// Only tracked ids produce invalidation notices, so changes to files nobody
/// asked for stay silent.
#[derive(Default)]
pub(crate) struct TrackedIds {
    ids: Mutex<HashSet<String>>,
    on_invalidate: EventEmitter<String>,
}

impl TrackedIds {
    pub(crate) fn validate(&self, id: &str) {
        let mut ids = self.ids.lock();
        if !ids.contains(id) {
            ids.insert(id.to_string());
        }
    }

    /// Stop tracking `id`, optionally notifying listeners
    pub(crate) fn invalidate(&self, id: &str, emit: bool) -> bool {
        let removed = self.ids.lock().remove(id);
        if removed && emit {
            self.on_invalidate.emit(&id.to_string());
        }
        removed
    }

    /// Stop tracking every id, returning them
    pub(crate) fn invalidate_all(&self, emit: bool) -> Vec<String> {
        let ids: Vec<String> = self.ids.lock().drain().collect();
        if emit {
            for id in &ids {
                self.on_invalidate.emit(id);
            }
        }
        ids
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.ids.lock().iter().cloned().collect()
    }

    pub(crate) fn on_invalidate(&self) -> &EventEmitter<String> {
        &self.on_invalidate
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source-to-source transpilers applied to vault files before evaluation
//!
//! Transpilers form a chain: the first one returning `Some` wins and the
//! untouched content is used when none applies. Results are cached per
//! [`IdentityToken`], so a new file version always transpiles afresh.

mod header;
mod markdown;
mod typescript;

pub use header::ContentHeader;
pub use markdown::MarkdownTranspile;
pub use typescript::{CommandCompiler, CompileRequest, ModuleKind, TypeScriptCompiler, TypeScriptTranspile};

use crate::error::Result;
use crate::events::EventEmitter;
use crate::file_cache::IdentityToken;
use async_trait::async_trait;
use std::sync::Arc;

/// Input to a transpiler
#[derive(Debug, Clone)]
pub struct Source {
    pub content: Arc<str>,
    /// Vault path, when the content comes from a file
    pub path: Option<String>,
    /// Cache key; uncached sources are transpiled every time
    pub identity: Option<IdentityToken>,
}

impl Source {
    pub fn new(content: impl Into<Arc<str>>) -> Self {
        Self {
            content: content.into(),
            path: None,
            identity: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_identity(mut self, identity: IdentityToken) -> Self {
        self.identity = Some(identity);
        self
    }

    pub(crate) fn extension(&self) -> &str {
        self.path.as_deref().map(crate::paths::extension).unwrap_or("")
    }

    pub(crate) fn with_content(&self, content: impl Into<Arc<str>>) -> Self {
        Self {
            content: content.into(),
            path: self.path.clone(),
            identity: self.identity,
        }
    }
}

/// A source-to-source transformation
#[async_trait]
pub trait Transpile: Send + Sync {
    /// Fired when every previously produced output may be stale
    fn on_invalidate(&self) -> &EventEmitter<()>;

    /// Transform synchronously; `None` when the transpiler does not apply
    fn transpile(&self, source: &Source) -> Result<Option<String>>;

    /// Transform, offloading heavy work to the worker pool
    async fn atranspile(&self, source: &Source) -> Result<Option<String>>;

    /// Drop cached output for an identity
    fn invalidate(&self, identity: IdentityToken);
}

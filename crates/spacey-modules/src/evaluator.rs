// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Boundary to the script engine that actually runs module code
//!
//! The loader decides *what* runs and caches the results; an [`Evaluator`]
//! decides *how*. Scripts run synchronously as a CommonJS function body,
//! modules run asynchronously and produce a namespace object.

use crate::error::Result;
use crate::require::Require;
use crate::value::{Object, Value};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Bindings of a CommonJS function body
pub struct ScriptScope<'a> {
    /// Canonical id of the module
    pub id: &'a str,
    pub code: &'a str,
    /// Module record; its `exports` property is the result
    pub module: &'a Object,
    /// Initial `module.exports`
    pub exports: Value,
    pub process: &'a Object,
    pub app: &'a Value,
    /// Loader serving nested `require` calls
    pub require: &'a Arc<Require>,
}

/// An ES module to load
pub struct ModuleSource {
    /// Canonical id of the module
    pub id: String,
    pub code: String,
    /// Code prepended to the module to provide CommonJS bindings
    ///
    /// When present the namespace must export the `module` record the
    /// prelude declares.
    pub prelude: Option<String>,
    pub process: Object,
    pub app: Value,
    pub require: Arc<Require>,
}

/// A script engine
pub trait Evaluator: Send + Sync {
    /// Syntax check of a script body; hashbangs are allowed, top-level
    /// `await` and `import` are not
    fn check_script(&self, id: &str, code: &str) -> Result<()>;

    /// Run a CommonJS body to completion
    fn run_script(&self, scope: ScriptScope<'_>) -> Result<()>;

    /// Load and link an ES module, resolving to its namespace object
    fn run_module(&self, source: ModuleSource) -> BoxFuture<'static, Result<Object>>;
}

/// Prelude giving an ES module the CommonJS bindings `module`, `exports`,
/// `process` and `app`
pub fn common_js_prelude(require_name: &str) -> String {
    let name = serde_json::to_string(require_name).unwrap_or_else(|_| "\"require\"".to_string());
    [
        "export let module={exports:Object.defineProperty({},Symbol.toStringTag,{configurable:!0,enumerable:!1,value:\"Module\",writable:!0})}",
        "let{exports}=module",
        "let{process}=self;process??={env:{NODE_DEV:\"production\"}}",
        &format!("let{{app}}=self[{name}]"),
        "",
    ]
    .join(";")
}

/// Append a `sourceURL` trailer naming the module in stack traces
pub fn attach_source_url(code: &str, id: &str, source_root: &str) -> String {
    let separator = if source_root.is_empty() || source_root.ends_with('/') {
        ""
    } else {
        "/"
    };
    format!("{code}\n//# sourceURL={source_root}{separator}{id}")
}

/// Default `process` object: `{ env: { NODE_DEV: "production" } }`
pub fn default_process() -> Object {
    let env = Object::from_entries([("NODE_DEV", "production")]);
    Object::from_entries([("env", env)])
}

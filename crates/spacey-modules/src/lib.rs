// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-modules
//!
//! Module loading for scripts that live in a notes vault.
//!
//! Notes and script files are resolved by relative path, vault path,
//! `[[wikilink]]`, `[markdown](link)` or `http(s)` URL, transpiled
//! (Markdown code blocks, TypeScript) and evaluated through a pluggable
//! script [`Evaluator`]. Evaluations are cached per module and invalidated
//! transitively when a file they depend on changes.
//!
//! - `require(id)` loads CommonJS synchronously
//! - `require.import(id)` loads ES modules, optionally with CommonJS interop
//! - remote modules have their own `require(...)` calls rewritten so nested
//!   requires resolve through the same loader
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_modules::{DirectoryVault, ModuleHost, RequireOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let vault = Arc::new(DirectoryVault::open("notes")?);
//!     let host = ModuleHost::builder(vault, Arc::new(MyEvaluator)).build()?;
//!     host.start().await;
//!     let require = host.require().expect("main realm");
//!     let exports = require.require("scripts/hello.js", RequireOptions::default())?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod fetch;
pub mod file_cache;
pub mod hooks;
pub mod host;
pub mod links;
pub mod paths;
pub mod pool;
pub mod registry;
pub mod require;
pub mod resolve;
pub mod rewrite;
pub mod rules;
pub mod settings;
pub mod startup;
pub mod transpile;
pub mod value;
pub mod vault;

// Re-exports
pub use context::{Context, CwdGuard};
pub use error::{ModuleError, Result};
pub use evaluator::{Evaluator, ModuleSource, ScriptScope};
pub use events::{EventEmitter, ListenerId};
pub use hooks::{CwdInterceptor, Disposer, HookCall, Hooks, Interceptor};
pub use host::{ModuleHost, ModuleHostBuilder};
pub use registry::{RealmId, Requires};
pub use require::{ImportOptions, ModuleFacade, Require, RequireBuilder, RequireOptions};
pub use resolve::{Resolve, Resolved};
pub use settings::{Settings, SharedSettings};
pub use startup::StartupModules;
pub use value::{Function, Object, PropertyDescriptor, PropertyKey, Symbol, Value};
pub use vault::{DirectoryVault, MemoryVault, Vault, VaultEvent};

/// Version of the spacey-modules crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

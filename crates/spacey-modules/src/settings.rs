// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader settings
//!
//! Settings are read from a TOML file; every field is optional and falls
//! back to its default.
//!
//! ```toml
//! require_name = "require"
//! enable_external_links = true
//! preloading_rules = ['+/\.m?[jt]s(?:\.md)?$/iu', '-archive/**']
//! import_timeout = 5
//! ```

use crate::error::{ModuleError, Result};
use crate::rules::PathRules;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared between the host and its resolvers
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name under which the require facility is installed in each realm
    pub require_name: String,
    /// Whether host-native modules may be required
    pub expose_internal_modules: bool,
    /// Whether `http(s)` specifiers are fetched
    pub enable_external_links: bool,
    /// Rules selecting vault files whose content is read ahead of time
    pub preloading_rules: Vec<String>,
    /// Remote modules fetched at startup
    pub preloaded_external_links: Vec<String>,
    /// Fenced code block languages extracted from Markdown files
    pub markdown_code_block_languages_to_load: Vec<String>,
    /// Seconds before an asynchronous import times out; 0 disables it
    pub import_timeout: f64,
    /// Modules imported and invoked at startup
    pub startup_modules: Vec<String>,
    /// Whether invalidated startup modules are reloaded
    pub auto_reload_startup_modules: bool,
    /// Size of the blocking worker pool used for transpilation
    pub worker_threads: usize,
    /// Maximum concurrent network requests
    pub fetch_concurrency: usize,
    /// External TypeScript compiler command; `{format}` expands to `cjs` or `esm`
    pub typescript_command: Vec<String>,
    /// Prefix of the `sourceURL` trailer appended to evaluated code
    pub source_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            require_name: "require".to_string(),
            expose_internal_modules: true,
            enable_external_links: false,
            preloading_rules: vec![r"+/\.m?[jt]s(?:\.md)?$/iu".to_string()],
            preloaded_external_links: Vec::new(),
            markdown_code_block_languages_to_load: ["JS", "TS", "JavaScript", "TypeScript"]
                .into_iter()
                .map(String::from)
                .collect(),
            import_timeout: 10.0,
            startup_modules: Vec::new(),
            auto_reload_startup_modules: true,
            worker_threads: num_cpus::get().clamp(1, 4),
            fetch_concurrency: 4,
            typescript_command: Vec::new(),
            source_root: "vault://".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| ModuleError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| ModuleError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the loader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.require_name.is_empty() {
            return Err(ModuleError::Config("require_name must not be empty".into()));
        }
        if !self.import_timeout.is_finite() || self.import_timeout < 0.0 {
            return Err(ModuleError::Config(format!(
                "import_timeout must be a non-negative number of seconds, got {}",
                self.import_timeout
            )));
        }
        PathRules::parse(&self.preloading_rules)?;
        Ok(())
    }

    /// Compiled preloading rules
    pub fn preloading_rules(&self) -> Result<PathRules> {
        PathRules::parse(&self.preloading_rules)
    }

    /// Import timeout, `None` when disabled
    pub fn import_timeout(&self) -> Option<Duration> {
        (self.import_timeout > 0.0).then(|| Duration::from_secs_f64(self.import_timeout))
    }

    /// Whether a fenced code block language is extracted from Markdown
    pub fn loads_code_block_language(&self, language: &str) -> bool {
        self.markdown_code_block_languages_to_load
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(language))
    }

    /// Wrap into a shared handle
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use std::sync::Arc;
use thiserror::Error;

/// Result type for module loader operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors that can occur while resolving, transpiling or evaluating modules
///
/// Errors are cloneable so that a failed evaluation can be cached and
/// rethrown to every later caller of the same module.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// No resolver produced a module for the specifier
    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),

    /// Module code failed the syntax check
    #[error("SyntaxError in '{id}': {message}")]
    Syntax {
        /// Canonical module id
        id: String,
        /// Diagnostic from the evaluator
        message: String,
    },

    /// Module body threw while running
    #[error("Error evaluating '{id}': {message}")]
    Evaluation {
        /// Canonical module id
        id: String,
        /// Error message
        message: String,
    },

    /// TypeScript compilation failed
    #[error("Transpilation failed:\n{0}")]
    Transpile(String),

    /// Remote module could not be fetched
    #[error("Network error fetching '{url}': {reason}")]
    Network {
        /// Requested URL
        url: String,
        /// Reason for failure
        reason: String,
    },

    /// Asynchronous evaluation exceeded the import timeout
    #[error("Timed out importing '{id}' after {seconds}s")]
    Timeout {
        /// Canonical module id
        id: String,
        /// Configured timeout
        seconds: f64,
    },

    /// File system error
    #[error("File system error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid settings or path rules
    #[error("Configuration error: {0}")]
    Config(String),

    /// Type error (wrong value type)
    #[error("TypeError: {0}")]
    TypeError(String),
}

impl ModuleError {
    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a module not found error
    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound(module.into())
    }

    /// Create an evaluation error for a module
    pub fn evaluation(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a syntax error for a module
    pub fn syntax(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is an import timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

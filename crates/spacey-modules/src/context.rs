// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Resolution context: the working-directory and parent-module stacks

use parking_lot::Mutex;
use std::sync::Arc;

/// Snapshot of the loader's stacks, handed to resolvers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// Working directories; `None` entries mark modules without one
    pub cwds: Vec<Option<String>>,
    /// Canonical ids of modules currently being evaluated
    pub parents: Vec<String>,
}

impl Context {
    /// Innermost working directory
    pub fn cwd(&self) -> Option<&str> {
        self.cwds.last().and_then(|cwd| cwd.as_deref())
    }

    /// Innermost module being evaluated
    pub fn parent(&self) -> Option<&str> {
        self.parents.last().map(String::as_str)
    }
}

/// Pops everything it pushed when dropped, on success and failure alike
pub(crate) struct ContextGuard {
    context: Arc<Mutex<Context>>,
    cwds: usize,
    parents: usize,
}

impl ContextGuard {
    pub(crate) fn new(context: Arc<Mutex<Context>>) -> Self {
        Self {
            context,
            cwds: 0,
            parents: 0,
        }
    }

    pub(crate) fn push_cwd(&mut self, cwd: Option<String>) {
        self.context.lock().cwds.push(cwd);
        self.cwds += 1;
    }

    pub(crate) fn push_parent(&mut self, id: String) {
        self.context.lock().parents.push(id);
        self.parents += 1;
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let mut context = self.context.lock();
        for _ in 0..self.cwds {
            context.cwds.pop();
        }
        for _ in 0..self.parents {
            context.parents.pop();
        }
    }
}

/// Working directory pushed for the lifetime of the guard
///
/// Returned by [`crate::Require::enter_cwd`] for host integrations that run
/// code on behalf of a particular note.
pub struct CwdGuard {
    _inner: ContextGuard,
}

impl CwdGuard {
    pub(crate) fn new(context: Arc<Mutex<Context>>, cwd: Option<String>) -> Self {
        let mut inner = ContextGuard::new(context);
        inner.push_cwd(cwd);
        Self { _inner: inner }
    }
}

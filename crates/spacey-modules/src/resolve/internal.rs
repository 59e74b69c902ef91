// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host-native modules

use super::{Resolve, Resolved, TrackedIds};
use crate::context::Context;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::settings::SharedSettings;
use crate::value::Value;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Source of modules provided by the host rather than the vault
pub trait NativeModules: Send + Sync {
    /// Value of a native module, `None` when unknown
    fn load(&self, id: &str) -> Option<Value>;
}

/// Registry of native modules
#[derive(Default)]
pub struct BuiltinModules {
    modules: DashMap<String, Value>,
}

impl BuiltinModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a module
    pub fn register(&self, id: impl Into<String>, value: Value) {
        self.modules.insert(id.into(), value);
    }

    pub fn unregister(&self, id: &str) -> Option<Value> {
        self.modules.remove(id).map(|(_, value)| value)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.modules.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl NativeModules for BuiltinModules {
    fn load(&self, id: &str) -> Option<Value> {
        self.modules.get(id).map(|entry| entry.value().clone())
    }
}

/// Resolves host-native modules when `expose_internal_modules` is on
pub struct InternalModulesResolve {
    natives: Arc<dyn NativeModules>,
    settings: SharedSettings,
    tracked: TrackedIds,
}

impl InternalModulesResolve {
    pub fn new(natives: Arc<dyn NativeModules>, settings: SharedSettings) -> Self {
        Self {
            natives,
            settings,
            tracked: TrackedIds::default(),
        }
    }

    /// Re-announce every answered id, e.g. after the exposure setting changed
    pub fn refresh(&self) {
        self.tracked.invalidate_all(true);
    }

    fn lookup(&self, id: &str) -> Option<Resolved> {
        self.tracked.validate(id);
        if !self.settings.read().expose_internal_modules {
            return None;
        }
        match self.natives.load(id) {
            Some(value) => Some(Resolved::native(id, value)),
            None => {
                debug!("{id} is not a native module");
                None
            }
        }
    }
}

#[async_trait]
impl Resolve for InternalModulesResolve {
    fn resolve(&self, id: &str, _context: &Context) -> Result<Option<Resolved>> {
        Ok(self.lookup(id))
    }

    async fn aresolve(&self, id: &str, _context: &Context) -> Result<Option<Resolved>> {
        Ok(self.lookup(id))
    }

    fn invalidate(&self, id: &str) {
        self.tracked.invalidate(id, false);
    }

    fn invalidate_all(&self) {
        self.tracked.invalidate_all(false);
    }

    fn on_invalidate(&self) -> &EventEmitter<String> {
        self.tracked.on_invalidate()
    }
}

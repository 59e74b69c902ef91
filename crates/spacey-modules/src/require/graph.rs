// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache, alias table and dependency graph of a [`super::Require`]

use crate::error::{ModuleError, Result};
use crate::value::{Object, Value};
use futures::future::{BoxFuture, Shared};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// An import shared by every caller that asks while it is in flight
pub(crate) type PendingImport = Shared<BoxFuture<'static, Result<Value>>>;

/// State of the CommonJS slot
#[derive(Clone)]
pub(crate) enum CommonJsSlot {
    /// Constant value, e.g. a native module
    Value(Value),
    /// Module record; `module.exports` is read on every access so circular
    /// requires see the exports object as it is being filled in
    Module(Object),
    /// Evaluation threw; the error is rethrown to later callers
    Failed(ModuleError),
}

impl CommonJsSlot {
    pub(crate) fn get(&self) -> Result<Value> {
        match self {
            CommonJsSlot::Value(value) => Ok(value.clone()),
            CommonJsSlot::Module(module) => Ok(module.get("exports")),
            CommonJsSlot::Failed(e) => Err(e.clone()),
        }
    }
}

/// Lazily filled evaluations of one canonical id
#[derive(Default, Clone)]
pub(crate) struct ModuleCache {
    pub(crate) common_js: Option<CommonJsSlot>,
    pub(crate) es_module: Option<PendingImport>,
    pub(crate) es_module_with_common_js: Option<PendingImport>,
}

impl ModuleCache {
    pub(crate) fn import_slot(&mut self, common_js_interop: bool) -> &mut Option<PendingImport> {
        if common_js_interop {
            &mut self.es_module_with_common_js
        } else {
            &mut self.es_module
        }
    }
}

#[derive(Default)]
pub(crate) struct ModuleGraph {
    pub(crate) cache: HashMap<String, ModuleCache>,
    /// Raw specifier to canonical id
    pub(crate) aliased: HashMap<String, String>,
    /// Canonical id to the raw specifiers currently aliasing it
    pub(crate) aliases: HashMap<String, BTreeSet<String>>,
    /// Module to the specifiers it required
    pub(crate) dependencies: HashMap<String, BTreeSet<String>>,
    /// Specifier to the modules that required it
    pub(crate) dependants: HashMap<String, BTreeSet<String>>,
}

impl ModuleGraph {
    /// Record that `parent` required `id`
    pub(crate) fn depend(&mut self, parent: &str, id: &str) {
        self.dependencies
            .entry(parent.to_string())
            .or_default()
            .insert(id.to_string());
        self.dependants
            .entry(id.to_string())
            .or_default()
            .insert(parent.to_string());
    }

    /// Alias `raw` to `canonical`, returning the previous canonical id when
    /// it changed
    pub(crate) fn alias(&mut self, raw: &str, canonical: &str) -> Option<String> {
        let previous = self.aliased.insert(raw.to_string(), canonical.to_string());
        self.aliases
            .entry(canonical.to_string())
            .or_insert_with(|| BTreeSet::from([canonical.to_string()]))
            .insert(raw.to_string());
        match previous {
            Some(previous) if previous != canonical => {
                if let Some(aliases) = self.aliases.get_mut(&previous) {
                    aliases.remove(raw);
                }
                Some(previous)
            }
            _ => None,
        }
    }

    pub(crate) fn slot(&mut self, canonical: &str) -> &mut ModuleCache {
        self.cache.entry(canonical.to_string()).or_default()
    }

    /// Evict `id` and everything that transitively required it
    ///
    /// Returns every visited id once, in visiting order.
    pub(crate) fn invalidate(&mut self, id: &str) -> Vec<String> {
        let canonical = self.aliased.get(id).map_or(id, String::as_str).to_string();
        let mut queue: VecDeque<String> = self.aliases_of(&canonical).into();
        let mut seen: HashSet<String> = HashSet::new();
        let mut order = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            self.cache.remove(&current);
            if let Some(dependencies) = self.dependencies.get_mut(&current) {
                for dependency in std::mem::take(dependencies) {
                    if let Some(dependants) = self.dependants.get_mut(&dependency) {
                        dependants.remove(&current);
                    }
                }
            }
            if let Some(dependants) = self.dependants.get(&current) {
                for dependant in dependants.clone() {
                    queue.extend(self.aliases_of(&dependant));
                }
            }
            order.push(current);
        }
        order
    }

    fn aliases_of(&self, id: &str) -> Vec<String> {
        match self.aliases.get(id) {
            Some(aliases) => aliases.iter().cloned().collect(),
            None => vec![id.to_string()],
        }
    }

    /// Forget everything, returning the ids that had cache entries
    pub(crate) fn clear(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.drain().map(|(id, _)| id).collect();
        ids.sort();
        self.aliased.clear();
        self.aliases.clear();
        self.dependencies.clear();
        self.dependants.clear();
        ids
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Per-realm registry of loaders
//!
//! Every execution realm (a window, a worker, a test harness) gets its own
//! [`Require`]. Realms are created, replaced and torn down explicitly.

use crate::require::{Require, RequireBuilder};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_REALM: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of an execution realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealmId(u64);

impl RealmId {
    /// Allocate a realm id never handed out before
    pub fn new() -> Self {
        Self(NEXT_REALM.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RealmId {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe map of realm to loader
#[derive(Default)]
pub struct Requires {
    requires: DashMap<RealmId, Arc<Require>>,
}

impl Requires {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and install the loader of `realm`
    ///
    /// When the realm already has a loader, the new one takes over its
    /// invalidation stream so existing listeners keep receiving events.
    pub fn install(&self, realm: RealmId, builder: RequireBuilder) -> Arc<Require> {
        let builder = match self.get(realm) {
            Some(previous) => {
                debug!("replacing loader of {realm:?}");
                builder.on_invalidate(Arc::clone(previous.on_invalidate()))
            }
            None => builder,
        };
        let require = builder.build();
        self.requires.insert(realm, Arc::clone(&require));
        require
    }

    pub fn get(&self, realm: RealmId) -> Option<Arc<Require>> {
        self.requires.get(&realm).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the loader of `realm`
    pub fn teardown(&self, realm: RealmId) -> Option<Arc<Require>> {
        self.requires.remove(&realm).map(|(_, require)| require)
    }

    /// Every realm with a loader, sorted
    pub fn realms(&self) -> Vec<RealmId> {
        let mut realms: Vec<RealmId> = self.requires.iter().map(|entry| *entry.key()).collect();
        realms.sort();
        realms
    }

    pub fn len(&self) -> usize {
        self.requires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::{ModuleError, Result};
    use crate::evaluator::{Evaluator, ModuleSource, ScriptScope};
    use crate::events::EventEmitter;
    use crate::resolve::{Resolve, Resolved};
    use crate::settings::Settings;
    use crate::value::{Object, Value};
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NoResolve {
        on_invalidate: EventEmitter<String>,
    }

    #[async_trait]
    impl Resolve for NoResolve {
        fn resolve(&self, _id: &str, _context: &Context) -> Result<Option<Resolved>> {
            Ok(None)
        }

        async fn aresolve(&self, _id: &str, _context: &Context) -> Result<Option<Resolved>> {
            Ok(None)
        }

        fn invalidate(&self, _id: &str) {}

        fn invalidate_all(&self) {}

        fn on_invalidate(&self) -> &EventEmitter<String> {
            &self.on_invalidate
        }
    }

    struct NoEvaluator;

    impl Evaluator for NoEvaluator {
        fn check_script(&self, _id: &str, _code: &str) -> Result<()> {
            Ok(())
        }

        fn run_script(&self, scope: ScriptScope<'_>) -> Result<()> {
            Err(ModuleError::evaluation(scope.id, "unsupported"))
        }

        fn run_module(&self, source: ModuleSource) -> BoxFuture<'static, Result<Object>> {
            Box::pin(async move { Err(ModuleError::evaluation(&source.id, "unsupported")) })
        }
    }

    fn builder() -> RequireBuilder {
        Require::builder(
            Arc::new(NoResolve::default()),
            Arc::new(NoEvaluator),
            Settings::default().shared(),
        )
    }

    #[test]
    fn test_realm_ids_are_unique() {
        assert_ne!(RealmId::new(), RealmId::new());
    }

    #[test]
    fn test_install_get_teardown() {
        let requires = Requires::new();
        let realm = RealmId::new();
        assert!(requires.get(realm).is_none());

        let require = requires.install(realm, builder());
        assert!(requires.get(realm).is_some_and(|r| Arc::ptr_eq(&r, &require)));
        assert_eq!(requires.realms(), vec![realm]);

        assert!(requires.teardown(realm).is_some());
        assert!(requires.is_empty());
        assert!(requires.teardown(realm).is_none());
    }

    #[test]
    fn test_replacement_keeps_invalidation_listeners() {
        let requires = Requires::new();
        let realm = RealmId::new();
        let first = requires.install(realm, builder().app(Value::from("first")));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        first.on_invalidate().listen(move |id: &String| sink.lock().push(id.clone()));

        let second = requires.install(realm, builder().app(Value::from("second")));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second.app(), Value::from("second"));
        assert!(Arc::ptr_eq(first.on_invalidate(), second.on_invalidate()));

        second.on_invalidate().emit(&"a.js".to_string());
        assert_eq!(*seen.lock(), vec!["a.js"]);
        assert_eq!(requires.len(), 1);
    }
}

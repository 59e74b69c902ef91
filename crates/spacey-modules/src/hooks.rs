// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Named extension points exposed by the host
//!
//! Integrations that evaluate code on behalf of a note (editors, previews,
//! templating) run through a hook point. Interceptors registered on that
//! point run before and after the call; [`CwdInterceptor`] uses this to
//! push the note's directory onto a loader's working-directory stack.

use crate::paths::working_directory;
use crate::registry::{RealmId, Requires};
use crate::require::Require;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A call passing through a hook point
#[derive(Debug, Clone, Copy)]
pub struct HookCall<'a> {
    pub point: &'a str,
    /// Vault path of the note the call acts for
    pub source_path: Option<&'a str>,
}

/// Before/after interceptor
pub trait Interceptor: Send + Sync {
    fn before(&self, call: &HookCall<'_>);

    /// Runs even when the intercepted call panics
    fn after(&self, call: &HookCall<'_>);
}

/// Registered interceptors by hook point
#[derive(Default)]
pub struct Hooks {
    next_id: AtomicU64,
    points: RwLock<HashMap<String, Vec<(u64, Arc<dyn Interceptor>)>>>,
}

impl Hooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install `interceptor` on `point`
    ///
    /// Dropping the returned [`Disposer`] leaves the interceptor installed.
    #[must_use = "the disposer is the only way to remove the interceptor"]
    pub fn register(self: &Arc<Self>, point: impl Into<String>, interceptor: Arc<dyn Interceptor>) -> Disposer {
        let point = point.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.points
            .write()
            .entry(point.clone())
            .or_default()
            .push((id, interceptor));
        Disposer {
            hooks: Arc::downgrade(self),
            point,
            id,
        }
    }

    /// Run `f` through `point`
    ///
    /// Interceptors run `before` in registration order and `after` in
    /// reverse order.
    pub fn run<T>(&self, call: HookCall<'_>, f: impl FnOnce() -> T) -> T {
        let interceptors: Vec<Arc<dyn Interceptor>> = self
            .points
            .read()
            .get(call.point)
            .map(|entries| entries.iter().map(|(_, i)| Arc::clone(i)).collect())
            .unwrap_or_default();
        for interceptor in &interceptors {
            interceptor.before(&call);
        }
        let _after = AfterGuard {
            call,
            interceptors,
        };
        f()
    }

    pub fn interceptor_count(&self, point: &str) -> usize {
        self.points.read().get(point).map_or(0, Vec::len)
    }

    fn remove(&self, point: &str, id: u64) -> bool {
        let mut points = self.points.write();
        let Some(entries) = points.get_mut(point) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            points.remove(point);
        }
        removed
    }
}

struct AfterGuard<'a> {
    call: HookCall<'a>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Drop for AfterGuard<'_> {
    fn drop(&mut self) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(&self.call);
        }
    }
}

/// Removes one registered interceptor
pub struct Disposer {
    hooks: Weak<Hooks>,
    point: String,
    id: u64,
}

impl Disposer {
    /// Uninstall the interceptor; false if it was already gone
    pub fn dispose(self) -> bool {
        self.hooks
            .upgrade()
            .is_some_and(|hooks| hooks.remove(&self.point, self.id))
    }
}

/// Pushes the directory of the calling note onto a realm's loader
pub struct CwdInterceptor {
    requires: Arc<Requires>,
    realm: RealmId,
    /// Loaders pushed onto, so `after` pops the same one even if the realm's
    /// loader was replaced in between
    pushed: Mutex<Vec<Option<Arc<Require>>>>,
}

impl CwdInterceptor {
    pub fn new(requires: Arc<Requires>, realm: RealmId) -> Self {
        Self {
            requires,
            realm,
            pushed: Mutex::new(Vec::new()),
        }
    }
}

impl Interceptor for CwdInterceptor {
    fn before(&self, call: &HookCall<'_>) {
        let require = self.requires.get(self.realm);
        if let Some(require) = &require {
            require.push_cwd(call.source_path.map(working_directory));
        }
        self.pushed.lock().push(require);
    }

    fn after(&self, _call: &HookCall<'_>) {
        if let Some(Some(require)) = self.pushed.lock().pop() {
            require.pop_cwd();
        }
    }
}

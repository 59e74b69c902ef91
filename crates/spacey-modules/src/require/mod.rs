// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader handed to evaluated code as `require`
//!
//! [`Require::require`] loads CommonJS synchronously, [`Require::import`]
//! loads ES modules asynchronously. Both resolve through one [`Resolve`]
//! chain, cache evaluations per canonical id, and record which module
//! required which so that invalidating a module also evicts everything that
//! was built on top of it.

mod graph;
mod interop;

pub use interop::ModuleFacade;

use crate::context::{Context, ContextGuard, CwdGuard};
use crate::error::{ModuleError, Result};
use crate::evaluator::{
    Evaluator, ModuleSource, ScriptScope, attach_source_url, common_js_prelude, default_process,
};
use crate::events::{EventEmitter, ListenerId};
use crate::resolve::{Resolve, Resolved};
use crate::settings::SharedSettings;
use crate::value::{Object, PropertyDescriptor, Symbol, Value};
use futures::future::{FutureExt, ready};
use graph::{CommonJsSlot, ModuleGraph, PendingImport};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Options of [`Require::require`]
#[derive(Debug, Clone, Default)]
pub struct RequireOptions {
    /// Working directory to resolve against instead of the current one
    pub cwd: Option<String>,
}

/// Options of [`Require::import`]
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Working directory to resolve against instead of the current one
    pub cwd: Option<String>,
    /// Give the module CommonJS bindings and return a [`ModuleFacade`]
    pub common_js_interop: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            common_js_interop: true,
        }
    }
}

/// Builder for [`Require`]
pub struct RequireBuilder {
    resolve: Arc<dyn Resolve>,
    evaluator: Arc<dyn Evaluator>,
    settings: SharedSettings,
    app: Value,
    process: Option<Object>,
    on_invalidate: Option<Arc<EventEmitter<String>>>,
}

impl RequireBuilder {
    /// Value bound to `app` in evaluated code
    pub fn app(mut self, app: Value) -> Self {
        self.app = app;
        self
    }

    /// Value bound to `process` in evaluated code
    pub fn process(mut self, process: Object) -> Self {
        self.process = Some(process);
        self
    }

    /// Reuse the invalidation stream of a previous loader
    pub fn on_invalidate(mut self, on_invalidate: Arc<EventEmitter<String>>) -> Self {
        self.on_invalidate = Some(on_invalidate);
        self
    }

    /// Create the loader; it evicts modules whenever the resolver invalidates them
    pub fn build(self) -> Arc<Require> {
        let RequireBuilder {
            resolve,
            evaluator,
            settings,
            app,
            process,
            on_invalidate,
        } = self;
        Arc::new_cyclic(|me: &std::sync::Weak<Require>| {
            let weak = me.clone();
            let subscription = resolve.on_invalidate().listen(move |id: &String| {
                if let Some(require) = weak.upgrade() {
                    require.invalidate_graph(id);
                }
            });
            Require {
                resolve,
                evaluator,
                settings,
                graph: Mutex::new(ModuleGraph::default()),
                context: Arc::new(Mutex::new(Context::default())),
                on_invalidate: on_invalidate.unwrap_or_default(),
                app,
                process: process.unwrap_or_else(default_process),
                subscription,
            }
        })
    }
}

/// Module loader of one realm
pub struct Require {
    resolve: Arc<dyn Resolve>,
    evaluator: Arc<dyn Evaluator>,
    settings: SharedSettings,
    graph: Mutex<ModuleGraph>,
    context: Arc<Mutex<Context>>,
    on_invalidate: Arc<EventEmitter<String>>,
    app: Value,
    process: Object,
    subscription: ListenerId,
}

impl Require {
    /// Start building a loader over `resolve` that evaluates with `evaluator`
    pub fn builder(
        resolve: Arc<dyn Resolve>,
        evaluator: Arc<dyn Evaluator>,
        settings: SharedSettings,
    ) -> RequireBuilder {
        RequireBuilder {
            resolve,
            evaluator,
            settings,
            app: Value::Undefined,
            process: None,
            on_invalidate: None,
        }
    }

    /// Load a module as CommonJS, synchronously
    pub fn require(self: &Arc<Self>, id: &str, options: RequireOptions) -> Result<Value> {
        let mut guard = ContextGuard::new(Arc::clone(&self.context));
        if let Some(cwd) = options.cwd {
            guard.push_cwd(Some(cwd));
        }
        let context = self.context();
        self.depend(id, &context);
        let resolved = self.resolve.resolve(id, &context)?;
        let resolved = self.canonicalize(id, resolved, &context)?;

        let module = {
            let mut graph = self.graph.lock();
            let slot = graph.slot(&resolved.id);
            if let Some(common_js) = &slot.common_js {
                trace!("{} served from cache", resolved.id);
                return common_js.get();
            }
            if let Some(value) = &resolved.value {
                slot.common_js = Some(CommonJsSlot::Value(value.clone()));
                return Ok(value.clone());
            }
            let exports = Object::new();
            exports.define_property(Symbol::ToStringTag, PropertyDescriptor::hidden("Module"));
            let module = Object::from_entries([("exports", exports)]);
            slot.common_js = Some(CommonJsSlot::Module(module.clone()));
            module
        };

        match self.run_script(&resolved, &module, &mut guard) {
            Ok(exports) => Ok(exports),
            Err(e) => {
                debug!("{} failed to load: {e}", resolved.id);
                let mut graph = self.graph.lock();
                if let Some(cache) = graph.cache.get_mut(&resolved.id) {
                    let ours = matches!(
                        &cache.common_js,
                        Some(CommonJsSlot::Module(current)) if current.ptr_eq(&module)
                    );
                    if ours {
                        cache.common_js = Some(CommonJsSlot::Failed(e.clone()));
                    }
                }
                Err(e)
            }
        }
    }

    fn run_script(self: &Arc<Self>, resolved: &Resolved, module: &Object, guard: &mut ContextGuard) -> Result<Value> {
        if resolved.compiled_sync_code.is_none() {
            self.evaluator.check_script(&resolved.id, &resolved.code)?;
        }
        guard.push_parent(resolved.id.clone());
        guard.push_cwd(resolved.cwd.clone());
        let code = match &resolved.compiled_sync_code {
            Some(code) => code.clone(),
            None => attach_source_url(&resolved.code, &resolved.id, &self.settings.read().source_root),
        };
        self.evaluator.run_script(ScriptScope {
            id: &resolved.id,
            code: &code,
            module,
            exports: module.get("exports"),
            process: &self.process,
            app: &self.app,
            require: self,
        })?;
        let exports = module.get("exports");
        if let Value::Object(exports) = &exports {
            exports.define_property(Symbol::ToStringTag, PropertyDescriptor::frozen("Module"));
        }
        Ok(exports)
    }

    /// Load a module as an ES module
    ///
    /// Concurrent imports of the same module share one evaluation. An import
    /// that times out is dropped from the cache so a later import starts
    /// over; the abandoned evaluation keeps running but its result is
    /// discarded.
    pub async fn import(self: &Arc<Self>, id: &str, options: ImportOptions) -> Result<Value> {
        let mut guard = ContextGuard::new(Arc::clone(&self.context));
        if let Some(cwd) = options.cwd {
            guard.push_cwd(Some(cwd));
        }
        let context = self.context();
        self.depend(id, &context);
        let resolved = self.resolve.aresolve(id, &context).await?;
        let resolved = self.canonicalize(id, resolved, &context)?;
        let interop = options.common_js_interop;

        let pending = {
            let mut graph = self.graph.lock();
            let slot = graph.slot(&resolved.id).import_slot(interop);
            match slot {
                Some(pending) => {
                    trace!("{} import shared", resolved.id);
                    pending.clone()
                }
                None => {
                    let pending: PendingImport = match &resolved.value {
                        Some(value) => ready(Ok(value.clone())).boxed().shared(),
                        None => Arc::clone(self).load_module(resolved.clone(), interop).boxed().shared(),
                    };
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;
        if let Err(e) = &result {
            if e.is_timeout() {
                let mut graph = self.graph.lock();
                if let Some(cache) = graph.cache.get_mut(&resolved.id) {
                    let slot = cache.import_slot(interop);
                    if slot.as_ref().is_some_and(|current| current.ptr_eq(&pending)) {
                        *slot = None;
                    }
                }
            }
        }
        drop(guard);
        result
    }

    async fn load_module(self: Arc<Self>, resolved: Resolved, interop: bool) -> Result<Value> {
        let (prelude, code, timeout) = {
            let settings = self.settings.read();
            (
                interop.then(|| common_js_prelude(&settings.require_name)),
                attach_source_url(&resolved.code, &resolved.id, &settings.source_root),
                settings.import_timeout(),
            )
        };

        let mut guard = ContextGuard::new(Arc::clone(&self.context));
        guard.push_parent(resolved.id.clone());
        guard.push_cwd(resolved.cwd.clone());
        let task = tokio::spawn(self.evaluator.run_module(ModuleSource {
            id: resolved.id.clone(),
            code,
            prelude,
            process: self.process.clone(),
            app: self.app.clone(),
            require: Arc::clone(&self),
        }));

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tokio::task::yield_now().await;
                    drop(guard);
                    return Err(ModuleError::Timeout {
                        id: resolved.id,
                        seconds: limit.as_secs_f64(),
                    });
                }
            },
            None => task.await,
        };
        // continuations of the module body still observe its stack entries
        tokio::task::yield_now().await;
        drop(guard);

        let namespace = joined
            .map_err(|e| ModuleError::evaluation(&resolved.id, format!("module task failed: {e}")))??;
        if !interop {
            return Ok(Value::Object(namespace));
        }
        Ok(Value::Facade(Self::facade(namespace)))
    }

    fn facade(namespace: Object) -> ModuleFacade {
        let exports = match namespace.get("module").get("exports") {
            Value::Object(exports) => exports,
            Value::Undefined | Value::Null => Object::new(),
            other => {
                let exports = Object::new();
                exports.define_property("default", PropertyDescriptor::hidden(other));
                exports
            }
        };
        exports.define_property(Symbol::ToStringTag, PropertyDescriptor::frozen("Module"));
        ModuleFacade::new(exports, namespace)
    }

    fn depend(&self, id: &str, context: &Context) {
        if let Some(parent) = context.parent() {
            self.graph.lock().depend(parent, id);
        }
    }

    /// Alias the raw specifier and apply the cache policy of the resolution
    fn canonicalize(&self, id: &str, resolved: Option<Resolved>, context: &Context) -> Result<Resolved> {
        let resolved = resolved.ok_or_else(|| ModuleError::module_not_found(id))?;
        let realiased = {
            let mut graph = self.graph.lock();
            let realiased = graph.alias(id, &resolved.id).map(|previous| {
                debug!("{id} moved from {previous} to {}", resolved.id);
                graph.invalidate(id)
            });
            if !resolved.cache {
                graph.cache.remove(&resolved.id);
            }
            realiased
        };
        for invalidated in realiased.iter().flatten() {
            self.on_invalidate.emit(invalidated);
        }
        if let Some(parent) = context.parent() {
            self.resolve.record_dependency(parent, &resolved.id);
        }
        Ok(resolved)
    }

    fn invalidate_graph(&self, id: &str) {
        let invalidated = self.graph.lock().invalidate(id);
        for id in &invalidated {
            self.on_invalidate.emit(id);
        }
    }

    /// Evict `id` and its dependants, then let the resolvers forget it
    pub fn invalidate(&self, id: &str) {
        self.invalidate_graph(id);
        self.resolve.invalidate(id);
    }

    /// Evict everything
    pub fn invalidate_all(&self) {
        let ids = self.graph.lock().clear();
        for id in &ids {
            self.on_invalidate.emit(id);
        }
        self.resolve.invalidate_all();
    }

    /// Fired with every evicted id
    pub fn on_invalidate(&self) -> &Arc<EventEmitter<String>> {
        &self.on_invalidate
    }

    /// The resolver chain specifiers are resolved with
    pub fn resolver(&self) -> &Arc<dyn Resolve> {
        &self.resolve
    }

    /// Value bound to `app` in evaluated code
    pub fn app(&self) -> &Value {
        &self.app
    }

    /// Snapshot of the working-directory and parent stacks
    pub fn context(&self) -> Context {
        self.context.lock().clone()
    }

    /// Run code on behalf of `cwd` until the guard is dropped
    pub fn enter_cwd(&self, cwd: Option<String>) -> CwdGuard {
        CwdGuard::new(Arc::clone(&self.context), cwd)
    }

    /// Push a working directory; pair with [`Require::pop_cwd`]
    pub fn push_cwd(&self, cwd: Option<String>) {
        self.context.lock().cwds.push(cwd);
    }

    /// Pop the innermost working directory, if any was pushed
    pub fn pop_cwd(&self) -> Option<Option<String>> {
        self.context.lock().cwds.pop()
    }

    /// Whether any evaluation of `id` is cached
    pub fn is_cached(&self, id: &str) -> bool {
        self.graph.lock().cache.contains_key(id)
    }

    /// Canonical ids with cache entries, sorted
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graph.lock().cache.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Canonical id the raw specifier last resolved to
    pub fn aliased(&self, raw: &str) -> Option<String> {
        self.graph.lock().aliased.get(raw).cloned()
    }

    /// Specifiers currently aliasing `canonical`, including itself
    pub fn aliases(&self, canonical: &str) -> Vec<String> {
        self.graph
            .lock()
            .aliases
            .get(canonical)
            .map(|aliases| aliases.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Specifiers `id` required
    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.graph
            .lock()
            .dependencies
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Modules that required `id`
    pub fn dependants(&self, id: &str) -> Vec<String> {
        self.graph
            .lock()
            .dependants
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for Require {
    fn drop(&mut self) {
        self.resolve.on_invalidate().unlisten(self.subscription);
    }
}

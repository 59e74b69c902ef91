// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Remote modules fetched over `http(s)`
//!
//! A remote module is fetched once per URL. Its body is compiled as
//! TypeScript when possible, then every `require("literal")` that does not
//! name a native module is rewritten to load the absolute URL through this
//! loader, and those URLs are prefetched before the module is handed out.
//! Synchronous resolution only ever serves modules that are already loaded.

use super::internal::NativeModules;
use super::{Resolve, Resolved, TrackedIds};
use crate::context::Context;
use crate::error::{ModuleError, Result};
use crate::evaluator::attach_source_url;
use crate::events::EventEmitter;
use crate::fetch::FetchPool;
use crate::file_cache::IdentityToken;
use crate::pool::WorkerPool;
use crate::rewrite::rewrite_requires;
use crate::settings::SharedSettings;
use crate::transpile::{ContentHeader, Source, Transpile, TypeScriptTranspile};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, error, instrument};
use url::Url;

/// Absolute `http(s)` URL for `id`, resolved against `cwd` when that is a URL
pub fn normalize_url(id: &str, cwd: Option<&str>) -> Option<String> {
    let url = cwd
        .and_then(|cwd| Url::parse(cwd).ok())
        .and_then(|base| base.join(id).ok())
        .or_else(|| Url::parse(id).ok())?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// A fetched and prepared remote module
#[derive(Debug)]
pub struct RemoteModule {
    token: IdentityToken,
    /// Transpiled and rewritten body
    code: String,
    /// `code` with a source URL trailer, run by synchronous requires
    compiled_sync_code: String,
}

type PendingModule = Shared<BoxFuture<'static, Result<Arc<RemoteModule>>>>;

#[derive(Clone)]
enum RemoteState {
    /// Requested synchronously before it was loaded
    Awaiting,
    Loading {
        token: IdentityToken,
        pending: PendingModule,
    },
    Ready(Arc<RemoteModule>),
    Failed(ModuleError),
}

/// Resolver for `http(s)` specifiers
pub struct ExternalLinkResolve {
    me: Weak<Self>,
    settings: SharedSettings,
    fetch: Arc<FetchPool>,
    typescript: Arc<TypeScriptTranspile>,
    natives: Arc<dyn NativeModules>,
    workers: WorkerPool,
    tracked: TrackedIds,
    redirects: Mutex<HashMap<String, String>>,
    identities: Mutex<HashMap<String, RemoteState>>,
}

impl ExternalLinkResolve {
    pub fn new(
        settings: SharedSettings,
        fetch: Arc<FetchPool>,
        typescript: Arc<TypeScriptTranspile>,
        natives: Arc<dyn NativeModules>,
        workers: WorkerPool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            settings,
            fetch,
            typescript,
            natives,
            workers,
            tracked: TrackedIds::default(),
            redirects: Mutex::new(HashMap::new()),
            identities: Mutex::new(HashMap::new()),
        })
    }

    fn enabled(&self) -> bool {
        self.settings.read().enable_external_links
    }

    /// Fetch `hrefs` ahead of any require; failures are logged
    pub async fn preload(&self, hrefs: &[String]) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        if !self.enabled() {
            return;
        }
        let loads = hrefs
            .iter()
            .map(|href| Arc::clone(&this).aresolve0(href.clone(), None, true));
        for (href, result) in hrefs.iter().zip(join_all(loads).await) {
            if let Err(e) = result {
                error!("failed to preload {href}: {e}");
            }
        }
    }

    /// Re-announce every answered URL and preload the configured links,
    /// e.g. after external links were switched on or off
    pub async fn refresh(&self) {
        self.tracked.invalidate_all(true);
        let hrefs = self.settings.read().preloaded_external_links.clone();
        self.preload(&hrefs).await;
    }

    /// Connectivity came back: failed fetches become eligible for retry
    pub fn online(&self) {
        for state in self.identities.lock().values_mut() {
            if matches!(state, RemoteState::Failed(_)) {
                *state = RemoteState::Awaiting;
            }
        }
    }

    fn normalize(&self, id: &str, cwd: Option<&str>) -> Option<String> {
        let href = normalize_url(id, cwd)?;
        Some(self.redirects.lock().get(&href).cloned().unwrap_or(href))
    }

    async fn anormalize(&self, id: &str, cwd: Option<&str>) -> Option<String> {
        let href = normalize_url(id, cwd)?;
        if let Some(target) = self.redirects.lock().get(&href) {
            return Some(target.clone());
        }
        match self.fetch.resolve_redirect(&href).await {
            Ok(target) => {
                self.tracked.invalidate(&href, true);
                self.redirects.lock().insert(href, target.clone());
                Some(target)
            }
            Err(e) => {
                debug!("cannot follow redirects of {href}: {e}");
                Some(href)
            }
        }
    }

    fn resolved(href: &str, module: &RemoteModule) -> Resolved {
        let mut resolved = Resolved::new(href, module.code.clone()).with_cwd(href);
        resolved.compiled_sync_code = Some(module.compiled_sync_code.clone());
        resolved
    }

    /// Load `id`, sharing any fetch already in flight
    ///
    /// With `wait` unset a load already in progress is not awaited, which
    /// keeps mutually requiring remote modules from waiting on each other.
    fn aresolve0(
        self: Arc<Self>,
        id: String,
        cwd: Option<String>,
        wait: bool,
    ) -> BoxFuture<'static, Result<Option<(String, Arc<RemoteModule>)>>> {
        async move {
            let Some(href) = self.anormalize(&id, cwd.as_deref()).await else {
                return Ok(None);
            };

            let (pending, awaiting) = {
                let mut identities = self.identities.lock();
                match identities.get(&href).cloned() {
                    Some(RemoteState::Ready(module)) => return Ok(Some((href, module))),
                    Some(RemoteState::Failed(e)) => return Err(e),
                    Some(RemoteState::Loading { pending, .. }) if wait => (pending, false),
                    Some(RemoteState::Loading { .. }) => return Ok(None),
                    state => {
                        let token = IdentityToken::fresh();
                        let pending = Arc::clone(&self).load(href.clone(), token).boxed().shared();
                        identities.insert(
                            href.clone(),
                            RemoteState::Loading {
                                token,
                                pending: pending.clone(),
                            },
                        );
                        (pending, matches!(state, Some(RemoteState::Awaiting)))
                    }
                }
            };
            if awaiting {
                self.tracked.invalidate(&href, true);
            }

            let result = pending.clone().await;
            {
                let mut identities = self.identities.lock();
                let ours = matches!(
                    identities.get(&href),
                    Some(RemoteState::Loading { pending: current, .. }) if current.ptr_eq(&pending)
                );
                if ours {
                    let settled = match &result {
                        Ok(module) => RemoteState::Ready(Arc::clone(module)),
                        Err(e) => RemoteState::Failed(e.clone()),
                    };
                    identities.insert(href.clone(), settled);
                }
            }
            result.map(|module| Some((href, module)))
        }
        .boxed()
    }

    #[instrument(skip(self, token))]
    async fn load(self: Arc<Self>, href: String, token: IdentityToken) -> Result<Arc<RemoteModule>> {
        let body = self.fetch.fetch_text(&href).await?;
        let mut code = body;

        let header = ContentHeader {
            language: Some("TypeScript".to_string()),
            compiler_options: Some(Map::from_iter([("module".to_string(), Json::from("CommonJS"))])),
        };
        let source = Source::new(code.as_str()).with_path(href.as_str()).with_identity(token);
        match self.typescript.atranspile_with_header(&source, Some(&header)).await {
            Ok(Some(compiled)) => code = compiled,
            Ok(None) => {}
            Err(e) => debug!("{href} is not TypeScript: {e}"),
        }
        let retired = !matches!(
            self.identities.lock().get(&href),
            Some(RemoteState::Loading { token: current, .. }) if *current == token
        );
        if retired {
            self.typescript.invalidate(token);
        }

        let (require_name, expose_natives, source_root) = {
            let settings = self.settings.read();
            (
                settings.require_name.clone(),
                settings.expose_internal_modules,
                settings.source_root.clone(),
            )
        };
        let callee = format!("self[{}]", serde_json::to_string(&require_name)?);
        let natives = Arc::clone(&self.natives);
        let base = href.clone();
        let input = code.clone();
        let rewritten = self
            .workers
            .run(move || {
                rewrite_requires(&base, &input, &callee, |specifier| {
                    if expose_natives && natives.load(specifier).is_some() {
                        return None;
                    }
                    normalize_url(specifier, Some(&base))
                })
            })
            .await
            .and_then(|rewritten| rewritten);
        match rewritten {
            Ok(rewritten) => {
                code = rewritten.code;
                let nested = rewritten
                    .requires
                    .into_iter()
                    .map(|url| Arc::clone(&self).aresolve0(url, None, false));
                for result in join_all(nested).await {
                    if let Err(e) = result {
                        debug!("prefetch for {href} failed: {e}");
                    }
                }
            }
            Err(e) => debug!("cannot rewrite requires of {href}: {e}"),
        }

        let compiled_sync_code = attach_source_url(&code, &href, &source_root);
        Ok(Arc::new(RemoteModule {
            token,
            code,
            compiled_sync_code,
        }))
    }

    fn forget(&self, state: RemoteState) {
        match state {
            RemoteState::Ready(module) => self.typescript.invalidate(module.token),
            RemoteState::Loading { token, .. } => self.typescript.invalidate(token),
            RemoteState::Awaiting | RemoteState::Failed(_) => {}
        }
    }
}

#[async_trait]
impl Resolve for ExternalLinkResolve {
    fn resolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        let Some(href) = self.normalize(id, context.cwd()) else {
            return Ok(None);
        };
        self.tracked.validate(&href);
        if !self.enabled() {
            return Ok(None);
        }
        let mut identities = self.identities.lock();
        match identities.get(&href) {
            Some(RemoteState::Ready(module)) => Ok(Some(Self::resolved(&href, module))),
            Some(RemoteState::Failed(e)) => Err(e.clone()),
            Some(_) => Ok(None),
            None => {
                identities.insert(href, RemoteState::Awaiting);
                Ok(None)
            }
        }
    }

    async fn aresolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        let Some(this) = self.me.upgrade() else {
            return Ok(None);
        };
        let cwd = context.cwd().map(String::from);
        let Some(href) = self.normalize(id, cwd.as_deref()) else {
            return Ok(None);
        };
        self.tracked.validate(&href);
        if !self.enabled() {
            return Ok(None);
        }
        let Some((href, module)) = this.aresolve0(id.to_string(), cwd, true).await? else {
            return Ok(None);
        };
        self.tracked.validate(&href);
        Ok(Some(Self::resolved(&href, &module)))
    }

    fn invalidate(&self, id: &str) {
        self.tracked.invalidate(id, false);
        let target = self.redirects.lock().remove(id).unwrap_or_else(|| id.to_string());
        let state = self.identities.lock().remove(&target);
        if let Some(state) = state {
            self.forget(state);
        }
    }

    fn invalidate_all(&self) {
        self.tracked.invalidate_all(false);
        self.redirects.lock().clear();
        let states: Vec<RemoteState> = self.identities.lock().drain().map(|(_, state)| state).collect();
        for state in states {
            self.forget(state);
        }
    }

    fn on_invalidate(&self) -> &EventEmitter<String> {
        self.tracked.on_invalidate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetch;
    use crate::resolve::BuiltinModules;
    use crate::settings::Settings;
    use crate::value::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeFetch {
        pages: HashMap<String, String>,
        redirects: HashMap<String, String>,
        offline: AtomicBool,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetch for FakeFetch {
        async fn resolve_redirect(&self, url: &str) -> Result<String> {
            Ok(self.redirects.get(url).cloned().unwrap_or_else(|| url.to_string()))
        }

        async fn fetch_text(&self, url: &str) -> Result<String> {
            tokio::task::yield_now().await;
            if self.offline.load(Ordering::SeqCst) {
                return Err(ModuleError::network(url, "offline"));
            }
            self.fetched.lock().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ModuleError::network(url, "404 Not Found"))
        }
    }

    fn resolver(fetch: Arc<FakeFetch>) -> (SharedSettings, Arc<ExternalLinkResolve>) {
        let settings = Settings {
            enable_external_links: true,
            ..Settings::default()
        }
        .shared();
        let natives = Arc::new(BuiltinModules::new());
        natives.register("obsidian", Value::Null);
        let workers = WorkerPool::new(2);
        let resolve = ExternalLinkResolve::new(
            settings.clone(),
            Arc::new(FetchPool::new(fetch, 2)),
            Arc::new(TypeScriptTranspile::new(None, workers.clone())),
            natives,
            workers,
        );
        (settings, resolve)
    }

    fn pages(entries: &[(&str, &str)]) -> FakeFetch {
        FakeFetch {
            pages: entries
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            ..FakeFetch::default()
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://example.com/a/../b.js", None).as_deref(),
            Some("https://example.com/b.js")
        );
        assert_eq!(
            normalize_url("./c.js", Some("https://example.com/lib/main.js")).as_deref(),
            Some("https://example.com/lib/c.js")
        );
        assert!(normalize_url("./c.js", Some("notes")).is_none());
        assert!(normalize_url("file:///etc/passwd", None).is_none());
        assert!(normalize_url("lib.js", None).is_none());
    }

    #[tokio::test]
    async fn test_fetch_rewrite_and_prefetch() {
        let fetch = Arc::new(pages(&[
            (
                "https://example.com/main.js",
                "const dep = require('./dep.js'); const api = require('obsidian')",
            ),
            ("https://example.com/dep.js", "module.exports = 1"),
        ]));
        let (_, resolve) = resolver(fetch.clone());
        let context = Context::default();

        assert!(resolve.resolve("https://example.com/main.js", &context).unwrap().is_none());
        let resolved = resolve
            .aresolve("https://example.com/main.js", &context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "https://example.com/main.js");
        assert_eq!(resolved.cwd.as_deref(), Some("https://example.com/main.js"));
        assert_eq!(
            resolved.code,
            "const dep = self[\"require\"](\"https://example.com/dep.js\"); const api = require('obsidian')"
        );
        assert!(
            resolved
                .compiled_sync_code
                .as_deref()
                .unwrap()
                .ends_with("//# sourceURL=vault://https://example.com/main.js")
        );
        assert_eq!(fetch.fetched.lock().len(), 2);

        let loaded = resolve.resolve("https://example.com/main.js", &context).unwrap().unwrap();
        assert_eq!(loaded.code, resolved.code);
        assert_eq!(loaded.compiled_sync_code, resolved.compiled_sync_code);

        let nested = resolve.resolve("./dep.js", &Context {
            cwds: vec![Some("https://example.com/main.js".into())],
            parents: Vec::new(),
        });
        assert_eq!(nested.unwrap().unwrap().code, "module.exports = 1");
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        let (_, resolve) = resolver(fetch.clone());
        let context = Context::default();
        let (first, second) = tokio::join!(
            resolve.aresolve("https://example.com/a.js", &context),
            resolve.aresolve("https://example.com/a.js", &context),
        );
        assert_eq!(first.unwrap().unwrap().code, "a");
        assert_eq!(second.unwrap().unwrap().code, "a");
        assert_eq!(*fetch.fetched.lock(), vec!["https://example.com/a.js"]);
    }

    #[tokio::test]
    async fn test_mutual_requires_do_not_deadlock() {
        let fetch = Arc::new(pages(&[
            ("https://example.com/a.js", "require('./b.js')"),
            ("https://example.com/b.js", "require('./a.js')"),
        ]));
        let (_, resolve) = resolver(fetch.clone());
        let resolved = resolve
            .aresolve("https://example.com/a.js", &Context::default())
            .await
            .unwrap()
            .unwrap();
        assert!(resolved.code.contains("https://example.com/b.js"));
        assert_eq!(fetch.fetched.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_redirects_are_followed_once() {
        let mut fetch = pages(&[("https://cdn.example.com/v2/lib.js", "lib")]);
        fetch
            .redirects
            .insert("https://example.com/lib.js".into(), "https://cdn.example.com/v2/lib.js".into());
        let (_, resolve) = resolver(Arc::new(fetch));
        let resolved = resolve
            .aresolve("https://example.com/lib.js", &Context::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, "https://cdn.example.com/v2/lib.js");

        let sync = resolve
            .resolve("https://example.com/lib.js", &Context::default())
            .unwrap()
            .unwrap();
        assert_eq!(sync.id, "https://cdn.example.com/v2/lib.js");
    }

    #[tokio::test]
    async fn test_failures_are_sticky_until_online() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        fetch.offline.store(true, Ordering::SeqCst);
        let (_, resolve) = resolver(fetch.clone());
        let context = Context::default();

        let err = resolve.aresolve("https://example.com/a.js", &context).await.unwrap_err();
        assert!(matches!(err, ModuleError::Network { .. }));
        fetch.offline.store(false, Ordering::SeqCst);
        assert!(resolve.resolve("https://example.com/a.js", &context).is_err());
        assert!(resolve.aresolve("https://example.com/a.js", &context).await.is_err());

        resolve.online();
        let resolved = resolve.aresolve("https://example.com/a.js", &context).await.unwrap();
        assert_eq!(resolved.unwrap().code, "a");
    }

    #[tokio::test]
    async fn test_invalidate_refetches() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        let (_, resolve) = resolver(fetch.clone());
        let context = Context::default();
        resolve.aresolve("https://example.com/a.js", &context).await.unwrap();
        resolve.invalidate("https://example.com/a.js");
        assert!(resolve.resolve("https://example.com/a.js", &context).unwrap().is_none());
        resolve.aresolve("https://example.com/a.js", &context).await.unwrap();
        assert_eq!(fetch.fetched.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_invalidating_during_fetch_drops_late_output() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        let (_, resolve) = resolver(fetch.clone());
        let context = Context::default();
        let (_, loaded) = tokio::join!(
            async {
                tokio::task::yield_now().await;
                resolve.invalidate("https://example.com/a.js");
            },
            resolve.aresolve("https://example.com/a.js", &context),
        );
        assert_eq!(loaded.unwrap().unwrap().code, "a");
        assert_eq!(resolve.typescript.cached_identities(), 0);
        assert!(resolve.resolve("https://example.com/a.js", &context).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_awaiting_sync_request_is_announced() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        let (_, resolve) = resolver(fetch);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        resolve.on_invalidate().listen(move |id: &String| sink.lock().push(id.clone()));

        let context = Context::default();
        assert!(resolve.resolve("https://example.com/a.js", &context).unwrap().is_none());
        resolve.aresolve("https://example.com/a.js", &context).await.unwrap();
        assert_eq!(*seen.lock(), vec!["https://example.com/a.js"]);
    }

    #[tokio::test]
    async fn test_disabled_and_preload() {
        let fetch = Arc::new(pages(&[("https://example.com/a.js", "a")]));
        let (settings, resolve) = resolver(fetch.clone());
        settings.write().enable_external_links = false;
        let context = Context::default();
        assert!(resolve.aresolve("https://example.com/a.js", &context).await.unwrap().is_none());
        resolve.preload(&["https://example.com/a.js".to_string()]).await;
        assert!(fetch.fetched.lock().is_empty());

        {
            let mut settings = settings.write();
            settings.enable_external_links = true;
            settings.preloaded_external_links = vec!["https://example.com/a.js".to_string()];
        }
        resolve.refresh().await;
        assert_eq!(fetch.fetched.lock().len(), 1);
        assert!(resolve.resolve("https://example.com/a.js", &context).unwrap().is_some());
    }
}

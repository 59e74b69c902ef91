// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Wiring of the loader stack over one vault

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::fetch::{Fetch, FetchPool, HttpFetch};
use crate::file_cache::FileCache;
use crate::hooks::{CwdInterceptor, Disposer, Hooks};
use crate::pool::WorkerPool;
use crate::registry::{RealmId, Requires};
use crate::require::{Require, RequireBuilder};
use crate::resolve::{
    BuiltinModules, CompositeResolve, ExternalLinkResolve, FileResolve, InternalModulesResolve,
    LinkIndex, MarkdownLinkStrategy, NativeModules, RelativePathStrategy, Resolve,
    VaultLinkIndex, VaultPathStrategy, WikilinkStrategy,
};
use crate::settings::{Settings, SharedSettings};
use crate::startup::{LOAD_DELAY, StartupModules};
use crate::transpile::{
    CommandCompiler, MarkdownTranspile, Transpile, TypeScriptCompiler, TypeScriptTranspile,
};
use crate::value::Value;
use crate::vault::{Vault, VaultEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builder for [`ModuleHost`]
pub struct ModuleHostBuilder {
    vault: Arc<dyn Vault>,
    evaluator: Arc<dyn Evaluator>,
    settings: Settings,
    app: Value,
    natives: Option<Arc<dyn NativeModules>>,
    fetch: Option<Arc<dyn Fetch>>,
    compiler: Option<Arc<dyn TypeScriptCompiler>>,
    links: Option<Arc<dyn LinkIndex>>,
}

impl ModuleHostBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Value bound to `app` in the main realm
    pub fn app(mut self, app: Value) -> Self {
        self.app = app;
        self
    }

    pub fn natives(mut self, natives: Arc<dyn NativeModules>) -> Self {
        self.natives = Some(natives);
        self
    }

    /// Network access; defaults to [`HttpFetch`]
    pub fn fetch(mut self, fetch: Arc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// TypeScript compiler; defaults to `typescript_command`
    pub fn compiler(mut self, compiler: Arc<dyn TypeScriptCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Link index; defaults to [`VaultLinkIndex`]
    pub fn links(mut self, links: Arc<dyn LinkIndex>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn build(self) -> Result<ModuleHost> {
        self.settings.validate()?;
        let rules = self.settings.preloading_rules()?;
        let workers = WorkerPool::new(self.settings.worker_threads);
        let fetch = match self.fetch {
            Some(fetch) => fetch,
            None => Arc::new(HttpFetch::new()?),
        };
        let fetch = Arc::new(FetchPool::new(fetch, self.settings.fetch_concurrency));
        let compiler = self.compiler.or_else(|| {
            CommandCompiler::from_command(&self.settings.typescript_command)
                .map(|compiler| Arc::new(compiler) as Arc<dyn TypeScriptCompiler>)
        });
        let natives = self
            .natives
            .unwrap_or_else(|| Arc::new(BuiltinModules::new()));
        let settings = self.settings.shared();

        let cache = FileCache::new(self.vault, rules);
        let links = self
            .links
            .unwrap_or_else(|| Arc::new(VaultLinkIndex::new(Arc::clone(&cache))));
        let typescript = Arc::new(TypeScriptTranspile::new(compiler, workers.clone()));
        let markdown = Arc::new(MarkdownTranspile::new(Arc::clone(&settings), Arc::clone(&typescript)));
        let transpiles: Vec<Arc<dyn Transpile>> = vec![
            Arc::clone(&markdown) as Arc<dyn Transpile>,
            Arc::clone(&typescript) as Arc<dyn Transpile>,
        ];

        let internal = Arc::new(InternalModulesResolve::new(Arc::clone(&natives), Arc::clone(&settings)));
        let external = ExternalLinkResolve::new(
            Arc::clone(&settings),
            fetch,
            Arc::clone(&typescript),
            natives,
            workers,
        );
        let resolve: Arc<dyn Resolve> = Arc::new(CompositeResolve::new(vec![
            Arc::clone(&internal) as Arc<dyn Resolve>,
            FileResolve::new(RelativePathStrategy, Arc::clone(&cache), transpiles.clone()) as Arc<dyn Resolve>,
            FileResolve::new(VaultPathStrategy, Arc::clone(&cache), transpiles.clone()) as Arc<dyn Resolve>,
            FileResolve::new(WikilinkStrategy::new(Arc::clone(&links)), Arc::clone(&cache), transpiles.clone())
                as Arc<dyn Resolve>,
            FileResolve::new(MarkdownLinkStrategy::new(links), Arc::clone(&cache), transpiles) as Arc<dyn Resolve>,
            Arc::clone(&external) as Arc<dyn Resolve>,
        ]));

        let requires = Arc::new(Requires::new());
        let realm = RealmId::new();
        let builder = Require::builder(Arc::clone(&resolve), Arc::clone(&self.evaluator), Arc::clone(&settings))
            .app(self.app);
        requires.install(realm, builder);
        let startup = StartupModules::new(Arc::clone(&requires), realm, Arc::clone(&settings));

        Ok(ModuleHost {
            settings,
            evaluator: self.evaluator,
            cache,
            markdown,
            internal,
            external,
            resolve,
            requires,
            realm,
            hooks: Hooks::new(),
            startup,
        })
    }
}

/// A vault with its loader stack
pub struct ModuleHost {
    settings: SharedSettings,
    evaluator: Arc<dyn Evaluator>,
    cache: Arc<FileCache>,
    markdown: Arc<MarkdownTranspile>,
    internal: Arc<InternalModulesResolve>,
    external: Arc<ExternalLinkResolve>,
    resolve: Arc<dyn Resolve>,
    requires: Arc<Requires>,
    realm: RealmId,
    hooks: Arc<Hooks>,
    startup: Arc<StartupModules>,
}

impl ModuleHost {
    pub fn builder(vault: Arc<dyn Vault>, evaluator: Arc<dyn Evaluator>) -> ModuleHostBuilder {
        ModuleHostBuilder {
            vault,
            evaluator,
            settings: Settings::default(),
            app: Value::Undefined,
            natives: None,
            fetch: None,
            compiler: None,
            links: None,
        }
    }

    /// Scan the vault, preload remote modules and run the startup modules
    pub async fn start(&self) {
        self.cache.rebuild().await;
        let (links, startup_modules) = {
            let settings = self.settings.read();
            (
                settings.preloaded_external_links.clone(),
                settings.startup_modules.clone(),
            )
        };
        self.external.preload(&links).await;
        self.startup.watch();
        self.startup.load(Duration::ZERO, &startup_modules).await;
        info!(files = self.cache.len(), "module host started");
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn file_cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn requires(&self) -> &Arc<Requires> {
        &self.requires
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.hooks
    }

    pub fn startup(&self) -> &Arc<StartupModules> {
        &self.startup
    }

    /// Realm created with the host
    pub fn main_realm(&self) -> RealmId {
        self.realm
    }

    /// Loader of the main realm
    pub fn require(&self) -> Option<Arc<Require>> {
        self.requires.get(self.realm)
    }

    fn require_builder(&self, app: Value) -> RequireBuilder {
        Require::builder(Arc::clone(&self.resolve), Arc::clone(&self.evaluator), Arc::clone(&self.settings))
            .app(app)
    }

    /// Create a realm sharing this host's resolvers
    pub fn create_realm(&self, app: Value) -> (RealmId, Arc<Require>) {
        let realm = RealmId::new();
        let require = self.requires.install(realm, self.require_builder(app));
        (realm, require)
    }

    pub fn teardown_realm(&self, realm: RealmId) -> bool {
        self.requires.teardown(realm).is_some()
    }

    /// Push the calling note's directory onto `realm`'s loader around every
    /// call through hook point `point`
    pub fn intercept_cwd(&self, point: &str, realm: RealmId) -> Disposer {
        self.hooks.register(
            point,
            Arc::new(CwdInterceptor::new(Arc::clone(&self.requires), realm)),
        )
    }

    /// Drop every cached module of `realm`
    pub fn clear_cache(&self, realm: RealmId) -> bool {
        match self.requires.get(realm) {
            Some(require) => {
                require.invalidate_all();
                true
            }
            None => false,
        }
    }

    /// Connectivity came back
    pub fn online(&self) {
        self.external.online();
    }

    pub async fn handle_vault_event(&self, event: VaultEvent) {
        debug!(?event, "vault changed");
        self.cache.handle_event(event).await;
    }

    /// Replace the settings and react to what changed
    ///
    /// The worker pool size, fetch concurrency and TypeScript command are
    /// read once when the host is built.
    pub async fn apply_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        let rules = settings.preloading_rules()?;
        let previous = std::mem::replace(&mut *self.settings.write(), settings.clone());

        if previous.preloading_rules != settings.preloading_rules {
            self.cache.set_rules(rules).await;
        }
        if previous.markdown_code_block_languages_to_load != settings.markdown_code_block_languages_to_load {
            self.markdown.languages_changed();
        }
        if previous.expose_internal_modules != settings.expose_internal_modules {
            self.internal.refresh();
        }
        if previous.enable_external_links != settings.enable_external_links {
            self.external.refresh().await;
        } else {
            let added: Vec<String> = settings
                .preloaded_external_links
                .iter()
                .filter(|href| !previous.preloaded_external_links.contains(href))
                .cloned()
                .collect();
            self.external.preload(&added).await;
        }
        if previous.require_name != settings.require_name {
            for realm in self.requires.realms() {
                if let Some(current) = self.requires.get(realm) {
                    self.requires.install(realm, self.require_builder(current.app().clone()));
                }
            }
        }
        self.startup_settings_changed(&previous, &settings).await;
        Ok(())
    }

    async fn startup_settings_changed(&self, previous: &Settings, current: &Settings) {
        if previous.startup_modules != current.startup_modules {
            let removed: Vec<String> = previous
                .startup_modules
                .iter()
                .filter(|id| !current.startup_modules.contains(id))
                .cloned()
                .collect();
            self.startup.unload(&removed);
            if current.auto_reload_startup_modules {
                let startup = Arc::clone(&self.startup);
                let ids = current.startup_modules.clone();
                tokio::spawn(async move {
                    startup.load(LOAD_DELAY, &ids).await;
                });
            }
        }
        if current.auto_reload_startup_modules && !previous.auto_reload_startup_modules {
            self.startup.load(Duration::ZERO, &current.startup_modules).await;
        }
    }
}

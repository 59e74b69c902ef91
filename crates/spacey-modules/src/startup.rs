// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Startup modules
//!
//! Modules listed in the settings are imported once the host is up; each
//! one's default export (or the module itself) is called. A failing module
//! is reported and counted as loaded so its siblings are unaffected.

use crate::error::{ModuleError, Result};
use crate::events::ListenerId;
use crate::registry::{RealmId, Requires};
use crate::require::ImportOptions;
use crate::settings::SharedSettings;
use crate::value::Value;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error};

/// Delay before reacting to settings changes and invalidations, so bursts
/// of edits trigger one load
pub const LOAD_DELAY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct State {
    requested: BTreeSet<String>,
    loaded: HashSet<String>,
}

/// Tracks which startup modules were requested and which already ran
pub struct StartupModules {
    me: Weak<StartupModules>,
    requires: Arc<Requires>,
    realm: RealmId,
    settings: SharedSettings,
    state: Mutex<State>,
    /// Bumped by every load; a delayed load only runs if still the latest
    generation: AtomicU64,
}

impl StartupModules {
    pub fn new(requires: Arc<Requires>, realm: RealmId, settings: SharedSettings) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            requires,
            realm,
            settings,
            state: Mutex::new(State::default()),
            generation: AtomicU64::new(0),
        })
    }

    /// Request `ids` and run every requested module not yet run
    ///
    /// Returns whether any of `ids` was newly requested. With a non-zero
    /// `delay`, loads requested again before the delay elapses are merged
    /// into the later one.
    pub async fn load(&self, delay: Duration, ids: &[String]) -> bool {
        let added = {
            let mut state = self.state.lock();
            ids.iter().fold(false, |added, id| state.requested.insert(id.clone()) || added)
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("startup load superseded");
                return added;
            }
        }

        let pending: Vec<String> = {
            let state = self.state.lock();
            state
                .requested
                .iter()
                .filter(|id| !state.loaded.contains(*id))
                .cloned()
                .collect()
        };
        join_all(pending.into_iter().map(|id| async move {
            if let Err(e) = self.run(&id).await {
                error!("error loading startup module '{id}': {e}");
            }
            self.state.lock().loaded.insert(id);
        }))
        .await;
        added
    }

    /// Run `ids` again
    pub async fn reload(&self, delay: Duration, ids: &[String]) -> bool {
        {
            let mut state = self.state.lock();
            for id in ids {
                state.loaded.remove(id);
            }
        }
        self.load(delay, ids).await
    }

    /// Stop tracking `ids`; returns whether any was requested
    pub fn unload(&self, ids: &[String]) -> bool {
        let mut state = self.state.lock();
        ids.iter().fold(false, |removed, id| {
            state.loaded.remove(id);
            state.requested.remove(id) || removed
        })
    }

    /// Modules that already ran, sorted
    pub fn loaded(&self) -> Vec<String> {
        let mut loaded: Vec<String> = self.state.lock().loaded.iter().cloned().collect();
        loaded.sort();
        loaded
    }

    pub fn requested(&self) -> Vec<String> {
        self.state.lock().requested.iter().cloned().collect()
    }

    /// React to invalidations of startup modules in the realm's loader
    ///
    /// An invalidated startup module is reloaded after [`LOAD_DELAY`] when
    /// auto reload is on, and unloaded otherwise.
    pub fn watch(&self) -> Option<ListenerId> {
        let require = self.requires.get(self.realm)?;
        let me = self.me.clone();
        Some(require.on_invalidate().listen(move |id: &String| {
            let Some(startup) = me.upgrade() else {
                return;
            };
            let (listed, auto_reload) = {
                let settings = startup.settings.read();
                (
                    settings.startup_modules.contains(id),
                    settings.auto_reload_startup_modules,
                )
            };
            if !listed {
                return;
            }
            if !auto_reload {
                startup.unload(std::slice::from_ref(id));
                return;
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let id = id.clone();
                    handle.spawn(async move {
                        startup.reload(LOAD_DELAY, &[id]).await;
                    });
                }
                Err(_) => debug!("no runtime to reload startup module '{id}'"),
            }
        }))
    }

    async fn run(&self, id: &str) -> Result<()> {
        let require = self
            .requires
            .get(self.realm)
            .ok_or_else(|| ModuleError::Config(format!("no loader installed for {:?}", self.realm)))?;
        let module = require.import(id, ImportOptions::default()).await?;
        let entry = match module.get("default") {
            Value::Undefined | Value::Null => module,
            default => default,
        };
        match entry {
            Value::Function(function) => {
                function.call(&Value::Undefined, &[])?;
                Ok(())
            }
            _ => Err(ModuleError::type_error(format!("'{id}' exports no function"))),
        }
    }
}

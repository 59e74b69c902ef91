// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Ordered chain of resolvers

use super::{Resolve, Resolved};
use crate::context::Context;
use crate::error::Result;
use crate::events::{EventEmitter, ListenerId};
use async_trait::async_trait;
use std::sync::Arc;

/// Tries each delegate in order; the first `Some` wins
///
/// Invalidation broadcasts to every delegate and notices from any delegate
/// are forwarded to this resolver's listeners.
pub struct CompositeResolve {
    delegates: Vec<Arc<dyn Resolve>>,
    subscriptions: Vec<ListenerId>,
    on_invalidate: Arc<EventEmitter<String>>,
}

impl CompositeResolve {
    pub fn new(delegates: Vec<Arc<dyn Resolve>>) -> Self {
        let on_invalidate = Arc::new(EventEmitter::new());
        let subscriptions = delegates
            .iter()
            .map(|delegate| {
                let forward = Arc::clone(&on_invalidate);
                delegate
                    .on_invalidate()
                    .listen(move |id: &String| forward.emit(id))
            })
            .collect();
        Self {
            delegates,
            subscriptions,
            on_invalidate,
        }
    }

    pub fn delegates(&self) -> &[Arc<dyn Resolve>] {
        &self.delegates
    }
}

impl Drop for CompositeResolve {
    fn drop(&mut self) {
        for (delegate, id) in self.delegates.iter().zip(&self.subscriptions) {
            delegate.on_invalidate().unlisten(*id);
        }
    }
}

#[async_trait]
impl Resolve for CompositeResolve {
    fn resolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        for delegate in &self.delegates {
            if let Some(resolved) = delegate.resolve(id, context)? {
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    async fn aresolve(&self, id: &str, context: &Context) -> Result<Option<Resolved>> {
        for delegate in &self.delegates {
            if let Some(resolved) = delegate.aresolve(id, context).await? {
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    fn invalidate(&self, id: &str) {
        for delegate in &self.delegates {
            delegate.invalidate(id);
        }
    }

    fn invalidate_all(&self) {
        for delegate in &self.delegates {
            delegate.invalidate_all();
        }
    }

    fn on_invalidate(&self) -> &EventEmitter<String> {
        &self.on_invalidate
    }

    fn record_dependency(&self, parent: &str, dependency: &str) {
        for delegate in &self.delegates {
            delegate.record_dependency(parent, dependency);
        }
    }
}

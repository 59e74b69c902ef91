// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bounded pool for CPU-bound work such as compilation and require rewriting

use crate::error::{ModuleError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs blocking jobs on tokio's blocking threads, at most `size` at a time
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs concurrently
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run a job once a worker is free
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ModuleError::Config(format!("worker pool closed: {e}")))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| ModuleError::Config(format!("worker task failed: {e}")))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(num_cpus::get().clamp(1, 4))
    }
}

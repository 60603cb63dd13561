// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler
//!
//! Runs adapter lifecycle calls as tasks on the event loop that owns the runtime, whichever
//! loop the caller happens to be on. The loop is captured when the scheduler is built; when
//! there was none at that point, the caller's loop is used.
//!

use crate::Error;

use tokio::runtime::Handle;
use tracing::error;

use std::future::Future;

#[derive(Clone, Debug)]
pub struct Scheduler {
    handle: Option<Handle>,
}

impl Scheduler {
    /// Captures the current tokio runtime, if any.
    pub fn new() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }

    /// Schedules on an explicit runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Spawns `task` and waits for its output.
    ///
    /// # Errors
    ///
    /// [`Error::Scheduler`] when no runtime is available or the task panicked.
    pub async fn run<F, T>(&self, task: F) -> Result<T, Error>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| Error::Scheduler(e.to_string()))?,
        };
        handle.spawn(task).await.map_err(|e| {
            error!("Lifecycle task failed: {}", e);
            Error::Scheduler(e.to_string())
        })
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

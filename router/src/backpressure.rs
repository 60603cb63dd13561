// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Backpressure middleware
//!
//! Bounds the number of dispatches in flight through one middleware instance. The bound is
//! a semaphore shared by every dispatch routed through the instance; a permit is held for
//! the whole downstream chain and released on every exit path, including cancellation.
//!
//! When the semaphore is full the rejection strategy decides:
//!
//! | Strategy    | Behavior |
//! |-------------|----------|
//! | `fail_fast` | 503 envelope, `backpressure_rejected = true` |
//! | `queue`     | wait for a permit if fewer than `queue_size` requests are waiting, else reject as `fail_fast` |
//! | `drop`      | 503 envelope, `backpressure_dropped = true`, logged at debug only |
//! | other       | no enforcement, a warning per request |
//!

use crate::{
    Envelope, Error,
    pipeline::{Middleware, Next, PipelineContext},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

pub const BACKPRESSURE_STATUS: u16 = 503;
pub const REJECTED_KEY: &str = "backpressure_rejected";
pub const DROPPED_KEY: &str = "backpressure_dropped";

/// What to do with a request arriving while all slots are taken.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RejectionStrategy {
    #[default]
    FailFast,
    Queue,
    Drop,
    /// Unrecognized name, kept for the warning.
    Unknown(String),
}

impl From<String> for RejectionStrategy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "fail_fast" => RejectionStrategy::FailFast,
            "queue" => RejectionStrategy::Queue,
            "drop" => RejectionStrategy::Drop,
            _ => RejectionStrategy::Unknown(value),
        }
    }
}

impl From<RejectionStrategy> for String {
    fn from(value: RejectionStrategy) -> Self {
        match value {
            RejectionStrategy::FailFast => "fail_fast".to_owned(),
            RejectionStrategy::Queue => "queue".to_owned(),
            RejectionStrategy::Drop => "drop".to_owned(),
            RejectionStrategy::Unknown(name) => name,
        }
    }
}

/// Backpressure policy of a port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub enabled: bool,
    pub max_concurrent: usize,
    /// Waiters allowed beyond `max_concurrent` with the `queue` strategy.
    pub queue_size: usize,
    pub rejection_strategy: RejectionStrategy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 100,
            queue_size: 0,
            rejection_strategy: RejectionStrategy::FailFast,
        }
    }
}

impl BackpressureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("backpressure.max_concurrent must be at least 1".to_owned());
        }
        Ok(())
    }
}

/// Decrements the waiter count when the waiting request leaves, admitted or cancelled.
struct WaitSlot<'a>(&'a AtomicUsize);

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounds concurrent dispatches.
#[derive(Debug)]
pub struct BackpressureMiddleware {
    config: BackpressureConfig,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl BackpressureMiddleware {
    pub fn new(config: BackpressureConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Requests currently waiting for a permit.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn queue_permit(&self) -> Result<Option<OwnedSemaphorePermit>, Error> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(Some(permit));
        }
        let queue_size = self.config.queue_size;
        if self
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < queue_size).then_some(waiting + 1)
            })
            .is_err()
        {
            return Ok(None);
        }
        let _slot = WaitSlot(&self.waiting);
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Pipeline(e.to_string()))?;
        Ok(Some(permit))
    }

    fn refuse(ctx: &mut PipelineContext, message: &str, marker: &str) {
        let mut response =
            Envelope::error(BACKPRESSURE_STATUS, message).respond_to(&ctx.envelope);
        response.metadata.insert(marker.to_owned(), Value::Bool(true));
        ctx.envelope = response;
    }
}

#[async_trait]
impl Middleware for BackpressureMiddleware {
    fn name(&self) -> &str {
        "backpressure"
    }

    async fn process(
        &self,
        mut ctx: PipelineContext,
        next: Next<'_>,
    ) -> Result<PipelineContext, Error> {
        if !self.config.enabled {
            return next.run(ctx).await;
        }

        let permit = match &self.config.rejection_strategy {
            RejectionStrategy::FailFast | RejectionStrategy::Drop => {
                self.semaphore.clone().try_acquire_owned().ok()
            }
            RejectionStrategy::Queue => self.queue_permit().await?,
            RejectionStrategy::Unknown(name) => {
                warn!(
                    "Unknown rejection strategy '{}' on port {}, backpressure disabled.",
                    name, ctx.port_name
                );
                return next.run(ctx).await;
            }
        };

        let Some(_permit) = permit else {
            if self.config.rejection_strategy == RejectionStrategy::Drop {
                debug!("Dropping request on port {}.", ctx.port_name);
                Self::refuse(&mut ctx, "Request dropped: port saturated", DROPPED_KEY);
            } else {
                warn!(
                    "Rejecting request on port {}: {} requests in flight.",
                    ctx.port_name, self.config.max_concurrent
                );
                Self::refuse(
                    &mut ctx,
                    "Service unavailable: too many concurrent requests",
                    REJECTED_KEY,
                );
            }
            return Ok(ctx);
        };

        next.run(ctx).await
    }
}

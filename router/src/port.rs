// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Ports and routing strategies
//!
//! A [`Port`] is a named endpoint holding an ordered list of handlers and a
//! [`RoutingStrategy`] deciding which of them receive an envelope:
//!
//! - [`First`]: only the first handler; its failure propagates.
//! - [`Broadcast`]: every handler, sequentially and in registration order. A failing handler
//!   becomes a 500 envelope at its position, so the result always has one entry per handler.
//! - [`RoundRobin`]: one handler per call, cycling through the list with a cursor owned by
//!   the port.
//!
//! Handler invocation is sequential for every strategy: no two handlers of the same call run
//! concurrently.
//!

use crate::{Envelope, Error};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Status code of the envelope standing in for a failed broadcast handler.
pub const BROADCAST_FAILURE_STATUS: u16 = 500;

/// Business logic invoked with an envelope.
///
/// Implemented for every `Fn(Envelope) -> impl Future<Output = Result<Envelope, Error>>`,
/// so async closures can be registered directly.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, envelope: Envelope) -> Result<Envelope, Error>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Envelope, Error>> + Send + 'static,
{
    async fn handle(&self, envelope: Envelope) -> Result<Envelope, Error> {
        (self)(envelope).await
    }
}

/// Shared handler reference. Identity is the pointer.
pub type HandlerRef = Arc<dyn Handler>;

/// Selects which handlers receive an envelope.
#[async_trait]
pub trait RoutingStrategy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Invokes the selected handlers and returns their results in order.
    /// `handlers` is never empty.
    async fn route(
        &self,
        envelope: Envelope,
        handlers: &[HandlerRef],
    ) -> Result<Vec<Envelope>, Error>;
}

/// Invokes `handlers[0]` only.
#[derive(Debug, Default)]
pub struct First;

#[async_trait]
impl RoutingStrategy for First {
    fn name(&self) -> &'static str {
        "first"
    }

    async fn route(
        &self,
        envelope: Envelope,
        handlers: &[HandlerRef],
    ) -> Result<Vec<Envelope>, Error> {
        let handler = handlers
            .first()
            .ok_or_else(|| Error::Pipeline("empty handler list".to_owned()))?;
        Ok(vec![handler.handle(envelope).await?])
    }
}

/// Invokes every handler, isolating failures.
#[derive(Debug, Default)]
pub struct Broadcast;

#[async_trait]
impl RoutingStrategy for Broadcast {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn route(
        &self,
        envelope: Envelope,
        handlers: &[HandlerRef],
    ) -> Result<Vec<Envelope>, Error> {
        let mut results = Vec::with_capacity(handlers.len());
        for (index, handler) in handlers.iter().enumerate() {
            match handler.handle(envelope.clone()).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!("Broadcast handler {} failed: {}", index, e);
                    results.push(Envelope::error(
                        BROADCAST_FAILURE_STATUS,
                        e.to_string(),
                    ));
                }
            }
        }
        Ok(results)
    }
}

/// Invokes one handler per call, cycling through the list.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Advances the cursor and returns the index to use for this call.
    fn advance(&self, len: usize) -> usize {
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| {
                Some((cursor + 1) % len)
            })
            .unwrap_or_else(|current| current);
        previous % len
    }
}

#[async_trait]
impl RoutingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn route(
        &self,
        envelope: Envelope,
        handlers: &[HandlerRef],
    ) -> Result<Vec<Envelope>, Error> {
        if handlers.is_empty() {
            return Err(Error::Pipeline("empty handler list".to_owned()));
        }
        let index = self.advance(handlers.len());
        debug!("Round robin selected handler {}.", index);
        Ok(vec![handlers[index].handle(envelope).await?])
    }
}

/// Configuration-level name of a routing strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    First,
    Broadcast,
    RoundRobin,
}

impl StrategyKind {
    /// Builds a fresh strategy instance.
    pub fn build(self) -> Box<dyn RoutingStrategy> {
        match self {
            StrategyKind::First => Box::new(First),
            StrategyKind::Broadcast => Box::new(Broadcast),
            StrategyKind::RoundRobin => Box::new(RoundRobin::default()),
        }
    }
}

/// Named endpoint with an ordered handler list.
pub struct Port {
    name: String,
    handlers: RwLock<Vec<HandlerRef>>,
    strategy: Box<dyn RoutingStrategy>,
}

impl Port {
    pub fn new(name: impl Into<String>, strategy: Box<dyn RoutingStrategy>) -> Self {
        Self {
            name: name.into(),
            handlers: RwLock::new(vec![]),
            strategy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Appends a handler. Order is routing-significant.
    pub async fn add_handler(&self, handler: HandlerRef) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
        debug!("Port {} has {} handlers.", self.name, handlers.len());
    }

    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Routes the envelope through the strategy.
    ///
    /// # Errors
    ///
    /// [`Error::NoHandlers`] when the port is empty; whatever the strategy propagates
    /// otherwise.
    pub async fn route(&self, envelope: Envelope) -> Result<Vec<Envelope>, Error> {
        // Snapshot so registration never waits on a slow handler.
        let handlers = self.handlers.read().await.clone();
        if handlers.is_empty() {
            return Err(Error::NoHandlers(self.name.clone()));
        }
        self.strategy.route(envelope, &handlers).await
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

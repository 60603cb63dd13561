// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Blocking adapters
//!
//! Adapters built around blocking I/O (a thread-per-connection server, a synchronous client
//! library) implement the blocking traits below and are wrapped in [`Blocking`], which runs
//! every call on tokio's blocking pool. The runtime only ever sees the async contracts.
//!

use crate::{
    Error,
    adapter::{InboundAdapter, OutboundAdapter},
};

use router::Envelope;

use async_trait::async_trait;
use tracing::debug;

use std::sync::Arc;

/// Blocking counterpart of [`InboundAdapter`].
pub trait BlockingInboundAdapter: Send + Sync + 'static {
    fn start(&self) -> Result<(), Error>;
    /// Must not return before in-flight work has drained.
    fn stop(&self) -> Result<(), Error>;
    fn is_running(&self) -> bool;
}

/// Blocking counterpart of [`OutboundAdapter`].
pub trait BlockingOutboundAdapter: Send + Sync + 'static {
    fn connect(&self) -> Result<(), Error>;
    fn disconnect(&self) -> Result<(), Error>;
    fn is_connected(&self) -> bool;
    fn request(&self, envelope: Envelope) -> Result<Envelope, Error>;
}

/// Async facade over a blocking adapter.
pub struct Blocking<A> {
    inner: Arc<A>,
}

impl<A> Blocking<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            inner: Arc::new(adapter),
        }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Send + Sync + 'static> Blocking<A> {
    async fn off_thread<T, F>(&self, call: F) -> Result<T, Error>
    where
        F: FnOnce(&A) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || call(inner.as_ref()))
            .await
            .map_err(|e| Error::Scheduler(e.to_string()))?
    }
}

#[async_trait]
impl<A: BlockingInboundAdapter> InboundAdapter for Blocking<A> {
    async fn start(&self) -> Result<(), Error> {
        debug!("Starting blocking inbound adapter.");
        self.off_thread(|adapter| adapter.start()).await
    }

    async fn stop(&self) -> Result<(), Error> {
        debug!("Stopping blocking inbound adapter.");
        self.off_thread(|adapter| adapter.stop()).await
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

#[async_trait]
impl<A: BlockingOutboundAdapter> OutboundAdapter for Blocking<A> {
    async fn connect(&self) -> Result<(), Error> {
        self.off_thread(|adapter| adapter.connect()).await
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.off_thread(|adapter| adapter.disconnect()).await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn request(&self, envelope: Envelope) -> Result<Envelope, Error> {
        self.off_thread(move |adapter| adapter.request(envelope)).await
    }
}

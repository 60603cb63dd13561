// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Pipeline
//!
//! A pipeline is a fixed chain of [`Middleware`] wrapped around an [`Endpoint`]. Each stage
//! receives the [`PipelineContext`] and a [`Next`] continuation for the rest of the chain; it
//! may mutate the context, call `next` once, call it several times (retry) or not at all
//! (short-circuit).
//!
//! ```text
//! process(envelope)
//!   └─ stage 0 ──next──▶ stage 1 ──next──▶ ... ──next──▶ endpoint (route)
//!      ◀──────────── context unwinds back through every stage ───────────
//! ```
//!

use crate::{Envelope, Error, registry::PortRegistry};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use std::{collections::HashMap, sync::Arc};

/// Name recorded on the context while the endpoint runs.
pub const ENDPOINT_STAGE: &str = "endpoint";

/// Per-traversal state handed from stage to stage.
#[derive(Clone, Debug)]
pub struct PipelineContext {
    /// The envelope being processed. Stages replace it with the response on the way back.
    pub envelope: Envelope,
    /// Port the envelope is routed to.
    pub port_name: String,
    /// Index of the stage currently running.
    pub stage: usize,
    /// Name of the stage currently running.
    pub stage_name: String,
    /// Pipeline-local scratch space, distinct from the envelope metadata.
    pub metadata: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(port_name: impl Into<String>, envelope: Envelope) -> Self {
        Self {
            envelope,
            port_name: port_name.into(),
            stage: 0,
            stage_name: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Stage name, used for diagnostics.
    fn name(&self) -> &str;

    /// Processes the context. Call `next.run(ctx)` to continue down the chain.
    async fn process(
        &self,
        ctx: PipelineContext,
        next: Next<'_>,
    ) -> Result<PipelineContext, Error>;
}

/// The innermost stage of a pipeline.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn call(&self, ctx: PipelineContext) -> Result<PipelineContext, Error>;
}

/// Continuation over the remaining stages of a pipeline.
///
/// `Next` is `Copy`, so a stage may drive the remaining chain more than once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
    offset: usize,
}

impl<'a> Next<'a> {
    /// Runs the remaining chain.
    pub fn run(
        self,
        mut ctx: PipelineContext,
    ) -> BoxFuture<'a, Result<PipelineContext, Error>> {
        ctx.stage = self.offset;
        match self.middlewares.split_first() {
            Some((head, rest)) => {
                ctx.stage_name = head.name().to_owned();
                let next = Next {
                    middlewares: rest,
                    endpoint: self.endpoint,
                    offset: self.offset + 1,
                };
                head.process(ctx, next)
            }
            None => {
                ctx.stage_name = ENDPOINT_STAGE.to_owned();
                self.endpoint.call(ctx)
            }
        }
    }
}

/// Ordered middleware chain around an endpoint.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Pipeline {
    pub fn new(
        middlewares: Vec<Arc<dyn Middleware>>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    /// Stage names in execution order.
    pub fn stages(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Runs `envelope` through the chain for `port_name` and returns the resulting envelope.
    pub async fn process(
        &self,
        port_name: &str,
        envelope: Envelope,
    ) -> Result<Envelope, Error> {
        debug!("Processing envelope {} for port {}.", envelope.path, port_name);
        let ctx = PipelineContext::new(port_name, envelope);
        let next = Next {
            middlewares: &self.middlewares,
            endpoint: self.endpoint.as_ref(),
            offset: 0,
        };
        next.run(ctx).await.map(|ctx| ctx.envelope)
    }
}

/// Endpoint routing the context's port through a [`PortRegistry`].
///
/// A single result is returned as is. Several results (broadcast ports) are folded into one
/// success envelope whose `data` is the array of the individual envelopes.
pub struct RouteEndpoint {
    registry: PortRegistry,
}

impl RouteEndpoint {
    pub fn new(registry: PortRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Endpoint for RouteEndpoint {
    async fn call(
        &self,
        mut ctx: PipelineContext,
    ) -> Result<PipelineContext, Error> {
        let mut results =
            self.registry.route(&ctx.port_name, ctx.envelope.clone()).await?;
        let response = if results.len() == 1 {
            results.remove(0)
        } else {
            let data = serde_json::to_value(&results)
                .map_err(|e| Error::Pipeline(e.to_string()))?;
            Envelope::success(data)
        };
        ctx.envelope = response.respond_to(&ctx.envelope);
        Ok(ctx)
    }
}

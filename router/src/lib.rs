// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Switchboard router
//!
//! Protocol-neutral routing core. Business logic is written once as handlers over an
//! [`Envelope`] and attached to named [`Port`]s; protocol adapters translate wire traffic into
//! envelopes and route them by port name, never knowing which handler answers.
//!
//! ## Building blocks
//!
//! - [`Envelope`]: the canonical request/response value crossing every boundary.
//! - [`Port`] and [`RoutingStrategy`]: a named endpoint with an ordered handler list and a
//!   selection strategy ([`First`], [`Broadcast`], [`RoundRobin`]).
//! - [`PortRegistry`]: the cloneable, thread-safe map from names to ports. One registry is
//!   built at process start and handed to everything that registers or routes.
//! - [`HandlerLoader`]: resolves `"module.path:function"` and bare port-name references
//!   through a compiled-in module catalog, caching each resolution exactly once.
//! - [`Pipeline`]: a fixed chain of [`Middleware`] around an [`Endpoint`]. The provided
//!   stages are [`RetryMiddleware`], [`BackpressureMiddleware`],
//!   [`TraceExtractionMiddleware`] and [`TraceInjectionMiddleware`].
//!
//! ## Failure model
//!
//! Wiring mistakes (unknown port, empty port, unresolvable reference) are [`Error`]s. A single
//! request failing is an envelope with `error_message` set, so every middleware can inspect
//! failures the same way.
//!
//! ```ignore
//! use router::{Envelope, PortRegistry};
//! use serde_json::json;
//!
//! let registry = PortRegistry::new();
//! registry
//!     .register_handler("greet", |_env: Envelope| async move {
//!         Ok(Envelope::success(json!({"msg": "hi"})))
//!     })
//!     .await;
//! let results = registry.route("greet", Envelope::new("/x")).await?;
//! assert_eq!(results[0].data, Some(json!({"msg": "hi"})));
//! ```
//!

mod backpressure;
mod envelope;
mod error;
mod loader;
mod pipeline;
mod port;
mod registry;
mod retry;
mod trace;

//
// Data contract
//

pub use envelope::{DEFAULT_STATUS, Envelope, QueryValue};

pub use error::Error;

//
// Routing
//

pub use port::{
    BROADCAST_FAILURE_STATUS, Broadcast, First, Handler, HandlerRef, Port,
    RoundRobin, RoutingStrategy, StrategyKind,
};

pub use registry::PortRegistry;

pub use loader::{HandlerLoader, HandlerModule, ModuleLoader};

//
// Pipeline and middleware
//

pub use pipeline::{
    ENDPOINT_STAGE, Endpoint, Middleware, Next, Pipeline, PipelineContext,
    RouteEndpoint,
};

pub use retry::{
    RETRY_ATTEMPTS_KEY, RetryConfig, RetryMiddleware, parse_seconds,
    saturating_seconds,
};

pub use backpressure::{
    BACKPRESSURE_STATUS, BackpressureConfig, BackpressureMiddleware, DROPPED_KEY,
    REJECTED_KEY, RejectionStrategy,
};

/// W3C trace context propagation.
pub use trace::{
    PARENT_SPAN_ID_KEY, SPAN_ID_KEY, TRACE_ID_KEY, TRACEPARENT_FLAGS,
    TRACEPARENT_HEADER, TRACEPARENT_VERSION, TraceContext,
    TraceExtractionMiddleware, TraceInjectionMiddleware, extract_trace,
    format_traceparent, inject_trace, parse_traceparent,
};

// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Switchboard
//!
//! Hexagonal runtime for protocol-neutral services. Handlers are written once against an
//! [`Envelope`] and bound to named ports; adapters carry traffic between transports and
//! ports, and a per-port pipeline applies retry, backpressure, timeout and trace
//! propagation.
//!
//! This crate re-exports the members of the workspace:
//!
//! - `router`: envelopes, ports, strategies, the handler loader and the middleware stages.
//! - `runtime`: adapter contracts, configuration, the dispatcher and the runtime lifecycle.
//! - `local_adapter` (feature `local`): in-process adapters, mostly useful for tests and
//!   single-process deployments.
//!

pub mod logging;

pub use router::{
    BACKPRESSURE_STATUS, BROADCAST_FAILURE_STATUS, BackpressureConfig,
    BackpressureMiddleware, Broadcast, DEFAULT_STATUS, DROPPED_KEY, ENDPOINT_STAGE,
    Endpoint, Envelope, Error as RouterError, First, Handler, HandlerLoader,
    HandlerModule, HandlerRef, Middleware, ModuleLoader, Next, PARENT_SPAN_ID_KEY,
    Pipeline, PipelineContext, Port, PortRegistry, QueryValue, REJECTED_KEY,
    RETRY_ATTEMPTS_KEY, RejectionStrategy, RetryConfig, RetryMiddleware, RoundRobin,
    RouteEndpoint, RoutingStrategy, SPAN_ID_KEY, StrategyKind, TRACE_ID_KEY,
    TRACEPARENT_FLAGS, TRACEPARENT_HEADER, TRACEPARENT_VERSION, TraceContext,
    TraceExtractionMiddleware, TraceInjectionMiddleware, extract_trace,
    format_traceparent, inject_trace, parse_seconds, parse_traceparent,
    saturating_seconds,
};

pub use runtime::{
    AdapterConfig, AdapterConstructor, AdapterContext, AdapterFactory, AdapterHandle,
    AdaptersConfig, BAD_REQUEST_STATUS, Blocking, BlockingInboundAdapter,
    BlockingOutboundAdapter, Dispatcher, Error as RuntimeError, INTERNAL_ERROR_STATUS,
    InboundAdapter, NOT_FOUND_STATUS, OutboundAdapter, PORT_METADATA_KEY, PortConfig,
    PortPolicy, Runtime, RuntimeConfig, Scheduler, TIMEOUT_STATUS, TimeoutConfig,
    UNAVAILABLE_STATUS, error_envelope, status_for,
};

#[cfg(feature = "local")]
pub use local_adapter::{
    ChannelInbound, DEFAULT_CAPACITY, LOCAL_ADAPTER, LOOPBACK_ADAPTER, LocalClient,
    LocalHub, LoopbackOutbound,
};

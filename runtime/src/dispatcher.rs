// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Dispatcher
//!
//! Inbound entry point shared by the runtime and its adapters. Each configured port gets its
//! own pipeline, built once from the port's policy:
//!
//! ```text
//! trace_extraction → trace_injection → backpressure → retry → route
//! ```
//!
//! Policy stages that are not configured are left out, so a port without policy only runs
//! the trace stages. The optional timeout bounds the whole traversal, retries included.
//!
//! Dispatch never fails: every routing or timing failure comes back as an error envelope
//! answering the request. Those envelopes carry the request's trace identity, like the
//! responses that went through the whole chain.
//!

use crate::config::PortPolicy;

use router::{
    BackpressureMiddleware, Envelope, Middleware, Pipeline, PortRegistry,
    RetryMiddleware, RouteEndpoint, TraceExtractionMiddleware,
    TraceInjectionMiddleware, extract_trace, inject_trace,
};

use tracing::{debug, warn};

use std::{collections::HashMap, sync::Arc, time::Duration};

/// Envelope metadata key naming the target port.
pub const PORT_METADATA_KEY: &str = "port";

pub const BAD_REQUEST_STATUS: u16 = 400;
pub const NOT_FOUND_STATUS: u16 = 404;
pub const INTERNAL_ERROR_STATUS: u16 = 500;
pub const UNAVAILABLE_STATUS: u16 = 503;
pub const TIMEOUT_STATUS: u16 = 504;

/// Status code reported for a routing error.
pub fn status_for(error: &router::Error) -> u16 {
    match error {
        router::Error::PortNotFound(_) => NOT_FOUND_STATUS,
        router::Error::NoHandlers(_) => UNAVAILABLE_STATUS,
        _ => INTERNAL_ERROR_STATUS,
    }
}

/// Error envelope answering `request` with a routing error.
pub fn error_envelope(error: &router::Error, request: &Envelope) -> Envelope {
    Envelope::error(status_for(error), error.to_string()).respond_to(request)
}

/// Answers `request` with `response` outside the pipeline, keeping the trace identity.
fn answer(response: Envelope, request: &Envelope) -> Envelope {
    let mut traced = request.clone();
    extract_trace(&mut traced);
    let mut response = response.respond_to(&traced);
    inject_trace(&mut response);
    response
}

struct PortChain {
    pipeline: Pipeline,
    timeout: Option<Duration>,
}

impl PortChain {
    fn new(registry: &PortRegistry, policy: Option<&PortPolicy>) -> Self {
        let mut middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TraceExtractionMiddleware),
            Arc::new(TraceInjectionMiddleware),
        ];
        let mut timeout = None;
        if let Some(policy) = policy {
            if let Some(backpressure) = &policy.backpressure {
                middlewares.push(Arc::new(BackpressureMiddleware::new(
                    backpressure.clone(),
                )));
            }
            if let Some(retry) = &policy.retry {
                middlewares.push(Arc::new(RetryMiddleware::new(retry.clone())));
            }
            timeout = policy.timeout.as_ref().map(|t| t.duration());
        }
        Self {
            pipeline: Pipeline::new(
                middlewares,
                Arc::new(RouteEndpoint::new(registry.clone())),
            ),
            timeout,
        }
    }
}

/// Cloneable handle dispatching envelopes through per-port pipelines.
#[derive(Clone)]
pub struct Dispatcher {
    chains: Arc<HashMap<String, PortChain>>,
    fallback: Arc<PortChain>,
}

impl Dispatcher {
    /// Builds one pipeline per policy entry, plus a shared policy-free pipeline for every
    /// other port.
    pub fn new(registry: &PortRegistry, policies: &HashMap<String, PortPolicy>) -> Self {
        let chains = policies
            .iter()
            .map(|(port, policy)| {
                debug!("Building pipeline for port {}.", port);
                (port.clone(), PortChain::new(registry, Some(policy)))
            })
            .collect();
        Self {
            chains: Arc::new(chains),
            fallback: Arc::new(PortChain::new(registry, None)),
        }
    }

    fn chain(&self, port_name: &str) -> &PortChain {
        self.chains.get(port_name).unwrap_or(self.fallback.as_ref())
    }

    /// Stage names of the pipeline serving `port_name`.
    pub fn stages(&self, port_name: &str) -> Vec<String> {
        self.chain(port_name)
            .pipeline
            .stages()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    /// Timeout applied to `port_name`, if any.
    pub fn timeout(&self, port_name: &str) -> Option<Duration> {
        self.chain(port_name).timeout
    }

    /// Dispatches to the port named by `metadata["port"]`. A missing port is a 400.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let Some(port_name) =
            envelope.metadata_str(PORT_METADATA_KEY).map(str::to_owned)
        else {
            warn!("Envelope {} has no target port.", envelope.path);
            return answer(
                Envelope::error(
                    BAD_REQUEST_STATUS,
                    format!("Missing '{}' in envelope metadata", PORT_METADATA_KEY),
                ),
                &envelope,
            );
        };
        self.dispatch_to(&port_name, envelope).await
    }

    /// Dispatches to an explicit port.
    pub async fn dispatch_to(&self, port_name: &str, envelope: Envelope) -> Envelope {
        let chain = self.chain(port_name);
        let request = envelope.clone();
        let traversal = chain.pipeline.process(port_name, envelope);
        let result = match chain.timeout {
            Some(limit) => match tokio::time::timeout(limit, traversal).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Dispatch to port {} timed out after {:?}.", port_name, limit);
                    return answer(
                        Envelope::error(
                            TIMEOUT_STATUS,
                            format!(
                                "Request to port '{}' failed: timeout after {:?}",
                                port_name, limit
                            ),
                        ),
                        &request,
                    );
                }
            },
            None => traversal.await,
        };
        result.unwrap_or_else(|e| {
            debug!("Dispatch to port {} failed: {}", port_name, e);
            answer(Envelope::error(status_for(&e), e.to_string()), &request)
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::config::TimeoutConfig;

    use router::{
        BackpressureConfig, Error, RetryConfig, StrategyKind, TRACE_ID_KEY,
        TRACEPARENT_HEADER,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(port: &str) -> Envelope {
        Envelope::new("/x")
            .with_method("POST")
            .with_metadata(PORT_METADATA_KEY, json!(port))
    }

    #[tokio::test]
    async fn test_dispatch_by_metadata() {
        let registry = PortRegistry::new();
        registry
            .register_handler("greet", |_env: Envelope| async move {
                Ok(Envelope::success(json!({"msg": "hi"})))
            })
            .await;
        let dispatcher = Dispatcher::new(&registry, &HashMap::new());
        assert_eq!(
            dispatcher.stages("greet"),
            vec!["trace_extraction", "trace_injection"]
        );
        let response = dispatcher.dispatch(request("greet")).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(response.data, Some(json!({"msg": "hi"})));
        assert_eq!(response.method.as_deref(), Some("POST"));
    }

    #[tokio::test]
    async fn test_routing_errors_become_envelopes() {
        let registry = PortRegistry::new();
        registry
            .register_port("empty", StrategyKind::First)
            .await
            .unwrap();
        registry
            .register_handler("broken", |_env: Envelope| async move {
                Err(Error::functional("database gone"))
            })
            .await;
        let dispatcher = Dispatcher::new(&registry, &HashMap::new());

        let missing = dispatcher.dispatch(Envelope::new("/x")).await;
        assert_eq!(missing.status_code, 400);
        assert_eq!(missing.path, "/x");

        let unknown = dispatcher.dispatch(request("nope")).await;
        assert_eq!(unknown.status_code, 404);
        assert!(unknown.error_message.unwrap().contains("not found"));

        let empty = dispatcher.dispatch(request("empty")).await;
        assert_eq!(empty.status_code, 503);

        let broken = dispatcher.dispatch(request("broken")).await;
        assert_eq!(broken.status_code, 500);
        assert_eq!(broken.error_message.as_deref(), Some("database gone"));
    }

    #[tokio::test]
    async fn test_error_envelopes_keep_trace() {
        const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
        const HEADER: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

        let registry = PortRegistry::new();
        registry
            .register_handler("stuck", |_env: Envelope| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Envelope::success(json!(null)))
            })
            .await;
        let mut policies = HashMap::new();
        policies.insert(
            "stuck".to_owned(),
            PortPolicy {
                timeout: Some(TimeoutConfig { seconds: 0.02 }),
                ..PortPolicy::default()
            },
        );
        let dispatcher = Dispatcher::new(&registry, &policies);

        let requests = [
            (request("nope").with_header(TRACEPARENT_HEADER, HEADER), 404),
            (Envelope::new("/x").with_header(TRACEPARENT_HEADER, HEADER), 400),
            (request("stuck").with_header(TRACEPARENT_HEADER, HEADER), 504),
        ];
        for (envelope, status) in requests {
            let response = dispatcher.dispatch(envelope).await;
            assert_eq!(response.status_code, status);
            assert_eq!(response.trace_id.as_deref(), Some(TRACE_ID));
            assert_eq!(response.span_id.as_deref(), Some("00f067aa0ba902b7"));
            assert_eq!(response.header(TRACEPARENT_HEADER), Some(HEADER));
            assert_eq!(response.metadata_str(TRACE_ID_KEY), Some(TRACE_ID));
        }

        let untraced = dispatcher.dispatch(request("nope")).await;
        assert!(untraced.trace_id.is_none());
        assert!(untraced.header(TRACEPARENT_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_policy_builds_full_chain() {
        let registry = PortRegistry::new();
        let mut policies = HashMap::new();
        policies.insert(
            "p".to_owned(),
            PortPolicy {
                retry: Some(RetryConfig::default()),
                backpressure: Some(BackpressureConfig::default()),
                timeout: Some(TimeoutConfig { seconds: 1.0 }),
            },
        );
        let dispatcher = Dispatcher::new(&registry, &policies);
        assert_eq!(
            dispatcher.stages("p"),
            vec!["trace_extraction", "trace_injection", "backpressure", "retry"]
        );
        assert_eq!(dispatcher.timeout("p"), Some(Duration::from_secs(1)));
        assert_eq!(dispatcher.timeout("other"), None);
    }

    #[tokio::test]
    async fn test_timeout_abandons_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let registry = PortRegistry::new();
        registry
            .register_handler("slow", move |_env: Envelope| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Envelope::error(503, "busy")) }
            })
            .await;
        let mut policies = HashMap::new();
        policies.insert(
            "slow".to_owned(),
            PortPolicy {
                retry: Some(RetryConfig {
                    max_attempts: 100,
                    initial_delay: 0.05,
                    max_delay: 0.05,
                    ..RetryConfig::default()
                }),
                timeout: Some(TimeoutConfig { seconds: 0.12 }),
                ..PortPolicy::default()
            },
        );
        let dispatcher = Dispatcher::new(&registry, &policies);
        let response = dispatcher.dispatch(request("slow")).await;
        assert_eq!(response.status_code, 504);
        assert!(response.error_message.unwrap().contains("timeout"));

        let attempts = calls.load(Ordering::SeqCst);
        assert!(attempts < 100);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), attempts);
    }
}

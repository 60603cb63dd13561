// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Port registry
//!
//! The `PortRegistry` maps port names to [`Port`]s. It is a cheap cloneable handle: clones
//! share the same map, so one registry built at process start is passed to the runtime and
//! to every adapter that registers handlers or routes envelopes.
//!

use crate::{
    Envelope, Error,
    port::{Handler, HandlerRef, Port, StrategyKind},
};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error};

use std::{collections::HashMap, sync::Arc};

/// Registry of named ports.
#[derive(Clone, Default)]
pub struct PortRegistry {
    /// The ports known to this registry.
    ports: Arc<RwLock<HashMap<String, Arc<Port>>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a port with an explicit strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortExists`] if the name is already taken.
    pub async fn register_port(
        &self,
        port_name: &str,
        strategy: StrategyKind,
    ) -> Result<(), Error> {
        let mut ports = self.ports.write().await;
        if ports.contains_key(port_name) {
            error!("Port '{}' already exists!", port_name);
            return Err(Error::PortExists(port_name.to_owned()));
        }
        ports.insert(
            port_name.to_owned(),
            Arc::new(Port::new(port_name, strategy.build())),
        );
        debug!("Port {} registered with {:?} strategy.", port_name, strategy);
        Ok(())
    }

    /// Appends a handler to a port, creating a `First` port on first use.
    pub async fn register_handler<H>(&self, port_name: &str, handler: H)
    where
        H: Handler,
    {
        self.register_handler_ref(port_name, Arc::new(handler)).await
    }

    /// Appends an already shared handler to a port, creating a `First` port on first use.
    pub async fn register_handler_ref(&self, port_name: &str, handler: HandlerRef) {
        let port = {
            let mut ports = self.ports.write().await;
            ports
                .entry(port_name.to_owned())
                .or_insert_with(|| {
                    debug!("Creating port {}.", port_name);
                    Arc::new(Port::new(port_name, StrategyKind::First.build()))
                })
                .clone()
        };
        port.add_handler(handler).await;
    }

    /// Looks up a port.
    pub async fn port(&self, port_name: &str) -> Option<Arc<Port>> {
        self.ports.read().await.get(port_name).cloned()
    }

    /// Routes an envelope to the named port.
    ///
    /// # Errors
    ///
    /// [`Error::PortNotFound`] for an unknown name, [`Error::NoHandlers`] for an empty port,
    /// or whatever the port's strategy propagates.
    pub async fn route(
        &self,
        port_name: &str,
        envelope: Envelope,
    ) -> Result<Vec<Envelope>, Error> {
        let port = self
            .port(port_name)
            .await
            .ok_or_else(|| Error::PortNotFound(port_name.to_owned()))?;
        port.route(envelope).await
    }

    /// Returns a handler bound to the named port. Invoking it routes through the port and
    /// yields the first result.
    ///
    /// # Errors
    ///
    /// [`Error::PortNotFound`] if the port does not exist now.
    pub async fn get_handler(&self, port_name: &str) -> Result<HandlerRef, Error> {
        let port = self
            .port(port_name)
            .await
            .ok_or_else(|| Error::PortNotFound(port_name.to_owned()))?;
        Ok(Arc::new(PortHandler { port }))
    }

    pub async fn has_port(&self, port_name: &str) -> bool {
        self.ports.read().await.contains_key(port_name)
    }

    /// Registered port names, sorted.
    pub async fn list_ports(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.ports.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes a port. Returns whether it existed.
    pub async fn remove(&self, port_name: &str) -> bool {
        self.ports.write().await.remove(port_name).is_some()
    }

    /// Removes every port.
    pub async fn clear(&self) {
        self.ports.write().await.clear();
    }
}

/// Handler routing through a single port.
struct PortHandler {
    port: Arc<Port>,
}

#[async_trait]
impl Handler for PortHandler {
    async fn handle(&self, envelope: Envelope) -> Result<Envelope, Error> {
        self.port
            .route(envelope)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoHandlers(self.port.name().to_owned()))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use serde_json::json;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_route_greet() {
        let registry = PortRegistry::new();
        registry
            .register_handler("greet", |_env: Envelope| async move {
                Ok(Envelope::success(json!({"msg": "hi"})))
            })
            .await;
        let results = registry.route("greet", Envelope::new("/x")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status_code, 200);
        assert_eq!(results[0].data, Some(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn test_unknown_port_vs_empty_port() {
        let registry = PortRegistry::new();
        assert_eq!(
            registry.route("nope", Envelope::new("/x")).await,
            Err(Error::PortNotFound("nope".to_owned()))
        );
        registry
            .register_port("empty", StrategyKind::First)
            .await
            .unwrap();
        assert_eq!(
            registry.route("empty", Envelope::new("/x")).await,
            Err(Error::NoHandlers("empty".to_owned()))
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_register_port_twice_fails() {
        let registry = PortRegistry::new();
        registry
            .register_port("p", StrategyKind::Broadcast)
            .await
            .unwrap();
        let result = registry.register_port("p", StrategyKind::First).await;
        assert_eq!(result, Err(Error::PortExists("p".to_owned())));
        assert!(logs_contain("Port 'p' already exists!"));
    }

    #[tokio::test]
    async fn test_register_handler_keeps_strategy() {
        let registry = PortRegistry::new();
        registry
            .register_port("fan", StrategyKind::Broadcast)
            .await
            .unwrap();
        registry
            .register_handler("fan", |_env: Envelope| async move {
                Ok(Envelope::success(json!(1)))
            })
            .await;
        let port = registry.port("fan").await.unwrap();
        assert_eq!(port.strategy_name(), "broadcast");
        assert_eq!(port.handler_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_handler() {
        let registry = PortRegistry::new();
        assert!(registry.get_handler("echo").await.is_err());
        registry
            .register_handler("echo", |env: Envelope| async move {
                Ok(Envelope::success(env.body.unwrap_or_default()))
            })
            .await;
        let handler = registry.get_handler("echo").await.unwrap();
        let result = handler
            .handle(Envelope::new("/x").with_body(json!("ping")))
            .await
            .unwrap();
        assert_eq!(result.data, Some(json!("ping")));
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let registry = PortRegistry::new();
        let clone = registry.clone();
        registry
            .register_handler("b", |_env: Envelope| async move {
                Ok(Envelope::success(json!(null)))
            })
            .await;
        clone
            .register_port("a", StrategyKind::RoundRobin)
            .await
            .unwrap();
        assert!(registry.has_port("a").await);
        assert_eq!(registry.list_ports().await, vec!["a", "b"]);
        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        registry.clear().await;
        assert!(clone.list_ports().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_and_routing() {
        let registry = PortRegistry::new();
        registry
            .register_port("fan", StrategyKind::Broadcast)
            .await
            .unwrap();
        let mut tasks = vec![];
        for i in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .register_handler("fan", move |_env: Envelope| async move {
                        Ok(Envelope::success(json!(i)))
                    })
                    .await;
                registry.route("fan", Envelope::new("/x")).await
            }));
        }
        for task in tasks {
            let results = task.await.unwrap().unwrap();
            assert!(!results.is_empty());
        }
        let results = registry.route("fan", Envelope::new("/x")).await.unwrap();
        assert_eq!(results.len(), 16);
    }
}

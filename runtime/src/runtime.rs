// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime
//!
//! The `Runtime` owns the adapters declared in a [`RuntimeConfig`] and ties them to the
//! routing core:
//!
//! 1. [`Runtime::new`] validates the configuration and builds the per-port pipelines.
//! 2. [`Runtime::start`] binds the configured ports to their handlers (once), then builds and
//!    starts every enabled inbound adapter and connects every enabled outbound adapter. The
//!    first failure rolls back what this call started and aborts.
//! 3. [`Runtime::dispatch`] and [`Runtime::deliver`] are the inbound and outbound entry
//!    points. Both always answer with an envelope.
//! 4. [`Runtime::run`] blocks until shutdown is requested (token, SIGINT or SIGTERM), then
//!    [`Runtime::stop`]s every adapter, best effort.
//!

use crate::{
    Error,
    adapter::{AdapterHandle, InboundAdapter, OutboundAdapter},
    config::{AdapterConfig, RuntimeConfig},
    dispatcher::{Dispatcher, INTERNAL_ERROR_STATUS, NOT_FOUND_STATUS},
    factory::{AdapterContext, AdapterFactory},
    scheduler::Scheduler,
};

use router::{Envelope, HandlerLoader, PortRegistry};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use std::sync::{Arc, RwLock};

type Inbound = (String, Arc<dyn InboundAdapter>);
type Outbound = (String, Arc<dyn OutboundAdapter>);

#[derive(Default)]
struct State {
    started: bool,
    ports_bound: bool,
    inbound: Vec<Inbound>,
    outbound: Vec<Outbound>,
}

/// Adapter lifecycle owner and dispatch entry point.
pub struct Runtime {
    config: RuntimeConfig,
    registry: PortRegistry,
    loader: HandlerLoader,
    factory: AdapterFactory,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    state: Mutex<State>,
    token: RwLock<CancellationToken>,
}

impl Runtime {
    /// Builds a runtime over `registry`, creating adapters through `factory`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the configuration is invalid.
    pub fn new(
        config: RuntimeConfig,
        registry: PortRegistry,
        factory: AdapterFactory,
    ) -> Result<Self, Error> {
        config.validate()?;
        let dispatcher = Dispatcher::new(&registry, &config.policies);
        Ok(Self {
            loader: HandlerLoader::new(registry.clone()),
            config,
            registry,
            factory,
            dispatcher,
            scheduler: Scheduler::new(),
            state: Mutex::new(State::default()),
            token: RwLock::new(CancellationToken::new()),
        })
    }

    /// Replaces the scheduler running adapter lifecycle calls.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Starts every enabled adapter. A no-op when already started.
    ///
    /// # Errors
    ///
    /// The first failure, naming the adapter. Adapters started by this call are stopped
    /// again before returning.
    pub async fn start(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.started {
            warn!("Runtime already started.");
            return Ok(());
        }
        self.rearm_shutdown();
        if !state.ports_bound {
            self.bind_ports().await?;
            state.ports_bound = true;
        }

        let mut inbound: Vec<Inbound> = vec![];
        let mut outbound: Vec<Outbound> = vec![];

        for config in self.config.enabled_inbound() {
            match self.start_inbound(config).await {
                Ok(adapter) => inbound.push((config.name.clone(), adapter)),
                Err(e) => {
                    let e = named(&config.name, e, false);
                    error!("{}", e);
                    self.stop_all(inbound, outbound).await;
                    return Err(e);
                }
            }
        }
        for config in self.config.enabled_outbound() {
            match self.connect_outbound(config).await {
                Ok(adapter) => outbound.push((config.name.clone(), adapter)),
                Err(e) => {
                    let e = named(&config.name, e, true);
                    error!("{}", e);
                    self.stop_all(inbound, outbound).await;
                    return Err(e);
                }
            }
        }

        info!(
            "Runtime started with {} inbound and {} outbound adapters.",
            inbound.len(),
            outbound.len()
        );
        state.inbound = inbound;
        state.outbound = outbound;
        state.started = true;
        Ok(())
    }

    /// Stops every adapter. Failures are logged and do not prevent stopping the rest.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.started {
            debug!("Runtime not started, nothing to stop.");
            return;
        }
        let inbound = std::mem::take(&mut state.inbound);
        let outbound = std::mem::take(&mut state.outbound);
        self.stop_all(inbound, outbound).await;
        state.started = false;
        info!("Runtime stopped.");
    }

    /// Dispatches an inbound envelope to the port named in its metadata.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        self.dispatcher.dispatch(envelope).await
    }

    /// Sends an envelope through the named outbound adapter.
    ///
    /// Every failure is an envelope: 404 for an unknown adapter, 500 for an adapter that is
    /// not outbound or whose request failed.
    pub async fn deliver(&self, envelope: Envelope, adapter_name: &str) -> Envelope {
        let (adapter, inbound_only) = {
            let state = self.state.lock().await;
            let adapter = state
                .outbound
                .iter()
                .find(|(name, _)| name == adapter_name)
                .map(|(_, adapter)| adapter.clone());
            let inbound_only = state.inbound.iter().any(|(name, _)| name == adapter_name);
            (adapter, inbound_only)
        };

        let Some(adapter) = adapter else {
            if inbound_only {
                return Envelope::error(
                    INTERNAL_ERROR_STATUS,
                    Error::NotOutbound(adapter_name.to_owned()).to_string(),
                )
                .respond_to(&envelope);
            }
            warn!("Delivery to unknown adapter {}.", adapter_name);
            return Envelope::error(
                NOT_FOUND_STATUS,
                format!("Adapter '{}' not found", adapter_name),
            )
            .respond_to(&envelope);
        };

        let request = envelope.clone();
        match adapter.request(envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Delivery through adapter {} failed: {}", adapter_name, e);
                Envelope::error(
                    INTERNAL_ERROR_STATUS,
                    format!("Failed to deliver to adapter '{}': {}", adapter_name, e),
                )
                .respond_to(&request)
            }
        }
    }

    /// Waits for a shutdown request or signal, then stops the runtime.
    ///
    /// # Errors
    ///
    /// [`Error::NotStarted`] when called before [`Runtime::start`].
    pub async fn run(&self) -> Result<(), Error> {
        if !self.is_started().await {
            return Err(Error::NotStarted);
        }
        info!("Runtime running.");
        let token = self.shutdown_token();
        wait_for_shutdown(&token).await;
        token.cancel();
        self.stop().await;
        Ok(())
    }

    /// Blocking [`Runtime::run`] on a dedicated current-thread runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Scheduler`] when called from inside an async context, plus the errors of
    /// [`Runtime::run`].
    pub fn run_sync(&self) -> Result<(), Error> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Scheduler(
                "run_sync called from inside an async runtime".to_owned(),
            ));
        }
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Scheduler(e.to_string()))?
            .block_on(self.run())
    }

    /// The flag observed by [`Runtime::run`].
    ///
    /// Once cancelled it stays cancelled; the next [`Runtime::start`] arms a new one, so take
    /// the token again after a restart.
    pub fn shutdown_token(&self) -> CancellationToken {
        match self.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn request_shutdown(&self) {
        debug!("Shutdown requested.");
        self.shutdown_token().cancel();
    }

    /// Replaces a token cancelled by a previous run.
    fn rearm_shutdown(&self) {
        let mut token = match self.token.write() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.is_cancelled() {
            debug!("Arming a new shutdown token.");
            *token = CancellationToken::new();
        }
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// Names of the running inbound adapters, in start order.
    pub async fn inbound_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.inbound.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Names of the connected outbound adapters, in connect order.
    pub async fn outbound_names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.outbound.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Loader used to bind configured handler references. Register modules on it before
    /// [`Runtime::start`].
    pub fn loader(&self) -> &HandlerLoader {
        &self.loader
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Creates configured ports and appends their resolved handlers.
    ///
    /// Every reference is resolved before anything is registered, so a failed bind leaves
    /// the registry untouched and can be retried.
    async fn bind_ports(&self) -> Result<(), Error> {
        let mut ports: Vec<_> = self.config.ports.iter().collect();
        ports.sort_by(|a, b| a.0.cmp(b.0));

        let mut resolved = Vec::with_capacity(ports.len());
        for (port_name, port) in ports {
            let mut handlers = Vec::with_capacity(port.handlers.len());
            for reference in &port.handlers {
                handlers.push((reference, self.loader.resolve(reference).await?));
            }
            resolved.push((port_name, port.strategy, handlers));
        }

        for (port_name, strategy, handlers) in resolved {
            if self.registry.has_port(port_name).await {
                debug!("Port {} already registered, keeping its strategy.", port_name);
            } else {
                self.registry.register_port(port_name, strategy).await?;
            }
            for (reference, handler) in handlers {
                self.registry.register_handler_ref(port_name, handler).await;
                debug!("Bound {} to port {}.", reference, port_name);
            }
        }
        Ok(())
    }

    fn context(&self, config: &AdapterConfig) -> AdapterContext {
        AdapterContext {
            name: config.name.clone(),
            settings: config.settings.clone(),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }

    async fn start_inbound(
        &self,
        config: &AdapterConfig,
    ) -> Result<Arc<dyn InboundAdapter>, Error> {
        let handle = self.factory.create(config.kind(), &self.context(config)).await?;
        let AdapterHandle::Inbound(adapter) = handle else {
            return Err(Error::NotInbound(config.name.clone()));
        };
        let task = adapter.clone();
        self.scheduler.run(async move { task.start().await }).await??;
        debug!("Inbound adapter {} started.", config.name);
        Ok(adapter)
    }

    async fn connect_outbound(
        &self,
        config: &AdapterConfig,
    ) -> Result<Arc<dyn OutboundAdapter>, Error> {
        let handle = self.factory.create(config.kind(), &self.context(config)).await?;
        let AdapterHandle::Outbound(adapter) = handle else {
            return Err(Error::NotOutbound(config.name.clone()));
        };
        let task = adapter.clone();
        self.scheduler.run(async move { task.connect().await }).await??;
        debug!("Outbound adapter {} connected.", config.name);
        Ok(adapter)
    }

    async fn stop_all(&self, inbound: Vec<Inbound>, outbound: Vec<Outbound>) {
        for (name, adapter) in inbound {
            let result = self.scheduler.run(async move { adapter.stop().await }).await;
            match result.and_then(|stopped| stopped) {
                Ok(()) => debug!("Inbound adapter {} stopped.", name),
                Err(e) => error!("Can't stop adapter {}: {}", name, e),
            }
        }
        for (name, adapter) in outbound {
            let result = self
                .scheduler
                .run(async move { adapter.disconnect().await })
                .await;
            match result.and_then(|disconnected| disconnected) {
                Ok(()) => debug!("Outbound adapter {} disconnected.", name),
                Err(e) => error!("Can't disconnect adapter {}: {}", name, e),
            }
        }
    }
}

/// Makes sure a start failure names the adapter it came from.
fn named(adapter: &str, error: Error, outbound: bool) -> Error {
    match error {
        Error::AdapterStart { .. }
        | Error::AdapterConnection { .. }
        | Error::NotInbound(_)
        | Error::NotOutbound(_) => error,
        other if outbound => Error::AdapterConnection {
            adapter: adapter.to_owned(),
            reason: other.to_string(),
        },
        other => Error::AdapterStart {
            adapter: adapter.to_owned(),
            reason: other.to_string(),
        },
    }
}

async fn wait_for_shutdown(token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Can't listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!("Can't listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = token.cancelled() => debug!("Shutdown token cancelled."),
        _ = ctrl_c => info!("SIGINT received, shutting down."),
        _ = terminate => info!("SIGTERM received, shutting down."),
    }
}

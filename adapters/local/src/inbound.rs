// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! In-process inbound adapter.
//!
//! Requests arrive on a bounded channel as `(envelope, reply)` pairs. The receive loop
//! dispatches each one on its own task, so concurrent senders reach the port's pipeline
//! concurrently and its backpressure policy applies.
//!
//! Stopping refuses what is still queued and waits for the dispatches already in flight.
//!

use router::Envelope;
use runtime::{Dispatcher, Error, InboundAdapter};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Default channel capacity of a local adapter.
pub const DEFAULT_CAPACITY: usize = 64;

type Request = (Envelope, oneshot::Sender<Envelope>);

struct Worker {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Inbound adapter fed by [`LocalClient`]s.
pub struct ChannelInbound {
    name: String,
    dispatcher: Dispatcher,
    sender: mpsc::Sender<Request>,
    receiver: Arc<Mutex<mpsc::Receiver<Request>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    in_flight: TaskTracker,
}

impl ChannelInbound {
    /// `capacity` must be at least 1.
    pub fn new(name: &str, dispatcher: Dispatcher, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            name: name.to_owned(),
            dispatcher,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A client submitting requests to this adapter.
    pub fn client(&self) -> LocalClient {
        LocalClient {
            name: self.name.clone(),
            sender: self.sender.clone(),
            running: self.running.clone(),
        }
    }
}

async fn receive_loop(
    name: String,
    dispatcher: Dispatcher,
    receiver: Arc<Mutex<mpsc::Receiver<Request>>>,
    in_flight: TaskTracker,
    token: CancellationToken,
) {
    let mut receiver = receiver.lock().await;
    debug!("Local adapter {} accepting requests.", name);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            request = receiver.recv() => {
                let Some((envelope, reply)) = request else {
                    break;
                };
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move {
                    let response = dispatcher.dispatch(envelope).await;
                    if reply.send(response).is_err() {
                        debug!("Local client went away before the response.");
                    }
                });
            }
        }
    }
    // Refuse what was queued after the stop; dropping the reply disconnects the client.
    let mut refused = 0;
    while receiver.try_recv().is_ok() {
        refused += 1;
    }
    if refused > 0 {
        warn!("Local adapter {} refused {} queued requests.", name, refused);
    }
    debug!("Local adapter {} receive loop finished.", name);
}

#[async_trait]
impl InboundAdapter for ChannelInbound {
    async fn start(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            debug!("Local adapter {} is already running.", self.name);
            return Ok(());
        }
        let token = CancellationToken::new();
        self.in_flight.reopen();
        let task = tokio::spawn(receive_loop(
            self.name.clone(),
            self.dispatcher.clone(),
            self.receiver.clone(),
            self.in_flight.clone(),
            token.clone(),
        ));
        *worker = Some(Worker { token, task });
        self.running.store(true, Ordering::SeqCst);
        debug!("Local adapter {} started.", self.name);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        let Some(worker) = self.worker.lock().await.take() else {
            debug!("Local adapter {} is not running.", self.name);
            return Ok(());
        };
        self.running.store(false, Ordering::SeqCst);
        worker.token.cancel();
        worker.task.await.map_err(|e| Error::AdapterStop {
            adapter: self.name.clone(),
            reason: e.to_string(),
        })?;
        self.in_flight.close();
        if !self.in_flight.is_empty() {
            debug!(
                "Local adapter {} waiting for {} requests in flight.",
                self.name,
                self.in_flight.len()
            );
        }
        self.in_flight.wait().await;
        debug!("Local adapter {} stopped.", self.name);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Submits requests to a [`ChannelInbound`] and awaits the responses.
#[derive(Clone)]
pub struct LocalClient {
    name: String,
    sender: mpsc::Sender<Request>,
    running: Arc<AtomicBool>,
}

impl LocalClient {
    pub fn adapter_name(&self) -> &str {
        &self.name
    }

    /// Sends a request through the adapter's port dispatch.
    ///
    /// # Errors
    ///
    /// [`Error::Disconnected`] when the adapter is not running or stops before answering.
    pub async fn send(&self, envelope: Envelope) -> Result<Envelope, Error> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::Disconnected(self.name.clone()));
        }
        let (reply, response) = oneshot::channel();
        self.sender
            .send((envelope, reply))
            .await
            .map_err(|_| Error::Disconnected(self.name.clone()))?;
        response
            .await
            .map_err(|_| Error::Disconnected(self.name.clone()))
    }
}

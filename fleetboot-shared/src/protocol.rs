//! Capability-negotiated protocol over a [`Transport`].
//!
//! Before normal operation each side advertises the set of named
//! optional features it supports: the initiating side (the runner)
//! sends `welcome` listing its capabilities and the peer answers with
//! `hello` listing its own. After that, [`Protocol::capable`] reports
//! whether a feature may be used - a feature is usable only when both
//! sides declared it. The agent never sends a message type the peer has
//! not declared support for.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::message::Message;
use crate::transport::Transport;

/// Message type opening capability negotiation (sent by the runner).
pub const WELCOME: &str = "welcome";

/// Message type completing capability negotiation (sent by the worker).
pub const HELLO: &str = "hello";

/// Capability name for advance notice of instance reclamation.
pub const GRACEFUL_TERMINATION: &str = "graceful-termination";

type Handler = Box<dyn Fn(&Message) + Send + Sync>;

/// One side of the capability channel.
pub struct Protocol {
    transport: Arc<dyn Transport>,
    local_caps: Mutex<BTreeSet<String>>,
    remote_caps: Mutex<BTreeSet<String>>,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    initialized_tx: watch::Sender<bool>,
    initialized_rx: watch::Receiver<bool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl Protocol {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let (initialized_tx, initialized_rx) = watch::channel(false);
        Arc::new(Self {
            transport,
            local_caps: Mutex::new(BTreeSet::new()),
            remote_caps: Mutex::new(BTreeSet::new()),
            handlers: Mutex::new(HashMap::new()),
            initialized_tx,
            initialized_rx,
            recv_task: Mutex::new(None),
        })
    }

    /// Declare a capability supported by this side. Call before `start`.
    pub fn add_capability(&self, name: &str) {
        self.local_caps.lock().unwrap().insert(name.to_string());
    }

    /// Register a handler for incoming messages of the given type.
    pub fn register<F>(&self, msg_type: &str, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .entry(msg_type.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Start the protocol. The initiating side sends `welcome`; the
    /// peer waits for it and answers with `hello`.
    pub fn start(self: &Arc<Self>, initiate: bool) {
        if initiate {
            let welcome =
                Message::new(WELCOME).with_property("capabilities", self.local_caps_value());
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                if let Err(e) = transport.send(welcome).await {
                    tracing::warn!("could not send welcome: {}", e);
                }
            });
        }

        let proto = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(message) = proto.transport.recv().await {
                proto.handle(message).await;
            }
            tracing::debug!("capability channel closed");
        });
        *self.recv_task.lock().unwrap() = Some(task);
    }

    async fn handle(&self, message: Message) {
        match message.msg_type.as_str() {
            WELCOME => {
                self.record_remote_caps(&message);
                let hello =
                    Message::new(HELLO).with_property("capabilities", self.local_caps_value());
                if let Err(e) = self.transport.send(hello).await {
                    tracing::warn!("could not send hello: {}", e);
                }
                let _ = self.initialized_tx.send(true);
            }
            HELLO => {
                self.record_remote_caps(&message);
                let _ = self.initialized_tx.send(true);
            }
            _ => {}
        }

        let handlers = self.handlers.lock().unwrap();
        if let Some(list) = handlers.get(&message.msg_type) {
            for handler in list {
                handler(&message);
            }
        }
    }

    fn local_caps_value(&self) -> Value {
        Value::Array(
            self.local_caps
                .lock()
                .unwrap()
                .iter()
                .map(|c| Value::String(c.clone()))
                .collect(),
        )
    }

    fn record_remote_caps(&self, message: &Message) {
        let caps: BTreeSet<String> = message
            .property("capabilities")
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        *self.remote_caps.lock().unwrap() = caps;
    }

    /// True once capability negotiation has completed.
    pub fn initialized(&self) -> bool {
        *self.initialized_rx.borrow()
    }

    /// Wait until capability negotiation has completed. Returns
    /// immediately if it already has; never returns early otherwise.
    pub async fn wait_until_initialized(&self) {
        let mut rx = self.initialized_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Whether the named capability may be used: negotiation completed
    /// and both sides declared it.
    pub fn capable(&self, name: &str) -> bool {
        self.initialized()
            && self.local_caps.lock().unwrap().contains(name)
            && self.remote_caps.lock().unwrap().contains(name)
    }

    /// Fire-and-forget notification. Failures are logged, never
    /// surfaced: by the time a send fails the worker is already gone.
    pub async fn send(&self, message: Message) {
        let msg_type = message.msg_type.clone();
        if let Err(e) = self.transport.send(message).await {
            tracing::warn!("could not send {} message: {}", msg_type, e);
        }
    }

    /// Stop the receive loop. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(task) = self.recv_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorker;

    #[tokio::test]
    async fn negotiation_intersects_capabilities() {
        let worker = FakeWorker::with_capabilities(&["graceful-termination", "worker-only"]);
        worker.runner_protocol.add_capability("graceful-termination");
        worker.runner_protocol.add_capability("runner-only");
        worker.start().await;

        assert!(worker.runner_protocol.capable("graceful-termination"));
        assert!(!worker.runner_protocol.capable("runner-only"));
        assert!(!worker.runner_protocol.capable("worker-only"));
        assert!(!worker.runner_protocol.capable("never-declared"));

        assert!(worker.worker_protocol.capable("graceful-termination"));
        assert!(!worker.worker_protocol.capable("runner-only"));
    }

    #[tokio::test]
    async fn capable_is_false_before_negotiation() {
        let (a, _b) = crate::transport::LocalTransport::pair();
        let proto = Protocol::new(Arc::new(a));
        proto.add_capability("graceful-termination");
        assert!(!proto.capable("graceful-termination"));
    }

    #[tokio::test]
    async fn messages_reach_registered_handlers() {
        let worker = FakeWorker::with_capabilities(&["graceful-termination"]);
        worker.runner_protocol.add_capability("graceful-termination");
        let received = worker.messages_received("graceful-termination");
        worker.start().await;

        worker
            .runner_protocol
            .send(Message::new("graceful-termination").with_property("finish-tasks", false))
            .await;

        crate::testing::eventually(|| received.load(std::sync::atomic::Ordering::SeqCst) == 1)
            .await;
    }

    #[tokio::test]
    async fn stop_aborts_receive_loop() {
        let worker = FakeWorker::with_capabilities(&[]);
        worker.start().await;
        worker.runner_protocol.stop();
        // A second stop is a no-op.
        worker.runner_protocol.stop();
    }
}

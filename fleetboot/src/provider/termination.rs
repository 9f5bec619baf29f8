//! Background monitor relaying platform preemption notices to the
//! worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetboot_shared::protocol::{Protocol, GRACEFUL_TERMINATION};
use fleetboot_shared::{FleetbootResult, Message};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Event types that mean the instance is about to be taken away.
pub const PREEMPTION_EVENT_TYPES: &[&str] = &["Preempt", "Terminate"];

/// A platform-specific source of scheduled termination events.
#[async_trait]
pub trait TerminationSignal: Send + Sync {
    /// The types of the currently pending events, empty if none.
    async fn pending_event_types(&self) -> FleetbootResult<Vec<String>>;
}

/// Polls a [`TerminationSignal`] and sends at most one
/// `graceful-termination` notice per run.
pub struct TerminationMonitor {
    signal: Arc<dyn TerminationSignal>,
    protocol: Arc<Protocol>,
    notice_sent: AtomicBool,
}

impl TerminationMonitor {
    pub fn new(signal: Arc<dyn TerminationSignal>, protocol: Arc<Protocol>) -> Arc<Self> {
        Arc::new(Self {
            signal,
            protocol,
            notice_sent: AtomicBool::new(false),
        })
    }

    /// One poll of the signal. Returns whether termination is due.
    /// Signal errors are logged and treated as not-due so a flaky
    /// metadata endpoint cannot take the run down.
    pub async fn check(&self) -> bool {
        let event_types = match self.signal.pending_event_types().await {
            Ok(event_types) => event_types,
            Err(e) => {
                tracing::warn!("could not query termination events: {e}");
                return false;
            }
        };

        let due = event_types
            .iter()
            .any(|t| PREEMPTION_EVENT_TYPES.contains(&t.as_str()));
        if !due {
            return false;
        }

        if !self.notice_sent.swap(true, Ordering::SeqCst) {
            tracing::warn!(?event_types, "instance termination is imminent");
            if self.protocol.capable(GRACEFUL_TERMINATION) {
                self.protocol
                    .send(Message::new(GRACEFUL_TERMINATION).with_property("finish-tasks", false))
                    .await;
            }
        }
        true
    }

    /// Arm the recurring poll. The returned handle owns the task.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let monitor = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of `interval` fires immediately; skip it so
            // the monitor polls only after a full period.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // An in-flight check runs to completion even if stop()
                // was requested meanwhile.
                monitor.check().await;
                if token.is_cancelled() {
                    break;
                }
            }
        });
        MonitorHandle { cancel, task }
    }
}

/// Handle to a running monitor task.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop polling and wait for the task to wind down. No poll starts
    /// after this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::warn!("termination monitor task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetboot_shared::testing::FakeWorker;
    use fleetboot_shared::FleetbootError;
    use std::sync::atomic::AtomicUsize;

    struct FakeSignal {
        event_types: Vec<String>,
        error: Option<String>,
        queries: AtomicUsize,
    }

    impl FakeSignal {
        fn with_events(event_types: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                event_types: event_types.iter().map(|t| t.to_string()).collect(),
                error: None,
                queries: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                event_types: vec![],
                error: Some("metadata endpoint unreachable".into()),
                queries: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TerminationSignal for FakeSignal {
        async fn pending_event_types(&self) -> FleetbootResult<Vec<String>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(message) => Err(FleetbootError::Metadata(message.clone())),
                None => Ok(self.event_types.clone()),
            }
        }
    }

    async fn started_worker(capabilities: &[&str]) -> FakeWorker {
        let worker = FakeWorker::with_capabilities(capabilities);
        worker.runner_protocol.add_capability(GRACEFUL_TERMINATION);
        worker.start().await;
        worker
    }

    #[tokio::test]
    async fn no_events_is_not_due() {
        let worker = started_worker(&[GRACEFUL_TERMINATION]).await;
        let monitor = TerminationMonitor::new(
            FakeSignal::with_events(&[]),
            Arc::clone(&worker.runner_protocol),
        );
        assert!(!monitor.check().await);
    }

    #[tokio::test]
    async fn unrelated_events_are_not_due() {
        let worker = started_worker(&[GRACEFUL_TERMINATION]).await;
        let monitor = TerminationMonitor::new(
            FakeSignal::with_events(&["Freeze", "Reboot"]),
            Arc::clone(&worker.runner_protocol),
        );
        assert!(!monitor.check().await);
    }

    #[tokio::test]
    async fn signal_error_is_not_due() {
        let worker = started_worker(&[GRACEFUL_TERMINATION]).await;
        let monitor =
            TerminationMonitor::new(FakeSignal::failing(), Arc::clone(&worker.runner_protocol));
        assert!(!monitor.check().await);
    }

    #[tokio::test]
    async fn preempt_is_due_and_notifies_exactly_once() {
        let worker = FakeWorker::with_capabilities(&[GRACEFUL_TERMINATION]);
        worker.runner_protocol.add_capability(GRACEFUL_TERMINATION);
        let notices = worker.messages_received(GRACEFUL_TERMINATION);
        worker.start().await;
        let monitor = TerminationMonitor::new(
            FakeSignal::with_events(&["Preempt"]),
            Arc::clone(&worker.runner_protocol),
        );

        assert!(monitor.check().await);
        assert!(monitor.check().await);

        fleetboot_shared::testing::eventually(|| notices.load(Ordering::SeqCst) == 1).await;
        fleetboot_shared::testing::settle().await;
        assert_eq!(notices.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_notice_without_the_capability() {
        let worker = FakeWorker::with_capabilities(&[]);
        worker.runner_protocol.add_capability(GRACEFUL_TERMINATION);
        let notices = worker.messages_received(GRACEFUL_TERMINATION);
        worker.start().await;
        let monitor = TerminationMonitor::new(
            FakeSignal::with_events(&["Terminate"]),
            Arc::clone(&worker.runner_protocol),
        );

        assert!(monitor.check().await);
        fleetboot_shared::testing::settle().await;
        assert_eq!(notices.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_halts_polling() {
        let worker = started_worker(&[GRACEFUL_TERMINATION]).await;
        let signal = FakeSignal::with_events(&[]);
        let monitor = TerminationMonitor::new(
            Arc::clone(&signal) as Arc<dyn TerminationSignal>,
            Arc::clone(&worker.runner_protocol),
        );

        let handle = monitor.spawn(Duration::from_millis(5));
        fleetboot_shared::testing::eventually(|| signal.queries.load(Ordering::SeqCst) >= 2).await;
        handle.stop().await;

        let after_stop = signal.queries.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(signal.queries.load(Ordering::SeqCst), after_stop);
    }
}

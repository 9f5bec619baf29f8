//! In-process fakes for code that talks over the capability channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::Protocol;
use crate::transport::LocalTransport;

/// A fake worker on the far end of an in-process transport pair.
///
/// The worker side starts immediately and waits for the runner's
/// `welcome`; the runner side is left unstarted so a test can declare
/// its own capabilities first, then call [`FakeWorker::start`].
pub struct FakeWorker {
    pub runner_protocol: Arc<Protocol>,
    pub worker_protocol: Arc<Protocol>,
}

impl FakeWorker {
    pub fn with_capabilities(capabilities: &[&str]) -> Self {
        let (runner_end, worker_end) = LocalTransport::pair();
        let runner_protocol = Protocol::new(Arc::new(runner_end));
        let worker_protocol = Protocol::new(Arc::new(worker_end));
        for capability in capabilities {
            worker_protocol.add_capability(capability);
        }
        worker_protocol.start(false);
        Self {
            runner_protocol,
            worker_protocol,
        }
    }

    /// Count messages of the given type arriving at the worker.
    /// Register before calling [`FakeWorker::start`].
    pub fn messages_received(&self, msg_type: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let recorder = Arc::clone(&counter);
        self.worker_protocol.register(msg_type, move |_| {
            recorder.fetch_add(1, Ordering::SeqCst);
        });
        counter
    }

    /// Start the runner side and wait for negotiation to complete on
    /// both ends.
    pub async fn start(&self) {
        self.runner_protocol.start(true);
        self.runner_protocol.wait_until_initialized().await;
        self.worker_protocol.wait_until_initialized().await;
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within five seconds");
}

/// Give in-flight channel activity a moment to drain, for asserting
/// that something did NOT happen.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

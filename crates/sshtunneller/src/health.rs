//! Health monitor
//!
//! Each poll combines two independent signals: the captured diagnostic lines
//! (a remote target refusing connections only shows up there) and the
//! session's per-forward status map. Nothing is retried here; an unhealthy
//! tunnel ends the process and the supervisor starts a fresh one.

use std::time::Duration;

use crate::diagnostics::{DiagnosticSink, REMOTE_SIDE_MARKER};
use crate::exit::ExitStatus;
use crate::session::ForwardStatus;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Classification of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    Healthy,
    RemoteUnreachable,
    ForwardDown { index: usize },
    /// The session reported no forwards at all
    Unknown,
}

/// What the caller should do after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    Continue,
    Terminate(ExitStatus),
}

impl HealthSignal {
    pub fn action(self) -> HealthAction {
        match self {
            HealthSignal::Healthy | HealthSignal::Unknown => HealthAction::Continue,
            HealthSignal::RemoteUnreachable => {
                HealthAction::Terminate(ExitStatus::RemoteUnreachable)
            }
            HealthSignal::ForwardDown { .. } => HealthAction::Terminate(ExitStatus::TunnelDead),
        }
    }
}

pub struct HealthMonitor {
    sink: DiagnosticSink,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(sink: DiagnosticSink) -> Self {
        Self {
            sink,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Classify the tunnel's current state. Does not sleep.
    pub async fn poll<S: ForwardStatus + ?Sized>(&self, session: &S) -> HealthSignal {
        if self.sink.contains(REMOTE_SIDE_MARKER) {
            return HealthSignal::RemoteUnreachable;
        }

        let status = session.check_forwards().await;
        if status.is_empty() {
            return HealthSignal::Unknown;
        }
        match status.iter().find(|(_, up)| !**up) {
            Some((index, _)) => HealthSignal::ForwardDown { index: *index },
            None => HealthSignal::Healthy,
        }
    }

    /// Poll every interval until the tunnel is unhealthy
    pub async fn watch<S: ForwardStatus + ?Sized>(&self, session: &S) -> ExitStatus {
        loop {
            let signal = self.poll(session).await;
            match signal {
                HealthSignal::Healthy => tracing::trace!("Tunnel healthy"),
                HealthSignal::Unknown => {
                    tracing::warn!("Tunnel status unknown: session reported no forwards")
                }
                HealthSignal::RemoteUnreachable => tracing::error!(
                    "Problem with remote side, maybe the other side is unavailable, restarting..."
                ),
                HealthSignal::ForwardDown { index } => {
                    tracing::debug!("Forward {} reported down", index);
                    tracing::error!("Tunnel is dead, restarting...")
                }
            }

            if let HealthAction::Terminate(status) = signal.action() {
                return status;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Session whose status map is set by the test
    struct FakeSession {
        status: Mutex<BTreeMap<usize, bool>>,
        checks: AtomicUsize,
    }

    impl FakeSession {
        fn new(status: &[(usize, bool)]) -> Self {
            Self {
                status: Mutex::new(status.iter().copied().collect()),
                checks: AtomicUsize::new(0),
            }
        }

        fn set(&self, index: usize, up: bool) {
            self.status.lock().insert(index, up);
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ForwardStatus for FakeSession {
        async fn check_forwards(&self) -> BTreeMap<usize, bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.status.lock().clone()
        }
    }

    fn remote_failure_line() -> String {
        format!(
            "Could not establish connection from local 127.0.0.1:8080 {} (0.0.0.0:80): ConnectFailed",
            REMOTE_SIDE_MARKER
        )
    }

    #[tokio::test]
    async fn test_all_up_continues() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = FakeSession::new(&[(0, true)]);

        let signal = monitor.poll(&session).await;
        assert_eq!(signal, HealthSignal::Healthy);
        assert_eq!(signal.action(), HealthAction::Continue);
    }

    #[tokio::test]
    async fn test_healthy_poll_is_repeatable() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = FakeSession::new(&[(0, true), (1, true), (2, true)]);

        for _ in 0..1000 {
            assert_eq!(monitor.poll(&session).await, HealthSignal::Healthy);
        }
        assert_eq!(session.checks(), 1000);
    }

    #[tokio::test]
    async fn test_forward_down_terminates_as_tunnel_dead() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = FakeSession::new(&[(0, false)]);

        let signal = monitor.poll(&session).await;
        assert_eq!(signal, HealthSignal::ForwardDown { index: 0 });
        assert_eq!(
            signal.action(),
            HealthAction::Terminate(ExitStatus::TunnelDead)
        );
    }

    #[tokio::test]
    async fn test_any_single_forward_down_is_fatal() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = FakeSession::new(&[(0, true), (1, false), (2, true)]);

        assert_eq!(
            monitor.poll(&session).await,
            HealthSignal::ForwardDown { index: 1 }
        );
    }

    #[tokio::test]
    async fn test_marker_wins_regardless_of_status() {
        let sink = DiagnosticSink::new();
        sink.record(remote_failure_line());
        let monitor = HealthMonitor::new(sink);

        for status in [[(0, true)], [(0, false)]] {
            let session = FakeSession::new(&status);
            let signal = monitor.poll(&session).await;
            assert_eq!(signal, HealthSignal::RemoteUnreachable);
            assert_eq!(
                signal.action(),
                HealthAction::Terminate(ExitStatus::RemoteUnreachable)
            );
            // The status map is never consulted once the marker is seen
            assert_eq!(session.checks(), 0);
        }
    }

    #[tokio::test]
    async fn test_unrelated_errors_are_ignored() {
        let sink = DiagnosticSink::new();
        sink.record("russh::client: keepalive timeout");
        let monitor = HealthMonitor::new(sink);
        let session = FakeSession::new(&[(0, true)]);

        assert_eq!(monitor.poll(&session).await, HealthSignal::Healthy);
    }

    #[tokio::test]
    async fn test_empty_status_is_unknown() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = FakeSession::new(&[]);

        let signal = monitor.poll(&session).await;
        assert_eq!(signal, HealthSignal::Unknown);
        assert_eq!(signal.action(), HealthAction::Continue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_returns_when_forward_drops() {
        let monitor = HealthMonitor::new(DiagnosticSink::new());
        let session = std::sync::Arc::new(FakeSession::new(&[(0, true)]));

        let watched = session.clone();
        let handle = tokio::spawn(async move { monitor.watch(watched.as_ref()).await });

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(!handle.is_finished());
        let polls_while_healthy = session.checks();
        assert!(polls_while_healthy >= 5);

        session.set(0, false);
        let status = handle.await.unwrap();
        assert_eq!(status, ExitStatus::TunnelDead);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_returns_when_marker_appears() {
        let sink = DiagnosticSink::new();
        let monitor = HealthMonitor::new(sink.clone()).with_interval(Duration::from_millis(250));
        let session = std::sync::Arc::new(FakeSession::new(&[(0, true)]));

        let watched = session.clone();
        let handle = tokio::spawn(async move { monitor.watch(watched.as_ref()).await });

        tokio::time::sleep(Duration::from_secs(2)).await;
        sink.record(remote_failure_line());
        assert_eq!(handle.await.unwrap(), ExitStatus::RemoteUnreachable);
    }
}

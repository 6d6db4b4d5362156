// src/flow/mod.rs
//
// Session boundary for each role. A flow owns one TransferSession, drives the
// components, classifies whatever goes wrong and holds the terminal status
// for its display window before resetting to idle.

mod receive;
mod send;

pub use self::receive::ReceiveFlow;
pub use self::send::SendFlow;

use crate::download::SinkKind;
use crate::error::{classify, FailureCategory, TransferError};
use crate::progress::TransferStats;
use crate::session::{Direction, EventSink, SessionEvent, StatusCallback, TransferSession};
use crate::token::Token;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Terminal success record of one transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub session_id: Uuid,
    pub direction: Direction,
    pub token: Option<Token>,
    pub resource_name: String,
    /// Where a download was saved
    pub path: Option<PathBuf>,
    pub stats: TransferStats,
    /// Sink used by a download
    pub sink: Option<SinkKind>,
    /// Body binding used by an upload
    pub binding: Option<&'static str>,
}

impl TransferReport {
    pub fn throughput_mbps(&self) -> f64 {
        self.stats.throughput_mbps()
    }
}

/// How a flow run ended
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Completed(TransferReport),
    Failed {
        category: FailureCategory,
        /// Status line that was shown to the user
        message: String,
        /// Underlying error text, for logs
        detail: String,
    },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { category, .. } => Some(*category),
        }
    }
}

/// The flow's session plus the observer notified after every applied event
struct SessionHandle {
    session: Arc<Mutex<TransferSession>>,
    observer: Option<StatusCallback>,
}

impl SessionHandle {
    fn new(direction: Direction, observer: Option<StatusCallback>) -> Self {
        Self {
            session: Arc::new(Mutex::new(TransferSession::new(direction, ""))),
            observer,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransferSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the previous session with a fresh one
    fn restart(&self, resource_name: &str) -> Uuid {
        let mut session = self.lock();
        let direction = session.direction();
        *session = TransferSession::new(direction, resource_name);
        session.id()
    }

    fn current(&self) -> TransferSession {
        self.lock().clone()
    }

    /// Sink that applies events to the session and reports the new status
    fn events(&self) -> EventSink {
        let session = self.session.clone();
        let observer = self.observer.clone();

        Arc::new(move |event: SessionEvent| {
            let update = {
                let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = session.apply(event) {
                    warn!("Ignoring session event: {}", e);
                    return;
                }
                session.snapshot()
            };
            if let Some(observer) = &observer {
                observer(&update);
            }
        })
    }

    /// Settle the run: show the terminal status, wait out its window, reset
    async fn conclude(
        &self,
        result: Result<TransferReport, TransferError>,
        windows: DisplayWindows,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let events = self.events();

        let outcome = match result {
            Ok(report) => {
                events(SessionEvent::Completed);
                info!(
                    "{} {} bytes in {:.2}s ({:.2} MB/s)",
                    report.resource_name,
                    report.stats.bytes,
                    report.stats.elapsed.as_secs_f64(),
                    report.throughput_mbps()
                );
                linger(windows.success, cancel).await;
                TransferOutcome::Completed(report)
            }
            Err(err) => {
                let category = classify(&err);
                let direction = self.lock().direction();
                error!("Transfer failed ({}): {}", category, err);
                events(SessionEvent::Failed(category));
                linger(windows.failure, cancel).await;
                TransferOutcome::Failed {
                    category,
                    message: category.message(direction).to_string(),
                    detail: err.to_string(),
                }
            }
        };

        events(SessionEvent::Reset);
        outcome
    }
}

#[derive(Debug, Clone, Copy)]
struct DisplayWindows {
    success: Duration,
    failure: Duration,
}

/// Keep the terminal status up; cancellation cuts the wait short
async fn linger(window: Duration, cancel: &CancellationToken) {
    if window.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(window) => {}
        _ = cancel.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, StatusUpdate};
    use tokio::time::Instant;

    fn recording_handle(direction: Direction) -> (SessionHandle, Arc<Mutex<Vec<StatusUpdate>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let seen = updates.clone();
        let observer: StatusCallback = Arc::new(move |u: &StatusUpdate| {
            seen.lock().unwrap().push(u.clone());
        });
        (SessionHandle::new(direction, Some(observer)), updates)
    }

    fn report(handle: &SessionHandle) -> TransferReport {
        let session = handle.current();
        TransferReport {
            session_id: session.id(),
            direction: session.direction(),
            token: session.token().cloned(),
            resource_name: session.resource_name().to_string(),
            path: None,
            stats: TransferStats {
                bytes: 4,
                total_bytes: Some(4),
                sha256: String::new(),
                elapsed: Duration::from_millis(10),
            },
            sink: None,
            binding: Some("streaming"),
        }
    }

    const NO_WAIT: DisplayWindows = DisplayWindows {
        success: Duration::ZERO,
        failure: Duration::ZERO,
    };

    #[tokio::test]
    async fn test_events_reach_the_observer() {
        let (handle, updates) = recording_handle(Direction::Download);
        handle.restart("ab12");
        let events = handle.events();

        events(SessionEvent::Connecting);
        // Rejected: downloads never request tokens
        events(SessionEvent::TokenRequested);

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].state, SessionState::Connecting);
        assert_eq!(updates[0].message, "Connecting...");
        assert_eq!(handle.current().state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_failure_is_classified_rendered_and_reset() {
        let (handle, updates) = recording_handle(Direction::Download);
        handle.restart("ab12");
        handle.events()(SessionEvent::Connecting);

        let outcome = handle
            .conclude(
                Err(TransferError::Http {
                    status: 408,
                    reason: "Request Timeout".into(),
                }),
                NO_WAIT,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.category(), Some(FailureCategory::PeerDisconnected));
        match &outcome {
            TransferOutcome::Failed { message, .. } => {
                assert_eq!(message, "No file is available for this token.")
            }
            TransferOutcome::Completed(_) => panic!("expected failure"),
        }

        let states: Vec<SessionState> = updates.lock().unwrap().iter().map(|u| u.state).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Connecting,
                SessionState::Failed(FailureCategory::PeerDisconnected),
                SessionState::Idle,
            ]
        );
        assert_eq!(handle.current().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_success_completes_then_resets() {
        let (handle, updates) = recording_handle(Direction::Download);
        handle.restart("ab12");
        let events = handle.events();
        events(SessionEvent::Connecting);
        events(SessionEvent::TransferStarted {
            resource_name: "a.txt".into(),
            total_bytes: Some(4),
        });

        let outcome = handle
            .conclude(Ok(report(&handle)), NO_WAIT, &CancellationToken::new())
            .await;
        assert!(outcome.is_success());

        let updates = updates.lock().unwrap();
        let completed = &updates[updates.len() - 2];
        assert_eq!(completed.state, SessionState::Completed);
        assert_eq!(completed.message, "Download completed!");
        assert_eq!(updates[updates.len() - 1].state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_window_is_held() {
        let (handle, _) = recording_handle(Direction::Upload);
        handle.restart("a.bin");
        let windows = DisplayWindows {
            success: Duration::from_secs(3),
            failure: Duration::from_secs(5),
        };

        let started = Instant::now();
        handle
            .conclude(Err(TransferError::PeerDisconnected), windows, &CancellationToken::new())
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(5) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_the_display_window() {
        let (handle, _) = recording_handle(Direction::Upload);
        handle.restart("a.bin");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let outcome = handle
            .conclude(
                Err(TransferError::Cancelled),
                DisplayWindows {
                    success: Duration::from_secs(3),
                    failure: Duration::from_secs(5),
                },
                &cancel,
            )
            .await;
        assert_eq!(outcome.category(), Some(FailureCategory::Cancelled));
        assert!(started.elapsed() < Duration::from_millis(1));
    }
}

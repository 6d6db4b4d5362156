// src/session.rs
//
// The per-role transfer session value and its single transition function

use crate::error::FailureCategory;
use crate::progress::ProgressSample;
use crate::token::Token;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Which side of the relay this session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Name, size and content type of an upload source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RequestingToken,
    AwaitingPeer,
    ConfirmingPeer,
    PeerConfirmed,
    Connecting,
    Transferring,
    Completed,
    Failed(FailureCategory),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Everything that moves a session from one state to the next
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TokenRequested,
    TokenIssued(Token),
    Waiting { remaining_secs: u64 },
    PeerAttached,
    PeerConfirmed,
    Connecting,
    TransferStarted {
        resource_name: String,
        total_bytes: Option<u64>,
    },
    Progress(ProgressSample),
    Completed,
    Failed(FailureCategory),
    Reset,
}

/// Callback through which components report session events
pub type EventSink = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Snapshot handed to status observers after every applied event
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub session_id: Uuid,
    pub direction: Direction,
    pub state: SessionState,
    pub token: Option<Token>,
    pub message: String,
    pub progress: Option<ProgressSample>,
}

/// Observer for rendering status lines
pub type StatusCallback = Arc<dyn Fn(&StatusUpdate) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("event {event:?} is not valid while {state:?}")]
pub struct InvalidTransition {
    pub state: SessionState,
    pub event: SessionEvent,
}

/// One transfer in one direction, from token request to reset
#[derive(Debug, Clone)]
pub struct TransferSession {
    id: Uuid,
    direction: Direction,
    token: Option<Token>,
    resource_name: String,
    state: SessionState,
    status: String,
    bytes_transferred: u64,
    total_bytes: Option<u64>,
    started_at: DateTime<Utc>,
}

impl TransferSession {
    pub fn new(direction: Direction, resource_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            token: None,
            resource_name: resource_name.into(),
            state: SessionState::Idle,
            status: String::new(),
            bytes_transferred: 0,
            total_bytes: None,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Latest progress, once the transfer has started
    pub fn progress(&self) -> Option<ProgressSample> {
        match self.state {
            SessionState::Transferring | SessionState::Completed => {
                Some(ProgressSample::new(self.bytes_transferred, self.total_bytes))
            }
            _ => None,
        }
    }

    /// Apply one event. Rejected events leave the session untouched.
    pub fn apply(&mut self, event: SessionEvent) -> Result<(), InvalidTransition> {
        use SessionEvent as E;

        let Some(next) = self.next_state(&event) else {
            return Err(InvalidTransition {
                state: self.state,
                event,
            });
        };

        self.status = self.render(&event);
        match event {
            E::Reset => {
                self.token = None;
                self.bytes_transferred = 0;
                self.total_bytes = None;
            }
            E::TokenIssued(token) => self.token = Some(token),
            E::TransferStarted {
                resource_name,
                total_bytes,
            } => {
                self.resource_name = resource_name;
                self.total_bytes = total_bytes;
                self.bytes_transferred = 0;
            }
            E::Progress(sample) => self.bytes_transferred = sample.bytes_transferred,
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    fn next_state(&self, event: &SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        let next = match (event, self.state) {
            (E::Reset, _) => S::Idle,
            (E::Failed(category), state) if !state.is_terminal() => S::Failed(*category),
            (E::TokenRequested, S::Idle) if self.direction == Direction::Upload => {
                S::RequestingToken
            }
            (E::TokenIssued(_), S::RequestingToken) => S::AwaitingPeer,
            (E::Waiting { .. }, S::AwaitingPeer) => S::AwaitingPeer,
            (E::PeerAttached, S::AwaitingPeer) => S::ConfirmingPeer,
            (E::PeerConfirmed, S::ConfirmingPeer) => S::PeerConfirmed,
            (E::Connecting, S::Idle) if self.direction == Direction::Download => S::Connecting,
            (E::TransferStarted { .. }, S::PeerConfirmed | S::Connecting) => S::Transferring,
            (E::Progress(_), S::Transferring) => S::Transferring,
            (E::Completed, S::Transferring) => S::Completed,
            _ => return None,
        };
        Some(next)
    }

    pub fn snapshot(&self) -> StatusUpdate {
        StatusUpdate {
            session_id: self.id,
            direction: self.direction,
            state: self.state,
            token: self.token.clone(),
            message: self.status.clone(),
            progress: self.progress(),
        }
    }

    fn render(&self, event: &SessionEvent) -> String {
        let upload = self.direction == Direction::Upload;
        match event {
            SessionEvent::TokenRequested => "Generating token...".to_string(),
            SessionEvent::TokenIssued(_) => "Token generated. Waiting for P2P connection...".to_string(),
            SessionEvent::Waiting { remaining_secs } => format!(
                "Waiting for P2P connection... ({} seconds remaining)",
                remaining_secs
            ),
            SessionEvent::PeerAttached => "Peer attached. Confirming connection...".to_string(),
            SessionEvent::PeerConfirmed => {
                "P2P connection established! Starting transfer...".to_string()
            }
            SessionEvent::Connecting => "Connecting...".to_string(),
            SessionEvent::TransferStarted { .. } if upload => "Transferring...".to_string(),
            SessionEvent::TransferStarted { .. } => "Download started...".to_string(),
            SessionEvent::Progress(sample) => {
                sample.describe(if upload { "Transferring" } else { "Downloading" })
            }
            SessionEvent::Completed if upload => "File transferred successfully!".to_string(),
            SessionEvent::Completed => "Download completed!".to_string(),
            SessionEvent::Failed(category) => category.message(self.direction).to_string(),
            SessionEvent::Reset => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> Token {
        Token::new(s).unwrap()
    }

    fn started(total: Option<u64>) -> SessionEvent {
        SessionEvent::TransferStarted {
            resource_name: "report.pdf".to_string(),
            total_bytes: total,
        }
    }

    #[test]
    fn test_upload_happy_path() {
        let mut session = TransferSession::new(Direction::Upload, "report.pdf");
        session.apply(SessionEvent::TokenRequested).unwrap();
        assert_eq!(session.status(), "Generating token...");
        session.apply(SessionEvent::TokenIssued(token("ab12"))).unwrap();
        assert_eq!(session.token().map(Token::as_str), Some("ab12"));
        session.apply(SessionEvent::Waiting { remaining_secs: 119 }).unwrap();
        assert_eq!(
            session.status(),
            "Waiting for P2P connection... (119 seconds remaining)"
        );
        session.apply(SessionEvent::PeerAttached).unwrap();
        session.apply(SessionEvent::PeerConfirmed).unwrap();
        session.apply(started(Some(200))).unwrap();
        session
            .apply(SessionEvent::Progress(ProgressSample::new(100, Some(200))))
            .unwrap();
        assert_eq!(session.status(), "Transferring... 50%");
        assert_eq!(session.progress(), Some(ProgressSample::new(100, Some(200))));
        session.apply(SessionEvent::Completed).unwrap();
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn test_download_progress_wording() {
        let mut session = TransferSession::new(Direction::Download, "ab12");
        session.apply(SessionEvent::Connecting).unwrap();
        session.apply(started(None)).unwrap();
        assert_eq!(session.resource_name(), "report.pdf");
        session
            .apply(SessionEvent::Progress(ProgressSample::new(3 * 1024 * 1024, None)))
            .unwrap();
        assert_eq!(session.status(), "Downloading... 3.0 MB");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut session = TransferSession::new(Direction::Upload, "a.bin");
        session.apply(SessionEvent::TokenRequested).unwrap();
        session.apply(SessionEvent::TokenIssued(token("zz9"))).unwrap();
        session
            .apply(SessionEvent::Failed(FailureCategory::PeerTimeout))
            .unwrap();
        assert_eq!(session.state(), SessionState::Failed(FailureCategory::PeerTimeout));

        session.apply(SessionEvent::Reset).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.token().is_none());
        assert!(session.status().is_empty());
        assert!(session.progress().is_none());
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut session = TransferSession::new(Direction::Download, "ab12");
        // Downloads never request tokens
        assert!(session.apply(SessionEvent::TokenRequested).is_err());
        // Progress before the transfer started
        let err = session
            .apply(SessionEvent::Progress(ProgressSample::new(1, None)))
            .unwrap_err();
        assert_eq!(err.state, SessionState::Idle);
        assert_eq!(session.state(), SessionState::Idle);

        session.apply(SessionEvent::Connecting).unwrap();
        session.apply(started(Some(1))).unwrap();
        session.apply(SessionEvent::Completed).unwrap();
        // Terminal states only accept a reset
        assert!(session
            .apply(SessionEvent::Failed(FailureCategory::Generic))
            .is_err());
        assert_eq!(session.state(), SessionState::Completed);
    }
}

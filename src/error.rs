// src/error.rs
//
// Raw transfer failures and their mapping onto the user-facing categories

use crate::session::Direction;
use std::fmt;
use std::io;

/// How a transport-level failure happened, as reported by the HTTP stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Body,
    Other,
}

/// Everything that can go wrong while driving a transfer session
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("token response did not contain a token: {0}")]
    TokenUnparseable(String),

    #[error("invalid token: {0:?}")]
    InvalidToken(String),

    #[error("no peer attached after {attempts} status checks")]
    PeerTimeout { attempts: u32 },

    #[error("peer detached before the transfer started")]
    PeerDisconnected,

    #[error("HTTP {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportKind::Body
        } else {
            TransportKind::Other
        };

        TransferError::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// Closed set of failure categories surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    TokenAcquisitionFailed,
    PeerTimeout,
    PeerDisconnected,
    InvalidOrExpiredToken,
    TransferTimeout,
    NetworkError,
    Cancelled,
    Generic,
}

impl FailureCategory {
    /// Status line shown for this failure on the given side of the transfer
    pub fn message(&self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::TokenAcquisitionFailed, _) => "Could not obtain a token from the relay.",
            (Self::PeerTimeout, _) => "Timed out. Nobody connected to download the file.",
            (Self::PeerDisconnected, Direction::Upload) => {
                "The recipient disconnected before the transfer could finish."
            }
            (Self::PeerDisconnected, Direction::Download) => "No file is available for this token.",
            (Self::InvalidOrExpiredToken, _) => "Invalid or expired token.",
            (Self::TransferTimeout, _) => "Timed out during the transfer.",
            (Self::NetworkError, _) => "Connection error. Check your network.",
            (Self::Cancelled, _) => "Transfer cancelled.",
            (Self::Generic, Direction::Upload) => "Error uploading the file. Please try again.",
            (Self::Generic, Direction::Download) => "Error downloading the file. Check the token.",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TokenAcquisitionFailed => "token-acquisition-failed",
            Self::PeerTimeout => "peer-timeout",
            Self::PeerDisconnected => "peer-disconnected",
            Self::InvalidOrExpiredToken => "invalid-or-expired-token",
            Self::TransferTimeout => "transfer-timeout",
            Self::NetworkError => "network-error",
            Self::Cancelled => "cancelled",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

const NETWORK_HINTS: [&str; 3] = ["network", "connection", "dns"];

/// Map a raw failure onto its category.
///
/// Checks run in a fixed order: explicit sentinels, transport error codes,
/// HTTP status, generic network symptoms, then the generic fallback.
pub fn classify(err: &TransferError) -> FailureCategory {
    if let Some(category) = sentinel(err) {
        return category;
    }

    match err {
        TransferError::Transport { kind: TransportKind::Timeout, .. } => {
            return FailureCategory::TransferTimeout
        }
        TransferError::Io(e) if e.kind() == io::ErrorKind::TimedOut => {
            return FailureCategory::TransferTimeout
        }
        _ => {}
    }

    if let TransferError::Http { status, .. } = err {
        match status {
            408 => return FailureCategory::PeerDisconnected,
            404 => return FailureCategory::InvalidOrExpiredToken,
            _ => {}
        }
    }

    if looks_like_network_failure(err) {
        return FailureCategory::NetworkError;
    }

    FailureCategory::Generic
}

fn sentinel(err: &TransferError) -> Option<FailureCategory> {
    match err {
        TransferError::TokenUnparseable(_) => Some(FailureCategory::TokenAcquisitionFailed),
        TransferError::PeerTimeout { .. } => Some(FailureCategory::PeerTimeout),
        TransferError::PeerDisconnected => Some(FailureCategory::PeerDisconnected),
        TransferError::Cancelled => Some(FailureCategory::Cancelled),
        TransferError::InvalidToken(_) => Some(FailureCategory::InvalidOrExpiredToken),
        _ => None,
    }
}

fn looks_like_network_failure(err: &TransferError) -> bool {
    match err {
        TransferError::Transport { kind: TransportKind::Connect, .. } => true,
        TransferError::Transport { message, .. } => {
            let message = message.to_lowercase();
            NETWORK_HINTS.iter().any(|hint| message.contains(hint))
        }
        TransferError::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}

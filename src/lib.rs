//! Client for a token-based file relay.
//!
//! A sender asks the relay for a token, waits until a receiver attaches to
//! it and then streams the file up; the receiver streams it back down with
//! the same token. The [`flow`] module drives a whole transfer for either
//! side; the other modules are the pieces it is built from.

pub mod config;
pub mod download;
pub mod error;
pub mod flow;
pub mod progress;
pub mod relay;
pub mod session;
pub mod token;
pub mod upload;

pub use config::ClientConfig;
pub use error::{classify, FailureCategory, TransferError};
pub use flow::{ReceiveFlow, SendFlow, TransferOutcome, TransferReport};
pub use progress::{ProgressSample, TransferStats};
pub use relay::{RelayClient, ShareCommands};
pub use session::{
    Direction, FileMeta, SessionEvent, SessionState, StatusCallback, StatusUpdate, TransferSession,
};
pub use token::Token;
pub use upload::{UploadMode, UploadSource};

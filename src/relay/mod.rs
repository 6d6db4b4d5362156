// src/relay/mod.rs
//
// HTTP binding to the relay: token issuance, peer status, transfer URLs and
// the shareable curl commands derived from them.

mod client;
mod models;
mod share;

pub use self::client::{encode_segment, RelayClient};
pub(crate) use self::client::ensure_success;
pub use self::models::StatusReply;
pub use self::share::ShareCommands;

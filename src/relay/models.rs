use serde::Deserialize;

/// Body of `GET /{token}/status`
#[derive(Debug, Deserialize)]
pub struct StatusReply {
    /// Only a literal JSON `true` counts as ready
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub waiting_since: Option<String>,
}

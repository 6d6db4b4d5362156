use super::client::{encode_segment, normalize_base_url};
use crate::token::Token;
use std::fmt;

/// Ready-to-paste curl commands for sharing a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareCommands {
    base_url: String,
    token: Token,
}

impl ShareCommands {
    pub fn new(base_url: &str, token: Token) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            token,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// URL the receiver opens or feeds to `iolink receive`
    pub fn share_url(&self) -> String {
        format!("{}/{}", self.base_url, encode_segment(self.token.as_str()))
    }

    pub fn fetch_token(&self) -> String {
        format!("curl {}/token", self.base_url)
    }

    pub fn upload(&self, file: &str) -> String {
        format!("curl --upload-file {} {}/", file, self.share_url())
    }

    pub fn download(&self) -> String {
        format!("curl -O -J {}", self.share_url())
    }
}

impl fmt::Display for ShareCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TOKEN:   {}", self.token)?;
        writeln!(f, "URL:     {}", self.share_url())?;
        writeln!(f, "Token:   {}", self.fetch_token())?;
        writeln!(f, "Send:    {}", self.upload("FILE"))?;
        write!(f, "Receive: {}", self.download())
    }
}

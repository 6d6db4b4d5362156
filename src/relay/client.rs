use super::models::StatusReply;
use super::share::ShareCommands;
use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::token::{PeerStatusSource, Token, TokenSource};
use async_trait::async_trait;
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, Method, RequestBuilder, Response};
use std::time::{Duration, Instant};

/// Everything `encodeURIComponent` escapes
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Longest slice of an error body kept in failure details
const ERROR_BODY_LIMIT: usize = 200;

/// Percent-encode one URL path segment
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// HTTP client for the relay's token, status and transfer endpoints
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    transfer_timeout: Option<Duration>,
}

impl RelayClient {
    /// Create a new relay client
    pub fn new(config: &ClientConfig) -> Result<Self, TransferError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("iolink-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.relay_url),
            request_timeout: config.request_timeout,
            transfer_timeout: config.transfer_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base_url)
    }

    pub fn status_url(&self, token: &Token) -> String {
        format!("{}/{}/status", self.base_url, encode_segment(token.as_str()))
    }

    pub fn upload_url(&self, token: &Token, filename: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            encode_segment(token.as_str()),
            encode_segment(filename)
        )
    }

    pub fn download_url(&self, token: &Token) -> String {
        format!("{}/{}", self.base_url, encode_segment(token.as_str()))
    }

    pub fn share_commands(&self, token: &Token) -> ShareCommands {
        ShareCommands::new(&self.base_url, token.clone())
    }

    /// Turn receiver input into a download URL.
    ///
    /// Full `http(s)://` URLs are used as given; anything else is a token.
    pub fn resolve_source(&self, input: &str) -> Result<String, TransferError> {
        let input = input.trim();
        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(input.to_string());
        }
        let token = Token::new(input.trim_matches('/'))?;
        Ok(self.download_url(&token))
    }

    /// Request builder for body transfers, bounded by the transfer timeout
    pub fn transfer_request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.transfer_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }
}

/// Pass 2xx responses through; turn anything else into an HTTP failure
pub(crate) async fn ensure_success(response: Response) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let reason = status.canonical_reason().unwrap_or("Unknown status").to_string();
    let text = match response.text().await {
        Ok(text) => text.trim().chars().take(ERROR_BODY_LIMIT).collect::<String>(),
        Err(err) => {
            debug!("Failed to read error body: {}", err);
            String::new()
        }
    };

    warn!("Relay answered {} {} ({})", status.as_u16(), reason, text);
    let reason = if text.is_empty() {
        reason
    } else {
        format!("{} ({})", reason, text)
    };
    Err(TransferError::Http {
        status: status.as_u16(),
        reason,
    })
}

#[async_trait]
impl TokenSource for RelayClient {
    async fn request_token(&self) -> Result<String, TransferError> {
        let url = self.token_url();
        let start_time = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        info!(
            "GET - {}ms - {} - {}",
            start_time.elapsed().as_millis(),
            url,
            status.as_u16()
        );
        if !status.is_success() {
            warn!("Token service returned {}", status);
        }

        Ok(body)
    }
}

#[async_trait]
impl PeerStatusSource for RelayClient {
    async fn peer_ready(&self, token: &Token) -> bool {
        let url = self.status_url(token);

        let response = match self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!("Status check for {} failed: {}", token, err);
                return false;
            }
        };

        if !response.status().is_success() {
            debug!("Status check for {} returned {}", token, response.status());
            return false;
        }

        match response.json::<StatusReply>().await {
            Ok(reply) => {
                if let Some(error) = &reply.error {
                    debug!("Relay status for {}: {}", token, error);
                }
                if let (false, Some(since)) = (reply.ready, &reply.waiting_since) {
                    debug!("{} waiting for a peer since {}", token, since);
                }
                reply.ready
            }
            Err(err) => {
                debug!("Malformed status for {}: {}", token, err);
                false
            }
        }
    }
}

use super::{DisplayWindows, SessionHandle, TransferOutcome, TransferReport};
use crate::config::ClientConfig;
use crate::download::Downloader;
use crate::error::TransferError;
use crate::relay::RelayClient;
use crate::session::{Direction, SessionEvent, StatusCallback, TransferSession};
use crate::token::Token;
use log::info;
use tokio_util::sync::CancellationToken;

/// Receiving role: resolve the token or URL, then download
pub struct ReceiveFlow {
    config: ClientConfig,
    relay: RelayClient,
    session: SessionHandle,
}

impl ReceiveFlow {
    pub fn new(config: &ClientConfig, observer: Option<StatusCallback>) -> Result<Self, TransferError> {
        Ok(Self {
            config: config.clone(),
            relay: RelayClient::new(config)?,
            session: SessionHandle::new(Direction::Download, observer),
        })
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    /// Copy of the current session
    pub fn session(&self) -> TransferSession {
        self.session.current()
    }

    /// Download what `input` (a token or a full URL) points at.
    /// Any previous session is discarded.
    pub async fn run(&mut self, input: &str, cancel: &CancellationToken) -> TransferOutcome {
        let session_id = self.session.restart(input.trim());
        info!("Receive session {} started for {:?}", session_id, input.trim());

        let result = self.transfer(input, cancel).await;
        let windows = DisplayWindows {
            success: self.config.success_display,
            failure: self.config.failure_display,
        };
        self.session.conclude(result, windows, cancel).await
    }

    async fn transfer(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        let events = self.session.events();
        let url = self.relay.resolve_source(input)?;
        let token = if url == input.trim() {
            None
        } else {
            Token::new(input.trim().trim_matches('/')).ok()
        };

        events(SessionEvent::Connecting);
        let download = Downloader::new(&self.relay, &self.config)
            .receive(&url, &events, cancel)
            .await?;

        Ok(TransferReport {
            session_id: self.session.current().id(),
            direction: Direction::Download,
            token,
            resource_name: download.file_name,
            path: Some(download.path),
            stats: download.stats,
            sink: Some(download.sink),
            binding: None,
        })
    }
}

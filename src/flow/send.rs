use super::{DisplayWindows, SessionHandle, TransferOutcome, TransferReport};
use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::relay::RelayClient;
use crate::session::{Direction, StatusCallback, TransferSession};
use crate::token::TokenSession;
use crate::upload::{UploadSource, Uploader};
use log::info;
use tokio_util::sync::CancellationToken;

/// Sending role: token, peer wait, upload
pub struct SendFlow {
    config: ClientConfig,
    relay: RelayClient,
    session: SessionHandle,
}

impl SendFlow {
    pub fn new(config: &ClientConfig, observer: Option<StatusCallback>) -> Result<Self, TransferError> {
        Ok(Self {
            config: config.clone(),
            relay: RelayClient::new(config)?,
            session: SessionHandle::new(Direction::Upload, observer),
        })
    }

    pub fn relay(&self) -> &RelayClient {
        &self.relay
    }

    /// Copy of the current session
    pub fn session(&self) -> TransferSession {
        self.session.current()
    }

    /// Send one source through the relay. Any previous session is discarded.
    pub async fn run(&mut self, source: UploadSource, cancel: &CancellationToken) -> TransferOutcome {
        let session_id = self.session.restart(&source.meta().name);
        info!("Send session {} started for {}", session_id, source.meta().name);

        let result = self.transfer(source, cancel).await;
        let windows = DisplayWindows {
            success: self.config.success_display,
            failure: self.config.failure_display,
        };
        self.session.conclude(result, windows, cancel).await
    }

    async fn transfer(
        &self,
        source: UploadSource,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, TransferError> {
        let events = self.session.events();
        let meta = source.meta().clone();

        let tokens = TokenSession::new(&self.relay, &self.relay, self.config.poll);
        let token = tokens.begin(&meta, &events, cancel).await?;
        tokens.await_peer(&token, &events, cancel).await?;

        let url = self.relay.upload_url(&token, &meta.name);
        let uploader = Uploader::new(&self.relay, self.config.upload_mode.binding_for(&meta));
        let upload = uploader.send(source, &url, &events, cancel).await?;

        let session = self.session.current();
        Ok(TransferReport {
            session_id: session.id(),
            direction: Direction::Upload,
            token: Some(token),
            resource_name: meta.name,
            path: None,
            stats: upload.stats,
            sink: None,
            binding: Some(upload.binding),
        })
    }
}

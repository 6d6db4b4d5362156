mod body;

pub use self::body::{counted, BodySender, MultipartBody, StreamingBody};

use crate::error::TransferError;
use crate::progress::{ProgressCounter, TransferStats};
use crate::relay::{ensure_success, RelayClient};
use crate::session::{EventSink, FileMeta, SessionEvent};
use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use futures_util::{stream, Stream};
use log::{debug, info, warn};
use reqwest::Method;
use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Chunked byte source for uploads
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync + 'static>>;

/// Which body binding to use for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Streaming, whether or not the source length is known
    Auto,
    Streaming,
    /// Buffers the whole source in memory first
    Multipart,
}

impl UploadMode {
    pub fn binding_for(&self, meta: &FileMeta) -> Box<dyn BodySender> {
        match self {
            Self::Auto | Self::Streaming => {
                if meta.size.is_none() {
                    debug!("Streaming {} with unknown length", meta.name);
                }
                Box::new(StreamingBody)
            }
            Self::Multipart => Box::new(MultipartBody),
        }
    }
}

impl FromStr for UploadMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "streaming" | "stream" => Ok(Self::Streaming),
            "multipart" => Ok(Self::Multipart),
            other => Err(anyhow!("Unknown upload mode: {}", other)),
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Streaming => "streaming",
            Self::Multipart => "multipart",
        })
    }
}

/// A file (or any byte stream) waiting to be sent
pub struct UploadSource {
    meta: FileMeta,
    stream: ByteStream,
}

impl UploadSource {
    pub fn new(meta: FileMeta, stream: ByteStream) -> Self {
        Self { meta, stream }
    }

    /// Open a file for upload.
    ///
    /// Regular files declare their size; pipes and devices are sent as
    /// unknown-length sources.
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        content_type: Option<String>,
    ) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;

        let file = File::open(path).await?;
        let metadata = file.metadata().await?;
        let size = metadata.is_file().then(|| metadata.len());
        debug!("Opened {} for upload ({:?} bytes)", path.display(), size);

        Ok(Self {
            meta: FileMeta {
                name,
                size,
                content_type,
            },
            stream: Box::pin(ReaderStream::with_capacity(file, chunk_size.max(1))),
        })
    }

    /// In-memory source split into `chunk_size` pieces
    pub fn from_bytes(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        chunk_size: usize,
        content_type: Option<String>,
    ) -> Self {
        let data: Bytes = data.into();
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<io::Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();

        Self {
            meta: FileMeta {
                name: name.into(),
                size: Some(data.len() as u64),
                content_type,
            },
            stream: Box::pin(stream::iter(chunks)),
        }
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn into_parts(self) -> (FileMeta, ByteStream) {
        (self.meta, self.stream)
    }
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub stats: TransferStats,
    pub binding: &'static str,
}

/// Sends one source to the relay under a token-scoped URL
pub struct Uploader<'a> {
    relay: &'a RelayClient,
    sender: Box<dyn BodySender>,
}

impl<'a> Uploader<'a> {
    pub fn new(relay: &'a RelayClient, sender: Box<dyn BodySender>) -> Self {
        Self { relay, sender }
    }

    pub async fn send(
        &self,
        source: UploadSource,
        url: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError> {
        let (meta, stream) = source.into_parts();
        info!(
            "Uploading {} to {} ({} body)",
            meta.name,
            url,
            self.sender.name()
        );

        events(SessionEvent::TransferStarted {
            resource_name: meta.name.clone(),
            total_bytes: meta.size,
        });

        let progress_events = events.clone();
        let counter = ProgressCounter::new(
            meta.size,
            Arc::new(move |sample| progress_events(SessionEvent::Progress(sample))),
        );

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let start_time = Instant::now();
        let request = self.relay.transfer_request(Method::PUT, url);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Upload of {} cancelled after {} bytes", meta.name, counter.bytes());
                return Err(TransferError::Cancelled);
            }
            response = self.sender.send(request, &meta, stream, counter.clone()) => response?,
        };
        let response = ensure_success(response).await?;
        let status = response.status();
        match response.text().await {
            Ok(text) => debug!("Relay upload reply: {}", text.trim()),
            Err(err) => debug!("Could not read relay upload reply: {}", err),
        }

        let stats = counter.stats(start_time.elapsed());
        info!(
            "[{}] PUT - {}ms - {} - {} bytes - {} OK (sha256 {})",
            timestamp,
            stats.elapsed.as_millis(),
            url,
            stats.bytes,
            status.as_u16(),
            stats.sha256
        );

        Ok(UploadReport {
            stats,
            binding: self.sender.name(),
        })
    }
}

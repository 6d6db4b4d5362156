// src/download/mod.rs
//
// Receiving side: fetch a token's file from the relay and write it out

mod headers;
mod sink;

pub use self::headers::{
    filename_from_disposition, resolve_filename, resolve_total, sanitize_filename,
    DEFAULT_FILENAME,
};
pub use self::sink::{
    candidate_name, dir_is_writable, open_sink, BufferedSink, DiskSink, SinkKind, SinkStrategy,
    WritableSink,
};

use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::progress::{ProgressCounter, TransferStats};
use crate::relay::{ensure_success, RelayClient};
use crate::session::{EventSink, SessionEvent};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use log::{info, warn};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub stats: TransferStats,
    pub path: PathBuf,
    pub file_name: String,
    pub sink: SinkKind,
}

/// Fetches one file from the relay into a sink
pub struct Downloader<'a> {
    relay: &'a RelayClient,
    strategy: SinkStrategy,
    download_dir: PathBuf,
    fallback_dir: PathBuf,
}

impl<'a> Downloader<'a> {
    pub fn new(relay: &'a RelayClient, config: &ClientConfig) -> Self {
        Self {
            relay,
            strategy: config.sink,
            download_dir: config.download_dir.clone(),
            fallback_dir: config.fallback_dir.clone(),
        }
    }

    pub async fn receive(
        &self,
        url: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, TransferError> {
        info!("Downloading {}", url);
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let start_time = Instant::now();

        let request = self.relay.transfer_request(Method::GET, url);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = request.send() => response?,
        };
        let response = ensure_success(response).await?;
        let status = response.status();

        let file_name = resolve_filename(response.headers());
        let total = resolve_total(response.headers());
        events(SessionEvent::TransferStarted {
            resource_name: file_name.clone(),
            total_bytes: total,
        });

        let progress_events = events.clone();
        let counter = ProgressCounter::new(
            total,
            Arc::new(move |sample| progress_events(SessionEvent::Progress(sample))),
        );

        let mut sink = open_sink(
            self.strategy,
            &self.download_dir,
            &self.fallback_dir,
            &file_name,
        )
        .await?;
        let kind = sink.kind();

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from));
        if let Err(e) = pump(body, sink.as_mut(), &counter, cancel).await {
            warn!(
                "Download of {} stopped after {} bytes: {}",
                file_name,
                counter.bytes(),
                e
            );
            sink.discard().await;
            return Err(e);
        }
        let path = sink.finish().await?;

        let stats = counter.stats(start_time.elapsed());
        info!(
            "[{}] GET - {}ms - {} - {} bytes - {} OK (sha256 {})",
            timestamp,
            stats.elapsed.as_millis(),
            url,
            stats.bytes,
            status.as_u16(),
            stats.sha256
        );
        info!("Saved {} to {} ({} sink)", file_name, path.display(), kind);

        Ok(DownloadReport {
            stats,
            path,
            file_name,
            sink: kind,
        })
    }
}

/// Move a body stream into a sink chunk by chunk, counting as it goes.
///
/// Cancellation is checked before every chunk. Returns the byte count.
pub async fn pump<S>(
    stream: S,
    sink: &mut dyn WritableSink,
    counter: &ProgressCounter,
    cancel: &CancellationToken,
) -> Result<u64, TransferError>
where
    S: Stream<Item = Result<Bytes, TransferError>>,
{
    tokio::pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        sink.write_chunk(&chunk).await?;
        counter.record(&chunk);
    }

    Ok(counter.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressSample;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        written: Vec<u8>,
    }

    #[async_trait]
    impl WritableSink for MemorySink {
        fn kind(&self) -> SinkKind {
            SinkKind::Buffered
        }

        async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
            self.written.extend_from_slice(chunk);
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<PathBuf, TransferError> {
            Ok(PathBuf::from("memory"))
        }

        async fn discard(self: Box<Self>) {}
    }

    fn body(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, TransferError>> {
        let items: Vec<Result<Bytes, TransferError>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(items)
    }

    fn counter(total: Option<u64>) -> (ProgressCounter, Arc<Mutex<Vec<ProgressSample>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let seen = samples.clone();
        let counter = ProgressCounter::new(
            total,
            Arc::new(move |s: ProgressSample| seen.lock().unwrap().push(s)),
        );
        (counter, samples)
    }

    #[tokio::test]
    async fn test_pump_writes_and_counts() {
        let mut sink = MemorySink::default();
        let (counter, samples) = counter(Some(8));

        let bytes = pump(body(&[b"abc", b"de", b"fgh"]), &mut sink, &counter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bytes, 8);
        assert_eq!(sink.written, b"abcdefgh");
        let pcts: Vec<Option<u8>> = samples.lock().unwrap().iter().map(|s| s.percentage()).collect();
        assert_eq!(pcts, vec![Some(38), Some(63), Some(100)]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_stream_error() {
        let mut sink = MemorySink::default();
        let (counter, _) = counter(None);
        let items: Vec<Result<Bytes, TransferError>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(TransferError::PeerDisconnected),
            Ok(Bytes::from_static(b"never")),
        ];

        let result = pump(stream::iter(items), &mut sink, &counter, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransferError::PeerDisconnected)));
        assert_eq!(sink.written, b"abc");
    }

    #[tokio::test]
    async fn test_pump_honours_cancellation() {
        let mut sink = MemorySink::default();
        let (counter, samples) = counter(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = pump(body(&[b"abc"]), &mut sink, &counter, &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(sink.written.is_empty());
        assert!(samples.lock().unwrap().is_empty());
    }
}

// src/upload/body.rs
//
// Request body bindings for uploads. Both report one progress sample per
// chunk as the transport consumes it, so callers see the same cadence
// whichever binding is used.

use super::ByteStream;
use crate::error::TransferError;
use crate::progress::ProgressCounter;
use crate::session::FileMeta;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt, TryStreamExt};
use log::debug;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, RequestBuilder, Response};
use std::io;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Multipart field the relay reads the file from
const MULTIPART_FIELD: &str = "file";

pub(crate) fn content_type(meta: &FileMeta) -> &str {
    meta.content_type
        .as_deref()
        .filter(|ct| !ct.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Wrap a byte stream so every chunk pulled through it is counted
pub fn counted(
    source: ByteStream,
    counter: ProgressCounter,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
    source.map(move |item| {
        if let Ok(chunk) = &item {
            counter.record(chunk);
        }
        item
    })
}

/// Sends an upload source as the body of a prepared request
#[async_trait]
pub trait BodySender: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        request: RequestBuilder,
        meta: &FileMeta,
        source: ByteStream,
        counter: ProgressCounter,
    ) -> Result<Response, TransferError>;
}

/// Streams the source straight into the request body
pub struct StreamingBody;

#[async_trait]
impl BodySender for StreamingBody {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn send(
        &self,
        request: RequestBuilder,
        meta: &FileMeta,
        source: ByteStream,
        counter: ProgressCounter,
    ) -> Result<Response, TransferError> {
        let mut request = request.header(CONTENT_TYPE, content_type(meta));
        if let Some(size) = meta.size {
            request = request.header(CONTENT_LENGTH, size);
        }

        let body = Body::wrap_stream(counted(source, counter));
        Ok(request.body(body).send().await?)
    }
}

/// Buffers the source, then sends it as a single multipart field
pub struct MultipartBody;

#[async_trait]
impl BodySender for MultipartBody {
    fn name(&self) -> &'static str {
        "multipart"
    }

    async fn send(
        &self,
        request: RequestBuilder,
        meta: &FileMeta,
        source: ByteStream,
        counter: ProgressCounter,
    ) -> Result<Response, TransferError> {
        let chunks: Vec<Bytes> = source.try_collect().await?;
        let length: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        debug!("Buffered {} bytes in {} chunks for multipart upload", length, chunks.len());

        let replay: ByteStream = Box::pin(stream::iter(chunks.into_iter().map(Ok)));
        let part = Part::stream_with_length(Body::wrap_stream(counted(replay, counter)), length)
            .file_name(meta.name.clone())
            .mime_str(content_type(meta))?;
        let form = Form::new().part(MULTIPART_FIELD, part);

        Ok(request.multipart(form).send().await?)
    }
}

// src/download/sink.rs
//
// Destinations for downloaded bytes. A disk sink streams straight into the
// target file; a buffered sink keeps everything in memory and saves once the
// body is complete. Neither overwrites an existing file.

use crate::error::TransferError;
use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Give up looking for a free "name (n).ext" after this many tries
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Disk,
    Buffered,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disk => "disk",
            Self::Buffered => "buffered",
        })
    }
}

/// How the receiving side picks a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStrategy {
    /// Disk when the download directory is writable, buffered otherwise
    Auto,
    Disk,
    Buffered,
}

impl FromStr for SinkStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "disk" | "file" => Ok(Self::Disk),
            "buffered" | "memory" => Ok(Self::Buffered),
            other => Err(anyhow!("Unknown sink strategy: {}", other)),
        }
    }
}

impl fmt::Display for SinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Disk => "disk",
            Self::Buffered => "buffered",
        })
    }
}

/// Where a download's bytes go while the body streams in
#[async_trait]
pub trait WritableSink: Send {
    fn kind(&self) -> SinkKind;

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError>;

    /// Make the file durable and return where it ended up
    async fn finish(self: Box<Self>) -> Result<PathBuf, TransferError>;

    /// Drop whatever was written so far
    async fn discard(self: Box<Self>);
}

/// `name`, then `name (1).ext`, `name (2).ext`, ...
pub fn candidate_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{} ({})", stem, attempt),
    }
}

/// Create a new file in `dir` named after `name` without clobbering anything
async fn create_unique(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(candidate_name(name, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {} in {}", name, dir.display()),
    ))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!("Failed to remove partial download {}: {}", path.display(), e);
    }
}

/// Whether files can be created in `dir` right now
pub async fn dir_is_writable(dir: &Path) -> bool {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => return false,
    }

    let probe = dir.join(format!(".iolink-probe-{}", Uuid::new_v4()));
    match OpenOptions::new().write(true).create_new(true).open(&probe).await {
        Ok(file) => {
            drop(file);
            if let Err(e) = fs::remove_file(&probe).await {
                debug!("Could not remove probe {}: {}", probe.display(), e);
            }
            true
        }
        Err(e) => {
            debug!("{} is not writable: {}", dir.display(), e);
            false
        }
    }
}

/// Streams chunks into a file as they arrive
pub struct DiskSink {
    file: File,
    path: PathBuf,
}

impl DiskSink {
    pub async fn create(dir: &Path, name: &str) -> Result<Self, TransferError> {
        fs::create_dir_all(dir).await?;
        let (file, path) = create_unique(dir, name).await?;
        debug!("Writing download to {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl WritableSink for DiskSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Disk
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, TransferError> {
        let Self { mut file, path } = *self;
        // Deferred write errors (ENOSPC, EIO) surface here
        if let Err(e) = file.flush().await {
            drop(file);
            remove_partial(&path).await;
            return Err(e.into());
        }
        Ok(path)
    }

    async fn discard(self: Box<Self>) {
        let Self { file, path } = *self;
        drop(file);
        remove_partial(&path).await;
    }
}

/// Holds the whole body in memory and saves it on completion
pub struct BufferedSink {
    buffer: Vec<u8>,
    name: String,
    dir: PathBuf,
    fallback_dir: PathBuf,
}

impl BufferedSink {
    pub fn new(dir: &Path, fallback_dir: &Path, name: &str) -> Self {
        Self {
            buffer: Vec::new(),
            name: name.to_string(),
            dir: dir.to_path_buf(),
            fallback_dir: fallback_dir.to_path_buf(),
        }
    }

    async fn save(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        let (mut file, path) = create_unique(dir, &self.name).await?;
        if let Err(e) = async {
            file.write_all(&self.buffer).await?;
            file.flush().await
        }
        .await
        {
            drop(file);
            remove_partial(&path).await;
            return Err(e);
        }
        Ok(path)
    }
}

#[async_trait]
impl WritableSink for BufferedSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Buffered
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<PathBuf, TransferError> {
        match self.save(&self.dir).await {
            Ok(path) => Ok(path),
            Err(e) => {
                warn!(
                    "Could not save {} to {} ({}), using {}",
                    self.name,
                    self.dir.display(),
                    e,
                    self.fallback_dir.display()
                );
                Ok(self.save(&self.fallback_dir).await?)
            }
        }
    }

    async fn discard(self: Box<Self>) {
        debug!("Dropping {} buffered bytes of {}", self.buffer.len(), self.name);
    }
}

/// Pick and open the sink for one download
pub async fn open_sink(
    strategy: SinkStrategy,
    dir: &Path,
    fallback_dir: &Path,
    name: &str,
) -> Result<Box<dyn WritableSink>, TransferError> {
    let use_disk = match strategy {
        SinkStrategy::Disk => true,
        SinkStrategy::Buffered => false,
        SinkStrategy::Auto => dir_is_writable(dir).await,
    };

    if use_disk {
        let sink = DiskSink::create(dir, name).await?;
        info!("Streaming {} to {}", name, sink.path().display());
        Ok(Box::new(sink))
    } else {
        info!("Buffering {} in memory", name);
        Ok(Box::new(BufferedSink::new(dir, fallback_dir, name)))
    }
}

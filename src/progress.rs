use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Callback invoked with every new progress sample
pub type ProgressCallback = Arc<dyn Fn(ProgressSample) + Send + Sync>;

/// Point-in-time view of a transfer's byte count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_transferred: u64,
    /// `None` when the source or response did not declare a length
    pub total_bytes: Option<u64>,
}

impl ProgressSample {
    pub fn new(bytes_transferred: u64, total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
        }
    }

    /// Rounded percentage, only when the total is known and non-zero
    pub fn percentage(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|&t| t > 0)? as u128;
        let done = self.bytes_transferred as u128;
        // round half up: floor(done * 100 / total + 0.5)
        let pct = (done * 200 + total) / (total * 2);
        Some(pct.min(100) as u8)
    }

    /// Cumulative megabytes transferred (1 MB = 1024 * 1024 bytes)
    pub fn megabytes(&self) -> f64 {
        self.bytes_transferred as f64 / 1024.0 / 1024.0
    }

    /// Render as `"<verb>... N%"`, or `"<verb>... X.Y MB"` for unknown totals
    pub fn describe(&self, verb: &str) -> String {
        match self.percentage() {
            Some(pct) => format!("{}... {}%", verb, pct),
            None => format!("{}... {:.1} MB", verb, self.megabytes()),
        }
    }
}

/// Totals of a finished transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    pub bytes: u64,
    pub total_bytes: Option<u64>,
    /// Hex SHA-256 of the bytes that crossed the wire
    pub sha256: String,
    pub elapsed: Duration,
}

impl TransferStats {
    /// Megabytes per second over the whole transfer
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes as f64 / secs) / (1024.0 * 1024.0)
        } else {
            0.0
        }
    }
}

struct CounterState {
    bytes: u64,
    hasher: Sha256,
}

/// Accumulates chunk sizes and a running SHA-256, reporting each step.
///
/// Clones share the same counters, so one handle can be moved into a body
/// stream while another reads the totals after the request settles.
#[derive(Clone)]
pub struct ProgressCounter {
    total: Option<u64>,
    state: Arc<Mutex<CounterState>>,
    on_progress: ProgressCallback,
}

impl ProgressCounter {
    pub fn new(total: Option<u64>, on_progress: ProgressCallback) -> Self {
        Self {
            total,
            state: Arc::new(Mutex::new(CounterState {
                bytes: 0,
                hasher: Sha256::new(),
            })),
            on_progress,
        }
    }

    /// Record one chunk and emit the resulting sample
    pub fn record(&self, chunk: &[u8]) -> ProgressSample {
        let sample = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.bytes += chunk.len() as u64;
            state.hasher.update(chunk);
            ProgressSample::new(state.bytes, self.total)
        };
        (self.on_progress)(sample);
        sample
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn bytes(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).bytes
    }

    /// Hex SHA-256 of everything recorded so far
    pub fn digest_hex(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        format!("{:x}", state.hasher.clone().finalize())
    }

    pub fn stats(&self, elapsed: Duration) -> TransferStats {
        TransferStats {
            bytes: self.bytes(),
            total_bytes: self.total,
            sha256: self.digest_hex(),
            elapsed,
        }
    }
}

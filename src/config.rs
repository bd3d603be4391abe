//! Construction parameters for [`MultiTail`](crate::MultiTail) and
//! [`TailedFile`](crate::TailedFile).

use std::time::Duration;

use crate::error::{Error, Result};

/// Default upper bound on buffered-but-unconsumed bytes per file.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4096 * 8;

/// Default size of a single read when draining a file without a limit.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 65535;

/// Default minimum spacing between filesystem rescans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables shared by every tailed file.
///
/// ```
/// use multitail::TailConfig;
///
/// let config = TailConfig::default()
///     .poll_interval_secs(0.25)
///     .skip_to_end(false);
/// assert_eq!(config.long_line_threshold(), 16384);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailConfig {
    /// Minimum time between two rescans triggered by `poll`, and the sleep
    /// applied by the continuous iterators when a poll yields nothing.
    pub poll_interval: Duration,
    /// Whether files found by the construction-time scan start at their
    /// current end rather than at offset 0.
    pub skip_to_end: bool,
    /// Maximum buffered-but-unconsumed bytes before reads stop topping up.
    /// Lines longer than half of this are dropped.
    pub max_buffer_size: usize,
    /// Chunk size for unbounded drains.
    pub read_chunk_size: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        TailConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            skip_to_end: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl TailConfig {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the poll interval from (possibly fractional) seconds. Negative or
    /// non-finite values are treated as zero.
    pub fn poll_interval_secs(mut self, secs: f64) -> Self {
        self.poll_interval = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        };
        self
    }

    pub fn skip_to_end(mut self, skip_to_end: bool) -> Self {
        self.skip_to_end = skip_to_end;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Length beyond which an undelimited line is considered too long to
    /// buffer and is dropped.
    pub fn long_line_threshold(&self) -> usize {
        self.max_buffer_size / 2
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_buffer_size < 2 {
            return Err(Error::Config("max_buffer_size must be at least 2"));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read_chunk_size must be non-zero"));
        }
        Ok(())
    }
}

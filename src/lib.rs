//! A library providing rotation-aware, multiplexed tailing for (namely log)
//! files matched by glob patterns.
//!
//! Files are discovered, dropped and reopened by periodically rescanning the
//! patterns rather than through filesystem notifications, and every reported
//! line carries the byte offset at which it starts in its file. Persisting
//! those offsets and handing them back on the next start resumes tailing
//! without losing or repeating lines.
//!
//! ## Example
//!
//! ```no_run
//! use multitail::MultiTail;
//!
//! fn main() -> Result<(), multitail::Error> {
//!     let mut tail = MultiTail::new(vec!["/var/log/*.log", "/var/log/app/*.log"])?;
//!
//!     // Blocks, polling once per interval while nothing is written.
//!     for line in tail.follow() {
//!         println!("source: {}, offset: {}, line: {}",
//!             line.source().display(), line.offset(), line.line());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Caveats
//!
//! A line longer than half of [`TailConfig::max_buffer_size`] is dropped
//! (with a warning through `tracing`) instead of being buffered without
//! bound. Lines are split on raw bytes and decoded as UTF-8 with lossy
//! replacement, so offsets always count bytes. A trailing line without a
//! newline is held back until it is completed, unless its file is rotated
//! away, in which case it is flushed as is.

mod config;
mod error;
mod mux;
mod reader;
#[cfg(feature = "tokio")]
mod stream;

pub use config::{
    TailConfig, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_POLL_INTERVAL, DEFAULT_READ_CHUNK_SIZE,
};
pub use error::{Error, Result};
pub use mux::{Batch, Follow, Line, MultiTail, Patterns};
pub use reader::{Lines, TailedFile};
#[cfg(feature = "tokio")]
pub use stream::TailStream;

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

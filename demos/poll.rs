//! Tails every file matching the given glob patterns, printing lines and the
//! current offsets.
//!
//! Usage:
//!     poll '/var/log/*.log' '/tmp/other.log' ...
//!
//! Set `RUST_LOG=multitail=debug` to see files being opened, rotated and
//! dropped.

use std::time::{Duration, Instant};

use multitail::{MultiTail, TailConfig};
use tracing_subscriber::EnvFilter;

const OFFSET_REPORT_INTERVAL: Duration = Duration::from_secs(10);

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = TailConfig::default().poll_interval_secs(0.5);
    let mut tail = MultiTail::with_config(args, config, Vec::<(String, u64)>::new())?;
    let mut last_report = Instant::now();

    loop {
        let mut seen = 0;
        for line in tail.poll(false) {
            println!("({}:{}) {}", line.source().display(), line.offset(), line.line());
            seen += 1;
        }

        if last_report.elapsed() >= OFFSET_REPORT_INTERVAL {
            for (path, offset) in tail.offsets() {
                eprintln!("offset {} {}", path.display(), offset);
            }
            last_report = Instant::now();
        }

        if seen == 0 {
            std::thread::sleep(tail.config().poll_interval);
        }
    }
}

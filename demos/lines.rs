//! Streams lines from every file matching the given glob patterns.
//!
//! Usage:
//!     lines '/var/log/*.log' '/tmp/other.log' ...
//!
//! Files that do not exist yet are picked up once they appear.

use futures_util::stream::StreamExt;
use multitail::{MultiTail, TailConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = TailConfig::default().skip_to_end(false);
    let lines = MultiTail::with_config(args, config, Vec::<(String, u64)>::new())?.into_stream();
    tokio::pin!(lines);

    while let Some(line) = lines.next().await {
        println!("({}) {}", line.source().display(), line.line());
    }

    Ok(())
}

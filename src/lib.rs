//! # WebSocket Benchmark Library
//!
//! A WebSocket chat relay and text-frame throughput harness. A server accepts
//! any number of clients; clients and servers can exchange chat messages or
//! run a benchmark in which one side streams framed data messages and the
//! other measures how many arrive per second.
//!
//! ## Wire Protocol
//!
//! Benchmark control travels in-band as reserved text frames:
//!
//! - `__BENCHMARK_START__[:N]` opens a measurement window (or requests an
//!   N-frame burst from a sender server)
//! - `__BENCHMARK_DATA__...` is one counted data frame
//! - `__BENCHMARK_END__[:N]` closes the window and triggers the final report
//!
//! Any other text is an ordinary chat message.
//!
//! ## Architecture Overview
//!
//! - `protocol`: frame classification and construction
//! - `transport`: WebSocket server/client and an in-memory pair behind the
//!   `TextSender`/`TextReceiver` traits
//! - `registry`: connected peers with connect/disconnect observers
//! - `session` and `dispatcher`: per-connection measurement windows
//! - `metrics`: rate math, report types and report sinks
//! - `driver`: sender and receiver benchmark loops
//! - `server`: per-mode message handlers
//! - `benchmark`: role/mode orchestration
//! - `results`: JSON results output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ws_benchmark::{driver, metrics::LogSink, transport::WsClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = WsClient::connect("ws://127.0.0.1:8765", Duration::from_secs(10)).await?;
//!     let summary = driver::run_count_burst(&mut client, 10_000, &LogSink).await;
//!     println!("{} messages/sec", summary.messages_per_second);
//!     client.close().await;
//!     Ok(())
//! }
//! ```

/// Role/mode orchestration
///
/// Contains `BenchmarkConfig`, validated from the command line, and
/// `BenchmarkRunner`, which runs the selected server or client mode.
pub mod benchmark;

/// Command-line interface and configuration
///
/// Argument parsing using clap, including human-readable durations
/// (e.g., "10s", "500ms") and `ws://host:port` URL validation.
pub mod cli;

/// Per-connection frame dispatch into benchmark sessions
pub mod dispatcher;

/// Sender and receiver benchmark loops
pub mod driver;

/// Keyboard input producer thread for the chat modes
pub mod input;

pub mod logging;

/// Throughput measurement and reporting
///
/// Rate calculation, interval/final/sender report types and the
/// `ReportSink` implementations that deliver them.
pub mod metrics;

/// Benchmark frame classification and construction
pub mod protocol;

/// Connected-peer registry
pub mod registry;

/// Result collection and JSON output
pub mod results;

/// Server message handlers for the chat, receive and send modes
pub mod server;

pub mod session;

pub mod shutdown;

/// WebSocket and in-memory transports
pub mod transport;

pub mod utils;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner};
pub use cli::{Args, Mode, Role};
pub use dispatcher::{Dispatch, Dispatcher};
pub use metrics::{FinalReport, IntervalReport, Report, ReportSink, SenderSummary};
pub use protocol::{classify, Frame, ProtocolError};
pub use registry::{ClientRegistry, ConnectionObserver};
pub use results::ResultsManager;
pub use shutdown::Shutdown;
pub use transport::{ConnectionId, TextReceiver, TextSender, TransportError};

/// The current version of the WebSocket benchmark
///
/// Populated from Cargo.toml and recorded in the results file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default listen/connect host
    pub const HOST: &str = "127.0.0.1";

    /// Default listen/connect port
    pub const PORT: u16 = 8765;

    /// Default endpoint; must agree with `HOST` and `PORT`
    pub const URL: &str = "ws://127.0.0.1:8765";

    /// Default length of a duration-based send run
    pub const DURATION: Duration = Duration::from_secs(10);

    /// Default reporting interval
    pub const INTERVAL: Duration = Duration::from_secs(1);

    /// Default burst size of the count-based modes
    pub const MSG_COUNT: u64 = 1000;

    /// Default filler bytes per duration-based data frame
    pub const PAYLOAD_SIZE: usize = 32;

    /// Default upper bound on establishing a client connection
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long chat loops wait for a keyboard line per poll
    pub const INPUT_POLL: Duration = Duration::from_millis(100);
}

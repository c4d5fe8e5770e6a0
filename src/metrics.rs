//! # Throughput Metrics
//!
//! Rate math, the report types produced by benchmark sessions and senders,
//! and the [`ReportSink`] implementations that deliver them: the log, an
//! in-memory collector and a fan-out set.

use crate::transport::ConnectionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const BANNER_WIDTH: usize = 60;

/// Messages per second for `count` messages over `elapsed`.
///
/// A zero elapsed time yields a rate of 0 rather than infinity.
pub fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Statistics for one elapsed reporting interval of an active window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalReport {
    pub connection: ConnectionId,
    /// Time since the window opened
    pub window_elapsed: Duration,
    /// Frames counted since the previous interval flush
    pub interval_count: u64,
    /// Time since the previous interval flush
    pub interval_elapsed: Duration,
    pub messages_per_second: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Statistics for a window closed by an END frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub connection: ConnectionId,
    pub total_count: u64,
    pub total_elapsed: Duration,
    pub average_rate: f64,
    /// Count echoed by `__BENCHMARK_END__:N`, when the peer sent one
    pub declared_count: Option<u64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Summary of a sender-side run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderSummary {
    pub connection: ConnectionId,
    pub messages_sent: u64,
    pub elapsed: Duration,
    pub messages_per_second: f64,
    /// False when the connection went away before the run finished
    pub completed: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Every statistic the harness can emit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Report {
    Interval(IntervalReport),
    Final(FinalReport),
    Sender(SenderSummary),
}

impl Report {
    pub fn connection(&self) -> ConnectionId {
        match self {
            Report::Interval(r) => r.connection,
            Report::Final(r) => r.connection,
            Report::Sender(r) => r.connection,
        }
    }
}

impl fmt::Display for IntervalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Connection {} [{:.1}s] {} messages in {:.1}s ({:.2} messages/sec)",
            self.connection,
            self.window_elapsed.as_secs_f64(),
            self.interval_count,
            self.interval_elapsed.as_secs_f64(),
            self.messages_per_second
        )
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(BANNER_WIDTH))?;
        writeln!(f, "Connection {}: measurement complete", self.connection)?;
        writeln!(f, "  Total received:  {} messages", self.total_count)?;
        writeln!(
            f,
            "  Total time:      {:.2} seconds",
            self.total_elapsed.as_secs_f64()
        )?;
        writeln!(f, "  Average rate:    {:.2} messages/sec", self.average_rate)?;
        if let Some(declared) = self.declared_count {
            writeln!(f, "  Declared count:  {}", declared)?;
        }
        write!(f, "{}", "=".repeat(BANNER_WIDTH))
    }
}

impl fmt::Display for SenderSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(BANNER_WIDTH))?;
        if self.completed {
            writeln!(f, "Connection {}: send run complete", self.connection)?;
        } else {
            writeln!(
                f,
                "Connection {}: send run aborted (connection closed)",
                self.connection
            )?;
        }
        writeln!(f, "  Sent:            {} messages", self.messages_sent)?;
        writeln!(
            f,
            "  Send time:       {:.4} seconds",
            self.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "  Send rate:       {:.2} messages/sec",
            self.messages_per_second
        )?;
        write!(f, "{}", "=".repeat(BANNER_WIDTH))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Interval(r) => fmt::Display::fmt(r, f),
            Report::Final(r) => fmt::Display::fmt(r, f),
            Report::Sender(r) => fmt::Display::fmt(r, f),
        }
    }
}

/// Destination for emitted reports
pub trait ReportSink: Send + Sync {
    fn emit(&self, report: &Report);
}

/// Renders reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&self, report: &Report) {
        match report {
            Report::Interval(r) => info!("{}", r),
            _ => {
                for line in report.to_string().lines() {
                    info!("{}", line);
                }
            }
        }
    }
}

/// Keeps every report in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    pub fn finals(&self) -> Vec<FinalReport> {
        self.reports
            .lock()
            .iter()
            .filter_map(|r| match r {
                Report::Final(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn intervals(&self) -> Vec<IntervalReport> {
        self.reports
            .lock()
            .iter()
            .filter_map(|r| match r {
                Report::Interval(i) => Some(i.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sender_summaries(&self) -> Vec<SenderSummary> {
        self.reports
            .lock()
            .iter()
            .filter_map(|r| match r {
                Report::Sender(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ReportSink for MemorySink {
    fn emit(&self, report: &Report) {
        self.reports.lock().push(report.clone());
    }
}

/// Fans a report out to several sinks
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }
}

impl ReportSink for SinkSet {
    fn emit(&self, report: &Report) {
        for sink in &self.sinks {
            sink.emit(report);
        }
    }
}

/// Throughput calculator for a sender run
pub struct ThroughputCalculator {
    start_time: Instant,
    message_count: u64,
}

impl ThroughputCalculator {
    /// Start measuring at `start_time`
    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            start_time,
            message_count: 0,
        }
    }

    /// Record a message transmission
    pub fn record_message(&mut self) {
        self.message_count += 1;
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Build a summary for the run as of `now`
    pub fn summary_at(
        &self,
        connection: ConnectionId,
        now: Instant,
        completed: bool,
    ) -> SenderSummary {
        let elapsed = now.saturating_duration_since(self.start_time);
        SenderSummary {
            connection,
            messages_sent: self.message_count,
            elapsed,
            messages_per_second: rate(self.message_count, elapsed),
            completed,
            timestamp: chrono::Utc::now(),
        }
    }
}

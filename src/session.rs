//! # Benchmark Session State
//!
//! A [`BenchmarkSession`] is the state of one open measurement window on one
//! connection. The [`SessionStore`] maps connection ids to their sessions.
//!
//! ## Lifecycle
//!
//! ```text
//!   Absent --START--> Active --END--> Absent   (final report)
//!                       |  ^
//!                       DATA (interval report when the interval elapsed)
//!
//!   Active --disconnect--> Absent              (no report)
//! ```
//!
//! Every operation takes the current instant explicitly so that interval
//! behavior can be exercised against a synthetic clock.

use crate::metrics::{rate, FinalReport, IntervalReport};
use crate::transport::ConnectionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One active measurement window
#[derive(Debug, Clone)]
pub struct BenchmarkSession {
    connection: ConnectionId,
    start_time: Instant,
    interval_start: Instant,
    total_count: u64,
    interval_count: u64,
    interval_length: Duration,
}

impl BenchmarkSession {
    /// Open a window at `now`
    pub fn start(connection: ConnectionId, interval_length: Duration, now: Instant) -> Self {
        Self {
            connection,
            start_time: now,
            interval_start: now,
            total_count: 0,
            interval_count: 0,
            interval_length,
        }
    }

    /// Count one data frame observed at `now`.
    ///
    /// Returns an interval report when at least `interval_length` has passed
    /// since the last flush; the interval then restarts at `now`.
    pub fn record_data(&mut self, now: Instant) -> Option<IntervalReport> {
        self.total_count += 1;
        self.interval_count += 1;

        let interval_elapsed = now.saturating_duration_since(self.interval_start);
        if interval_elapsed < self.interval_length {
            return None;
        }

        let report = IntervalReport {
            connection: self.connection,
            window_elapsed: now.saturating_duration_since(self.start_time),
            interval_count: self.interval_count,
            interval_elapsed,
            messages_per_second: rate(self.interval_count, interval_elapsed),
            timestamp: chrono::Utc::now(),
        };

        self.interval_start = self.interval_start.max(now);
        self.interval_count = 0;
        Some(report)
    }

    /// Close the window at `now` and produce its final report
    pub fn finish(self, now: Instant, declared_count: Option<u64>) -> FinalReport {
        let total_elapsed = now.saturating_duration_since(self.start_time);
        FinalReport {
            connection: self.connection,
            total_count: self.total_count,
            total_elapsed,
            average_rate: rate(self.total_count, total_elapsed),
            declared_count,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn interval_count(&self) -> u64 {
        self.interval_count
    }

    pub fn interval_length(&self) -> Duration {
        self.interval_length
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn interval_start(&self) -> Instant {
        self.interval_start
    }
}

/// Active sessions keyed by connection
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ConnectionId, BenchmarkSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, replacing any active one for the same connection.
    ///
    /// Returns the replaced session, if there was one.
    pub fn start(
        &mut self,
        connection: ConnectionId,
        interval_length: Duration,
        now: Instant,
    ) -> Option<BenchmarkSession> {
        self.sessions.insert(
            connection,
            BenchmarkSession::start(connection, interval_length, now),
        )
    }

    /// Count a data frame. `None` in the outer option means no active session.
    pub fn record_data(
        &mut self,
        connection: ConnectionId,
        now: Instant,
    ) -> Option<Option<IntervalReport>> {
        self.sessions
            .get_mut(&connection)
            .map(|session| session.record_data(now))
    }

    /// Close and remove the session, if any
    pub fn finish(
        &mut self,
        connection: ConnectionId,
        now: Instant,
        declared_count: Option<u64>,
    ) -> Option<FinalReport> {
        self.sessions
            .remove(&connection)
            .map(|session| session.finish(now, declared_count))
    }

    /// Drop the session without a report
    pub fn discard(&mut self, connection: ConnectionId) -> Option<BenchmarkSession> {
        self.sessions.remove(&connection)
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&BenchmarkSession> {
        self.sessions.get(&connection)
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

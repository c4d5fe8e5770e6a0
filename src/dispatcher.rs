//! # Frame Dispatcher
//!
//! Classifies each incoming text frame and applies it to the connection's
//! benchmark session. Interval and final reports are emitted to the
//! configured [`ReportSink`] and also returned to the caller as a
//! [`Dispatch`] outcome.
//!
//! The dispatcher owns the [`SessionStore`]. Registered with the client
//! registry as a [`ConnectionObserver`], it discards the session of any
//! connection that goes away, without a final report.
//!
//! Frames for one connection must be dispatched in arrival order. Frames for
//! different connections may be dispatched concurrently; the store lock is
//! never held across an await or while a sink runs.

use crate::metrics::{FinalReport, IntervalReport, Report, ReportSink};
use crate::protocol::{classify, Frame, ProtocolError};
use crate::registry::ConnectionObserver;
use crate::session::SessionStore;
use crate::transport::ConnectionId;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What a dispatched frame did
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A session was opened; `replaced` is true when an active one was
    /// discarded. `requested` carries the count of `START:N`.
    Started {
        replaced: bool,
        requested: Option<u64>,
    },
    /// A data frame was counted
    Counted,
    /// A data frame was counted and closed an interval
    Interval(IntervalReport),
    /// The session was closed by END
    Finished(FinalReport),
    /// DATA or END with no active session
    Ignored,
    /// Not a benchmark frame; the caller decides what to do with it
    Application(String),
    /// Malformed control frame, discarded
    Rejected(ProtocolError),
}

/// Routes frames to per-connection benchmark sessions
pub struct Dispatcher {
    sessions: Mutex<SessionStore>,
    interval_length: Duration,
    sink: Arc<dyn ReportSink>,
}

impl Dispatcher {
    pub fn new(interval_length: Duration, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            sessions: Mutex::new(SessionStore::new()),
            interval_length,
            sink,
        }
    }

    pub fn interval_length(&self) -> Duration {
        self.interval_length
    }

    /// Dispatch a frame received now
    pub fn dispatch(&self, connection: ConnectionId, message: &str) -> Dispatch {
        self.dispatch_at(connection, message, Instant::now())
    }

    /// Dispatch a frame received at `now`
    pub fn dispatch_at(&self, connection: ConnectionId, message: &str, now: Instant) -> Dispatch {
        match classify(message) {
            Ok(frame) => self.apply(connection, frame, now),
            Err(e) => {
                warn!("Connection {}: discarding frame: {}", connection, e);
                Dispatch::Rejected(e)
            }
        }
    }

    /// Apply an already classified frame
    pub fn apply(&self, connection: ConnectionId, frame: Frame, now: Instant) -> Dispatch {
        match frame {
            Frame::Start { count } => {
                let replaced = self
                    .sessions
                    .lock()
                    .start(connection, self.interval_length, now);
                if let Some(previous) = &replaced {
                    warn!(
                        "Connection {}: new START discards the active window ({} messages counted)",
                        connection,
                        previous.total_count()
                    );
                }
                info!("Connection {}: measuring throughput...", connection);
                Dispatch::Started {
                    replaced: replaced.is_some(),
                    requested: count,
                }
            }
            Frame::Data { .. } => {
                let outcome = self.sessions.lock().record_data(connection, now);
                match outcome {
                    None => Dispatch::Ignored,
                    Some(None) => Dispatch::Counted,
                    Some(Some(report)) => {
                        self.sink.emit(&Report::Interval(report.clone()));
                        Dispatch::Interval(report)
                    }
                }
            }
            Frame::End { count } => {
                let finished = self.sessions.lock().finish(connection, now, count);
                match finished {
                    None => {
                        debug!("Connection {}: END without an active window", connection);
                        Dispatch::Ignored
                    }
                    Some(report) => {
                        if let Some(declared) = count {
                            if declared != report.total_count {
                                warn!(
                                    "Connection {}: peer declared {} messages, counted {}",
                                    connection, declared, report.total_count
                                );
                            }
                        }
                        self.sink.emit(&Report::Final(report.clone()));
                        Dispatch::Finished(report)
                    }
                }
            }
            Frame::Application(text) => Dispatch::Application(text),
        }
    }

    /// Discard the connection's session without a report
    pub fn purge(&self, connection: ConnectionId) -> bool {
        let discarded = self.sessions.lock().discard(connection);
        if let Some(session) = &discarded {
            debug!(
                "Connection {}: discarding unfinished window ({} messages counted)",
                connection,
                session.total_count()
            );
        }
        discarded.is_some()
    }

    pub fn has_session(&self, connection: ConnectionId) -> bool {
        self.sessions.lock().contains(connection)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Counted frames of the connection's active window
    pub fn total_count(&self, connection: ConnectionId) -> Option<u64> {
        self.sessions
            .lock()
            .get(connection)
            .map(|session| session.total_count())
    }
}

impl ConnectionObserver for Dispatcher {
    fn on_disconnect(&self, id: ConnectionId) {
        self.purge(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;
    use crate::protocol::{end_frame, indexed_data_frame, start_frame};

    const SECOND: Duration = Duration::from_secs(1);

    fn dispatcher(interval: Duration) -> (Dispatcher, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Dispatcher::new(interval, sink.clone()), sink)
    }

    #[test]
    fn test_start_five_data_end() {
        let (dispatcher, sink) = dispatcher(1000 * SECOND);
        let id = ConnectionId::new(1);
        let t0 = Instant::now();

        assert_eq!(
            dispatcher.dispatch_at(id, "__BENCHMARK_START__", t0),
            Dispatch::Started {
                replaced: false,
                requested: None
            }
        );
        for i in 0..5u64 {
            let now = t0 + Duration::from_millis(i * 10);
            assert_eq!(
                dispatcher.dispatch_at(id, "__BENCHMARK_DATA__payload", now),
                Dispatch::Counted
            );
        }
        let outcome = dispatcher.dispatch_at(id, "__BENCHMARK_END__", t0 + SECOND);

        let finals = sink.finals();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].total_count, 5);
        assert_eq!(finals[0].total_elapsed, SECOND);
        assert_eq!(outcome, Dispatch::Finished(finals[0].clone()));
        assert!(sink.intervals().is_empty());
        assert!(!dispatcher.has_session(id));
    }

    #[test]
    fn test_end_without_session_is_ignored() {
        let (dispatcher, sink) = dispatcher(SECOND);
        let id = ConnectionId::new(2);

        assert_eq!(dispatcher.dispatch(id, "__BENCHMARK_END__"), Dispatch::Ignored);
        assert_eq!(dispatcher.dispatch(id, "__BENCHMARK_END__:10"), Dispatch::Ignored);
        assert_eq!(dispatcher.dispatch(id, "__BENCHMARK_DATA__:0"), Dispatch::Ignored);
        assert!(sink.is_empty());
        assert_eq!(dispatcher.active_sessions(), 0);
    }

    #[test]
    fn test_malformed_start_is_rejected() {
        let (dispatcher, sink) = dispatcher(SECOND);
        let id = ConnectionId::new(3);

        assert!(matches!(
            dispatcher.dispatch(id, "__BENCHMARK_START__:abc"),
            Dispatch::Rejected(ProtocolError::InvalidCount { .. })
        ));
        assert!(!dispatcher.has_session(id));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_malformed_frame_leaves_active_session_untouched() {
        let (dispatcher, _sink) = dispatcher(SECOND);
        let id = ConnectionId::new(4);
        let t0 = Instant::now();

        dispatcher.dispatch_at(id, "__BENCHMARK_START__", t0);
        dispatcher.dispatch_at(id, "__BENCHMARK_DATA__", t0);
        assert!(matches!(
            dispatcher.dispatch_at(id, "__BENCHMARK_START__:1:2", t0),
            Dispatch::Rejected(_)
        ));
        assert!(matches!(
            dispatcher.dispatch_at(id, "__BENCHMARK_END__:x", t0),
            Dispatch::Rejected(_)
        ));
        assert_eq!(dispatcher.total_count(id), Some(1));
    }

    #[test]
    fn test_disconnect_purges_session() {
        let (dispatcher, sink) = dispatcher(SECOND);
        let id = ConnectionId::new(5);
        let t0 = Instant::now();

        dispatcher.dispatch_at(id, "__BENCHMARK_START__", t0);
        dispatcher.dispatch_at(id, "__BENCHMARK_DATA__", t0);
        dispatcher.on_disconnect(id);

        assert!(!dispatcher.has_session(id));
        assert_eq!(
            dispatcher.dispatch_at(id, "__BENCHMARK_DATA__", t0 + 5 * SECOND),
            Dispatch::Ignored
        );
        assert_eq!(
            dispatcher.dispatch_at(id, "__BENCHMARK_END__", t0 + 5 * SECOND),
            Dispatch::Ignored
        );
        assert!(sink.is_empty());
    }

    #[test]
    fn test_connections_do_not_share_counters() {
        let (dispatcher, sink) = dispatcher(SECOND);
        let a = ConnectionId::new(10);
        let b = ConnectionId::new(11);
        let t0 = Instant::now();

        // B reports every three seconds into the same sink.
        let b_dispatcher = Dispatcher::new(3 * SECOND, sink.clone());

        dispatcher.dispatch_at(a, &start_frame(None), t0);
        b_dispatcher.dispatch_at(b, &start_frame(None), t0);
        for tick in 1..=40u64 {
            let now = t0 + Duration::from_millis(tick * 100);
            dispatcher.dispatch_at(a, &indexed_data_frame(tick), now);
            if tick % 2 == 0 {
                b_dispatcher.dispatch_at(b, &indexed_data_frame(tick), now);
            }
        }
        dispatcher.dispatch_at(a, &end_frame(None), t0 + 4 * SECOND);
        b_dispatcher.dispatch_at(b, &end_frame(Some(20)), t0 + 4 * SECOND);

        let intervals = sink.intervals();
        let a_intervals: Vec<_> = intervals.iter().filter(|r| r.connection == a).collect();
        let b_intervals: Vec<_> = intervals.iter().filter(|r| r.connection == b).collect();
        assert_eq!(a_intervals.len(), 4);
        assert!(a_intervals.iter().all(|r| r.interval_count == 10));
        assert_eq!(b_intervals.len(), 1);
        assert_eq!(b_intervals[0].interval_count, 15);

        let finals = sink.finals();
        let a_final = finals.iter().find(|r| r.connection == a).unwrap();
        let b_final = finals.iter().find(|r| r.connection == b).unwrap();
        assert_eq!(a_final.total_count, 40);
        assert_eq!(b_final.total_count, 20);
        assert_eq!(b_final.declared_count, Some(20));
    }

    #[test]
    fn test_shared_dispatcher_keeps_connections_apart() {
        let (dispatcher, sink) = dispatcher(1000 * SECOND);
        let a = ConnectionId::new(20);
        let b = ConnectionId::new(21);

        dispatcher.dispatch(a, "__BENCHMARK_START__");
        dispatcher.dispatch(b, "__BENCHMARK_START__:3");
        for _ in 0..7 {
            dispatcher.dispatch(a, "__BENCHMARK_DATA__");
        }
        for i in 0..3 {
            dispatcher.dispatch(b, &indexed_data_frame(i));
        }
        assert_eq!(dispatcher.total_count(a), Some(7));
        assert_eq!(dispatcher.total_count(b), Some(3));

        dispatcher.dispatch(b, "__BENCHMARK_END__:3");
        assert_eq!(dispatcher.total_count(a), Some(7));
        assert_eq!(sink.finals().len(), 1);
        assert_eq!(sink.finals()[0].connection, b);
    }

    #[test]
    fn test_application_text_passes_through() {
        let (dispatcher, sink) = dispatcher(SECOND);
        assert_eq!(
            dispatcher.dispatch(ConnectionId::new(30), "hello"),
            Dispatch::Application("hello".to_string())
        );
        assert!(sink.is_empty());
    }
}

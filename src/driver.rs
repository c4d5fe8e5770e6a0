//! # Benchmark Drivers
//!
//! The sender drivers generate the benchmark frame sequence on any
//! [`TextSender`]; the receiver driver consumes frames from any
//! [`TextReceiver`] and feeds them through a [`Dispatcher`].
//!
//! ## Sender Variants
//!
//! - **Count-based** ([`run_count_burst`]): `START:N`, exactly N indexed data
//!   frames, `END:N`, then a [`SenderSummary`].
//! - **Duration-based** ([`run_duration`]): `START`, constant-payload data
//!   frames until the duration elapses with interval reports along the way,
//!   `END`, a final report and a [`SenderSummary`].
//!
//! Both stop early, without an error, as soon as the connection reports
//! itself gone. The summary is then marked incomplete and no END is sent.

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::metrics::{FinalReport, Report, ReportSink, SenderSummary, ThroughputCalculator};
use crate::protocol::{end_frame, indexed_data_frame, payload_data_frame, start_frame};
use crate::session::BenchmarkSession;
use crate::transport::{ConnectionId, TextReceiver, TextSender, TransportError};
use crate::utils::{format_bytes, format_duration};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tight send loops yield to the scheduler this often
const YIELD_EVERY: u64 = 256;

/// Send one frame; false means the run must stop
async fn send_or_stop<S: TextSender + ?Sized>(sender: &mut S, text: String) -> bool {
    match sender.send_text(text).await {
        Ok(()) => true,
        Err(e) if e.is_disconnect() => {
            warn!(
                "Connection {} lost during benchmark: {}",
                sender.connection_id(),
                e
            );
            false
        }
        Err(e) => {
            error!("Connection {}: send failed: {}", sender.connection_id(), e);
            false
        }
    }
}

/// Send a fixed-count burst of `count` indexed data frames
pub async fn run_count_burst<S: TextSender + ?Sized>(
    sender: &mut S,
    count: u64,
    sink: &dyn ReportSink,
) -> SenderSummary {
    let connection = sender.connection_id();
    info!("Connection {}: sending {} messages", connection, count);

    let mut calculator = ThroughputCalculator::starting_at(Instant::now());
    let mut completed = send_or_stop(sender, start_frame(Some(count))).await;

    if completed {
        for index in 0..count {
            if !sender.is_connected() || !send_or_stop(sender, indexed_data_frame(index)).await {
                completed = false;
                break;
            }
            calculator.record_message();
            if calculator.message_count() % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    if completed {
        completed = send_or_stop(sender, end_frame(Some(count))).await;
    }

    let summary = calculator.summary_at(connection, Instant::now(), completed);
    if !completed {
        warn!(
            "Connection {}: burst stopped after {} of {} messages",
            connection, summary.messages_sent, count
        );
    }
    sink.emit(&Report::Sender(summary.clone()));
    summary
}

/// Send constant-payload data frames for `duration`
pub async fn run_duration<S: TextSender + ?Sized>(
    sender: &mut S,
    duration: Duration,
    interval: Duration,
    payload_size: usize,
    sink: &dyn ReportSink,
) -> SenderSummary {
    let connection = sender.connection_id();
    info!(
        "Connection {}: sending for {} ({} payload per frame)",
        connection,
        format_duration(duration),
        format_bytes(payload_size)
    );

    let payload = payload_data_frame(payload_size);
    let start = Instant::now();
    // A duration past the end of the clock runs until the peer leaves.
    let deadline = start.checked_add(duration);
    let mut calculator = ThroughputCalculator::starting_at(start);
    let mut session = BenchmarkSession::start(connection, interval, start);
    let mut completed = send_or_stop(sender, start_frame(None)).await;

    while completed && deadline.map_or(true, |deadline| Instant::now() < deadline) {
        if !sender.is_connected() || !send_or_stop(sender, payload.clone()).await {
            completed = false;
            break;
        }
        calculator.record_message();
        if let Some(report) = session.record_data(Instant::now()) {
            sink.emit(&Report::Interval(report));
        }
        if calculator.message_count() % YIELD_EVERY == 0 {
            tokio::task::yield_now().await;
        }
    }

    if completed {
        completed = send_or_stop(sender, end_frame(None)).await;
    }

    let now = Instant::now();
    if completed {
        sink.emit(&Report::Final(session.finish(now, None)));
    } else {
        warn!(
            "Connection {}: run stopped early after {} messages",
            connection,
            calculator.message_count()
        );
    }

    let summary = calculator.summary_at(connection, now, completed);
    sink.emit(&Report::Sender(summary.clone()));
    summary
}

/// Feed received frames to the dispatcher until the window closes.
///
/// Returns the final report when END arrives, or `None` when the peer
/// closes first; in that case the unfinished session is discarded.
pub async fn run_receiver<R: TextReceiver + ?Sized>(
    receiver: &mut R,
    dispatcher: &Dispatcher,
    connection: ConnectionId,
) -> Result<Option<FinalReport>, TransportError> {
    loop {
        let text = match receiver.recv_text().await {
            Ok(Some(text)) => text,
            Ok(None) => break,
            Err(e) if e.is_disconnect() => {
                debug!("Connection {} closed while receiving: {}", connection, e);
                break;
            }
            Err(e) => {
                dispatcher.purge(connection);
                return Err(e);
            }
        };

        match dispatcher.dispatch(connection, &text) {
            Dispatch::Finished(report) => return Ok(Some(report)),
            Dispatch::Application(text) => info!("Received: {}", text),
            _ => {}
        }
    }

    if dispatcher.purge(connection) {
        warn!("Connection {} closed before the benchmark finished", connection);
    }
    Ok(None)
}

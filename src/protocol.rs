//! # Benchmark Wire Protocol
//!
//! The benchmark sub-protocol rides on plain WebSocket text frames. Control
//! frames are recognised by literal prefixes; everything else is application
//! text that the benchmark logic never counts.
//!
//! | Frame                        | Meaning                                   |
//! |------------------------------|-------------------------------------------|
//! | `__BENCHMARK_START__`        | open a measurement window                 |
//! | `__BENCHMARK_START__:<N>`    | open (or request) a burst of `N` frames   |
//! | `__BENCHMARK_DATA__<any>`    | one counted data frame                    |
//! | `__BENCHMARK_DATA__:<i>`     | data frame carrying a 0-based index       |
//! | `__BENCHMARK_END__`          | close the window                          |
//! | `__BENCHMARK_END__:<N>`      | close a burst, `N` echoes the burst size  |
//!
//! ## Classification Order
//!
//! 1. START (exact literal or `START:N`)
//! 2. END (exact literal or `END:N`)
//! 3. DATA (prefix match, remainder ignored by counting)
//! 4. Application text
//!
//! Frames that begin with the START or END literal but do not have one of the
//! shapes above are malformed and rejected with a [`ProtocolError`].

use thiserror::Error;

/// Literal opening a measurement window.
pub const START_MARKER: &str = "__BENCHMARK_START__";

/// Literal closing a measurement window.
pub const END_MARKER: &str = "__BENCHMARK_END__";

/// Prefix of every counted data frame.
pub const DATA_PREFIX: &str = "__BENCHMARK_DATA__";

/// Separator between a control literal and its numeric argument.
const FIELD_SEPARATOR: char = ':';

/// Errors raised while classifying an incoming frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The numeric argument of a control frame is not a base-10 integer
    #[error("invalid count '{value}' in control frame '{frame}'")]
    InvalidCount { frame: String, value: String },

    /// The control frame has the wrong number of `:`-separated fields or
    /// trailing data after the literal
    #[error("malformed control frame '{frame}': expected {expected}")]
    MalformedControl {
        frame: String,
        expected: &'static str,
    },
}

/// A classified incoming text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opens a window; `count` is present in the fixed-count burst variant
    Start { count: Option<u64> },
    /// Closes a window; `count` is the reserved burst size echo
    End { count: Option<u64> },
    /// A counted data frame; `index` is present in the burst variant
    Data { index: Option<u64> },
    /// Anything that is not part of the benchmark protocol
    Application(String),
}

impl Frame {
    /// Returns true for START and END frames.
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Start { .. } | Frame::End { .. })
    }
}

/// Classify one incoming text message.
///
/// Application text is returned unchanged inside [`Frame::Application`].
pub fn classify(message: &str) -> Result<Frame, ProtocolError> {
    if let Some(rest) = message.strip_prefix(START_MARKER) {
        let count = parse_control_argument(message, rest, "__BENCHMARK_START__[:N]")?;
        return Ok(Frame::Start { count });
    }

    if let Some(rest) = message.strip_prefix(END_MARKER) {
        let count = parse_control_argument(message, rest, "__BENCHMARK_END__[:N]")?;
        return Ok(Frame::End { count });
    }

    if let Some(rest) = message.strip_prefix(DATA_PREFIX) {
        // Only a clean ":<u64>" suffix is treated as an index; any other
        // content is payload and is ignored.
        let index = rest
            .strip_prefix(FIELD_SEPARATOR)
            .and_then(|digits| digits.parse::<u64>().ok());
        return Ok(Frame::Data { index });
    }

    Ok(Frame::Application(message.to_string()))
}

/// Parse the optional `:N` suffix of a START/END literal.
fn parse_control_argument(
    frame: &str,
    rest: &str,
    expected: &'static str,
) -> Result<Option<u64>, ProtocolError> {
    if rest.is_empty() {
        return Ok(None);
    }

    let Some(value) = rest.strip_prefix(FIELD_SEPARATOR) else {
        return Err(ProtocolError::MalformedControl {
            frame: frame.to_string(),
            expected,
        });
    };

    if value.contains(FIELD_SEPARATOR) {
        return Err(ProtocolError::MalformedControl {
            frame: frame.to_string(),
            expected,
        });
    }

    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidCount {
            frame: frame.to_string(),
            value: value.to_string(),
        })
}

/// `__BENCHMARK_START__` or `__BENCHMARK_START__:N`
pub fn start_frame(count: Option<u64>) -> String {
    match count {
        Some(n) => format!("{}{}{}", START_MARKER, FIELD_SEPARATOR, n),
        None => START_MARKER.to_string(),
    }
}

/// `__BENCHMARK_END__` or `__BENCHMARK_END__:N`
pub fn end_frame(count: Option<u64>) -> String {
    match count {
        Some(n) => format!("{}{}{}", END_MARKER, FIELD_SEPARATOR, n),
        None => END_MARKER.to_string(),
    }
}

/// Indexed data frame used by fixed-count bursts.
pub fn indexed_data_frame(index: u64) -> String {
    format!("{}{}{}", DATA_PREFIX, FIELD_SEPARATOR, index)
}

/// Constant data frame used by duration-based runs.
///
/// The filler is `payload_size` ASCII bytes; the frame content is identical
/// for every call with the same size, so callers build it once.
pub fn payload_data_frame(payload_size: usize) -> String {
    let mut frame = String::with_capacity(DATA_PREFIX.len() + payload_size);
    frame.push_str(DATA_PREFIX);
    frame.extend(std::iter::repeat('x').take(payload_size));
    frame
}

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// WebSocket Benchmark - chat relay and text-frame throughput harness
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Run as server or client
    #[clap(short = 'r', long, value_enum, default_value_t = Role::Server, help_heading = "Core Options")]
    pub role: Role,

    /// Behavior of the chosen role
    #[clap(short = 'm', long, value_enum, default_value_t = Mode::Chat, help_heading = "Core Options")]
    pub mode: Mode,

    /// Endpoint to listen on (server) or connect to (client)
    #[clap(long, default_value = crate::defaults::URL, help_heading = "Core Options")]
    pub url: String,

    /// Duration of a duration-based send run
    #[clap(short = 'd', long, value_parser = parse_duration, default_value = "10s")]
    pub duration: Duration,

    /// Interval between throughput reports
    #[clap(short = 'i', long, value_parser = parse_duration, default_value = "1s")]
    pub interval: Duration,

    /// Message count of a count-based burst (client send: selects the
    /// count-based run; client receive: size of the requested burst)
    #[clap(short = 'n', long)]
    pub msg_count: Option<u64>,

    /// Filler bytes in each duration-based data frame
    #[clap(short = 's', long, default_value_t = crate::defaults::PAYLOAD_SIZE)]
    pub payload_size: usize,

    /// Upper bound on establishing the client connection
    #[clap(long, value_parser = parse_duration, default_value = "10s")]
    pub connect_timeout: Duration,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Which end of the connection this process is
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

/// What the process does once connected
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Interactive messaging
    Chat,
    /// Count incoming benchmark frames
    Receive,
    /// Generate benchmark frames
    Send,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Chat => write!(f, "chat"),
            Mode::Receive => write!(f, "receive"),
            Mode::Send => write!(f, "send"),
        }
    }
}

/// Parse duration from string (e.g., "10s", "500ms", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|_| format!("Duration is too large: {}", s))
}

/// Split a `ws://host:port` URL into host and port
pub fn parse_ws_url(url: &str) -> Result<(String, u16), String> {
    let rest = url
        .trim()
        .strip_prefix("ws://")
        .ok_or_else(|| format!("URL must start with ws://: {}", url))?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("URL must include a port: {}", url))?;
    if host.is_empty() {
        return Err(format!("URL must include a host: {}", url));
    }
    if host.contains('/') || port.contains('/') {
        return Err(format!("URL must not include a path: {}", url));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| format!("Invalid port in URL: {}", url))?;
    if port == 0 {
        return Err(format!("Port must be non-zero: {}", url));
    }

    Ok((host.to_string(), port))
}

//! # Benchmark Runner Module
//!
//! Turns the validated configuration into one of six role/mode combinations
//! and runs it until it finishes or the shutdown signal fires.
//!
//! | Role   | Mode    | Behavior |
//! |--------|---------|----------|
//! | server | chat    | echo server, keyboard lines broadcast to every client |
//! | server | receive | counts benchmark frames per connection |
//! | server | send    | answers `START:N` with an N-frame burst |
//! | client | chat    | interactive client |
//! | client | send    | duration-based run, or count-based with `--msg-count` |
//! | client | receive | requests an N-frame burst and counts it |
//!
//! Reports from every mode go to the [`ReportSink`] handed to
//! [`BenchmarkRunner::run`].

use crate::{
    cli::{parse_ws_url, Args, Mode, Role},
    dispatcher::Dispatcher,
    driver::{run_count_burst, run_duration, run_receiver},
    input::{InputEvent, KeyboardInput},
    metrics::{ReportSink, SenderSummary},
    protocol::start_frame,
    registry::{ClientRegistry, LoggingObserver},
    server::{EchoHandler, ReceiverHandler, SenderHandler},
    shutdown::{CloseOnce, Shutdown},
    transport::{
        MessageHandler, TextReceiver, TextSender, TransportConfig, WsClient, WsClientWriter,
        WsServer,
    },
    utils::{format_duration, format_message_rate},
};
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First message the chat client sends after connecting
pub const CLIENT_GREETING: &str = "Hello from client!";

/// Prefix of keyboard lines broadcast by the chat server
pub const SERVER_BROADCAST_PREFIX: &str = "[Server]: ";

/// Configuration for benchmark execution
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    pub role: Role,
    pub mode: Mode,

    /// `ws://host:port` the server listens on or the client connects to
    pub url: String,

    /// Endpoint settings derived from `url`
    pub transport: TransportConfig,

    /// Length of a duration-based send run
    pub duration: Duration,

    /// Reporting interval of every benchmark session
    pub interval: Duration,

    /// Explicit message count; selects the count-based client send
    pub msg_count: Option<u64>,

    /// Filler bytes per duration-based data frame
    pub payload_size: usize,

    /// How long the chat loops wait for a keyboard line before re-checking
    /// the stop signal and the connection
    pub input_poll: Duration,
}

impl BenchmarkConfig {
    /// Create benchmark configuration from CLI arguments
    ///
    /// ## Validation
    /// - URL must be `ws://host:port` with a non-zero port
    /// - Interval and duration must be non-zero
    pub fn from_args(args: &Args) -> Result<Self> {
        let (host, port) = parse_ws_url(&args.url).map_err(anyhow::Error::msg)?;
        if args.interval.is_zero() {
            anyhow::bail!("Report interval must be greater than zero");
        }
        if args.duration.is_zero() {
            anyhow::bail!("Duration must be greater than zero");
        }

        Ok(Self {
            role: args.role,
            mode: args.mode,
            url: format!("ws://{}:{}", host, port),
            transport: TransportConfig {
                host,
                port,
                connect_timeout: args.connect_timeout,
                ..Default::default()
            },
            duration: args.duration,
            interval: args.interval,
            msg_count: args.msg_count,
            payload_size: args.payload_size,
            input_poll: crate::defaults::INPUT_POLL,
        })
    }

    /// Burst size for the count-based modes
    pub fn burst_size(&self) -> u64 {
        self.msg_count.unwrap_or(crate::defaults::MSG_COUNT)
    }
}

impl fmt::Display for BenchmarkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting {} in {} mode", self.role, self.mode)?;
        writeln!(f, "  Endpoint:           {}", self.url)?;
        match (self.role, self.mode) {
            (_, Mode::Chat) => {}
            (Role::Client, Mode::Send) if self.msg_count.is_none() => {
                writeln!(f, "  Test Duration:      {}", format_duration(self.duration))?;
                writeln!(f, "  Payload Size:       {} bytes", self.payload_size)?;
            }
            (Role::Client, _) => {
                writeln!(f, "  Message Count:      {}", self.burst_size())?;
            }
            (Role::Server, _) => {}
        }
        writeln!(f, "  Report Interval:    {}", format_duration(self.interval))?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Runs the configured role and mode
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run until the mode completes or `shutdown` fires
    pub async fn run(&self, sink: Arc<dyn ReportSink>, shutdown: Shutdown) -> Result<()> {
        for line in self.config.to_string().lines() {
            info!("{}", line);
        }

        match self.config.role {
            Role::Server => {
                let dispatcher = Arc::new(Dispatcher::new(self.config.interval, sink.clone()));
                let registry = Arc::new(self.server_registry(&dispatcher));
                let server = WsServer::bind(&self.config.transport, registry)
                    .await
                    .with_context(|| format!("Failed to start server on {}", self.config.url))?;
                self.serve(server, dispatcher, sink, shutdown).await
            }
            Role::Client => self.run_client(sink, shutdown).await,
        }
    }

    /// Registry for the server modes; receive mode also purges sessions of
    /// departed peers.
    pub fn server_registry(&self, dispatcher: &Arc<Dispatcher>) -> ClientRegistry {
        let registry = ClientRegistry::new().with_observer(Arc::new(LoggingObserver));
        match self.config.mode {
            Mode::Receive => registry.with_observer(dispatcher.clone()),
            _ => registry,
        }
    }

    /// Serve on an already bound listener
    pub async fn serve(
        &self,
        server: WsServer,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn ReportSink>,
        shutdown: Shutdown,
    ) -> Result<()> {
        let handler: Arc<dyn MessageHandler> = match self.config.mode {
            Mode::Chat => Arc::new(EchoHandler),
            Mode::Receive => Arc::new(ReceiverHandler::new(dispatcher)),
            Mode::Send => Arc::new(SenderHandler::new(sink)),
        };

        if self.config.mode != Mode::Chat {
            return server.run(handler, shutdown).await;
        }

        let registry = server.registry().clone();
        let server_task = tokio::spawn(server.run(handler, shutdown.clone()));
        self.broadcast_keyboard(&registry, &shutdown).await;
        server_task.await.context("Server task failed")?
    }

    /// Broadcast keyboard lines to every client until shutdown
    async fn broadcast_keyboard(&self, registry: &ClientRegistry, shutdown: &Shutdown) {
        info!("Type a message and press Enter to broadcast it. Ctrl+C to exit.");
        let mut input = KeyboardInput::spawn(shutdown.clone());

        while !shutdown.is_triggered() {
            match input.next_line(self.config.input_poll).await {
                InputEvent::Line(line) => {
                    let text = format!("{}{}", SERVER_BROADCAST_PREFIX, line);
                    let delivered = registry.broadcast(&text).await;
                    info!("Sent to {} clients: {}", delivered, line);
                }
                InputEvent::Idle => {}
                InputEvent::Closed => {
                    debug!("Keyboard input closed; serving until shutdown");
                    shutdown.wait().await;
                }
            }
        }
    }

    async fn run_client(&self, sink: Arc<dyn ReportSink>, shutdown: Shutdown) -> Result<()> {
        info!("Connecting to {}...", self.config.url);
        let client = WsClient::connect(&self.config.url, self.config.transport.connect_timeout)
            .await
            .with_context(|| format!("Failed to connect to {}", self.config.url))?;
        info!("Connected to server!");

        match self.config.mode {
            Mode::Chat => self.run_chat_client(client, shutdown).await,
            Mode::Send => self.run_send_client(client, sink, shutdown).await,
            Mode::Receive => self.run_receive_client(client, sink, shutdown).await,
        }
        Ok(())
    }

    async fn run_chat_client(&self, client: WsClient, shutdown: Shutdown) {
        let (mut writer, mut reader) = client.split();
        let close_once = CloseOnce::new();

        if let Err(e) = writer.send_text(CLIENT_GREETING.to_string()).await {
            warn!("Failed to send greeting: {}", e);
        }

        let peer_close = close_once.clone();
        let mut reader_task = tokio::spawn(async move {
            loop {
                match reader.recv_text().await {
                    Ok(Some(text)) => info!("Received from server: {}", text),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error: {}", e);
                        break;
                    }
                }
            }
            // The peer ended the connection; the exit path has nothing left to close.
            peer_close.begin_close();
            info!("Connection closed");
        });

        info!("Type a message and press Enter to send it. Ctrl+C to exit.");
        let mut input = KeyboardInput::spawn(shutdown.clone());

        while !shutdown.is_triggered() && !reader_task.is_finished() {
            match input.next_line(self.config.input_poll).await {
                InputEvent::Line(line) => {
                    if writer.is_connected() {
                        if let Err(e) = writer.send_text(line).await {
                            warn!("Failed to send message: {}", e);
                        }
                    } else {
                        warn!("Not connected, message not sent");
                    }
                }
                InputEvent::Idle => {}
                InputEvent::Closed => {
                    tokio::select! {
                        _ = shutdown.wait() => {}
                        _ = &mut reader_task => {}
                    }
                    break;
                }
            }
        }

        info!("Closing connection...");
        close_client(&close_once, &mut writer).await;
        reader_task.abort();
    }

    async fn run_send_client(
        &self,
        client: WsClient,
        sink: Arc<dyn ReportSink>,
        shutdown: Shutdown,
    ) {
        let (mut writer, mut reader) = client.split();
        let close_once = CloseOnce::new();

        // Keep reading so the peer's close is noticed and pings are answered.
        let peer_close = close_once.clone();
        let reader_task = tokio::spawn(async move {
            while let Ok(Some(text)) = reader.recv_text().await {
                debug!("Received from server: {}", text);
            }
            peer_close.begin_close();
        });

        let summary = tokio::select! {
            summary = self.send_benchmark(&mut writer, sink.as_ref()) => Some(summary),
            _ = shutdown.wait() => None,
        };
        match summary {
            Some(summary) => log_sender_summary(&summary),
            None => warn!("Send run interrupted"),
        }

        close_client(&close_once, &mut writer).await;
        reader_task.abort();
    }

    async fn send_benchmark(
        &self,
        writer: &mut WsClientWriter,
        sink: &dyn ReportSink,
    ) -> SenderSummary {
        match self.config.msg_count {
            Some(count) => run_count_burst(writer, count, sink).await,
            None => {
                run_duration(
                    writer,
                    self.config.duration,
                    self.config.interval,
                    self.config.payload_size,
                    sink,
                )
                .await
            }
        }
    }

    async fn run_receive_client(
        &self,
        client: WsClient,
        sink: Arc<dyn ReportSink>,
        shutdown: Shutdown,
    ) {
        let connection = client.id();
        let (mut writer, mut reader) = client.split();
        let close_once = CloseOnce::new();
        let dispatcher = Dispatcher::new(self.config.interval, sink);

        let count = self.config.burst_size();
        info!("Requesting {} messages from the server", count);
        if let Err(e) = writer.send_text(start_frame(Some(count))).await {
            warn!("Failed to request a burst: {}", e);
            close_client(&close_once, &mut writer).await;
            return;
        }

        tokio::select! {
            result = run_receiver(&mut reader, &dispatcher, connection) => match result {
                Ok(Some(report)) => info!(
                    "Received {} messages in {} ({})",
                    report.total_count,
                    format_duration(report.total_elapsed),
                    format_message_rate(report.average_rate)
                ),
                Ok(None) => {
                    close_once.begin_close();
                    warn!("Server closed the connection before the burst finished");
                }
                Err(e) => warn!("Receive failed: {}", e),
            },
            _ = shutdown.wait() => {
                dispatcher.purge(connection);
                warn!("Receive run interrupted");
            }
        }

        close_client(&close_once, &mut writer).await;
    }
}

/// Close the writer unless another exit path already did
async fn close_client(close_once: &CloseOnce, writer: &mut WsClientWriter) {
    if close_once.begin_close() {
        writer.close().await;
    }
}

fn log_sender_summary(summary: &SenderSummary) {
    info!(
        "Sent {} messages in {} ({})",
        summary.messages_sent,
        format_duration(summary.elapsed),
        format_message_rate(summary.messages_per_second)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config_from(argv: &[&str]) -> Result<BenchmarkConfig> {
        let mut full = vec!["ws-benchmark"];
        full.extend_from_slice(argv);
        BenchmarkConfig::from_args(&Args::parse_from(full))
    }

    #[test]
    fn test_config_from_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.mode, Mode::Chat);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert_eq!(config.transport.port, 8765);
        assert_eq!(config.url, crate::defaults::URL);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.burst_size(), crate::defaults::MSG_COUNT);
    }

    #[test]
    fn test_config_rejects_invalid_values() {
        assert!(config_from(&["--url", "http://127.0.0.1:8765"]).is_err());
        assert!(config_from(&["--url", "ws://127.0.0.1:0"]).is_err());
        assert!(config_from(&["--interval", "0s"]).is_err());
        assert!(config_from(&["--duration", "0"]).is_err());
    }

    #[test]
    fn test_config_client_send_variants() {
        let duration_based = config_from(&["-r", "client", "-m", "send", "-d", "2s"]).unwrap();
        assert_eq!(duration_based.msg_count, None);
        assert_eq!(duration_based.duration, Duration::from_secs(2));
        assert!(duration_based.to_string().contains("Test Duration"));

        let count_based = config_from(&["-r", "client", "-m", "send", "-n", "50"]).unwrap();
        assert_eq!(count_based.msg_count, Some(50));
        assert!(count_based.to_string().contains("Message Count:      50"));
    }

    #[test]
    fn test_receive_registry_purges_sessions() {
        let config = config_from(&["-m", "receive"]).unwrap();
        let runner = BenchmarkRunner::new(config);
        let sink = Arc::new(crate::metrics::MemorySink::new());
        let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1), sink));
        let registry = runner.server_registry(&dispatcher);

        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let handle = crate::transport::ConnectionHandle::new(
            crate::transport::ConnectionId::next(),
            "127.0.0.1:40002".parse().unwrap(),
            tx,
        );
        registry.add(handle.clone());
        dispatcher.dispatch(handle.id(), "__BENCHMARK_START__");
        assert!(dispatcher.has_session(handle.id()));

        registry.remove(handle.id());
        assert!(!dispatcher.has_session(handle.id()));
    }
}

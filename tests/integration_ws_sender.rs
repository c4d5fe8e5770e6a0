use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use ws_benchmark::{
    cli::Args,
    driver::run_receiver,
    metrics::MemorySink,
    protocol::start_frame,
    registry::ClientRegistry,
    server::{ReceiverHandler, SenderHandler},
    transport::{TextSender, TransportConfig, WsClient, WsServer},
    BenchmarkConfig, BenchmarkRunner, Dispatcher, Shutdown,
};

fn loopback() -> TransportConfig {
    TransportConfig {
        port: 0,
        ..Default::default()
    }
}

/// The sender server answers START:N with exactly N frames and END:N.
#[tokio::test]
async fn sender_server_streams_requested_burst() -> Result<()> {
    let server_sink = Arc::new(MemorySink::new());
    let server = WsServer::bind(&loopback(), Arc::new(ClientRegistry::new())).await?;
    let url = server.url();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(
        Arc::new(SenderHandler::new(server_sink.clone())),
        shutdown.clone(),
    ));

    let client = WsClient::connect(&url, Duration::from_secs(5)).await?;
    let connection = client.id();
    let (mut writer, mut reader) = client.split();
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Dispatcher::new(Duration::from_secs(1000), sink.clone());

    writer.send_text(start_frame(Some(1000))).await?;
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        run_receiver(&mut reader, &dispatcher, connection),
    )
    .await??
    .expect("burst should end with END");

    assert_eq!(report.total_count, 1000);
    assert_eq!(report.declared_count, Some(1000));
    assert_eq!(sink.finals().len(), 1);

    writer.close().await;
    shutdown.trigger();
    Ok(())
}

/// Client receive mode drives a full request/count cycle.
#[tokio::test]
async fn client_receive_mode_against_sender_server() -> Result<()> {
    let server = WsServer::bind(&loopback(), Arc::new(ClientRegistry::new())).await?;
    let url = server.url();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(
        Arc::new(SenderHandler::new(Arc::new(MemorySink::new()))),
        shutdown.clone(),
    ));

    let args = Args::parse_from([
        "ws-benchmark",
        "-r",
        "client",
        "-m",
        "receive",
        "-n",
        "250",
        "--url",
        url.as_str(),
    ]);
    let runner = BenchmarkRunner::new(BenchmarkConfig::from_args(&args)?);
    let sink = Arc::new(MemorySink::new());

    tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(sink.clone(), Shutdown::new()),
    )
    .await??;

    let finals = sink.finals();
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].total_count, 250);

    shutdown.trigger();
    Ok(())
}

/// Client send mode with an explicit count streams into a receiver server.
#[tokio::test]
async fn client_send_mode_against_receiver_server() -> Result<()> {
    let server_sink = Arc::new(MemorySink::new());
    let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1000), server_sink.clone()));
    let registry = Arc::new(ClientRegistry::new().with_observer(dispatcher.clone()));
    let server = WsServer::bind(&loopback(), registry).await?;
    let url = server.url();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(
        Arc::new(ReceiverHandler::new(dispatcher.clone())),
        shutdown.clone(),
    ));

    let args = Args::parse_from([
        "ws-benchmark",
        "-r",
        "client",
        "-m",
        "send",
        "-n",
        "400",
        "--url",
        url.as_str(),
    ]);
    let runner = BenchmarkRunner::new(BenchmarkConfig::from_args(&args)?);
    let sink = Arc::new(MemorySink::new());

    tokio::time::timeout(
        Duration::from_secs(10),
        runner.run(sink.clone(), Shutdown::new()),
    )
    .await??;

    let summaries = sink.sender_summaries();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].completed);
    assert_eq!(summaries[0].messages_sent, 400);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server_sink.finals().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server_sink.finals()[0].total_count, 400);

    shutdown.trigger();
    Ok(())
}

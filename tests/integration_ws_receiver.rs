use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use ws_benchmark::{
    driver::run_count_burst,
    metrics::MemorySink,
    protocol::{indexed_data_frame, start_frame},
    registry::ClientRegistry,
    server::ReceiverHandler,
    transport::{TextSender, TransportConfig, WsClient, WsServer},
    Dispatcher, Shutdown,
};

/// Poll `condition` until it holds or five seconds pass.
async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

struct ReceiverServer {
    url: String,
    sink: Arc<MemorySink>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ClientRegistry>,
    shutdown: Shutdown,
}

async fn start_receiver_server() -> Result<ReceiverServer> {
    let sink = Arc::new(MemorySink::new());
    let dispatcher = Arc::new(Dispatcher::new(Duration::from_secs(1000), sink.clone()));
    let registry = Arc::new(ClientRegistry::new().with_observer(dispatcher.clone()));
    let config = TransportConfig {
        port: 0,
        ..Default::default()
    };

    let server = WsServer::bind(&config, registry.clone()).await?;
    let url = server.url();
    let shutdown = Shutdown::new();
    tokio::spawn(server.run(
        Arc::new(ReceiverHandler::new(dispatcher.clone())),
        shutdown.clone(),
    ));

    Ok(ReceiverServer {
        url,
        sink,
        dispatcher,
        registry,
        shutdown,
    })
}

/// A count-based burst over a real socket is counted exactly.
#[tokio::test]
async fn receiver_counts_burst_over_websocket() -> Result<()> {
    let server = start_receiver_server().await?;
    let mut client = WsClient::connect(&server.url, Duration::from_secs(5)).await?;

    let client_sink = MemorySink::new();
    let summary = run_count_burst(&mut client, 1000, &client_sink).await;
    assert!(summary.completed);
    assert_eq!(summary.messages_sent, 1000);

    assert!(wait_for(|| server.sink.finals().len() == 1).await);
    let report = &server.sink.finals()[0];
    assert_eq!(report.total_count, 1000);
    assert_eq!(report.declared_count, Some(1000));
    assert_eq!(server.dispatcher.active_sessions(), 0);

    client.close().await;
    server.shutdown.trigger();
    Ok(())
}

/// Concurrent clients get independent sessions.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_clients_are_counted_separately() -> Result<()> {
    let server = start_receiver_server().await?;
    let mut a = WsClient::connect(&server.url, Duration::from_secs(5)).await?;
    let mut b = WsClient::connect(&server.url, Duration::from_secs(5)).await?;

    let (summary_a, summary_b) = tokio::join!(
        async {
            let sink = MemorySink::new();
            run_count_burst(&mut a, 300, &sink).await
        },
        async {
            let sink = MemorySink::new();
            run_count_burst(&mut b, 700, &sink).await
        }
    );
    assert!(summary_a.completed && summary_b.completed);

    assert!(wait_for(|| server.sink.finals().len() == 2).await);
    let mut counts: Vec<u64> = server
        .sink
        .finals()
        .iter()
        .map(|r| r.total_count)
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![300, 700]);

    a.close().await;
    b.close().await;
    server.shutdown.trigger();
    Ok(())
}

/// A client that leaves mid-window produces no final report.
#[tokio::test]
async fn disconnect_discards_open_session() -> Result<()> {
    let server = start_receiver_server().await?;
    let mut client = WsClient::connect(&server.url, Duration::from_secs(5)).await?;

    client.send_text(start_frame(None)).await?;
    for i in 0..10 {
        client.send_text(indexed_data_frame(i)).await?;
    }
    assert!(wait_for(|| server.dispatcher.active_sessions() == 1).await);

    client.close().await;
    assert!(wait_for(|| server.registry.count() == 0).await);
    assert_eq!(server.dispatcher.active_sessions(), 0);
    assert!(server.sink.finals().is_empty());

    server.shutdown.trigger();
    Ok(())
}

/// A malformed START opens nothing and the connection stays usable.
#[tokio::test]
async fn malformed_start_is_ignored() -> Result<()> {
    let server = start_receiver_server().await?;
    let mut client = WsClient::connect(&server.url, Duration::from_secs(5)).await?;

    client
        .send_text("__BENCHMARK_START__:abc".to_string())
        .await?;
    client.send_text("__BENCHMARK_END__".to_string()).await?;
    let sink = MemorySink::new();
    let summary = run_count_burst(&mut client, 5, &sink).await;
    assert!(summary.completed);

    assert!(wait_for(|| server.sink.finals().len() == 1).await);
    assert_eq!(server.sink.finals()[0].total_count, 5);

    client.close().await;
    server.shutdown.trigger();
    Ok(())
}

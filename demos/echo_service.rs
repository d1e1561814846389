//! Echo service example
//!
//! Starts an in-process broker, a small service that answers every request
//! with the standard reply envelope, and a messenger that invokes it a few
//! times.
//!
//! Run with: RUST_LOG=cloud_messenger=debug cargo run --example echo_service

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use cloud_messenger::{
    //
    Channel,
    ConnectionContext,
    JsonSerializer,
    MemoryHub,
    Messenger,
    QueueSpec,
    TransportKind,
};

const REQUESTS: &str = "echo.requests";

/// Answer `count` requests on `reply_queue`.
async fn serve(kind: TransportKind, ctx: ConnectionContext, reply_queue: String, count: usize) -> Result<()> {
    // ---
    let mut channel = Channel::new("echo-service", &ctx, &kind)?;
    channel
        .start(None, Some(QueueSpec::new(REQUESTS)), 3, Duration::from_millis(100))
        .await?;
    let reply_to = QueueSpec::new(reply_queue);

    for _ in 0..count {
        let mut request = None;
        let mut store = |body: Bytes| -> cloud_messenger::Result<()> {
            request = Some(body);
            Ok(())
        };
        channel.consume(Some(&mut store), ctx.timeout(), 1).await?;

        let Some(body) = request else { break };
        let doc: Value = serde_json::from_slice(&body)?;
        let reply = json!({"calls": [{"count": 1, "data": {"echo": doc}}]});
        channel.publish(reply.to_string().as_bytes(), Some(&reply_to), false).await?;
    }

    channel.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ctx = ConnectionContext::builder()
        .host("localhost")
        .virtual_host("/")
        .user("guest")
        .password("guest")
        .request_queue(REQUESTS)
        .timeout(Duration::from_secs(5))
        .build()?;

    let hub = MemoryHub::new();
    let kind = TransportKind::Memory(hub);

    // ---
    // Start the client first so its private reply queue exists
    let mut messenger = Messenger::start_with(ctx.clone(), kind.clone(), JsonSerializer, None, None).await?;
    let reply_queue = messenger
        .subscribe_queue_name()
        .unwrap_or_default()
        .to_string();
    println!("replies arrive on {reply_queue}");

    let service = tokio::spawn(serve(kind, ctx, reply_queue, 3));

    // ---
    // Invoke the service
    for i in 1..=3 {
        let data = messenger
            .invoke_service(&json!({"n": i}), Duration::ZERO)
            .await?;
        println!("request {i} -> {}", data.unwrap_or(Value::Null));
    }

    service.await??;
    messenger.stop().await;
    Ok(())
}

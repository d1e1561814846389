// tests/common/mod.rs

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::task::JoinHandle;

use cloud_messenger::{
    //
    Channel,
    ConnectionContext,
    MemoryHub,
    QueueSpec,
    Result,
    TransportKind,
};

pub const REQUESTS: &str = "requests";

pub fn context() -> ConnectionContext {
    ConnectionContext::builder()
        .host("localhost")
        .virtual_host("/")
        .user("guest")
        .password("guest")
        .request_queue(REQUESTS)
        .timeout(Duration::from_secs(2))
        .build()
        .expect("valid test context")
}

pub fn memory(hub: &Arc<MemoryHub>) -> TransportKind {
    TransportKind::Memory(hub.clone())
}

/// Serve `count` requests from `REQUESTS`, answering each on `reply_queue`.
///
/// Returns the decoded requests in arrival order.
pub fn spawn_responder<F>(
    hub: &Arc<MemoryHub>,
    reply_queue: &str,
    count: usize,
    respond: F,
) -> JoinHandle<Result<Vec<Value>>>
where
    F: Fn(&Value) -> Bytes + Send + 'static,
{
    // ---
    let kind = memory(hub);
    let reply_to = QueueSpec::new(reply_queue);

    tokio::spawn(async move {
        let mut channel = Channel::new("responder", &context(), &kind)?;
        channel
            .start(None, Some(QueueSpec::new(REQUESTS)), 1, Duration::ZERO)
            .await?;

        let mut seen = Vec::new();
        while seen.len() < count {
            let mut body = None;
            let mut store = |b: Bytes| -> Result<()> {
                body = Some(b);
                Ok(())
            };

            let n = channel
                .consume(Some(&mut store), Duration::from_secs(5), 1)
                .await?;
            let Some(request) = body.filter(|_| n == 1) else {
                break;
            };

            let doc: Value = serde_json::from_slice(&request)?;
            channel.publish(&respond(&doc), Some(&reply_to), false).await?;
            seen.push(doc);
        }

        channel.close().await;
        Ok(seen)
    })
}

/// Reply with `{"calls": [{"count": 1, "data": <request>}]}`.
pub fn echo(request: &Value) -> Bytes {
    let reply = serde_json::json!({"calls": [{"count": 1, "data": request}]});
    Bytes::from(reply.to_string())
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// tests/messenger.rs

mod common;

use std::time::Duration;

use bytes::Bytes;
use serde_json::{json, Value};

use cloud_messenger::{
    //
    Base64Serializer,
    ConnectionContext,
    Error,
    JsonSerializer,
    MemoryHub,
    Messenger,
    Notification,
    Serializer,
    TaggedSerializer,
};

use common::{context, echo, init_logging, memory, spawn_responder, REQUESTS};

async fn messenger(hub: &std::sync::Arc<MemoryHub>) -> Messenger {
    Messenger::start_with(context(), memory(hub), JsonSerializer, None, None)
        .await
        .unwrap()
}

fn reply(doc: Value) -> impl Fn(&Value) -> Bytes + Send + 'static {
    move |_| Bytes::from(doc.to_string())
}

async fn invoke_with_reply(doc: Value) -> cloud_messenger::Result<Option<Value>> {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let responder = spawn_responder(&hub, m.subscribe_queue_name().unwrap(), 1, reply(doc));

    let result = m.invoke_service(&json!({"op": "info"}), Duration::ZERO).await;
    responder.await.unwrap().unwrap();
    m.stop().await;
    result
}

#[tokio::test]
async fn test_defaults_from_context() {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;

    assert!(hub.queue_exists(REQUESTS));
    assert!(m.subscribe_queue_name().unwrap().starts_with("amq.gen-"));
    assert_eq!(m.timeout(), Duration::from_secs(2));
    m.stop().await;
}

#[tokio::test]
async fn test_missing_publish_queue() {
    // ---
    let ctx = ConnectionContext::builder()
        .host("localhost")
        .virtual_host("/")
        .user("guest")
        .password("guest")
        .build()
        .unwrap();

    let hub = MemoryHub::new();
    let result = Messenger::start_with(ctx, memory(&hub), JsonSerializer, None, None).await;
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_data_returned() {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let responder = spawn_responder(&hub, m.subscribe_queue_name().unwrap(), 1, echo);

    let data = m
        .invoke_service(&json!({"task": "demo"}), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(data, Some(json!({"task": "demo"})));
    assert_eq!(responder.await.unwrap().unwrap(), vec![json!({"task": "demo"})]);
    m.stop().await;
}

#[tokio::test]
async fn test_zero_count_is_none() {
    // ---
    let result = invoke_with_reply(json!({"calls": [{"count": 0}]})).await;
    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn test_remote_error() {
    // ---
    match invoke_with_reply(json!({"error": "boom"})).await {
        Err(Error::Remote(msg)) => assert_eq!(msg, "boom"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_reply_without_calls() {
    // ---
    let result = invoke_with_reply(json!({"status": "ok"})).await;
    assert!(matches!(result, Err(Error::MalformedResponse(_))));
}

#[tokio::test]
async fn test_empty_reply() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let responder = spawn_responder(&hub, m.subscribe_queue_name().unwrap(), 1, |_| Bytes::new());

    let result = m.invoke_service(&json!({}), Duration::ZERO).await;
    assert!(matches!(result, Err(Error::MalformedResponse(_))));

    responder.await.unwrap().unwrap();
    m.stop().await;
}

#[tokio::test]
async fn test_invoke_timeout() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;

    let result = m
        .invoke_service(&json!({}), Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(Error::TimedOut)));
    m.stop().await;
}

#[tokio::test]
async fn test_unsolicited_notification() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let queue = m.subscribe_queue_name().unwrap().to_string();

    let event = json!({"type": Notification::ParticipantLeft, "participant": "p1"});
    assert!(hub.inject(&queue, event.to_string()));

    let received = m.receive(Duration::from_millis(200)).await.unwrap();
    let tag: Notification = serde_json::from_value(received["type"].clone()).unwrap();
    assert_eq!(tag, Notification::ParticipantLeft);
    m.stop().await;
}

#[tokio::test]
async fn test_send_to_named_queue() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;

    m.send(&json!({"hello": 1}), None).await.unwrap();
    assert_eq!(hub.message_count(REQUESTS), Some(1));

    // unroutable: nobody declared it
    m.send(&json!({"hello": 2}), Some("nowhere")).await.unwrap();
    assert!(!hub.queue_exists("nowhere"));
    m.stop().await;
}

#[tokio::test]
async fn test_tagged_codec_end_to_end() {
    // ---
    let hub = MemoryHub::new();
    let codec = TaggedSerializer::new(Base64Serializer);
    let mut m = Messenger::start_with(context(), memory(&hub), codec.clone(), None, None)
        .await
        .unwrap();

    let reply = codec
        .serialize(&json!({"calls": [{"count": 1, "data": "ok"}]}))
        .unwrap();
    let responder = spawn_responder_raw(&hub, m.subscribe_queue_name().unwrap(), reply);

    let data = m.invoke_service(&json!({"q": 1}), Duration::ZERO).await.unwrap();
    assert_eq!(data, Some(json!("ok")));

    responder.await.unwrap();
    m.stop().await;
}

/// Answer one request with fixed bytes, without decoding the request.
fn spawn_responder_raw(
    hub: &std::sync::Arc<MemoryHub>,
    reply_queue: &str,
    reply: Bytes,
) -> tokio::task::JoinHandle<()> {
    // ---
    let hub = hub.clone();
    let reply_queue = reply_queue.to_string();

    tokio::spawn(async move {
        for _ in 0..200 {
            if hub.message_count(REQUESTS) == Some(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(hub.inject(&reply_queue, reply));
    })
}

#[tokio::test]
async fn test_drop_closes_channels() {
    // ---
    let hub = MemoryHub::new();
    let queue = {
        let m = messenger(&hub).await;
        m.subscribe_queue_name().unwrap().to_string()
    };

    for _ in 0..100 {
        if !hub.queue_exists(&queue) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!hub.queue_exists(&queue));
}

#[cfg(feature = "upload")]
#[tokio::test]
async fn test_dispatch_null_artifact_is_local() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;

    let out = m
        .dispatch_artifact(&json!({"op": "upload"}), None, |_| json!({}))
        .await
        .unwrap();
    assert_eq!(out, json!({}));
    assert_eq!(hub.message_count(REQUESTS), Some(0));
    m.stop().await;
}

#[cfg(feature = "upload")]
#[tokio::test]
async fn test_dispatch_rejects_target_without_key() {
    // ---
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let target = json!({"calls": [{"count": 1, "data": {"url": "http://127.0.0.1:9/", "fields": {}}}]});
    let responder = spawn_responder(&hub, m.subscribe_queue_name().unwrap(), 1, reply(target));

    let result = m
        .dispatch_artifact(&json!({"op": "upload"}), Some(&json!({"w": [1]})), |key| {
            json!({"op": "download", "key": key})
        })
        .await;

    match result {
        Err(Error::MalformedResponse(msg)) => assert_eq!(msg, "Malformed URL"),
        other => panic!("unexpected: {other:?}"),
    }
    responder.await.unwrap().unwrap();
    m.stop().await;
}

/// Minimal HTTP endpoint: answers one request with `status` and hands back
/// the raw request text.
#[cfg(feature = "upload")]
async fn http_stub(status: u16) -> (String, tokio::task::JoinHandle<String>) {
    // ---
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/upload", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];

        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&raw);
            let closing = text
                .split("boundary=")
                .nth(1)
                .and_then(|rest| rest.split("\r\n").next())
                .map(|boundary| format!("--{boundary}--"));
            if closing.is_some_and(|end| text.contains(&end)) {
                break;
            }
        }

        let response = format!("HTTP/1.1 {status} Stub\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();

        String::from_utf8_lossy(&raw).into_owned()
    });

    (url, handle)
}

#[cfg(feature = "upload")]
#[tokio::test]
async fn test_upload_rejected_status() {
    // ---
    let (url, server) = http_stub(500).await;
    let target = cloud_messenger::UploadTarget {
        url,
        fields: vec![("key".into(), "models/1".into())],
    };

    let err = cloud_messenger::BlobUploader::new()
        .upload(&target, &json!({"w": [1, 2]}))
        .await
        .unwrap_err();

    match err {
        Error::Upload(msg) => assert_eq!(msg, "Upload Error: 500"),
        other => panic!("unexpected: {other:?}"),
    }
    server.await.unwrap();
}

#[cfg(feature = "upload")]
#[tokio::test]
async fn test_dispatch_uploads_then_fetches_download_url() {
    // ---
    init_logging();
    let hub = MemoryHub::new();
    let mut m = messenger(&hub).await;
    let (url, server) = http_stub(204).await;

    let target = json!({"url": url, "fields": {"key": "models/7", "policy": "p"}});
    let responder = spawn_responder(&hub, m.subscribe_queue_name().unwrap(), 2, move |request| {
        let data = match request["op"].as_str() {
            Some("upload") => target.clone(),
            _ => json!(format!("https://blobs.example.com/{}", request["key"].as_str().unwrap_or(""))),
        };
        Bytes::from(json!({"calls": [{"count": 1, "data": data}]}).to_string())
    });

    let out = m
        .dispatch_artifact(&json!({"op": "upload"}), Some(&json!({"weights": [0.5]})), |key| {
            json!({"op": "download", "key": key})
        })
        .await
        .unwrap();

    assert_eq!(out, json!({"url": "https://blobs.example.com/models/7"}));

    let requests = responder.await.unwrap().unwrap();
    assert_eq!(requests[1], json!({"op": "download", "key": "models/7"}));

    let posted = server.await.unwrap();
    assert!(posted.starts_with("POST /upload"));
    assert!(posted.contains("name=\"key\""));
    assert!(posted.contains("models/7"));
    assert!(posted.contains("name=\"file\""));
    assert!(posted.contains(r#"{"weights":[0.5]}"#));
    m.stop().await;
}

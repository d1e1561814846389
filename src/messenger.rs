// src/messenger.rs

//! Protocol façade.
//!
//! [`Messenger`] owns a [`DualClient`] and a [`Serializer`]. Callers work
//! with JSON documents; the messenger serializes requests, runs the
//! request/reply exchange, and validates the reply envelope:
//!
//! | Reply                                   | Result                          |
//! |-----------------------------------------|---------------------------------|
//! | empty body                              | `Err(MalformedResponse)`        |
//! | `{"error": e}`                          | `Err(Remote(e))`                |
//! | no `calls`, or `calls: []`              | `Err(MalformedResponse)`        |
//! | `{"calls": [{"count": 0, ..}]}`         | `Ok(None)`                      |
//! | `{"calls": [{"count": n, "data": d}]}`  | `Ok(Some(d))`                   |
//!
//! A zero timeout passed to any method means the context timeout.

use std::time::Duration;

use serde_json::Value;

use crate::{
    // ---
    log_debug,
    log_info,
    ConnectionContext,
    DualClient,
    Error,
    JsonSerializer,
    QueueSpec,
    ReplyEnvelope,
    Result,
    Serializer,
    TransportKind,
};

#[cfg(feature = "upload")]
use crate::{BlobUploader, UploadTarget};

/// Request/reply client speaking JSON documents.
///
/// Dropping a started messenger closes its channels in the background on the
/// current tokio runtime; call [`stop`](Self::stop) to close them before
/// continuing.
pub struct Messenger<S: Serializer = JsonSerializer> {
    // ---
    client: DualClient,
    serializer: S,
    timeout: Duration,
    #[cfg(feature = "upload")]
    uploader: BlobUploader,
}

impl Messenger<JsonSerializer> {
    /// Connect to the AMQP broker with the JSON codec.
    ///
    /// `publish_queue` defaults to the context's request queue;
    /// `subscribe_queue` defaults to a private broker-named reply queue.
    pub async fn start(
        context: ConnectionContext,
        publish_queue: Option<&str>,
        subscribe_queue: Option<&str>,
    ) -> Result<Self> {
        Self::start_with(context, TransportKind::Amqp, JsonSerializer, publish_queue, subscribe_queue)
            .await
    }
}

impl<S: Serializer> Messenger<S> {
    /// Connect over `kind` with the given codec.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when no publish queue is given and the
    /// context has no request queue; connection and declaration errors from
    /// the underlying channels.
    pub async fn start_with(
        context: ConnectionContext,
        kind: TransportKind,
        serializer: S,
        publish_queue: Option<&str>,
        subscribe_queue: Option<&str>,
    ) -> Result<Self> {
        // ---
        let publish = publish_queue
            .or(context.request_queue())
            .map(QueueSpec::new)
            .filter(|q| !q.is_server_named())
            .ok_or_else(|| Error::Configuration("no publish queue configured".into()))?;

        let subscribe = subscribe_queue
            .map(QueueSpec::new)
            .filter(|q| !q.is_server_named())
            .unwrap_or_else(|| QueueSpec::server_named().exclusive(true));

        let timeout = context.timeout();
        let mut client = DualClient::with_transport(context, kind);

        if let Err(e) = Self::connect(&mut client, subscribe, publish).await {
            client.stop().await;
            return Err(e);
        }

        log_info!(
            "messenger ready, codec {}, replies on {}",
            serializer.name(),
            client.subscribe_queue_name().unwrap_or_default()
        );

        Ok(Self {
            client,
            serializer,
            timeout,
            #[cfg(feature = "upload")]
            uploader: BlobUploader::new(),
        })
    }

    async fn connect(client: &mut DualClient, subscribe: QueueSpec, publish: QueueSpec) -> Result<()> {
        client.start_subscriber(subscribe).await?;
        client.start_publisher(publish).await
    }

    /// Replace the HTTP uploader used by [`dispatch_artifact`](Self::dispatch_artifact).
    #[cfg(feature = "upload")]
    pub fn with_uploader(mut self, uploader: BlobUploader) -> Self {
        self.uploader = uploader;
        self
    }

    /// Resolved reply queue name; services address replies here.
    pub fn subscribe_queue_name(&self) -> Option<&str> {
        self.client.subscribe_queue_name()
    }

    pub fn client(&self) -> &DualClient {
        &self.client
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Default wait used when a method is given a zero timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publish `message` without waiting for a reply.
    ///
    /// `queue` overrides the default publish queue for this one message.
    pub async fn send(&mut self, message: &Value, queue: Option<&str>) -> Result<()> {
        // ---
        let payload = self.serializer.serialize(message)?;
        match queue {
            Some(name) => self.client.send_to(&payload, &QueueSpec::new(name)).await,
            None => self.client.send(&payload).await,
        }
    }

    /// Wait for one message on the reply queue.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if nothing arrives in time.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Value> {
        // ---
        let timeout = self.effective(timeout);
        let body = self.client.receive_one(timeout).await?;
        self.serializer.deserialize(&body)
    }

    /// Send `message` and return the validated result of the reply.
    pub async fn invoke_service(&mut self, message: &Value, timeout: Duration) -> Result<Option<Value>> {
        // ---
        let timeout = self.effective(timeout);
        let payload = self.serializer.serialize(message)?;
        let reply = self.client.invoke(&payload, timeout).await?;

        if reply.is_empty() {
            return Err(Error::MalformedResponse("Malformed object: None".into()));
        }

        let document = self.serializer.deserialize(&reply)?;
        ReplyEnvelope::parse(document)?.into_result()
    }

    /// Upload a large artifact out of band and return where to fetch it.
    ///
    /// 1. `upload_request` is invoked; its result must describe an
    ///    [`UploadTarget`] including a `key` field.
    /// 2. The artifact is POSTed to the target.
    /// 3. `download_request(key)` is invoked; its result is returned as
    ///    `{"url": <result>}`.
    ///
    /// A missing, null or empty artifact returns `{}` without any traffic.
    #[cfg(feature = "upload")]
    pub async fn dispatch_artifact<F>(
        &mut self,
        upload_request: &Value,
        artifact: Option<&Value>,
        download_request: F,
    ) -> Result<Value>
    where
        F: FnOnce(&str) -> Value + Send,
    {
        // ---
        let artifact = match artifact {
            Some(a) if !is_empty_document(a) => a,
            _ => return Ok(Value::Object(Default::default())),
        };

        let reply = self
            .invoke_service(upload_request, Duration::ZERO)
            .await?
            .ok_or_else(|| Error::MalformedResponse("Malformed object: None".into()))?;
        let target = UploadTarget::from_reply(&reply)?;

        self.uploader.upload(&target, artifact).await?;

        let download = self
            .invoke_service(&download_request(target.key()), Duration::ZERO)
            .await?;

        Ok(serde_json::json!({ "url": download }))
    }

    /// Close both channels. Never fails; safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.client.stop().await;
    }

    fn effective(&self, timeout: Duration) -> Duration {
        if timeout.is_zero() {
            self.timeout
        } else {
            timeout
        }
    }
}

#[cfg(feature = "upload")]
fn is_empty_document(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

impl<S: Serializer> Drop for Messenger<S> {
    fn drop(&mut self) {
        // ---
        if !self.client.is_started() {
            return;
        }

        let channels = self.client.take_channels();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for mut channel in channels {
                        channel.close().await;
                    }
                });
            }
            Err(_) => log_debug!("messenger dropped outside a runtime, channels not closed"),
        }
    }
}

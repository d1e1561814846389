// src/dual_client.rs

//! Publisher plus subscriber, with a synchronous invoke on top.

use std::time::Duration;

use bytes::Bytes;

use crate::retry::{DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::{
    // ---
    log_debug,
    log_info,
    Channel,
    ConnectionContext,
    Error,
    QueueSpec,
    Result,
    TransportKind,
};

/// Two channels on two connections: one publishing requests, one consuming
/// replies.
///
/// [`invoke`](Self::invoke) publishes a request and then waits for exactly
/// one message on the reply queue. There are no correlation IDs: the reply is
/// whatever arrives next on the (normally private) reply queue. `invoke`
/// takes `&mut self`, so two invokes can never be in flight on the same
/// client; callers that need concurrency create several clients.
///
/// # Example
///
/// ```
/// use cloud_messenger::{ConnectionContext, DualClient, MemoryHub, QueueSpec, TransportKind};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cloud_messenger::Result<()> {
/// let ctx = ConnectionContext::builder()
///     .host("localhost").virtual_host("/").user("guest").password("guest")
///     .build()?;
/// let hub = MemoryHub::new();
///
/// let mut client = DualClient::with_transport(ctx, TransportKind::Memory(hub));
/// client.start_subscriber(QueueSpec::server_named().exclusive(true)).await?;
/// client.start_publisher(QueueSpec::new("requests")).await?;
///
/// // nobody answers
/// let err = client.invoke(b"ping", Duration::from_millis(20)).await.unwrap_err();
/// assert!(matches!(err, cloud_messenger::Error::TimedOut));
///
/// client.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct DualClient {
    // ---
    context: ConnectionContext,
    kind: TransportKind,
    publisher: Option<Channel>,
    subscriber: Option<Channel>,
    last_reply: Option<Bytes>,
}

impl DualClient {
    /// A client that talks to the AMQP broker described by `context`.
    pub fn new(context: ConnectionContext) -> Self {
        Self::with_transport(context, TransportKind::Amqp)
    }

    /// A client over the given transport kind.
    pub fn with_transport(context: ConnectionContext, kind: TransportKind) -> Self {
        // ---
        Self {
            context,
            kind,
            publisher: None,
            subscriber: None,
            last_reply: None,
        }
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    /// Connect the subscribing channel and declare `queue` on it.
    pub async fn start_subscriber(&mut self, queue: QueueSpec) -> Result<()> {
        // ---
        let mut channel = Channel::new("subscriber", &self.context, &self.kind)?;
        channel
            .start(None, Some(queue), DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY)
            .await?;
        self.subscriber = Some(channel);
        Ok(())
    }

    /// Connect the publishing channel and declare `queue` on it.
    pub async fn start_publisher(&mut self, queue: QueueSpec) -> Result<()> {
        // ---
        let mut channel = Channel::new("publisher", &self.context, &self.kind)?;
        channel
            .start(Some(queue), None, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY)
            .await?;
        self.publisher = Some(channel);
        Ok(())
    }

    /// Resolved name of the reply queue, once the subscriber is started.
    pub fn subscribe_queue_name(&self) -> Option<&str> {
        self.subscriber
            .as_ref()
            .and_then(Channel::subscribe_queue)
            .map(|q| q.name.as_str())
    }

    pub fn publisher(&self) -> Option<&Channel> {
        self.publisher.as_ref()
    }

    pub fn subscriber(&self) -> Option<&Channel> {
        self.subscriber.as_ref()
    }

    /// Publish to the bound publish queue without waiting for a reply.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        publisher(&mut self.publisher)?
            .publish(payload, None, false)
            .await
    }

    /// Publish to an explicit queue without waiting for a reply.
    pub async fn send_to(&mut self, payload: &[u8], queue: &QueueSpec) -> Result<()> {
        publisher(&mut self.publisher)?
            .publish(payload, Some(queue), false)
            .await
    }

    /// Consume from the reply queue; see [`Channel::consume`].
    pub async fn receive(
        &mut self,
        handler: Option<crate::channel::Handler<'_>>,
        timeout: Duration,
        max_messages: usize,
    ) -> Result<usize> {
        subscriber(&mut self.subscriber)?
            .consume(handler, timeout, max_messages)
            .await
    }

    /// Wait for one message on the reply queue.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if nothing arrives within `timeout`.
    pub async fn receive_one(&mut self, timeout: Duration) -> Result<Bytes> {
        // ---
        self.last_reply = None;
        self.await_reply(timeout).await
    }

    /// Publish `payload` and wait for one reply.
    ///
    /// The reply slot is cleared first, so a reply left over from an earlier
    /// call is never returned. `timeout` bounds the wait for the reply.
    ///
    /// # Errors
    ///
    /// [`Error::TimedOut`] if no reply arrives within `timeout`; publishing
    /// and consuming errors are passed through.
    pub async fn invoke(&mut self, payload: &[u8], timeout: Duration) -> Result<Bytes> {
        // ---
        self.last_reply = None;

        log_info!("sending request ({} bytes)", payload.len());
        self.send(payload).await?;

        log_info!("waiting for reply...");
        self.await_reply(timeout).await
    }

    async fn await_reply(&mut self, timeout: Duration) -> Result<Bytes> {
        // ---
        let slot = &mut self.last_reply;
        let mut store = |body: Bytes| -> Result<()> {
            *slot = Some(body);
            Ok(())
        };

        let received = subscriber(&mut self.subscriber)?
            .consume(Some(&mut store), timeout, 1)
            .await?;

        if received == 0 {
            log_debug!("no reply within {timeout:?}");
            return Err(Error::TimedOut);
        }

        self.last_reply.take().ok_or(Error::TimedOut)
    }

    /// Close both channels. Never fails; safe to call repeatedly.
    pub async fn stop(&mut self) {
        // ---
        if let Some(mut channel) = self.subscriber.take() {
            channel.close().await;
        }
        if let Some(mut channel) = self.publisher.take() {
            channel.close().await;
        }
    }

    /// Whether any channel is still held, i.e. `stop()` has work to do.
    pub(crate) fn is_started(&self) -> bool {
        self.publisher.is_some() || self.subscriber.is_some()
    }

    /// Hand the channels over for closing elsewhere.
    pub(crate) fn take_channels(&mut self) -> Vec<Channel> {
        self.subscriber
            .take()
            .into_iter()
            .chain(self.publisher.take())
            .collect()
    }
}

fn publisher(slot: &mut Option<Channel>) -> Result<&mut Channel> {
    slot.as_mut()
        .ok_or_else(|| Error::Broker("publisher not started".into()))
}

fn subscriber(slot: &mut Option<Channel>) -> Result<&mut Channel> {
    slot.as_mut()
        .ok_or_else(|| Error::Broker("subscriber not started".into()))
}

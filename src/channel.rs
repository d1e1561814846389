// src/channel.rs

//! One broker connection with one channel on it.
//!
//! A [`Channel`] binds at most one publish queue and one subscribe queue,
//! connects under a [`RetryConfig`], and offers the three operations the
//! rest of the crate is built from: declare, publish, and a bounded consume
//! loop. Broker specifics live behind the [`Transport`](crate::Transport)
//! trait.
//!
//! # Consume loop
//!
//! ```text
//! start consumer
//! loop:
//!     wait up to `timeout` for a delivery      -> none: stop (not an error)
//!     ack, inbound_count += 1
//!     handler(payload)                         -> error: stop, propagate
//!     no handler and no cap                    -> stop after one message
//!     count == max_messages                    -> stop
//! cancel consumer
//! ```
//!
//! Messages are acknowledged *before* the handler runs, so a handler that
//! fails does not get the message redelivered.

use std::time::Duration;

use bytes::Bytes;

use crate::retry::Backoff;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    transport,
    ConnectionContext,
    Error,
    QueueSpec,
    Result,
    RetryConfig,
    TransportBox,
    TransportKind,
};

/// Callback invoked with each consumed message body.
pub type Handler<'a> = &'a mut (dyn FnMut(Bytes) -> Result<()> + Send);

/// A connected (or connectable) broker channel.
///
/// # Example
///
/// ```no_run
/// use cloud_messenger::{Channel, ConnectionContext, QueueSpec, TransportKind};
/// use std::time::Duration;
///
/// # async fn example(ctx: ConnectionContext) -> cloud_messenger::Result<()> {
/// let mut channel = Channel::new("worker", &ctx, &TransportKind::Amqp)?;
/// channel
///     .start(None, Some(QueueSpec::new("jobs")), 10, Duration::from_secs(1))
///     .await?;
///
/// let processed = channel.consume(None, Duration::from_secs(30), 0).await?;
/// channel.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Channel {
    // ---
    transport: TransportBox,
    publish_queue: Option<QueueSpec>,
    subscribe_queue: Option<QueueSpec>,
    inbound_count: u64,
    outbound_count: u64,
}

impl Channel {
    /// Create an unconnected channel over a transport of the given kind.
    pub fn new(channel_id: &str, context: &ConnectionContext, kind: &TransportKind) -> Result<Self> {
        let transport = transport::create_transport(channel_id, context, kind)?;
        Ok(Self::from_transport(transport))
    }

    /// Wrap an existing transport.
    pub fn from_transport(transport: TransportBox) -> Self {
        // ---
        Self {
            transport,
            publish_queue: None,
            subscribe_queue: None,
            inbound_count: 0,
            outbound_count: 0,
        }
    }

    /// Bind the queues and connect.
    ///
    /// The subscribe queue name is trimmed; an empty name asks the broker to
    /// generate one, readable afterwards through [`subscribe_queue`](Self::subscribe_queue).
    pub async fn start(
        &mut self,
        publish: Option<QueueSpec>,
        subscribe: Option<QueueSpec>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<()> {
        // ---
        if let Some(queue) = publish {
            self.publish_queue = Some(queue);
        }

        if let Some(mut queue) = subscribe {
            queue.name = queue.name.trim().to_string();
            self.subscribe_queue = Some(queue);
        }

        self.connect(&RetryConfig::fixed(attempts, retry_delay)).await
    }

    /// Open the connection, then declare the bound queues.
    ///
    /// Connection failures are retried according to `retry`; once attempts
    /// are exhausted the result is [`Error::Connection`]. Errors that are not
    /// retryable (a CA certificate that cannot be read, for example) are
    /// returned immediately. After connecting, the subscribe queue's
    /// prefetch count is applied to the channel.
    pub async fn connect(&mut self, retry: &RetryConfig) -> Result<()> {
        // ---
        let mut backoff = Backoff::new(retry);

        loop {
            log_debug!(
                "[{}] connect attempt {}/{}",
                self.transport.transport_id(),
                backoff.failures() + 1,
                retry.total_attempts()
            );

            let err = match self.transport.open().await {
                Ok(()) => break,
                Err(err) => err,
            };

            if !backoff.wait(&err).await {
                if !err.is_retryable() {
                    return Err(err);
                }
                let msg = format!(
                    "giving up after {} attempts: {err}",
                    backoff.failures()
                );
                log_error!("[{}] {msg}", self.transport.transport_id());
                return Err(Error::Connection(msg));
            }
        }

        log_info!("[{}] connected", self.transport.transport_id());

        if let Err(e) = self.declare_bound().await {
            log_error!("[{}] setup failed, closing: {e}", self.transport.transport_id());
            self.close().await;
            return Err(e);
        }

        Ok(())
    }

    async fn declare_bound(&mut self) -> Result<()> {
        // ---
        if let Some(queue) = self.publish_queue.clone() {
            self.publish_queue = Some(self.declare(&queue).await?);
        }

        if let Some(queue) = self.subscribe_queue.clone() {
            let declared = self.declare(&queue).await?;
            self.transport.set_prefetch(declared.prefetch_count).await?;
            self.subscribe_queue = Some(declared);
        }

        Ok(())
    }

    /// Declare `queue` and return it with the broker-resolved name.
    ///
    /// Re-declaring an existing queue with the same flags is a no-op. When
    /// `queue.purge` is set, ready messages are dropped right after the
    /// declaration.
    ///
    /// # Errors
    ///
    /// [`Error::Broker`] if the broker rejects the declaration. Some brokers
    /// accept a declaration the user has no read permission for and only
    /// refuse the first consume; such failures surface from
    /// [`consume`](Self::consume), not here.
    pub async fn declare(&mut self, queue: &QueueSpec) -> Result<QueueSpec> {
        // ---
        self.ensure_connected()?;

        let name = self.transport.declare_queue(queue).await?;
        log_info!("[{}] declared queue {name}", self.transport.transport_id());

        if queue.purge {
            let purged = self.transport.purge_queue(&name).await?;
            log_debug!("[{}] purged {purged} messages from {name}", self.transport.transport_id());
        }

        Ok(QueueSpec {
            name,
            ..queue.clone()
        })
    }

    /// Publish `payload` to `target`, or to the bound publish queue.
    ///
    /// Uses the default exchange with the queue name as routing key.
    /// `persistent` selects delivery mode 2.
    pub async fn publish(
        &mut self,
        payload: &[u8],
        target: Option<&QueueSpec>,
        persistent: bool,
    ) -> Result<()> {
        // ---
        self.ensure_connected()?;

        let queue = target
            .or(self.publish_queue.as_ref())
            .map(|q| q.name.clone())
            .ok_or_else(|| Error::Broker("no publish queue bound".into()))?;

        self.transport.publish(&queue, payload, persistent).await?;
        self.outbound_count += 1;

        log_debug!(
            "[{}] published {} bytes to {queue}",
            self.transport.transport_id(),
            payload.len()
        );
        Ok(())
    }

    /// Consume from the bound subscribe queue and return how many messages
    /// were processed.
    ///
    /// `timeout` is an inactivity timeout: the loop ends when no delivery
    /// arrives within that window, and returns the count so far (possibly
    /// zero). A `max_messages` of 0 means no cap. Without a handler and
    /// without a cap, the loop stops after the first message.
    ///
    /// The consumer is cancelled before returning, on every path.
    pub async fn consume(
        &mut self,
        handler: Option<Handler<'_>>,
        timeout: Duration,
        max_messages: usize,
    ) -> Result<usize> {
        // ---
        self.ensure_connected()?;

        let queue = self
            .subscribe_queue
            .as_ref()
            .ok_or_else(|| Error::Broker("no subscribe queue bound".into()))?;

        self.transport
            .start_consumer(&queue.name, queue.exclusive)
            .await?;

        let outcome = self.consume_loop(handler, timeout, max_messages).await;

        if let Err(e) = self.transport.cancel_consumer().await {
            log_debug!("[{}] cancel consumer failed: {e}", self.transport.transport_id());
        }

        outcome
    }

    async fn consume_loop(
        &mut self,
        mut handler: Option<Handler<'_>>,
        timeout: Duration,
        max_messages: usize,
    ) -> Result<usize> {
        // ---
        let mut processed = 0;

        loop {
            let delivery = match tokio::time::timeout(timeout, self.transport.next_delivery()).await {
                Ok(Ok(Some(delivery))) => delivery,
                Ok(Ok(None)) => {
                    log_debug!("[{}] consumer ended", self.transport.transport_id());
                    break;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    log_debug!(
                        "[{}] no message within {timeout:?}, {processed} processed",
                        self.transport.transport_id()
                    );
                    break;
                }
            };

            self.transport.ack(delivery.delivery_tag).await?;
            processed += 1;
            self.inbound_count += 1;

            log_debug!(
                "[{}] received {} bytes (tag {})",
                self.transport.transport_id(),
                delivery.payload.len(),
                delivery.delivery_tag
            );

            match handler.as_mut() {
                Some(handle) => handle(delivery.payload)?,
                None if max_messages == 0 => break,
                None => {}
            }

            if processed == max_messages {
                break;
            }
        }

        Ok(processed)
    }

    /// Cancel any consumer and close the channel and connection.
    ///
    /// Failures are logged and swallowed; safe to call repeatedly.
    pub async fn close(&mut self) {
        // ---
        if let Err(e) = self.transport.cancel_consumer().await {
            log_debug!("[{}] cancel on close failed: {e}", self.transport.transport_id());
        }
        if let Err(e) = self.transport.close().await {
            log_debug!("[{}] close failed: {e}", self.transport.transport_id());
        }
    }

    pub fn inbound_count(&self) -> u64 {
        self.inbound_count
    }

    pub fn outbound_count(&self) -> u64 {
        self.outbound_count
    }

    pub fn publish_queue(&self) -> Option<&QueueSpec> {
        self.publish_queue.as_ref()
    }

    /// The subscribe queue, with its resolved name once connected.
    pub fn subscribe_queue(&self) -> Option<&QueueSpec> {
        self.subscribe_queue.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_open() {
            Ok(())
        } else {
            Err(Error::Broker(format!(
                "[{}] channel is not connected",
                self.transport.transport_id()
            )))
        }
    }
}

// src/transport/memory/transport.rs

//! In-memory transport implementation.
//!
//! This file contains the concrete implementation of the domain-level
//! `Transport` trait on top of a shared [`MemoryHub`].
//!
//! The memory transport is the **reference implementation** of transport
//! semantics. The AMQP transport is expected to behave the same way for
//! everything a `Channel` relies on.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use super::hub::{ConnectionId, MemoryHub, Pop};

use crate::{
    // ---
    log_debug,
    log_warn,
    Delivery,
    Error,
    QueueSpec,
    Result,
    Transport,
    TransportBox,
};

/// In-memory transport.
///
/// One instance models one broker connection with one channel on it.
///
/// ## Semantics
///
/// - Delivery tags are channel-scoped and start at 1.
/// - A delivery stays unacknowledged until `ack()`; cancelling the consumer
///   or closing the channel puts unacknowledged messages back at the head of
///   their queue.
/// - At most `prefetch` deliveries are outstanding at a time; a consumer at
///   its window waits for an ack like a real broker would.
/// - Closing releases every exclusive queue this connection declared.
struct MemoryTransport {
    // ---
    transport_id: String,
    hub: Arc<MemoryHub>,
    connection: Option<ConnectionId>,
    prefetch: u16,
    consumer: Option<String>,
    next_tag: u64,
    unacked: BTreeMap<u64, (String, Bytes)>,
}

impl MemoryTransport {
    fn connection(&self) -> Result<ConnectionId> {
        self.connection
            .ok_or_else(|| Error::Broker(format!("[{}] channel is not open", self.transport_id)))
    }

    fn track(&mut self, queue: &str, payload: Bytes) -> Delivery {
        // ---
        let delivery_tag = self.next_tag;
        self.next_tag += 1;
        self.unacked
            .insert(delivery_tag, (queue.to_string(), payload.clone()));

        Delivery {
            delivery_tag,
            payload,
        }
    }

    /// Return every unacknowledged delivery to its queue, oldest first.
    fn recover(&mut self) {
        // ---
        let pending = std::mem::take(&mut self.unacked);
        for (_, (queue, payload)) in pending.into_iter().rev() {
            self.hub.requeue(&queue, payload);
        }
    }

    fn window_full(&self) -> bool {
        self.prefetch > 0 && self.unacked.len() >= usize::from(self.prefetch)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        // ---
        if self.connection.is_none() {
            self.connection = Some(self.hub.connect()?);
            log_debug!("[{}] memory channel open", self.transport_id);
        }
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<String> {
        let conn = self.connection()?;
        self.hub.declare(conn, queue)
    }

    async fn purge_queue(&mut self, queue: &str) -> Result<u32> {
        self.connection()?;
        self.hub.purge(queue)
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<()> {
        self.connection()?;
        self.prefetch = count;
        Ok(())
    }

    async fn publish(&mut self, routing_key: &str, payload: &[u8], _persistent: bool) -> Result<()> {
        // ---
        self.connection()?;
        self.hub
            .enqueue(routing_key, Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn start_consumer(&mut self, queue: &str, _exclusive: bool) -> Result<()> {
        // ---
        let conn = self.connection()?;
        if self.consumer.is_some() {
            return Err(Error::Broker(format!(
                "[{}] a consumer is already active on this channel",
                self.transport_id
            )));
        }

        self.hub.add_consumer(conn, queue)?;
        self.consumer = Some(queue.to_string());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        // ---
        self.connection()?;
        let queue = self
            .consumer
            .clone()
            .ok_or_else(|| Error::Broker(format!("[{}] no active consumer", self.transport_id)))?;

        if self.window_full() {
            log_warn!(
                "[{}] prefetch window of {} is full, waiting for acks",
                self.transport_id,
                self.prefetch
            );
            std::future::pending::<()>().await;
        }

        loop {
            let notify = match self.hub.pop(&queue) {
                Pop::Message(payload) => return Ok(Some(self.track(&queue, payload))),
                Pop::Gone => return Ok(None),
                Pop::Empty(notify) => notify,
            };

            // Register interest before the second look so a publish or a
            // delete landing in between still wakes us.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.hub.pop(&queue) {
                Pop::Message(payload) => return Ok(Some(self.track(&queue, payload))),
                Pop::Gone => return Ok(None),
                Pop::Empty(_) => notified.await,
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        // ---
        self.connection()?;
        match self.unacked.remove(&delivery_tag) {
            Some(_) => Ok(()),
            None => Err(Error::Broker(format!(
                "PRECONDITION_FAILED - unknown delivery tag {delivery_tag}"
            ))),
        }
    }

    async fn cancel_consumer(&mut self) -> Result<()> {
        // ---
        if let Some(queue) = self.consumer.take() {
            self.recover();
            self.hub.remove_consumer(&queue);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // ---
        self.cancel_consumer().await?;
        self.recover();

        if let Some(conn) = self.connection.take() {
            self.hub.release(conn);
            log_debug!("[{}] memory channel closed", self.transport_id);
        }
        Ok(())
    }
}

/// Create a new in-memory transport attached to `hub`.
///
/// The transport starts closed; `open()` takes a connection from the hub.
pub fn create_transport(transport_id: &str, hub: Arc<MemoryHub>) -> TransportBox {
    // ---
    Box::new(MemoryTransport {
        transport_id: transport_id.to_string(),
        hub,
        connection: None,
        prefetch: 0,
        consumer: None,
        next_tag: 1,
        unacked: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;

    async fn open(hub: &Arc<MemoryHub>, id: &str) -> TransportBox {
        let mut transport = create_transport(id, hub.clone());
        transport.open().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_operations_require_open() {
        // ---
        let hub = MemoryHub::new();
        let mut transport = create_transport("closed", hub);

        let err = transport.publish("q", b"x", false).await.unwrap_err();
        assert!(matches!(err, Error::Broker(_)));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_delivery_waits_for_publish() {
        // ---
        let hub = MemoryHub::new();
        let mut consumer = open(&hub, "consumer").await;
        let mut producer = open(&hub, "producer").await;

        consumer.declare_queue(&QueueSpec::new("work")).await.unwrap();
        consumer.start_consumer("work", false).await.unwrap();

        let publish = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish("work", b"job", true).await.unwrap();
        };
        let (delivery, _) = tokio::join!(consumer.next_delivery(), publish);

        let delivery = delivery.unwrap().unwrap();
        assert_eq!(delivery.delivery_tag, 1);
        assert_eq!(&delivery.payload[..], b"job");
    }

    #[tokio::test]
    async fn test_unacked_requeued_on_cancel() {
        // ---
        let hub = MemoryHub::new();
        let mut transport = open(&hub, "t").await;

        transport.declare_queue(&QueueSpec::new("work")).await.unwrap();
        transport.publish("work", b"first", false).await.unwrap();
        transport.start_consumer("work", false).await.unwrap();

        let delivery = transport.next_delivery().await.unwrap().unwrap();
        assert_eq!(hub.message_count("work"), Some(0));

        transport.cancel_consumer().await.unwrap();
        assert_eq!(hub.message_count("work"), Some(1));

        let err = transport.ack(delivery.delivery_tag).await.unwrap_err();
        assert!(matches!(err, Error::Broker(_)));
    }

    #[tokio::test]
    async fn test_deleted_queue_ends_consumer() {
        // ---
        let hub = MemoryHub::new();
        let mut owner = open(&hub, "owner").await;
        let name = owner
            .declare_queue(&QueueSpec::server_named().exclusive(true))
            .await
            .unwrap();
        owner.start_consumer(&name, true).await.unwrap();

        let mut other = open(&hub, "other").await;
        assert!(other.start_consumer(&name, false).await.is_err());

        hub.release(1);
        assert_eq!(owner.next_delivery().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        // ---
        let hub = MemoryHub::new();
        let mut transport = open(&hub, "t").await;

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }
}

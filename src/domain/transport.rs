// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the broker primitives a [`Channel`](crate::Channel)
//! is built from: open a connection and channel, declare/purge a queue, set
//! the prefetch window, publish, consume, acknowledge, and shut down.
//!
//! Higher-level semantics (connect retries, message counters, the consume
//! loop with its inactivity timeout and stop conditions, and the invoke
//! protocol) live in `Channel` and `DualClient` and are written once against
//! this trait. Concrete implementations live under `src/transport/`:
//!
//! - `MemoryTransport` - in-process reference broker (always available)
//! - `LapinTransport` - AMQP 0-9-1 via `lapin` (feature `transport_lapin`)
//!
//! The trait is the single dynamic-dispatch seam for broker behaviour; the
//! concrete type is chosen at construction with [`TransportKind`](crate::TransportKind).
use bytes::Bytes;

use crate::{QueueSpec, Result};

/// One message handed out by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge the delivery.
    pub delivery_tag: u64,
    /// Opaque message body.
    pub payload: Bytes,
}

/// Broker transport abstraction.
///
/// A transport owns exactly one broker connection and one channel on it.
/// Every method takes `&mut self`: a transport is driven by a single caller
/// at a time, so no internal locking is required.
///
/// Implementations must ensure that:
/// - `open()` performs exactly one connection attempt and reports failure
///   as [`Error::Connection`](crate::Error::Connection); retries belong to
///   the caller.
/// - Operations on a transport that is not open fail with
///   [`Error::Broker`](crate::Error::Broker).
/// - `next_delivery()` is cancel-safe: dropping the returned future before
///   it completes must not lose a message.
/// - `close()` is safe to call repeatedly and on a transport that never
///   opened.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. This is an implementation detail; consumers
/// should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send {
    // ---
    /// Identifier used in log lines.
    fn transport_id(&self) -> &str;

    /// Whether the connection and channel are currently open.
    fn is_open(&self) -> bool;

    /// Open the connection and channel (single attempt).
    async fn open(&mut self) -> Result<()>;

    /// Declare a queue and return its resolved name.
    ///
    /// An empty `queue.name` asks the broker to generate one.
    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<String>;

    /// Drop all ready messages from a queue, returning how many were removed.
    async fn purge_queue(&mut self, queue: &str) -> Result<u32>;

    /// Limit the number of unacknowledged deliveries on this channel.
    async fn set_prefetch(&mut self, count: u16) -> Result<()>;

    /// Publish through the default exchange with `routing_key` = queue name.
    async fn publish(&mut self, routing_key: &str, payload: &[u8], persistent: bool)
        -> Result<()>;

    /// Register a consumer on `queue`.
    async fn start_consumer(&mut self, queue: &str, exclusive: bool) -> Result<()>;

    /// Wait for the next delivery on the active consumer.
    ///
    /// Returns `Ok(None)` when the broker ended the consumer (queue deleted,
    /// channel closed). Waits indefinitely otherwise; callers apply their
    /// own timeout.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery received on this channel.
    async fn ack(&mut self, delivery_tag: u64) -> Result<()>;

    /// Cancel the active consumer, if any.
    async fn cancel_consumer(&mut self) -> Result<()>;

    /// Close the channel, then the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Owned transport pointer.
///
/// Each [`Channel`](crate::Channel) exclusively owns its transport.
pub type TransportBox = Box<dyn Transport>;

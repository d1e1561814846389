//! Request/reply messaging over AMQP queues.
//!
//! A process publishes requests to a service queue and waits for the reply on
//! its own (normally private, broker-named) reply queue. The layers, leaf
//! first:
//!
//! - [`ConnectionContext`] - broker coordinates, from arguments, a builder, or
//!   a credentials file.
//! - [`Transport`] - broker primitives; [`TransportKind`] picks AMQP (`lapin`)
//!   or the in-process [`MemoryHub`].
//! - [`Channel`] - one connection: connect with retries, declare, publish,
//!   consume with an inactivity timeout.
//! - [`DualClient`] - a publishing and a subscribing channel with a
//!   single-flight [`invoke`](DualClient::invoke).
//! - [`Messenger`] - JSON documents in and out through a [`Serializer`],
//!   with reply-envelope validation.
//!
//! Replies are not correlated by ID: a reply is whatever arrives next on the
//! reply queue after the request was published. `invoke` takes `&mut self`,
//! so one client never has two requests outstanding.
//!
//! ```
//! use cloud_messenger::{ConnectionContext, DualClient, MemoryHub, QueueSpec, TransportKind};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> cloud_messenger::Result<()> {
//! let ctx = ConnectionContext::builder()
//!     .host("localhost").virtual_host("/").user("guest").password("guest")
//!     .build()?;
//! let hub = MemoryHub::new();
//!
//! let mut client = DualClient::with_transport(ctx, TransportKind::Memory(hub.clone()));
//! client.start_subscriber(QueueSpec::new("replies").purge(true)).await?;
//! client.start_publisher(QueueSpec::new("requests")).await?;
//!
//! client.send(b"hello").await?;
//! assert_eq!(hub.message_count("requests"), Some(1));
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod channel;
mod context;
mod domain;
mod dual_client;
mod envelope;
mod error;
mod messenger;
mod notification;
mod queue;
mod retry;
mod serializer;
mod transport;

pub mod credentials;

#[cfg(feature = "upload")]
mod upload;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use channel::{Channel, Handler};
pub use context::{ConnectionContext, ConnectionContextBuilder, DEFAULT_TIMEOUT, DEFAULT_TLS_PORT};
pub use dual_client::DualClient;
pub use envelope::{CallResult, ReplyEnvelope};
pub use error::{Error, Result};
pub use messenger::Messenger;
pub use notification::Notification;
pub use queue::QueueSpec;
pub use retry::{RetryConfig, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use serializer::{Base64Serializer, JsonSerializer, Serializer, TaggedSerializer};
pub use transport::{create_transport, MemoryHub, TransportKind};

#[cfg(feature = "upload")]
pub use upload::{BlobUploader, UploadTarget};

// --- public re-exports
pub use domain::{
    //
    Delivery,
    Transport,
    TransportBox,
};

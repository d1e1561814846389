//! AMQP transport implementation using `lapin`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! one AMQP 0-9-1 connection with a single channel on it.
//!
//! ## Concurrency model
//!
//! The transport is owned by exactly one [`Channel`](crate::Channel) and
//! driven through `&mut self`, so no actor task or locking is needed: each
//! trait method maps onto one or two awaited `lapin` calls. `lapin` runs its
//! own IO on background threads; dropping the transport without `close()`
//! leaves the broker to notice the dead socket.
//!
//! ## Connection behavior
//!
//! `open()` performs exactly one attempt, bounded by the context timeout:
//!
//! - the URI is assembled field by field from the
//!   [`ConnectionContext`](crate::ConnectionContext), so credentials and the
//!   virtual host need no percent-encoding;
//! - with TLS enabled the scheme is `amqps` and the CA certificate file, when
//!   configured, becomes the trusted chain;
//! - failures are logged at error level and returned as
//!   [`Error::Connection`](crate::Error::Connection) so the caller's retry
//!   policy applies.
//!
//! ## Message delivery semantics
//!
//! - Publishing goes through the default exchange with the queue name as
//!   routing key. Persistent messages use delivery mode 2.
//! - One consumer at a time. Deliveries are pulled from the `lapin::Consumer`
//!   stream, which buffers them, so a dropped `next_delivery()` future loses
//!   nothing.
//! - Cancelling the consumer also asks the broker to requeue deliveries that
//!   were pushed to the client but never handed out.

use std::time::Duration;

use futures_lite::stream::StreamExt;
use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicCancelOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        BasicQosOptions,
        BasicRecoverOptions,
        QueueDeclareOptions,
        QueuePurgeOptions,
    },
    tcp::OwnedTLSConfig,
    types::FieldTable,
    uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo},
    BasicProperties,
    Connection,
    ConnectionProperties,
    Consumer,
};

use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    ConnectionContext,
    Delivery,
    Error,
    QueueSpec,
    Result,
    Transport,
    TransportBox,
};

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;

/// Active consumer on the channel.
struct ActiveConsumer {
    tag: String,
    stream: Consumer,
}

/// AMQP transport implementation using lapin.
pub struct LapinTransport {
    // ---
    transport_id: String,
    context: ConnectionContext,
    connection: Option<Connection>,
    channel: Option<lapin::Channel>,
    consumer: Option<ActiveConsumer>,
}

impl LapinTransport {
    fn channel(&self) -> Result<&lapin::Channel> {
        self.channel
            .as_ref()
            .ok_or_else(|| Error::Broker(format!("[{}] channel is not open", self.transport_id)))
    }

    fn broker_error(&self, op: &str, e: lapin::Error) -> Error {
        // ---
        let msg = format!("[{}] amqp: {op} failed: {e}", self.transport_id);
        log_error!("{msg}");
        Error::Broker(msg)
    }
}

#[async_trait::async_trait]
impl Transport for LapinTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    fn is_open(&self) -> bool {
        let connected = self
            .connection
            .as_ref()
            .is_some_and(|c| c.status().connected());
        connected && self.channel.as_ref().is_some_and(|c| c.status().connected())
    }

    async fn open(&mut self) -> Result<()> {
        // ---
        if self.is_open() {
            return Ok(());
        }

        let ctx = &self.context;
        log_info!(
            "[{}] Connecting to AMQP broker {}:{} vhost {}",
            self.transport_id,
            ctx.host(),
            ctx.port(),
            ctx.virtual_host()
        );

        let uri = broker_uri(ctx);
        let tls = tls_config(ctx)?;
        let attempt = Connection::connect_uri_with_config(uri, ConnectionProperties::default(), tls);

        let connection = match tokio::time::timeout(ctx.timeout(), attempt).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                let msg = format!("amqp: connection failed: {e}");
                log_error!("[{}] {msg}", self.transport_id);
                return Err(Error::Connection(msg));
            }
            Err(_) => {
                let msg = format!("amqp: connection timed out after {:?}", ctx.timeout());
                log_error!("[{}] {msg}", self.transport_id);
                return Err(Error::Connection(msg));
            }
        };

        let channel = connection.create_channel().await.map_err(|e| {
            let msg = format!("amqp: channel creation failed: {e}");
            log_error!("[{}] {msg}", self.transport_id);
            Error::Connection(msg)
        })?;

        log_info!("[{}] Connected to AMQP broker", self.transport_id);

        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    async fn declare_queue(&mut self, queue: &QueueSpec) -> Result<String> {
        // ---
        let options = QueueDeclareOptions {
            passive: false,
            durable: queue.durable,
            exclusive: queue.exclusive,
            auto_delete: queue.auto_delete,
            nowait: false,
        };

        let declared = self
            .channel()?
            .queue_declare(&queue.name, options, FieldTable::default())
            .await
            .map_err(|e| self.broker_error("queue declare", e))?;

        let name = declared.name().as_str().to_string();
        log_debug!("[{}] Declared queue: {name}", self.transport_id);
        Ok(name)
    }

    async fn purge_queue(&mut self, queue: &str) -> Result<u32> {
        // ---
        self.channel()?
            .queue_purge(queue, QueuePurgeOptions::default())
            .await
            .map_err(|e| self.broker_error("queue purge", e))
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<()> {
        // ---
        self.channel()?
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| self.broker_error("basic qos", e))
    }

    async fn publish(&mut self, routing_key: &str, payload: &[u8], persistent: bool) -> Result<()> {
        // ---
        let mode = if persistent { PERSISTENT } else { TRANSIENT };

        self.channel()?
            .basic_publish(
                "",          // default exchange
                routing_key, // routing key = queue name
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(mode),
            )
            .await
            .map_err(|e| self.broker_error("publish", e))?;

        log_debug!("[{}] Published to queue: {routing_key}", self.transport_id);
        Ok(())
    }

    async fn start_consumer(&mut self, queue: &str, exclusive: bool) -> Result<()> {
        // ---
        if self.consumer.is_some() {
            return Err(Error::Broker(format!(
                "[{}] a consumer is already active on this channel",
                self.transport_id
            )));
        }

        let tag = format!("{}-{}", self.transport_id, uuid::Uuid::new_v4().simple());
        let options = BasicConsumeOptions {
            exclusive,
            ..BasicConsumeOptions::default()
        };

        let stream = self
            .channel()?
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await
            .map_err(|e| self.broker_error("consume", e))?;

        log_debug!("[{}] Started consuming queue: {queue}", self.transport_id);
        self.consumer = Some(ActiveConsumer { tag, stream });
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>> {
        // ---
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| Error::Broker(format!("[{}] no active consumer", self.transport_id)))?;

        match consumer.stream.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                payload: delivery.data.into(),
            })),
            Some(Err(e)) => Err(self.broker_error("consumer", e)),
            None => {
                log_info!("[{}] Consumer ended by broker", self.transport_id);
                Ok(None)
            }
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
        // ---
        self.channel()?
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| self.broker_error("ack", e))
    }

    async fn cancel_consumer(&mut self) -> Result<()> {
        // ---
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        let channel = self.channel()?;
        channel
            .basic_cancel(&consumer.tag, BasicCancelOptions::default())
            .await
            .map_err(|e| self.broker_error("cancel", e))?;

        if let Err(e) = channel
            .basic_recover(BasicRecoverOptions { requeue: true })
            .await
        {
            log_warn!("[{}] amqp: recover after cancel failed: {e}", self.transport_id);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // ---
        self.consumer = None;

        if let Some(channel) = self.channel.take() {
            if channel.status().connected() {
                channel
                    .close(200, "Normal shutdown")
                    .await
                    .map_err(|e| self.broker_error("channel close", e))?;
            }
        }

        if let Some(connection) = self.connection.take() {
            if connection.status().connected() {
                connection
                    .close(200, "Normal shutdown")
                    .await
                    .map_err(|e| self.broker_error("connection close", e))?;
            }
            log_info!("[{}] AMQP connection closed", self.transport_id);
        }
        Ok(())
    }
}

fn broker_uri(ctx: &ConnectionContext) -> AMQPUri {
    // ---
    let scheme = if ctx.tls_enabled() {
        AMQPScheme::AMQPS
    } else {
        AMQPScheme::AMQP
    };

    AMQPUri {
        scheme,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: ctx.user().to_string(),
                password: ctx.password().to_string(),
            },
            host: ctx.host().to_string(),
            port: ctx.port(),
        },
        vhost: ctx.virtual_host().to_string(),
        query: AMQPQueryString {
            connection_timeout: Some(millis(ctx.timeout())),
            ..AMQPQueryString::default()
        },
    }
}

fn tls_config(ctx: &ConnectionContext) -> Result<OwnedTLSConfig> {
    // ---
    let cert_chain = match (ctx.tls_enabled(), ctx.ca_cert_path()) {
        (true, Some(path)) => Some(std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read CA certificate {}: {e}", path.display()))
        })?),
        _ => None,
    };

    Ok(OwnedTLSConfig {
        identity: None,
        cert_chain,
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Creates a lapin-based AMQP transport for the given context.
///
/// # Connection Behavior
///
/// Nothing touches the network until `open()` is called; the owning
/// `Channel` does that under its retry policy.
pub fn create_transport(transport_id: &str, context: &ConnectionContext) -> TransportBox {
    // ---
    Box::new(LapinTransport {
        transport_id: transport_id.to_string(),
        context: context.clone(),
        connection: None,
        channel: None,
        consumer: None,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn context(tls: bool) -> ConnectionContext {
        ConnectionContext::builder()
            .host("broker.example.com")
            .port(5671)
            .virtual_host("tenant/a")
            .user("alice@example.com")
            .password("p@ss:word")
            .tls(tls)
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[test]
    fn test_uri_keeps_raw_credentials() {
        // ---
        let uri = broker_uri(&context(true));

        assert!(matches!(uri.scheme, AMQPScheme::AMQPS));
        assert_eq!(uri.authority.userinfo.username, "alice@example.com");
        assert_eq!(uri.authority.userinfo.password, "p@ss:word");
        assert_eq!(uri.vhost, "tenant/a");
        assert_eq!(uri.query.connection_timeout, Some(5000));
    }

    #[test]
    fn test_plain_scheme_without_tls() {
        // ---
        let ctx = context(false);
        assert!(matches!(broker_uri(&ctx).scheme, AMQPScheme::AMQP));
        assert!(tls_config(&ctx).unwrap().cert_chain.is_none());
    }

    #[test]
    fn test_missing_ca_file_is_configuration_error() {
        // ---
        let ctx = ConnectionContext::builder()
            .host("h")
            .virtual_host("v")
            .user("u")
            .password("p")
            .ca_cert_path("/nonexistent/ca.pem")
            .build()
            .unwrap();

        assert!(matches!(tls_config(&ctx), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_operations_before_open_fail() {
        // ---
        let mut transport = create_transport("t", &context(true));

        assert!(!transport.is_open());
        let err = transport.purge_queue("q").await.unwrap_err();
        assert!(matches!(err, Error::Broker(_)));
        transport.close().await.unwrap();
    }
}

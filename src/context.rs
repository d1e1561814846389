//! Broker connection parameters.
//!
//! A [`ConnectionContext`] is built once from configuration (direct
//! arguments, the fluent [`ConnectionContextBuilder`], or a credentials file
//! via [`ConnectionContext::from_credentials_file`]) and is read-only
//! afterwards. Every channel of a client is built from the same context.
//!
//! The context contains no broker-client types; transports interpret it into
//! concrete connection settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Default AMQP port for TLS connections.
pub const DEFAULT_TLS_PORT: u16 = 5671;

/// Connect and default request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection details for a broker service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    // ---
    host: String,
    port: u16,
    virtual_host: String,
    user: String,
    password: String,
    tls_enabled: bool,
    ca_cert_path: Option<PathBuf>,
    timeout: Duration,
    request_queue: Option<String>,
    response_queue: Option<String>,
}

impl ConnectionContext {
    /// Start building a context.
    pub fn builder() -> ConnectionContextBuilder {
        ConnectionContextBuilder::new()
    }

    /// Construct a context from explicit arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `host`, `vhost` or `user` is empty.
    #[allow(clippy::too_many_arguments)]
    pub fn from_args(
        host: impl Into<String>,
        port: u16,
        vhost: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        ca_cert: Option<PathBuf>,
        timeout: Duration,
        tls: bool,
    ) -> Result<Self> {
        // ---
        let mut builder = Self::builder()
            .host(host)
            .port(port)
            .virtual_host(vhost)
            .user(user)
            .password(password)
            .timeout(timeout)
            .tls(tls);

        if let Some(path) = ca_cert {
            builder = builder.ca_cert_path(path);
        }

        builder.build()
    }

    /// Construct a context from a JSON credentials file.
    ///
    /// Both the current and the deprecated legacy schema are accepted; see
    /// [`credentials`](crate::credentials) for the key sets. `user` and
    /// `password` override the guest credentials carried by the file.
    ///
    /// The embedded certificate is written next to the credentials file.
    pub fn from_credentials_file(
        path: impl AsRef<Path>,
        user: Option<&str>,
        password: Option<&str>,
        tls: bool,
    ) -> Result<Self> {
        // ---
        crate::credentials::load(path.as_ref(), user, password, tls)
    }

    /// Broker host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// AMQP virtual host.
    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_enabled
    }

    /// Path of the PEM file holding the CA certificate, if any.
    pub fn ca_cert_path(&self) -> Option<&Path> {
        self.ca_cert_path.as_deref()
    }

    /// Connect timeout, also the default wait for replies.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue requests are published to, when the configuration names one.
    pub fn request_queue(&self) -> Option<&str> {
        self.request_queue.as_deref()
    }

    /// Queue replies are consumed from, when the configuration names one.
    pub fn response_queue(&self) -> Option<&str> {
        self.response_queue.as_deref()
    }
}

/// Builder for [`ConnectionContext`].
///
/// Required: `host`, `virtual_host`, `user`, `password`. The port defaults
/// to 5671 (AMQPS), TLS defaults to on, and the timeout to 60 seconds.
///
/// # Example
///
/// ```
/// use cloud_messenger::ConnectionContext;
///
/// let ctx = ConnectionContext::builder()
///     .host("broker.example.com")
///     .virtual_host("/")
///     .user("guest")
///     .password("guest")
///     .tls(false)
///     .port(5672)
///     .build()
///     .unwrap();
///
/// assert_eq!(ctx.port(), 5672);
/// ```
#[derive(Debug, Default)]
pub struct ConnectionContextBuilder {
    host: Option<String>,
    port: Option<u16>,
    virtual_host: Option<String>,
    user: Option<String>,
    password: Option<String>,
    tls: Option<bool>,
    ca_cert_path: Option<PathBuf>,
    timeout: Option<Duration>,
    request_queue: Option<String>,
    response_queue: Option<String>,
}

impl ConnectionContextBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn virtual_host(mut self, vhost: impl Into<String>) -> Self {
        self.virtual_host = Some(vhost.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Enable or disable TLS (default: enabled).
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = Some(enabled);
        self
    }

    /// PEM file with the CA certificate used to verify the broker.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Connect timeout and default reply wait (default: 60s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Default publish target for request messages.
    pub fn request_queue(mut self, queue: impl Into<String>) -> Self {
        self.request_queue = Some(queue.into());
        self
    }

    /// Reply queue name published by the service operator.
    pub fn response_queue(mut self, queue: impl Into<String>) -> Self {
        self.response_queue = Some(queue.into());
        self
    }

    /// Validate and build the context (consumes self).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first missing field.
    pub fn build(self) -> Result<ConnectionContext> {
        // ---
        let host = required("host", self.host)?;
        let virtual_host = required("virtual_host", self.virtual_host)?;
        let user = required("user", self.user)?;
        let password = self
            .password
            .ok_or_else(|| Error::Configuration("password is missing".into()))?;

        let timeout = match self.timeout {
            Some(t) if t.is_zero() => {
                return Err(Error::Configuration("timeout must be non-zero".into()))
            }
            Some(t) => t,
            None => DEFAULT_TIMEOUT,
        };

        Ok(ConnectionContext {
            host,
            port: self.port.unwrap_or(DEFAULT_TLS_PORT),
            virtual_host,
            user,
            password,
            tls_enabled: self.tls.unwrap_or(true),
            ca_cert_path: self.ca_cert_path,
            timeout,
            request_queue: self.request_queue.filter(|q| !q.trim().is_empty()),
            response_queue: self.response_queue.filter(|q| !q.trim().is_empty()),
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    // ---
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Configuration(format!("{field} is missing"))),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn base() -> ConnectionContextBuilder {
        ConnectionContext::builder()
            .host("localhost")
            .virtual_host("/")
            .user("guest")
            .password("guest")
    }

    #[test]
    fn test_defaults() {
        // ---
        let ctx = base().build().unwrap();
        assert_eq!(ctx.port(), DEFAULT_TLS_PORT);
        assert!(ctx.tls_enabled());
        assert_eq!(ctx.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(ctx.ca_cert_path(), None);
        assert_eq!(ctx.request_queue(), None);
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        // ---
        let err = ConnectionContext::builder()
            .virtual_host("/")
            .user("guest")
            .password("guest")
            .build()
            .unwrap_err();

        match err {
            Error::Configuration(msg) => assert!(msg.contains("host")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_blank_user_rejected() {
        // ---
        let err = base().user("  ").build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        // ---
        let err = base().timeout(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_from_args_matches_builder() {
        // ---
        let from_args = ConnectionContext::from_args(
            "localhost",
            5672,
            "/",
            "guest",
            "guest",
            Some(PathBuf::from("/tmp/ca.pem")),
            Duration::from_secs(30),
            false,
        )
        .unwrap();

        let built = base()
            .port(5672)
            .ca_cert_path("/tmp/ca.pem")
            .timeout(Duration::from_secs(30))
            .tls(false)
            .build()
            .unwrap();

        assert_eq!(from_args, built);
    }

    #[test]
    fn test_blank_queue_names_are_dropped() {
        // ---
        let ctx = base().request_queue("").response_queue("replies").build().unwrap();
        assert_eq!(ctx.request_queue(), None);
        assert_eq!(ctx.response_queue(), Some("replies"));
    }
}

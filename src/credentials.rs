//! Credentials file parsing.
//!
//! Two JSON schemas are accepted and both normalize into the same
//! [`ConnectionContext`]:
//!
//! **Current schema**
//!
//! ```json
//! {
//!   "broker_host": "broker.example.com",
//!   "broker_port": 5671,
//!   "broker_vhost": "tenant",
//!   "broker_guest_user": "guest",
//!   "broker_guest_password": "secret",
//!   "broker_cert_b64": "LS0tLS1CRUdJTi...",
//!   "broker_pem": "broker.pem",
//!   "broker_timeout": 60,
//!   "broker_request_queue": "requests",
//!   "broker_response_queue": "replies"
//! }
//! ```
//!
//! **Legacy schema** (deprecated, detected by the `broker` key)
//!
//! ```json
//! {
//!   "broker": "broker.example.com",
//!   "port": 5671,
//!   "vhost": "tenant",
//!   "client_user": "guest",
//!   "client_pwd": "secret",
//!   "cert_b64": "LS0tLS1CRUdJTi..."
//! }
//! ```
//!
//! The legacy PEM file is named after the credentials file (`creds.json`
//! → `creds.pem`). In both cases the base64 certificate is decoded and
//! written next to the credentials file; rewriting the same certificate to
//! the same path is a no-op, so loading a file repeatedly is safe.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::{log_debug, log_warn, ConnectionContext, Error, Result};

/// Broker port as found in credentials files (number or numeric string).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Port {
    Number(u16),
    Text(String),
}

impl Port {
    fn resolve(self, key: &str) -> Result<u16> {
        // ---
        match self {
            Port::Number(p) => Ok(p),
            Port::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::Configuration(format!("{key} is not a valid port: {s}"))),
        }
    }
}

/// Current credentials schema.
#[derive(Debug, Deserialize)]
pub struct ModernCredentials {
    broker_host: Option<String>,
    broker_port: Option<Port>,
    broker_vhost: Option<String>,
    broker_guest_user: Option<String>,
    broker_guest_password: Option<String>,
    broker_cert_b64: Option<String>,
    broker_pem: Option<String>,
    broker_timeout: Option<u64>,
    broker_request_queue: Option<String>,
    broker_response_queue: Option<String>,
}

/// Deprecated credentials schema.
#[derive(Debug, Deserialize)]
pub struct LegacyCredentials {
    broker: Option<String>,
    port: Option<Port>,
    vhost: Option<String>,
    client_user: Option<String>,
    client_pwd: Option<String>,
    cert_b64: Option<String>,
    broker_timeout: Option<u64>,
    broker_request_queue: Option<String>,
    broker_response_queue: Option<String>,
}

/// Canonical field set both schemas converge on before building a context.
struct Normalized {
    host: Option<String>,
    port: Option<Port>,
    vhost: Option<String>,
    user: Option<String>,
    password: Option<String>,
    cert_b64: Option<String>,
    pem: Option<String>,
    timeout: Option<u64>,
    request_queue: Option<String>,
    response_queue: Option<String>,
}

impl ModernCredentials {
    fn normalize(self, user: Option<&str>, password: Option<&str>) -> Normalized {
        // ---
        Normalized {
            host: self.broker_host,
            port: self.broker_port,
            vhost: self.broker_vhost,
            user: user.map(str::to_owned).or(self.broker_guest_user),
            password: password.map(str::to_owned).or(self.broker_guest_password),
            cert_b64: self.broker_cert_b64,
            pem: self.broker_pem,
            timeout: self.broker_timeout,
            request_queue: self.broker_request_queue,
            response_queue: self.broker_response_queue,
        }
    }
}

impl LegacyCredentials {
    fn normalize(self, file_stem: &str) -> Normalized {
        // ---
        Normalized {
            host: self.broker,
            port: self.port,
            vhost: self.vhost,
            user: self.client_user,
            password: self.client_pwd,
            cert_b64: self.cert_b64,
            pem: Some(format!("{file_stem}.pem")),
            timeout: self.broker_timeout,
            request_queue: self.broker_request_queue,
            response_queue: self.broker_response_queue,
        }
    }
}

/// Load a credentials file and build a context from it.
pub(crate) fn load(
    path: &Path,
    user: Option<&str>,
    password: Option<&str>,
    tls: bool,
) -> Result<ConnectionContext> {
    // ---
    let text = fs::read_to_string(path)?;
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Configuration(format!("invalid credentials path: {path:?}")))?;

    let normalized = parse(&text, stem, user, password)?;
    build(normalized, &directory, tls)
}

fn parse(text: &str, stem: &str, user: Option<&str>, password: Option<&str>) -> Result<Normalized> {
    // ---
    let raw: serde_json::Value = serde_json::from_str(text)?;

    if raw.get("broker").is_some() {
        log_warn!("legacy credentials format in use, please migrate to broker_* keys");
        let legacy: LegacyCredentials = serde_json::from_value(raw)?;
        Ok(legacy.normalize(stem))
    } else {
        let modern: ModernCredentials = serde_json::from_value(raw)?;
        Ok(modern.normalize(user, password))
    }
}

fn build(n: Normalized, directory: &Path, tls: bool) -> Result<ConnectionContext> {
    // ---
    let host = require("broker_host", n.host)?;
    let port = n
        .port
        .ok_or_else(|| missing("broker_port"))?
        .resolve("broker_port")?;
    let vhost = require("broker_vhost", n.vhost)?;
    let user = require("broker_user", n.user)?;
    let password = require("broker_password", n.password)?;
    let cert_b64 = require("broker_cert_b64", n.cert_b64)?;
    let pem = require("broker_pem", n.pem)?;

    let pem_path = directory.join(pem);
    materialize_certificate(&cert_b64, &pem_path)?;

    let mut builder = ConnectionContext::builder()
        .host(host)
        .port(port)
        .virtual_host(vhost)
        .user(user)
        .password(password)
        .tls(tls)
        .ca_cert_path(pem_path);

    if let Some(secs) = n.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if let Some(queue) = n.request_queue {
        builder = builder.request_queue(queue);
    }
    if let Some(queue) = n.response_queue {
        builder = builder.response_queue(queue);
    }

    builder.build()
}

/// Decode a base64 certificate and write it to `target`.
///
/// Leaves the file untouched when it already holds the same bytes.
pub fn materialize_certificate(cert_b64: &str, target: &Path) -> Result<()> {
    // ---
    let compact: String = cert_b64.split_whitespace().collect();
    let pem = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Configuration(format!("broker_cert_b64 is not valid base64: {e}")))?;

    if std::str::from_utf8(&pem).is_err() {
        return Err(Error::Configuration(
            "broker_cert_b64 does not decode to a PEM text".into(),
        ));
    }

    if let Ok(existing) = fs::read(target) {
        if existing == pem {
            log_debug!("certificate already present at {}", target.display());
            return Ok(());
        }
    }

    fs::write(target, &pem)?;
    log_debug!("certificate written to {}", target.display());
    Ok(())
}

fn require(key: &str, value: Option<String>) -> Result<String> {
    // ---
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(missing(key)),
    }
}

fn missing(key: &str) -> Error {
    Error::Configuration(format!("{key} is missing from credentials"))
}

// src/upload.rs

//! Blob upload to a pre-signed HTTP target.
//!
//! Large artifacts do not travel over the broker. The service hands out an
//! upload target (a URL plus form fields, one of which is the object `key`),
//! the client POSTs the artifact there as a multipart form, and later asks
//! the service for a download location by `key`.

use serde_json::{Map, Value};

use crate::{log_debug, log_info, Error, Result};

/// Where and how to upload one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub fields: Vec<(String, String)>,
}

impl UploadTarget {
    /// Read a target from a service reply of the form
    /// `{"url": "...", "fields": {"key": "...", ...}}`.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedResponse`] if `url` or `fields` is missing, or if the
    /// fields carry no `key`.
    pub fn from_reply(reply: &Value) -> Result<Self> {
        // ---
        let url = reply
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedResponse(format!("Malformed object: {reply}")))?;

        let fields: &Map<String, Value> = reply
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::MalformedResponse(format!("Malformed object: {reply}")))?;

        if !fields.contains_key("key") {
            return Err(Error::MalformedResponse("Malformed URL".into()));
        }

        let fields = fields
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), text)
            })
            .collect();

        Ok(Self {
            url: url.to_string(),
            fields,
        })
    }

    /// The object key the artifact will be stored under.
    pub fn key(&self) -> &str {
        self.fields
            .iter()
            .find(|(name, _)| name == "key")
            .map(|(_, value)| value.as_str())
            .unwrap_or_default()
    }
}

/// Performs the multipart POST of an artifact.
#[derive(Debug, Clone, Default)]
pub struct BlobUploader {
    client: reqwest::Client,
}

impl BlobUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a pre-configured HTTP client (proxies, timeouts, TLS roots).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST `artifact` as JSON in a `file` part, alongside the target's fields.
    ///
    /// # Errors
    ///
    /// [`Error::Upload`] if the request cannot be sent or the response status
    /// is not 2xx.
    pub async fn upload(&self, target: &UploadTarget, artifact: &Value) -> Result<()> {
        // ---
        let body = serde_json::to_string(artifact)?;

        let mut form = reqwest::multipart::Form::new();
        for (name, value) in &target.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part(
            "file",
            reqwest::multipart::Part::text(body).file_name("file"),
        );

        log_debug!("uploading artifact to {}", target.url);

        let response = self
            .client
            .post(&target.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Upload(format!("upload request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upload(format!("Upload Error: {}", status.as_u16())));
        }

        log_info!("artifact uploaded as {}", target.key());
        Ok(())
    }
}

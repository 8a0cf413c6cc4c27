// HTTP transport: the one place the client touches the network
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{BreweryDbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built outgoing request.
///
/// For GET the query string is part of `uri` and `body` is `None`. For POST
/// `uri` is the bare endpoint URL and `body` holds the form-encoded
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    // Display copy for diagnostics. Decoding works on `body` itself.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// Sends a prepared request and hands back whatever the server answered.
// HTTP error statuses are not failures here: the service reports its errors
// in the body, which the client inspects after decoding.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            tracing::warn!(
                base_url = %config.base_url,
                "TLS certificate verification is disabled"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(&request.uri),
            HttpMethod::Post => self
                .client
                .post(&request.uri)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(request.body.clone().unwrap_or_default()),
            other => return Err(BreweryDbError::UnsupportedMethod(other)),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok(RawResponse { status, body })
    }
}

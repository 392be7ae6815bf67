//! Send engine.
//!
//! Wraps the host HTTP facilities behind a strategy chosen at construction
//! and maps every raw outcome to a tagged [`TransportResult`]. Nothing in
//! this module returns `Err` to its caller.

use crate::loggers::Logger;
use crate::{debug, warn};
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::io::Write;

pub mod headers;

/// Hosts cap keepalive request bodies at 64 KiB; the keepalive path
/// rejects larger bodies locally, before touching the network.
pub const KEEPALIVE_BODY_LIMIT: usize = 64 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Which host facilities the transport may use. All on by default;
/// embedders (and tests) turn capabilities off to force the fallbacks.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct HostCapabilities {
    /// Keepalive-constrained primary send path.
    pub keepalive: bool,

    /// Fire-and-forget handoff with unobservable outcome.
    pub send_beacon: bool,

    /// Any HTTP client at all. Without it the factory degrades to the
    /// one-shot fallback.
    pub fetch: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self { keepalive: true, send_beacon: true, fetch: true }
    }
}

/// Raw delivery outcome of a single transport invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResult {
    /// HTTP 2xx.
    Success { status_code: u16 },

    /// Handed off; delivery state unobservable.
    Unknown,

    /// HTTP non-2xx.
    Response { status_code: u16, raw_error: String },

    /// Failed before any response arrived.
    Network { raw_error: String },
}

#[derive(Clone)]
pub struct Transport {
    client: Client,
    capabilities: HostCapabilities,
    compress: bool,
    logger: Logger,
}

impl Transport {
    pub fn new(capabilities: HostCapabilities, compress: bool, logger: Logger) -> Self {
        let client = Client::builder().build().unwrap_or_else(|_| Client::new());
        Self { client, capabilities, compress, logger }
    }

    /// POST `body` to `url`, classifying the outcome. Never fails; the
    /// worst case is a `Network` result.
    pub async fn post(&self, url: &str, body: &str, headers: HeaderMap) -> TransportResult {
        if self.capabilities.keepalive {
            self.post_keepalive(url, body, headers).await
        } else if self.capabilities.send_beacon {
            self.handoff(url, body, headers)
        } else {
            self.post_plain(url, body, headers).await
        }
    }

    /// Keepalive strategy: constrained send first, one plain retry on any
    /// network-level failure (the 64 KiB rejection included).
    async fn post_keepalive(&self, url: &str, body: &str, headers: HeaderMap) -> TransportResult {
        if body.len() <= KEEPALIVE_BODY_LIMIT {
            match self.execute(url, body, headers.clone()).await {
                Ok(result) => return result,
                Err(raw_error) => {
                    warn!(
                        self.logger,
                        "Keepalive send failed, retrying without keepalive",
                        "url" => url,
                        "error" => &raw_error
                    );
                }
            }
        } else {
            debug!(
                self.logger,
                "Body exceeds keepalive limit, sending without keepalive",
                "url" => url,
                "bodyBytes" => body.len()
            );
        }

        self.post_plain(url, body, headers).await
    }

    /// Fire-and-forget handoff: the request moves onto a detached task and
    /// the caller learns nothing further. Errors inside the task are
    /// swallowed.
    fn handoff(&self, url: &str, body: &str, headers: HeaderMap) -> TransportResult {
        let (bytes, headers) = self.prepare(body, headers);
        let client = self.client.clone();
        let logger = self.logger.clone();
        let url = url.to_string();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).headers(headers).body(bytes).send().await {
                debug!(logger, "Detached handoff failed", "url" => &url, "error" => e.to_string());
            }
        });

        TransportResult::Unknown
    }

    async fn post_plain(&self, url: &str, body: &str, headers: HeaderMap) -> TransportResult {
        match self.execute(url, body, headers).await {
            Ok(result) => result,
            Err(raw_error) => TransportResult::Network { raw_error },
        }
    }

    /// One wire attempt. `Ok` carries the classified HTTP outcome; `Err`
    /// is a network-level failure the strategy may retry.
    async fn execute(&self, url: &str, body: &str, headers: HeaderMap) -> Result<TransportResult, String> {
        let (bytes, headers) = self.prepare(body, headers);
        match self.client.post(url).headers(headers).body(bytes).send().await {
            Ok(response) => Ok(classify(response.status())),
            Err(e) => {
                let message = e.to_string();
                Err(if message.is_empty() { UNKNOWN_ERROR.to_string() } else { message })
            }
        }
    }

    /// Apply the default content type and, when enabled, gzip the body.
    /// The encoding header is only set once the bytes really are gzip.
    fn prepare(&self, body: &str, mut headers: HeaderMap) -> (Vec<u8>, HeaderMap) {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }

        if self.compress {
            if let Some(bytes) = gzip(body) {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                return (bytes, headers);
            }
            warn!(self.logger, "Gzip encoding failed, sending raw body", "bodyBytes" => body.len());
        }

        (body.as_bytes().to_vec(), headers)
    }
}

fn classify(status: reqwest::StatusCode) -> TransportResult {
    if status.is_success() {
        TransportResult::Success { status_code: status.as_u16() }
    } else {
        TransportResult::Response {
            status_code: status.as_u16(),
            raw_error: status.canonical_reason().unwrap_or(UNKNOWN_ERROR).to_string(),
        }
    }
}

fn gzip(body: &str) -> Option<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).ok()?;
    encoder.finish().ok()
}

/// Minimal-environment fallback: one credential-less POST, no retry, no
/// strategy. Used directly by callers and by the factory when the host has
/// no usable client capability.
pub async fn post_once(url: &str, body: &str, headers: Option<HashMap<String, String>>) -> TransportResult {
    let mut header_map = headers.as_ref().map(headers::to_header_map).unwrap_or_default();
    if !header_map.contains_key(CONTENT_TYPE) {
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }

    let client = Client::new();
    match client.post(url).headers(header_map).body(body.to_string()).send().await {
        Ok(response) => classify(response.status()),
        Err(e) => {
            let message = e.to_string();
            TransportResult::Network {
                raw_error: if message.is_empty() { UNKNOWN_ERROR.to_string() } else { message },
            }
        }
    }
}

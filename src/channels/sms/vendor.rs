//! HTTP plumbing shared by the SMS vendors: client construction, endpoint
//! parsing, request signing primitives and error classification.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{StatusCode, Url};
use sha2::{Digest, Sha256};

use crate::channels::flag;
use crate::error::{DispatchError, Result};
use crate::notification::SenderConfiguration;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Longest slice of a vendor response body quoted in an error
const MAX_QUOTED_BODY: usize = 200;

/// Settings every HTTP vendor reads besides its own credentials
#[derive(Debug, Clone)]
pub(crate) struct VendorHttp {
    pub endpoint: Url,
    pub client: reqwest::Client,
    /// Log the request instead of sending it
    pub dry_run: bool,
}

impl VendorHttp {
    /// Reads `endpoint` (falling back to `default_host`), `timeoutMs` and `dryRun`.
    pub fn from_config(config: &SenderConfiguration, default_host: &str) -> Result<Self> {
        let endpoint = endpoint_url(config.get("endpoint").unwrap_or(default_host))?;

        let timeout = match config.get("timeoutMs") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                DispatchError::Configuration(format!("invalid timeoutMs '{}'", raw))
            })?,
            None => DEFAULT_TIMEOUT_MS,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            endpoint,
            client,
            dry_run: flag(config, "dryRun")?,
        })
    }

    /// `host[:port]` as sent in the `Host` header
    pub fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

/// Accepts a bare host (`dysmsapi.aliyuncs.com`) or a full URL.
pub(crate) fn endpoint_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| DispatchError::Configuration(format!("invalid endpoint '{}': {}", raw, e)))?;
    if url.host_str().is_none() {
        return Err(DispatchError::Configuration(format!("endpoint '{}' has no host", raw)));
    }
    Ok(url)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC accepts keys of any length")
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Map a non-success HTTP status. 5xx and 429 are worth retrying.
pub(crate) fn status_error(vendor: &str, status: StatusCode, body: &str) -> DispatchError {
    let message = format!("{} returned {}: {}", vendor, status, quote(body));
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        DispatchError::TransientProvider(message)
    } else {
        DispatchError::Provider(message)
    }
}

/// Map a transport failure. Connect, timeout and mid-request errors are
/// transient; builder and redirect errors are not.
pub(crate) fn transport_error(vendor: &str, err: &reqwest::Error) -> DispatchError {
    let message = format!("{} request failed: {}", vendor, err);
    if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
        DispatchError::TransientProvider(message)
    } else {
        DispatchError::Provider(message)
    }
}

fn quote(body: &str) -> &str {
    match body.char_indices().nth(MAX_QUOTED_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

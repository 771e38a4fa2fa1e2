// crates/uapk-gateway-connectors/src/transport.rs
// ============================================================================
// Module: Connector Transport
// Description: Shared blocking HTTP plumbing for outbound connectors.
// Purpose: One client configuration, bounded reads, and body parsing.
// Dependencies: reqwest, serde_json
// ============================================================================

//! ## Overview
//! All HTTP connectors share this transport: clients are built with
//! redirects disabled and environment proxies ignored, responses are read
//! under a hard byte limit, and bodies parse as JSON only when the content
//! type or leading byte says so. Everything else is wrapped as raw text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::blocking::RequestBuilder;
use reqwest::blocking::Response;
use reqwest::redirect::Policy;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Result of one bounded HTTP exchange.
pub(crate) enum ExchangeOutcome {
    /// 2xx response with a parsed body.
    Success {
        /// Parsed response body.
        data: Value,
        /// Upstream status code.
        status: u16,
    },
    /// Non-2xx response.
    HttpError {
        /// Upstream status code.
        status: u16,
    },
    /// Response exceeded the byte limit.
    TooLarge {
        /// Upstream status code.
        status: u16,
        /// Effective byte limit.
        max_bytes: usize,
    },
    /// Request exceeded its timeout.
    Timeout,
    /// Request failed below the HTTP layer.
    RequestError(String),
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Builds the shared outbound client: no redirects, no environment proxies.
pub(crate) fn build_client(timeout_seconds: u64) -> Result<Client, String> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .redirect(Policy::none())
        .no_proxy()
        .build()
        .map_err(|err| err.to_string())
}

// ============================================================================
// SECTION: Exchange
// ============================================================================

/// Sends a prepared request and reads the response under the byte limit.
pub(crate) fn exchange(request: RequestBuilder, max_bytes: usize) -> ExchangeOutcome {
    let response = match request.send() {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return ExchangeOutcome::Timeout,
        Err(err) => return ExchangeOutcome::RequestError(err.to_string()),
    };

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase);

    let body = match read_limited(response, max_bytes) {
        Ok(body) => body,
        Err(ReadError::TooLarge) => {
            return ExchangeOutcome::TooLarge {
                status,
                max_bytes,
            };
        }
        Err(ReadError::Timeout) => return ExchangeOutcome::Timeout,
        Err(ReadError::Io(message)) => return ExchangeOutcome::RequestError(message),
    };

    if (200..300).contains(&status) {
        ExchangeOutcome::Success {
            data: parse_body(content_type.as_deref(), &body),
            status,
        }
    } else {
        ExchangeOutcome::HttpError {
            status,
        }
    }
}

/// Body read failures.
enum ReadError {
    /// Body exceeded the limit.
    TooLarge,
    /// Read timed out.
    Timeout,
    /// Other I/O failure.
    Io(String),
}

/// Streams the response body, aborting past `max_bytes`.
fn read_limited(response: Response, max_bytes: usize) -> Result<Vec<u8>, ReadError> {
    let mut buf = Vec::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut handle = response.take(limit);
    handle.read_to_end(&mut buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::TimedOut {
            ReadError::Timeout
        } else {
            ReadError::Io(err.to_string())
        }
    })?;
    if buf.len() > max_bytes {
        return Err(ReadError::TooLarge);
    }
    Ok(buf)
}

/// Parses a body as JSON when indicated, otherwise wraps the raw text.
pub(crate) fn parse_body(content_type: Option<&str>, body: &[u8]) -> Value {
    let looks_like_json = content_type.is_some_and(|ctype| ctype.contains("application/json"))
        || matches!(first_non_whitespace(body), Some(b'{' | b'['));
    let text = String::from_utf8_lossy(body);
    if looks_like_json
        && let Ok(value) = serde_json::from_str::<Value>(&text)
    {
        return value;
    }
    json!({"raw_response": text})
}

/// Returns the first non-whitespace byte of a body.
fn first_non_whitespace(body: &[u8]) -> Option<u8> {
    body.iter().copied().find(|byte| !byte.is_ascii_whitespace())
}

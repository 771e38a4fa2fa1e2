// crates/uapk-gateway-connectors/src/webhook.rs
// ============================================================================
// Module: Webhook Connector
// Description: POSTs action parameters as JSON to a fixed URL.
// Purpose: Deliver outbound webhooks under the mandatory egress policy.
// Dependencies: crate::{ssrf, transport}, uapk-gateway-core, reqwest
// ============================================================================

//! ## Overview
//! The webhook connector POSTs the action parameters to its configured URL.
//! The URL is validated before the request, re-resolved immediately before
//! sending to detect DNS drift, and the response is read under the byte
//! limit. No retries are performed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;
use uapk_gateway_core::ConnectorConfig;
use uapk_gateway_core::ConnectorDefaults;
use uapk_gateway_core::ConnectorResult;
use uapk_gateway_core::ToolConnector;
use uapk_gateway_core::connector_codes;

use crate::ssrf::dns_drifted;
use crate::ssrf::validate_url;
use crate::transport::ExchangeOutcome;
use crate::transport::build_client;
use crate::transport::exchange;

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Connector that POSTs to a configured webhook URL.
///
/// # Invariants
/// - Validation failures map to `SSRF_BLOCKED`; no request is issued.
/// - Redirects are never followed.
pub struct WebhookConnector {
    /// Target URL.
    url: Option<String>,
    /// Static headers with injected secret values.
    headers: BTreeMap<String, String>,
    /// Request timeout in seconds.
    timeout_seconds: u64,
    /// Response byte limit.
    max_response_bytes: usize,
    /// Effective domain allowlist.
    allowed_domains: Vec<String>,
    /// Development-only bypass of the address-range checks.
    allow_private_networks: bool,
}

impl WebhookConnector {
    /// Creates a webhook connector from parsed configuration.
    #[must_use]
    pub fn new(
        config: &ConnectorConfig,
        secrets: &BTreeMap<String, String>,
        defaults: &ConnectorDefaults,
    ) -> Self {
        Self {
            url: config.url.clone(),
            headers: effective_headers(config, secrets),
            timeout_seconds: config.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            max_response_bytes: effective_max_response_bytes(config, defaults),
            allowed_domains: effective_allowed_domains(config, defaults),
            allow_private_networks: allow_private_networks(config),
        }
    }
}

impl ToolConnector for WebhookConnector {
    fn execute(&self, params: &Value) -> ConnectorResult {
        let started = Instant::now();

        let url = self.url.as_deref().unwrap_or("");
        let target = match validate_url(url, &self.allowed_domains, self.allow_private_networks) {
            Ok(target) => target,
            Err(violation) => {
                return ConnectorResult::failed(
                    connector_codes::SSRF_BLOCKED,
                    violation.to_string(),
                    0,
                );
            }
        };

        let port = target.url.port_or_known_default().unwrap_or(80);
        if !self.allow_private_networks && dns_drifted(&target.host, port, &target.ips) {
            return ConnectorResult::failed(
                connector_codes::SSRF_DNS_DRIFT,
                "DNS resolution changed between validation and request (possible DNS rebinding)",
                elapsed_ms(started),
            );
        }

        let client = match build_client(self.timeout_seconds) {
            Ok(client) => client,
            Err(message) => {
                return ConnectorResult::failed(
                    connector_codes::REQUEST_ERROR,
                    message,
                    elapsed_ms(started),
                );
            }
        };

        let mut request = client.post(target.url.as_str()).json(params);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        match exchange(request, self.max_response_bytes) {
            ExchangeOutcome::Success { data, status } => {
                ConnectorResult::succeeded(data, Some(status), elapsed_ms(started))
            }
            ExchangeOutcome::HttpError { status } => ConnectorResult::failed(
                &format!("HTTP_{status}"),
                format!("Webhook returned status {status}"),
                elapsed_ms(started),
            )
            .with_status(status),
            ExchangeOutcome::TooLarge { status, max_bytes } => ConnectorResult::failed(
                connector_codes::RESPONSE_TOO_LARGE,
                format!("Webhook response exceeded max size ({max_bytes} bytes)"),
                elapsed_ms(started),
            )
            .with_status(status),
            ExchangeOutcome::Timeout => ConnectorResult::failed(
                connector_codes::TIMEOUT,
                format!("Webhook request timed out after {}s", self.timeout_seconds),
                elapsed_ms(started),
            ),
            ExchangeOutcome::RequestError(message) => ConnectorResult::failed(
                connector_codes::REQUEST_ERROR,
                message,
                elapsed_ms(started),
            ),
        }
    }
}

// ============================================================================
// SECTION: Shared Config Helpers
// ============================================================================

/// Milliseconds elapsed since `started`.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Static headers merged with secret-injected headers.
pub(crate) fn effective_headers(
    config: &ConnectorConfig,
    secrets: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut headers = config.headers.clone();
    for (header_name, secret_name) in &config.secret_refs {
        if let Some(value) = secrets.get(secret_name) {
            headers.insert(header_name.clone(), value.clone());
        }
    }
    headers
}

/// Per-connector allowlist override, falling back to the global default.
pub(crate) fn effective_allowed_domains(
    config: &ConnectorConfig,
    defaults: &ConnectorDefaults,
) -> Vec<String> {
    let configured: Vec<String> = config
        .extra
        .get("allowed_domains")
        .and_then(Value::as_array)
        .map(|items| {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<String>>()
        })
        .unwrap_or_default();
    if configured.is_empty() {
        defaults.allowed_domains.clone()
    } else {
        configured
    }
}

/// Per-connector byte limit override, falling back to the global default.
pub(crate) fn effective_max_response_bytes(
    config: &ConnectorConfig,
    defaults: &ConnectorDefaults,
) -> usize {
    config
        .extra
        .get("max_response_bytes")
        .and_then(Value::as_u64)
        .and_then(|value| usize::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(defaults.max_response_bytes)
}

/// Development-only flag disabling the address-range checks.
pub(crate) fn allow_private_networks(config: &ConnectorConfig) -> bool {
    config.extra.get("allow_private_networks").and_then(Value::as_bool).unwrap_or(false)
}

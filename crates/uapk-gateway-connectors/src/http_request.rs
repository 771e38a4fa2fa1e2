// crates/uapk-gateway-connectors/src/http_request.rs
// ============================================================================
// Module: HTTP Request Connector
// Description: Templated HTTP requests with domain allowlist enforcement.
// Purpose: Execute generic HTTP tools under the mandatory egress policy.
// Dependencies: crate::{ssrf, transport, webhook}, uapk-gateway-core, reqwest
// ============================================================================

//! ## Overview
//! The HTTP connector substitutes `{param}` placeholders into its URL
//! template, then sends the remaining parameters as query parameters for
//! GET/DELETE or as a JSON body otherwise. Validation failures map to
//! `DOMAIN_NOT_ALLOWED` and never reach the network.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Instant;

use reqwest::Method;
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
use crate::webhook::allow_private_networks;
use crate::webhook::effective_allowed_domains;
use crate::webhook::effective_headers;
use crate::webhook::effective_max_response_bytes;
use crate::webhook::elapsed_ms;

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Connector for generic HTTP requests with a strict domain allowlist.
///
/// # Invariants
/// - Parameters consumed by the URL template are excluded from the request
///   body and query string.
/// - Validation failures map to `DOMAIN_NOT_ALLOWED`; no request is issued.
pub struct HttpRequestConnector {
    /// URL template with optional `{param}` placeholders.
    url_template: Option<String>,
    /// HTTP method.
    method: String,
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

impl HttpRequestConnector {
    /// Creates an HTTP connector from parsed configuration.
    #[must_use]
    pub fn new(
        config: &ConnectorConfig,
        secrets: &BTreeMap<String, String>,
        defaults: &ConnectorDefaults,
    ) -> Self {
        Self {
            url_template: config.url.clone(),
            method: config.method.clone(),
            headers: effective_headers(config, secrets),
            timeout_seconds: config.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            max_response_bytes: effective_max_response_bytes(config, defaults),
            allowed_domains: effective_allowed_domains(config, defaults),
            allow_private_networks: allow_private_networks(config),
        }
    }
}

impl ToolConnector for HttpRequestConnector {
    fn execute(&self, params: &Value) -> ConnectorResult {
        let started = Instant::now();

        let template = self.url_template.as_deref().unwrap_or("");
        let url = build_url(template, params);
        let target = match validate_url(&url, &self.allowed_domains, self.allow_private_networks)
        {
            Ok(target) => target,
            Err(violation) => {
                return ConnectorResult::failed(
                    connector_codes::DOMAIN_NOT_ALLOWED,
                    violation.to_string(),
                    elapsed_ms(started),
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

        let method = Method::from_bytes(self.method.as_bytes()).unwrap_or(Method::POST);
        let body_params = body_params(template, params);
        let send_as_query = method == Method::GET || method == Method::DELETE;
        let mut request = client.request(method, target.url.as_str());
        if send_as_query {
            request = request.query(&query_pairs(&body_params));
        } else if !body_params.is_empty() {
            request = request.json(&Value::Object(body_params.into_iter().collect()));
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        match exchange(request, self.max_response_bytes) {
            ExchangeOutcome::Success { data, status } => {
                ConnectorResult::succeeded(data, Some(status), elapsed_ms(started))
            }
            ExchangeOutcome::HttpError { status } => ConnectorResult::failed(
                &format!("HTTP_{status}"),
                format!("Request returned status {status}"),
                elapsed_ms(started),
            )
            .with_status(status),
            ExchangeOutcome::TooLarge { status, max_bytes } => ConnectorResult::failed(
                connector_codes::RESPONSE_TOO_LARGE,
                format!("Upstream response exceeded max size ({max_bytes} bytes)"),
                elapsed_ms(started),
            )
            .with_status(status),
            ExchangeOutcome::Timeout => ConnectorResult::failed(
                connector_codes::TIMEOUT,
                format!("Request timed out after {}s", self.timeout_seconds),
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
// SECTION: URL Templating
// ============================================================================

/// Substitutes `{param}` placeholders with scalar parameter values.
fn build_url(template: &str, params: &Value) -> String {
    let mut url = template.to_string();
    if let Some(entries) = params.as_object() {
        for (key, value) in entries {
            let placeholder = format!("{{{key}}}");
            if url.contains(&placeholder) {
                url = url.replace(&placeholder, &scalar_string(value));
            }
        }
    }
    url
}

/// Parameters not consumed by the URL template.
fn body_params(template: &str, params: &Value) -> BTreeMap<String, Value> {
    let mut remaining = BTreeMap::new();
    if let Some(entries) = params.as_object() {
        for (key, value) in entries {
            if !template.contains(&format!("{{{key}}}")) {
                remaining.insert(key.clone(), value.clone());
            }
        }
    }
    remaining
}

/// Query-string pairs with scalar value rendering.
fn query_pairs(params: &BTreeMap<String, Value>) -> Vec<(String, String)> {
    params.iter().map(|(key, value)| (key.clone(), scalar_string(value))).collect()
}

/// Renders a JSON value for URL or query use.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

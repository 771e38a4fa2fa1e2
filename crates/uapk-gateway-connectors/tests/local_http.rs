// crates/uapk-gateway-connectors/tests/local_http.rs
// ============================================================================
// Module: Local HTTP Connector Tests
// Description: Connector behavior against a loopback fixture server.
// ============================================================================
//! ## Overview
//! Runs webhook and HTTP connectors against a tiny loopback server using the
//! development private-network bypass: JSON and raw-text parsing, status
//! mapping, size limits, and secret header injection.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::thread;

use serde_json::json;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;
use uapk_gateway_connectors::HttpRequestConnector;
use uapk_gateway_connectors::WebhookConnector;
use uapk_gateway_core::ConnectorConfig;
use uapk_gateway_core::ConnectorDefaults;
use uapk_gateway_core::ToolConnector;

// ============================================================================
// SECTION: Fixture Server
// ============================================================================

/// Starts a loopback fixture server and returns its port.
fn start_server() -> u16 {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            let auth = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("X-Api-Key"))
                .map(|header| header.value.as_str().to_string());
            let response = match path.split('?').next().unwrap_or("") {
                "/json" => json_response(json!({"ok": true}).to_string(), 200),
                "/text" => Response::from_string("plain text").with_status_code(200),
                "/big" => Response::from_string("x".repeat(4096)).with_status_code(200),
                "/missing" => Response::from_string("not here").with_status_code(404),
                "/auth" => json_response(json!({"key": auth}).to_string(), 200),
                _ => Response::from_string("unknown").with_status_code(500),
            };
            let _ = request.respond(response);
        }
    });
    port
}

/// Builds a JSON response with the right content type.
fn json_response(body: String, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_string(body)
        .with_status_code(status)
        .with_header(Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap())
}

fn defaults() -> ConnectorDefaults {
    ConnectorDefaults {
        timeout_seconds: 5,
        max_response_bytes: 1_000_000,
        allowed_domains: vec!["127.0.0.1".to_string()],
    }
}

fn http_config(url: &str, method: &str, extra: serde_json::Value) -> ConnectorConfig {
    ConnectorConfig::from_tool_entry(&json!({
        "type": "http_request",
        "config": {
            "url": url,
            "method": method,
            "extra": extra,
        },
    }))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Tests JSON body parsing on a successful GET.
#[test]
fn test_get_json_success() {
    let port = start_server();
    let config = http_config(
        &format!("http://127.0.0.1:{port}/json"),
        "GET",
        json!({"allow_private_networks": true}),
    );
    let connector = HttpRequestConnector::new(&config, &BTreeMap::new(), &defaults());

    let result = connector.execute(&json!({}));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.data.as_ref().unwrap(), &json!({"ok": true}));
    assert!(result.result_hash.is_some());
}

/// Tests raw-text wrapping for non-JSON bodies.
#[test]
fn test_raw_text_wrapped() {
    let port = start_server();
    let config = http_config(
        &format!("http://127.0.0.1:{port}/text"),
        "GET",
        json!({"allow_private_networks": true}),
    );
    let connector = HttpRequestConnector::new(&config, &BTreeMap::new(), &defaults());

    let result = connector.execute(&json!({}));
    assert!(result.success);
    assert_eq!(result.data.as_ref().unwrap(), &json!({"raw_response": "plain text"}));
}

/// Tests non-2xx status mapping to HTTP_<n>.
#[test]
fn test_http_status_error_code() {
    let port = start_server();
    let config = http_config(
        &format!("http://127.0.0.1:{port}/missing"),
        "GET",
        json!({"allow_private_networks": true}),
    );
    let connector = HttpRequestConnector::new(&config, &BTreeMap::new(), &defaults());

    let result = connector.execute(&json!({}));
    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().code, "HTTP_404");
    assert_eq!(result.status_code, Some(404));
}

/// Tests the response size limit abort.
#[test]
fn test_response_too_large() {
    let port = start_server();
    let config = http_config(
        &format!("http://127.0.0.1:{port}/big"),
        "GET",
        json!({"allow_private_networks": true, "max_response_bytes": 1024}),
    );
    let connector = HttpRequestConnector::new(&config, &BTreeMap::new(), &defaults());

    let result = connector.execute(&json!({}));
    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().code, "RESPONSE_TOO_LARGE");
}

/// Tests secret injection into request headers.
#[test]
fn test_secret_header_injection() {
    let port = start_server();
    let config = ConnectorConfig::from_tool_entry(&json!({
        "type": "http_request",
        "config": {
            "url": format!("http://127.0.0.1:{port}/auth"),
            "method": "GET",
            "secret_refs": {"X-Api-Key": "stripe_key"},
            "extra": {"allow_private_networks": true},
        },
    }));
    let mut secrets = BTreeMap::new();
    secrets.insert("stripe_key".to_string(), "sk-test-123".to_string());
    let connector = HttpRequestConnector::new(&config, &secrets, &defaults());

    let result = connector.execute(&json!({}));
    assert!(result.success);
    assert_eq!(result.data.as_ref().unwrap(), &json!({"key": "sk-test-123"}));
}

/// Tests the webhook POST round trip.
#[test]
fn test_webhook_post() {
    let port = start_server();
    let config = ConnectorConfig::from_tool_entry(&json!({
        "type": "webhook",
        "config": {
            "url": format!("http://127.0.0.1:{port}/json"),
            "extra": {"allow_private_networks": true},
        },
    }));
    let connector = WebhookConnector::new(&config, &BTreeMap::new(), &defaults());

    let result = connector.execute(&json!({"event": "refund"}));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.status_code, Some(200));
}

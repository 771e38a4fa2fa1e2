// crates/uapk-gateway-connectors/src/mock.rs
// ============================================================================
// Module: Mock Connector
// Description: Deterministic connector for tests and development manifests.
// Purpose: Exercise the execute path without external dependencies.
// Dependencies: uapk-gateway-core, serde_json
// ============================================================================

//! ## Overview
//! The mock connector returns configured data when `extra.response_template`
//! is set, and otherwise echoes the action parameters with a success marker.
//! Results are deterministic so audit hashes stay reproducible in tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use uapk_gateway_core::ConnectorConfig;
use uapk_gateway_core::ConnectorResult;
use uapk_gateway_core::ToolConnector;

// ============================================================================
// SECTION: Connector
// ============================================================================

/// Connector returning deterministic configured data.
pub struct MockConnector {
    /// Configured response template, when present.
    response_template: Option<Value>,
}

impl MockConnector {
    /// Creates a mock connector from parsed configuration.
    #[must_use]
    pub fn new(config: &ConnectorConfig) -> Self {
        Self {
            response_template: config.extra.get("response_template").cloned(),
        }
    }
}

impl ToolConnector for MockConnector {
    fn execute(&self, params: &Value) -> ConnectorResult {
        let data = self.response_template.clone().unwrap_or_else(|| {
            json!({
                "params": params,
                "result": "mock_success",
                "mock": true,
            })
        });
        ConnectorResult::succeeded(data, None, 0)
    }
}

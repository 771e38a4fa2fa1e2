// crates/uapk-gateway-connectors/src/registry.rs
// ============================================================================
// Module: Connector Registry
// Description: Factory mapping connector type labels to implementations.
// Purpose: Plug the connector runtime into the gateway orchestrator.
// Dependencies: crate connectors, uapk-gateway-core
// ============================================================================

//! ## Overview
//! The registry recognizes `webhook`, `http_request` (with the legacy
//! `http` alias), and `mock`. Unknown types return `None`, which the
//! orchestrator reports as an `INVALID_CONNECTOR_TYPE` tool failure rather
//! than a policy denial.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use uapk_gateway_core::ConnectorConfig;
use uapk_gateway_core::ConnectorDefaults;
use uapk_gateway_core::ConnectorFactory;
use uapk_gateway_core::ToolConnector;

use crate::http_request::HttpRequestConnector;
use crate::mock::MockConnector;
use crate::webhook::WebhookConnector;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Factory for the built-in connector types.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorRegistry;

impl ConnectorRegistry {
    /// Creates the registry.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConnectorFactory for ConnectorRegistry {
    fn build(
        &self,
        config: &ConnectorConfig,
        secrets: &BTreeMap<String, String>,
        defaults: &ConnectorDefaults,
    ) -> Option<Box<dyn ToolConnector>> {
        match config.connector_type.as_str() {
            "webhook" => Some(Box::new(WebhookConnector::new(config, secrets, defaults))),
            "http" | "http_request" => {
                Some(Box::new(HttpRequestConnector::new(config, secrets, defaults)))
            }
            "mock" => Some(Box::new(MockConnector::new(config))),
            _ => None,
        }
    }
}

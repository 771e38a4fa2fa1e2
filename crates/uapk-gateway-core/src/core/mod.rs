// crates/uapk-gateway-core/src/core/mod.rs
// ============================================================================
// Module: UAPK Gateway Core Types
// Description: Canonical data model for gateway requests, policy, and audit.
// Purpose: Provide the shared vocabulary consumed by all gateway components.
// Dependencies: crate submodules
// ============================================================================

//! ## Overview
//! The core data model is intentionally explicit: requests, manifests, token
//! claims, approvals, and interaction records are typed structures with stable
//! wire forms. Only connector parameters and manifest bodies remain untyped
//! JSON, with a single normalization step producing the typed policy view.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod action;
pub mod approval;
pub mod hashing;
pub mod identifiers;
pub mod manifest;
pub mod reason;
pub mod record;
pub mod time;
pub mod token;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use action::ActionInfo;
pub use action::ActionRequest;
pub use action::CounterpartyInfo;
pub use action::GatewayDecision;
pub use approval::Approval;
pub use approval::ApprovalStatus;
pub use hashing::HashError;
pub use hashing::action_hash;
pub use hashing::canonical_json_string;
pub use hashing::canonical_json_value;
pub use hashing::hash_bytes;
pub use hashing::hash_canonical_json;
pub use identifiers::AgentId;
pub use identifiers::ApprovalId;
pub use identifiers::InteractionId;
pub use identifiers::IssuerId;
pub use identifiers::ManifestId;
pub use identifiers::TenantId;
pub use manifest::AmountCaps;
pub use manifest::ApprovalThresholds;
pub use manifest::BudgetConstraints;
pub use manifest::CounterpartyRules;
pub use manifest::ManifestRecord;
pub use manifest::ManifestStatus;
pub use manifest::NormalizedPolicy;
pub use manifest::extract_amount;
pub use manifest::extract_currency;
pub use manifest::nested_value;
pub use reason::ReasonCode;
pub use reason::ReasonDetail;
pub use reason::TraceEntry;
pub use reason::TraceOutcome;
pub use record::ChainError;
pub use record::ChainErrorKind;
pub use record::ChainReport;
pub use record::Decision;
pub use record::InteractionRecord;
pub use record::RecordHashInputs;
pub use record::compute_record_hash;
pub use record::verify_chain;
pub use time::DayStamp;
pub use time::TimeError;
pub use time::Timestamp;
pub use token::CapabilityTokenClaims;
pub use token::GATEWAY_ISSUER;
pub use token::TokenConstraints;
pub use token::TokenType;

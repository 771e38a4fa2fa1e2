// crates/uapk-gateway-cli/src/main.rs
// ============================================================================
// Module: UAPK Gateway CLI
// Description: Operator tooling for keys, tokens, and audit verification.
// Purpose: Generate keys, issue/inspect tokens, and verify audit chains.
// Dependencies: uapk-gateway-core, uapk-gateway-tokens, uapk-gateway-store-sqlite, clap
// ============================================================================

//! ## Overview
//! The CLI covers the operator flows that do not need a running gateway:
//! generating the gateway key, issuing capability and override tokens,
//! decoding a token for inspection, and verifying an audit chain from either
//! a JSON export bundle or a SQLite database.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use clap::Parser;
use clap::Subcommand;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uapk_gateway_core::ActionInfo;
use uapk_gateway_core::ChainReport;
use uapk_gateway_core::Clock;
use uapk_gateway_core::InteractionRecord;
use uapk_gateway_core::ManifestId;
use uapk_gateway_core::RecordSigner;
use uapk_gateway_core::RecordStore;
use uapk_gateway_core::SignatureVerifier;
use uapk_gateway_core::SystemClock;
use uapk_gateway_core::TenantId;
use uapk_gateway_core::TokenConstraints;
use uapk_gateway_core::action_hash;
use uapk_gateway_core::verify_chain;
use uapk_gateway_store_sqlite::SqliteGatewayStore;
use uapk_gateway_store_sqlite::SqliteStoreConfig;
use uapk_gateway_tokens::CapabilityTokenParams;
use uapk_gateway_tokens::GatewayKey;
use uapk_gateway_tokens::OVERRIDE_TOKEN_TTL_SECONDS;
use uapk_gateway_tokens::OverrideTokenParams;
use uapk_gateway_tokens::PublicKeyVerifier;
use uapk_gateway_tokens::issue_capability_token;
use uapk_gateway_tokens::issue_override_token;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// UAPK Gateway operator tooling.
#[derive(Debug, Parser)]
#[command(name = "uapk-gateway", version, about = "UAPK Gateway operator tooling")]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Generates a gateway Ed25519 key as PKCS#8 PEM.
    Keygen {
        /// Write the PEM here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Issues a capability token signed by the gateway key.
    IssueToken {
        /// Path to the gateway private key PEM.
        #[arg(long)]
        key: PathBuf,
        /// Tenant the token is bound to.
        #[arg(long)]
        org: String,
        /// Manifest the token is bound to.
        #[arg(long)]
        manifest: String,
        /// Agent the token is issued to.
        #[arg(long)]
        agent: String,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
        /// Permitted action types (repeatable).
        #[arg(long = "action-type")]
        action_types: Vec<String>,
        /// Permitted tools (repeatable).
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Maximum amount constraint.
        #[arg(long)]
        amount_max: Option<f64>,
    },
    /// Issues an override token bound to an approved action.
    IssueOverride {
        /// Path to the gateway private key PEM.
        #[arg(long)]
        key: PathBuf,
        /// Tenant the token is bound to.
        #[arg(long)]
        org: String,
        /// Manifest the token is bound to.
        #[arg(long)]
        manifest: String,
        /// Agent the token is issued to.
        #[arg(long)]
        agent: String,
        /// Approved action as inline JSON (`{"type", "tool", "params"}`).
        #[arg(long)]
        action: String,
        /// Approval row the token redeems.
        #[arg(long)]
        approval: String,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = OVERRIDE_TOKEN_TTL_SECONDS)]
        ttl: i64,
    },
    /// Decodes a compact token without verifying it.
    InspectToken {
        /// The compact token.
        token: String,
    },
    /// Verifies an audit chain from an export bundle or a database.
    VerifyChain {
        /// JSON export bundle path.
        #[arg(long, conflicts_with = "db")]
        export: Option<PathBuf>,
        /// SQLite database path.
        #[arg(long, requires = "tenant", requires = "manifest")]
        db: Option<PathBuf>,
        /// Tenant identifier (database mode).
        #[arg(long)]
        tenant: Option<String>,
        /// Manifest identifier (database mode).
        #[arg(long)]
        manifest: Option<String>,
        /// Base64 gateway public key for signature checks.
        #[arg(long)]
        public_key: Option<String>,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures surfaced to the operator.
#[derive(Debug, Error)]
enum CliError {
    /// File read/write failure.
    #[error("io error: {0}")]
    Io(String),
    /// Key loading or encoding failure.
    #[error("key error: {0}")]
    Key(String),
    /// Token issuance or decoding failure.
    #[error("token error: {0}")]
    Token(String),
    /// Input parsing failure.
    #[error("invalid input: {0}")]
    Input(String),
    /// Store access failure.
    #[error("store error: {0}")]
    Store(String),
    /// Chain verification found errors.
    #[error("audit chain invalid")]
    ChainInvalid,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(std::io::stderr(), "error: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed command.
fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Keygen {
            out,
        } => keygen(out.as_deref()),
        Command::IssueToken {
            key,
            org,
            manifest,
            agent,
            ttl,
            action_types,
            tools,
            amount_max,
        } => {
            let key = load_key(&key)?;
            let constraints = amount_max.map(|amount_max| TokenConstraints {
                amount_max: Some(amount_max),
                ..TokenConstraints::default()
            });
            let token = issue_capability_token(
                &key,
                CapabilityTokenParams {
                    org_id: org,
                    manifest_id: manifest,
                    agent_id: agent,
                    ttl_seconds: ttl,
                    allowed_action_types: action_types,
                    allowed_tools: tools,
                    constraints,
                    issued_at: SystemClock.now(),
                },
            )
            .map_err(|err| CliError::Token(err.to_string()))?;
            emit(&token)
        }
        Command::IssueOverride {
            key,
            org,
            manifest,
            agent,
            action,
            approval,
            ttl,
        } => {
            let key = load_key(&key)?;
            let action: ActionInfo = serde_json::from_str(&action)
                .map_err(|err| CliError::Input(format!("action json: {err}")))?;
            let action_hash =
                action_hash(&action).map_err(|err| CliError::Input(err.to_string()))?;
            let token = issue_override_token(
                &key,
                OverrideTokenParams {
                    org_id: org,
                    manifest_id: manifest,
                    agent_id: agent,
                    action_hash,
                    approval_id: approval,
                    ttl_seconds: ttl,
                    issued_at: SystemClock.now(),
                },
            )
            .map_err(|err| CliError::Token(err.to_string()))?;
            emit(&token)
        }
        Command::InspectToken {
            token,
        } => inspect_token(&token),
        Command::VerifyChain {
            export,
            db,
            tenant,
            manifest,
            public_key,
        } => verify_chain_command(VerifyChainArgs {
            export,
            db,
            tenant,
            manifest,
            public_key,
        }),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Generates a new gateway key.
fn keygen(out: Option<&std::path::Path>) -> Result<(), CliError> {
    let key = GatewayKey::generate();
    let pem = key.to_pkcs8_pem().map_err(|err| CliError::Key(err.to_string()))?;
    match out {
        Some(path) => {
            fs::write(path, pem).map_err(|err| CliError::Io(err.to_string()))?;
            emit(&format!("public_key: {}", key.public_key_base64()))
        }
        None => {
            emit(&pem)?;
            emit(&format!("public_key: {}", key.public_key_base64()))
        }
    }
}

/// Loads the gateway key from a PEM file.
fn load_key(path: &std::path::Path) -> Result<GatewayKey, CliError> {
    let pem = fs::read_to_string(path).map_err(|err| CliError::Io(err.to_string()))?;
    GatewayKey::from_pkcs8_pem(&pem).map_err(|err| CliError::Key(err.to_string()))
}

/// Decodes the claims segment of a compact token for inspection.
fn inspect_token(token: &str) -> Result<(), CliError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, _signature] = parts.as_slice() else {
        return Err(CliError::Token("token must have three segments".to_string()));
    };
    let header = decode_segment(header_b64)?;
    let payload = decode_segment(payload_b64)?;
    emit(&format!("header: {header}"))?;
    emit(&format!("claims: {payload}"))
}

/// Decodes one base64url JSON segment.
fn decode_segment(segment: &str) -> Result<Value, CliError> {
    let bytes = BASE64_URL
        .decode(segment)
        .map_err(|err| CliError::Token(format!("invalid segment encoding: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::Token(format!("invalid segment json: {err}")))
}

/// Verify-chain inputs after parsing.
struct VerifyChainArgs {
    /// Export bundle path.
    export: Option<PathBuf>,
    /// Database path.
    db: Option<PathBuf>,
    /// Tenant for database mode.
    tenant: Option<String>,
    /// Manifest for database mode.
    manifest: Option<String>,
    /// Base64 public key override.
    public_key: Option<String>,
}

/// Export bundle shape accepted by verify-chain.
#[derive(Debug, Deserialize)]
struct ExportBundle {
    /// Base64 gateway public key.
    #[serde(default)]
    gateway_public_key: Option<String>,
    /// Ordered chain records.
    records: Vec<InteractionRecord>,
}

/// Runs chain verification and reports every failure.
fn verify_chain_command(args: VerifyChainArgs) -> Result<(), CliError> {
    let (records, bundle_key) = if let Some(path) = args.export {
        let text = fs::read_to_string(&path).map_err(|err| CliError::Io(err.to_string()))?;
        let bundle: ExportBundle = serde_json::from_str(&text)
            .map_err(|err| CliError::Input(format!("export bundle: {err}")))?;
        (bundle.records, bundle.gateway_public_key)
    } else if let (Some(db), Some(tenant), Some(manifest)) =
        (args.db, args.tenant, args.manifest)
    {
        let store = SqliteGatewayStore::open(&SqliteStoreConfig::new(db))
            .map_err(|err| CliError::Store(err.to_string()))?;
        let records = store
            .list(&TenantId::new(tenant), &ManifestId::new(manifest))
            .map_err(|err| CliError::Store(err.to_string()))?;
        (records, None)
    } else {
        return Err(CliError::Input("pass --export or --db with --tenant/--manifest".to_string()));
    };

    let verifier = args
        .public_key
        .or(bundle_key)
        .map(|encoded| PublicKeyVerifier::from_base64(&encoded))
        .transpose()
        .map_err(|err| CliError::Key(err.to_string()))?;

    let report = verify_chain(
        &records,
        verifier.as_ref().map(|verifier| verifier as &dyn SignatureVerifier),
    );
    print_report(&report, records.len())?;
    if report.valid {
        Ok(())
    } else {
        Err(CliError::ChainInvalid)
    }
}

/// Prints a chain report.
fn print_report(report: &ChainReport, record_count: usize) -> Result<(), CliError> {
    if report.valid {
        emit(&format!("chain valid ({record_count} records)"))
    } else {
        for error in &report.errors {
            emit(&format!(
                "record {} (index {}): {}",
                error.record_id, error.index, error.message
            ))?;
        }
        emit(&format!("chain INVALID ({} errors)", report.errors.len()))
    }
}

/// Writes one line to stdout.
fn emit(line: &str) -> Result<(), CliError> {
    writeln!(std::io::stdout(), "{line}").map_err(|err| CliError::Io(err.to_string()))
}

// crates/uapk-gateway-tokens/src/keys.rs
// ============================================================================
// Module: Gateway Key Management
// Description: Ed25519 signing key loading, generation, and verification.
// Purpose: Provide the process-wide gateway key and issuer key decoding.
// Dependencies: ed25519-dalek, base64, rand
// ============================================================================

//! ## Overview
//! The gateway key signs every token and every audit record hash. In
//! production it is loaded from the `UAPK_GATEWAY_PRIVATE_KEY` environment
//! variable as PKCS#8 PEM; a file path value is accepted as a development
//! fallback. The key is read-only after initialization and handed to
//! components by reference.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use pkcs8::LineEnding;
use thiserror::Error;
use uapk_gateway_core::RecordSigner;
use uapk_gateway_core::SignatureVerifier;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable holding the gateway private key (PKCS#8 PEM).
pub const GATEWAY_PRIVATE_KEY_ENV: &str = "UAPK_GATEWAY_PRIVATE_KEY";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Key loading and decoding errors.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Environment variable is missing.
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    /// PEM decoding failed.
    #[error("invalid ed25519 private key pem: {0}")]
    InvalidPem(String),
    /// Base64 or raw key bytes are invalid.
    #[error("invalid ed25519 public key")]
    InvalidPublicKey,
    /// Key file could not be read.
    #[error("unable to read key file: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Gateway Key
// ============================================================================

/// The gateway's Ed25519 signing key.
///
/// # Invariants
/// - Read-only after construction; sharing is by reference.
#[derive(Clone)]
pub struct GatewayKey {
    /// Underlying signing key.
    signing: SigningKey,
}

impl GatewayKey {
    /// Generates a fresh key (development and tests).
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Parses a key from PKCS#8 PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidPem`] when parsing fails.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, KeyError> {
        SigningKey::from_pkcs8_pem(pem)
            .map(|signing| Self {
                signing,
            })
            .map_err(|err| KeyError::InvalidPem(err.to_string()))
    }

    /// Loads the key from [`GATEWAY_PRIVATE_KEY_ENV`].
    ///
    /// The value is PEM text in production; a path to a PEM file is accepted
    /// as a development fallback.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the variable is missing or the key is
    /// invalid.
    pub fn from_env() -> Result<Self, KeyError> {
        let value = env::var(GATEWAY_PRIVATE_KEY_ENV)
            .map_err(|_| KeyError::MissingEnv(GATEWAY_PRIVATE_KEY_ENV))?;
        if value.trim_start().starts_with("-----BEGIN") {
            return Self::from_pkcs8_pem(&value);
        }
        let path = Path::new(value.trim());
        let pem = fs::read_to_string(path).map_err(|err| KeyError::Io(err.to_string()))?;
        Self::from_pkcs8_pem(&pem)
    }

    /// Serializes the key as PKCS#8 PEM (key generation tooling).
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidPem`] when encoding fails.
    pub fn to_pkcs8_pem(&self) -> Result<String, KeyError> {
        self.signing
            .to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|err| KeyError::InvalidPem(err.to_string()))
    }

    /// Returns the verifying half of the key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for GatewayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayKey").finish_non_exhaustive()
    }
}

impl RecordSigner for GatewayKey {
    fn sign_base64(&self, message: &[u8]) -> String {
        BASE64_STANDARD.encode(self.sign(message).to_bytes())
    }

    fn public_key_base64(&self) -> String {
        BASE64_STANDARD.encode(self.verifying_key().to_bytes())
    }
}

impl SignatureVerifier for GatewayKey {
    fn verify_base64(&self, message: &[u8], signature: &str) -> bool {
        PublicKeyVerifier::new(self.verifying_key()).verify_base64(message, signature)
    }
}

// ============================================================================
// SECTION: Public Key Verifier
// ============================================================================

/// Signature verifier over a standalone Ed25519 public key.
///
/// Export bundles carry the gateway public key in base64; this wrapper lets
/// external verifiers validate chains without the private half.
#[derive(Debug, Clone)]
pub struct PublicKeyVerifier {
    /// Verifying key.
    key: VerifyingKey,
}

impl PublicKeyVerifier {
    /// Creates a verifier from a verifying key.
    #[must_use]
    pub const fn new(key: VerifyingKey) -> Self {
        Self {
            key,
        }
    }

    /// Creates a verifier from a base64 public key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidPublicKey`] when decoding fails.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        verifying_key_from_base64(encoded).map(Self::new)
    }
}

impl SignatureVerifier for PublicKeyVerifier {
    fn verify_base64(&self, message: &[u8], signature: &str) -> bool {
        let Ok(signature_bytes) = BASE64_STANDARD.decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return false;
        };
        self.key.verify_strict(message, &signature).is_ok()
    }
}

// ============================================================================
// SECTION: Key Decoding
// ============================================================================

/// Decodes a base64 Ed25519 public key.
///
/// # Errors
///
/// Returns [`KeyError::InvalidPublicKey`] when the encoding or key bytes are
/// invalid.
pub fn verifying_key_from_base64(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let bytes =
        BASE64_STANDARD.decode(encoded.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| KeyError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

//! WebAuthn module
//!
//! Interface boundary to the passkey ceremony layer.
//!
//! # Architecture
//!
//! ```text
//! LockKeyManager
//!       |
//!       v
//! WebAuthnClient (trait)
//!       |
//!       +---> platform / browser bridge (supplied by the embedding app)
//!       |
//!       +---> SoftwareAuthenticator (in-process, EdDSA credentials)
//! ```
//!
//! A ceremony that the user dismisses resolves to `Ok(None)`; failures and
//! cancellation are [`CeremonyError`]s.

mod software;

pub use software::SoftwareAuthenticator;

use crate::core_cancel::{CancelReason, CancelSignal};
use crate::core_crypto::verify_detached;
use crate::core_identity::PasskeyPublicKey;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// COSE algorithm identifier for EdDSA (Ed25519)
pub const COSE_ALG_EDDSA: i64 = -8;

/// Ceremony errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    #[error("Ceremony failed: {0}")]
    Failed(String),

    #[error("Ceremony cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("Unsupported COSE algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("Invalid ceremony response: {0}")]
    InvalidResponse(String),
}

/// User account the passkey is registered for
#[derive(Clone, PartialEq, Eq)]
pub struct UserEntity {
    /// User handle; carries the lock-key seed
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

impl fmt::Debug for UserEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserEntity")
            .field("id", &"<redacted>")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Options for a registration ceremony
#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    pub relying_party_id: String,
    pub relying_party_name: String,
    pub user: UserEntity,
    pub signal: Option<CancelSignal>,
}

/// Outcome of a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub credential_id: String,
    pub public_key: PasskeyPublicKey,
}

/// Credential mediation requirement for authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mediation {
    Silent,
    #[default]
    Optional,
    Conditional,
    Required,
}

/// Options for an authentication ceremony
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub relying_party_id: String,
    pub mediation: Mediation,
    /// Credentials the authenticator may use; empty allows any discoverable
    /// credential
    pub allow_credentials: Vec<String>,
    pub signal: Option<CancelSignal>,
}

/// Assertion returned by an authentication ceremony
#[derive(Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub credential_id: String,
    /// User handle stored at registration
    pub user_id: Vec<u8>,
    pub signature: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("credential_id", &self.credential_id)
            .field("user_id", &"<redacted>")
            .field("signature", &hex::encode(&self.signature))
            .field("authenticator_data_len", &self.authenticator_data.len())
            .field("client_data_json_len", &self.client_data_json.len())
            .finish()
    }
}

/// Outcome of a successful authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub response: AuthResponse,
}

/// Passkey ceremony client
#[async_trait]
pub trait WebAuthnClient: Send + Sync {
    /// Register a new passkey; `Ok(None)` if the user dismissed the prompt
    async fn register(
        &self,
        options: RegistrationOptions,
    ) -> Result<Option<RegistrationResult>, CeremonyError>;

    /// Authenticate with an existing passkey; `Ok(None)` if dismissed
    async fn auth(&self, options: AuthOptions) -> Result<Option<AuthResult>, CeremonyError>;

    /// Check an assertion's signature against a registered public key
    async fn verify_auth_response(
        &self,
        response: &AuthResponse,
        public_key: &PasskeyPublicKey,
    ) -> Result<bool, CeremonyError> {
        verify_assertion(response, public_key)
    }
}

/// Bytes an authenticator signs: `authenticatorData || SHA-256(clientDataJSON)`
pub fn signed_assertion_data(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(authenticator_data.len() + 32);
    signed.extend_from_slice(authenticator_data);
    signed.extend_from_slice(&Sha256::digest(client_data_json));
    signed
}

/// Verify an assertion signed by an EdDSA credential
pub fn verify_assertion(
    response: &AuthResponse,
    public_key: &PasskeyPublicKey,
) -> Result<bool, CeremonyError> {
    if public_key.algo_cose != COSE_ALG_EDDSA {
        return Err(CeremonyError::UnsupportedAlgorithm(public_key.algo_cose));
    }

    let signed = signed_assertion_data(&response.authenticator_data, &response.client_data_json);
    match verify_detached(&public_key.raw, &signed, &response.signature) {
        Ok(valid) => Ok(valid),
        Err(crate::core_crypto::CryptoError::InvalidSignatureLength { .. }) => Ok(false),
        Err(e) => Err(CeremonyError::InvalidResponse(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_entity_debug_redacts_handle() {
        let user = UserEntity {
            id: vec![0xab; 34],
            name: "alice".to_string(),
            display_name: "Alice".to_string(),
        };
        let debug_str = format!("{:?}", user);
        assert!(debug_str.contains("<redacted>"));
        assert!(!debug_str.contains("abab"));
    }

    #[test]
    fn test_verify_assertion_rejects_other_algorithms() {
        let response = AuthResponse {
            credential_id: "c".into(),
            user_id: vec![],
            signature: vec![0; 64],
            authenticator_data: vec![],
            client_data_json: vec![],
        };
        let es256 = PasskeyPublicKey {
            algo_cose: -7,
            raw: vec![4; 65],
            spki: vec![0x30; 91],
        };
        assert_eq!(
            verify_assertion(&response, &es256),
            Err(CeremonyError::UnsupportedAlgorithm(-7))
        );
    }

    #[test]
    fn test_signed_assertion_data_layout() {
        let signed = signed_assertion_data(b"auth", b"{}");
        assert_eq!(&signed[..4], b"auth");
        assert_eq!(&signed[4..], Sha256::digest(b"{}").as_slice());
    }
}

//! In-process software authenticator
//!
//! Creates EdDSA credentials, keeps them per relying party and produces
//! signed assertions, so the lock-key lifecycle can run without a platform
//! authenticator. Also scriptable: dismiss the next prompt, pick which
//! credential answers, or hold ceremonies open until they are cancelled.

use super::{
    signed_assertion_data, AuthOptions, AuthResponse, AuthResult, CeremonyError,
    RegistrationOptions, RegistrationResult, WebAuthnClient, COSE_ALG_EDDSA,
};
use crate::core_cancel::CancelSignal;
use crate::core_crypto::{generate_entropy, sign_detached, SigningKeypair, SEED_LEN};
use crate::core_identity::PasskeyPublicKey;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// DER prefix of an Ed25519 SubjectPublicKeyInfo (RFC 8410)
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Authenticator data flags: user present + user verified
const FLAGS_UP_UV: u8 = 0x05;

const CREDENTIAL_ID_LEN: usize = 16;
const CHALLENGE_LEN: usize = 32;

struct StoredCredential {
    credential_id: String,
    rp_id: String,
    user_handle: Vec<u8>,
    keypair: SigningKeypair,
    sign_count: u32,
}

#[derive(Default)]
struct AuthenticatorState {
    credentials: Vec<StoredCredential>,
    dismiss_next: bool,
    selected: Option<String>,
    tamper_next: bool,
    hold: bool,
    registrations: usize,
    assertions: usize,
}

/// Outcome of the common prelude every ceremony runs through
enum Prelude {
    Proceed,
    Dismissed,
    Hold,
}

/// Software authenticator holding EdDSA passkeys in memory
///
/// Clones share the same credentials and script.
#[derive(Clone, Default)]
pub struct SoftwareAuthenticator {
    state: Arc<Mutex<AuthenticatorState>>,
}

impl SoftwareAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AuthenticatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next ceremony behaves as if the user dismissed the prompt
    pub fn dismiss_next(&self) {
        self.lock().dismiss_next = true;
    }

    /// The next authentication answers with `credential_id` when allowed
    pub fn select_credential(&self, credential_id: impl Into<String>) {
        self.lock().selected = Some(credential_id.into());
    }

    /// The next assertion carries a corrupted signature
    pub fn tamper_next_signature(&self) {
        self.lock().tamper_next = true;
    }

    /// While set, ceremonies wait until their signal is cancelled
    pub fn hold_until_cancelled(&self, hold: bool) {
        self.lock().hold = hold;
    }

    /// Credential IDs registered for `rp_id`, oldest first
    pub fn credential_ids(&self, rp_id: &str) -> Vec<String> {
        self.lock()
            .credentials
            .iter()
            .filter(|c| c.rp_id == rp_id)
            .map(|c| c.credential_id.clone())
            .collect()
    }

    /// Delete a credential, as a user would from their device
    pub fn forget_credential(&self, credential_id: &str) -> bool {
        let mut state = self.lock();
        let before = state.credentials.len();
        state.credentials.retain(|c| c.credential_id != credential_id);
        state.credentials.len() != before
    }

    /// Completed registrations
    pub fn registration_count(&self) -> usize {
        self.lock().registrations
    }

    /// Completed assertions
    pub fn assertion_count(&self) -> usize {
        self.lock().assertions
    }

    fn prelude(&self, signal: Option<&CancelSignal>) -> Result<Prelude, CeremonyError> {
        if let Some(reason) = signal.and_then(CancelSignal::reason) {
            return Err(CeremonyError::Cancelled(reason));
        }
        let mut state = self.lock();
        if state.hold {
            return Ok(Prelude::Hold);
        }
        if std::mem::take(&mut state.dismiss_next) {
            return Ok(Prelude::Dismissed);
        }
        Ok(Prelude::Proceed)
    }

    async fn held(signal: Option<&CancelSignal>) -> CeremonyError {
        match signal {
            Some(signal) => CeremonyError::Cancelled(signal.cancelled().await),
            None => CeremonyError::Failed("Ceremony held open without a cancel signal".to_string()),
        }
    }
}

#[async_trait]
impl WebAuthnClient for SoftwareAuthenticator {
    async fn register(
        &self,
        options: RegistrationOptions,
    ) -> Result<Option<RegistrationResult>, CeremonyError> {
        match self.prelude(options.signal.as_ref())? {
            Prelude::Proceed => {}
            Prelude::Dismissed => return Ok(None),
            Prelude::Hold => return Err(Self::held(options.signal.as_ref()).await),
        }

        let keypair = SigningKeypair::from_seed(&generate_entropy(SEED_LEN))
            .map_err(|e| CeremonyError::Failed(e.to_string()))?;
        let credential_id = URL_SAFE_NO_PAD.encode(generate_entropy(CREDENTIAL_ID_LEN));

        let raw = keypair.public_key().to_vec();
        let mut spki = ED25519_SPKI_PREFIX.to_vec();
        spki.extend_from_slice(&raw);

        let mut state = self.lock();
        state.credentials.push(StoredCredential {
            credential_id: credential_id.clone(),
            rp_id: options.relying_party_id.clone(),
            user_handle: options.user.id.clone(),
            keypair,
            sign_count: 0,
        });
        state.registrations += 1;
        debug!(
            rp_id = %options.relying_party_id,
            user = %options.user.name,
            credential_id = %credential_id,
            "Software authenticator registered credential"
        );

        Ok(Some(RegistrationResult {
            credential_id,
            public_key: PasskeyPublicKey {
                algo_cose: COSE_ALG_EDDSA,
                raw,
                spki,
            },
        }))
    }

    async fn auth(&self, options: AuthOptions) -> Result<Option<AuthResult>, CeremonyError> {
        match self.prelude(options.signal.as_ref())? {
            Prelude::Proceed => {}
            Prelude::Dismissed => return Ok(None),
            Prelude::Hold => return Err(Self::held(options.signal.as_ref()).await),
        }

        let mut state = self.lock();
        let selected = state.selected.take();
        let tamper = std::mem::take(&mut state.tamper_next);

        let allowed = |c: &StoredCredential| {
            c.rp_id == options.relying_party_id
                && (options.allow_credentials.is_empty()
                    || options.allow_credentials.contains(&c.credential_id))
        };
        let chosen = selected
            .and_then(|id| {
                state
                    .credentials
                    .iter()
                    .position(|c| c.credential_id == id && allowed(c))
            })
            .or_else(|| state.credentials.iter().rposition(|c| allowed(c)));

        let index = chosen.ok_or_else(|| {
            CeremonyError::Failed("No matching credential on this authenticator".to_string())
        })?;

        let client_data_json = serde_json::json!({
            "type": "webauthn.get",
            "challenge": URL_SAFE_NO_PAD.encode(generate_entropy(CHALLENGE_LEN)),
            "origin": format!("https://{}", options.relying_party_id),
        })
        .to_string()
        .into_bytes();

        let credential = &mut state.credentials[index];
        credential.sign_count = credential.sign_count.wrapping_add(1);

        let mut authenticator_data = Sha256::digest(credential.rp_id.as_bytes()).to_vec();
        authenticator_data.push(FLAGS_UP_UV);
        authenticator_data.extend_from_slice(&credential.sign_count.to_be_bytes());

        let signed = signed_assertion_data(&authenticator_data, &client_data_json);
        let mut signature = sign_detached(credential.keypair.secret_key(), &signed)
            .map_err(|e| CeremonyError::Failed(e.to_string()))?;
        if tamper {
            signature[0] ^= 0x01;
        }

        let response = AuthResponse {
            credential_id: credential.credential_id.clone(),
            user_id: credential.user_handle.clone(),
            signature: signature.to_vec(),
            authenticator_data,
            client_data_json,
        };
        state.assertions += 1;
        debug!(credential_id = %response.credential_id, "Software authenticator produced assertion");

        Ok(Some(AuthResult { response }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_cancel::{CancelController, CancelReason};
    use crate::core_webauthn::{Mediation, UserEntity};

    const RP: &str = "example.test";

    fn reg_options(handle: &[u8]) -> RegistrationOptions {
        RegistrationOptions {
            relying_party_id: RP.to_string(),
            relying_party_name: "Example".to_string(),
            user: UserEntity {
                id: handle.to_vec(),
                name: "alice".to_string(),
                display_name: "Alice".to_string(),
            },
            signal: None,
        }
    }

    fn auth_options(allow: Vec<String>) -> AuthOptions {
        AuthOptions {
            relying_party_id: RP.to_string(),
            mediation: Mediation::Optional,
            allow_credentials: allow,
            signal: None,
        }
    }

    #[tokio::test]
    async fn test_register_then_auth_verifies() {
        let authenticator = SoftwareAuthenticator::new();
        let reg = authenticator
            .register(reg_options(b"handle"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reg.public_key.algo_cose, COSE_ALG_EDDSA);
        assert_eq!(reg.public_key.spki.len(), 44);

        let result = authenticator.auth(auth_options(vec![])).await.unwrap().unwrap();
        assert_eq!(result.response.credential_id, reg.credential_id);
        assert_eq!(result.response.user_id, b"handle");

        assert!(authenticator
            .verify_auth_response(&result.response, &reg.public_key)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_tampered_assertion_fails_verification() {
        let authenticator = SoftwareAuthenticator::new();
        let reg = authenticator.register(reg_options(b"h")).await.unwrap().unwrap();
        let mut response = authenticator
            .auth(auth_options(vec![]))
            .await
            .unwrap()
            .unwrap()
            .response;
        response.client_data_json.push(b' ');

        assert!(!authenticator
            .verify_auth_response(&response, &reg.public_key)
            .await
            .unwrap());

        authenticator.tamper_next_signature();
        let tampered = authenticator.auth(auth_options(vec![])).await.unwrap().unwrap();
        assert!(!authenticator
            .verify_auth_response(&tampered.response, &reg.public_key)
            .await
            .unwrap());

        // Only the next assertion is affected
        let clean = authenticator.auth(auth_options(vec![])).await.unwrap().unwrap();
        assert!(authenticator
            .verify_auth_response(&clean.response, &reg.public_key)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_allow_list_and_selection() {
        let authenticator = SoftwareAuthenticator::new();
        let first = authenticator.register(reg_options(b"1")).await.unwrap().unwrap();
        let second = authenticator.register(reg_options(b"2")).await.unwrap().unwrap();

        // Most recent credential answers by default
        let result = authenticator.auth(auth_options(vec![])).await.unwrap().unwrap();
        assert_eq!(result.response.credential_id, second.credential_id);

        // Allow list restricts the choice
        let result = authenticator
            .auth(auth_options(vec![first.credential_id.clone()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.response.user_id, b"1");

        // Explicit selection
        authenticator.select_credential(first.credential_id.clone());
        let result = authenticator.auth(auth_options(vec![])).await.unwrap().unwrap();
        assert_eq!(result.response.credential_id, first.credential_id);

        // Nothing allowed
        let err = authenticator
            .auth(auth_options(vec!["missing".to_string()]))
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Failed(_)));
    }

    #[tokio::test]
    async fn test_dismiss_next() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.dismiss_next();
        assert!(authenticator.register(reg_options(b"h")).await.unwrap().is_none());
        assert!(authenticator.register(reg_options(b"h")).await.unwrap().is_some());
        assert_eq!(authenticator.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_hold_until_cancelled() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.hold_until_cancelled(true);

        let controller = CancelController::new();
        let mut options = reg_options(b"h");
        options.signal = Some(controller.signal());

        let pending = {
            let authenticator = authenticator.clone();
            tokio::spawn(async move { authenticator.register(options).await })
        };
        tokio::task::yield_now().await;
        controller.cancel(CancelReason::Requested("closed".into()));

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            CeremonyError::Cancelled(CancelReason::Requested("closed".into()))
        );
        assert_eq!(authenticator.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_signal_fails_fast() {
        let authenticator = SoftwareAuthenticator::new();
        let controller = CancelController::new();
        controller.cancel(CancelReason::TimedOut);

        let mut options = auth_options(vec![]);
        options.signal = Some(controller.signal());
        assert_eq!(
            authenticator.auth(options).await.unwrap_err(),
            CeremonyError::Cancelled(CancelReason::TimedOut)
        );
    }
}

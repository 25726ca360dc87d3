//! A software authenticator, for tests and tooling.
//!
//! Produces the same responses a platform authenticator would, signed with a
//! key held in memory.

use presence_crypto::{CredentialSigner, CryptoError, Ed25519Signer, P256Signer};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::data::{
    encode_b64url, AttestedCredential, AuthenticationOptions, AuthenticationResponse,
    AuthenticatorData, ClientData, RegistrationOptions, RegistrationResponse, FLAG_AT, FLAG_UP,
    FLAG_UV,
};

/// In-memory authenticator holding one credential.
pub struct SoftwareAuthenticator {
    signer: Box<dyn CredentialSigner + Send + Sync>,
    credential_id: Vec<u8>,
    origin: String,
    /// Next counter value to report.
    pub counter: u32,
    /// Counter step per assertion. Zero models authenticators without a
    /// counter.
    pub counter_step: u32,
    /// Whether to set the user-verified flag.
    pub user_verified: bool,
}

impl SoftwareAuthenticator {
    /// ES256 authenticator for pages served from `origin`.
    #[must_use]
    pub fn es256(origin: &str) -> Self {
        Self::with_signer(Box::new(P256Signer::random()), origin)
    }

    /// Ed25519 authenticator for pages served from `origin`.
    #[must_use]
    pub fn ed25519(origin: &str) -> Self {
        Self::with_signer(Box::new(Ed25519Signer::random()), origin)
    }

    fn with_signer(signer: Box<dyn CredentialSigner + Send + Sync>, origin: &str) -> Self {
        let mut id = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut id);
        Self {
            signer,
            credential_id: id,
            origin: origin.to_string(),
            counter: 0,
            counter_step: 1,
            user_verified: true,
        }
    }

    /// Credential id, base64url.
    #[must_use]
    pub fn credential_id(&self) -> String {
        encode_b64url(&self.credential_id)
    }

    fn flags(&self) -> u8 {
        if self.user_verified {
            FLAG_UP | FLAG_UV
        } else {
            FLAG_UP
        }
    }

    fn client_data(&self, kind: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&ClientData {
            kind: kind.into(),
            challenge: challenge.into(),
            origin: self.origin.clone(),
            cross_origin: false,
        })
        .unwrap_or_default()
    }

    /// Create the credential for `options`.
    pub fn register(
        &mut self,
        options: &RegistrationOptions,
    ) -> Result<RegistrationResponse, CryptoError> {
        let client_data = self.client_data("webauthn.create", &options.challenge);
        let auth_data = AuthenticatorData {
            rp_id_hash: Sha256::digest(options.rp.id.as_bytes()).into(),
            flags: self.flags() | FLAG_AT,
            sign_count: self.counter,
            attested: Some(AttestedCredential {
                aaguid: [0u8; 16],
                credential_id: self.credential_id.clone(),
            }),
        };

        Ok(RegistrationResponse {
            id: self.credential_id(),
            client_data_json: encode_b64url(&client_data),
            authenticator_data: encode_b64url(&auth_data.to_bytes()),
            public_key: encode_b64url(&self.signer.public_key()?),
            public_key_algorithm: self.signer.algorithm().cose_id(),
        })
    }

    /// Sign an assertion for `options`, advancing the counter.
    pub fn authenticate(
        &mut self,
        options: &AuthenticationOptions,
    ) -> Result<AuthenticationResponse, CryptoError> {
        self.counter = self.counter.wrapping_add(self.counter_step);
        self.assert_with_counter(&options.rp_id, &options.challenge, self.counter)
    }

    /// Sign an assertion reporting an explicit counter value.
    pub fn assert_with_counter(
        &self,
        rp_id: &str,
        challenge: &str,
        counter: u32,
    ) -> Result<AuthenticationResponse, CryptoError> {
        let client_data = self.client_data("webauthn.get", challenge);
        let auth_data = AuthenticatorData {
            rp_id_hash: Sha256::digest(rp_id.as_bytes()).into(),
            flags: self.flags(),
            sign_count: counter,
            attested: None,
        }
        .to_bytes();

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&client_data));

        Ok(AuthenticationResponse {
            id: self.credential_id(),
            client_data_json: encode_b64url(&client_data),
            authenticator_data: encode_b64url(&auth_data),
            signature: encode_b64url(&self.signer.sign(&signed)?),
            user_handle: None,
        })
    }
}

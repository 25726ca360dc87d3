//! Ceremony wire types and the client/authenticator data formats.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CeremonyError;

/// User present.
pub const FLAG_UP: u8 = 0x01;
/// User verified.
pub const FLAG_UV: u8 = 0x04;
/// Attested credential data included.
pub const FLAG_AT: u8 = 0x40;

/// Relying party identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    /// RP id (registrable domain).
    pub id: String,
    /// Display name.
    pub name: String,
}

/// User entity sent at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Opaque user handle, base64url.
    pub id: String,
    /// Account name.
    pub name: String,
    /// Display name.
    pub display_name: String,
}

/// One acceptable algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    /// Always `"public-key"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// COSE algorithm number.
    pub alg: i64,
}

/// A credential reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    /// Always `"public-key"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Credential id, base64url.
    pub id: String,
}

impl CredentialDescriptor {
    /// Descriptor for a credential id.
    #[must_use]
    pub fn public_key(id: &str) -> Self {
        Self {
            kind: "public-key".into(),
            id: id.to_string(),
        }
    }
}

/// Authenticator requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    /// `"platform"`: the credential stays on the enrolled device.
    pub authenticator_attachment: String,
    /// `"required"` or `"preferred"`.
    pub user_verification: String,
    /// `"discouraged"`.
    pub resident_key: String,
}

/// Parameters returned by `register/begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    /// Challenge, base64url.
    pub challenge: String,
    /// Relying party.
    pub rp: RelyingParty,
    /// User.
    pub user: UserEntity,
    /// Algorithms, most preferred first.
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    /// Client timeout hint, milliseconds.
    pub timeout: u64,
    /// Credentials the authenticator must not re-register.
    pub exclude_credentials: Vec<CredentialDescriptor>,
    /// Authenticator requirements.
    pub authenticator_selection: AuthenticatorSelection,
    /// Attestation conveyance.
    pub attestation: String,
}

/// Parameters returned by `authenticate/begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    /// Challenge, base64url.
    pub challenge: String,
    /// Relying party id.
    pub rp_id: String,
    /// Acceptable credentials.
    pub allow_credentials: Vec<CredentialDescriptor>,
    /// Client timeout hint, milliseconds.
    pub timeout: u64,
    /// `"required"` or `"preferred"`.
    pub user_verification: String,
}

/// Registration result from the client. Binary fields are base64url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    /// New credential id.
    pub id: String,
    /// Raw client data JSON.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Authenticator data.
    pub authenticator_data: String,
    /// Public key (SPKI DER, SEC1 or raw Ed25519).
    pub public_key: String,
    /// COSE algorithm of the key.
    pub public_key_algorithm: i64,
}

/// Authentication result from the client. Binary fields are base64url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    /// Credential id used.
    pub id: String,
    /// Raw client data JSON.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// Authenticator data.
    pub authenticator_data: String,
    /// Signature over `authenticatorData || SHA-256(clientDataJSON)`.
    pub signature: String,
    /// User handle, if the authenticator returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// A failure the client reported instead of a response.
///
/// `name` is the DOMException name raised by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFailure {
    /// DOMException name.
    pub name: String,
    /// Message.
    #[serde(default)]
    pub message: String,
}

impl ClientFailure {
    /// Ceremony error this failure maps to.
    #[must_use]
    pub fn to_error(&self) -> CeremonyError {
        match self.name.as_str() {
            "NotAllowedError" => CeremonyError::Cancelled,
            "TimeoutError" | "AbortError" => CeremonyError::Timeout,
            "NotSupportedError" | "SecurityError" => CeremonyError::Unsupported {
                reason: self.message.clone(),
            },
            "InvalidStateError" => CeremonyError::CredentialExists,
            _ => CeremonyError::MalformedResponse {
                reason: format!("{}: {}", self.name, self.message),
            },
        }
    }
}

/// Either the authenticator's response or the client's failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientResult<T> {
    /// Ceremony completed on the client.
    Completed(T),
    /// Ceremony failed on the client.
    Failed(ClientFailure),
}

/// Decoded `clientDataJSON`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    /// `webauthn.create` or `webauthn.get`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Challenge, base64url.
    pub challenge: String,
    /// Origin of the calling page.
    pub origin: String,
    /// Whether the call came from a cross-origin iframe.
    #[serde(default)]
    pub cross_origin: bool,
}

impl ClientData {
    /// Parse raw client data JSON.
    pub fn parse(raw: &[u8]) -> Result<Self, CeremonyError> {
        serde_json::from_slice(raw).map_err(|e| CeremonyError::MalformedResponse {
            reason: format!("clientDataJSON: {e}"),
        })
    }
}

/// Credential data present when the AT flag is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    /// Authenticator model.
    pub aaguid: [u8; 16],
    /// Credential id.
    pub credential_id: Vec<u8>,
}

/// Parsed authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    /// SHA-256 of the RP id.
    pub rp_id_hash: [u8; 32],
    /// Flags byte.
    pub flags: u8,
    /// Signature counter.
    pub sign_count: u32,
    /// Attested credential data.
    pub attested: Option<AttestedCredential>,
}

impl AuthenticatorData {
    /// Parse authenticator data.
    ///
    /// Layout: rpIdHash (32) | flags (1) | signCount (4, big endian)
    /// [| aaguid (16) | credIdLen (2) | credId | public key].
    pub fn parse(raw: &[u8]) -> Result<Self, CeremonyError> {
        let malformed = |reason: &str| CeremonyError::MalformedResponse {
            reason: format!("authenticatorData: {reason}"),
        };

        if raw.len() < 37 {
            return Err(malformed("shorter than 37 bytes"));
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&raw[..32]);
        let flags = raw[32];
        let sign_count = u32::from_be_bytes([raw[33], raw[34], raw[35], raw[36]]);

        let attested = if flags & FLAG_AT != 0 {
            let rest = &raw[37..];
            if rest.len() < 18 {
                return Err(malformed("truncated attested credential data"));
            }
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(&rest[..16]);
            let id_len = usize::from(u16::from_be_bytes([rest[16], rest[17]]));
            let credential_id = rest
                .get(18..18 + id_len)
                .ok_or_else(|| malformed("credential id overruns data"))?
                .to_vec();
            Some(AttestedCredential {
                aaguid,
                credential_id,
            })
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
        })
    }

    /// User-present flag.
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    /// User-verified flag.
    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_UV != 0
    }

    /// Encode, as an authenticator would.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(self.flags);
        out.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(attested) = &self.attested {
            out.extend_from_slice(&attested.aaguid);
            out.extend_from_slice(&(attested.credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(&attested.credential_id);
        }
        out
    }
}

/// Decode a base64url field, tolerating padding.
pub fn decode_b64url(field: &str, value: &str) -> Result<Vec<u8>, CeremonyError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| CeremonyError::MalformedResponse {
            reason: format!("{field}: {e}"),
        })
}

/// Encode bytes as base64url without padding.
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

//! Algorithm identifiers.

use serde::{Deserialize, Serialize};

/// Public-key algorithm, identified by its COSE algorithm number.
///
/// The numeric value is what appears in `pubKeyCredParams` during
/// registration and in the stored credential record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CoseAlgorithm {
    /// ECDSA with NIST P-256 and SHA-256.
    Es256,
    /// Ed25519.
    EdDsa,
}

impl CoseAlgorithm {
    /// Algorithms offered at registration, most preferred first.
    pub const PREFERRED: [CoseAlgorithm; 2] = [CoseAlgorithm::Es256, CoseAlgorithm::EdDsa];

    /// COSE algorithm number.
    #[must_use]
    pub const fn cose_id(&self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::EdDsa => -8,
        }
    }

    /// Parse a COSE algorithm number.
    #[must_use]
    pub const fn from_cose_id(id: i64) -> Option<Self> {
        match id {
            -7 => Some(Self::Es256),
            -8 => Some(Self::EdDsa),
            _ => None,
        }
    }

    /// Short algorithm name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::EdDsa => "EdDSA",
        }
    }
}

impl TryFrom<i64> for CoseAlgorithm {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::from_cose_id(value).ok_or_else(|| format!("unsupported COSE algorithm {value}"))
    }
}

impl From<CoseAlgorithm> for i64 {
    fn from(value: CoseAlgorithm) -> Self {
        value.cose_id()
    }
}

impl std::fmt::Display for CoseAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

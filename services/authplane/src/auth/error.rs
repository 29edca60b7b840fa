//! Failures produced while authenticating a request or resolving its tenant.
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token expired")]
    ExpiredToken,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("unknown signing key")]
    UnknownKey,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("tenant not found")]
    TenantNotFound,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl AuthError {
    /// Stable label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::ExpiredToken => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownKey => "unknown_key",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::Malformed(_) => "malformed",
            Self::TenantNotFound => "tenant_not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::ExpiredToken,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::InvalidAlgorithm => Self::UnsupportedAlgorithm,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

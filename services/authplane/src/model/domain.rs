//! Tenant domain records.
//!
//! # Purpose
//! Maps host names to tenants. Only verified, unexpired domains may be used
//! for tenant resolution.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct TenantDomain {
    /// Lower-case host name, unique across all tenants.
    pub domain: String,
    pub tenant_id: String,
    pub is_custom: bool,
    pub verified: bool,
    pub ssl_enabled: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TenantDomain {
    /// Whether this row may route requests at `now`.
    pub fn resolves_at(&self, now: DateTime<Utc>) -> bool {
        self.verified && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Normalize a host name for storage and lookup: lower-case, no port, no
/// trailing dot.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

//! Verified token claims.
//!
//! # Purpose
//! Per-request value object produced by the token validator after signature,
//! issuer and time checks succeed. It is never persisted.
//!
//! # Key invariants
//! - `permissions` holds only entries that were `true` in the token's
//!   permission map; it is advisory and never consulted for authorization.
use crate::types::TenantId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    pub subject: String,
    pub issuer: String,
    /// Expiry as Unix seconds.
    pub expires_at: i64,
    pub realm_roles: BTreeSet<String>,
    pub client_roles: BTreeMap<String, BTreeSet<String>>,
    pub tenant_id: Option<TenantId>,
    pub permissions: BTreeSet<String>,
}

impl TokenClaims {
    pub fn has_realm_role(&self, role: &str) -> bool {
        self.realm_roles.contains(role)
    }

    pub fn has_client_role(&self, client: &str, role: &str) -> bool {
        self.client_roles
            .get(client)
            .is_some_and(|roles| roles.contains(role))
    }

    /// True only when the token carries a tenant claim equal to `tenant`.
    pub fn is_issued_for(&self, tenant: &TenantId) -> bool {
        self.tenant_id.as_ref() == Some(tenant)
    }
}

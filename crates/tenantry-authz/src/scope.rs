//! Role scope: system-wide or owned by a single tenant.
//!
//! # Purpose
//! Replaces the "nullable owning tenant + is_system flag" pair with a tagged
//! variant so the rule "system roles are stored under the sentinel domain" is
//! an explicit match arm rather than a null check.
//!
//! # Examples
//! ```rust
//! use tenantry_authz::{RoleScope, TenantId, SYSTEM_DOMAIN};
//!
//! let scope = RoleScope::Tenant { tenant_id: TenantId::new("acme") };
//! assert_eq!(scope.domain(), "acme");
//! assert_eq!(RoleScope::System.domain(), SYSTEM_DOMAIN);
//! ```
use crate::casbin_model::SYSTEM_DOMAIN;
use crate::types::TenantId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoleScope {
    /// Platform-defined role with no owning tenant. Cannot be deleted.
    System,
    /// Role owned by exactly one tenant.
    Tenant {
        #[schema(value_type = String)]
        tenant_id: TenantId,
    },
}

impl RoleScope {
    pub fn tenant(tenant_id: TenantId) -> Self {
        Self::Tenant { tenant_id }
    }

    /// Policy domain that grants for this scope are stored under.
    pub fn domain(&self) -> &str {
        match self {
            Self::System => SYSTEM_DOMAIN,
            Self::Tenant { tenant_id } => tenant_id.as_str(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        match self {
            Self::System => None,
            Self::Tenant { tenant_id } => Some(tenant_id),
        }
    }

    /// Whether a role with this scope may be used inside `tenant`.
    pub fn usable_in(&self, tenant: &TenantId) -> bool {
        match self {
            Self::System => true,
            Self::Tenant { tenant_id } => tenant_id == tenant,
        }
    }

    /// Rebuild a scope from its storage columns (`owning tenant`, `is_system`).
    pub fn from_columns(tenant_id: Option<String>, is_system: bool) -> Option<Self> {
        match (tenant_id, is_system) {
            (None, true) => Some(Self::System),
            (Some(tenant_id), false) => Some(Self::Tenant {
                tenant_id: TenantId::new(tenant_id),
            }),
            _ => None,
        }
    }
}

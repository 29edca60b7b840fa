//! Strongly typed tenant identifier and Casbin subject helpers.
//!
//! # Purpose
//! Wraps tenant identifiers so they are not confused with user or role ids,
//! and centralizes the `user:` / `role:` subject prefixes used in policy
//! tuples.
//!
//! # Key invariants
//! - A parsed [`TenantId`] is a lower-case DNS label (`[a-z0-9-]`, 1–63 chars,
//!   no leading or trailing hyphen) and is never the reserved `system` domain.
//! - [`TenantId::new`] performs no validation; use it only for values that
//!   come from trusted storage or are compared, never used as a policy domain.
//!
//! # Examples
//! ```rust
//! use tenantry_authz::TenantId;
//!
//! let tenant = TenantId::parse("acme").expect("valid slug");
//! assert_eq!(tenant.as_str(), "acme");
//! assert!(TenantId::parse("system").is_err());
//! assert!(TenantId::parse("Not A Slug").is_err());
//! ```
use crate::casbin_model::SYSTEM_DOMAIN;
use crate::errors::{AuthzError, AuthzResult};
use serde::{Deserialize, Serialize};

const USER_PREFIX: &str = "user:";
const ROLE_PREFIX: &str = "role:";
const MAX_SLUG_LEN: usize = 63;

/// Tenant identifier wrapper.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wrap a tenant id without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Validate and wrap a tenant slug.
    ///
    /// # Errors
    /// - [`AuthzError::InvalidTenantId`] if the value is not a DNS label or is
    ///   the reserved system domain.
    pub fn parse(value: &str) -> AuthzResult<Self> {
        if !is_dns_label(value) || value == SYSTEM_DOMAIN {
            return Err(AuthzError::InvalidTenantId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Return true if `value` is a single lower-case DNS label.
pub fn is_dns_label(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_SLUG_LEN {
        return false;
    }
    if value.starts_with('-') || value.ends_with('-') {
        return false;
    }
    value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Casbin subject for a user id.
pub fn user_subject(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

/// Casbin subject for a role id.
pub fn role_subject(role_id: &str) -> String {
    format!("{ROLE_PREFIX}{role_id}")
}

/// Strip the `role:` prefix, if present.
pub fn role_id_from_subject(subject: &str) -> Option<&str> {
    subject.strip_prefix(ROLE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_label_rules() {
        assert!(is_dns_label("t1"));
        assert!(is_dns_label("acme-corp"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-acme"));
        assert!(!is_dns_label("acme-"));
        assert!(!is_dns_label("Acme"));
        assert!(!is_dns_label("a.b"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn subjects_are_prefixed() {
        assert_eq!(user_subject("u1"), "user:u1");
        assert_eq!(role_subject("r1"), "role:r1");
        assert_eq!(role_id_from_subject("role:r1"), Some("r1"));
        assert_eq!(role_id_from_subject("user:u1"), None);
    }

    #[test]
    fn parse_rejects_reserved_domain() {
        let err = TenantId::parse(SYSTEM_DOMAIN).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidTenantId(_)));
        assert_eq!(TenantId::parse("t1").expect("tenant").to_string(), "t1");
    }
}

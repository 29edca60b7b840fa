//! Tenantry authorization primitives shared by the authplane service and its
//! tests.
//!
//! # Purpose
//! Centralizes the Casbin model with tenant domains, the role scope variant,
//! the flat policy/grouping tuples, verified token claims, and the TTL cache
//! used for key material and tenant-domain lookups.
//!
//! # Key invariants
//! - Policy tuples are `(subject, domain, object, action)` with exact object
//!   and action matching.
//! - System-role grants live under [`SYSTEM_DOMAIN`]; role assignments are
//!   always scoped to a real tenant.
//! - Subjects are prefixed: `user:{id}` and `role:{id}`.
//!
//! # Examples
//! ```rust
//! use tenantry_authz::{GroupingRule, PolicyRule, RoleScope, TenantId};
//!
//! let tenant = TenantId::parse("acme").expect("slug");
//! let grant = PolicyRule::for_role("editor", &RoleScope::tenant(tenant.clone()), "doc", "write");
//! let assignment = GroupingRule::assignment("alice", "editor", &tenant);
//! assert_eq!(grant.subject, assignment.role);
//! ```

mod cache;
mod casbin_model;
mod claims;
mod errors;
mod policy;
mod scope;
mod types;

pub use cache::TtlCache;
pub use casbin_model::{SYSTEM_DOMAIN, casbin_model, casbin_model_string};
pub use claims::TokenClaims;
pub use errors::{AuthzError, AuthzResult};
pub use policy::{GroupingRule, PolicyRule};
pub use scope::RoleScope;
pub use types::{TenantId, is_dns_label, role_id_from_subject, role_subject, user_subject};

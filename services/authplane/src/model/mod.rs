//! Authplane data model module.
//!
//! # Purpose
//! Re-exports the relational records the authorization layer reads: tenants,
//! domains, roles, permissions and user-role assignments.
mod domain;
mod role;
mod tenant;
mod user_role;

pub use domain::{TenantDomain, normalize_host};
pub use role::{Permission, Role};
pub use tenant::{Tenant, TenantStatus};
pub use user_role::{AssignmentStatus, UserRole};

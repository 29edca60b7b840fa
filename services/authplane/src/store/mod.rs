//! Storage traits for the relational source of truth and the policy tuples.
//!
//! # Purpose
//! [`DirectoryStore`] holds tenants, domains, roles, permissions and user-role
//! assignments. [`PolicyStore`] holds the flat Casbin projection that seeds the
//! in-memory enforcer at startup. Both are implemented by the in-memory and
//! Postgres backends.
//!
//! # Key invariants
//! - Domain strings are unique across all tenants.
//! - Role names are unique per scope; system roles cannot be deleted.
//! - `(user, role, tenant)` assignments are unique.
//! - Policy tuple writes are idempotent: adding an existing tuple or removing
//!   a missing one succeeds.
use crate::model::{AssignmentStatus, Permission, Role, Tenant, TenantDomain, UserRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tenantry_authz::{GroupingRule, PolicyRule, RoleScope};
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("protected: {0}")]
    Protected(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            other => StoreError::Unexpected(other.into()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant>;
    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Tenant>;
    async fn tenant_exists(&self, tenant_id: &str) -> StoreResult<bool>;

    async fn add_domain(&self, domain: TenantDomain) -> StoreResult<TenantDomain>;
    async fn find_domain(&self, domain: &str) -> StoreResult<Option<TenantDomain>>;
    async fn list_domains(&self, tenant_id: &str) -> StoreResult<Vec<TenantDomain>>;
    /// Mark verified and clear the verification token and its deadline.
    async fn mark_domain_verified(
        &self,
        domain: &str,
        verified_at: DateTime<Utc>,
    ) -> StoreResult<TenantDomain>;
    async fn delete_domain(&self, domain: &str) -> StoreResult<()>;

    async fn create_role(&self, role: Role) -> StoreResult<Role>;
    async fn get_role(&self, role_id: &str) -> StoreResult<Role>;
    async fn find_role_by_name(&self, scope: &RoleScope, name: &str) -> StoreResult<Option<Role>>;
    /// Roles owned by `tenant_id` plus every system role.
    async fn list_roles(&self, tenant_id: &str) -> StoreResult<Vec<Role>>;
    async fn list_all_roles(&self) -> StoreResult<Vec<Role>>;
    /// Delete a tenant role with its permission links and assignments.
    async fn delete_role(&self, role_id: &str) -> StoreResult<()>;

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission>;
    async fn get_permission(&self, permission_id: &str) -> StoreResult<Permission>;
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>>;
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()>;
    async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()>;
    async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>>;

    async fn upsert_user_role(&self, user_role: UserRole) -> StoreResult<UserRole>;
    async fn set_user_role_status(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
        status: AssignmentStatus,
    ) -> StoreResult<UserRole>;
    /// Returns whether an assignment was removed.
    async fn delete_user_role(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool>;
    async fn list_user_roles(&self, user_id: &str) -> StoreResult<Vec<UserRole>>;
    async fn list_all_user_roles(&self) -> StoreResult<Vec<UserRole>>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_policies(&self) -> StoreResult<Vec<PolicyRule>>;
    async fn load_groupings(&self) -> StoreResult<Vec<GroupingRule>>;

    async fn add_policy(&self, rule: &PolicyRule) -> StoreResult<()>;
    async fn remove_policy(&self, rule: &PolicyRule) -> StoreResult<()>;
    async fn add_grouping(&self, rule: &GroupingRule) -> StoreResult<()>;
    async fn remove_grouping(&self, rule: &GroupingRule) -> StoreResult<()>;

    /// Replace every policy whose subject is `subject` with `rules`.
    async fn replace_subject_policies(&self, subject: &str, rules: &[PolicyRule])
    -> StoreResult<()>;
    /// Replace every grouping whose user is `user` with `rules`.
    async fn replace_user_groupings(&self, user: &str, rules: &[GroupingRule]) -> StoreResult<()>;
    /// Drop the policies of `role` and every grouping that references it.
    async fn remove_role_rules(&self, role: &str) -> StoreResult<()>;
    async fn replace_all(
        &self,
        policies: &[PolicyRule],
        groupings: &[GroupingRule],
    ) -> StoreResult<()>;
}

/// Both store surfaces behind one object, as held by the HTTP state.
pub trait AuthplaneStore: DirectoryStore + PolicyStore {}

impl<T> AuthplaneStore for T where T: DirectoryStore + PolicyStore {}

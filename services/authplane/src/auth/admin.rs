//! Tenant-scoped administration of roles, assignments and custom domains.
//!
//! # Purpose
//! Every mutation here writes the relational directory first and then re-projects the
//! affected subject through the [`Synchronizer`], so decisions follow the directory on the
//! very next request. Domain mutations invalidate the resolver cache entry they touch.
//!
//! # Key invariants
//! - A tenant only sees and edits roles it owns; system roles are readable but never
//!   editable, deletable or assignable from a tenant. Only [`AccessAdmin::provision_role`]
//!   hands them out.
//! - Roles owned by another tenant are reported as missing.
//! - Nobody grants what they do not hold: assigning or reactivating a role, and attaching
//!   a permission to one, require the acting user to hold every permission involved in
//!   the same tenant.
//! - A domain is verified only when its challenge URL serves the verification token.
//!   Tokens are compared in constant time and expire.
use crate::auth::challenge::DomainChallenge;
use crate::auth::rbac::{AuthorizationEngine, EngineError, Synchronizer};
use crate::auth::tenant::TenantResolver;
use crate::model::{AssignmentStatus, Permission, Role, TenantDomain, UserRole, normalize_host};
use crate::store::{DirectoryStore, StoreError};
use chrono::{TimeDelta, Utc};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use std::collections::BTreeSet;
use tenantry_authz::{RoleScope, TenantId, is_dns_label};
use thiserror::Error;

const VERIFICATION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("protected: {0}")]
    Protected(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("verification expired")]
    Expired,
    #[error("store: {0}")]
    Store(anyhow::Error),
    #[error("engine: {0}")]
    Engine(EngineError),
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Conflict(what) => Self::Conflict(what),
            StoreError::Protected(what) => Self::Protected(what),
            StoreError::Unexpected(err) => Self::Store(err),
        }
    }
}

impl From<EngineError> for AdminError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Store(err) => err.into(),
            other => Self::Engine(other),
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

#[derive(Clone)]
pub struct AccessAdmin {
    directory: Arc<dyn DirectoryStore>,
    engine: Arc<AuthorizationEngine>,
    synchronizer: Synchronizer,
    resolver: TenantResolver,
    challenge: DomainChallenge,
    verification_ttl: TimeDelta,
}

impl AccessAdmin {
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        synchronizer: Synchronizer,
        resolver: TenantResolver,
        challenge: DomainChallenge,
        verification_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            engine: Arc::clone(synchronizer.engine()),
            synchronizer,
            resolver,
            challenge,
            verification_ttl: TimeDelta::from_std(verification_ttl).unwrap_or(TimeDelta::days(7)),
        }
    }

    /// Roles owned by `tenant` plus every system role.
    pub async fn list_roles(&self, tenant: &TenantId) -> AdminResult<Vec<Role>> {
        Ok(self.directory.list_roles(tenant.as_str()).await?)
    }

    pub async fn create_role(
        &self,
        tenant: &TenantId,
        name: &str,
        description: &str,
    ) -> AdminResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdminError::Invalid("role name is required".into()));
        }
        let role = Role::new(name, description, RoleScope::tenant(tenant.clone()));
        let role = self.directory.create_role(role).await?;
        tracing::info!(tenant = %tenant, role_id = %role.role_id, "role created");
        Ok(role)
    }

    pub async fn delete_role(&self, tenant: &TenantId, role_id: &str) -> AdminResult<()> {
        let role = self.visible_role(tenant, role_id).await?;
        if role.is_system() {
            return Err(AdminError::Protected("system roles cannot be deleted".into()));
        }
        self.directory.delete_role(role_id).await?;
        self.engine.remove_role(role_id).await?;
        tracing::info!(tenant = %tenant, role_id, "role deleted");
        Ok(())
    }

    pub async fn list_role_permissions(
        &self,
        tenant: &TenantId,
        role_id: &str,
    ) -> AdminResult<Vec<Permission>> {
        self.visible_role(tenant, role_id).await?;
        Ok(self.directory.list_role_permissions(role_id).await?)
    }

    /// Attach a permission, given by id or by name, to a tenant role.
    ///
    /// # Errors
    /// - [`AdminError::Protected`] for system roles, or when `actor` does not hold the
    ///   permission in `tenant`.
    pub async fn grant_role_permission(
        &self,
        tenant: &TenantId,
        actor: &str,
        role_id: &str,
        permission: &str,
    ) -> AdminResult<Permission> {
        self.editable_role(tenant, role_id).await?;
        let permission = self.find_permission(permission).await?;
        self.ensure_held(tenant, actor, [permission_key(&permission)])
            .await?;
        self.directory
            .attach_permission(role_id, &permission.permission_id)
            .await?;
        self.synchronizer.sync_role_permissions(role_id).await?;
        Ok(permission)
    }

    pub async fn revoke_role_permission(
        &self,
        tenant: &TenantId,
        role_id: &str,
        permission: &str,
    ) -> AdminResult<()> {
        self.editable_role(tenant, role_id).await?;
        let permission = self.find_permission(permission).await?;
        self.directory
            .detach_permission(role_id, &permission.permission_id)
            .await?;
        self.synchronizer.sync_role_permissions(role_id).await?;
        Ok(())
    }

    /// Assign a tenant role on behalf of `actor`.
    ///
    /// # Errors
    /// - [`AdminError::Protected`] for system roles, or when the role carries a permission
    ///   `actor` does not hold in `tenant`.
    /// - [`AdminError::NotFound`] when the role is not visible in `tenant`.
    pub async fn assign_role(
        &self,
        tenant: &TenantId,
        actor: &str,
        user_id: &str,
        role_id: &str,
    ) -> AdminResult<UserRole> {
        if user_id.trim().is_empty() {
            return Err(AdminError::Invalid("user id is required".into()));
        }
        let role = self.grantable_role(tenant, actor, role_id).await?;
        self.write_assignment(tenant, user_id, &role).await
    }

    /// Assign any role visible in `tenant`, system roles included, without an acting user.
    ///
    /// Reserved to platform administration and bootstrap.
    pub async fn provision_role(
        &self,
        tenant: &TenantId,
        user_id: &str,
        role_id: &str,
    ) -> AdminResult<UserRole> {
        if user_id.trim().is_empty() {
            return Err(AdminError::Invalid("user id is required".into()));
        }
        if !self.directory.tenant_exists(tenant.as_str()).await? {
            return Err(AdminError::NotFound("tenant".into()));
        }
        let role = self.visible_role(tenant, role_id).await?;
        self.write_assignment(tenant, user_id, &role).await
    }

    async fn write_assignment(
        &self,
        tenant: &TenantId,
        user_id: &str,
        role: &Role,
    ) -> AdminResult<UserRole> {
        let assignment = self
            .directory
            .upsert_user_role(UserRole::active(user_id, &role.role_id, tenant.as_str()))
            .await?;
        self.synchronizer.sync_user_roles(user_id).await?;
        tracing::info!(tenant = %tenant, user_id, role_id = %role.role_id, "role assigned");
        Ok(assignment)
    }

    pub async fn revoke_role(
        &self,
        tenant: &TenantId,
        user_id: &str,
        role_id: &str,
    ) -> AdminResult<()> {
        if !self
            .directory
            .delete_user_role(user_id, role_id, tenant.as_str())
            .await?
        {
            return Err(AdminError::NotFound("assignment".into()));
        }
        self.synchronizer.sync_user_roles(user_id).await?;
        tracing::info!(tenant = %tenant, user_id, role_id, "role revoked");
        Ok(())
    }

    /// Suspend or reactivate an assignment on behalf of `actor`.
    ///
    /// # Errors
    /// - [`AdminError::Protected`] for system roles; reactivation also requires `actor` to
    ///   hold every permission of the role.
    pub async fn set_assignment_status(
        &self,
        tenant: &TenantId,
        actor: &str,
        user_id: &str,
        role_id: &str,
        status: AssignmentStatus,
    ) -> AdminResult<UserRole> {
        match status {
            AssignmentStatus::Active => {
                self.grantable_role(tenant, actor, role_id).await?;
            }
            AssignmentStatus::Suspended => {
                self.assignable_role(tenant, role_id).await?;
            }
        }
        let assignment = self
            .directory
            .set_user_role_status(user_id, role_id, tenant.as_str(), status)
            .await?;
        self.synchronizer.sync_user_roles(user_id).await?;
        tracing::info!(
            tenant = %tenant,
            user_id,
            role_id,
            status = status.as_str(),
            "assignment status changed"
        );
        Ok(assignment)
    }

    pub async fn list_domains(&self, tenant: &TenantId) -> AdminResult<Vec<TenantDomain>> {
        Ok(self.directory.list_domains(tenant.as_str()).await?)
    }

    /// Register an unverified custom domain. The returned record carries the
    /// verification token; it is not readable afterwards.
    pub async fn add_domain(&self, tenant: &TenantId, domain: &str) -> AdminResult<TenantDomain> {
        let domain = normalize_host(domain);
        if !is_valid_host(&domain) {
            return Err(AdminError::Invalid("domain is not a valid host name".into()));
        }
        let platform = self.resolver.platform_domain();
        if domain == platform || domain.ends_with(&format!(".{platform}")) {
            return Err(AdminError::Invalid(
                "platform subdomains cannot be registered".into(),
            ));
        }
        let record = TenantDomain {
            domain: domain.clone(),
            tenant_id: tenant.as_str().to_string(),
            is_custom: true,
            verified: false,
            ssl_enabled: false,
            verification_token: Some(verification_token()),
            verified_at: None,
            expires_at: Some(Utc::now() + self.verification_ttl),
        };
        let record = self.directory.add_domain(record).await?;
        self.resolver.invalidate(&domain);
        tracing::info!(tenant = %tenant, domain = %domain, "custom domain added");
        Ok(record)
    }

    /// Where `domain` must publish its verification token.
    pub fn challenge_url(&self, domain: &str) -> String {
        self.challenge.url_for(&normalize_host(domain))
    }

    /// Verify a pending domain by fetching the token it publishes at its challenge URL.
    ///
    /// # Errors
    /// - [`AdminError::Invalid`] when the challenge cannot be fetched or does not carry the
    ///   expected token.
    /// - [`AdminError::Expired`] once the verification window has elapsed.
    pub async fn verify_domain(
        &self,
        tenant: &TenantId,
        domain: &str,
    ) -> AdminResult<TenantDomain> {
        let domain = normalize_host(domain);
        let record = self.owned_domain(tenant, &domain).await?;
        if record.verified {
            return Ok(record);
        }
        if record
            .expires_at
            .is_some_and(|deadline| deadline <= Utc::now())
        {
            return Err(AdminError::Expired);
        }
        let Some(expected) = record.verification_token.as_deref() else {
            return Err(AdminError::Invalid("domain has no pending verification".into()));
        };
        let published = match self.challenge.published_token(&domain).await {
            Ok(published) => published,
            Err(err) => {
                tracing::warn!(tenant = %tenant, domain = %domain, error = %err, "domain challenge fetch failed");
                return Err(AdminError::Invalid(format!("domain challenge: {err}")));
            }
        };
        if !bool::from(expected.as_bytes().ct_eq(published.as_bytes())) {
            tracing::warn!(tenant = %tenant, domain = %domain, "domain challenge token mismatch");
            return Err(AdminError::Invalid(
                "domain challenge does not carry the verification token".into(),
            ));
        }
        let record = self
            .directory
            .mark_domain_verified(&domain, Utc::now())
            .await?;
        self.resolver.invalidate(&domain);
        tracing::info!(tenant = %tenant, domain = %domain, "custom domain verified");
        Ok(record)
    }

    pub async fn remove_domain(&self, tenant: &TenantId, domain: &str) -> AdminResult<()> {
        let domain = normalize_host(domain);
        self.owned_domain(tenant, &domain).await?;
        self.directory.delete_domain(&domain).await?;
        self.resolver.invalidate(&domain);
        tracing::info!(tenant = %tenant, domain = %domain, "custom domain removed");
        Ok(())
    }

    async fn visible_role(&self, tenant: &TenantId, role_id: &str) -> AdminResult<Role> {
        match self.directory.get_role(role_id).await {
            Ok(role) if role.scope.usable_in(tenant) => Ok(role),
            Ok(_) | Err(StoreError::NotFound(_)) => Err(AdminError::NotFound("role".into())),
            Err(err) => Err(err.into()),
        }
    }

    /// A role a tenant may assign: visible and not system-scoped.
    async fn assignable_role(&self, tenant: &TenantId, role_id: &str) -> AdminResult<Role> {
        let role = self.visible_role(tenant, role_id).await?;
        if role.is_system() {
            return Err(AdminError::Protected(
                "system roles are assigned by platform administrators".into(),
            ));
        }
        Ok(role)
    }

    /// An assignable role whose every permission `actor` already holds in `tenant`.
    async fn grantable_role(
        &self,
        tenant: &TenantId,
        actor: &str,
        role_id: &str,
    ) -> AdminResult<Role> {
        let role = self.assignable_role(tenant, role_id).await?;
        let permissions = self.directory.list_role_permissions(role_id).await?;
        self.ensure_held(tenant, actor, permissions.iter().map(permission_key))
            .await?;
        Ok(role)
    }

    async fn ensure_held(
        &self,
        tenant: &TenantId,
        actor: &str,
        required: impl IntoIterator<Item = String>,
    ) -> AdminResult<()> {
        let held = self.engine.user_permissions(actor, tenant).await;
        let missing: BTreeSet<String> = required
            .into_iter()
            .filter(|permission| !held.contains(permission))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        tracing::warn!(tenant = %tenant, actor, ?missing, "grant beyond caller permissions refused");
        Err(AdminError::Protected(
            "cannot grant permissions the caller does not hold".into(),
        ))
    }

    async fn editable_role(&self, tenant: &TenantId, role_id: &str) -> AdminResult<Role> {
        let role = self.visible_role(tenant, role_id).await?;
        if role.is_system() {
            return Err(AdminError::Protected(
                "system roles cannot be edited by a tenant".into(),
            ));
        }
        Ok(role)
    }

    async fn find_permission(&self, reference: &str) -> AdminResult<Permission> {
        match self.directory.get_permission(reference).await {
            Ok(permission) => Ok(permission),
            Err(StoreError::NotFound(_)) => self
                .directory
                .find_permission_by_name(reference)
                .await?
                .ok_or_else(|| AdminError::NotFound("permission".into())),
            Err(err) => Err(err.into()),
        }
    }

    async fn owned_domain(&self, tenant: &TenantId, domain: &str) -> AdminResult<TenantDomain> {
        match self.directory.find_domain(domain).await? {
            Some(record) if record.tenant_id == tenant.as_str() => Ok(record),
            _ => Err(AdminError::NotFound("domain".into())),
        }
    }
}

fn permission_key(permission: &Permission) -> String {
    format!("{}:{}", permission.resource, permission.action)
}

fn is_valid_host(host: &str) -> bool {
    host.len() <= 253 && host.contains('.') && host.split('.').all(is_dns_label)
}

fn verification_token() -> String {
    let mut bytes = [0u8; VERIFICATION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

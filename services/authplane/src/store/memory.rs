//! In-memory implementation of the directory and policy stores.
//!
//! # Purpose
//! This store implements [`DirectoryStore`] and [`PolicyStore`] entirely in memory using
//! collections guarded by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - single-instance deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: write locks for mutations, read locks for reads.
//! - Locks are always taken in the order tenants → domains → roles → permissions →
//!   role_permissions → user_roles, so cascades cannot deadlock.
//!
//! # Performance characteristics
//! Cascades and per-tenant listings scan the maps; acceptable for dev workloads.
use super::{DirectoryStore, PolicyStore, StoreError, StoreResult};
use crate::model::{AssignmentStatus, Permission, Role, Tenant, TenantDomain, UserRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tenantry_authz::{GroupingRule, PolicyRule, RoleScope};
use tokio::sync::RwLock;

type AssignmentKey = (String, String, String);

/// In-memory authplane store.
///
/// All collections are wrapped in `Arc<RwLock<...>>` so the store can be cloned and
/// shared across handlers, reads proceed concurrently and writes are serialized.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
    domains: Arc<RwLock<HashMap<String, TenantDomain>>>,
    roles: Arc<RwLock<HashMap<String, Role>>>,
    permissions: Arc<RwLock<HashMap<String, Permission>>>,
    /// Role id → attached permission ids.
    role_permissions: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    /// `(user, role, tenant)` → assignment.
    user_roles: Arc<RwLock<HashMap<AssignmentKey, UserRole>>>,
    rbac_policies: Arc<RwLock<BTreeSet<PolicyRule>>>,
    rbac_groupings: Arc<RwLock<BTreeSet<GroupingRule>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn assignment_key(user_id: &str, role_id: &str, tenant_id: &str) -> AssignmentKey {
    (
        user_id.to_string(),
        role_id.to_string(),
        tenant_id.to_string(),
    )
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(&tenant.tenant_id) {
            return Err(StoreError::Conflict("tenant exists".into()));
        }
        tenants.insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Tenant> {
        self.tenants
            .read()
            .await
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("tenant".into()))
    }

    async fn tenant_exists(&self, tenant_id: &str) -> StoreResult<bool> {
        Ok(self.tenants.read().await.contains_key(tenant_id))
    }

    async fn add_domain(&self, domain: TenantDomain) -> StoreResult<TenantDomain> {
        if !self.tenants.read().await.contains_key(&domain.tenant_id) {
            return Err(StoreError::NotFound("tenant".into()));
        }
        let mut domains = self.domains.write().await;
        if domains.contains_key(&domain.domain) {
            return Err(StoreError::Conflict("domain exists".into()));
        }
        domains.insert(domain.domain.clone(), domain.clone());
        Ok(domain)
    }

    async fn find_domain(&self, domain: &str) -> StoreResult<Option<TenantDomain>> {
        Ok(self.domains.read().await.get(domain).cloned())
    }

    async fn list_domains(&self, tenant_id: &str) -> StoreResult<Vec<TenantDomain>> {
        let mut items: Vec<TenantDomain> = self
            .domains
            .read()
            .await
            .values()
            .filter(|domain| domain.tenant_id == tenant_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(items)
    }

    async fn mark_domain_verified(
        &self,
        domain: &str,
        verified_at: DateTime<Utc>,
    ) -> StoreResult<TenantDomain> {
        let mut domains = self.domains.write().await;
        let entry = domains
            .get_mut(domain)
            .ok_or_else(|| StoreError::NotFound("domain".into()))?;
        entry.verified = true;
        entry.verified_at = Some(verified_at);
        entry.verification_token = None;
        entry.expires_at = None;
        Ok(entry.clone())
    }

    async fn delete_domain(&self, domain: &str) -> StoreResult<()> {
        if self.domains.write().await.remove(domain).is_none() {
            return Err(StoreError::NotFound("domain".into()));
        }
        Ok(())
    }

    async fn create_role(&self, role: Role) -> StoreResult<Role> {
        if let Some(tenant_id) = role.scope.tenant_id()
            && !self.tenants.read().await.contains_key(tenant_id.as_str())
        {
            return Err(StoreError::NotFound("tenant".into()));
        }
        let mut roles = self.roles.write().await;
        if roles.contains_key(&role.role_id) {
            return Err(StoreError::Conflict("role exists".into()));
        }
        if roles
            .values()
            .any(|existing| existing.scope == role.scope && existing.name == role.name)
        {
            return Err(StoreError::Conflict("role name exists".into()));
        }
        roles.insert(role.role_id.clone(), role.clone());
        Ok(role)
    }

    async fn get_role(&self, role_id: &str) -> StoreResult<Role> {
        self.roles
            .read()
            .await
            .get(role_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("role".into()))
    }

    async fn find_role_by_name(&self, scope: &RoleScope, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .roles
            .read()
            .await
            .values()
            .find(|role| &role.scope == scope && role.name == name)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: &str) -> StoreResult<Vec<Role>> {
        let mut items: Vec<Role> = self
            .roles
            .read()
            .await
            .values()
            .filter(|role| match role.scope.tenant_id() {
                None => true,
                Some(owner) => owner.as_str() == tenant_id,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn list_all_roles(&self) -> StoreResult<Vec<Role>> {
        Ok(self.roles.read().await.values().cloned().collect())
    }

    async fn delete_role(&self, role_id: &str) -> StoreResult<()> {
        let mut roles = self.roles.write().await;
        match roles.get(role_id) {
            None => return Err(StoreError::NotFound("role".into())),
            Some(role) if role.is_system() => {
                return Err(StoreError::Protected("system role".into()));
            }
            Some(_) => {}
        }
        roles.remove(role_id);
        self.role_permissions.write().await.remove(role_id);
        self.user_roles
            .write()
            .await
            .retain(|_, assignment| assignment.role_id != role_id);
        Ok(())
    }

    async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
        let mut permissions = self.permissions.write().await;
        if permissions.contains_key(&permission.permission_id)
            || permissions
                .values()
                .any(|existing| existing.name == permission.name)
        {
            return Err(StoreError::Conflict("permission exists".into()));
        }
        permissions.insert(permission.permission_id.clone(), permission.clone());
        Ok(permission)
    }

    async fn get_permission(&self, permission_id: &str) -> StoreResult<Permission> {
        self.permissions
            .read()
            .await
            .get(permission_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("permission".into()))
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
        Ok(self
            .permissions
            .read()
            .await
            .values()
            .find(|permission| permission.name == name)
            .cloned())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let mut items: Vec<Permission> =
            self.permissions.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        if !self.roles.read().await.contains_key(role_id) {
            return Err(StoreError::NotFound("role".into()));
        }
        if !self.permissions.read().await.contains_key(permission_id) {
            return Err(StoreError::NotFound("permission".into()));
        }
        self.role_permissions
            .write()
            .await
            .entry(role_id.to_string())
            .or_default()
            .insert(permission_id.to_string());
        Ok(())
    }

    async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
        if let Some(attached) = self.role_permissions.write().await.get_mut(role_id) {
            attached.remove(permission_id);
        }
        Ok(())
    }

    async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>> {
        let permissions = self.permissions.read().await;
        let role_permissions = self.role_permissions.read().await;
        let mut items: Vec<Permission> = role_permissions
            .get(role_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| permissions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn upsert_user_role(&self, user_role: UserRole) -> StoreResult<UserRole> {
        if !self.tenants.read().await.contains_key(&user_role.tenant_id) {
            return Err(StoreError::NotFound("tenant".into()));
        }
        if !self.roles.read().await.contains_key(&user_role.role_id) {
            return Err(StoreError::NotFound("role".into()));
        }
        let key = assignment_key(&user_role.user_id, &user_role.role_id, &user_role.tenant_id);
        self.user_roles
            .write()
            .await
            .insert(key, user_role.clone());
        Ok(user_role)
    }

    async fn set_user_role_status(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
        status: AssignmentStatus,
    ) -> StoreResult<UserRole> {
        let mut user_roles = self.user_roles.write().await;
        let entry = user_roles
            .get_mut(&assignment_key(user_id, role_id, tenant_id))
            .ok_or_else(|| StoreError::NotFound("user role".into()))?;
        entry.status = status;
        Ok(entry.clone())
    }

    async fn delete_user_role(
        &self,
        user_id: &str,
        role_id: &str,
        tenant_id: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .user_roles
            .write()
            .await
            .remove(&assignment_key(user_id, role_id, tenant_id))
            .is_some())
    }

    async fn list_user_roles(&self, user_id: &str) -> StoreResult<Vec<UserRole>> {
        Ok(self
            .user_roles
            .read()
            .await
            .values()
            .filter(|assignment| assignment.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_all_user_roles(&self) -> StoreResult<Vec<UserRole>> {
        Ok(self.user_roles.read().await.values().cloned().collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        // In-memory backend is always "healthy" if the process is running.
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn load_policies(&self) -> StoreResult<Vec<PolicyRule>> {
        Ok(self.rbac_policies.read().await.iter().cloned().collect())
    }

    async fn load_groupings(&self) -> StoreResult<Vec<GroupingRule>> {
        Ok(self.rbac_groupings.read().await.iter().cloned().collect())
    }

    async fn add_policy(&self, rule: &PolicyRule) -> StoreResult<()> {
        self.rbac_policies.write().await.insert(rule.clone());
        Ok(())
    }

    async fn remove_policy(&self, rule: &PolicyRule) -> StoreResult<()> {
        self.rbac_policies.write().await.remove(rule);
        Ok(())
    }

    async fn add_grouping(&self, rule: &GroupingRule) -> StoreResult<()> {
        self.rbac_groupings.write().await.insert(rule.clone());
        Ok(())
    }

    async fn remove_grouping(&self, rule: &GroupingRule) -> StoreResult<()> {
        self.rbac_groupings.write().await.remove(rule);
        Ok(())
    }

    async fn replace_subject_policies(
        &self,
        subject: &str,
        rules: &[PolicyRule],
    ) -> StoreResult<()> {
        let mut policies = self.rbac_policies.write().await;
        policies.retain(|rule| rule.subject != subject);
        policies.extend(rules.iter().cloned());
        Ok(())
    }

    async fn replace_user_groupings(&self, user: &str, rules: &[GroupingRule]) -> StoreResult<()> {
        let mut groupings = self.rbac_groupings.write().await;
        groupings.retain(|rule| rule.user != user);
        groupings.extend(rules.iter().cloned());
        Ok(())
    }

    async fn remove_role_rules(&self, role: &str) -> StoreResult<()> {
        self.rbac_policies
            .write()
            .await
            .retain(|rule| rule.subject != role);
        self.rbac_groupings
            .write()
            .await
            .retain(|rule| rule.role != role);
        Ok(())
    }

    async fn replace_all(
        &self,
        policies: &[PolicyRule],
        groupings: &[GroupingRule],
    ) -> StoreResult<()> {
        let mut stored_policies = self.rbac_policies.write().await;
        let mut stored_groupings = self.rbac_groupings.write().await;
        *stored_policies = policies.iter().cloned().collect();
        *stored_groupings = groupings.iter().cloned().collect();
        Ok(())
    }
}

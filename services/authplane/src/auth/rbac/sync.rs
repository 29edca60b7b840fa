//! Reconciles the relational directory into the authorization engine.
//!
//! # Purpose
//! Policy and grouping tuples are a projection of roles, permissions and user-role
//! assignments. The synchronizer rebuilds that projection for one user, one role, or
//! everything, and hands the result to the engine as a single replacement.
//!
//! # Key invariants
//! - Only active assignments whose role exists and is usable in the assignment's tenant
//!   are projected.
//! - A role that no longer exists projects to the empty set.
//! - Repeated syncs over unchanged data produce identical tuples.
//! - Syncs of the same user or role run one at a time from directory read to engine apply,
//!   so a later directory state is never overwritten by an earlier snapshot. A full
//!   reconciliation excludes every keyed sync.
use crate::auth::rbac::engine::{AuthorizationEngine, EngineResult};
use crate::model::{Role, UserRole};
use crate::store::{DirectoryStore, StoreError};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tenantry_authz::{GroupingRule, PolicyRule, TenantId};
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncReport {
    pub policies: usize,
    pub groupings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SyncKey {
    User(String),
    Role(String),
}

#[derive(Default)]
struct SyncLocks {
    all: RwLock<()>,
    keyed: DashMap<SyncKey, Arc<Mutex<()>>>,
}

#[derive(Clone)]
pub struct Synchronizer {
    directory: Arc<dyn DirectoryStore>,
    engine: Arc<AuthorizationEngine>,
    locks: Arc<SyncLocks>,
}

impl Synchronizer {
    pub fn new(directory: Arc<dyn DirectoryStore>, engine: Arc<AuthorizationEngine>) -> Self {
        Self {
            directory,
            engine,
            locks: Arc::default(),
        }
    }

    pub fn engine(&self) -> &Arc<AuthorizationEngine> {
        &self.engine
    }

    /// Rebuild every grouping of `user_id` from its active assignments.
    pub async fn sync_user_roles(&self, user_id: &str) -> EngineResult<usize> {
        self.serialized(SyncKey::User(user_id.to_string()), self.apply_user_roles(user_id))
            .await
    }

    /// Rebuild every grant of `role_id` from its attached permissions.
    pub async fn sync_role_permissions(&self, role_id: &str) -> EngineResult<usize> {
        self.serialized(SyncKey::Role(role_id.to_string()), self.apply_role_permissions(role_id))
            .await
    }

    /// Rebuild the whole projection.
    pub async fn sync_all(&self) -> EngineResult<SyncReport> {
        let _exclusive = self.locks.all.write().await;
        self.apply_all().await
    }

    async fn serialized<T>(&self, key: SyncKey, work: impl Future<Output = T>) -> T {
        let _shared = self.locks.all.read().await;
        let lock = self.locks.keyed.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            work.await
        };
        drop(lock);
        self.locks
            .keyed
            .remove_if(&key, |_, lock| Arc::strong_count(lock) <= 1);
        result
    }

    async fn apply_user_roles(&self, user_id: &str) -> EngineResult<usize> {
        let assignments = self.directory.list_user_roles(user_id).await?;
        let mut roles = HashMap::new();
        for assignment in &assignments {
            if roles.contains_key(&assignment.role_id) {
                continue;
            }
            match self.directory.get_role(&assignment.role_id).await {
                Ok(role) => {
                    roles.insert(assignment.role_id.clone(), role);
                }
                Err(StoreError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        let rules = groupings_for(&assignments, &roles);
        let count = rules.len();
        self.engine.replace_user_groupings(user_id, rules).await?;
        tracing::debug!(user_id, groupings = count, "synced user roles");
        Ok(count)
    }

    async fn apply_role_permissions(&self, role_id: &str) -> EngineResult<usize> {
        let role = match self.directory.get_role(role_id).await {
            Ok(role) => role,
            Err(StoreError::NotFound(_)) => {
                self.engine.replace_role_policies(role_id, Vec::new()).await?;
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        let rules = self.policies_for(&role).await?;
        let count = rules.len();
        self.engine.replace_role_policies(role_id, rules).await?;
        tracing::debug!(role_id, policies = count, "synced role permissions");
        Ok(count)
    }

    async fn apply_all(&self) -> EngineResult<SyncReport> {
        let roles = self.directory.list_all_roles().await?;
        let mut policies = Vec::new();
        for role in &roles {
            policies.extend(self.policies_for(role).await?);
        }
        let assignments = self.directory.list_all_user_roles().await?;
        let by_id: HashMap<String, Role> = roles
            .into_iter()
            .map(|role| (role.role_id.clone(), role))
            .collect();
        let groupings = groupings_for(&assignments, &by_id);
        let report = SyncReport {
            policies: policies.len(),
            groupings: groupings.len(),
        };
        self.engine.replace_all(policies, groupings).await?;
        tracing::info!(
            policies = report.policies,
            groupings = report.groupings,
            "reconciled authorization policy"
        );
        Ok(report)
    }

    async fn policies_for(&self, role: &Role) -> EngineResult<Vec<PolicyRule>> {
        let permissions = self.directory.list_role_permissions(&role.role_id).await?;
        let mut rules: Vec<PolicyRule> = permissions
            .iter()
            .map(|permission| {
                PolicyRule::for_role(
                    &role.role_id,
                    &role.scope,
                    &permission.resource,
                    &permission.action,
                )
            })
            .collect();
        rules.sort();
        rules.dedup();
        Ok(rules)
    }
}

fn groupings_for(assignments: &[UserRole], roles: &HashMap<String, Role>) -> Vec<GroupingRule> {
    let mut rules: Vec<GroupingRule> = assignments
        .iter()
        .filter(|assignment| assignment.is_active())
        .filter_map(|assignment| {
            let role = roles.get(&assignment.role_id)?;
            let tenant = TenantId::new(assignment.tenant_id.clone());
            role.scope.usable_in(&tenant).then(|| {
                GroupingRule::assignment(&assignment.user_id, &assignment.role_id, &tenant)
            })
        })
        .collect();
    rules.sort();
    rules.dedup();
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssignmentStatus, Permission, Tenant, TenantDomain, TenantStatus};
    use crate::store::memory::InMemoryStore;
    use crate::store::{PolicyStore, StoreResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;
    use tenantry_authz::RoleScope;
    use tokio::sync::oneshot;

    type Gate = (oneshot::Sender<()>, oneshot::Receiver<()>);

    /// Directory whose first `list_user_roles` holds its snapshot until released.
    struct PausingDirectory {
        inner: Arc<InMemoryStore>,
        gate: std::sync::Mutex<Option<Gate>>,
    }

    #[async_trait]
    impl DirectoryStore for PausingDirectory {
        async fn create_tenant(&self, tenant: Tenant) -> StoreResult<Tenant> {
            self.inner.create_tenant(tenant).await
        }
        async fn get_tenant(&self, tenant_id: &str) -> StoreResult<Tenant> {
            self.inner.get_tenant(tenant_id).await
        }
        async fn tenant_exists(&self, tenant_id: &str) -> StoreResult<bool> {
            self.inner.tenant_exists(tenant_id).await
        }
        async fn add_domain(&self, domain: TenantDomain) -> StoreResult<TenantDomain> {
            self.inner.add_domain(domain).await
        }
        async fn find_domain(&self, domain: &str) -> StoreResult<Option<TenantDomain>> {
            self.inner.find_domain(domain).await
        }
        async fn list_domains(&self, tenant_id: &str) -> StoreResult<Vec<TenantDomain>> {
            self.inner.list_domains(tenant_id).await
        }
        async fn mark_domain_verified(
            &self,
            domain: &str,
            verified_at: DateTime<Utc>,
        ) -> StoreResult<TenantDomain> {
            self.inner.mark_domain_verified(domain, verified_at).await
        }
        async fn delete_domain(&self, domain: &str) -> StoreResult<()> {
            self.inner.delete_domain(domain).await
        }
        async fn create_role(&self, role: Role) -> StoreResult<Role> {
            self.inner.create_role(role).await
        }
        async fn get_role(&self, role_id: &str) -> StoreResult<Role> {
            self.inner.get_role(role_id).await
        }
        async fn find_role_by_name(
            &self,
            scope: &RoleScope,
            name: &str,
        ) -> StoreResult<Option<Role>> {
            self.inner.find_role_by_name(scope, name).await
        }
        async fn list_roles(&self, tenant_id: &str) -> StoreResult<Vec<Role>> {
            self.inner.list_roles(tenant_id).await
        }
        async fn list_all_roles(&self) -> StoreResult<Vec<Role>> {
            self.inner.list_all_roles().await
        }
        async fn delete_role(&self, role_id: &str) -> StoreResult<()> {
            self.inner.delete_role(role_id).await
        }
        async fn create_permission(&self, permission: Permission) -> StoreResult<Permission> {
            self.inner.create_permission(permission).await
        }
        async fn get_permission(&self, permission_id: &str) -> StoreResult<Permission> {
            self.inner.get_permission(permission_id).await
        }
        async fn find_permission_by_name(&self, name: &str) -> StoreResult<Option<Permission>> {
            self.inner.find_permission_by_name(name).await
        }
        async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
            self.inner.list_permissions().await
        }
        async fn attach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
            self.inner.attach_permission(role_id, permission_id).await
        }
        async fn detach_permission(&self, role_id: &str, permission_id: &str) -> StoreResult<()> {
            self.inner.detach_permission(role_id, permission_id).await
        }
        async fn list_role_permissions(&self, role_id: &str) -> StoreResult<Vec<Permission>> {
            self.inner.list_role_permissions(role_id).await
        }
        async fn upsert_user_role(&self, user_role: UserRole) -> StoreResult<UserRole> {
            self.inner.upsert_user_role(user_role).await
        }
        async fn set_user_role_status(
            &self,
            user_id: &str,
            role_id: &str,
            tenant_id: &str,
            status: AssignmentStatus,
        ) -> StoreResult<UserRole> {
            self.inner
                .set_user_role_status(user_id, role_id, tenant_id, status)
                .await
        }
        async fn delete_user_role(
            &self,
            user_id: &str,
            role_id: &str,
            tenant_id: &str,
        ) -> StoreResult<bool> {
            self.inner.delete_user_role(user_id, role_id, tenant_id).await
        }
        async fn list_user_roles(&self, user_id: &str) -> StoreResult<Vec<UserRole>> {
            let rows = self.inner.list_user_roles(user_id).await?;
            let gate = self.gate.lock().expect("gate").take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.await;
            }
            Ok(rows)
        }
        async fn list_all_user_roles(&self) -> StoreResult<Vec<UserRole>> {
            self.inner.list_all_user_roles().await
        }
        async fn health_check(&self) -> StoreResult<()> {
            self.inner.health_check().await
        }
        fn is_durable(&self) -> bool {
            false
        }
        fn backend_name(&self) -> &'static str {
            "pausing"
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        engine: Arc<AuthorizationEngine>,
        sync: Synchronizer,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        for tenant_id in ["t1", "t2"] {
            store
                .create_tenant(Tenant {
                    tenant_id: tenant_id.to_string(),
                    display_name: tenant_id.to_uppercase(),
                    status: TenantStatus::Active,
                })
                .await
                .expect("tenant");
        }
        let engine = Arc::new(AuthorizationEngine::new(store.clone()).await.expect("engine"));
        let sync = Synchronizer::new(store.clone(), engine.clone());
        Fixture {
            store,
            engine,
            sync,
        }
    }

    async fn role_with(store: &InMemoryStore, scope: RoleScope, perms: &[(&str, &str)]) -> Role {
        let role = store
            .create_role(Role::new("editor", "", scope))
            .await
            .expect("role");
        for (resource, action) in perms {
            let permission = match store
                .find_permission_by_name(&format!("{resource}:{action}"))
                .await
                .expect("lookup")
            {
                Some(permission) => permission,
                None => store
                    .create_permission(Permission::new(resource, action, ""))
                    .await
                    .expect("permission"),
            };
            store
                .attach_permission(&role.role_id, &permission.permission_id)
                .await
                .expect("attach");
        }
        role
    }

    #[tokio::test]
    async fn role_sync_is_idempotent() {
        let f = fixture().await;
        let role = role_with(
            &f.store,
            RoleScope::tenant(TenantId::new("t1")),
            &[("doc", "read"), ("doc", "write")],
        )
        .await;
        assert_eq!(f.sync.sync_role_permissions(&role.role_id).await.expect("sync"), 2);
        let first = f.store.load_policies().await.expect("load");
        f.sync.sync_role_permissions(&role.role_id).await.expect("sync");
        assert_eq!(f.store.load_policies().await.expect("load"), first);
        assert_eq!(f.engine.sizes().await, (2, 0));
    }

    #[tokio::test]
    async fn missing_role_syncs_to_empty() {
        let f = fixture().await;
        let role = role_with(&f.store, RoleScope::tenant(TenantId::new("t1")), &[("doc", "read")]).await;
        f.sync.sync_role_permissions(&role.role_id).await.expect("sync");
        f.store.delete_role(&role.role_id).await.expect("delete");
        assert_eq!(f.sync.sync_role_permissions(&role.role_id).await.expect("sync"), 0);
        assert_eq!(f.engine.sizes().await, (0, 0));
    }

    #[tokio::test]
    async fn only_active_usable_assignments_are_projected() {
        let f = fixture().await;
        let t1 = TenantId::new("t1");
        let role = role_with(&f.store, RoleScope::tenant(t1.clone()), &[("doc", "read")]).await;
        f.sync.sync_role_permissions(&role.role_id).await.expect("sync");

        f.store
            .upsert_user_role(UserRole::active("alice", &role.role_id, "t1"))
            .await
            .expect("assign");
        // Tenant role assigned in a foreign tenant is never projected.
        f.store
            .upsert_user_role(UserRole::active("alice", &role.role_id, "t2"))
            .await
            .expect("assign");
        assert_eq!(f.sync.sync_user_roles("alice").await.expect("sync"), 1);
        assert!(f.engine.enforce("alice", "doc", "read", &t1).await);

        f.store
            .set_user_role_status("alice", &role.role_id, "t1", AssignmentStatus::Suspended)
            .await
            .expect("suspend");
        assert_eq!(f.sync.sync_user_roles("alice").await.expect("sync"), 0);
        assert!(!f.engine.enforce("alice", "doc", "read", &t1).await);
        assert!(f.engine.user_permissions("alice", &t1).await.is_empty());
    }

    #[tokio::test]
    async fn sync_all_rebuilds_from_directory() {
        let f = fixture().await;
        let t2 = TenantId::new("t2");
        let role = role_with(&f.store, RoleScope::System, &[("users", "read")]).await;
        f.store
            .upsert_user_role(UserRole::active("bob", &role.role_id, "t2"))
            .await
            .expect("assign");
        // Stale tuple that the directory no longer backs.
        f.engine
            .grant_permission("ghost", &RoleScope::System, "doc", "read")
            .await
            .expect("grant");

        let report = f.sync.sync_all().await.expect("sync");
        assert_eq!(
            report,
            SyncReport {
                policies: 1,
                groupings: 1
            }
        );
        assert!(f.engine.enforce("bob", "users", "read", &t2).await);
        assert_eq!(f.engine.sizes().await, (1, 1));
    }

    #[tokio::test]
    async fn user_syncs_apply_in_directory_order() {
        let f = fixture().await;
        let t1 = TenantId::new("t1");
        let role = role_with(&f.store, RoleScope::tenant(t1.clone()), &[("doc", "read")]).await;
        f.sync.sync_role_permissions(&role.role_id).await.expect("sync");
        f.store
            .upsert_user_role(UserRole::active("alice", &role.role_id, "t1"))
            .await
            .expect("assign");

        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let directory = Arc::new(PausingDirectory {
            inner: f.store.clone(),
            gate: std::sync::Mutex::new(Some((entered_tx, release_rx))),
        });
        let sync = Synchronizer::new(directory, f.engine.clone());

        // The first sync has read the assignment and is paused before applying it.
        let stale = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_user_roles("alice").await }
        });
        entered_rx.await.expect("first sync read");

        f.store
            .delete_user_role("alice", &role.role_id, "t1")
            .await
            .expect("revoke");
        let fresh = tokio::spawn({
            let sync = sync.clone();
            async move { sync.sync_user_roles("alice").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fresh.is_finished());

        release_tx.send(()).expect("release");
        assert_eq!(stale.await.expect("join").expect("sync"), 1);
        assert_eq!(fresh.await.expect("join").expect("sync"), 0);
        assert!(!f.engine.enforce("alice", "doc", "read", &t1).await);
    }

    #[tokio::test]
    async fn full_and_keyed_syncs_do_not_block_each_other_forever() {
        let f = fixture().await;
        let role = role_with(&f.store, RoleScope::tenant(TenantId::new("t1")), &[("doc", "read")]).await;
        f.store
            .upsert_user_role(UserRole::active("alice", &role.role_id, "t1"))
            .await
            .expect("assign");
        let all = tokio::spawn({
            let sync = f.sync.clone();
            async move { sync.sync_all().await }
        });
        let user = tokio::spawn({
            let sync = f.sync.clone();
            async move { sync.sync_user_roles("alice").await }
        });
        let role_sync = tokio::spawn({
            let sync = f.sync.clone();
            let role_id = role.role_id.clone();
            async move { sync.sync_role_permissions(&role_id).await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            all.await.expect("join").expect("sync all");
            user.await.expect("join").expect("sync user");
            role_sync.await.expect("join").expect("sync role");
        })
        .await
        .expect("syncs finish");
        assert_eq!(f.engine.sizes().await, (1, 1));
        assert!(f.sync.locks.keyed.is_empty());
    }
}

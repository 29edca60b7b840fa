//! Tenant-scoped authorization engine over a Casbin enforcer.
//!
//! # Purpose
//! Owns the process-wide policy state. Every decision and every policy mutation goes through
//! [`AuthorizationEngine`]; the enforcer itself is never exposed.
//!
//! # Key invariants
//! - A tuple `(role, domain, object, action)` grants `(user, tenant, object, action)` iff the user
//!   holds the role in `tenant` and `domain` is either `tenant` or the system domain.
//! - Mutations write the [`PolicyStore`] first and touch memory only after the store accepted
//!   the change, so a failed write leaves decisions unchanged.
//! - Mutations are serialized by a writer mutex. The enforcer lock is write-held only while a
//!   prepared change is applied, so readers see either the old or the new policy set.
//! - Evaluation errors deny.
//!
//! # Examples
//! ```rust
//! use authplane::auth::rbac::engine::AuthorizationEngine;
//! use authplane::store::memory::InMemoryStore;
//! use std::sync::Arc;
//! use tenantry_authz::{RoleScope, TenantId};
//!
//! # async fn demo() -> Result<(), authplane::auth::rbac::engine::EngineError> {
//! let engine = AuthorizationEngine::new(Arc::new(InMemoryStore::new())).await?;
//! let acme = TenantId::parse("acme").expect("slug");
//! engine.grant_permission("editor", &RoleScope::tenant(acme.clone()), "doc", "write").await?;
//! engine.assign_role("alice", "editor", &acme).await?;
//! assert!(engine.enforce("alice", "doc", "write", &acme).await);
//! # Ok(())
//! # }
//! ```
use crate::observability::{AUTHZ_DECISIONS_TOTAL, GROUPING_RULES, POLICY_RULES};
use crate::store::{PolicyStore, StoreError};
use async_trait::async_trait;
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};
use std::collections::BTreeSet;
use std::sync::Arc;
use tenantry_authz::{
    AuthzError, GroupingRule, PolicyRule, RoleScope, SYSTEM_DOMAIN, TenantId, casbin_model,
    role_subject, user_subject,
};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("policy store: {0}")]
    Store(#[from] StoreError),
    #[error("casbin: {0}")]
    Casbin(#[from] casbin::Error),
    #[error(transparent)]
    Authz(#[from] AuthzError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Permission check used by request handlers.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can(&self, user_id: &str, resource: &str, action: &str, tenant: &TenantId) -> bool;
}

pub struct AuthorizationEngine {
    enforcer: RwLock<Enforcer>,
    writer: Mutex<()>,
    store: Arc<dyn PolicyStore>,
}

async fn build_enforcer(
    policies: &[PolicyRule],
    groupings: &[GroupingRule],
) -> EngineResult<Enforcer> {
    let model = casbin_model().await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
    for policy in policies {
        enforcer.add_policy(policy.to_casbin()).await?;
    }
    for grouping in groupings {
        enforcer.add_grouping_policy(grouping.to_casbin()).await?;
    }
    enforcer.build_role_links()?;
    Ok(enforcer)
}

fn publish_sizes(enforcer: &Enforcer) {
    metrics::gauge!(POLICY_RULES).set(enforcer.get_policy().len() as f64);
    metrics::gauge!(GROUPING_RULES).set(enforcer.get_grouping_policy().len() as f64);
}

impl AuthorizationEngine {
    /// Create an engine with an empty policy set backed by `store`.
    pub async fn new(store: Arc<dyn PolicyStore>) -> EngineResult<Self> {
        let enforcer = build_enforcer(&[], &[]).await?;
        Ok(Self {
            enforcer: RwLock::new(enforcer),
            writer: Mutex::new(()),
            store,
        })
    }

    /// Replace the in-memory state with everything the policy store holds.
    pub async fn load_from_store(&self) -> EngineResult<(usize, usize)> {
        let _writer = self.writer.lock().await;
        let policies = self.store.load_policies().await?;
        let groupings = self.store.load_groupings().await?;
        let fresh = build_enforcer(&policies, &groupings).await?;
        self.swap(fresh).await;
        tracing::info!(
            policies = policies.len(),
            groupings = groupings.len(),
            "loaded authorization policy"
        );
        Ok((policies.len(), groupings.len()))
    }

    /// Decide whether `user_id` may perform `action` on `object` within `tenant`.
    pub async fn enforce(
        &self,
        user_id: &str,
        object: &str,
        action: &str,
        tenant: &TenantId,
    ) -> bool {
        let subject = user_subject(user_id);
        let decision = {
            let enforcer = self.enforcer.read().await;
            enforcer.enforce((subject.as_str(), tenant.as_str(), object, action))
        };
        match decision {
            Ok(allowed) => {
                let outcome = if allowed { "allow" } else { "deny" };
                metrics::counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
                allowed
            }
            Err(err) => {
                metrics::counter!(AUTHZ_DECISIONS_TOTAL, "outcome" => "error").increment(1);
                tracing::warn!(tenant = %tenant, object, action, error = %err, "policy evaluation failed");
                false
            }
        }
    }

    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        tenant: &TenantId,
    ) -> EngineResult<()> {
        let rule = GroupingRule::assignment(user_id, role_id, tenant);
        let _writer = self.writer.lock().await;
        self.store.add_grouping(&rule).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer.add_grouping_policy(rule.to_casbin()).await?;
        enforcer.build_role_links()?;
        publish_sizes(&enforcer);
        Ok(())
    }

    pub async fn revoke_role(
        &self,
        user_id: &str,
        role_id: &str,
        tenant: &TenantId,
    ) -> EngineResult<()> {
        let rule = GroupingRule::assignment(user_id, role_id, tenant);
        let _writer = self.writer.lock().await;
        self.store.remove_grouping(&rule).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer.remove_grouping_policy(rule.to_casbin()).await?;
        enforcer.build_role_links()?;
        publish_sizes(&enforcer);
        Ok(())
    }

    pub async fn grant_permission(
        &self,
        role_id: &str,
        scope: &RoleScope,
        resource: &str,
        action: &str,
    ) -> EngineResult<()> {
        let rule = PolicyRule::for_role(role_id, scope, resource, action);
        let _writer = self.writer.lock().await;
        self.store.add_policy(&rule).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer.add_policy(rule.to_casbin()).await?;
        publish_sizes(&enforcer);
        Ok(())
    }

    pub async fn revoke_permission(
        &self,
        role_id: &str,
        scope: &RoleScope,
        resource: &str,
        action: &str,
    ) -> EngineResult<()> {
        let rule = PolicyRule::for_role(role_id, scope, resource, action);
        let _writer = self.writer.lock().await;
        self.store.remove_policy(&rule).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer.remove_policy(rule.to_casbin()).await?;
        publish_sizes(&enforcer);
        Ok(())
    }

    /// `{resource}:{action}` for every grant reachable through the user's roles in `tenant`.
    pub async fn user_permissions(&self, user_id: &str, tenant: &TenantId) -> BTreeSet<String> {
        let enforcer = self.enforcer.read().await;
        let roles: Vec<String> = enforcer
            .get_filtered_grouping_policy(0, vec![user_subject(user_id)])
            .iter()
            .filter_map(|values| GroupingRule::from_casbin(values))
            .filter(|grouping| grouping.domain == tenant.as_str())
            .map(|grouping| grouping.role)
            .collect();
        let mut permissions = BTreeSet::new();
        for role in roles {
            for values in enforcer.get_filtered_policy(0, vec![role]) {
                if let Some(rule) = PolicyRule::from_casbin(&values)
                    && (rule.domain == tenant.as_str() || rule.domain == SYSTEM_DOMAIN)
                {
                    permissions.insert(rule.permission_key());
                }
            }
        }
        permissions
    }

    /// Replace every assignment of `user_id` across all tenants.
    pub async fn replace_user_groupings(
        &self,
        user_id: &str,
        rules: Vec<GroupingRule>,
    ) -> EngineResult<()> {
        let subject = user_subject(user_id);
        let _writer = self.writer.lock().await;
        self.store.replace_user_groupings(&subject, &rules).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_grouping_policy(0, vec![subject])
            .await?;
        for rule in &rules {
            enforcer.add_grouping_policy(rule.to_casbin()).await?;
        }
        enforcer.build_role_links()?;
        publish_sizes(&enforcer);
        Ok(())
    }

    /// Replace every grant held by `role_id`.
    pub async fn replace_role_policies(
        &self,
        role_id: &str,
        rules: Vec<PolicyRule>,
    ) -> EngineResult<()> {
        let subject = role_subject(role_id);
        let _writer = self.writer.lock().await;
        self.store.replace_subject_policies(&subject, &rules).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer.remove_filtered_policy(0, vec![subject]).await?;
        for rule in &rules {
            enforcer.add_policy(rule.to_casbin()).await?;
        }
        publish_sizes(&enforcer);
        Ok(())
    }

    /// Drop the grants of `role_id` and every assignment of it.
    pub async fn remove_role(&self, role_id: &str) -> EngineResult<()> {
        let subject = role_subject(role_id);
        let _writer = self.writer.lock().await;
        self.store.remove_role_rules(&subject).await?;
        let mut enforcer = self.enforcer.write().await;
        enforcer
            .remove_filtered_policy(0, vec![subject.clone()])
            .await?;
        enforcer
            .remove_filtered_grouping_policy(1, vec![subject])
            .await?;
        enforcer.build_role_links()?;
        publish_sizes(&enforcer);
        Ok(())
    }

    /// Replace the whole policy set.
    pub async fn replace_all(
        &self,
        policies: Vec<PolicyRule>,
        groupings: Vec<GroupingRule>,
    ) -> EngineResult<()> {
        let _writer = self.writer.lock().await;
        let fresh = build_enforcer(&policies, &groupings).await?;
        self.store.replace_all(&policies, &groupings).await?;
        self.swap(fresh).await;
        Ok(())
    }

    /// Current tuple counts as `(policies, groupings)`.
    pub async fn sizes(&self) -> (usize, usize) {
        let enforcer = self.enforcer.read().await;
        (
            enforcer.get_policy().len(),
            enforcer.get_grouping_policy().len(),
        )
    }

    async fn swap(&self, fresh: Enforcer) {
        let mut enforcer = self.enforcer.write().await;
        *enforcer = fresh;
        publish_sizes(&enforcer);
    }
}

#[async_trait]
impl Authorizer for AuthorizationEngine {
    async fn can(&self, user_id: &str, resource: &str, action: &str, tenant: &TenantId) -> bool {
        self.enforce(user_id, resource, action, tenant).await
    }
}

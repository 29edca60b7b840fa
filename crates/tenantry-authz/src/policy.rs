//! Flat policy and grouping tuples.
//!
//! # Purpose
//! Defines the record shapes persisted by the policy store and loaded into the
//! Casbin enforcer. They are a projection of roles, permissions and user-role
//! assignments and can always be rebuilt from those relations.
//!
//! # Key invariants
//! - Policy vectors are ordered `[subject, domain, object, action]`.
//! - Grouping vectors are ordered `[user, role, domain]`.
use crate::scope::RoleScope;
use crate::types::{TenantId, role_subject, user_subject};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Allow-rule `(subject, domain, object, action)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct PolicyRule {
    pub subject: String,
    pub domain: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    /// Grant of `(resource, action)` to a role, stored under the scope's domain.
    pub fn for_role(role_id: &str, scope: &RoleScope, resource: &str, action: &str) -> Self {
        Self {
            subject: role_subject(role_id),
            domain: scope.domain().to_string(),
            object: resource.to_string(),
            action: action.to_string(),
        }
    }

    pub fn to_casbin(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.domain.clone(),
            self.object.clone(),
            self.action.clone(),
        ]
    }

    pub fn from_casbin(values: &[String]) -> Option<Self> {
        match values {
            [subject, domain, object, action, ..] => Some(Self {
                subject: subject.clone(),
                domain: domain.clone(),
                object: object.clone(),
                action: action.clone(),
            }),
            _ => None,
        }
    }

    /// Permission key exposed to callers: `{object}:{action}`.
    pub fn permission_key(&self) -> String {
        format!("{}:{}", self.object, self.action)
    }
}

/// Role assignment `(user, role, domain)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct GroupingRule {
    pub user: String,
    pub role: String,
    pub domain: String,
}

impl GroupingRule {
    pub fn assignment(user_id: &str, role_id: &str, tenant: &TenantId) -> Self {
        Self {
            user: user_subject(user_id),
            role: role_subject(role_id),
            domain: tenant.as_str().to_string(),
        }
    }

    pub fn to_casbin(&self) -> Vec<String> {
        vec![self.user.clone(), self.role.clone(), self.domain.clone()]
    }

    pub fn from_casbin(values: &[String]) -> Option<Self> {
        match values {
            [user, role, domain, ..] => Some(Self {
                user: user.clone(),
                role: role.clone(),
                domain: domain.clone(),
            }),
            _ => None,
        }
    }
}

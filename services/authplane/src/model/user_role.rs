//! User-role assignments.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Ternary relation `(user, role, tenant)`; unique per triple.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct UserRole {
    pub user_id: String,
    pub role_id: String,
    pub tenant_id: String,
    pub status: AssignmentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Suspended,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

impl UserRole {
    pub fn active(user_id: &str, role_id: &str, tenant_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
            tenant_id: tenant_id.to_string(),
            status: AssignmentStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }
}

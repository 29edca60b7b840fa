//! RBAC module wiring.
//!
//! # Purpose
//! Exposes the authorization engine, the directory synchronizer, and the built-in role
//! templates. The Casbin model itself lives in `tenantry-authz`.
pub mod defaults;
pub mod engine;
pub mod sync;

pub use defaults::RoleDefaults;
pub use engine::{AuthorizationEngine, Authorizer, EngineError, EngineResult};
pub use sync::{SyncReport, Synchronizer};

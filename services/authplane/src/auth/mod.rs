//! Authentication and authorization modules.
//!
//! # Purpose
//! Groups key material caching, token validation, tenant resolution, the RBAC engine,
//! tenant administration, and the per-request admission pipeline.
pub mod admin;
pub mod challenge;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod rbac;
pub mod tenant;
pub mod token;

//! Tenantry authplane library crate.
//!
//! # Purpose
//! Exposes the tenant-aware identity and authorization layer: configuration, storage,
//! key material, token validation, tenant resolution, the RBAC engine, the request
//! pipeline, and the administrative HTTP API, for use by the binary and tests.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod store;

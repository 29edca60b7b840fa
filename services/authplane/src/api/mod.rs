//! Authplane HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules, shared payload types and error helpers.
pub mod access;
pub mod error;
pub mod openapi;
pub mod platform;
pub mod system;
pub mod types;

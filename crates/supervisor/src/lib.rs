//! Server supervisor daemon
//!
//! Exposes the HTTP API and configuration so the binary and integration
//! tests share one router.

pub mod api;
pub mod config;

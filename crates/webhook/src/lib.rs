//! Cluster resource override admission webhook
//!
//! HTTP surface, hook lifecycle and informer-backed caches around the
//! engine in `override-lib`.

pub mod api;
pub mod config;
pub mod hook;
pub mod informer;

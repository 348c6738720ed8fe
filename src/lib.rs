//! kubewire: a multi-cluster Kubernetes proxy that keeps live object caches
//! and streams their changes to WebSocket subscribers.

pub mod cache;
pub mod config;
pub mod error;
pub mod k8s;
pub mod server;
pub mod session;

pub use error::{Error, Result};

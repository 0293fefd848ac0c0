//! Dethrottler Core - Domain types and configuration for the dethrottler node controller
//!
//! This crate provides:
//! - Load average, threshold and taint identity types
//! - YAML configuration loading and validation
//! - kubeconfig current-context resolution
//! - Duration string parsing
//! - Error types with miette diagnostics

pub mod config;
pub mod duration;
pub mod error;
pub mod kubeconfig;
pub mod types;

// Re-export commonly used types
pub use config::{ApiServerConfig, DethrottlerConfig, NODE_NAME_ENV};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, Result};
pub use kubeconfig::KubeconfigCredentials;
pub use types::{
    taint_matches, LoadAverages, LoadPeriod, TaintDescriptor, TaintEffect, Thresholds,
    DEFAULT_TAINT_KEY, HIGH_LOAD_TAINT_VALUE,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Taint};

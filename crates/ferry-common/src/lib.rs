//! Common types for ferry: errors, Kubernetes helpers and telemetry

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

//! Shared types for AxonDB
//!
//! This crate holds everything the other layers agree on:
//! - The unified [`error::Error`] type and `Result` alias
//! - Space metadata ([`space::SpaceMeta`], [`space::EngineKind`])
//! - ANN index descriptors and their training requirements ([`descriptor`])
//! - Distance metrics ([`metric::DistanceMetric`])
//! - Roles and per-space permissions ([`auth`])
//! - Server configuration ([`config::ServerConfig`])

pub mod auth;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod metric;
pub mod space;

pub use auth::{Role, UserInfo};
pub use config::ServerConfig;
pub use descriptor::AnnDescriptor;
pub use error::{Error, Result};
pub use metric::DistanceMetric;
pub use space::{EngineKind, SpaceMeta};

//! AxonDB: a networked key-value and vector database.
//!
//! Each named "space" is backed by either an ordered key-value engine or an
//! ANN vector engine. Clients speak newline-terminated JSON over TCP,
//! authenticate once, then issue commands against spaces; a sibling HTTP
//! port administers connection limits at runtime.
//!
//! This crate is the facade: it re-exports the layer crates.
//!
//! - [`core`]: shared types, errors, descriptors, metrics, roles
//! - [`durability`]: the write-ahead log primitive
//! - [`storage`]: ordered index and key-value engine
//! - [`vector`]: ANN indexes and the vector engine
//! - [`engine`]: space manager and credential store
//! - [`server`]: session dispatcher, admission, control plane

pub use axon_core as core;
pub use axon_durability as durability;
pub use axon_engine as engine;
pub use axon_server as server;
pub use axon_storage as storage;
pub use axon_vector as vector;

pub use axon_core::{Error, Result, ServerConfig};
pub use axon_engine::{AuthStore, Space, SpaceManager};
pub use axon_server::Server;
pub use axon_storage::KvEngine;
pub use axon_vector::VectorEngine;

//! Space metadata.
//!
//! A space is a named data container backed by exactly one engine kind.
//! The manager persists one [`SpaceMeta`] per space in the instance
//! metadata file and reconstructs engines from it at startup.

use crate::descriptor::AnnDescriptor;
use crate::error::{Error, Result};
use crate::metric::DistanceMetric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Engine kind backing a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    /// Ordered key-value engine
    #[serde(rename = "key-value")]
    KeyValue,
    /// ANN vector engine
    #[serde(rename = "vector")]
    Vector,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::KeyValue => f.write_str("key-value"),
            EngineKind::Vector => f.write_str("vector"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "key-value" => Ok(EngineKind::KeyValue),
            "vector" => Ok(EngineKind::Vector),
            other => Err(Error::InvalidInput(format!(
                "unknown engine type: {}",
                other
            ))),
        }
    }
}

/// Persisted descriptor of one space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceMeta {
    /// Space name, unique within the instance
    pub name: String,
    /// Backing engine kind
    pub engine_kind: EngineKind,
    /// Vector dimension (vector spaces only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
    /// ANN descriptor string, e.g. `Flat` or `IVF64,PQ8` (vector spaces only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
    /// Distance metric (vector spaces only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<DistanceMetric>,
    /// Whether writes go through the write-ahead log
    pub wal_enabled: bool,
}

impl SpaceMeta {
    /// Metadata for a key-value space
    pub fn key_value(name: impl Into<String>, wal_enabled: bool) -> Self {
        SpaceMeta {
            name: name.into(),
            engine_kind: EngineKind::KeyValue,
            dim: None,
            index_type: None,
            metric: None,
            wal_enabled,
        }
    }

    /// Metadata for a vector space
    pub fn vector(
        name: impl Into<String>,
        dim: usize,
        index_type: impl Into<String>,
        metric: DistanceMetric,
        wal_enabled: bool,
    ) -> Self {
        SpaceMeta {
            name: name.into(),
            engine_kind: EngineKind::Vector,
            dim: Some(dim),
            index_type: Some(index_type.into()),
            metric: Some(metric),
            wal_enabled,
        }
    }

    /// Validate engine-specific parameters.
    ///
    /// Vector spaces need a positive dimension, a parseable descriptor and a
    /// metric; key-value spaces must not carry vector parameters.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidInput("space name cannot be empty".into()));
        }
        match self.engine_kind {
            EngineKind::KeyValue => Ok(()),
            EngineKind::Vector => {
                let dim = self
                    .dim
                    .ok_or_else(|| Error::InvalidInput("vector space requires a dimension".into()))?;
                if dim == 0 {
                    return Err(Error::InvalidInput(
                        "vector dimension must be positive".into(),
                    ));
                }
                let descriptor = self.index_type.as_deref().ok_or_else(|| {
                    Error::InvalidInput("vector space requires an index type".into())
                })?;
                descriptor.parse::<AnnDescriptor>()?;
                if self.metric.is_none() {
                    return Err(Error::InvalidInput("vector space requires a metric".into()));
                }
                Ok(())
            }
        }
    }

    /// Parsed ANN descriptor (vector spaces only)
    pub fn descriptor(&self) -> Result<AnnDescriptor> {
        self.index_type
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("space has no index type".into()))?
            .parse()
    }
}

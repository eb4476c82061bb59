//! Distance metrics recognized by vector spaces.
//!
//! Engines report *distances*: lower is closer, for every metric. Inner
//! product is negated so that the ordering convention stays uniform.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric for a vector space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Euclidean distance
    L2,
    /// Negated inner product
    InnerProduct,
    /// Manhattan distance
    L1,
    /// Minkowski distance with p = 3
    Lp,
    /// Canberra distance
    Canberra,
    /// Bray-Curtis dissimilarity
    BrayCurtis,
    /// Jensen-Shannon distance
    JensenShannon,
    /// Chebyshev distance
    Linf,
}

impl DistanceMetric {
    /// All recognized metric names, in canonical spelling
    pub const ALL: [DistanceMetric; 8] = [
        DistanceMetric::L2,
        DistanceMetric::InnerProduct,
        DistanceMetric::L1,
        DistanceMetric::Lp,
        DistanceMetric::Canberra,
        DistanceMetric::BrayCurtis,
        DistanceMetric::JensenShannon,
        DistanceMetric::Linf,
    ];

    /// Canonical wire spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::L2 => "L2",
            DistanceMetric::InnerProduct => "InnerProduct",
            DistanceMetric::L1 => "L1",
            DistanceMetric::Lp => "Lp",
            DistanceMetric::Canberra => "Canberra",
            DistanceMetric::BrayCurtis => "BrayCurtis",
            DistanceMetric::JensenShannon => "JensenShannon",
            DistanceMetric::Linf => "Linf",
        }
    }

    /// Stable single-byte tag for snapshot headers
    pub fn to_byte(&self) -> u8 {
        match self {
            DistanceMetric::L2 => 0,
            DistanceMetric::InnerProduct => 1,
            DistanceMetric::L1 => 2,
            DistanceMetric::Lp => 3,
            DistanceMetric::Canberra => 4,
            DistanceMetric::BrayCurtis => 5,
            DistanceMetric::JensenShannon => 6,
            DistanceMetric::Linf => 7,
        }
    }

    /// Decode a snapshot tag
    pub fn from_byte(b: u8) -> Option<Self> {
        DistanceMetric::ALL.into_iter().find(|m| m.to_byte() == b)
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DistanceMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidMetric(s.to_string()))
    }
}

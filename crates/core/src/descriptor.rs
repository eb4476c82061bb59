//! ANN index descriptors.
//!
//! A descriptor names the index structure for a vector space, e.g. `Flat`,
//! `HNSW32`, `IVF256`, `PQ8`, or a two-part composite such as `IVF256,PQ8`.
//! Suffixes are powers of two in [2, 256]; `Flat` takes no suffix.
//!
//! The descriptor also answers the two questions the ingest path needs:
//! does this structure require training, and how many samples are enough.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Minimum training sample count for a product quantizer (one per code word)
const PQ_MIN_TRAIN: usize = 256;

/// Storage layout for IVF posting lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvfStorage {
    /// Raw vectors in each list
    Flat,
    /// Product-quantized codes, `m` subquantizers
    Pq(u32),
}

/// Parsed ANN index descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnDescriptor {
    /// Exact scan
    Flat,
    /// Graph index with per-layer connectivity `m`
    Hnsw {
        /// Max connections per layer
        m: u32,
    },
    /// Inverted-file index with `nlist` coarse cells
    Ivf {
        /// Number of coarse cells
        nlist: u32,
        /// Per-list storage layout
        storage: IvfStorage,
    },
    /// Standalone product quantizer with `m` subquantizers
    Pq {
        /// Number of subquantizers
        m: u32,
    },
    /// Graph index over product-quantized vectors
    HnswPq {
        /// Max connections per layer
        m: u32,
        /// Number of subquantizers
        pq_m: u32,
    },
}

impl AnnDescriptor {
    /// True when the structure must be trained before inserts become searchable
    pub fn requires_training(&self) -> bool {
        self.min_train() > 0
    }

    /// Minimum number of training samples before `train` may be called
    pub fn min_train(&self) -> usize {
        match self {
            AnnDescriptor::Flat | AnnDescriptor::Hnsw { .. } => 0,
            AnnDescriptor::Ivf { nlist, storage } => {
                let coarse = *nlist as usize;
                match storage {
                    IvfStorage::Flat => coarse,
                    IvfStorage::Pq(_) => coarse.max(PQ_MIN_TRAIN),
                }
            }
            AnnDescriptor::Pq { .. } => PQ_MIN_TRAIN,
            AnnDescriptor::HnswPq { .. } => PQ_MIN_TRAIN,
        }
    }
}

impl fmt::Display for AnnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnDescriptor::Flat => write!(f, "Flat"),
            AnnDescriptor::Hnsw { m } => write!(f, "HNSW{}", m),
            AnnDescriptor::Ivf {
                nlist,
                storage: IvfStorage::Flat,
            } => write!(f, "IVF{},Flat", nlist),
            AnnDescriptor::Ivf {
                nlist,
                storage: IvfStorage::Pq(m),
            } => write!(f, "IVF{},PQ{}", nlist, m),
            AnnDescriptor::Pq { m } => write!(f, "PQ{}", m),
            AnnDescriptor::HnswPq { m, pq_m } => write!(f, "HNSW{},PQ{}", m, pq_m),
        }
    }
}

/// One token of a descriptor: base name plus optional numeric suffix
struct DescriptorToken {
    base: &'static str,
    suffix: Option<u32>,
}

/// Split a token like `HNSW32` into base and validated suffix.
///
/// The suffix must be a power of two in [2, 256]; it is required for
/// HNSW/IVF/PQ and forbidden for Flat.
fn parse_token(token: &str, full: &str) -> Result<DescriptorToken> {
    let bad = || Error::InvalidDescriptor(full.to_string());

    for base in ["HNSW", "IVF", "PQ", "Flat"] {
        if let Some(rest) = token.strip_prefix(base) {
            if base == "Flat" {
                if !rest.is_empty() {
                    return Err(bad());
                }
                return Ok(DescriptorToken { base, suffix: None });
            }
            let n: u32 = rest.parse().map_err(|_| bad())?;
            if !n.is_power_of_two() || !(2..=256).contains(&n) {
                return Err(bad());
            }
            return Ok(DescriptorToken {
                base,
                suffix: Some(n),
            });
        }
    }
    Err(bad())
}

impl FromStr for AnnDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidDescriptor(s.to_string());
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();

        match parts.as_slice() {
            [single] => {
                let tok = parse_token(single, s)?;
                match (tok.base, tok.suffix) {
                    ("Flat", None) => Ok(AnnDescriptor::Flat),
                    ("HNSW", Some(m)) => Ok(AnnDescriptor::Hnsw { m }),
                    ("IVF", Some(nlist)) => Ok(AnnDescriptor::Ivf {
                        nlist,
                        storage: IvfStorage::Flat,
                    }),
                    ("PQ", Some(m)) => Ok(AnnDescriptor::Pq { m }),
                    _ => Err(bad()),
                }
            }
            [first, second] => {
                let head = parse_token(first, s)?;
                let tail = parse_token(second, s)?;
                match (head.base, head.suffix, tail.base, tail.suffix) {
                    ("IVF", Some(nlist), "Flat", None) => Ok(AnnDescriptor::Ivf {
                        nlist,
                        storage: IvfStorage::Flat,
                    }),
                    ("IVF", Some(nlist), "PQ", Some(m)) => Ok(AnnDescriptor::Ivf {
                        nlist,
                        storage: IvfStorage::Pq(m),
                    }),
                    ("HNSW", Some(m), "Flat", None) => Ok(AnnDescriptor::Hnsw { m }),
                    ("HNSW", Some(m), "PQ", Some(pq_m)) => Ok(AnnDescriptor::HnswPq { m, pq_m }),
                    _ => Err(bad()),
                }
            }
            _ => Err(bad()),
        }
    }
}

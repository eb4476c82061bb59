//! Vector storage and ANN search for AxonDB
//!
//! Layout mirrors the rest of the stack: the index structures live under
//! [`ann`] behind the [`ann::AnnIndex`] trait, shared numeric machinery in
//! [`metric`], [`kmeans`] and [`pq`], and the durable engine that ties the
//! data file, WAL and index together in [`engine`].

pub mod ann;
pub mod engine;
pub mod kmeans;
pub mod metric;
pub mod pq;

pub use ann::{build_index, read_index, write_index, AnnIndex, RangeResult, SearchResult, NO_ID};
pub use engine::VectorEngine;

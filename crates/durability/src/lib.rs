//! Durability layer for AxonDB
//!
//! Holds the write-ahead log primitive shared by both storage engines.

pub mod wal;

pub use wal::Wal;

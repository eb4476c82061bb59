//! Network layer for AxonDB
//!
//! The data plane speaks newline-terminated JSON over TCP ([`wire`],
//! [`session`]); admission is bounded by a runtime-resizable limiter
//! ([`admission`]) that a sibling HTTP control plane ([`control`]) and
//! process signals can adjust. [`server::Server`] wires it all together.

pub mod admission;
pub mod control;
pub mod server;
pub mod session;
pub mod wire;

pub use admission::ConnectionLimiter;
pub use server::Server;

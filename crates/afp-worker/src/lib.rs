//! Session management and resilience core of an AFP network-share
//! worker.
//!
//! A host dispatcher hands each worker process one operation at a time
//! against `afp://` identifiers. This crate decomposes the identifier,
//! resolves credentials, establishes and caches a server session plus a
//! volume attachment through the consumed AFP library, and executes the
//! operation with one-shot recovery from stale daemon state. Sibling
//! worker processes coordinate connection attempts through an advisory
//! file lock and a shared circuit-breaker marker.
//!
//! The AFP library itself sits behind the [`client::AfpClient`] trait;
//! nothing in here speaks the wire protocol.

pub mod classify;
pub mod client;
pub mod connect;
pub mod coordination;
pub mod creds;
pub mod error;
pub mod mimetype;
pub mod ops;
pub mod session;
pub mod target;

#[cfg(test)]
mod fake;

pub use error::{Result, WorkerError};
pub use ops::{DataSink, DataSource, Entry, SpaceInfo, Worker, WorkerConfig};
pub use target::Target;

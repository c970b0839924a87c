//! Resilient local mirror of a Kubernetes control plane.
//!
//! Each supported resource kind is kept in an in-memory store synced by
//! list-then-watch under a backoff supervisor. Pod changes fan out to
//! registered callbacks, and per-container log tails can be merged into one
//! stream.
pub mod error;
pub mod k8s;

pub use error::{Error, Result};
pub use k8s::mirror::{ClusterMirror, MirrorConfig};
pub use k8s::resources::ResourceKind;

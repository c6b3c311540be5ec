//! Replica-set tracking and propagation.
//!
//! - [`vector`] - Vector clocks and their canonical encoding
//! - [`node`] - Node ids, addresses and the self identity
//! - [`keygroup`] - Keygroup names and versioned items
//! - [`registry`] - In-memory replica registry
//! - [`service`] - Replication service (membership changes and relay)

pub mod keygroup;
pub mod node;
pub mod registry;
pub mod service;
pub mod vector;

pub use keygroup::{Item, Keygroup, KeygroupName};
pub use node::{Address, Node, NodeId, SelfIdentity};
pub use registry::ReplicaRegistry;
pub use service::{ReconcileReport, ReplicationService};
pub use vector::{ClockOrdering, VectorClock};

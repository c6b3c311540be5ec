//! FReD - keygroup replication node.
//!
//! A FReD node stores items grouped into keygroups, tracks which nodes hold
//! a replica of each keygroup, versions items with vector clocks and relays
//! every change to the other replicas over a peer-to-peer protocol. An
//! optional name service keeps cluster-wide membership so nodes can
//! reconcile their view after missing relayed messages.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      External Handler                           │
//! │        keygroups │ items │ replicas │ nodes │ seed/unseed        │
//! └─────────────────────────────────────────────────────────────────┘
//!                  │                               │
//! ┌─────────────────────────────┐   ┌───────────────────────────────┐
//! │        Data Service         │   │      Replication Service      │
//! │   vector-clock item store   │   │  registry │ relay │ reconcile │
//! └─────────────────────────────┘   └───────────────────────────────┘
//!                                        │                  │
//!                       ┌──────────────────────┐  ┌──────────────────┐
//!                       │   Peering Protocol   │  │   Name Service   │
//!                       │ framed JSON over TCP │  │  memory │ etcd   │
//!                       └──────────────────────┘  └──────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Internal Handler                           │
//! │            applies peer messages locally, never relays          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Node startup, health and shutdown
//! - [`core::error`] - Error kinds shared by every layer
//!
//! ## Replication
//! - [`replication::vector`] - Vector clocks and causal ordering
//! - [`replication::node`] - Node identities and addresses
//! - [`replication::keygroup`] - Keygroups and items
//! - [`replication::registry`] - Local replica registry
//! - [`replication::service`] - Relay and membership orchestration
//!
//! ## Peering and name service
//! - [`peering`] - Peer messages, frame codec, TCP and in-memory transports
//! - [`nameservice`] - Shared membership records over a coordination store
//!
//! ## Data
//! - [`storage`] - Item store trait and in-memory adaptor
//! - [`data`] - Local item reads and causal writes
//! - [`handler`] - External and internal request handlers
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - A local change is applied before it is relayed to any peer.
//! - Relays go to every other replica in ascending id order and stop at the
//!   first failure.
//! - Messages received from peers are applied locally and never relayed.
//! - An item write that is older than a stored version is rejected.

// Core infrastructure
pub mod core;

// Replica tracking and relay
pub mod replication;

// Peer protocol
pub mod peering;

// Shared membership
pub mod nameservice;

// Item storage
pub mod storage;
pub mod data;

// Request handlers
pub mod handler;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use self::core::error::{FredError, FredResult};
pub use replication::{Item, KeygroupName, Node, NodeId, ReplicationService, VectorClock};

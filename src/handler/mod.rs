//! Request handlers.
//!
//! - [`external`] - Client-facing operations (local apply, then relay)
//! - [`internal`] - Inbound peering messages (local apply only)

pub mod external;
pub mod internal;

pub use external::ExternalHandler;
pub use internal::InternalHandler;

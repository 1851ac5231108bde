//! The call coordinator of the PBX exchange
//!
//! A `Tu` is the per-client state machine, the `Pbx` registry maps
//! extensions to live units, `worker` pumps commands for one connection,
//! and `acceptor` owns the listener and the graceful-shutdown choreography.

pub mod acceptor;
pub mod link;
pub mod registry;
pub mod tu;
pub mod worker;

#[cfg(test)]
mod testutil;

// Re-export the types a host needs to run an exchange
pub use acceptor::{ServeError, serve, serve_on};
pub use link::ClientLink;
pub use registry::{Pbx, RegistryError};
pub use tu::Tu;
pub use worker::client_session;

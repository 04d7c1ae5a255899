//! Wire codec (C1) and shared-memory state layouts (C2) for the sandbox
//! supervisor protocol. Used by both `sandbox-client` and
//! `sandbox-supervisor` so the two sides can never drift apart on layout.

pub mod shm;
pub mod types;
pub mod wire;

pub use types::*;
pub use wire::ProtocolError;

//! A node of a Chord distributed hash table.
//!
//! Each node owns an arc of a circular identifier space, routes lookups
//! through a finger table in O(log N) hops, and repairs its view of the
//! ring with periodic stabilization.

pub mod client;
pub mod core;
pub mod rpc;
pub mod server;
pub mod shell;

//! Pool coordination.
//!
//! A pool is a named group of processes of a fixed, known size. Each
//! member connects to the coordination service once and is released when
//! the last member has joined, knowing its own rank and the identity of
//! every other member.

mod client;
pub mod protocol;

// Re-exports
pub use client::PoolInfo;
pub use protocol::{JoinRequest, Membership, VIRTUAL_PORT};

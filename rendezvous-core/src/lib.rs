// rendezvous-core/src/lib.rs

//! Rendezvous - Core Library
//!
//! Building blocks of the rendezvous server: the pool join protocol and
//! its client, the service host that runs pluggable network services,
//! and the remote-control protocol a supervising process uses to manage
//! a running server.

pub mod codec;
pub mod config;
pub mod error;
pub mod transport;

// Re-export commonly used types for convenience
pub use config::{Framing, PoolClientConfig, ServerConfig};
pub use error::{PoolError, RendezvousError, Result};
pub use transport::{Connection, Listener, ServerAddress, TcpTransport, Transport};

pub mod coordination;
pub use coordination::{JoinRequest, Membership, PoolInfo};

pub mod host;
pub use host::{Service, ServiceBuilder, ServiceHost, ServiceRegistry, Statistics};

pub mod remote;
pub use remote::{HandlerExit, RemoteClient, RemoteHandler};

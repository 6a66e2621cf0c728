//! Service hosting.
//!
//! A [`ServiceHost`] owns a fixed set of pluggable [`Service`]s, built at
//! startup from a [`ServiceRegistry`], plus the set of peer/hub addresses
//! the server knows about.

mod registry;
mod server;

pub use registry::{ServiceBuilder, ServiceRegistry};
pub use server::{format_statistics, ServiceHost};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

/// Statistics snapshot of one service. A `None` value means the key does
/// not apply right now.
pub type Statistics = BTreeMap<String, Option<String>>;

/// A network service running inside the host.
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique, human-readable name.
    fn name(&self) -> &str;

    /// Stops the service. With a zero `timeout` the service ends at once;
    /// otherwise in-flight work gets up to `timeout` to finish first.
    /// Calling it more than once must be harmless.
    async fn end(&self, timeout: Duration);

    /// Snapshot of the service's counters.
    fn statistics(&self) -> Statistics {
        Statistics::new()
    }
}

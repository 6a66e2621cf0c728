//! Rendezvous server.
//!
//! The pool coordination service and the table of service kinds this
//! server can host.

pub mod service;
pub mod state;

use std::sync::Arc;

use rendezvous_core::ServiceRegistry;

pub use service::{CoordinationBuilder, CoordinationService, SERVICE_NAME};
pub use state::{Admission, CoordinationState, Pool};

/// Every service kind shipped with the server.
pub fn default_registry() -> ServiceRegistry {
    ServiceRegistry::new().with(Arc::new(CoordinationBuilder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::{ServerConfig, ServiceHost, TcpTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_host_runs_coordination_service() {
        let mut config = ServerConfig::default();
        config.server.bind_host = "127.0.0.1".to_string();
        config.server.port = 0;

        let transport = Arc::new(TcpTransport::from_config(&config));
        let host = ServiceHost::start(&config, transport, &default_registry()).await;

        assert_eq!(host.service_names(), vec![SERVICE_NAME.to_string()]);
        let stats = host.statistics(SERVICE_NAME).unwrap();
        assert_eq!(stats["pools"], Some("0".to_string()));
        assert!(stats["listening"].is_some());

        host.shutdown(Duration::ZERO).await;
        let stats = host.statistics(SERVICE_NAME).unwrap();
        assert_eq!(stats["listening"], None);
    }
}

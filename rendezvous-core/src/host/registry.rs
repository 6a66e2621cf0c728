//! Startup-time table of constructible service kinds.

use std::sync::Arc;

use async_trait::async_trait;

use super::Service;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::transport::Transport;

/// Constructor for one kind of service.
#[async_trait]
pub trait ServiceBuilder: Send + Sync {
    /// Identifier used to enable the kind in `server.services`.
    fn kind(&self) -> &str;

    /// Builds and starts the service.
    async fn build(
        &self,
        config: &ServerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Service>>;
}

/// Ordered set of service builders known to a deployment.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    builders: Vec<Arc<dyn ServiceBuilder>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a builder. A later builder with an already registered kind
    /// replaces the earlier one.
    pub fn register(&mut self, builder: Arc<dyn ServiceBuilder>) -> &mut Self {
        self.builders.retain(|b| b.kind() != builder.kind());
        self.builders.push(builder);
        self
    }

    #[must_use]
    pub fn with(mut self, builder: Arc<dyn ServiceBuilder>) -> Self {
        self.register(builder);
        self
    }

    pub fn kinds(&self) -> Vec<String> {
        self.builders.iter().map(|b| b.kind().to_string()).collect()
    }

    /// Builders enabled by `enabled`; an empty list enables all of them.
    /// Unknown names in `enabled` are reported and ignored.
    pub fn enabled(&self, enabled: &[String]) -> Vec<Arc<dyn ServiceBuilder>> {
        if enabled.is_empty() {
            return self.builders.clone();
        }
        for name in enabled {
            if !self.builders.iter().any(|b| b.kind() == name) {
                tracing::warn!(kind = %name, "unknown service kind in configuration");
            }
        }
        self.builders
            .iter()
            .filter(|b| enabled.iter().any(|name| name == b.kind()))
            .cloned()
            .collect()
    }
}

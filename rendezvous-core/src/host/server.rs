//! The service host.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Service, ServiceRegistry, Statistics};
use crate::config::ServerConfig;
use crate::transport::Transport;

/// Owns the hosted services and the set of known peer/hub addresses.
pub struct ServiceHost {
    local_address: String,
    hubs: watch::Sender<BTreeSet<String>>,
    services: Vec<Arc<dyn Service>>,
    ending: AtomicBool,
    shutdown_requested: CancellationToken,
    shutdown_complete: CancellationToken,
}

impl ServiceHost {
    /// Builds every enabled service kind and starts hosting them.
    ///
    /// A kind that fails to build is logged and left out; the host starts
    /// with whatever subset succeeded.
    pub async fn start(
        config: &ServerConfig,
        transport: Arc<dyn Transport>,
        registry: &ServiceRegistry,
    ) -> Arc<Self> {
        let mut services: Vec<Arc<dyn Service>> = Vec::new();
        let mut names = HashSet::new();

        for builder in registry.enabled(&config.server.services) {
            match builder.build(config, transport.clone()).await {
                Ok(service) => {
                    if !names.insert(service.name().to_string()) {
                        tracing::warn!(
                            kind = builder.kind(),
                            name = service.name(),
                            "duplicate service name, ending the second instance"
                        );
                        service.end(Duration::ZERO).await;
                        continue;
                    }
                    tracing::debug!(kind = builder.kind(), "service started");
                    services.push(service);
                }
                Err(e) => {
                    tracing::warn!(kind = builder.kind(), error = %e, "could not create service");
                }
            }
        }

        let host = Arc::new(Self::with_services(
            transport.local_address(),
            config.server.hub_addresses.iter().cloned(),
            services,
        ));

        host.spawn_hub_watch();
        if config.logging.stats_interval_secs > 0 {
            host.spawn_stats_reporter(Duration::from_secs(config.logging.stats_interval_secs));
        }
        host
    }

    /// A host over already constructed services.
    pub fn with_services(
        local_address: impl Into<String>,
        hubs: impl IntoIterator<Item = String>,
        services: Vec<Arc<dyn Service>>,
    ) -> Self {
        let (hubs, _) = watch::channel(hubs.into_iter().collect());
        Self {
            local_address: local_address.into(),
            hubs,
            services,
            ending: AtomicBool::new(false),
            shutdown_requested: CancellationToken::new(),
            shutdown_complete: CancellationToken::new(),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Merges `addresses` into the known peer set. Returns the number of
    /// addresses that were new.
    pub fn add_peer_addresses<I, S>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        self.hubs.send_if_modified(|known| {
            for address in addresses {
                if known.insert(address.into()) {
                    added += 1;
                }
            }
            added > 0
        });
        added
    }

    /// Snapshot of the known peer set, in sorted order.
    pub fn known_peer_addresses(&self) -> Vec<String> {
        self.hubs.borrow().iter().cloned().collect()
    }

    /// Receiver notified whenever the peer set grows.
    pub fn subscribe_peers(&self) -> watch::Receiver<BTreeSet<String>> {
        self.hubs.subscribe()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// Statistics of the named service, `None` if no such service exists.
    pub fn statistics(&self, service_name: &str) -> Option<Statistics> {
        self.services
            .iter()
            .find(|s| s.name() == service_name)
            .map(|s| s.statistics())
    }

    /// Ends every service.
    ///
    /// The first call does the work; concurrent and later calls wait for
    /// it to complete.
    pub async fn shutdown(&self, timeout: Duration) {
        if self.ending.swap(true, Ordering::SeqCst) {
            self.shutdown_complete.cancelled().await;
            return;
        }

        tracing::info!(timeout_ms = timeout.as_millis() as u64, "shutting down services");
        self.shutdown_requested.cancel();

        futures::future::join_all(self.services.iter().map(|service| {
            let service = service.clone();
            async move {
                service.end(timeout).await;
                tracing::debug!(service = service.name(), "service ended");
            }
        }))
        .await;

        self.shutdown_complete.cancel();
        tracing::info!("all services ended");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_requested.is_cancelled()
    }

    /// Resolves once a shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown_requested.cancelled().await;
    }

    /// Resolves once every service has ended.
    pub async fn shutdown_complete(&self) {
        self.shutdown_complete.cancelled().await;
    }

    fn spawn_hub_watch(self: &Arc<Self>) {
        let mut peers = self.subscribe_peers();
        let stop = self.shutdown_requested.clone();
        tokio::spawn(async move {
            loop {
                let known = peers
                    .borrow_and_update()
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(",");
                if !known.is_empty() {
                    tracing::info!("known hubs now: {known}");
                }

                tokio::select! {
                    _ = stop.cancelled() => return,
                    changed = peers.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_stats_reporter(self: &Arc<Self>, every: Duration) {
        let host = Arc::downgrade(self);
        let stop = self.shutdown_requested.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = interval.tick() => {}
                }
                let Some(host) = host.upgrade() else { return };
                for service in &host.services {
                    tracing::info!(
                        service = service.name(),
                        "statistics: {}",
                        format_statistics(&service.statistics())
                    );
                }
            }
        });
    }
}

/// Renders a statistics snapshot as `key=value` pairs.
pub fn format_statistics(stats: &Statistics) -> String {
    stats
        .iter()
        .map(|(key, value)| format!("{key}={}", value.as_deref().unwrap_or("-")))
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rendezvous server running on {}\nList of services:",
            self.local_address
        )?;
        for name in self.service_names() {
            write!(f, "\n    {name}")?;
        }
        Ok(())
    }
}

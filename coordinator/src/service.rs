//! Network front end of the pool barrier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use rendezvous_core::coordination::protocol::{write_join_response, JoinRequest, VIRTUAL_PORT};
use rendezvous_core::{
    Connection, Listener, PoolError, RendezvousError, Result, ServerConfig, Service,
    ServiceBuilder, Statistics, Transport,
};

use crate::state::CoordinationState;

pub const SERVICE_NAME: &str = "coordination";

/// Accepts join connections and runs each against its pool.
pub struct CoordinationService {
    state: Arc<CoordinationState>,
    listening: String,
    /// Stops the accept loop.
    stop_accepting: CancellationToken,
    /// Cancels connections still in flight; waiting members get
    /// `ServiceEnded`.
    abort: CancellationToken,
    tasks: TaskTracker,
}

impl CoordinationService {
    /// Listens on the coordination virtual port and starts accepting.
    pub async fn start(transport: &dyn Transport, events: bool, errors: bool) -> Result<Arc<Self>> {
        let listener = transport.listen(VIRTUAL_PORT).await.map_err(|e| {
            RendezvousError::service(SERVICE_NAME, format!("could not listen: {e}"))
        })?;
        let listening = listener.local_addr();

        let service = Arc::new(Self {
            state: Arc::new(CoordinationState::new(events)),
            listening,
            stop_accepting: CancellationToken::new(),
            abort: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });

        service.tasks.spawn(accept_loop(
            listener,
            service.state.clone(),
            service.tasks.clone(),
            service.stop_accepting.clone(),
            service.abort.clone(),
            errors,
        ));

        tracing::info!(
            address = %service.listening,
            "started coordination service on virtual port {VIRTUAL_PORT}"
        );
        Ok(service)
    }

    /// Address members connect to.
    pub fn local_addr(&self) -> &str {
        &self.listening
    }

    pub fn state(&self) -> &CoordinationState {
        &self.state
    }
}

#[async_trait]
impl Service for CoordinationService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn end(&self, timeout: Duration) {
        if !self.stop_accepting.is_cancelled() {
            tracing::info!(timeout_ms = timeout.as_millis() as u64, "ending coordination service");
        }
        self.stop_accepting.cancel();
        self.tasks.close();

        if !timeout.is_zero() && tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            tracing::warn!(
                connections = self.tasks.len(),
                "connections still open after {}ms, ending them",
                timeout.as_millis()
            );
        }
        self.abort.cancel();
        self.tasks.wait().await;
    }

    fn statistics(&self) -> Statistics {
        let mut stats = self.state.statistics();
        let listening = (!self.stop_accepting.is_cancelled()).then(|| self.listening.clone());
        stats.insert("listening".to_string(), listening);
        stats
    }
}

async fn accept_loop(
    listener: Box<dyn Listener>,
    state: Arc<CoordinationState>,
    tasks: TaskTracker,
    stop: CancellationToken,
    abort: CancellationToken,
    errors: bool,
) {
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((conn, peer)) => {
                tasks.spawn(handle_connection(conn, peer, state.clone(), abort.clone(), errors));
            }
            Err(e) => {
                state.record_connection_error();
                tracing::error!(
                    error = %describe(&e, errors),
                    "could not accept connection, stopping service"
                );
                break;
            }
        }
    }
    tracing::debug!("coordination accept loop stopped");
}

async fn handle_connection(
    mut conn: Connection,
    peer: String,
    state: Arc<CoordinationState>,
    abort: CancellationToken,
    errors: bool,
) {
    let request = tokio::select! {
        _ = abort.cancelled() => return,
        request = JoinRequest::read(&mut conn) => request,
    };
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            state.record_connection_error();
            tracing::warn!(%peer, error = %describe(&e, errors), "error on handling join request");
            return;
        }
    };

    // Blocks until the pool is complete.
    let outcome = tokio::select! {
        _ = abort.cancelled() => Err(PoolError::ServiceEnded),
        outcome = state.join(&request) => outcome,
    };

    if let Err(e) = write_join_response(&mut conn, &outcome).await {
        state.record_connection_error();
        tracing::warn!(
            %peer,
            pool = %request.pool_name,
            error = %describe(&e, errors),
            "could not send join result"
        );
        return;
    }
    let _ = conn.shutdown().await;
}

/// The error message, followed by its sources when `full` is set.
fn describe(err: &RendezvousError, full: bool) -> String {
    let mut text = err.to_string();
    if full {
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
    }
    text
}

/// Builds the coordination service for a [`ServiceHost`](rendezvous_core::ServiceHost).
pub struct CoordinationBuilder;

#[async_trait]
impl ServiceBuilder for CoordinationBuilder {
    fn kind(&self) -> &str {
        SERVICE_NAME
    }

    async fn build(
        &self,
        config: &ServerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Service>> {
        let service = CoordinationService::start(
            transport.as_ref(),
            config.logging.events,
            config.logging.errors,
        )
        .await?;
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_core::codec;
    use rendezvous_core::coordination::protocol::read_join_response;
    use rendezvous_core::{PoolInfo, ServerAddress, TcpTransport};
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start() -> (Arc<CoordinationService>, ServerAddress) {
        let transport = TcpTransport::new("127.0.0.1", 0, None);
        let service = CoordinationService::start(&transport, true, true).await.unwrap();
        let address = ServerAddress::parse(service.local_addr(), 0).unwrap();
        (service, address)
    }

    fn join(
        address: &ServerAddress,
        pool: &str,
        host: &str,
        size: i32,
    ) -> JoinHandle<Result<PoolInfo>> {
        let address = address.clone();
        let request = JoinRequest {
            pool_name: pool.to_string(),
            host_id: host.to_string(),
            cluster_id: format!("cluster-{host}"),
            size,
        };
        tokio::spawn(async move {
            PoolInfo::join_at(&TcpTransport::client().direct(), &address, request, WAIT).await
        })
    }

    async fn still_blocked(handle: &mut JoinHandle<Result<PoolInfo>>) -> bool {
        tokio::time::timeout(Duration::from_millis(200), handle).await.is_err()
    }

    #[tokio::test]
    async fn test_ranks_follow_acceptance_order() {
        let (service, address) = start().await;

        let mut handles = Vec::new();
        for host in ["n0", "n1", "n2", "n3"] {
            let mut handle = join(&address, "ordered", host, 4);
            if host != "n3" {
                assert!(still_blocked(&mut handle).await);
            }
            handles.push(handle);
        }

        let mut infos = Vec::new();
        for handle in handles {
            infos.push(handle.await.unwrap().unwrap());
        }

        for (i, info) in infos.iter().enumerate() {
            assert_eq!(info.rank(), i);
            assert_eq!(info.host_name(), format!("n{i}"));
            assert_eq!(info.cluster_name(), format!("cluster-n{i}"));
            assert_eq!(info.host_names(), infos[0].host_names());
            assert_eq!(info.cluster_names(), infos[0].cluster_names());
        }

        let stats = service.statistics();
        assert_eq!(stats["pools_complete"], Some("1".to_string()));
        assert_eq!(stats["joins_accepted"], Some("4".to_string()));
        assert_eq!(stats["last_pool"], Some("ordered".to_string()));
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_release_is_all_or_nothing() {
        let (service, address) = start().await;

        let mut first = join(&address, "trio", "a", 3);
        let mut second = join(&address, "trio", "b", 3);
        assert!(still_blocked(&mut first).await);
        assert!(still_blocked(&mut second).await);
        assert_eq!(service.statistics()["members_waiting"], Some("2".to_string()));

        let third = join(&address, "trio", "c", 3).await.unwrap().unwrap();
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        let mut ranks = vec![first.rank(), second.rank(), third.rank()];
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(first.host_names(), third.host_names());
        assert_eq!(second.cluster_names(), third.cluster_names());
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_size_mismatch_rejected_without_blocking() {
        let (service, address) = start().await;

        let mut member = join(&address, "sized", "a", 3);
        assert!(still_blocked(&mut member).await);

        let err = tokio::time::timeout(WAIT, join(&address, "sized", "b", 4))
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.pool_error(), Some(PoolError::UnequalSize));

        let pool = service.state().pool("sized");
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.size(), Some(3));
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_full_pool_rejects_late_joiner() {
        let (service, address) = start().await;

        let a = join(&address, "pair", "a", 2);
        let b = join(&address, "pair", "b", 2);
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let err = join(&address, "pair", "c", 2).await.unwrap().unwrap_err();
        assert_eq!(err.pool_error(), Some(PoolError::PoolClosed));
        assert_eq!(service.statistics()["joins_rejected"], Some("1".to_string()));
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_invalid_size_on_the_wire() {
        let (service, address) = start().await;

        let mut conn = TcpTransport::client()
            .direct()
            .connect(&address, VIRTUAL_PORT, WAIT)
            .await
            .unwrap();
        JoinRequest {
            pool_name: "bad".to_string(),
            host_id: "a".to_string(),
            cluster_id: "c".to_string(),
            size: 0,
        }
        .write(&mut conn)
        .await
        .unwrap();

        let outcome = read_join_response(&mut conn, 0).await.unwrap();
        assert_eq!(outcome, Err(PoolError::InvalidSize));
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_malformed_request_only_drops_that_connection() {
        let (service, address) = start().await;

        {
            let mut conn = TcpTransport::client()
                .direct()
                .connect(&address, VIRTUAL_PORT, WAIT)
                .await
                .unwrap();
            codec::write_string(&mut conn, "half-a-request").await.unwrap();
            conn.shutdown().await.unwrap();
        }

        let info = join(&address, "after", "a", 1).await.unwrap().unwrap();
        assert_eq!(info.rank(), 0);

        let mut errors = None;
        for _ in 0..50 {
            errors = service.statistics()["connection_errors"].clone();
            if errors.as_deref() == Some("1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(errors, Some("1".to_string()));
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_forced_end_releases_waiting_members() {
        let (service, address) = start().await;

        let mut member = join(&address, "never-full", "a", 5);
        assert!(still_blocked(&mut member).await);

        service.end(Duration::from_millis(100)).await;

        let err = member.await.unwrap().unwrap_err();
        assert_eq!(err.pool_error(), Some(PoolError::ServiceEnded));
        assert_eq!(service.statistics()["listening"], None);

        // Repeated calls are harmless.
        service.end(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_end_waits_for_pools_that_complete_in_time() {
        let (service, address) = start().await;

        let first = join(&address, "late", "a", 2);
        let pool = service.state().pool("late");
        while pool.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let ending = {
            let service = service.clone();
            tokio::spawn(async move { service.end(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The accept loop is gone, so the last member cannot get in; the
        // pool is completed in-process instead.
        pool.join("b", "cluster-b", 2).await.unwrap();

        let info = first.await.unwrap().unwrap();
        assert_eq!(info.host_names(), &["a".to_string(), "b".to_string()]);
        ending.await.unwrap();
    }
}

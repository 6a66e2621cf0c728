//! Pool client.
//!
//! A member of a closed-world run calls [`PoolInfo::join`] once at
//! startup. The call returns when every member of the pool has joined,
//! and yields this member's rank plus the identity of every member.

use std::fmt;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use super::protocol::{self, JoinRequest, VIRTUAL_PORT};
use crate::config::PoolClientConfig;
use crate::error::{RendezvousError, Result};
use crate::transport::{ServerAddress, Transport};

/// Membership information of a completed pool.
#[derive(Debug, Clone)]
pub struct PoolInfo {
    pool_name: String,
    rank: usize,
    host_names: Vec<String>,
    cluster_names: Vec<String>,
}

impl PoolInfo {
    /// Joins the pool described by `config` and waits until it is complete.
    ///
    /// # Errors
    ///
    /// Fails with [`RendezvousError::Pool`] when the server refuses the
    /// join, and with a transport or protocol error when the exchange
    /// itself fails.
    pub async fn join(
        transport: &dyn Transport,
        config: &PoolClientConfig,
        host_name: &str,
        cluster_name: &str,
    ) -> Result<Self> {
        config.validate()?;
        let address = ServerAddress::parse(
            config.server_address.as_deref().unwrap_or_default(),
            config.default_port,
        )?;
        let request = JoinRequest {
            pool_name: config.pool_name.clone().unwrap_or_default(),
            host_id: host_name.to_string(),
            cluster_id: cluster_name.to_string(),
            size: config.pool_size,
        };

        Self::join_at(
            transport,
            &address,
            request,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .await
    }

    /// Sends `request` to the coordination service at `address`.
    pub async fn join_at(
        transport: &dyn Transport,
        address: &ServerAddress,
        request: JoinRequest,
        connect_timeout: Duration,
    ) -> Result<Self> {
        if request.size <= 0 {
            return Err(RendezvousError::config(format!(
                "invalid or unknown pool size: {}",
                request.size
            )));
        }

        let mut conn = transport
            .connect(address, VIRTUAL_PORT, connect_timeout)
            .await?;
        request.write(&mut conn).await?;

        tracing::debug!(
            pool = %request.pool_name,
            host = %request.host_id,
            "waiting for pool to complete"
        );

        let outcome = protocol::read_join_response(&mut conn, request.size as usize).await?;
        let _ = conn.shutdown().await;

        let membership =
            outcome.map_err(|e| RendezvousError::pool(request.pool_name.clone(), e))?;
        let rank = usize::try_from(membership.rank)
            .ok()
            .filter(|r| *r < membership.size())
            .ok_or_else(|| {
                RendezvousError::protocol(format!(
                    "rank {} out of range for pool of {}",
                    membership.rank,
                    membership.size()
                ))
            })?;

        Ok(Self {
            pool_name: request.pool_name,
            rank,
            host_names: membership.host_ids,
            cluster_names: membership.cluster_ids,
        })
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    /// Number of members in the pool.
    pub fn size(&self) -> usize {
        self.host_names.len()
    }

    /// This member's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn host_name(&self) -> &str {
        &self.host_names[self.rank]
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_names[self.rank]
    }

    pub fn host_name_of(&self, rank: usize) -> Option<&str> {
        self.host_names.get(rank).map(String::as_str)
    }

    pub fn cluster_name_of(&self, rank: usize) -> Option<&str> {
        self.cluster_names.get(rank).map(String::as_str)
    }

    /// Host names of all members, in rank order.
    pub fn host_names(&self) -> &[String] {
        &self.host_names
    }

    /// Cluster names of all members, in rank order.
    pub fn cluster_names(&self) -> &[String] {
        &self.cluster_names
    }
}

impl fmt::Display for PoolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pool info: size = {}; my rank is {}; host list:",
            self.size(),
            self.rank
        )?;
        for (i, (host, cluster)) in self.host_names.iter().zip(&self.cluster_names).enumerate() {
            writeln!(f, "{i}: address = {host} cluster = {cluster}")?;
        }
        Ok(())
    }
}

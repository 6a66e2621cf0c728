//! In-memory pool state for the coordination service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;

use rendezvous_core::coordination::{JoinRequest, Membership};
use rendezvous_core::{PoolError, Statistics};

// Pool locks are never held across an await, so a panic while holding
// one leaves the membership lists consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Members {
    /// Set by the first join with a positive size, never changed after.
    size: Option<usize>,
    host_ids: Vec<String>,
    cluster_ids: Vec<String>,
}

/// A member that has been given a rank and waits for the pool to fill.
#[derive(Debug)]
pub struct Admission {
    pub rank: usize,
    pub size: usize,
    full: watch::Receiver<bool>,
}

impl Admission {
    /// True if this member's join completed the pool.
    pub fn completed_pool(&self) -> bool {
        self.rank + 1 == self.size
    }
}

/// A named barrier of fixed size.
///
/// Members are ranked in the order they are admitted. Every member is
/// released at the moment the last one is admitted; from then on the
/// pool is closed for good.
#[derive(Debug)]
pub struct Pool {
    name: String,
    members: Mutex<Members>,
    full: watch::Sender<bool>,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        let (full, _) = watch::channel(false);
        Self {
            name: name.into(),
            members: Mutex::new(Members::default()),
            full,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pool's size, once a valid join has fixed it.
    pub fn size(&self) -> Option<usize> {
        lock(&self.members).size
    }

    /// Number of members admitted so far.
    pub fn len(&self) -> usize {
        lock(&self.members).host_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        *self.full.borrow()
    }

    /// Admits a member without waiting for the pool to fill.
    ///
    /// Rejections never block: a non-positive size is `InvalidSize`, a
    /// size other than the recorded one is `UnequalSize`, and a pool that
    /// already has all its members is `PoolClosed`.
    pub fn admit(
        &self,
        host_id: &str,
        cluster_id: &str,
        size: i32,
    ) -> Result<Admission, PoolError> {
        if size <= 0 {
            return Err(PoolError::InvalidSize);
        }
        let size = size as usize;

        let mut members = lock(&self.members);
        let expected = *members.size.get_or_insert(size);
        if size != expected {
            return Err(PoolError::UnequalSize);
        }
        if members.host_ids.len() >= expected {
            return Err(PoolError::PoolClosed);
        }

        let rank = members.host_ids.len();
        members.host_ids.push(host_id.to_string());
        members.cluster_ids.push(cluster_id.to_string());

        let full = self.full.subscribe();
        if members.host_ids.len() == expected {
            // Still under the lock: nobody can be admitted between the
            // last member and the release.
            self.full.send_replace(true);
        }

        Ok(Admission { rank, size, full })
    }

    /// Waits until the pool is full and returns the final membership as
    /// seen by the admitted member.
    pub async fn released(&self, admission: Admission) -> Membership {
        let mut full = admission.full;
        // The sender lives in `self`, so this only returns once full.
        let _ = full.wait_for(|full| *full).await;

        let members = lock(&self.members);
        Membership {
            rank: admission.rank as i32,
            host_ids: members.host_ids.clone(),
            cluster_ids: members.cluster_ids.clone(),
        }
    }

    /// Joins the pool and blocks until it is complete.
    pub async fn join(
        &self,
        host_id: &str,
        cluster_id: &str,
        size: i32,
    ) -> Result<Membership, PoolError> {
        let admission = self.admit(host_id, cluster_id, size)?;
        Ok(self.released(admission).await)
    }
}

macro_rules! event {
    ($events:expr, $($arg:tt)+) => {
        if $events {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// All pools of one coordination service, plus its counters.
pub struct CoordinationState {
    /// Pools by name. Created on first reference, never removed.
    pools: Mutex<HashMap<String, Arc<Pool>>>,
    /// Log pool events at info level instead of debug.
    events: bool,
    joins_accepted: AtomicU64,
    joins_rejected: AtomicU64,
    connection_errors: AtomicU64,
    last_pool: Mutex<Option<String>>,
    started_at: DateTime<Utc>,
}

impl CoordinationState {
    pub fn new(events: bool) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            events,
            joins_accepted: AtomicU64::new(0),
            joins_rejected: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            last_pool: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    /// Returns the pool called `name`, creating it if needed.
    pub fn pool(&self, name: &str) -> Arc<Pool> {
        let mut pools = lock(&self.pools);
        if let Some(pool) = pools.get(name) {
            return pool.clone();
        }
        event!(self.events, pool = name, "created new pool");
        let pool = Arc::new(Pool::new(name));
        pools.insert(name.to_string(), pool.clone());
        pool
    }

    /// Runs one join request against its pool.
    pub async fn join(&self, request: &JoinRequest) -> Result<Membership, PoolError> {
        let pool = self.pool(&request.pool_name);
        *lock(&self.last_pool) = Some(request.pool_name.clone());

        event!(
            self.events,
            pool = %request.pool_name,
            host = %request.host_id,
            cluster = %request.cluster_id,
            "member is joining pool"
        );

        let admission = match pool.admit(&request.host_id, &request.cluster_id, request.size) {
            Ok(admission) => admission,
            Err(e) => {
                self.joins_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    pool = %request.pool_name,
                    host = %request.host_id,
                    size = request.size,
                    pool_size = ?pool.size(),
                    "join rejected: {e}"
                );
                return Err(e);
            }
        };
        self.joins_accepted.fetch_add(1, Ordering::Relaxed);

        event!(
            self.events,
            pool = %request.pool_name,
            "{}@{} joins pool, rank {} of {}",
            request.host_id,
            request.cluster_id,
            admission.rank,
            admission.size
        );
        if admission.completed_pool() {
            event!(
                self.events,
                pool = %request.pool_name,
                size = admission.size,
                "pool complete, releasing members"
            );
        }

        Ok(pool.released(admission).await)
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> Statistics {
        let (pools, complete, waiting) = {
            let pools = lock(&self.pools);
            let complete = pools.values().filter(|p| p.is_full()).count();
            let waiting: usize = pools
                .values()
                .filter(|p| !p.is_full())
                .map(|p| p.len())
                .sum();
            (pools.len(), complete, waiting)
        };

        let mut stats = Statistics::new();
        let mut put = |key: &str, value: Option<String>| {
            stats.insert(key.to_string(), value);
        };
        put("pools", Some(pools.to_string()));
        put("pools_complete", Some(complete.to_string()));
        put("members_waiting", Some(waiting.to_string()));
        put(
            "joins_accepted",
            Some(self.joins_accepted.load(Ordering::Relaxed).to_string()),
        );
        put(
            "joins_rejected",
            Some(self.joins_rejected.load(Ordering::Relaxed).to_string()),
        );
        put(
            "connection_errors",
            Some(self.connection_errors.load(Ordering::Relaxed).to_string()),
        );
        put(
            "started_at",
            Some(self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        put("last_pool", lock(&self.last_pool).clone());
        stats
    }
}

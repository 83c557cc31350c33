use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::ArrayQueue;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::auth::AuthRegistry;
use crate::error::{Error, Result};
use crate::opts::Opts;

use super::session::Session;

/// Idle-session pool for one connection configuration.
///
/// The semaphore bounds live sessions at `pool_max_size`; acquisitions past
/// the cap wait instead of over-creating. Idle sessions are only presumed
/// healthy: a broken one surfaces on next use, which is why check-in runs
/// [`Session::reset_for_pool`] as the cheap probe.
pub struct Pool {
    opts: Arc<Opts>,
    registry: Arc<AuthRegistry>,
    idle: ArrayQueue<Session>,
    permits: Arc<Semaphore>,
    min_filled: AtomicBool,
}

impl Pool {
    pub fn new(opts: Arc<Opts>, registry: Arc<AuthRegistry>) -> Self {
        Self {
            idle: ArrayQueue::new(opts.pool_max_size),
            permits: Arc::new(Semaphore::new(opts.pool_max_size)),
            min_filled: AtomicBool::new(opts.pool_min_idle == 0),
            opts,
            registry,
        }
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Check out an idle session or dial a new one, waiting when the pool is
    /// at capacity.
    #[tracing::instrument(skip_all)]
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledSession> {
        self.fill_to_min().await;

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::NotConnected)?;

        let session = match self.idle.pop() {
            Some(session) => session,
            None => self.connect_one().await?,
        };

        Ok(PooledSession {
            session: ManuallyDrop::new(session),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    async fn connect_one(&self) -> Result<Session> {
        Session::connect(Arc::clone(&self.opts), Arc::clone(&self.registry)).await
    }

    /// Lazily pre-fill the idle set to the configured minimum, once.
    async fn fill_to_min(&self) {
        if self.min_filled.swap(true, Ordering::AcqRel) {
            return;
        }
        let target = self.opts.pool_min_idle.min(self.opts.pool_max_size);
        while self.idle.len() < target {
            match self.connect_one().await {
                Ok(session) => {
                    if self.idle.push(session).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "pool warm-up connection failed");
                    break;
                }
            }
        }
    }

    /// Return a session to the idle set, or close it when it is broken or
    /// the pool is full.
    fn check_in(self: &Arc<Self>, session: Session) {
        if session.is_broken() {
            return;
        }

        if !self.opts.pool_reset_conn {
            // No round-trip needed; requeue in place (overflow closes lazily
            // via the session's own drop)
            let _ = self.idle.push(session);
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pool = Arc::clone(self);
        handle.spawn(async move {
            let mut session = session;
            if session.reset_for_pool().await.is_err() {
                session.close().await;
                return;
            }
            if let Err(mut session) = pool.idle.push(session) {
                session.close().await;
            }
        });
    }

    /// Drain and close every idle session.
    pub async fn clear(&self) {
        while let Some(mut session) = self.idle.pop() {
            session.close().await;
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }
}

/// A checked-out session; returns itself to the pool on drop.
pub struct PooledSession {
    pool: Arc<Pool>,
    session: ManuallyDrop<Session>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = Session;
    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        // SAFETY: session is never accessed after this
        let session = unsafe { ManuallyDrop::take(&mut self.session) };
        self.pool.check_in(session);
    }
}

/// Registry of pools, one per normalized connection string.
///
/// Owned by whoever creates sessions (no process-global state); pools are
/// created lazily and live as long as the manager.
pub struct PoolManager {
    pools: Mutex<HashMap<String, Arc<Pool>>>,
    registry: Arc<AuthRegistry>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(AuthRegistry::with_builtin_plugins()))
    }

    /// Use a caller-supplied auth registry (extra plugins, test doubles).
    pub fn with_registry(registry: Arc<AuthRegistry>) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// The pool for a configuration, created on first use.
    ///
    /// The map lock is held only for the lookup, never across I/O.
    pub fn pool(&self, opts: &Opts) -> Arc<Pool> {
        let key = opts.normalized_key();
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(pools.entry(key).or_insert_with(|| {
            Arc::new(Pool::new(
                Arc::new(opts.clone()),
                Arc::clone(&self.registry),
            ))
        }))
    }

    /// Check a session out of the pool for this configuration.
    pub async fn acquire(&self, opts: &Opts) -> Result<PooledSession> {
        self.pool(opts).acquire().await
    }

    /// Drain and close the idle sessions of one configuration's pool, e.g.
    /// after a credential rotation.
    pub async fn clear(&self, opts: &Opts) {
        let existing = {
            let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
            pools.remove(&opts.normalized_key())
        };
        if let Some(pool) = existing {
            pool.clear().await;
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

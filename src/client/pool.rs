//! Bounded, non-blocking object pool for client connections.
//!
//! # Responsibilities
//! - Hand out idle connections, creating new ones up to `max_total`
//! - Validate on create, borrow and return
//! - Periodically evict idle connections that aged out or went inactive
//!
//! # Design Decisions
//! - Exhaustion is reported immediately rather than waited out
//! - Idle connections are reused most-recently-returned first
//! - Each eviction sweep examines the older half of the idle set

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::error::ClientError;
use crate::config::ClientConfig;
use crate::observability::metrics;

/// Failures of pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool exhausted, all {max_total} objects are borrowed")]
    Exhausted { max_total: usize },

    #[error("pool is closed")]
    Closed,

    #[error("unable to create a pooled object: {0}")]
    Create(#[source] Box<ClientError>),

    #[error("unable to validate a newly created object")]
    InvalidOnCreate,
}

/// Creates, validates and destroys the objects a [`ConnectionPool`] manages.
pub trait PooledObjectFactory: Send + Sync + 'static {
    type Object: Send + 'static;

    fn create(&self) -> impl Future<Output = Result<Self::Object, ClientError>> + Send;

    /// Whether the object can still be used.
    fn validate(&self, object: &Self::Object) -> bool;

    fn destroy(&self, object: Self::Object);
}

/// Pool policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_total: usize,
    pub min_evictable_idle: Duration,
    pub eviction_interval: Duration,
    pub test_on_create: bool,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
}

impl PoolConfig {
    /// Pool sized to the client's worker concurrency, with every check enabled.
    pub fn from_client(config: &ClientConfig) -> Self {
        Self {
            max_total: config.workers,
            min_evictable_idle: config.min_evictable_idle(),
            eviction_interval: config.eviction_interval(),
            test_on_create: true,
            test_on_borrow: true,
            test_on_return: true,
            test_while_idle: true,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_client(&ClientConfig::default())
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub borrowed: usize,
}

struct Idle<T> {
    object: T,
    since: Instant,
}

struct PoolState<T> {
    /// Front holds the most recently returned object.
    idle: VecDeque<Idle<T>>,
    /// Objects handed out or being created.
    borrowed: usize,
}

/// A bounded pool of objects produced by `F`.
pub struct ConnectionPool<F: PooledObjectFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Object>>,
    closed: AtomicBool,
}

enum Candidate<T> {
    Idle(T),
    Create,
}

/// A borrowed slot whose object is still being created.
///
/// Dropping it gives the slot back; [`keep`](Self::keep) hands it to the caller.
struct SlotReservation<'a, F: PooledObjectFactory> {
    pool: &'a ConnectionPool<F>,
}

impl<F: PooledObjectFactory> SlotReservation<'_, F> {
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl<F: PooledObjectFactory> Drop for SlotReservation<'_, F> {
    fn drop(&mut self) {
        self.pool.release_slot();
    }
}

impl<F: PooledObjectFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                borrowed: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            idle: state.idle.len(),
            borrowed: state.borrowed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Borrow an object, reusing an idle one or creating a new one.
    ///
    /// Never waits for a borrowed object to come back.
    pub async fn borrow(&self) -> Result<F::Object, PoolError> {
        loop {
            if self.is_closed() {
                return Err(PoolError::Closed);
            }

            let candidate = {
                let mut state = self.lock();
                if let Some(idle) = state.idle.pop_front() {
                    state.borrowed += 1;
                    Candidate::Idle(idle.object)
                } else if state.borrowed < self.config.max_total {
                    state.borrowed += 1;
                    Candidate::Create
                } else {
                    metrics::record_pool_borrow("exhausted");
                    return Err(PoolError::Exhausted {
                        max_total: self.config.max_total,
                    });
                }
            };

            match candidate {
                Candidate::Idle(object) => {
                    if !self.config.test_on_borrow || self.factory.validate(&object) {
                        metrics::record_pool_borrow("reused");
                        return Ok(object);
                    }
                    tracing::debug!("Idle object failed validation on borrow, destroying");
                    self.release_slot();
                    self.factory.destroy(object);
                }
                Candidate::Create => {
                    // Released on every exit, including a dropped borrow future.
                    let reservation = SlotReservation { pool: self };
                    let object = match self.factory.create().await {
                        Ok(object) => object,
                        Err(e) => {
                            metrics::record_pool_borrow("create_failed");
                            return Err(PoolError::Create(Box::new(e)));
                        }
                    };
                    if self.config.test_on_create && !self.factory.validate(&object) {
                        drop(reservation);
                        self.factory.destroy(object);
                        return Err(PoolError::InvalidOnCreate);
                    }
                    reservation.keep();
                    metrics::record_pool_borrow("created");
                    return Ok(object);
                }
            }
        }
    }

    /// Return a borrowed object.
    ///
    /// Objects that fail validation, or come back after close, are destroyed.
    pub fn give_back(&self, object: F::Object) -> Result<(), PoolError> {
        if self.is_closed() {
            self.release_slot();
            self.factory.destroy(object);
            return Err(PoolError::Closed);
        }
        if self.config.test_on_return && !self.factory.validate(&object) {
            tracing::debug!("Returned object failed validation, destroying");
            self.release_slot();
            self.factory.destroy(object);
            return Ok(());
        }

        let mut state = self.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        state.idle.push_front(Idle {
            object,
            since: Instant::now(),
        });
        Ok(())
    }

    /// Destroy a borrowed object instead of returning it.
    pub fn invalidate(&self, object: F::Object) {
        self.release_slot();
        self.factory.destroy(object);
    }

    /// Run one eviction sweep. Returns the number of destroyed objects.
    pub fn evict(&self) -> usize {
        let doomed = {
            let mut state = self.lock();
            let tests = state.idle.len().div_ceil(2);
            let mut doomed = Vec::new();
            let mut kept = VecDeque::with_capacity(tests);
            for _ in 0..tests {
                let Some(idle) = state.idle.pop_back() else { break };
                let expired = idle.since.elapsed() >= self.config.min_evictable_idle;
                let invalid = self.config.test_while_idle && !self.factory.validate(&idle.object);
                if expired || invalid {
                    doomed.push(idle.object);
                } else {
                    kept.push_front(idle);
                }
            }
            state.idle.extend(kept);
            doomed
        };

        let evicted = doomed.len();
        for object in doomed {
            self.factory.destroy(object);
        }
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle pooled objects");
        }
        evicted
    }

    /// Close the pool and destroy every idle object. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle: Vec<_> = self.lock().idle.drain(..).collect();
        let destroyed = idle.len();
        for entry in idle {
            self.factory.destroy(entry.object);
        }
        tracing::debug!(destroyed, "Pool closed");
    }

    fn release_slot(&self) {
        let mut state = self.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<F::Object>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: PooledObjectFactory> ConnectionPool<F> {
    /// Run [`evict`](Self::evict) every `eviction_interval` until `stop` fires.
    pub fn spawn_evictor(self: &Arc<Self>, tasks: &TaskTracker, stop: CancellationToken) {
        let period = self.config.eviction_interval;
        if period.is_zero() {
            tracing::debug!("Pool eviction disabled");
            return;
        }
        let pool = Arc::clone(self);
        tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.evict();
                    }
                }
            }
            tracing::debug!("Pool evictor stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Objects are numbers; odd numbers listed in `broken` fail validation.
    #[derive(Default)]
    struct Numbers {
        next: AtomicUsize,
        destroyed: Mutex<Vec<usize>>,
        broken: Mutex<Vec<usize>>,
        fail_create: AtomicBool,
        slow_create: AtomicBool,
    }

    impl PooledObjectFactory for Arc<Numbers> {
        type Object = usize;

        async fn create(&self) -> Result<usize, ClientError> {
            if self.slow_create.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ClientError::Protocol("refused".into()));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }

        fn validate(&self, object: &usize) -> bool {
            !self.broken.lock().unwrap().contains(object)
        }

        fn destroy(&self, object: usize) {
            self.destroyed.lock().unwrap().push(object);
        }
    }

    fn pool(max_total: usize) -> (ConnectionPool<Arc<Numbers>>, Arc<Numbers>) {
        let factory = Arc::new(Numbers::default());
        let config = PoolConfig {
            max_total,
            min_evictable_idle: Duration::from_secs(60),
            ..PoolConfig::default()
        };
        (ConnectionPool::new(Arc::clone(&factory), config), factory)
    }

    #[tokio::test]
    async fn exhaustion_fails_immediately() {
        let (pool, _) = pool(1);
        let held = pool.borrow().await.unwrap();
        assert!(matches!(pool.borrow().await, Err(PoolError::Exhausted { max_total: 1 })));

        pool.give_back(held).unwrap();
        assert_eq!(pool.borrow().await.unwrap(), held);
    }

    #[tokio::test]
    async fn borrow_skips_objects_that_went_invalid() {
        let (pool, factory) = pool(2);
        let first = pool.borrow().await.unwrap();
        pool.give_back(first).unwrap();
        factory.broken.lock().unwrap().push(first);

        let second = pool.borrow().await.unwrap();
        assert_ne!(second, first);
        assert_eq!(*factory.destroyed.lock().unwrap(), vec![first]);
        assert_eq!(pool.stats(), PoolStats { idle: 0, borrowed: 1 });
    }

    #[tokio::test]
    async fn invalid_returns_are_destroyed() {
        let (pool, factory) = pool(1);
        let object = pool.borrow().await.unwrap();
        factory.broken.lock().unwrap().push(object);

        pool.give_back(object).unwrap();
        assert_eq!(pool.stats(), PoolStats { idle: 0, borrowed: 0 });
        assert_eq!(*factory.destroyed.lock().unwrap(), vec![object]);
    }

    #[tokio::test]
    async fn create_failure_releases_the_slot() {
        let (pool, factory) = pool(1);
        factory.fail_create.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow().await, Err(PoolError::Create(_))));

        factory.fail_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_create_releases_the_slot() {
        let (pool, factory) = pool(1);
        factory.slow_create.store(true, Ordering::SeqCst);
        assert!(tokio::time::timeout(Duration::from_millis(20), pool.borrow())
            .await
            .is_err());
        assert_eq!(pool.stats(), PoolStats { idle: 0, borrowed: 0 });

        factory.slow_create.store(false, Ordering::SeqCst);
        assert!(pool.borrow().await.is_ok());
        assert_eq!(pool.stats().borrowed, 1);
    }

    #[tokio::test]
    async fn invalid_on_create_releases_the_slot() {
        let (pool, factory) = pool(1);
        factory.broken.lock().unwrap().push(0);
        assert!(matches!(pool.borrow().await, Err(PoolError::InvalidOnCreate)));
        assert_eq!(pool.stats(), PoolStats { idle: 0, borrowed: 0 });
        assert_eq!(pool.borrow().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn eviction_examines_older_half() {
        let factory = Arc::new(Numbers::default());
        let pool = ConnectionPool::new(
            Arc::clone(&factory),
            PoolConfig {
                max_total: 4,
                min_evictable_idle: Duration::ZERO,
                ..PoolConfig::default()
            },
        );
        let objects = [
            pool.borrow().await.unwrap(),
            pool.borrow().await.unwrap(),
            pool.borrow().await.unwrap(),
            pool.borrow().await.unwrap(),
        ];
        for object in objects {
            pool.give_back(object).unwrap();
        }

        assert_eq!(pool.evict(), 2);
        // The first two returned are the oldest.
        assert_eq!(*factory.destroyed.lock().unwrap(), vec![objects[0], objects[1]]);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn eviction_keeps_fresh_valid_objects() {
        let (pool, factory) = pool(2);
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        pool.give_back(a).unwrap();
        pool.give_back(b).unwrap();

        assert_eq!(pool.evict(), 0);
        factory.broken.lock().unwrap().push(a);
        assert_eq!(pool.evict(), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn close_destroys_idle_and_rejects_later_use() {
        let (pool, factory) = pool(2);
        let a = pool.borrow().await.unwrap();
        let b = pool.borrow().await.unwrap();
        pool.give_back(a).unwrap();

        pool.close();
        pool.close();
        assert_eq!(*factory.destroyed.lock().unwrap(), vec![a]);
        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));
        assert!(matches!(pool.give_back(b), Err(PoolError::Closed)));
        assert_eq!(pool.stats(), PoolStats { idle: 0, borrowed: 0 });
    }
}

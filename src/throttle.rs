//! Bounded-concurrency gate in front of the catalog store.
//!
//! One `ConnectionThrottle` is built per process and shared by reference
//! (`Arc`) with every reconciler, so all persistence calls queue on the same
//! permits no matter which flow issued them. Waiters are served in FIFO order.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use crate::error::{SyncError, SyncResult};
use crate::store::CatalogStore;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleStatus {
    pub active: usize,
    pub queued: usize,
    pub max: usize,
}

pub struct ConnectionThrottle {
    permits: Semaphore,
    max: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// Decrements its counter on drop, including when the owning future is
/// cancelled or the operation panics.
struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        CounterGuard(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConnectionThrottle {
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            permits: Semaphore::new(max),
            max,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Run `operation` while holding one permit.
    ///
    /// The permit is released when this call returns, whether `operation`
    /// succeeded, failed, or the caller was dropped mid-flight. Fails with
    /// `ThrottleClosed` once `drain_and_close` has run.
    pub async fn run<F, T>(&self, operation: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let permit = {
            let _waiting = CounterGuard::enter(&self.queued);
            self.permits.acquire().await
        };
        let _permit = permit.map_err(|_| SyncError::ThrottleClosed)?;
        // declared after the permit so it drops first: `active` never
        // exceeds the number of permits handed out
        let _active = CounterGuard::enter(&self.active);
        operation.await
    }

    pub fn status(&self) -> ThrottleStatus {
        ThrottleStatus {
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            max: self.max,
        }
    }

    /// Wait until every in-flight and queued operation has finished, refuse
    /// new ones, then close the store.
    pub async fn drain_and_close<S>(&self, store: &S) -> SyncResult<()>
    where
        S: CatalogStore + ?Sized,
    {
        log::info!("Draining connection throttle: {:?}", self.status());
        let all = self
            .permits
            .acquire_many(self.max as u32)
            .await
            .map_err(|_| SyncError::ThrottleClosed)?;
        self.permits.close();
        drop(all);

        log::info!("Throttle drained ({:?}), closing store", self.status());
        store.close().await
    }
}

impl Default for ConnectionThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_operation_result() {
        let throttle = ConnectionThrottle::new(2);
        let value = throttle.run(async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(value, 42);

        let err = throttle
            .run(async { Err::<(), _>(SyncError::NotFound("x".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert_eq!(throttle.status(), ThrottleStatus { active: 0, queued: 0, max: 2 });
    }

    #[tokio::test]
    async fn test_zero_max_is_clamped() {
        let throttle = ConnectionThrottle::new(0);
        assert_eq!(throttle.status().max, 1);
        assert!(throttle.run(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_active_never_exceeds_max() {
        let throttle = Arc::new(ConnectionThrottle::new(5));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let throttle = throttle.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let inner = throttle.clone();
                throttle
                    .run(async move {
                        let seen = inner.status().active;
                        peak.fetch_max(seen, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2 + i % 5)).await;
                        Ok(i)
                    })
                    .await
            }));
        }

        let mut done = 0;
        for handle in handles {
            handle.await.unwrap().unwrap();
            done += 1;
        }
        assert_eq!(done, 50);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert_eq!(throttle.status().active, 0);
        assert_eq!(throttle.status().queued, 0);
    }

    #[tokio::test]
    async fn test_status_reports_queued_callers() {
        let throttle = Arc::new(ConnectionThrottle::new(1));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle
                    .run(async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        let waiter = {
            let throttle = throttle.clone();
            tokio::spawn(async move { throttle.run(async { Ok(()) }).await })
        };

        for _ in 0..100 {
            if throttle.status().queued == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(throttle.status(), ThrottleStatus { active: 1, queued: 1, max: 1 });

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(throttle.status(), ThrottleStatus { active: 0, queued: 0, max: 1 });
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let throttle = Arc::new(ConnectionThrottle::new(1));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let throttle = throttle.clone();
            tokio::spawn(async move {
                throttle
                    .run(async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            throttle.run(async { Ok(()) }),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(throttle.status().queued, 0);

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
    }
}

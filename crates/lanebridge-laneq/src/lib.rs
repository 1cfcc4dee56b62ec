//! Lane Queue (spec §4.1 "C1 Lane Queue"): per-key FIFO serialization with
//! bounded global concurrency.
//!
//! Grounded on the teacher's `ResponsePoller` polling loop (one worker per
//! in-flight conversation, coordinated through shared state guarded by a
//! lock) and `aomi-backend`'s `dashmap`-backed session registry — lanes
//! here are the same "one concurrent worker per key, looked up through a
//! concurrent map" shape, generalized from one session at a time to an
//! explicit FIFO queue per lane plus a global concurrency cap.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LaneError {
    #[error("lane closed before the job could be enqueued")]
    LaneClosed,
    #[error("lane worker task panicked while running this job")]
    WorkerPanicked,
}

type JobHandle = tokio::task::JoinHandle<()>;
type Job = Box<dyn FnOnce() -> JobHandle + Send>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
struct LaneHandle {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    last_active_ms: Arc<AtomicI64>,
}

/// Configuration for a [`LaneQueue`].
#[derive(Debug, Clone, Copy)]
pub struct LaneQueueConfig {
    /// Invariant (b): total active tasks across all lanes never exceeds this.
    pub max_concurrency: usize,
    /// How often the idle-lane reaper runs (spec §4.1 invariant d: "lanes
    /// are created lazily and removed when idle").
    pub reap_interval: Duration,
}

impl Default for LaneQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Per-key FIFO serialization with bounded global concurrency.
///
/// Tasks sharing a `lane_key` execute strictly FIFO (invariant c);
/// across lanes, at most `max_concurrency` tasks run in parallel
/// (invariant b). A job that panics does not corrupt lane state or block
/// subsequent items in the same lane (spec §4.1 "Failure").
pub struct LaneQueue {
    lanes: Arc<DashMap<String, LaneHandle>>,
    semaphore: Arc<Semaphore>,
    config: LaneQueueConfig,
}

impl LaneQueue {
    pub fn new(config: LaneQueueConfig) -> Self {
        let lanes: Arc<DashMap<String, LaneHandle>> = Arc::new(DashMap::new());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));

        let reap_lanes = lanes.clone();
        let reap_interval = config.reap_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reap_interval);
            loop {
                ticker.tick().await;
                reap_lanes.retain(|key, handle| {
                    let idle = handle.pending.load(Ordering::SeqCst) == 0;
                    if idle {
                        debug!(lane = %key, "reaping idle lane");
                    }
                    !idle
                });
            }
        });

        Self {
            lanes,
            semaphore,
            config,
        }
    }

    pub fn with_max_concurrency(max_concurrency: usize) -> Self {
        Self::new(LaneQueueConfig {
            max_concurrency,
            ..LaneQueueConfig::default()
        })
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn handle_for(&self, lane_key: &str) -> LaneHandle {
        if let Some(existing) = self.lanes.get(lane_key) {
            return existing.clone();
        }

        self.lanes
            .entry(lane_key.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel::<Job>();
                let pending = Arc::new(AtomicUsize::new(0));
                let last_active_ms = Arc::new(AtomicI64::new(now_ms()));
                let semaphore = self.semaphore.clone();
                let key = lane_key.to_string();
                let pending_for_worker = pending.clone();
                let last_active_for_worker = last_active_ms.clone();
                tokio::spawn(run_lane(
                    key,
                    rx,
                    semaphore,
                    pending_for_worker,
                    last_active_for_worker,
                ));
                LaneHandle {
                    tx,
                    pending,
                    last_active_ms,
                }
            })
            .clone()
    }

    /// Enqueue `work` on `lane_key`. Resolves once `work` has run to
    /// completion (or the lane's worker panicked while running it).
    pub async fn enqueue<F, T>(&self, lane_key: impl Into<String>, work: F) -> Result<T, LaneError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let lane_key = lane_key.into();
        let handle = self.handle_for(&lane_key);
        handle.pending.fetch_add(1, Ordering::SeqCst);

        let (result_tx, result_rx) = oneshot::channel::<T>();
        let job: Job = Box::new(move || {
            tokio::spawn(async move {
                let value = work.await;
                let _ = result_tx.send(value);
            })
        });

        if handle.tx.send(job).is_err() {
            handle.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(LaneError::LaneClosed);
        }

        result_rx.await.map_err(|_| LaneError::WorkerPanicked)
    }
}

async fn run_lane(
    lane_key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    last_active_ms: Arc<AtomicI64>,
) {
    while let Some(job) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break, // semaphore closed: process is shutting down
        };
        last_active_ms.store(now_ms(), Ordering::SeqCst);

        let join_handle = job();
        if let Err(join_err) = join_handle.await {
            warn!(lane = %lane_key, error = %join_err, "lane job panicked; lane continues with next item");
        }

        pending.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
    }
    info!(lane = %lane_key, "lane worker exiting (no more senders)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn fifo_within_one_lane() {
        // P1: for two messages enqueued on the same lane in order, their
        // start timestamps are ordered and m1 completes before m2 starts.
        let queue = LaneQueue::with_max_concurrency(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order1 = order.clone();
        let first = queue.enqueue("lane-a", async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            order1.lock().await.push(1);
        });

        let order2 = order.clone();
        let second = queue.enqueue("lane-a", async move {
            order2.lock().await.push(2);
        });

        let (r1, r2) = tokio::join!(first, second);
        r1.unwrap();
        r2.unwrap();

        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_lanes_run_concurrently() {
        let queue = LaneQueue::with_max_concurrency(10);
        let started = Arc::new(AtomicU32::new(0));

        let s1 = started.clone();
        let s2 = started.clone();
        let a = queue.enqueue("lane-a", async move {
            s1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        let b = queue.enqueue("lane-b", async move {
            s2.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        // Both should have started despite neither having finished: they're
        // on different lanes so they don't serialize against each other.
        assert_eq!(started.load(Ordering::SeqCst), 2);

        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected_across_lanes() {
        // P2: at any instant, running tasks never exceed max_concurrency.
        let queue = Arc::new(LaneQueue::with_max_concurrency(2));
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(format!("lane-{i}"), async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(40)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }

        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn panicking_job_does_not_block_subsequent_jobs_in_the_lane() {
        let queue = LaneQueue::with_max_concurrency(10);

        let panicking = queue.enqueue("lane-a", async { panic!("boom") });
        let panic_result: Result<(), LaneError> = panicking.await;
        assert_eq!(panic_result, Err(LaneError::WorkerPanicked));

        let next = queue.enqueue("lane-a", async { 42 }).await;
        assert_eq!(next, Ok(42));
    }

    #[tokio::test]
    async fn lane_is_created_lazily_and_reused() {
        let queue = LaneQueue::with_max_concurrency(10);
        assert_eq!(queue.lane_count(), 0);
        queue.enqueue("lane-a", async { 1 }).await.unwrap();
        assert_eq!(queue.lane_count(), 1);
        queue.enqueue("lane-a", async { 2 }).await.unwrap();
        assert_eq!(queue.lane_count(), 1, "same lane key must reuse the lane");
    }

    #[tokio::test]
    async fn idle_lanes_are_reaped() {
        let queue = LaneQueue::new(LaneQueueConfig {
            max_concurrency: 10,
            reap_interval: Duration::from_millis(20),
        });
        queue.enqueue("lane-a", async { 1 }).await.unwrap();
        assert_eq!(queue.lane_count(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(queue.lane_count(), 0, "idle lane should have been reaped");
    }
}

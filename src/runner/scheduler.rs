//! Bounded-parallelism trial scheduler.
//!
//! A fixed pool of workers pulls trial indices from a shared counter, so at
//! most `parallel` trials are in flight and a slow trial never blocks the
//! others. Results land in a pre-sized slot array indexed by trial, which
//! keeps the output in trial order regardless of completion order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::join_all;
use tracing::debug;

/// Schedules `num_trials` trials with at most `parallel` running at once.
#[derive(Debug, Clone, Copy)]
pub struct TrialScheduler {
    num_trials: usize,
    parallel: usize,
}

impl TrialScheduler {
    pub fn new(num_trials: usize, parallel: usize) -> Self {
        Self {
            num_trials,
            parallel: parallel.max(1),
        }
    }

    /// Number of workers actually started.
    pub fn workers(&self) -> usize {
        self.parallel.min(self.num_trials)
    }

    /// Runs `run_trial(id)` for ids `1..=num_trials` and returns the results
    /// ordered by id.
    pub async fn run<T, F, Fut>(&self, run_trial: F) -> Vec<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = T>,
    {
        let total = self.num_trials;
        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<T>>> = Mutex::new((0..total).map(|_| None).collect());

        let workers = (0..self.workers()).map(|worker| {
            let next = &next;
            let slots = &slots;
            let run_trial = &run_trial;
            async move {
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= total {
                        break;
                    }
                    debug!(worker, trial_id = index + 1, "Worker picked trial");
                    let result = run_trial(index as u32 + 1).await;
                    if let Ok(mut slots) = slots.lock() {
                        slots[index] = Some(result);
                    }
                }
            }
        });
        join_all(workers).await;

        slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_trial_order() {
        let scheduler = TrialScheduler::new(3, 3);
        // Trial 1 finishes last.
        let results = scheduler
            .run(|id| async move {
                tokio::time::sleep(Duration::from_millis(40 / id as u64)).await;
                id
            })
            .await;
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_parallelism_bound() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let scheduler = TrialScheduler::new(8, 2);

        let results = scheduler
            .run(|id| {
                let in_flight = &in_flight;
                let peak = &peak;
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    id
                }
            })
            .await;

        assert_eq!(results, (1..=8).collect::<Vec<u32>>());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_trials() {
        let scheduler = TrialScheduler::new(0, 4);
        assert_eq!(scheduler.workers(), 0);
        let results: Vec<u32> = scheduler.run(|id| async move { id }).await;
        assert!(results.is_empty());
    }

    #[test]
    fn test_workers_capped_by_trials() {
        assert_eq!(TrialScheduler::new(2, 8).workers(), 2);
        assert_eq!(TrialScheduler::new(10, 0).workers(), 1);
    }
}

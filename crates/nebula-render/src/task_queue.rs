//! Pending compile tasks with distance ordering and a recompile quota.
//!
//! [`CompileTaskQueue::poll`] picks the nearest task, but keeps first-time
//! compiles from starving behind a stream of recompiles: after `quota`
//! consecutive recompiles the nearest first-time compile wins regardless of
//! distance.

use std::sync::{Mutex, MutexGuard, PoisonError};

use glam::DVec3;

use crate::task::CompileTask;

/// Default number of consecutive recompiles allowed before an initial compile.
pub const DEFAULT_RECOMPILE_QUOTA: u32 = 2;

struct QueueState {
    tasks: Vec<CompileTask>,
    recompile_quota: u32,
}

/// Mutex-guarded set of pending tasks.
pub struct CompileTaskQueue {
    state: Mutex<QueueState>,
    max_quota: u32,
}

impl CompileTaskQueue {
    /// Creates an empty queue allowing `recompile_quota` recompiles in a row.
    pub fn new(recompile_quota: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: Vec::new(),
                recompile_quota,
            }),
            max_quota: recompile_quota,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a task.
    pub fn add(&self, task: CompileTask) {
        self.lock().tasks.push(task);
    }

    /// Removes and returns the next task for a camera at `camera`.
    ///
    /// Cancelled tasks are dropped without being returned.
    pub fn poll(&self, camera: DVec3) -> Option<CompileTask> {
        let mut state = self.lock();
        state.tasks.retain(|task| !task.is_cancelled());

        let mut initial: Option<(usize, f64)> = None;
        let mut recompile: Option<(usize, f64)> = None;
        for (i, task) in state.tasks.iter().enumerate() {
            let distance = task.distance_squared(camera);
            let best = if task.is_recompile {
                &mut recompile
            } else {
                &mut initial
            };
            if best.is_none_or(|(_, d)| distance < d) {
                *best = Some((i, distance));
            }
        }

        let take_initial = match (initial, recompile) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some((_, di)), Some((_, dr))) => state.recompile_quota == 0 || di <= dr,
        };

        if take_initial {
            state.recompile_quota = self.max_quota;
            let (i, _) = initial?;
            Some(state.tasks.swap_remove(i))
        } else {
            state.recompile_quota = state.recompile_quota.saturating_sub(1);
            let (i, _) = recompile?;
            Some(state.tasks.swap_remove(i))
        }
    }

    /// Cancels and drops every queued task.
    pub fn clear(&self) {
        let mut state = self.lock();
        for task in state.tasks.drain(..) {
            task.handle().cancel();
        }
        state.recompile_quota = self.max_quota;
    }

    /// Number of queued tasks, cancelled ones included. Advisory.
    pub fn size(&self) -> usize {
        self.lock().tasks.len()
    }
}

impl Default for CompileTaskQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RECOMPILE_QUOTA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_voxel::SectionPos;
    use std::sync::Arc;

    fn initial(x: i32) -> CompileTask {
        CompileTask::rebuild(SectionPos::new(x, 0, 0), None, false)
    }

    fn recompile(x: i32) -> CompileTask {
        CompileTask::rebuild(SectionPos::new(x, 0, 0), None, true)
    }

    #[test]
    fn test_empty_queue_polls_none() {
        assert!(CompileTaskQueue::default().poll(DVec3::ZERO).is_none());
    }

    #[test]
    fn test_nearest_first_within_kind() {
        let queue = CompileTaskQueue::default();
        queue.add(initial(5));
        queue.add(initial(1));
        queue.add(initial(3));
        let order: Vec<i32> = (0..3)
            .map(|_| queue.poll(DVec3::ZERO).unwrap().section.x)
            .collect();
        assert_eq!(order, vec![1, 3, 5]);
    }

    /// An initial compile at least as close as the best recompile wins.
    #[test]
    fn test_initial_wins_ties() {
        let queue = CompileTaskQueue::default();
        queue.add(recompile(2));
        queue.add(initial(2));
        let task = queue.poll(DVec3::ZERO).unwrap();
        assert!(!task.is_recompile);
    }

    /// With closer recompiles streaming in, an initial compile still comes out
    /// at least every `quota + 1` polls.
    #[test]
    fn test_quota_fairness() {
        let quota = DEFAULT_RECOMPILE_QUOTA;
        let queue = CompileTaskQueue::new(quota);
        queue.add(initial(100));
        for i in 0..10 {
            queue.add(recompile(i));
        }

        let mut consecutive = 0;
        let mut initial_seen = false;
        for _ in 0..(quota + 1) {
            queue.add(recompile(0));
            let task = queue.poll(DVec3::ZERO).unwrap();
            if task.is_recompile {
                consecutive += 1;
            } else {
                initial_seen = true;
                break;
            }
        }
        assert!(initial_seen);
        assert_eq!(consecutive, quota);
    }

    /// The quota is a parameter: zero means initial compiles always go first.
    #[test]
    fn test_zero_quota_prefers_initial() {
        let queue = CompileTaskQueue::new(0);
        queue.add(recompile(0));
        queue.add(initial(50));
        assert!(!queue.poll(DVec3::ZERO).unwrap().is_recompile);
        assert!(queue.poll(DVec3::ZERO).unwrap().is_recompile);
    }

    /// Tasks cancelled before polling are never returned and leave the queue.
    #[test]
    fn test_cancelled_tasks_are_dropped() {
        let queue = CompileTaskQueue::default();
        let near = initial(0);
        near.handle().cancel();
        queue.add(near);
        queue.add(initial(9));
        assert_eq!(queue.size(), 2);
        assert_eq!(queue.poll(DVec3::ZERO).unwrap().section.x, 9);
        assert_eq!(queue.size(), 0);
        assert!(queue.poll(DVec3::ZERO).is_none());
    }

    #[test]
    fn test_clear_cancels_everything() {
        let queue = CompileTaskQueue::default();
        let task = initial(0);
        let handle = task.handle().clone();
        queue.add(task);
        queue.clear();
        assert!(handle.is_cancelled());
        assert_eq!(queue.size(), 0);
    }

    /// Concurrent adds and polls neither lose nor duplicate tasks.
    #[test]
    fn test_concurrent_add_and_poll() {
        let queue = Arc::new(CompileTaskQueue::default());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.add(CompileTask::rebuild(SectionPos::new(p, i, 0), None, i % 2 == 0));
                    }
                })
            })
            .collect();

        let mut polled = Vec::new();
        let start = std::time::Instant::now();
        while polled.len() < 200 {
            if let Some(task) = queue.poll(DVec3::ZERO) {
                polled.push(task.section);
            }
            assert!(start.elapsed().as_secs() < 5, "Timed out");
        }
        for producer in producers {
            producer.join().unwrap();
        }
        polled.sort();
        polled.dedup();
        assert_eq!(polled.len(), 200);
    }
}

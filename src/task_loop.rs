//! A reservation-capable cooperative task loop.
//!
//! The loop sequences parameter-less work items on a single logical
//! consumer: the task that called [`TaskLoop::start`]. Work enters the
//! queue through a [`Reservation`]: a promise, taken out before spawning
//! background work, to enqueue exactly one item later. Outstanding
//! reservations keep the loop alive while its queue is empty, so a
//! background producer can finish its I/O and still get its continuation
//! run on the loop.
//!
//! # Ordering and fairness
//!
//! The consumer drains the queue in batches: it swaps the whole queue out
//! under the lock and runs the captured items in FIFO order. Items enqueued
//! while a batch is running form the next batch, which keeps producers from
//! starving the cancellation check. Cancellation is checked between items;
//! a running item is never interrupted.
//!
//! # Restart safety
//!
//! Every `start` opens a new generation. A reservation snapshots the
//! generation it was taken under; committing it after the loop has moved on
//! is refused (the commit returns `false` and the item is dropped), so a
//! producer left over from a cancelled run can never leak work into the
//! next one. `start` also resets the reservation count, dropping the claim
//! such producers held on the previous run.
//!
//! # Wakeups
//!
//! The wakeup signal is a [`Notify`], which stores at most one permit:
//! back-to-back signals coalesce. That is sufficient because producers
//! always enqueue under the lock before signalling, and the consumer
//! re-reads the queue and reservation count under the lock after every
//! wake, so a coalesced signal can never hide pending work.
//!
//! Work items that panic are the caller's responsibility; the loop makes no
//! attempt to catch unwinding and treats it as fatal to the current
//! `start`.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Notify};

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct LoopState {
    queue: Vec<Task>,
    started: u64,
    reserved: usize,
}

/// A single-consumer cooperative scheduler with external reservations.
pub struct TaskLoop {
    state: Mutex<LoopState>,
    wakeup: Notify,
}

impl TaskLoop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoopState::default()),
            wakeup: Notify::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        // The lock is never held across a work item or an await point, so
        // poisoning would require a panic inside this module itself.
        self.state.lock().expect("task loop state poisoned")
    }

    /// Reserves a spot on the loop, keeping it alive until the returned
    /// [`Reservation`] is committed or the loop is restarted.
    pub fn reserve(self: &Arc<Self>) -> Reservation {
        let mut state = self.state();
        state.reserved += 1;
        let generation = state.started;
        drop(state);

        Reservation {
            task_loop: Arc::clone(self),
            generation,
        }
    }

    /// Runs the loop until the queue is drained with no outstanding
    /// reservations, or until cancellation is observed. The seed item is
    /// queued first.
    ///
    /// Reservations taken during this run become stale once `start`
    /// returns: their commits will refuse, even if the loop is started
    /// again. Dropping the cancellation sender counts as cancellation.
    pub async fn start(
        &self,
        mut cancelled: watch::Receiver<bool>,
        seed: impl FnOnce() + Send + 'static,
    ) {
        {
            let mut state = self.state();
            state.started += 1;
            state.reserved = 0;
            state.queue.push(Box::new(seed));
            tracing::debug!(generation = state.started, "task loop started");
        }

        loop {
            if *cancelled.borrow() {
                tracing::debug!("task loop cancelled");
                return;
            }

            // Swap the pending batch out; later enqueues go to the next one.
            let (batch, reserved) = {
                let mut state = self.state();
                let batch = std::mem::take(&mut state.queue);
                (batch, state.reserved)
            };

            if batch.is_empty() {
                if reserved == 0 {
                    tracing::debug!("task loop idle, returning");
                    return;
                }
                // Empty queue but reservations outstanding: sleep until a
                // producer commits or the run is cancelled.
                tokio::select! {
                    _ = cancelled.wait_for(|c| *c) => {
                        tracing::debug!("task loop cancelled while awaiting reservations");
                        return;
                    }
                    _ = self.wakeup.notified() => {}
                }
            }

            for task in batch {
                if *cancelled.borrow() {
                    tracing::debug!("task loop cancelled mid-batch");
                    return;
                }
                task();
            }
        }
    }

    fn commit(&self, generation: u64, task: Task) -> bool {
        {
            let mut state = self.state();
            if state.started != generation {
                return false;
            }
            state.queue.push(task);
            state.reserved -= 1;
        }
        self.wakeup.notify_one();
        true
    }
}

/// A single-shot promise to enqueue one work item on the loop.
///
/// Committing consumes the reservation. A reservation that outlives its
/// generation (because the loop returned and was restarted) refuses the
/// commit and drops the item.
pub struct Reservation {
    task_loop: Arc<TaskLoop>,
    generation: u64,
}

impl Reservation {
    /// Enqueues `task` and releases the reservation. Returns `false` when
    /// the reservation is stale; the task is discarded in that case. Even a
    /// `true` return does not guarantee execution; the run may be
    /// cancelled before the item is reached.
    pub fn commit(self, task: impl FnOnce() + Send + 'static) -> bool {
        self.task_loop.commit(self.generation, Box::new(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn start_runs_the_seed_once_and_returns() {
        let task_loop = TaskLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx) = cancellation();

        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx.clone(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // The loop restarts cleanly.
        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_holds_the_loop_open() {
        let task_loop = TaskLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx) = cancellation();

        let started_at = Instant::now();
        let seed_loop = Arc::clone(&task_loop);
        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let reservation = seed_loop.reserve();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    sleep(Duration::from_secs(1)).await;
                    let committed = reservation.commit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    assert!(committed);
                });
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert!(started_at.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reservation_refuses_after_restart() {
        let task_loop = TaskLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let stale_refused = Arc::new(AtomicBool::new(false));

        // First run: cancellation fires long before the producer commits.
        let (cancel_tx, cancel_rx) = cancellation();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            let _ = cancel_tx.send(true);
        });

        let seed_loop = Arc::clone(&task_loop);
        let counter = Arc::clone(&ran);
        let refused = Arc::clone(&stale_refused);
        task_loop
            .start(cancel_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let reservation = seed_loop.reserve();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    sleep(Duration::from_secs(1)).await;
                    let committed = reservation.commit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    refused.store(!committed, Ordering::SeqCst);
                });
            })
            .await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        // Second run: its own seed and reservation complete as usual.
        let (_cancel_tx, cancel_rx) = cancellation();
        let seed_loop = Arc::clone(&task_loop);
        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let reservation = seed_loop.reserve();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    sleep(Duration::from_secs(1)).await;
                    let committed = reservation.commit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                    assert!(committed);
                });
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(
            stale_refused.load(Ordering::SeqCst),
            "the first run's commit should have been refused"
        );
    }

    #[tokio::test]
    async fn items_run_in_fifo_order() {
        let task_loop = TaskLoop::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (_cancel_tx, cancel_rx) = cancellation();

        let seed_loop = Arc::clone(&task_loop);
        let seed_order = Arc::clone(&order);
        task_loop
            .start(cancel_rx, move || {
                seed_order.lock().unwrap().push(0);
                for i in 1..=5 {
                    let reservation = seed_loop.reserve();
                    let order = Arc::clone(&seed_order);
                    assert!(reservation.commit(move || {
                        order.lock().unwrap().push(i);
                    }));
                }
            })
            .await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn cancellation_stops_the_batch_between_items() {
        let task_loop = TaskLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (cancel_tx, cancel_rx) = cancellation();
        let cancel_tx = Arc::new(cancel_tx);

        let seed_loop = Arc::clone(&task_loop);
        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx, move || {
                // Queue five items; the third cancels the run, so the last
                // two must never execute.
                for i in 0..5 {
                    let reservation = seed_loop.reserve();
                    let counter = Arc::clone(&counter);
                    let cancel_tx = Arc::clone(&cancel_tx);
                    assert!(reservation.commit(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if i == 2 {
                            let _ = cancel_tx.send(true);
                        }
                    }));
                }
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn in_loop_commit_wakes_an_idle_consumer() {
        let task_loop = TaskLoop::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx) = cancellation();

        // Two chained producers: the loop has to go idle-but-reserved twice.
        let seed_loop = Arc::clone(&task_loop);
        let counter = Arc::clone(&ran);
        task_loop
            .start(cancel_rx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let first = seed_loop.reserve();
                let chain_loop = Arc::clone(&seed_loop);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    sleep(Duration::from_millis(50)).await;
                    let counter_inner = Arc::clone(&counter);
                    assert!(first.commit(move || {
                        counter_inner.fetch_add(1, Ordering::SeqCst);
                        let second = chain_loop.reserve();
                        let counter = Arc::clone(&counter_inner);
                        tokio::spawn(async move {
                            sleep(Duration::from_millis(50)).await;
                            assert!(second.commit(move || {
                                counter.fetch_add(1, Ordering::SeqCst);
                            }));
                        });
                    }));
                });
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}

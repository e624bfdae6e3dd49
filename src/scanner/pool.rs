//! Fixed-size worker pool pulling files from the walker's queue.

use crate::core::error::{Error, Result};
use crate::core::types::{Classification, FileRecord, ThreadState, ThreadStatus, Verdict};
use crate::detection::Classifier;
use crate::scanner::control::ScanControl;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How long an idle worker waits on the queue before re-checking the signals.
const CLAIM_POLL: Duration = Duration::from_millis(50);

/// Upper bound for a single throttle sleep.
const MAX_THROTTLE_SLEEP: Duration = Duration::from_millis(250);

/// Per-worker counters, kept under the same lock as its [`ThreadState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTally {
    pub files: u64,
    pub threats: u64,
    pub errors: u64,
    pub bytes: u64,
}

impl WorkerTally {
    fn add(&mut self, other: &WorkerTally) {
        self.files += other.files;
        self.threats += other.threats;
        self.errors += other.errors;
        self.bytes += other.bytes;
    }

    fn record(&mut self, record: &FileRecord) {
        self.files += 1;
        self.bytes += record.bytes_read;
        match record.verdict {
            Some(Verdict::Infected) | Some(Verdict::Warning) => self.threats += 1,
            Some(Verdict::Error) => self.errors += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub state: ThreadState,
    pub tally: WorkerTally,
}

/// One slot per worker, indexed by worker id.
///
/// A worker writes only its own slot; readers take the same lock.
#[derive(Debug)]
pub struct ThreadArena {
    slots: Vec<Mutex<WorkerSlot>>,
}

impl ThreadArena {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size)
                .map(|id| {
                    Mutex::new(WorkerSlot {
                        state: ThreadState::new(id),
                        tally: WorkerTally::default(),
                    })
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn update(&self, id: usize, f: impl FnOnce(&mut WorkerSlot)) {
        if let Some(slot) = self.slots.get(id) {
            f(&mut slot.lock());
        }
    }

    /// Copy of every slot.
    pub fn snapshot(&self) -> Vec<WorkerSlot> {
        self.slots.iter().map(|s| s.lock().clone()).collect()
    }

    pub fn states(&self) -> Vec<ThreadState> {
        self.slots.iter().map(|s| s.lock().state.clone()).collect()
    }

    /// Sum of all tallies plus the number of busy workers.
    pub fn totals(&self) -> (WorkerTally, usize) {
        let mut total = WorkerTally::default();
        let mut busy = 0;
        for slot in &self.slots {
            let slot = slot.lock();
            total.add(&slot.tally);
            if slot.state.status == ThreadStatus::Busy {
                busy += 1;
            }
        }
        (total, busy)
    }
}

/// CPU budget policy derived from a 10..=100 percent limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    cpu_limit: u8,
}

impl Throttle {
    pub fn new(cpu_limit: u8) -> Self {
        Self {
            cpu_limit: cpu_limit.clamp(1, 100),
        }
    }

    /// Number of workers to run out of `pool_size`.
    pub fn concurrency(&self, pool_size: usize) -> usize {
        let scaled = (pool_size * self.cpu_limit as usize).div_ceil(100);
        scaled.clamp(1, pool_size.max(1))
    }

    /// Sleep after an item that took `work` so busy time stays near the budget.
    pub fn pause_after(&self, work: Duration) -> Duration {
        if self.cpu_limit >= 100 {
            return Duration::ZERO;
        }
        let idle = 100 - self.cpu_limit as u32;
        (work * idle / self.cpu_limit as u32).min(MAX_THROTTLE_SLEEP)
    }
}

/// Everything a worker needs, shared by the whole pool.
pub struct PoolContext {
    pub queue: Receiver<FileRecord>,
    pub classifier: Arc<dyn Classifier>,
    pub control: Arc<ScanControl>,
    pub results: mpsc::Sender<FileRecord>,
    pub throttle: Throttle,
}

/// Running worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    arena: Arc<ThreadArena>,
}

impl WorkerPool {
    /// Start `throttle.concurrency(size)` worker threads.
    ///
    /// If any thread fails to start, the ones already running are cancelled
    /// and joined before the error is returned.
    pub fn spawn(size: usize, ctx: PoolContext) -> Result<Self> {
        let workers = ctx.throttle.concurrency(size);
        let arena = Arc::new(ThreadArena::new(workers));
        let ctx = Arc::new(ctx);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let worker_ctx = Arc::clone(&ctx);
            let worker_arena = Arc::clone(&arena);
            let spawned = std::thread::Builder::new()
                .name(format!("scan-worker-{}", id))
                .spawn(move || run_worker(id, &worker_arena, &worker_ctx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ctx.control.cancel();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(Error::WorkerPool(format!(
                        "could not start worker {}: {}",
                        id, e
                    )));
                }
            }
        }

        log::debug!("Started {} scan workers (pool size {})", workers, size);
        Ok(Self { handles, arena })
    }

    pub fn arena(&self) -> &Arc<ThreadArena> {
        &self.arena
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Returns how many panicked.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            log::error!("{} scan workers panicked", panicked);
        }
        panicked
    }
}

fn run_worker(id: usize, arena: &ThreadArena, ctx: &PoolContext) {
    let control = &ctx.control;

    loop {
        arena.update(id, |slot| {
            slot.state.status = ThreadStatus::Idle;
            slot.state.current_file = None;
        });

        if !control.wait_while_paused() {
            break;
        }

        let mut record = match ctx.queue.recv_timeout(CLAIM_POLL) {
            Ok(record) => record,
            Err(RecvTimeoutError::Timeout) => {
                if control.is_cancelled() {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Claimed just as a pause began: hold it, don't process it.
        if control.is_paused() {
            arena.update(id, |slot| {
                slot.state.status = ThreadStatus::Blocked;
                slot.state.current_file = Some(record.path.clone());
            });
            if !control.wait_while_paused() {
                break;
            }
        }

        if control.is_cancelled() {
            break;
        }

        record.start(id);
        arena.update(id, |slot| {
            slot.state.status = ThreadStatus::Busy;
            slot.state.current_file = Some(record.path.clone());
        });

        let started = Instant::now();
        let interrupted = || control.is_cancelled();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            ctx.classifier.classify(&record, &interrupted)
        }));

        let classification = match outcome {
            Ok(Some(classification)) => classification,
            Ok(None) => {
                log::trace!("Worker {} abandoned {:?}", id, record.path);
                break;
            }
            Err(_) => {
                log::error!("Classifier panicked on {:?}", record.path);
                arena.update(id, |slot| slot.state.status = ThreadStatus::Error);
                Classification::error("classifier panicked")
            }
        };

        record.finish(classification);
        arena.update(id, |slot| {
            slot.state.files_processed += 1;
            slot.tally.record(&record);
        });

        if ctx.results.blocking_send(record).is_err() {
            log::debug!("Worker {} stopping: coordinator gone", id);
            break;
        }

        if !control.sleep(ctx.throttle.pause_after(started.elapsed())) {
            break;
        }
    }

    arena.update(id, |slot| {
        if slot.state.status != ThreadStatus::Error {
            slot.state.status = ThreadStatus::Idle;
        }
        slot.state.current_file = None;
    });
}

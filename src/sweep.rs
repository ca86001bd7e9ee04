use crate::error::CollectorError;
use crate::handle::HandleRef;
use crate::state::{SharedState, WorkerPool};
use crate::sync::{AtomicBool, AtomicUsize, Ordering};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};

/// Outcome of one sweep.
///
/// 一次清扫的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Handles reclaimed (deleter invoked and removed from the table).
    /// 被回收的句柄数（已调用析构函数并从表中移除）。
    pub reclaimed: usize,
    /// Dirty buckets visited.
    pub dirty_buckets: usize,
    /// Threads that took part; `1` for a sweep on the caller's thread, `0`
    /// when there was nothing to do or another sweep was already running.
    pub workers: usize,
    /// Epoch after the sweep.
    pub epoch: usize,
}

/// Clears the "sweep running" flag even if a deleter panics.
struct SweepingGuard<'a>(&'a AtomicBool);

impl Drop for SweepingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Applies the counters of a sweep exactly once, also when a deleter unwinds.
///
/// 每次清扫恰好应用一次计数器更新，即使析构函数发生 panic 也是如此。
struct SweepTally<'a> {
    state: &'a SharedState,
    reclaimed: AtomicUsize,
    settled: bool,
}

impl<'a> SweepTally<'a> {
    fn new(state: &'a SharedState) -> Self {
        Self {
            state,
            reclaimed: AtomicUsize::new(0),
            settled: false,
        }
    }

    /// Returns `(reclaimed, epoch)`.
    fn settle(&mut self) -> (usize, usize) {
        self.settled = true;
        let reclaimed = self.reclaimed.load(Ordering::Acquire);
        self.state.total_tracked.fetch_sub(reclaimed, Ordering::Relaxed);
        self.state.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        let epoch = self.state.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        (reclaimed, epoch)
    }
}

impl Drop for SweepTally<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let (reclaimed, epoch) = self.settle();
            tracing::warn!(reclaimed, epoch, "sweep interrupted by a panicking deleter");
        }
    }
}

/// Work of one sweep range that is not finished yet.
///
/// Dropped normally once both parts are empty. If a deleter unwinds, the
/// handles still waiting in `doomed` go back to their bucket and every bucket
/// of the range not visited yet is queued again, so the dirty bitmask never
/// holds a bit whose bucket is missing from the worklist.
///
/// 一个清扫区间中尚未完成的工作。
/// 如果析构函数发生 panic，`doomed` 中剩余的句柄会放回它们的桶，
/// 区间中尚未访问的桶会重新入队。
struct PendingRange<'a> {
    state: &'a SharedState,
    unvisited: &'a [usize],
    current: usize,
    doomed: Vec<HandleRef>,
}

impl Drop for PendingRange<'_> {
    fn drop(&mut self) {
        let dirty = &self.state.dirty;
        if !self.doomed.is_empty() {
            self.state
                .table
                .restore(self.current, std::mem::take(&mut self.doomed));
            dirty.mark_dirty(self.current);
        }
        for &index in self.unvisited {
            // The bit is still set: clear it so the index is appended again.
            dirty.clear(index);
            dirty.mark_dirty(index);
        }
    }
}

impl WorkerPool {
    fn start(threads: usize) -> Result<Self, CollectorError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("gc-sweep-{index}"))
            .build()
            .map_err(|source| CollectorError::WorkerPool { threads, source })?;

        tracing::debug!(threads, "sweep worker pool started");
        Ok(Self { threads, pool })
    }
}

impl SharedState {
    /// Reclaim every zero-count handle found in the dirty buckets.
    ///
    /// Blocks until all workers are done. The epoch is bumped once when at
    /// least one bucket was dirty, even if every handle in it was resurrected.
    /// A request made while a sweep is already running on this collector is
    /// skipped and reports zero workers.
    ///
    /// 回收脏桶中所有计数为零的句柄。
    /// 阻塞直到所有工作线程完成。只要至少有一个脏桶，纪元就会递增一次，
    /// 即使桶中的每个句柄都已被复活。
    pub(crate) fn sweep(&self) -> SweepStats {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("sweep already running, request skipped");
            return SweepStats {
                epoch: self.epoch.load(Ordering::Acquire),
                ..SweepStats::default()
            };
        }
        let _guard = SweepingGuard(&self.sweeping);

        let worklist = self.dirty.take_worklist();
        if worklist.is_empty() {
            self.last_reclaimed.store(0, Ordering::Relaxed);
            return SweepStats {
                epoch: self.epoch.load(Ordering::Acquire),
                ..SweepStats::default()
            };
        }

        let threads = self.worker_threads.load(Ordering::Relaxed);
        let mut tally = SweepTally::new(self);
        let workers = if threads > 1 && worklist.len() > threads {
            match self.sweep_parallel(&worklist, threads, &tally.reclaimed) {
                Ok(workers) => workers,
                Err(err) => {
                    tracing::warn!(error = %err, "falling back to a sequential sweep");
                    self.sweep_buckets(&worklist, &tally.reclaimed);
                    1
                }
            }
        } else {
            self.sweep_buckets(&worklist, &tally.reclaimed);
            1
        };
        let (reclaimed, epoch) = tally.settle();

        tracing::debug!(
            reclaimed,
            dirty_buckets = worklist.len(),
            workers,
            epoch,
            "sweep finished"
        );

        SweepStats {
            reclaimed,
            dirty_buckets: worklist.len(),
            workers,
            epoch,
        }
    }

    /// Sweep a contiguous range of the dirty worklist on the current thread,
    /// adding every detached handle to `reclaimed`.
    fn sweep_buckets(&self, indices: &[usize], reclaimed: &AtomicUsize) {
        let mut range = PendingRange {
            state: self,
            unvisited: indices,
            current: 0,
            doomed: Vec::new(),
        };

        loop {
            let unvisited = range.unvisited;
            let Some((&index, rest)) = unvisited.split_first() else {
                break;
            };
            range.unvisited = rest;
            range.current = index;
            range.doomed = self.table.drain_pending(index, || self.dirty.clear(index));
            range.doomed.reverse();

            while let Some(handle) = range.doomed.pop() {
                reclaimed.fetch_add(1, Ordering::AcqRel);
                // SAFETY: the handle was removed from its bucket while its
                // count was zero; deleters were supplied by `Owning` (sound
                // for `T`) or by an `unsafe` registration whose caller vouched
                // for them.
                unsafe {
                    handle.reclaim();
                }
            }
        }
    }

    /// Split the worklist into at most `threads` disjoint contiguous ranges
    /// and sweep each one on a pool worker. Buckets never overlap between
    /// ranges, so the per-bucket locks stay uncontended among workers.
    /// Returns the number of ranges.
    ///
    /// 将工作列表划分为至多 `threads` 个不相交的连续区间，每个区间由一个工作线程清扫。
    fn sweep_parallel(
        &self,
        worklist: &[usize],
        threads: usize,
        reclaimed: &AtomicUsize,
    ) -> Result<usize, CollectorError> {
        let mut workers = self.workers.lock();
        if workers.as_ref().is_none_or(|current| current.threads != threads) {
            *workers = Some(WorkerPool::start(threads)?);
        }
        let Some(current) = workers.as_ref() else {
            self.sweep_buckets(worklist, reclaimed);
            return Ok(1);
        };

        let range = worklist.len() / threads + 1;
        // Every range runs to the end even if another one unwinds, so each
        // of them gets to put its unfinished buckets back.
        let failure = current.pool.install(|| {
            worklist
                .par_chunks(range)
                .map(|buckets| {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        self.sweep_buckets(buckets, reclaimed)
                    }))
                    .err()
                })
                .reduce(|| None, |first, next| first.or(next))
        });
        if let Some(payload) = failure {
            panic::resume_unwind(payload);
        }
        Ok(worklist.len().div_ceil(range))
    }
}

impl Drop for SharedState {
    /// Reclaim what is still pending when the last collector reference goes.
    ///
    /// Every `Owning` handle keeps its collector alive, so no handle of this
    /// collector can be released by the deleters run here. Handles registered
    /// through the raw API and never released are leaked.
    fn drop(&mut self) {
        let stats = self.sweep();
        if stats.reclaimed > 0 {
            tracing::debug!(reclaimed = stats.reclaimed, "reclaimed pending handles on drop");
        }
        self.dirty.clear_all();
    }
}

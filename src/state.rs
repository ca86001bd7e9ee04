use crate::dirty::DirtyShards;
use crate::error::CollectorError;
use crate::registry::ShardTable;
use crate::sync::{AtomicBool, AtomicUsize, Mutex, Ordering};

/// Default number of index bits used to pick a bucket (2^20 buckets).
/// 选择桶时使用的默认索引位数（2^20 个桶）。
pub(crate) const DEFAULT_BUCKET_BITS: u32 = 20;

/// Largest accepted bucket bit count.
pub(crate) const MAX_BUCKET_BITS: u32 = 28;

/// Default number of sweep workers. One means "sweep on the caller's thread".
/// 默认的清扫工作线程数。1 表示"在调用者线程上清扫"。
pub(crate) const DEFAULT_WORKER_THREADS: usize = 1;

/// Epoch stamp of a handle cache that has never been synchronized.
/// 从未同步过的句柄缓存的纪元标记。
pub(crate) const UNSYNCED_EPOCH: usize = usize::MAX;

/// Sweep worker pool, rebuilt only when the configured worker count changes.
pub(crate) struct WorkerPool {
    pub(crate) threads: usize,
    pub(crate) pool: rayon::ThreadPool,
}

/// Shared state of one collector domain.
///
/// Owns the shard table, the dirty-bucket tracker, the counters and the
/// sweep configuration as one unit. Every `Collector` clone and every
/// handle created through it points at the same `SharedState`.
///
/// 一个回收器域的共享状态。
/// 将分片表、脏桶跟踪器、计数器和清扫配置作为一个整体持有。
pub(crate) struct SharedState {
    pub(crate) table: ShardTable,
    pub(crate) dirty: DirtyShards,
    /// Bumped once per sweep that found at least one dirty bucket.
    /// 每次发现至少一个脏桶的清扫会递增一次。
    pub(crate) epoch: AtomicUsize,
    /// Handles currently present in the table, pending ones included.
    pub(crate) total_tracked: AtomicUsize,
    /// Handles reclaimed by the most recent sweep.
    pub(crate) last_reclaimed: AtomicUsize,
    pub(crate) worker_threads: AtomicUsize,
    /// Dirty bucket count above which a release triggers a sweep.
    pub(crate) auto_sweep_threshold: Option<usize>,
    /// Set for the duration of a sweep; nested or concurrent requests are skipped.
    pub(crate) sweeping: AtomicBool,
    pub(crate) workers: Mutex<Option<WorkerPool>>,
}

impl SharedState {
    pub(crate) fn new(
        bucket_bits: u32,
        worker_threads: usize,
        auto_sweep_threshold: Option<usize>,
    ) -> Result<Self, CollectorError> {
        if bucket_bits == 0 || bucket_bits > MAX_BUCKET_BITS {
            return Err(CollectorError::InvalidBucketBits {
                bits: bucket_bits,
                max: MAX_BUCKET_BITS,
            });
        }
        let bucket_count = 1usize << bucket_bits;

        Ok(Self {
            table: ShardTable::with_buckets(bucket_count)?,
            dirty: DirtyShards::with_buckets(bucket_count)?,
            epoch: AtomicUsize::new(0),
            total_tracked: AtomicUsize::new(0),
            last_reclaimed: AtomicUsize::new(0),
            worker_threads: AtomicUsize::new(worker_threads.max(1)),
            auto_sweep_threshold,
            sweeping: AtomicBool::new(false),
            workers: Mutex::new(None),
        })
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("table", &self.table)
            .field("dirty", &self.dirty)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("total_tracked", &self.total_tracked.load(Ordering::Relaxed))
            .field("worker_threads", &self.worker_threads.load(Ordering::Relaxed))
            .field("auto_sweep_threshold", &self.auto_sweep_threshold)
            .finish_non_exhaustive()
    }
}

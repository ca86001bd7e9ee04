use crate::error::CollectorError;
use crate::handle::{Deleter, Handle, HandleRef, Identity};
use crate::state::{SharedState, DEFAULT_BUCKET_BITS, DEFAULT_WORKER_THREADS};
use crate::sweep::SweepStats;
use crate::sync::{Arc, Ordering};

/// Builder for configuring a `Collector`.
///
/// Use this builder to customize the collector:
/// - `bucket_bits`: log2 of the number of registry buckets
/// - `worker_threads`: number of threads used by a sweep
/// - `auto_sweep_threshold`: dirty bucket count that triggers a sweep on release
///
/// # Example
/// ```
/// use refcount_gc::Collector;
///
/// let collector = Collector::builder()
///     .bucket_bits(12)
///     .worker_threads(4)
///     .auto_sweep_threshold(256)
///     .build()
///     .unwrap();
/// assert_eq!(collector.bucket_count(), 4096);
/// ```
///
/// 用于配置 `Collector` 的构建器。
pub struct CollectorBuilder {
    bucket_bits: u32,
    worker_threads: usize,
    auto_sweep_threshold: Option<usize>,
}

impl CollectorBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            bucket_bits: DEFAULT_BUCKET_BITS,
            worker_threads: DEFAULT_WORKER_THREADS,
            auto_sweep_threshold: None,
        }
    }

    /// Set log2 of the bucket count. Accepted range is `1..=28`.
    ///
    /// Default: `20` (1 048 576 buckets)
    ///
    /// 设置桶数量的以 2 为底的对数。接受的范围是 `1..=28`。
    #[inline]
    pub fn bucket_bits(mut self, bits: u32) -> Self {
        self.bucket_bits = bits;
        self
    }

    /// Set the number of threads a sweep may use. `0` is treated as `1`.
    ///
    /// Default: `1`
    #[inline]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the automatic sweep threshold.
    ///
    /// When a release marks a bucket dirty and the number of dirty buckets
    /// exceeds this threshold, `sweep()` is called right away.
    /// Pass `None` to sweep only on request.
    ///
    /// Default: `None`
    ///
    /// 设置自动清扫阈值。
    /// 当释放操作将桶标记为脏，且脏桶数量超过此阈值时，立即调用 `sweep()`。
    /// 传递 `None` 则仅在请求时清扫。
    #[inline]
    pub fn auto_sweep_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.auto_sweep_threshold = threshold.into();
        self
    }

    /// Build the `Collector` with the configured settings.
    ///
    /// Fails if the bucket bit count is out of range or the bucket table
    /// cannot be allocated.
    ///
    /// 使用配置的设置构建 `Collector`。
    #[inline]
    pub fn build(self) -> Result<Collector, CollectorError> {
        let shared = SharedState::new(
            self.bucket_bits,
            self.worker_threads,
            self.auto_sweep_threshold,
        )?;

        Ok(Collector {
            shared: Arc::new(shared),
        })
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference-counting collector domain.
///
/// `Collector` is the entry point of the crate. It owns:
/// - The sharded registry of tracked objects.
/// - The dirty bucket tracker used by the sweep.
/// - The global epoch that invalidates handle caches.
/// - The sweep worker configuration.
///
/// It is cheap to `Clone`; all clones share the same state. There is no
/// process-wide instance: create one at startup and pass it to whatever
/// creates [`Owning`](crate::Owning) handles.
///
/// **Typical Usage**:
/// ```
/// use refcount_gc::{Collector, Owning};
///
/// let collector = Collector::builder().bucket_bits(10).build().unwrap();
///
/// let actor = Owning::new(&collector, String::from("actor"));
/// let weak = actor.downgrade();
/// assert!(weak.is_valid());
///
/// drop(actor);
/// assert!(!weak.is_valid());
///
/// let stats = collector.sweep();
/// assert_eq!(stats.reclaimed, 1);
/// ```
///
/// 引用计数回收器域。
/// `Collector` 是本 crate 的入口点。它持有：
/// - 被跟踪对象的分片注册表。
/// - 清扫使用的脏桶跟踪器。
/// - 使句柄缓存失效的全局纪元。
/// - 清扫工作线程配置。
/// 克隆开销很小；所有克隆共享同一状态。没有进程级实例。
#[derive(Clone, Debug)]
pub struct Collector {
    pub(crate) shared: Arc<SharedState>,
}

impl Collector {
    /// Create a collector with default settings (2^20 buckets, one sweep thread).
    /// 使用默认设置创建回收器（2^20 个桶，单线程清扫）。
    #[inline]
    pub fn new() -> Result<Self, CollectorError> {
        Self::builder().build()
    }

    /// Create a builder for configuring the collector.
    /// 创建一个用于配置回收器的构建器。
    #[inline]
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    /// Track one more reference to `identity`.
    ///
    /// If the identity is already tracked its count goes up by one (which also
    /// cancels a pending reclamation); otherwise a new handle with count one is
    /// created without a deleter, so the sweep only forgets it.
    ///
    /// 为 `identity` 增加一个引用。
    /// 如果标识已被跟踪，计数加一（这也会取消待回收状态）；
    /// 否则创建一个计数为一、没有析构函数的新句柄，清扫时只会将其遗忘。
    #[inline]
    pub fn register(&self, identity: Identity) -> HandleRef {
        self.shared.register(identity, None)
    }

    /// Insert `identity` without checking whether it is already tracked.
    ///
    /// Use it for objects that were just allocated. Registering an identity
    /// that is already tracked is a programmer error caught only in debug
    /// builds.
    #[inline]
    pub fn register_fresh(&self, identity: Identity) -> HandleRef {
        self.shared.register_fresh(identity, None)
    }

    /// Like [`register`](Self::register), attaching `deleter` if a new handle is created.
    ///
    /// # Safety
    /// `deleter` will be called with `identity` exactly once, by the sweep
    /// that reclaims the handle, possibly on a sweep worker thread. It must be
    /// sound to call at that point.
    #[inline]
    pub unsafe fn register_with(&self, identity: Identity, deleter: Deleter) -> HandleRef {
        self.shared.register(identity, Some(deleter))
    }

    /// Like [`register_fresh`](Self::register_fresh), attaching `deleter`.
    ///
    /// # Safety
    /// Same contract as [`register_with`](Self::register_with).
    #[inline]
    pub unsafe fn register_fresh_with(&self, identity: Identity, deleter: Deleter) -> HandleRef {
        self.shared.register_fresh(identity, Some(deleter))
    }

    /// Release one reference to `identity`.
    ///
    /// Returns `None` if the identity is not tracked or its count is already
    /// zero. When the count reaches zero the bucket is marked dirty and the
    /// handle waits for the next sweep.
    ///
    /// 释放 `identity` 的一个引用。
    /// 标识未被跟踪或计数已为零时返回 `None`。
    /// 计数归零时该桶被标记为脏，句柄等待下一次清扫。
    ///
    /// # Safety
    /// The caller must own the reference it releases. Releasing a reference
    /// held by an [`Owning`](crate::Owning) handle lets the sweep free an
    /// object that handle still points to.
    #[inline]
    pub unsafe fn unregister(&self, identity: Identity) -> Option<HandleRef> {
        self.shared.unregister(identity)
    }

    /// Release one reference through a handle the caller already holds.
    ///
    /// No-op if the handle's count is already zero or it was swept.
    ///
    /// # Safety
    /// Same contract as [`unregister`](Self::unregister). The handle must
    /// belong to this collector.
    #[inline]
    pub unsafe fn unregister_by_handle(&self, handle: &Handle) {
        self.shared.unregister_by_handle(handle)
    }

    /// Find the handle of `identity`, if tracked. Never changes any count.
    #[inline]
    pub fn lookup(&self, identity: Identity) -> Option<HandleRef> {
        self.shared.lookup(identity)
    }

    /// Reclaim every object whose count is zero in the dirty buckets.
    ///
    /// Runs on the caller's thread, or on the worker pool when more than one
    /// worker is configured and there are more dirty buckets than workers.
    /// Returns once every deleter has run.
    ///
    /// 回收脏桶中所有计数为零的对象。
    /// 在调用者线程上运行；当配置了多个工作线程且脏桶数多于工作线程数时，
    /// 在工作线程池上运行。所有析构函数运行完毕后返回。
    #[inline]
    pub fn sweep(&self) -> SweepStats {
        self.shared.sweep()
    }

    /// Alias of [`sweep`](Self::sweep).
    #[inline]
    pub fn force_collect(&self) -> SweepStats {
        self.sweep()
    }

    /// Objects currently tracked, including the ones waiting for a sweep.
    #[inline]
    pub fn total_tracked_count(&self) -> usize {
        self.shared.total_tracked.load(Ordering::Relaxed)
    }

    /// Objects reclaimed by the most recent sweep.
    #[inline]
    pub fn last_reclaimed_count(&self) -> usize {
        self.shared.last_reclaimed.load(Ordering::Relaxed)
    }

    /// Current epoch. Bumped once by every sweep that found a dirty bucket.
    #[inline]
    pub fn current_epoch(&self) -> usize {
        self.shared.epoch.load(Ordering::Acquire)
    }

    #[inline]
    pub fn worker_thread_count(&self) -> usize {
        self.shared.worker_threads.load(Ordering::Relaxed)
    }

    /// Set the number of threads used by the next sweeps. `0` is treated as `1`.
    ///
    /// The worker pool is rebuilt lazily by the next parallel sweep.
    ///
    /// 设置后续清扫使用的线程数。`0` 被视为 `1`。
    #[inline]
    pub fn set_worker_thread_count(&self, threads: usize) {
        self.shared
            .worker_threads
            .store(threads.max(1), Ordering::Relaxed);
    }

    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.shared.table.bucket_count()
    }

    /// Buckets currently waiting for a sweep.
    #[inline]
    pub fn dirty_bucket_count(&self) -> usize {
        self.shared.dirty.dirty_count()
    }

    /// The bucket `identity` maps to is queued for the next sweep.
    #[inline]
    pub fn is_bucket_dirty(&self, identity: Identity) -> bool {
        self.shared
            .dirty
            .is_dirty(self.shared.table.index_of(identity))
    }

    /// `identity` has a handle in the registry, pending or not.
    #[inline]
    pub fn is_tracked(&self, identity: Identity) -> bool {
        self.lookup(identity).is_some()
    }

    /// `identity` is tracked and has no reference left.
    #[inline]
    pub fn is_pending_to_kill(&self, identity: Identity) -> bool {
        self.lookup(identity)
            .is_some_and(|handle| handle.is_pending_to_kill())
    }

    /// `identity` is tracked and still has at least one reference.
    #[inline]
    pub fn is_tracked_and_alive(&self, identity: Identity) -> bool {
        self.lookup(identity)
            .is_some_and(|handle| !handle.is_pending_to_kill())
    }

    /// Both values refer to the same collector domain.
    #[inline]
    pub fn same_domain(&self, other: &Collector) -> bool {
        std::ptr::eq(&*self.shared, &*other.shared)
    }
}

//! Error types reported while setting up a collector.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors that can occur while building a [`Collector`](crate::Collector).
///
/// Registration and sweeping never fail at runtime: precondition violations
/// are debug assertions and a failed worker pool start-up falls back to a
/// sequential sweep.
///
/// 构建 [`Collector`](crate::Collector) 时可能发生的错误。
/// 注册和清扫在运行时不会失败：前置条件违规是调试断言，
/// 工作线程池启动失败会退回到顺序清扫。
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The requested bucket bit count is outside the supported range.
    #[error("bucket bit count {bits} is outside the supported range 1..={max}")]
    InvalidBucketBits { bits: u32, max: u32 },

    /// Storage for the bucket table or the dirty bitmask could not be reserved.
    #[error("failed to reserve storage for {buckets} buckets")]
    TableAllocation {
        buckets: usize,
        #[source]
        source: TryReserveError,
    },

    /// The sweep worker pool could not be started.
    #[error("failed to start {threads} sweep worker threads")]
    WorkerPool {
        threads: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

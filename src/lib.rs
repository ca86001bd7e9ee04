//! A non-tracing, reference-counted collector.
//!
//! Objects are tracked by address in a sharded registry. Every tracked object
//! has a [`Handle`] carrying its reference count; when the count reaches zero
//! the object's bucket is queued as dirty, and a later [`Collector::sweep`]
//! reclaims everything still at zero in the dirty buckets, optionally on a
//! pool of worker threads that each own a disjoint range of buckets.
//!
//! Application code uses [`Owning`] and [`Weak`] instead of raw pointers. Both
//! cache the registry record together with the collector epoch, which every
//! productive sweep bumps, so repeated checks skip the registry lookup.
//!
//! The collector does not trace object graphs: reference cycles between
//! `Owning` handles are never reclaimed.
//!
//! ```
//! use refcount_gc::{Collector, Owning};
//!
//! let collector = Collector::builder().bucket_bits(10).build().unwrap();
//!
//! let scene = Owning::new(&collector, String::from("scene"));
//! let observer = scene.downgrade();
//! assert_eq!(collector.total_tracked_count(), 1);
//!
//! drop(scene);
//! assert!(!observer.is_valid());
//! assert_eq!(collector.total_tracked_count(), 1);
//!
//! collector.sweep();
//! assert_eq!(collector.total_tracked_count(), 0);
//! assert_eq!(collector.last_reclaimed_count(), 1);
//! ```
//!
//! 非追踪式引用计数回收器。
//! 对象以地址为键在分片注册表中被跟踪。计数归零时对象所在的桶被标记为脏，
//! 之后的 [`Collector::sweep`] 会回收脏桶中所有计数仍为零的对象。

mod dirty;
mod domain;
mod error;
mod handle;
mod ptr;
mod registry;
mod state;
mod sweep;
mod sync;
mod weak;

pub use domain::{Collector, CollectorBuilder};
pub use error::CollectorError;
pub use handle::{Deleter, Handle, HandleRef, Identity};
pub use ptr::Owning;
pub use sweep::SweepStats;
pub use weak::Weak;

#[cfg(all(test, not(feature = "loom")))]
mod tests;

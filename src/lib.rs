//! `ki-gc`: a conservative mark-and-sweep garbage collector core.
//!
//! The collector tracks every allocation handed out through [`Collector::malloc`]
//! / [`Collector::malloc_root`] in a pointer-addressed hash table (see [`map`]),
//! and reclaims memory with no reachable pointer to it by periodically scanning
//! registered roots and the mutator's own machine stack (see [`scan`]) for
//! word-aligned bit patterns that happen to match a tracked base address.
//!
//! This is a drop-in collector for a host with no compiler cooperation: object
//! layouts are unknown, so every word inside a tracked block is treated as a
//! potential pointer (see [`collector`] for the mark/sweep implementation).
//! It does not trace precisely, compact, collect incrementally, or tolerate
//! concurrent mutators — see the crate's accompanying design notes for the
//! full list of non-goals.
//!
//! ```
//! let bottom = 0u8;
//! ki_gc::GC.start(&bottom as *const u8);
//!
//! let p = ki_gc::GC.malloc(64);
//! unsafe { p.write_bytes(0, 64) };
//!
//! ki_gc::GC.stop();
//! ```

mod collector;
mod lock;
mod map;
mod primes;
mod record;
mod scan;

pub use collector::{Config, Stats};
pub use lock::AssumeUnlockable;

use collector::CollectorInner;

/// A mutex-guarded handle to one collector instance, generic over the
/// `lock_api::RawMutex` implementation used to serialize access.
///
/// The collector's algorithms assume a single mutator thread (see the crate's
/// concurrency notes); [`AssumeUnlockable`] — a no-op `RawMutex` — is the
/// correct default for that case. A host that genuinely needs to call into
/// the collector from more than one thread may instantiate `Collector<R>`
/// with a real mutex (e.g. `spin::Mutex`'s raw type), understanding that the
/// collector's internal data structures are not otherwise designed for
/// concurrent mutation: the lock only serializes entry, it does not make the
/// mark/sweep algorithm itself thread-aware.
///
/// All operations take `&self`; the "singleton" described by the design is
/// just the process-wide [`GC`] instance of this type, not unsynchronized
/// global mutable state. Tests and embedders that want an isolated collector
/// may construct their own `Collector` value instead.
pub struct Collector<R: lock_api::RawMutex> {
    inner: lock_api::Mutex<R, CollectorInner>,
}

impl<R: lock_api::RawMutex> Collector<R> {
    /// A fresh, uninitialized handle. Call [`start`](Self::start) or
    /// [`start_ext`](Self::start_ext) before using it.
    pub const fn new() -> Self {
        Self { inner: lock_api::Mutex::new(CollectorInner::new()) }
    }

    /// Initializes the collector with default tuning and captures `bottom` as
    /// the outer boundary of the conservatively scanned stack region.
    ///
    /// `bottom` must be the address of a stack-resident variable in the
    /// caller, captured as far down the call stack as the host can arrange —
    /// typically near the start of `main`.
    pub fn start(&self, bottom: *const u8) {
        self.inner.lock().start_ext(bottom, Config::default());
    }

    /// As [`start`](Self::start), with explicit tuning. See [`Config`].
    pub fn start_ext(&self, bottom: *const u8, config: Config) {
        self.inner.lock().start_ext(bottom, config);
    }

    /// Tears down the collector, freeing every tracked allocation and the
    /// allocation map's own backing storage, and returns the total bytes
    /// reclaimed. Further calls to [`malloc`](Self::malloc) and friends
    /// before a subsequent `start`/`start_ext` panic.
    pub fn stop(&self) -> usize {
        self.inner.lock().stop()
    }

    /// Returns a pointer to at least `size` bytes, tracked by the collector.
    /// May trigger a full mark-sweep cycle first. Never returns null: on
    /// system-allocator failure the process exits with status 42.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        self.inner.lock().allocate(size, false)
    }

    /// As [`malloc`](Self::malloc), but the resulting allocation is a root
    /// for the remainder of its life — it survives every collection
    /// regardless of stack or root reachability, until `stop` tears the
    /// collector down.
    pub fn malloc_root(&self, size: usize) -> *mut u8 {
        self.inner.lock().allocate(size, true)
    }

    /// Suppresses (`true`) or re-enables (`false`) the auto-trigger that runs
    /// a collection from inside `malloc`/`malloc_root`. Does not affect a
    /// cycle already in progress — there is no such concept, since collection
    /// is synchronous with respect to the calling thread.
    pub fn set_paused(&self, value: bool) {
        self.inner.lock().set_paused(value);
    }

    /// Whether the auto-trigger is currently suppressed.
    pub fn is_paused(&self) -> bool {
        self.inner.lock().is_paused()
    }

    /// A read-only snapshot of map occupancy and collection history.
    pub fn stats(&self) -> Stats {
        self.inner.lock().stats()
    }
}

impl<R: lock_api::RawMutex> Default for Collector<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide collector instance, for host code that doesn't need an
/// isolated handle. Assumes a single mutator thread, per [`AssumeUnlockable`].
pub static GC: Collector<AssumeUnlockable> = Collector::new();

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise the scenarios in the spec's testable-properties section
    // against the real public surface (`Collector`, not `CollectorInner`
    // directly), each against its own handle so the tests don't interfere
    // with one another the way they would sharing `GC`.

    #[inline(never)]
    fn allocate_and_drop_reference(gc: &Collector<AssumeUnlockable>, size: usize) -> *mut u8 {
        gc.malloc(size)
    }

    // With `sweep_factor = 0.0`, `sweep_limit` is recomputed only on resize
    // and starts at (and, absent a resize, stays at) zero, so every `malloc`
    // after the first tracked item collects before allocating. That makes
    // collection timing deterministic from the public API alone, without
    // reaching into `CollectorInner`.
    fn eager_config(nslots: usize) -> Config {
        Config { nslots_init: nslots, nslots_min: nslots, lf_down: 0.01, lf_up: 0.99, sweep_factor: 0.0 }
    }

    #[test]
    fn linear_reachability() {
        let gc = Collector::<AssumeUnlockable>::new();
        let bottom = 0u8;
        gc.start_ext(&bottom as *const u8, eager_config(101));

        let a = gc.malloc(16);

        // This call collects first (nitems=1 > sweep_limit=0): a vacuous
        // cycle, since `a` is still stack-resident and nothing else is
        // tracked yet. `b`'s only reference lives in the returned-from frame.
        allocate_and_drop_reference(&gc, 16);

        // This call collects again, this time with `b` unreachable: `a` is
        // still directly on this frame's stack, `b` is not referenced
        // anywhere live. `b` must be freed, `a` must survive.
        let before = gc.stats().bytes_freed_total;
        gc.malloc(8);
        let after = gc.stats().bytes_freed_total;

        assert_eq!(after - before, 16);
        std::hint::black_box(a);
        gc.stop();
    }

    #[inline(never)]
    fn allocate_unreachable_cycle(gc: &Collector<AssumeUnlockable>) {
        let x = gc.malloc(32);
        let y = gc.malloc(32);
        unsafe {
            x.cast::<*mut u8>().write_unaligned(y);
            y.cast::<*mut u8>().write_unaligned(x);
        }
    }

    #[test]
    fn unreachable_cycle_is_collected() {
        let gc = Collector::<AssumeUnlockable>::new();
        let bottom = 0u8;
        gc.start_ext(&bottom as *const u8, eager_config(101));

        allocate_unreachable_cycle(&gc);

        let before = gc.stats().bytes_freed_total;
        gc.malloc(8);
        let after = gc.stats().bytes_freed_total;

        assert_eq!(after - before, 64);
        gc.stop();
    }

    #[test]
    fn root_survives_across_collections() {
        let gc = Collector::<AssumeUnlockable>::new();
        let bottom = 0u8;
        gc.start_ext(&bottom as *const u8, eager_config(101));

        let p = gc.malloc_root(64);
        unsafe { p.write_bytes(0xAB, 64) };

        // First collect (triggered inside this call, before its own
        // allocation): mark_roots marks `p` directly, independent of stack
        // residency. Nothing else is tracked yet, so nothing is freed.
        allocate_and_drop_reference(&gc, 16);

        // Second collect: the first helper's allocation is now unreachable
        // (no root, not stack-resident), `p` is still a root. Only the
        // helper's 16 bytes should be freed, never `p`'s 64.
        let before = gc.stats().bytes_freed_total;
        gc.malloc(8);
        let after = gc.stats().bytes_freed_total;
        assert_eq!(after - before, 16);

        // `p` survives into `stop`, which frees every remaining tracked
        // allocation: its 64 bytes show up there.
        let freed = gc.stop();
        assert!(freed >= 64);
    }

    #[test]
    fn paused_suppresses_auto_trigger() {
        let gc = Collector::<AssumeUnlockable>::new();
        let bottom = 0u8;
        gc.start_ext(
            &bottom as *const u8,
            Config { nslots_init: 5, nslots_min: 5, lf_down: 0.2, lf_up: 0.8, sweep_factor: 0.5 },
        );
        gc.set_paused(true);
        assert!(gc.is_paused());

        for _ in 0..5 {
            gc.malloc(8);
        }

        let stats = gc.stats();
        assert_eq!(stats.collections_run, 0);
        assert_eq!(stats.nitems, 5);
        gc.stop();
    }

    #[test]
    fn trigger_collection_on_allocate() {
        let gc = Collector::<AssumeUnlockable>::new();
        let bottom = 0u8;
        gc.start_ext(
            &bottom as *const u8,
            Config { nslots_init: 11, nslots_min: 11, lf_down: 0.2, lf_up: 0.8, sweep_factor: 0.0 },
        );

        // sweep_factor = 0 means sweep_limit == nitems, so the very next
        // allocation after any insertion exceeds it and must collect.
        gc.malloc(8);
        let before = gc.stats().collections_run;
        gc.malloc(8);
        let after = gc.stats().collections_run;
        assert_eq!(after, before + 1);
        gc.stop();
    }

    #[test]
    #[should_panic(expected = "before start")]
    fn use_before_start_panics() {
        let gc = Collector::<AssumeUnlockable>::new();
        gc.malloc(8);
    }

    /// `Collector<R>` is generic over the `RawMutex` implementation the same
    /// way the teacher crate's mutex-wrapped allocator handle is; a host
    /// that needs real cross-thread serialization supplies its own, here
    /// `spin::Mutex<()>` rather than the zero-cost single-mutator default.
    #[test]
    fn works_with_a_real_raw_mutex() {
        let gc = Collector::<spin::Mutex<()>>::new();
        let bottom = 0u8;
        gc.start(&bottom as *const u8);

        let p = gc.malloc_root(16);
        unsafe { p.write_bytes(0, 16) };

        assert_eq!(gc.stats().nitems, 1);
        assert!(gc.stop() >= 16);
    }
}

//! The collector's inner state machine: configuration, mark, sweep, and the
//! allocate-with-trigger path. Wrapped by [`crate::Collector`] behind a lock.

use std::alloc::Layout;

use log::error;

use crate::map::AllocMap;
use crate::scan;

/// Tuning knobs accepted by `start_ext`. `start` uses [`Config::default`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub nslots_init: usize,
    pub nslots_min: usize,
    pub lf_down: f64,
    pub lf_up: f64,
    pub sweep_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self { nslots_init: 1024, nslots_min: 1024, lf_down: 0.2, lf_up: 0.8, sweep_factor: 0.5 }
    }
}

impl Config {
    /// Boundary-validates host-supplied tuning. Panics identifying the
    /// offending field; this is a precondition violation on data the host
    /// authored, not a recoverable runtime condition.
    fn validate(&self) {
        assert!(
            self.lf_down > 0.0 && self.lf_down < self.lf_up,
            "invalid Config: lf_down ({}) must be in (0, lf_up)",
            self.lf_down
        );
        assert!(
            self.lf_up <= 1.0,
            "invalid Config: lf_up ({}) must be <= 1.0",
            self.lf_up
        );
        assert!(
            (0.0..=1.0).contains(&self.sweep_factor),
            "invalid Config: sweep_factor ({}) must be in [0, 1]",
            self.sweep_factor
        );
    }
}

/// A read-only snapshot of map occupancy and collection history.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub nitems: usize,
    pub nslots: usize,
    pub sweep_limit: usize,
    pub collections_run: u64,
    pub bytes_freed_total: u64,
}

enum State {
    /// No `start`/`start_ext` call has succeeded yet, or `stop` has run.
    Uninitialized,
    Running { map: AllocMap, paused: bool, stack_bottom: *const u8 },
}

pub(crate) struct CollectorInner {
    state: State,
    collections_run: u64,
    bytes_freed_total: u64,
}

// SAFETY: the raw pointers held transitively by `state` (tracked allocation
// bases, the stack-bottom sentinel) are never dereferenced except from
// within the critical section `Collector<R>`'s mutex guards; this type is
// never accessed from more than one thread at a time regardless of which
// thread happens to hold the lock.
unsafe impl Send for CollectorInner {}

impl CollectorInner {
    pub(crate) const fn new() -> Self {
        Self { state: State::Uninitialized, collections_run: 0, bytes_freed_total: 0 }
    }

    fn running(&mut self) -> (&mut AllocMap, &mut bool, *const u8) {
        match &mut self.state {
            State::Running { map, paused, stack_bottom } => (map, paused, *stack_bottom),
            State::Uninitialized => {
                panic!("garbage collector used before start()/start_ext() or after stop()")
            }
        }
    }

    pub(crate) fn start_ext(&mut self, bottom: *const u8, config: Config) {
        config.validate();
        self.state = State::Running {
            map: AllocMap::new(
                config.nslots_init,
                config.nslots_min,
                config.lf_down,
                config.lf_up,
                config.sweep_factor,
            ),
            paused: false,
            stack_bottom: bottom,
        };
    }

    /// Frees every tracked allocation and the map itself, returning the
    /// total bytes reclaimed. Leaves the collector ready for a fresh start.
    pub(crate) fn stop(&mut self) -> usize {
        let freed = match &mut self.state {
            State::Running { map, .. } => map.free_all(),
            State::Uninitialized => 0,
        };
        self.state = State::Uninitialized;
        freed
    }

    pub(crate) fn set_paused(&mut self, value: bool) {
        let (_, paused, _) = self.running();
        *paused = value;
    }

    pub(crate) fn is_paused(&mut self) -> bool {
        let (_, paused, _) = self.running();
        *paused
    }

    pub(crate) fn stats(&mut self) -> Stats {
        let (map, _, _) = self.running();
        Stats {
            nitems: map.nitems(),
            nslots: map.nslots(),
            sweep_limit: map.sweep_limit(),
            collections_run: self.collections_run,
            bytes_freed_total: self.bytes_freed_total,
        }
    }

    /// Sets MARK on every record transitively reachable from roots and the
    /// stack. Roots are marked first; the union is what matters, but this
    /// keeps root-registered objects reachable independent of stack state.
    fn mark(&mut self) {
        let (map, _, bottom) = self.running();

        for root in map.roots() {
            mark_one(map, root);
        }

        scan::scan_stack(bottom, &mut |candidate| mark_one(map, candidate));
    }

    /// Runs mark then sweep, folding the results into the running totals.
    fn collect(&mut self) {
        self.mark();
        let (map, _, _) = self.running();
        let (_freed_count, freed_bytes) = map.sweep();
        self.collections_run += 1;
        self.bytes_freed_total += freed_bytes as u64;
    }

    pub(crate) fn allocate(&mut self, size: usize, as_root: bool) -> *mut u8 {
        let should_collect = {
            let (map, paused, _) = self.running();
            map.nitems() > map.sweep_limit() && !*paused
        };
        if should_collect {
            self.collect();
        }

        let layout = Layout::from_size_align(size.max(1), core::mem::align_of::<usize>())
            .expect("allocation size overflows layout limits");
        let ptr = unsafe { std::alloc::alloc(layout) };

        if ptr.is_null() {
            error!("allocation of {size} bytes failed, terminating");
            std::process::exit(42);
        }

        let (map, _, _) = self.running();
        map.insert(ptr, size);
        if as_root {
            map.get_mut(ptr).unwrap().flags.set_root();
        }
        ptr
    }
}

/// Marks `ptr` and, if it names a previously-unmarked tracked block,
/// recursively marks every word-aligned value found within it.
fn mark_one(map: &mut AllocMap, ptr: *mut u8) {
    let Some(record) = map.get_mut(ptr) else { return };
    if record.flags.is_marked() {
        return;
    }
    record.flags.set_mark();
    let base = record.base;
    let size = record.size;

    unsafe {
        scan::scan_words(base, size, &mut |candidate| mark_one(map, candidate));
    }
}

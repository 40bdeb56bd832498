//! Lock implementations for use with [`Collector`](crate::Collector).
//!
//! The collector assumes a single mutator thread, so the default is a dummy
//! `RawMutex` that performs no synchronization at all. A host that genuinely
//! needs cross-thread serialization can supply its own (e.g. `spin::Mutex`).

/// A dummy `RawMutex` implementation to skip synchronization on single threaded systems.
///
/// # Safety
/// This is very unsafe and may cause undefined behaviour if multiple threads enter
/// a critical section synchronized by this, even without explicit unsafe code.
pub struct AssumeUnlockable;

// SAFETY: nope
unsafe impl lock_api::RawMutex for AssumeUnlockable {
    const INIT: AssumeUnlockable = AssumeUnlockable;

    // A spinlock guard can be sent to another thread and unlocked there
    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}
}

//! Synchronization primitives
//!
//! Sleepable mutexes, condition variables, and counting semaphores for
//! kernel threads, built over spinning and wait-channel generations.
//! On the host target "sleeping" yields to the OS scheduler so the
//! primitives compose with real test threads; on bare metal the spin
//! loop relies on preemption.
//!
//! The C-style `lock_do_i_hold` assertions have no analog here: holding
//! a lock *is* holding its guard, and the borrow checker enforces what
//! the assertions used to.

use core::sync::atomic::{AtomicIsize, AtomicU64, Ordering};

/// Let somebody else run while we wait.
#[inline]
pub(crate) fn yield_now() {
    #[cfg(not(target_os = "none"))]
    std::thread::yield_now();
    #[cfg(target_os = "none")]
    core::hint::spin_loop();
}

// ---------------------------------------------------------------------------
// Wait channel
// ---------------------------------------------------------------------------

/// The primitive under the CV and semaphore: a generation counter that
/// sleepers watch and wakers bump. A sleeper records the generation
/// before releasing whatever lock protects its predicate, then sleeps
/// until the generation moves past what it saw; a wake between the
/// record and the sleep is therefore never lost.
pub struct WaitChannel {
    generation: AtomicU64,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    /// Current generation; pass to [`WaitChannel::sleep_past`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Block until the generation moves past `seen`.
    pub fn sleep_past(&self, seen: u64) {
        while self.generation.load(Ordering::Acquire) == seen {
            yield_now();
        }
    }

    /// Wake every sleeper on this channel.
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::Release);
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Mutex guard; releases the lock on drop.
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// A sleepable mutex.
///
/// Contended acquisition yields between attempts instead of burning the
/// CPU, which is what makes long critical sections (pid slots held
/// across a fork) tolerable on a uniprocessor.
pub struct Mutex<T> {
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            yield_now();
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

/// Condition variable usable with [`Mutex`].
///
/// `wait` releases the guard, sleeps, and reacquires, so a waker that
/// updates the predicate under the mutex and then signals can never be
/// missed. Callers re-check their predicate in a loop as usual.
pub struct Condvar {
    chan: WaitChannel,
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            chan: WaitChannel::new(),
        }
    }

    /// Atomically release `guard` and sleep until signaled, then
    /// reacquire the mutex and return the new guard.
    pub fn wait<'a, T>(&self, mutex: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let seen = self.chan.generation();
        drop(guard);
        self.chan.sleep_past(seen);
        mutex.lock()
    }

    /// Wake at least one waiter.
    pub fn signal(&self) {
        self.chan.wake_all();
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        self.chan.wake_all();
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

/// Counting semaphore with the traditional P/V interface.
pub struct Semaphore {
    count: AtomicIsize,
    chan: WaitChannel,
}

impl Semaphore {
    pub const fn new(initial: isize) -> Self {
        Self {
            count: AtomicIsize::new(initial),
            chan: WaitChannel::new(),
        }
    }

    /// Decrement, sleeping until the count is positive.
    pub fn p(&self) {
        loop {
            let current = self.count.load(Ordering::Acquire);
            if current > 0 {
                if self
                    .count
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return;
                }
                continue;
            }
            let seen = self.chan.generation();
            if self.count.load(Ordering::Acquire) > 0 {
                continue;
            }
            self.chan.sleep_past(seen);
        }
    }

    /// Increment and wake sleepers.
    pub fn v(&self) {
        self.count.fetch_add(1, Ordering::Release);
        self.chan.wake_all();
    }

    /// Current count (diagnostics).
    pub fn count(&self) -> isize {
        self.count.load(Ordering::Acquire)
    }
}

//! Process table and pid allocation
//!
//! A fixed vector of pid slots, each its own mutex plus a wait
//! condition variable. A slot's entry exists from pid reservation
//! until the exit status is collected (or the exiting process removes
//! itself when nobody will ever collect it).
//!
//! Lock ordering is derived from the process tree: parent before
//! child, always. `reserve_pid` skips the caller's own pid so a
//! forking parent never tries to retake the lock it already holds.

use alloc::vec::Vec;

use crate::limits::{PID_MAX, PID_MIN};
use crate::proc::Pid;
use crate::sync::{Condvar, Mutex, MutexGuard};

/// Per-pid bookkeeping, alive while the pid is reserved.
pub struct PidEntry {
    parent: Option<Pid>,
    children: Vec<Pid>,
    has_exited: bool,
    exit_status: i32,
}

impl PidEntry {
    fn new(parent: Option<Pid>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            has_exited: false,
            exit_status: 0,
        }
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn children(&self) -> &[Pid] {
        &self.children
    }

    pub fn has_child(&self, child: Pid) -> bool {
        self.children.contains(&child)
    }

    pub fn has_exited(&self) -> bool {
        self.has_exited
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn remove_child(&mut self, child: Pid) {
        self.children.retain(|&c| c != child);
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }
}

struct PidSlot {
    /// The entry, present while the pid is reserved. The mutex is the
    /// pid lock; everything in the entry is guarded by it.
    state: Mutex<Option<PidEntry>>,
    /// Signaled by `exit`; waited on by `wait_on_pid`. Lives beside the
    /// slot rather than in the entry so a waiter can keep using it
    /// while the entry itself comes and goes.
    wait_cv: Condvar,
}

pub struct ProcTable {
    slots: Vec<PidSlot>,
}

lazy_static::lazy_static! {
    static ref PROC_TABLE: ProcTable = ProcTable::new();
}

/// The global process table.
pub fn proc_table() -> &'static ProcTable {
    &PROC_TABLE
}

/// Guard type for a held pid lock.
pub type PidGuard<'a> = MutexGuard<'a, Option<PidEntry>>;

impl ProcTable {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(PID_MAX as usize);
        for _ in 0..PID_MAX {
            slots.push(PidSlot {
                state: Mutex::new(None),
                wait_cv: Condvar::new(),
            });
        }
        Self { slots }
    }

    /// Install the kernel's own entry. Called once at boot.
    pub fn init_kernel_entry(&self) {
        let mut guard = self.lock(Pid::KERNEL);
        if guard.is_none() {
            *guard = Some(PidEntry::new(None));
        }
    }

    fn slot(&self, pid: Pid) -> &PidSlot {
        &self.slots[pid.raw() as usize]
    }

    /// Acquire the pid lock.
    pub fn lock(&self, pid: Pid) -> PidGuard<'_> {
        log::trace!("proc_table: acquiring pid lock {}", pid);
        let guard = self.slot(pid).state.lock();
        log::trace!("proc_table: acquired pid lock {}", pid);
        guard
    }

    /// Does the pid currently have a table entry? (Momentary answer;
    /// callers that act on it must re-check under the pid lock.)
    pub fn exists(&self, pid: Pid) -> bool {
        self.slot(pid).state.lock().is_some()
    }

    /// Parent of `pid`, or `None` when the entry is gone. The parent
    /// field itself never changes after reservation.
    pub fn parent_of(&self, pid: Pid) -> Option<Option<Pid>> {
        self.slot(pid).state.lock().as_ref().map(|e| e.parent())
    }

    /// Reserve a fresh pid for a child of `parent_pid`, whose entry the
    /// caller holds locked as `parent_guard`.
    ///
    /// Scans upward from PID_MIN, skipping the parent itself (its lock
    /// is already held by the caller), and double-checks emptiness
    /// under each candidate's lock before installing. Registers the
    /// child in the parent's children list. Returns `None` when every
    /// pid is taken.
    pub fn reserve_pid(&self, parent_guard: &mut PidGuard<'_>, parent_pid: Pid) -> Option<Pid> {
        for raw in PID_MIN..PID_MAX {
            let pid = Pid::new(raw).expect("scan range is valid");
            if pid == parent_pid {
                continue;
            }
            let mut guard = self.lock(pid);
            if guard.is_none() {
                *guard = Some(PidEntry::new(Some(parent_pid)));
                parent_guard
                    .as_mut()
                    .expect("caller holds a live parent entry")
                    .children
                    .push(pid);
                return Some(pid);
            }
        }
        None
    }

    /// Undo a reservation that never became a process (fork failing
    /// after `reserve_pid`).
    pub fn unreserve_pid(&self, parent_guard: &mut PidGuard<'_>, child: Pid) {
        let mut guard = self.lock(child);
        let entry = guard.take().expect("unreserving a pid with no entry");
        assert!(entry.children.is_empty(), "unreserving a pid with children");
        if let Some(parent) = parent_guard.as_mut() {
            parent.remove_child(child);
        }
    }

    /// Remove a pid's entry. Caller holds the pid lock.
    pub fn remove(&self, pid: Pid, guard: &mut PidGuard<'_>) {
        log::trace!("proc_table: removing entry for pid {}", pid);
        let removed = guard.take();
        assert!(removed.is_some(), "removing pid {} twice", pid);
    }

    /// Block until `pid` exits, then collect its status and remove the
    /// entry. Consumes the caller's pid lock; the lock is released
    /// while sleeping and the entry is gone on return.
    ///
    /// This is the only path that destroys the entry of a process whose
    /// parent is still alive.
    pub fn wait_on_pid<'a>(&'a self, pid: Pid, mut guard: PidGuard<'a>) -> i32 {
        let slot = self.slot(pid);
        loop {
            match guard.as_ref() {
                Some(entry) if entry.has_exited => break,
                Some(_) => guard = slot.wait_cv.wait(&slot.state, guard),
                None => panic!("waiting on pid {} with no table entry", pid),
            }
        }
        let entry = guard.take().expect("entry checked above");
        log::trace!("proc_table: pid {} exit status collected, entry removed", pid);
        entry.exit_status
    }

    /// Record that `pid` has exited and wake its waiters. Caller holds
    /// the pid lock.
    pub fn exit(&self, pid: Pid, guard: &mut PidGuard<'_>, status: i32) {
        let entry = guard.as_mut().expect("exiting pid has no table entry");
        entry.has_exited = true;
        entry.exit_status = status;
        self.slot(pid).wait_cv.broadcast();
    }

    /// Number of reserved pids (diagnostics and tests).
    pub fn reserved_count(&self) -> usize {
        (1..PID_MAX)
            .filter(|&raw| self.exists(Pid::new(raw).expect("scan range is valid")))
            .count()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::limits::PID_KERN;

    fn table_with_kernel() -> ProcTable {
        let t = ProcTable::new();
        t.init_kernel_entry();
        t
    }

    #[test]
    fn test_reserve_assigns_lowest_free_pid() {
        let t = table_with_kernel();
        let parent = Pid::KERNEL;
        let mut pguard = t.lock(parent);
        let a = t.reserve_pid(&mut pguard, parent).expect("pid space is empty");
        let b = t.reserve_pid(&mut pguard, parent).expect("pid space is empty");
        assert_eq!(a.raw(), PID_MIN);
        assert_eq!(b.raw(), PID_MIN + 1);
        assert!(pguard.as_ref().unwrap().has_child(a));
        assert!(pguard.as_ref().unwrap().has_child(b));
        assert_eq!(t.parent_of(a), Some(Some(parent)));
    }

    #[test]
    fn test_reserve_skips_parent_pid() {
        let t = table_with_kernel();
        // Set up a user process as the would-be parent.
        let first = {
            let mut kguard = t.lock(Pid::KERNEL);
            t.reserve_pid(&mut kguard, Pid::KERNEL).expect("pid space is empty")
        };
        assert_eq!(first.raw(), PID_MIN);

        // With PID_MIN taken by the parent itself, its child must get
        // the next pid even though the scan starts at PID_MIN.
        let mut pguard = t.lock(first);
        let child = t.reserve_pid(&mut pguard, first).expect("pid space has room");
        assert_eq!(child.raw(), PID_MIN + 1);
    }

    #[test]
    fn test_reserve_exhaustion_returns_none() {
        let t = table_with_kernel();
        let parent = Pid::KERNEL;
        let mut pguard = t.lock(parent);
        let mut reserved = 0;
        while t.reserve_pid(&mut pguard, parent).is_some() {
            reserved += 1;
        }
        // Every pid but the kernel's own.
        assert_eq!(reserved as u32, PID_MAX - PID_MIN);
        assert!(t.reserve_pid(&mut pguard, parent).is_none());
    }

    #[test]
    fn test_unreserve_rolls_back() {
        let t = table_with_kernel();
        let parent = Pid::KERNEL;
        let mut pguard = t.lock(parent);
        let child = t.reserve_pid(&mut pguard, parent).expect("pid space is empty");
        t.unreserve_pid(&mut pguard, child);
        assert!(!pguard.as_ref().unwrap().has_child(child));
        drop(pguard);
        assert!(!t.exists(child));
    }

    #[test]
    fn test_exit_then_wait_collects_and_removes() {
        let t = table_with_kernel();
        let child = {
            let mut kguard = t.lock(Pid::KERNEL);
            t.reserve_pid(&mut kguard, Pid::KERNEL).expect("pid space is empty")
        };

        {
            let mut cguard = t.lock(child);
            t.exit(child, &mut cguard, 42);
            assert!(cguard.as_ref().unwrap().has_exited());
        }

        let cguard = t.lock(child);
        let status = t.wait_on_pid(child, cguard);
        assert_eq!(status, 42);
        assert!(!t.exists(child), "entry must be gone after collection");
    }

    #[test]
    fn test_wait_blocks_until_exit() {
        use alloc::sync::Arc;
        use std::thread;

        let t = Arc::new(table_with_kernel());
        let child = {
            let mut kguard = t.lock(Pid::KERNEL);
            t.reserve_pid(&mut kguard, Pid::KERNEL).expect("pid space is empty")
        };

        let waiter = {
            let t = t.clone();
            thread::spawn(move || {
                let guard = t.lock(child);
                t.wait_on_pid(child, guard)
            })
        };

        // Let the waiter reach the CV, then exit the child.
        thread::yield_now();
        {
            let mut cguard = t.lock(child);
            t.exit(child, &mut cguard, 7);
        }

        assert_eq!(waiter.join().expect("waiter panicked"), 7);
        assert!(!t.exists(child));
    }

    #[test]
    fn test_kernel_entry_has_no_parent() {
        let t = table_with_kernel();
        assert_eq!(t.parent_of(Pid::KERNEL), Some(None));
        assert_eq!(t.reserved_count(), 1);
        assert!(Pid::new(PID_KERN).unwrap() == Pid::KERNEL);
    }
}

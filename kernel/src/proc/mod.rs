//! Process management
//!
//! The process object binds a name, pid, address space, working
//! directory, and file table; a global registry maps live pids to
//! their processes, and `current()` is the uniprocessor's one running
//! process. Pid bookkeeping (parents, children, exit status, waiters)
//! lives in [`table`]; shared open-file state in [`file_table`].

use core::fmt;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use crate::error::{Errno, KernelResult};
use crate::limits::{PID_KERN, PID_MAX, PID_MIN};
use crate::mm::AddressSpace;
use crate::sync::{Mutex, MutexGuard};

pub mod file_table;
pub mod loader;
pub mod table;

pub use file_table::{FileHandle, FileTable};

/// Process identifier. Pid 1 is the kernel; user pids start at
/// [`PID_MIN`]. "No process" is `Option::None`, never a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The kernel's own pid.
    pub const KERNEL: Pid = Pid(PID_KERN);

    /// Construct a pid, rejecting values outside `[1, PID_MAX)`.
    pub fn new(raw: u32) -> Option<Pid> {
        if (1..PID_MAX).contains(&raw) {
            Some(Pid(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Is this a user pid (not the kernel's)?
    pub fn is_user(self) -> bool {
        self.0 >= PID_MIN
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process: one user program plus the kernel state backing it.
pub struct Process {
    /// Name, for diagnostics only.
    pub name: String,
    pub pid: Pid,
    /// The user address space; `None` for the kernel process and during
    /// teardown.
    addrspace: Mutex<Option<AddressSpace>>,
    /// Current working directory (absolute path).
    cwd: Mutex<String>,
    /// Open-file table.
    files: Mutex<FileTable>,
}

impl Process {
    /// Create a fresh process with an empty file table and root cwd.
    ///
    /// The pid must already be reserved in the process table.
    pub fn create(name: &str, pid: Pid) -> Arc<Process> {
        Arc::new(Process {
            name: String::from(name),
            pid,
            addrspace: Mutex::new(None),
            cwd: Mutex::new(String::from("/")),
            files: Mutex::new(FileTable::new()),
        })
    }

    /// Create a process set up to run a user program: the working
    /// directory is inherited from the current process and the console
    /// is wired onto file descriptors 0..2.
    pub fn create_runprogram(name: &str, pid: Pid) -> KernelResult<Arc<Process>> {
        let proc = Self::create(name, pid);
        if let Some(parent) = current() {
            *proc.cwd.lock() = parent.cwd();
        }
        proc.files.lock().attach_console()?;
        Ok(proc)
    }

    pub fn addrspace(&self) -> MutexGuard<'_, Option<AddressSpace>> {
        self.addrspace.lock()
    }

    pub fn files(&self) -> MutexGuard<'_, FileTable> {
        self.files.lock()
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, path: String) {
        *self.cwd.lock() = path;
    }

    /// Install an address space, returning the old one.
    pub fn set_addrspace(&self, new: Option<AddressSpace>) -> Option<AddressSpace> {
        let mut guard = self.addrspace.lock();
        core::mem::replace(&mut *guard, new)
    }
}

// ---------------------------------------------------------------------------
// Registry and current process
// ---------------------------------------------------------------------------

lazy_static::lazy_static! {
    /// All live processes, keyed by pid.
    static ref PROCS: Mutex<BTreeMap<Pid, Arc<Process>>> = Mutex::new(BTreeMap::new());

    /// The process running on the (single) CPU.
    static ref CURRENT: Mutex<Option<Arc<Process>>> = Mutex::new(None);
}

/// Register a process under its pid.
pub fn register(proc: Arc<Process>) {
    let prev = PROCS.lock().insert(proc.pid, proc);
    assert!(prev.is_none(), "pid registered twice");
}

/// Remove a process from the registry.
pub fn unregister(pid: Pid) -> Option<Arc<Process>> {
    PROCS.lock().remove(&pid)
}

/// Look up a live process.
pub fn get(pid: Pid) -> Option<Arc<Process>> {
    PROCS.lock().get(&pid).cloned()
}

/// Number of live processes.
pub fn count() -> usize {
    PROCS.lock().len()
}

/// The currently running process, if user execution has started.
pub fn current() -> Option<Arc<Process>> {
    CURRENT.lock().clone()
}

/// The currently running process, or EFAULT at the syscall boundary.
pub fn current_or_fault() -> KernelResult<Arc<Process>> {
    current().ok_or(Errno::Efault)
}

/// Switch the current process; returns the previous one.
pub fn set_current(proc: Option<Arc<Process>>) -> Option<Arc<Process>> {
    core::mem::replace(&mut *CURRENT.lock(), proc)
}

/// Snapshot of live pids (diagnostics and teardown sweeps).
pub fn live_pids() -> alloc::vec::Vec<Pid> {
    PROCS.lock().keys().copied().collect()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_pid_range_checks() {
        assert!(Pid::new(0).is_none());
        assert!(Pid::new(1).is_some());
        assert!(Pid::new(PID_MAX).is_none());
        assert!(Pid::new(PID_MAX - 1).is_some());
        assert!(!Pid::KERNEL.is_user());
        assert!(Pid::new(PID_MIN).unwrap().is_user());
    }

    #[test]
    fn test_process_create_defaults() {
        let p = Process::create("shell", Pid::new(17).unwrap());
        assert_eq!(p.name, "shell");
        assert_eq!(p.cwd(), "/");
        assert!(p.addrspace().is_none());
        assert_eq!(p.files().open_count(), 0);
    }
}

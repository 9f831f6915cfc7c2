//! Kernel error codes
//!
//! One errno-style code type is used across the whole kernel: syscalls
//! return `KernelResult` and the dispatcher encodes the code into the
//! trapframe, where userland turns it into `errno` and a `-1` return.
//! Helpers that cannot meaningfully fail panic instead of returning one
//! of these.

use core::fmt;

/// Kernel error code, as seen by userland in `errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
#[repr(i32)]
pub enum Errno {
    /// No such system call
    Enosys = 1,
    /// Bad file descriptor
    Ebadf = 2,
    /// Bad memory reference
    Efault = 3,
    /// Invalid argument
    Einval = 4,
    /// Too many open files (per process)
    Emfile = 5,
    /// Too many open files (system-wide)
    Enfile = 6,
    /// Is a directory
    Eisdir = 7,
    /// Not a directory
    Enotdir = 8,
    /// No such file or directory
    Enoent = 9,
    /// No such device
    Enodev = 10,
    /// Not executable
    Enoexec = 11,
    /// Out of memory
    Enomem = 12,
    /// Argument list too long
    E2big = 13,
    /// Hardware I/O error
    Eio = 14,
    /// Illegal seek
    Espipe = 15,
    /// No space left on device
    Enospc = 16,
    /// No such process
    Esrch = 17,
    /// No child processes
    Echild = 18,
    /// Too many processes (per user)
    Emproc = 19,
    /// Too many processes (system-wide)
    Enproc = 20,
    /// File name too long
    Enametoolong = 21,
}

/// Result type alias for kernel operations.
pub type KernelResult<T> = Result<T, Errno>;

impl Errno {
    /// Short symbolic name, matching the userland constant.
    pub fn name(self) -> &'static str {
        match self {
            Self::Enosys => "ENOSYS",
            Self::Ebadf => "EBADF",
            Self::Efault => "EFAULT",
            Self::Einval => "EINVAL",
            Self::Emfile => "EMFILE",
            Self::Enfile => "ENFILE",
            Self::Eisdir => "EISDIR",
            Self::Enotdir => "ENOTDIR",
            Self::Enoent => "ENOENT",
            Self::Enodev => "ENODEV",
            Self::Enoexec => "ENOEXEC",
            Self::Enomem => "ENOMEM",
            Self::E2big => "E2BIG",
            Self::Eio => "EIO",
            Self::Espipe => "ESPIPE",
            Self::Enospc => "ENOSPC",
            Self::Esrch => "ESRCH",
            Self::Echild => "ECHILD",
            Self::Emproc => "EMPROC",
            Self::Enproc => "ENPROC",
            Self::Enametoolong => "ENAMETOOLONG",
        }
    }

    /// Numeric value delivered to userland.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enosys => write!(f, "no such system call"),
            Self::Ebadf => write!(f, "bad file descriptor"),
            Self::Efault => write!(f, "bad memory reference"),
            Self::Einval => write!(f, "invalid argument"),
            Self::Emfile => write!(f, "too many open files"),
            Self::Enfile => write!(f, "too many open files in system"),
            Self::Eisdir => write!(f, "is a directory"),
            Self::Enotdir => write!(f, "not a directory"),
            Self::Enoent => write!(f, "no such file or directory"),
            Self::Enodev => write!(f, "no such device"),
            Self::Enoexec => write!(f, "not executable"),
            Self::Enomem => write!(f, "out of memory"),
            Self::E2big => write!(f, "argument list too long"),
            Self::Eio => write!(f, "hardware I/O error"),
            Self::Espipe => write!(f, "illegal seek"),
            Self::Enospc => write!(f, "no space left on device"),
            Self::Esrch => write!(f, "no such process"),
            Self::Echild => write!(f, "no child processes"),
            Self::Emproc => write!(f, "too many processes"),
            Self::Enproc => write!(f, "too many processes in system"),
            Self::Enametoolong => write!(f, "file name too long"),
        }
    }
}

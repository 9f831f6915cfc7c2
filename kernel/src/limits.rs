//! System limits
//!
//! Fixed sizing constants shared by the process and VM subsystems.

/// Pid reserved for the kernel process.
pub const PID_KERN: u32 = 1;

/// Lowest pid handed to user processes.
pub const PID_MIN: u32 = 2;

/// One past the highest valid pid; sizes the process table.
pub const PID_MAX: u32 = 256;

/// Open files per process, including the three reserved descriptors.
pub const OPEN_MAX: usize = 128;

/// Upper bound on the packed size of an execv argument block.
pub const ARG_MAX: usize = 65536;

/// Longest individual path component / program name.
pub const NAME_MAX: usize = 255;

/// Longest full path accepted by the VFS boundary.
pub const PATH_MAX: usize = 1024;

//! LarchOS Kernel Library
//!
//! Core kernel services for a uniprocessor MIPS-like machine with a
//! software-managed TLB: physical frame allocation, per-process page
//! tables and address spaces, the TLB-refill fault handler, the process
//! table with pid allocation and wait semantics, per-process file
//! descriptor tables, and the system call layer on top of them.
//!
//! The library builds for bare metal (`target_os = "none"`) and for a
//! host target, where it is exercised by the unit and integration test
//! suites.

#![no_std]

extern crate alloc;

// On bare-metal targets use the kernel heap allocator. On the host
// (for unit tests and coverage), delegate to the system allocator so
// test code using Vec/String/alloc compiles and runs.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Get a reference to the kernel heap allocator.
#[cfg(target_os = "none")]
pub fn get_allocator() -> &'static LockedHeap {
    &ALLOCATOR
}

// Host target: use the system allocator so unit tests can allocate
// normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod bootstrap;
pub mod error;
pub mod fs;
pub mod limits;
pub mod mm;
pub mod proc;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(not(target_os = "none"))]
pub mod test_support;

// Re-export the types nearly every caller needs.
pub use arch::mips::{PhysAddr, PhysPage, VirtAddr, VirtPage, PAGE_SIZE};
pub use error::{Errno, KernelResult};
pub use proc::Pid;

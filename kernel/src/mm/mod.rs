//! Virtual memory subsystem
//!
//! Layered bottom-up: the coremap owns physical frames, the page table
//! maps virtual pages onto them per address space, the address space
//! ties a page table to a heap and stack window, and the fault handler
//! materializes frames and refills the TLB on demand. `copyinout`
//! carries bytes across the user/kernel boundary and `page_file`
//! provides the swap backing-store primitives.

pub mod addrspace;
pub mod copyinout;
pub mod coremap;
pub mod fault;
pub mod heap;
pub mod page_file;
pub mod page_table;

pub use addrspace::{AddressSpace, RegionPerms};
pub use coremap::{coremap, CoreMap, FrameOwner, FrameState};
pub use fault::{vm_fault, FaultKind};
pub use page_table::{PageSlot, PageTable};

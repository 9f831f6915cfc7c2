//! Kernel heap bring-up
//!
//! On bare metal the global allocator is a `linked_list_allocator`
//! heap (declared in lib.rs) that the platform boot code seeds with a
//! kernel memory region here. Host builds use the system allocator and
//! need no bring-up.

#[cfg(target_os = "none")]
use crate::arch::mips::PAGE_SIZE;

/// Seed the kernel heap with pages claimed from the frame allocator.
///
/// # Safety
///
/// Must be called exactly once, after the coremap is up and before the
/// first heap allocation. The claimed region must stay owned by the
/// heap for the kernel's lifetime.
#[cfg(target_os = "none")]
pub unsafe fn bootstrap(npages: usize) {
    let kvaddr = crate::mm::coremap::coremap()
        .alloc_kpages(npages)
        .expect("no contiguous region for the kernel heap");
    // SAFETY: The region was just claimed for the kernel and spans
    // npages whole pages starting at a direct-mapped address; the
    // caller guarantees single initialization.
    unsafe {
        crate::get_allocator()
            .lock()
            .init(kvaddr.as_u32() as usize as *mut u8, npages * PAGE_SIZE);
    }
}

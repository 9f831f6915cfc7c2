//! User address spaces
//!
//! One page table plus a heap window and the fixed stack window. Region
//! and stack definition reserve virtual pages without allocating
//! frames; the fault handler materializes them on first touch. Copying
//! (for fork) eagerly duplicates every materialized frame through the
//! direct map.

use bitflags::bitflags;

use crate::arch::mips::{VirtAddr, VirtPage, PAGE_SIZE, STACKPAGES, USERSTACK};
use crate::arch::ram::ram;
use crate::arch::tlb::TLB;
use crate::error::{Errno, KernelResult};
use crate::mm::coremap::{coremap, FrameOwner};
use crate::mm::page_table::{PageSlot, PageTable};
use crate::proc::Pid;

bitflags! {
    /// Requested permissions for a defined region.
    ///
    /// Accepted and recorded at the interface, but not yet enforced:
    /// every page the fault handler installs is read-write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionPerms: u32 {
        const READ = 0x4;
        const WRITE = 0x2;
        const EXEC = 0x1;
    }
}

/// Initial page-table capacity for a fresh address space.
const INITIAL_PT_CAPACITY: usize = 32;

#[derive(Debug)]
pub struct AddressSpace {
    page_table: PageTable,
    heap_start: VirtAddr,
    heap_end: VirtAddr,
}

impl AddressSpace {
    /// Create an empty address space: no regions, heap at zero.
    pub fn new() -> Self {
        Self {
            page_table: PageTable::with_capacity(INITIAL_PT_CAPACITY),
            heap_start: VirtAddr::new(0),
            heap_end: VirtAddr::new(0),
        }
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    pub fn heap_start(&self) -> VirtAddr {
        self.heap_start
    }

    pub fn heap_end(&self) -> VirtAddr {
        self.heap_end
    }

    /// Move the heap break. Callers (sbrk) have already adjusted the
    /// page table to match.
    pub fn set_heap_end(&mut self, new_end: VirtAddr) {
        self.heap_end = new_end;
    }

    /// Base of the stack window; the heap may not grow past this.
    pub fn stack_bottom() -> VirtAddr {
        VirtAddr::new(USERSTACK - STACKPAGES * PAGE_SIZE as u32)
    }

    /// Reserve one virtual page: legal address, frame on first touch.
    ///
    /// The page must not already be part of the address space; regions
    /// are defined once, before the program runs, and never overlap.
    fn reserve_vpage(&mut self, vpage: VirtPage) {
        assert!(
            !self.page_table.contains(vpage),
            "page table already contains an entry for vpage {:#x}",
            vpage.index()
        );
        log::trace!("as: reserve vpage {:#x}", vpage.index());
        self.page_table.write(vpage, PageSlot::Reserved);
    }

    /// Set up a segment covering `[vaddr, vaddr + size)`.
    ///
    /// Every fully or partially covered page is reserved. The heap
    /// start is then moved to the first page boundary past every
    /// defined region, with the heap end tracking it; regions are never
    /// defined while the heap is in use.
    pub fn define_region(&mut self, vaddr: VirtAddr, size: usize, perms: RegionPerms) -> KernelResult<()> {
        assert!(size > 0, "empty region");
        log::trace!(
            "as: define_region({}, {:#x} bytes, {:?})",
            vaddr,
            size,
            perms
        );

        let vaddr_max = VirtAddr::new(vaddr.as_u32() + size as u32 - 1);
        if !vaddr_max.is_user() {
            return Err(Errno::Efault);
        }
        if vaddr_max >= Self::stack_bottom() {
            // Defined regions may not overlap the stack window.
            return Err(Errno::Einval);
        }

        let vpage_min = vaddr.page();
        let vpage_max = vaddr_max.page();
        for v in vpage_min.index()..=vpage_max.index() {
            self.reserve_vpage(VirtPage(v));
        }

        if vaddr_max >= self.heap_start {
            self.heap_start = VirtAddr::new(vaddr_max.page_base().as_u32() + PAGE_SIZE as u32);
            self.heap_end = self.heap_start;
        }

        Ok(())
    }

    /// Reserve the stack window and return the initial stack pointer.
    pub fn define_stack(&mut self) -> VirtAddr {
        let top = VirtAddr::new(USERSTACK).page();
        for v in (top.index() - STACKPAGES)..top.index() {
            self.reserve_vpage(VirtPage(v));
        }
        VirtAddr::new(USERSTACK)
    }

    /// Duplicate this address space for a child owned by `new_owner`.
    ///
    /// Reservations are copied as reservations; every materialized page
    /// gets a fresh frame and a byte-for-byte copy through the direct
    /// map. If the frame allocator runs dry partway, everything claimed
    /// for the child is released and the copy fails with ENOMEM.
    pub fn copy(&self, new_owner: Pid) -> KernelResult<AddressSpace> {
        log::trace!("as: copy for pid {}", new_owner);

        let mut new = AddressSpace::new();
        new.heap_start = self.heap_start;
        new.heap_end = self.heap_end;

        for (vpage, slot) in self.page_table.iter() {
            match slot {
                PageSlot::Reserved => {
                    new.page_table.write(vpage, PageSlot::Reserved);
                }
                PageSlot::Mapped(old_ppage) => {
                    let Some(new_ppage) = coremap().claim(1, FrameOwner::Proc(new_owner)) else {
                        new.release_frames();
                        return Err(Errno::Enomem);
                    };
                    log::trace!(
                        "as: copy page {:#x} -> {:#x}",
                        old_ppage.index(),
                        new_ppage.index()
                    );
                    ram().copy_frame(old_ppage, new_ppage);
                    new.page_table.write(vpage, PageSlot::Mapped(new_ppage));
                }
            }
        }

        Ok(new)
    }

    /// Flush the TLB so no stale translation survives the switch onto
    /// this address space.
    ///
    /// Deliberately coarse: tagging entries with the pid field was
    /// tried and does not hold up on the target hardware, so every
    /// activation starts from an empty TLB.
    pub fn activate(&self) {
        TLB.flush_all();
    }

    /// Release every frame this address space still holds.
    fn release_frames(&mut self) {
        for (_, slot) in self.page_table.iter() {
            if let PageSlot::Mapped(ppage) = slot {
                coremap().release(ppage);
            }
        }
        self.page_table = PageTable::with_capacity(INITIAL_PT_CAPACITY);
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.release_frames();
    }
}

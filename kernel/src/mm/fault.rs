//! TLB refill fault handling
//!
//! A user fault lands here with the fault kind and address. The
//! current address space's page table decides the outcome: absent
//! pages are segmentation violations, reserved pages get a frame on
//! the spot, and the resulting translation is written into a free TLB
//! slot. Every user-visible failure maps to EFAULT or ENOMEM; a
//! read-only fault is a kernel bug while all regions are read-write.

use crate::arch::mips::VirtAddr;
use crate::arch::ram::ram;
use crate::arch::tlb::{make_entryhi, make_entrylo, EntryLoFlags, TLB};
use crate::error::{Errno, KernelResult};
use crate::mm::coremap::{coremap, FrameOwner};
use crate::mm::page_table::PageSlot;
use crate::proc;

/// Why the MMU trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    Readonly,
}

/// Handle a TLB miss at `fault_addr`.
pub fn vm_fault(kind: FaultKind, fault_addr: VirtAddr) -> KernelResult<()> {
    let fault_addr = fault_addr.page_base();
    log::trace!("vm_fault: {:?} at {}", kind, fault_addr);

    if kind == FaultKind::Readonly {
        // All regions are read-write today; the hardware cannot
        // legitimately raise this.
        panic!("read-only fault at {} with no read-only mappings", fault_addr);
    }

    // Early in boot there is no process or no address space yet; a
    // fault then must not loop forever.
    let Some(proc) = proc::current() else {
        return Err(Errno::Efault);
    };
    let pid = proc.pid;
    let mut guard = proc.addrspace();
    let Some(space) = guard.as_mut() else {
        return Err(Errno::Efault);
    };

    let vpage = fault_addr.page();
    let ppage = match space.page_table().read(vpage) {
        None => {
            log::debug!("vm_fault: hard fault at {} (pid {})", fault_addr, pid);
            return Err(Errno::Efault);
        }
        Some(PageSlot::Mapped(ppage)) => ppage,
        Some(PageSlot::Reserved) => {
            let ppage = coremap()
                .claim(1, FrameOwner::Proc(pid))
                .ok_or(Errno::Enomem)?;
            ram().zero_frame(ppage);
            space.page_table_mut().write(vpage, PageSlot::Mapped(ppage));
            ppage
        }
    };

    // First invalid slot wins. With no free slot the process is out of
    // luck; eviction is a future refinement.
    let Some(slot) = TLB.find_invalid_slot() else {
        return Err(Errno::Efault);
    };
    let hi = make_entryhi(fault_addr, pid);
    let lo = make_entrylo(ppage.base(), EntryLoFlags::VALID | EntryLoFlags::DIRTY);
    TLB.write(slot, hi, lo);

    Ok(())
}

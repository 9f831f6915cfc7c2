//! Memory system calls
//!
//! sbrk moves the heap break in whole pages. Growth reserves pages
//! (frames arrive on first touch, like any region); shrinking releases
//! whatever frames the dropped pages had and removes their mappings so
//! a later touch is a hard fault.

use crate::arch::mips::{VirtAddr, PAGE_SIZE};
use crate::error::{Errno, KernelResult};
use crate::mm::coremap::coremap;
use crate::mm::page_table::PageSlot;
use crate::proc::current_or_fault;

pub fn sys_sbrk(amount: i32) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    let mut guard = proc.addrspace();
    let space = guard.as_mut().ok_or(Errno::Efault)?;

    if amount as i64 % PAGE_SIZE as i64 != 0 {
        return Err(Errno::Einval);
    }

    let old_end = space.heap_end().as_u32();
    let new_end = old_end as i64 + amount as i64;
    if new_end < space.heap_start().as_u32() as i64 {
        return Err(Errno::Einval);
    }
    // The stack is fixed-size; growing into its window is as good as
    // out of memory.
    if new_end >= crate::mm::AddressSpace::stack_bottom().as_u32() as i64 {
        return Err(Errno::Enomem);
    }

    let npages = (amount.unsigned_abs() as usize) / PAGE_SIZE;

    if amount < 0 {
        // Free top-down so the dropped addresses fault from now on.
        for i in 1..=npages {
            let vaddr = VirtAddr::new(old_end - (i * PAGE_SIZE) as u32);
            let vpage = vaddr.page();
            if let Some(PageSlot::Mapped(ppage)) = space.page_table().read(vpage) {
                coremap().release(ppage);
            }
            space.page_table_mut().remove(vpage);
        }
    } else {
        for i in 0..npages {
            let vaddr = VirtAddr::new(old_end + (i * PAGE_SIZE) as u32);
            space.page_table_mut().write(vaddr.page(), PageSlot::Reserved);
        }
    }

    space.set_heap_end(VirtAddr::new(new_end as u32));
    Ok(old_end)
}

//! User/kernel memory transfer
//!
//! All byte traffic across the user boundary funnels through here.
//! Transfers walk the target address space page by page through the
//! direct map, materializing reserved pages exactly as a fault would;
//! any touch of an address outside the space fails with EFAULT before
//! a byte moves from that page.
//!
//! The argv helpers pack an execv argument vector into one kernel
//! buffer (argc, pointer slots, 4-byte padded strings) bounded by
//! ARG_MAX, and later unpack it onto a new user stack with the
//! pointers rewritten to user addresses.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::arch::mips::{PhysPage, VirtAddr, VirtPage, PAGE_SIZE, USERSTACK};
use crate::arch::ram::ram;
use crate::error::{Errno, KernelResult};
use crate::limits::ARG_MAX;
use crate::mm::addrspace::AddressSpace;
use crate::mm::coremap::{coremap, FrameOwner};
use crate::mm::page_table::PageSlot;
use crate::proc::{current_or_fault, Pid};

/// Check `[uaddr, uaddr + len)` lies inside user space.
fn check_user_range(uaddr: VirtAddr, len: usize) -> KernelResult<()> {
    let end = uaddr.as_u32() as u64 + len as u64;
    if !uaddr.is_user() || end > USERSTACK as u64 {
        return Err(Errno::Efault);
    }
    Ok(())
}

/// Translate one user page, allocating a frame if the page is only
/// reserved. Absent pages are EFAULT.
fn touch_page(space: &mut AddressSpace, owner: Pid, vpage: VirtPage) -> KernelResult<PhysPage> {
    match space.page_table().read(vpage) {
        None => Err(Errno::Efault),
        Some(PageSlot::Mapped(ppage)) => Ok(ppage),
        Some(PageSlot::Reserved) => {
            let ppage = coremap()
                .claim(1, FrameOwner::Proc(owner))
                .ok_or(Errno::Enomem)?;
            ram().zero_frame(ppage);
            space.page_table_mut().write(vpage, PageSlot::Mapped(ppage));
            Ok(ppage)
        }
    }
}

/// Copy kernel bytes out into an address space.
pub fn copyout_into(
    space: &mut AddressSpace,
    owner: Pid,
    uaddr: VirtAddr,
    src: &[u8],
) -> KernelResult<()> {
    check_user_range(uaddr, src.len())?;

    let mut addr = uaddr.as_u32();
    let mut remaining = src;
    while !remaining.is_empty() {
        let va = VirtAddr::new(addr);
        let page_off = va.page_offset();
        let chunk = remaining.len().min(PAGE_SIZE - page_off);
        let ppage = touch_page(space, owner, va.page())?;
        ram().write_into(ppage, page_off, &remaining[..chunk]);
        remaining = &remaining[chunk..];
        addr += chunk as u32;
    }
    Ok(())
}

/// Copy bytes in from an address space to a kernel buffer.
pub fn copyin_from(
    space: &mut AddressSpace,
    owner: Pid,
    uaddr: VirtAddr,
    dst: &mut [u8],
) -> KernelResult<()> {
    check_user_range(uaddr, dst.len())?;

    let mut addr = uaddr.as_u32();
    let mut filled = 0;
    while filled < dst.len() {
        let va = VirtAddr::new(addr);
        let page_off = va.page_offset();
        let chunk = (dst.len() - filled).min(PAGE_SIZE - page_off);
        let ppage = touch_page(space, owner, va.page())?;
        ram().read_from(ppage, page_off, &mut dst[filled..filled + chunk]);
        filled += chunk;
        addr += chunk as u32;
    }
    Ok(())
}

/// Read a NUL-terminated byte string, refusing strings of `max` bytes
/// or longer (terminator included) with ENAMETOOLONG.
pub fn copyin_cstr_from(
    space: &mut AddressSpace,
    owner: Pid,
    uaddr: VirtAddr,
    max: usize,
) -> KernelResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut addr = uaddr.as_u32();
    loop {
        let va = VirtAddr::new(addr);
        check_user_range(va, 1)?;
        let page_off = va.page_offset();
        let chunk_len = (PAGE_SIZE - page_off).min(max + 1 - out.len());
        let ppage = touch_page(space, owner, va.page())?;
        let mut chunk = vec![0u8; chunk_len];
        ram().read_from(ppage, page_off, &mut chunk);

        if let Some(nul) = chunk.iter().position(|&b| b == 0) {
            out.extend_from_slice(&chunk[..nul]);
            if out.len() >= max {
                return Err(Errno::Enametoolong);
            }
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
        if out.len() >= max {
            return Err(Errno::Enametoolong);
        }
        addr += chunk_len as u32;
    }
}

// ---------------------------------------------------------------------------
// Current-process wrappers
// ---------------------------------------------------------------------------

/// Copy kernel bytes to the current process's address space.
pub fn copyout(uaddr: VirtAddr, src: &[u8]) -> KernelResult<()> {
    let proc = current_or_fault()?;
    let pid = proc.pid;
    let mut guard = proc.addrspace();
    let space = guard.as_mut().ok_or(Errno::Efault)?;
    copyout_into(space, pid, uaddr, src)
}

/// Copy user bytes from the current process's address space.
pub fn copyin(uaddr: VirtAddr, dst: &mut [u8]) -> KernelResult<()> {
    let proc = current_or_fault()?;
    let pid = proc.pid;
    let mut guard = proc.addrspace();
    let space = guard.as_mut().ok_or(Errno::Efault)?;
    copyin_from(space, pid, uaddr, dst)
}

/// Copy in one little-endian word.
pub fn copyin_u32(uaddr: VirtAddr) -> KernelResult<u32> {
    let mut bytes = [0u8; 4];
    copyin(uaddr, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Copy in a NUL-terminated string, bounded by `max` bytes.
pub fn copyin_str(uaddr: VirtAddr, max: usize) -> KernelResult<String> {
    let proc = current_or_fault()?;
    let pid = proc.pid;
    let mut guard = proc.addrspace();
    let space = guard.as_mut().ok_or(Errno::Efault)?;
    let bytes = copyin_cstr_from(space, pid, uaddr, max)?;
    String::from_utf8(bytes).map_err(|_| Errno::Einval)
}

// ---------------------------------------------------------------------------
// Argument vectors
// ---------------------------------------------------------------------------

/// An argv packed into kernel memory: the strings concatenated with
/// their NUL terminators, each start padded to 4 bytes, plus the
/// offset of each string in the block.
#[derive(Debug)]
pub struct ArgvImage {
    offsets: Vec<u32>,
    strings: Vec<u8>,
}

impl ArgvImage {
    pub fn argc(&self) -> usize {
        self.offsets.len()
    }

    /// Bytes of the pointer block: one slot per argument plus the NULL
    /// terminator slot.
    pub fn pointer_block_size(&self) -> usize {
        4 * (self.argc() + 1)
    }

    /// Packed size charged against ARG_MAX: the argc word, the pointer
    /// block, and the padded strings.
    pub fn packed_size(&self) -> usize {
        4 + self.pointer_block_size() + self.strings.len()
    }
}

/// Copy in a user argv (NULL-terminated array of string pointers) and
/// pack it. Oversize vectors are E2BIG; bad pointers are EFAULT.
pub fn copy_in_str_array(argv_uaddr: VirtAddr) -> KernelResult<ArgvImage> {
    let proc = current_or_fault()?;
    let pid = proc.pid;
    let mut guard = proc.addrspace();
    let space = guard.as_mut().ok_or(Errno::Efault)?;

    let mut image = ArgvImage {
        offsets: Vec::new(),
        strings: Vec::new(),
    };

    for i in 0u32.. {
        let slot_addr = VirtAddr::new(argv_uaddr.as_u32().wrapping_add(i * 4));
        let mut ptr_bytes = [0u8; 4];
        copyin_from(space, pid, slot_addr, &mut ptr_bytes)?;
        let str_ptr = u32::from_le_bytes(ptr_bytes);
        if str_ptr == 0 {
            break;
        }

        // Whatever budget the pointer block and previous strings have
        // not consumed bounds this string.
        let budget = ARG_MAX
            .checked_sub(4 + 4 * (i as usize + 2) + image.strings.len())
            .ok_or(Errno::E2big)?;
        let bytes = match copyin_cstr_from(space, pid, VirtAddr::new(str_ptr), budget) {
            Ok(bytes) => bytes,
            Err(Errno::Enametoolong) => return Err(Errno::E2big),
            Err(e) => return Err(e),
        };

        image.offsets.push(image.strings.len() as u32);
        image.strings.extend_from_slice(&bytes);
        image.strings.push(0);
        while image.strings.len() % 4 != 0 {
            image.strings.push(0);
        }
        if image.packed_size() > ARG_MAX {
            return Err(Errno::E2big);
        }
    }

    Ok(image)
}

/// Unpack an [`ArgvImage`] onto a new user stack.
///
/// The block is placed below `sp`, 4-byte aligned: first the pointer
/// array (NULL-terminated, each pointer targeting the string region
/// that follows), then the string bytes themselves. Returns the new
/// stack pointer and the user address of the pointer array.
pub fn copy_out_argv(
    space: &mut AddressSpace,
    owner: Pid,
    image: &ArgvImage,
    sp: VirtAddr,
) -> KernelResult<(VirtAddr, VirtAddr)> {
    let total = (image.pointer_block_size() + image.strings.len()) as u32;
    let sp_new = (sp.as_u32() - total) & !3u32;
    let argv_base = sp_new;
    let string_base = sp_new + image.pointer_block_size() as u32;

    for (i, &offset) in image.offsets.iter().enumerate() {
        let user_ptr = string_base + offset;
        copyout_into(
            space,
            owner,
            VirtAddr::new(argv_base + 4 * i as u32),
            &user_ptr.to_le_bytes(),
        )?;
    }
    // NULL terminator slot.
    copyout_into(
        space,
        owner,
        VirtAddr::new(argv_base + 4 * image.argc() as u32),
        &0u32.to_le_bytes(),
    )?;
    copyout_into(space, owner, VirtAddr::new(string_base), &image.strings)?;

    Ok((VirtAddr::new(sp_new), VirtAddr::new(argv_base)))
}

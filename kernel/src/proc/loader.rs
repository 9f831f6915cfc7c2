//! Executable loader
//!
//! Loads an ELF32 executable from a vnode into a fresh address space:
//! one reserved region per PT_LOAD segment, file bytes copied in, the
//! rest of each segment left to the zero-filled frames the fault path
//! provides. Returns the entry point.

use alloc::sync::Arc;
use alloc::vec;

use crate::arch::mips::VirtAddr;
use crate::error::{Errno, KernelResult};
use crate::fs::Vnode;
use crate::mm::addrspace::{AddressSpace, RegionPerms};
use crate::mm::copyinout::copyout_into;
use crate::proc::Pid;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_MIPS: u16 = 8;
const PT_LOAD: u32 = 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Read exactly `buf.len()` bytes at `offset`; short reads are not an
/// executable.
fn read_exact_at(vnode: &Arc<dyn Vnode>, offset: u64, buf: &mut [u8]) -> KernelResult<()> {
    let got = vnode.read_at(offset, buf)?;
    if got != buf.len() {
        return Err(Errno::Enoexec);
    }
    Ok(())
}

fn perms_from_flags(p_flags: u32) -> RegionPerms {
    let mut perms = RegionPerms::empty();
    if p_flags & 0x4 != 0 {
        perms |= RegionPerms::READ;
    }
    if p_flags & 0x2 != 0 {
        perms |= RegionPerms::WRITE;
    }
    if p_flags & 0x1 != 0 {
        perms |= RegionPerms::EXEC;
    }
    perms
}

/// Load an executable image into `space`. Returns the entry point.
pub fn load_elf(
    vnode: &Arc<dyn Vnode>,
    space: &mut AddressSpace,
    owner: Pid,
) -> KernelResult<VirtAddr> {
    let mut ehdr = [0u8; EHDR_SIZE];
    read_exact_at(vnode, 0, &mut ehdr)?;

    if ehdr[0..4] != ELF_MAGIC {
        return Err(Errno::Enoexec);
    }
    if ehdr[4] != ELFCLASS32 || ehdr[5] != ELFDATA2LSB || ehdr[6] != 1 {
        return Err(Errno::Enoexec);
    }
    if read_u16(&ehdr, 16) != ET_EXEC || read_u16(&ehdr, 18) != EM_MIPS {
        return Err(Errno::Enoexec);
    }

    let entry = read_u32(&ehdr, 24);
    let phoff = read_u32(&ehdr, 28) as u64;
    let phentsize = read_u16(&ehdr, 42) as u64;
    let phnum = read_u16(&ehdr, 44);
    if phentsize < PHDR_SIZE as u64 || phnum == 0 {
        return Err(Errno::Enoexec);
    }

    for i in 0..phnum {
        let mut phdr = [0u8; PHDR_SIZE];
        read_exact_at(vnode, phoff + i as u64 * phentsize, &mut phdr)?;

        if read_u32(&phdr, 0) != PT_LOAD {
            continue;
        }
        let p_offset = read_u32(&phdr, 4) as u64;
        let p_vaddr = VirtAddr::new(read_u32(&phdr, 8));
        let p_filesz = read_u32(&phdr, 16) as usize;
        let p_memsz = read_u32(&phdr, 20) as usize;
        let p_flags = read_u32(&phdr, 24);

        if p_memsz == 0 {
            continue;
        }
        if p_filesz > p_memsz {
            return Err(Errno::Enoexec);
        }

        log::trace!(
            "load_elf: segment at {} filesz {:#x} memsz {:#x}",
            p_vaddr,
            p_filesz,
            p_memsz
        );
        space.define_region(p_vaddr, p_memsz, perms_from_flags(p_flags))?;

        if p_filesz > 0 {
            let mut contents = vec![0u8; p_filesz];
            read_exact_at(vnode, p_offset, &mut contents)?;
            copyout_into(space, owner, p_vaddr, &contents)?;
        }
        // memsz beyond filesz stays reserved; the fault path hands out
        // zeroed frames, which is exactly what bss wants.
    }

    Ok(VirtAddr::new(entry))
}

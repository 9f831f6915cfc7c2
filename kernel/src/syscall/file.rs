//! File system calls
//!
//! open/read/write/lseek/close/dup2/chdir/__getcwd over the current
//! process's descriptor table. Transfers stage through kernel buffers
//! so user pointers are only touched by the copy helpers; the shared
//! handle serializes offset movement.

use alloc::vec;

use crate::arch::mips::VirtAddr;
use crate::error::KernelResult;
use crate::fs::{vfs_chdir, vfs_open, OpenFlags};
use crate::limits::PATH_MAX;
use crate::mm::copyinout::{copyin, copyin_str, copyout};
use crate::proc::current_or_fault;
use crate::proc::file_table::{FileHandle, SeekWhence, FIRST_NON_RESERVED_FD};

pub fn sys_open(path_ptr: VirtAddr, raw_flags: u32) -> KernelResult<u32> {
    let path = copyin_str(path_ptr, PATH_MAX)?;
    let flags = OpenFlags::from_bits(raw_flags)?;
    let proc = current_or_fault()?;

    let vnode = vfs_open(&path, &flags, &proc.cwd())?;
    let handle = FileHandle::create(vnode, flags);
    let fd = proc.files().insert_lowest(FIRST_NON_RESERVED_FD, handle)?;
    Ok(fd as u32)
}

pub fn sys_read(fd: usize, buf_ptr: VirtAddr, len: usize) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    let handle = proc.files().get(fd)?;

    let mut kbuf = vec![0u8; len];
    let n = handle.read(&mut kbuf)?;
    copyout(buf_ptr, &kbuf[..n])?;
    Ok(n as u32)
}

pub fn sys_write(fd: usize, buf_ptr: VirtAddr, len: usize) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    let handle = proc.files().get(fd)?;

    let mut kbuf = vec![0u8; len];
    copyin(buf_ptr, &mut kbuf)?;
    let n = handle.write(&kbuf)?;
    Ok(n as u32)
}

pub fn sys_lseek(fd: usize, pos: i64, raw_whence: u32) -> KernelResult<u64> {
    let proc = current_or_fault()?;
    let handle = proc.files().get(fd)?;
    let whence = SeekWhence::from_raw(raw_whence)?;
    handle.seek(pos, whence)
}

pub fn sys_close(fd: usize) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    proc.files().close(fd)?;
    Ok(0)
}

pub fn sys_dup2(old_fd: usize, new_fd: usize) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    let fd = proc.files().dup2(old_fd, new_fd)?;
    Ok(fd as u32)
}

pub fn sys_chdir(path_ptr: VirtAddr) -> KernelResult<u32> {
    let path = copyin_str(path_ptr, PATH_MAX)?;
    let proc = current_or_fault()?;
    let new_cwd = vfs_chdir(&path, &proc.cwd())?;
    proc.set_cwd(new_cwd);
    Ok(0)
}

pub fn sys_getcwd(buf_ptr: VirtAddr, len: usize) -> KernelResult<u32> {
    let proc = current_or_fault()?;
    let cwd = proc.cwd();
    let bytes = cwd.as_bytes();
    let n = bytes.len().min(len);
    copyout(buf_ptr, &bytes[..n])?;
    Ok(n as u32)
}

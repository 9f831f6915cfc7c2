//! Process system calls
//!
//! fork, execv, waitpid, _exit, getpid. These are the calls that cross
//! the address-space, file-table, and process-table boundaries in one
//! operation, so the locking discipline matters most here: pid locks
//! are taken parent before child, `reserve_pid` skips the caller, and
//! waitpid never holds its own lock while sleeping on the target's.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::arch::mips::VirtAddr;
use crate::arch::trapframe::{enter_new_process, Trapframe};
use crate::error::{Errno, KernelResult};
use crate::fs::{vfs_open, OpenFlags};
use crate::limits::NAME_MAX;
use crate::mm::copyinout::{copy_in_str_array, copy_out_argv, copyin_str, copyout};
use crate::mm::AddressSpace;
use crate::proc::loader::load_elf;
use crate::proc::table::proc_table;
use crate::proc::{self, current_or_fault, Pid, Process};
use crate::sched;

pub fn sys_getpid() -> KernelResult<u32> {
    Ok(current_or_fault()?.pid.raw())
}

/// Fork the current process.
///
/// The child gets a full copy of the address space, a file table whose
/// slots alias the parent's handles, the parent's working directory,
/// and a heap copy of the parent's trapframe; its first run fixes the
/// frame up so the syscall returns 0 there. The parent's pid lock is
/// held across the whole operation so the child registration and the
/// address-space snapshot are atomic with respect to other forks.
pub fn sys_fork(tf: &Trapframe) -> KernelResult<u32> {
    let parent = current_or_fault()?;
    let parent_pid = parent.pid;
    let table = proc_table();

    let mut pguard = table.lock(parent_pid);
    let Some(child_pid) = table.reserve_pid(&mut pguard, parent_pid) else {
        return Err(Errno::Enproc);
    };

    // Snapshot the address space; undo the reservation if the copy
    // cannot complete.
    let child_space = {
        let guard = parent.addrspace();
        let Some(space) = guard.as_ref() else {
            drop(guard);
            table.unreserve_pid(&mut pguard, child_pid);
            return Err(Errno::Efault);
        };
        match space.copy(child_pid) {
            Ok(space) => space,
            Err(e) => {
                drop(guard);
                table.unreserve_pid(&mut pguard, child_pid);
                return Err(e);
            }
        }
    };

    let child = Process::create(&parent.name, child_pid);
    child.set_addrspace(Some(child_space));
    *child.files() = parent.files().copy_for_fork();
    child.set_cwd(parent.cwd());
    proc::register(child);

    // The child re-executes from the parent's saved registers; its
    // first run rewrites the return value and pc.
    let child_tf = Box::new(tf.clone());
    sched::spawn_user_thread(child_pid, child_tf);

    drop(pguard);
    log::trace!("fork: pid {} -> child {}", parent_pid, child_pid);
    Ok(child_pid.raw())
}

/// Replace the current process image.
///
/// Everything up to the address-space swap is recoverable: the path
/// and argv are copied in, the executable is loaded, and the argument
/// block is laid out, all against a detached address space. Only then
/// does the old image go away; from that point a failure would be a
/// kernel bug, and the entry state is already committed to the frame.
pub fn sys_execv(tf: &mut Trapframe, path_ptr: VirtAddr, argv_ptr: VirtAddr) -> KernelResult<()> {
    let proc = current_or_fault()?;
    let pid = proc.pid;

    let path = copyin_str(path_ptr, NAME_MAX)?;
    if path.is_empty() {
        return Err(Errno::Eisdir);
    }
    let argv = copy_in_str_array(argv_ptr)?;

    let mut new_space = AddressSpace::new();
    let vnode = vfs_open(&path, &OpenFlags::read_only(), &proc.cwd())?;
    let entry = load_elf(&vnode, &mut new_space, pid)?;

    let sp = new_space.define_stack();
    let (sp, argv_uaddr) = copy_out_argv(&mut new_space, pid, &argv, sp)?;

    // Point of no return.
    let old_space = proc.set_addrspace(Some(new_space));
    drop(old_space);
    proc.addrspace()
        .as_ref()
        .expect("image installed above")
        .activate();

    enter_new_process(
        argv.argc() as u32,
        argv_uaddr.as_u32(),
        0,
        sp.as_u32(),
        entry.as_u32(),
        tf,
    );
    log::trace!("execv: pid {} entering {} at {}", pid, path, entry);
    Ok(())
}

/// Wait for a child to exit and collect its status.
pub fn sys_waitpid(raw_pid: i32, status_ptr: VirtAddr, options: i32) -> KernelResult<u32> {
    if options != 0 {
        return Err(Errno::Einval);
    }
    let current = current_or_fault()?;
    let Some(pid) = u32::try_from(raw_pid).ok().and_then(Pid::new) else {
        return Err(Errno::Esrch);
    };
    let table = proc_table();
    if !table.exists(pid) {
        return Err(Errno::Esrch);
    }

    // Cheap parentage check first, against our own entry. Our own lock
    // is NOT held past this block: the target must be able to take it
    // in its `_exit` while we sleep below.
    {
        let own = table.lock(current.pid);
        let is_child = own.as_ref().map(|e| e.has_child(pid)).unwrap_or(false);
        if !is_child {
            return Err(Errno::Echild);
        }
    }

    let guard = table.lock(pid);
    // Re-check under the target's lock: between the checks above and
    // this acquisition the pid may have been collected and recycled to
    // someone else's child.
    match guard.as_ref() {
        None => return Err(Errno::Esrch),
        Some(entry) if entry.parent() != Some(current.pid) => return Err(Errno::Echild),
        Some(_) => {}
    }

    let status = table.wait_on_pid(pid, guard);

    // The entry is gone; forget the child so its pid can come back as
    // somebody else without confusing a later wait.
    {
        let mut own = table.lock(current.pid);
        if let Some(entry) = own.as_mut() {
            entry.remove_child(pid);
        }
    }

    if status_ptr.as_u32() != 0 {
        copyout(status_ptr, &status.to_le_bytes())?;
    }
    Ok(pid.raw())
}

/// How an exiting process's parent looked when classified under its
/// lock; anything but `Alive` means nobody will ever wait for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentDisposition {
    /// Never had a parent.
    NoParent,
    /// Parent's slot is empty.
    NoEntry,
    /// Parent exists but has already exited.
    HasExited,
    /// Parent's pid was recycled; the entry there no longer lists us.
    PidRecycled,
    /// Parent is alive and may wait for us.
    Alive,
}

/// Terminate the current process.
pub fn sys_exit(code: i32) {
    let current = proc::current().expect("_exit with no current process");
    let pid = current.pid;
    let table = proc_table();

    // The parent field never changes after reservation, so a brief
    // lock is enough to learn who to lock first.
    let parent_pid = table
        .parent_of(pid)
        .expect("exiting process has no table entry");

    // Parent before child, always.
    let mut parent_guard = parent_pid.map(|pp| table.lock(pp));
    let mut own_guard = table.lock(pid);

    // Reap children that exited before us. Their status will never be
    // collected once we are gone, and leaving the entries would leak
    // them for good.
    let children: Vec<Pid> = own_guard
        .as_ref()
        .expect("exiting process has no table entry")
        .children()
        .to_vec();
    for child in children {
        let mut child_guard = table.lock(child);
        let reapable = matches!(
            child_guard.as_ref(),
            Some(entry) if entry.parent() == Some(pid) && entry.has_exited()
        );
        if reapable {
            log::trace!("_exit: pid {} reaping exited child {}", pid, child);
            table.remove(child, &mut child_guard);
        }
    }

    table.exit(pid, &mut own_guard, code);

    let disposition = match (parent_pid, parent_guard.as_mut()) {
        (None, _) => ParentDisposition::NoParent,
        (Some(_), Some(pguard)) => match pguard.as_ref() {
            None => ParentDisposition::NoEntry,
            Some(pentry) if pentry.has_exited() => ParentDisposition::HasExited,
            Some(pentry) if !pentry.has_child(pid) => ParentDisposition::PidRecycled,
            Some(_) => ParentDisposition::Alive,
        },
        (Some(_), None) => unreachable!("parent guard taken when parent_pid is set"),
    };

    if disposition != ParentDisposition::Alive {
        // No one will ever collect the status; take the entry out now.
        log::trace!("_exit: pid {} self-removing (parent {:?})", pid, disposition);
        table.remove(pid, &mut own_guard);
    }

    // Child first, then parent.
    drop(own_guard);
    drop(parent_guard);

    sched::thread_exit_destroy_proc();
}

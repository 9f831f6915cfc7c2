//! Host-side test scaffolding
//!
//! The kernel's globals (RAM, coremap, VFS, process table) are booted
//! once per test process and shared by every test, so tests that touch
//! them run serialized through [`with_kernel`], which also puts the
//! user-visible state back to a clean slate first. Pure-data tests
//! (page table, trapframe, sync) do not need any of this.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::arch::tlb::TLB;
use crate::bootstrap::{bootstrap, BootConfig};
use crate::limits::{PID_MAX, PID_MIN};
use crate::mm::AddressSpace;
use crate::proc::{self, table::proc_table, Pid, Process};
use crate::sched;

/// Boot config for the test machine: 16 MiB of RAM with a small boot
/// image and a small swap file.
pub fn test_boot_config() -> BootConfig {
    BootConfig {
        ram_size: 16 * 1024 * 1024,
        ram_first_free: crate::arch::mips::PhysAddr::new(0x0002_0000),
        page_file_slots: 16,
    }
}

/// Run `f` with the kernel booted and all user state reset, serialized
/// against every other kernel-state test.
pub fn with_kernel<R>(f: impl FnOnce() -> R) -> R {
    static GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    bootstrap(&test_boot_config());
    reset_user_state();
    f()
}

/// Tear down every user process, pending thread, pid entry, and TLB
/// entry left over from an earlier test.
fn reset_user_state() {
    proc::set_current(None);
    sched::clear_queue();

    for pid in proc::live_pids() {
        if pid == Pid::KERNEL {
            continue;
        }
        if let Some(proc) = proc::unregister(pid) {
            proc.files().close_all();
            proc.set_addrspace(None);
        }
    }

    let table = proc_table();
    for raw in PID_MIN..PID_MAX {
        let pid = Pid::new(raw).expect("scan range is valid");
        let mut guard = table.lock(pid);
        *guard = None;
    }
    {
        let mut kguard = table.lock(Pid::KERNEL);
        if let Some(entry) = kguard.as_mut() {
            entry.clear_children();
        }
    }

    if let Some(kernel) = proc::get(Pid::KERNEL) {
        kernel.set_cwd(String::from("/"));
    }

    TLB.flush_all();
}

/// Reserve a pid under the kernel process, build a process around the
/// given address space, register it, and make it current.
pub fn install_test_process(name: &str, space: AddressSpace) -> Arc<Process> {
    let table = proc_table();
    let pid = {
        let mut kguard = table.lock(Pid::KERNEL);
        table
            .reserve_pid(&mut kguard, Pid::KERNEL)
            .expect("pid space exhausted in test")
    };
    let proc = Process::create_runprogram(name, pid).expect("process creation failed in test");
    proc.set_addrspace(Some(space));
    proc::register(proc.clone());
    proc::set_current(Some(proc.clone()));
    proc
}

/// Undo [`install_test_process`]: drop the process, its resources, and
/// its pid reservation.
pub fn retire_test_process(proc: &Arc<Process>) {
    let pid = proc.pid;
    if proc::current().map(|c| c.pid) == Some(pid) {
        proc::set_current(None);
    }
    if let Some(p) = proc::unregister(pid) {
        p.files().close_all();
        p.set_addrspace(None);
    }

    // Parent (kernel) before child.
    let table = proc_table();
    {
        let mut kguard = table.lock(Pid::KERNEL);
        if let Some(entry) = kguard.as_mut() {
            entry.remove_child(pid);
        }
    }
    let mut guard = table.lock(pid);
    *guard = None;
}

/// One loadable segment for [`build_test_elf`].
pub struct TestSegment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    /// Total segment size; anything past `data` is bss.
    pub memsz: usize,
}

/// Assemble a minimal valid ELF32 MIPS executable image.
pub fn build_test_elf(entry: u32, segments: &[TestSegment]) -> Vec<u8> {
    const EHDR_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;

    fn w16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }
    fn w32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    let phoff = EHDR_SIZE;
    let data_start = phoff + segments.len() * PHDR_SIZE;
    let mut image = alloc::vec![0u8; data_start];

    image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT
    w16(&mut image, 16, 2); // ET_EXEC
    w16(&mut image, 18, 8); // EM_MIPS
    w32(&mut image, 20, 1);
    w32(&mut image, 24, entry);
    w32(&mut image, 28, phoff as u32);
    w16(&mut image, 40, EHDR_SIZE as u16);
    w16(&mut image, 42, PHDR_SIZE as u16);
    w16(&mut image, 44, segments.len() as u16);

    let mut file_off = data_start;
    for (i, seg) in segments.iter().enumerate() {
        let base = phoff + i * PHDR_SIZE;
        w32(&mut image, base, 1); // PT_LOAD
        w32(&mut image, base + 4, file_off as u32);
        w32(&mut image, base + 8, seg.vaddr);
        w32(&mut image, base + 12, seg.vaddr);
        w32(&mut image, base + 16, seg.data.len() as u32);
        w32(&mut image, base + 20, seg.memsz.max(seg.data.len()) as u32);
        w32(&mut image, base + 24, 0x7); // rwx
        w32(&mut image, base + 28, crate::arch::mips::PAGE_SIZE as u32);
        file_off += seg.data.len();
    }
    for seg in segments {
        image.extend_from_slice(&seg.data);
    }

    image
}

/// Create an executable at `path` in the VFS from segments.
pub fn install_test_program(path: &str, entry: u32, segments: &[TestSegment]) {
    use crate::fs::{vfs_open, OpenFlags, O_CREAT, O_TRUNC, O_WRONLY};
    let image = build_test_elf(entry, segments);
    let flags =
        OpenFlags::from_bits(O_WRONLY | O_CREAT | O_TRUNC).expect("constant flags are valid");
    let node = vfs_open(path, &flags, "/").expect("cannot create test program");
    node.write_at(0, &image).expect("cannot write test program");
}

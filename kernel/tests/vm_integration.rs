//! VM subsystem integration: sbrk, faults, and file I/O through the
//! syscall dispatcher.

mod common;

use common::*;

use larch_kernel::arch::mips::{VirtAddr, VirtPage, PAGE_SIZE};
use larch_kernel::arch::trapframe::Trapframe;
use larch_kernel::fs::{O_CREAT, O_RDWR};
use larch_kernel::mm::copyinout::{copyin, copyout};
use larch_kernel::mm::{coremap, vm_fault, AddressSpace, FaultKind, PageSlot, RegionPerms};
use larch_kernel::syscall::{syscall, Dispatch, Syscall};
use larch_kernel::test_support::with_kernel;
use larch_kernel::Errno;

const DATA_BASE: u32 = 0x0040_0000;

fn process_with_heap() -> TestProc {
    let mut space = AddressSpace::new();
    space
        .define_region(
            VirtAddr::new(DATA_BASE),
            4 * PAGE_SIZE,
            RegionPerms::READ | RegionPerms::WRITE,
        )
        .expect("define_region should succeed");
    TestProc::install("vm-test", space)
}

#[test]
fn test_sbrk_grow_reserves_and_returns_old_break() {
    with_kernel(|| {
        let proc = process_with_heap();
        let heap_start = proc.0.addrspace().as_ref().unwrap().heap_start();
        assert_eq!(heap_start, VirtAddr::new(DATA_BASE + 4 * PAGE_SIZE as u32));

        // sbrk(0): current break, no change.
        let (d, tf) = do_syscall(Syscall::Sbrk, [0, 0, 0, 0]);
        assert_eq!(expect_ok(d, &tf), heap_start.as_u32());

        // Grow two pages: returns old break, reserves both pages.
        let (d, tf) = do_syscall(Syscall::Sbrk, [2 * PAGE_SIZE as u32, 0, 0, 0]);
        assert_eq!(expect_ok(d, &tf), heap_start.as_u32());
        {
            let guard = proc.0.addrspace();
            let space = guard.as_ref().unwrap();
            assert_eq!(
                space.heap_end().as_u32(),
                heap_start.as_u32() + 2 * PAGE_SIZE as u32
            );
            let first = heap_start.page();
            assert_eq!(space.page_table().read(first), Some(PageSlot::Reserved));
            assert_eq!(
                space.page_table().read(VirtPage(first.index() + 1)),
                Some(PageSlot::Reserved)
            );
        }

        // Touch the first heap page so it gets a frame.
        vm_fault(FaultKind::Write, heap_start).expect("heap fault should be served");

        // Shrink one page: returns the pre-shrink break, removes the
        // top page.
        let (d, tf) = do_syscall(Syscall::Sbrk, [(-(PAGE_SIZE as i32)) as u32, 0, 0, 0]);
        assert_eq!(
            expect_ok(d, &tf),
            heap_start.as_u32() + 2 * PAGE_SIZE as u32
        );
        {
            let guard = proc.0.addrspace();
            let space = guard.as_ref().unwrap();
            let top = VirtPage(heap_start.page().index() + 1);
            assert_eq!(space.page_table().read(top), None);
        }

        // Faulting on the freed page is now a hard fault.
        let freed = VirtAddr::new(heap_start.as_u32() + PAGE_SIZE as u32);
        assert_eq!(vm_fault(FaultKind::Read, freed).unwrap_err(), Errno::Efault);
    });
}

#[test]
fn test_sbrk_shrink_releases_frames() {
    with_kernel(|| {
        let proc = process_with_heap();
        let heap_start = proc.0.addrspace().as_ref().unwrap().heap_start();

        let (d, tf) = do_syscall(Syscall::Sbrk, [PAGE_SIZE as u32, 0, 0, 0]);
        expect_ok(d, &tf);
        vm_fault(FaultKind::Write, heap_start).expect("heap fault should be served");

        let free_before = coremap().pages_free();
        let (d, tf) = do_syscall(Syscall::Sbrk, [(-(PAGE_SIZE as i32)) as u32, 0, 0, 0]);
        expect_ok(d, &tf);
        assert_eq!(
            coremap().pages_free(),
            free_before + 1,
            "shrink did not release the materialized frame"
        );
    });
}

#[test]
fn test_sbrk_error_cases() {
    with_kernel(|| {
        {
            let _proc = process_with_heap();

            // Misaligned.
            let (d, tf) = do_syscall(Syscall::Sbrk, [100, 0, 0, 0]);
            expect_err(d, &tf, Errno::Einval);

            // Below the heap floor.
            let (d, tf) = do_syscall(Syscall::Sbrk, [(-(PAGE_SIZE as i32)) as u32, 0, 0, 0]);
            expect_err(d, &tf, Errno::Einval);
        }

        // Break exactly one page under the stack window: one more page
        // collides with the stack.
        let stack_bottom = AddressSpace::stack_bottom().as_u32();
        let mut space = AddressSpace::new();
        space
            .define_region(
                VirtAddr::new(stack_bottom - 2 * PAGE_SIZE as u32),
                PAGE_SIZE,
                RegionPerms::WRITE,
            )
            .expect("define_region should succeed");
        let proc = TestProc::install("sbrk-edge", space);
        assert_eq!(
            proc.0.addrspace().as_ref().unwrap().heap_end().as_u32(),
            stack_bottom - PAGE_SIZE as u32
        );
        let (d, tf) = do_syscall(Syscall::Sbrk, [PAGE_SIZE as u32, 0, 0, 0]);
        expect_err(d, &tf, Errno::Enomem);
    });
}

#[test]
fn test_open_write_lseek_read_via_dispatcher() {
    with_kernel(|| {
        let _proc = process_with_heap();

        // Stage path and payload in user memory.
        put_user_str(DATA_BASE, "/scratch_vm");
        put_user_str(DATA_BASE + 0x100, "hello syscall");

        let (d, tf) = do_syscall(Syscall::Open, [DATA_BASE, O_RDWR | O_CREAT, 0, 0]);
        let fd = expect_ok(d, &tf);
        assert_eq!(fd, 3, "first free descriptor after the console");

        let (d, tf) = do_syscall(Syscall::Write, [fd, DATA_BASE + 0x100, 13, 0]);
        assert_eq!(expect_ok(d, &tf), 13);

        // lseek(fd, 6, SEEK_SET): offset is the aligned a2/a3 pair,
        // whence lives on the user stack at sp+16.
        let sp = DATA_BASE + 0x2000;
        copyout(VirtAddr::new(sp + 16), &0u32.to_le_bytes()).expect("staging whence");
        let mut tf = Trapframe::new();
        tf.tf_v0 = Syscall::Lseek as u32;
        tf.tf_a0 = fd;
        tf.tf_a2 = 0; // offset high word
        tf.tf_a3 = 6; // offset low word
        tf.tf_sp = sp;
        tf.tf_epc = 0x0040_0000;
        let d = syscall(&mut tf);
        assert_eq!(d, Dispatch::Return);
        assert_eq!(tf.tf_a3, 0, "lseek flagged error {}", tf.tf_v0);
        assert_eq!(tf.tf_v0, 0, "high word of the 64-bit position");
        assert_eq!(tf.tf_v1, 6, "low word of the 64-bit position");

        let (d, tf) = do_syscall(Syscall::Read, [fd, DATA_BASE + 0x200, 7, 0]);
        assert_eq!(expect_ok(d, &tf), 7);
        let mut got = [0u8; 7];
        copyin(VirtAddr::new(DATA_BASE + 0x200), &mut got).expect("reading back payload");
        assert_eq!(&got, b"syscall");

        let (d, tf) = do_syscall(Syscall::Close, [fd, 0, 0, 0]);
        expect_ok(d, &tf);
        let (d, tf) = do_syscall(Syscall::Read, [fd, DATA_BASE + 0x200, 1, 0]);
        expect_err(d, &tf, Errno::Ebadf);

        larch_kernel::fs::vfs_remove("/scratch_vm", "/").unwrap();
    });
}

#[test]
fn test_lseek_on_console_is_espipe() {
    with_kernel(|| {
        let _proc = process_with_heap();
        let sp = DATA_BASE + 0x2000;
        copyout(VirtAddr::new(sp + 16), &0u32.to_le_bytes()).expect("staging whence");
        let mut tf = Trapframe::new();
        tf.tf_v0 = Syscall::Lseek as u32;
        tf.tf_a0 = 1; // stdout
        tf.tf_sp = sp;
        tf.tf_epc = 0x0040_0000;
        let d = syscall(&mut tf);
        assert_eq!(d, Dispatch::Return);
        assert_eq!(tf.tf_a3, 1);
        assert_eq!(tf.tf_v0, Errno::Espipe.code() as u32);
    });
}

#[test]
fn test_open_exhaustion_is_emfile() {
    with_kernel(|| {
        let _proc = process_with_heap();
        put_user_str(DATA_BASE, "/scratch_many");

        let mut opened = 0u32;
        loop {
            let (d, tf) = do_syscall(Syscall::Open, [DATA_BASE, O_RDWR | O_CREAT, 0, 0]);
            assert_eq!(d, Dispatch::Return);
            if tf.tf_a3 == 1 {
                assert_eq!(tf.tf_v0, Errno::Emfile.code() as u32);
                break;
            }
            opened += 1;
            assert!(opened <= larch_kernel::limits::OPEN_MAX as u32);
        }
        assert_eq!(
            opened as usize,
            larch_kernel::limits::OPEN_MAX - 3,
            "every non-reserved descriptor should have been handed out"
        );
        larch_kernel::fs::vfs_remove("/scratch_many", "/").unwrap();
    });
}

#[test]
fn test_chdir_and_getcwd_round_trip() {
    with_kernel(|| {
        let _proc = process_with_heap();
        if larch_kernel::fs::vfs_kind("/tmp_cwd", "/").is_none() {
            larch_kernel::fs::vfs_mkdir("/tmp_cwd", "/").unwrap();
        }

        put_user_str(DATA_BASE, "/tmp_cwd");
        let (d, tf) = do_syscall(Syscall::Chdir, [DATA_BASE, 0, 0, 0]);
        expect_ok(d, &tf);

        let (d, tf) = do_syscall(Syscall::GetCwd, [DATA_BASE + 0x300, 64, 0, 0]);
        let n = expect_ok(d, &tf);
        assert_eq!(n, 8);
        let mut got = vec![0u8; n as usize];
        copyin(VirtAddr::new(DATA_BASE + 0x300), &mut got).unwrap();
        assert_eq!(&got, b"/tmp_cwd");

        // Missing target leaves the cwd alone.
        put_user_str(DATA_BASE, "/nope");
        let (d, tf) = do_syscall(Syscall::Chdir, [DATA_BASE, 0, 0, 0]);
        expect_err(d, &tf, Errno::Enoent);
    });
}

#[test]
fn test_read_bad_pointer_is_efault() {
    with_kernel(|| {
        let _proc = process_with_heap();
        put_user_str(DATA_BASE, "/scratch_fault");
        let (d, tf) = do_syscall(Syscall::Open, [DATA_BASE, O_RDWR | O_CREAT, 0, 0]);
        let fd = expect_ok(d, &tf);
        let (d, tf) = do_syscall(Syscall::Write, [fd, DATA_BASE, 4, 0]);
        expect_ok(d, &tf);

        // Seek back then read into an unmapped buffer.
        let handle = larch_kernel::proc::current()
            .unwrap()
            .files()
            .get(fd as usize)
            .unwrap();
        handle
            .seek(0, larch_kernel::proc::file_table::SeekWhence::Set)
            .unwrap();
        let (d, tf) = do_syscall(Syscall::Read, [fd, 0x0700_0000, 4, 0]);
        expect_err(d, &tf, Errno::Efault);

        larch_kernel::fs::vfs_remove("/scratch_fault", "/").unwrap();
    });
}

#[test]
fn test_dup2_aliases_descriptor() {
    with_kernel(|| {
        let _proc = process_with_heap();
        put_user_str(DATA_BASE, "/scratch_dup");
        put_user_str(DATA_BASE + 0x100, "shared");

        let (d, tf) = do_syscall(Syscall::Open, [DATA_BASE, O_RDWR | O_CREAT, 0, 0]);
        let fd = expect_ok(d, &tf);

        let (d, tf) = do_syscall(Syscall::Dup2, [fd, 10, 0, 0]);
        assert_eq!(expect_ok(d, &tf), 10);

        // Self-dup verifies and returns the descriptor untouched.
        let (d, tf) = do_syscall(Syscall::Dup2, [fd, fd, 0, 0]);
        assert_eq!(expect_ok(d, &tf), fd);

        // Write through the alias, then read through the original:
        // one shared offset.
        let (d, tf) = do_syscall(Syscall::Write, [10, DATA_BASE + 0x100, 6, 0]);
        assert_eq!(expect_ok(d, &tf), 6);
        let (d, tf) = do_syscall(Syscall::Close, [10, 0, 0, 0]);
        expect_ok(d, &tf);

        let handle = larch_kernel::proc::current().unwrap().files().get(fd as usize).unwrap();
        assert_eq!(handle.offset(), 6);
        assert_eq!(handle.refcount(), 1);

        let (d, tf) = do_syscall(Syscall::Close, [fd, 0, 0, 0]);
        expect_ok(d, &tf);
        larch_kernel::fs::vfs_remove("/scratch_dup", "/").unwrap();
    });
}

#[test]
fn test_time_and_reboot() {
    with_kernel(|| {
        let _proc = process_with_heap();

        // __time fills both out-parameters and stays monotonic.
        let (d, tf) = do_syscall(Syscall::Time, [DATA_BASE + 0x40, DATA_BASE + 0x44, 0, 0]);
        expect_ok(d, &tf);
        let first_nsec = get_user_u32(DATA_BASE + 0x44);
        let (d, tf) = do_syscall(Syscall::Time, [DATA_BASE + 0x40, DATA_BASE + 0x44, 0, 0]);
        expect_ok(d, &tf);
        let second_nsec = get_user_u32(DATA_BASE + 0x44);
        let sec = get_user_u32(DATA_BASE + 0x40);
        assert!(second_nsec > first_nsec || sec > 0);

        // Null pointers are simply skipped.
        let (d, tf) = do_syscall(Syscall::Time, [0, 0, 0, 0]);
        expect_ok(d, &tf);

        // reboot validates its code.
        let (d, tf) = do_syscall(Syscall::Reboot, [99, 0, 0, 0]);
        expect_err(d, &tf, Errno::Einval);
        let (d, tf) = do_syscall(Syscall::Reboot, [larch_kernel::syscall::RB_HALT, 0, 0, 0]);
        expect_ok(d, &tf);
        assert_eq!(
            larch_kernel::syscall::reboot_requested(),
            Some(larch_kernel::syscall::RB_HALT)
        );
    });
}

#[test]
fn test_unknown_syscall_is_enosys() {
    with_kernel(|| {
        let _proc = process_with_heap();
        let mut tf = Trapframe::new();
        tf.tf_v0 = 9999;
        tf.tf_epc = 0x0040_0000;
        let d = syscall(&mut tf);
        assert_eq!(d, Dispatch::Return);
        assert_eq!(tf.tf_a3, 1);
        assert_eq!(tf.tf_v0, Errno::Enosys.code() as u32);
        assert_eq!(tf.tf_epc, 0x0040_0004);
    });
}

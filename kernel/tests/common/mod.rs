//! Shared helpers for syscall-level integration tests

#![allow(dead_code)]

use larch_kernel::arch::mips::VirtAddr;
use larch_kernel::arch::trapframe::Trapframe;
use larch_kernel::syscall::{syscall, Dispatch, Syscall};
use larch_kernel::Errno;

/// Issue a syscall through the dispatcher the way the trap path would:
/// call number in v0, arguments in a0..a3.
pub fn do_syscall(call: Syscall, args: [u32; 4]) -> (Dispatch, Trapframe) {
    let mut tf = Trapframe::new();
    tf.tf_v0 = call as u32;
    tf.tf_a0 = args[0];
    tf.tf_a1 = args[1];
    tf.tf_a2 = args[2];
    tf.tf_a3 = args[3];
    tf.tf_epc = 0x0040_0000;
    let dispatch = syscall(&mut tf);
    (dispatch, tf)
}

/// Unwrap a successful ordinary return, checking the error flag and
/// the pc advance.
pub fn expect_ok(dispatch: Dispatch, tf: &Trapframe) -> u32 {
    assert_eq!(dispatch, Dispatch::Return);
    assert_eq!(tf.tf_a3, 0, "syscall flagged error {}", tf.tf_v0);
    assert_eq!(tf.tf_epc, 0x0040_0004, "pc did not advance past the syscall");
    tf.tf_v0
}

/// Unwrap an error return, checking flag, pc advance, and code.
pub fn expect_err(dispatch: Dispatch, tf: &Trapframe, errno: Errno) {
    assert_eq!(dispatch, Dispatch::Return);
    assert_eq!(tf.tf_a3, 1, "syscall did not flag an error");
    assert_eq!(tf.tf_epc, 0x0040_0004, "pc did not advance past the syscall");
    assert_eq!(tf.tf_v0, errno.code() as u32, "wrong error code");
}

/// Place a NUL-terminated string into current-process user memory.
pub fn put_user_str(addr: u32, s: &str) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    larch_kernel::mm::copyinout::copyout(VirtAddr::new(addr), &bytes)
        .expect("staging string into user memory failed");
}

/// Place a NULL-terminated argv pointer array into user memory.
pub fn put_user_argv(addr: u32, ptrs: &[u32]) {
    let mut bytes = Vec::new();
    for p in ptrs {
        bytes.extend_from_slice(&p.to_le_bytes());
    }
    bytes.extend_from_slice(&0u32.to_le_bytes());
    larch_kernel::mm::copyinout::copyout(VirtAddr::new(addr), &bytes)
        .expect("staging argv into user memory failed");
}

/// Read back a u32 from current-process user memory.
pub fn get_user_u32(addr: u32) -> u32 {
    larch_kernel::mm::copyinout::copyin_u32(VirtAddr::new(addr))
        .expect("reading user memory failed")
}

/// A test process that retires itself (pid, registry entry, resources)
/// when dropped, so a failing assertion does not poison later tests.
pub struct TestProc(pub std::sync::Arc<larch_kernel::proc::Process>);

impl TestProc {
    pub fn install(name: &str, space: larch_kernel::mm::AddressSpace) -> Self {
        Self(larch_kernel::test_support::install_test_process(name, space))
    }
}

impl Drop for TestProc {
    fn drop(&mut self) {
        larch_kernel::test_support::retire_test_process(&self.0);
    }
}

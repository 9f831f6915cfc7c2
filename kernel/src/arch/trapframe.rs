//! Trapframe and user-mode entry
//!
//! Saved register state at the user/kernel boundary, in the MIPS
//! calling convention: syscall number in `v0`, arguments in `a0..a3`
//! (64-bit values in aligned pairs, extras on the user stack), results
//! in `v0`/`v1`, error flag in `a3`, program counter in `epc`.

use super::tlb::TLB;
use alloc::boxed::Box;

/// Saved register state at the user/kernel boundary.
///
/// Field names follow the MIPS register conventions. The temporaries
/// and callee-saved registers are carried as arrays; the kernel itself
/// only ever interprets the named ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trapframe {
    /// Return value register (and syscall number on entry).
    pub tf_v0: u32,
    /// Second return value register (high/low split for 64-bit results).
    pub tf_v1: u32,
    /// Argument registers.
    pub tf_a0: u32,
    pub tf_a1: u32,
    pub tf_a2: u32,
    pub tf_a3: u32,
    /// Temporaries t0..t9.
    pub tf_t: [u32; 10],
    /// Callee-saved s0..s7.
    pub tf_s: [u32; 8],
    /// Stack pointer.
    pub tf_sp: u32,
    /// Return address.
    pub tf_ra: u32,
    /// Global pointer.
    pub tf_gp: u32,
    /// Program counter at the trap.
    pub tf_epc: u32,
}

impl Trapframe {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Finish bringing a forked child to user mode.
///
/// Takes the heap copy of the parent's trapframe made by `sys_fork`,
/// gives the child its own view of the syscall return (child sees 0,
/// no error, pc past the syscall instruction), and activates the
/// child's address space. The returned frame is what the trap-return
/// path restores.
pub fn enter_forked_process(copy_of_parent_tf: Box<Trapframe>) -> Trapframe {
    let mut child_tf = *copy_of_parent_tf;

    child_tf.tf_v0 = 0; // fork returns 0 in the child
    child_tf.tf_a3 = 0; // no error
    child_tf.tf_epc += 4; // skip the syscall instruction

    TLB.flush_all();

    child_tf
}

/// Write the register state for a fresh program image into `tf`.
///
/// Used by execv past the point of no return: argc/argv in the argument
/// registers, a null environment, the stack pointer at the packed
/// argument block, and the pc at the image entry point. The trap-return
/// path restores this frame directly; there is no normal syscall
/// return.
pub fn enter_new_process(argc: u32, argv: u32, env: u32, sp: u32, entry: u32, tf: &mut Trapframe) {
    *tf = Trapframe::new();
    tf.tf_a0 = argc;
    tf.tf_a1 = argv;
    tf.tf_a2 = env;
    tf.tf_sp = sp;
    tf.tf_epc = entry;
}

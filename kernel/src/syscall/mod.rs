//! System call interface
//!
//! The dispatcher decodes the MIPS syscall convention from a
//! trapframe: call number in v0, arguments in a0..a3 with 64-bit
//! values in aligned register pairs and overflow arguments on the user
//! stack at sp+16. On an ordinary return the result lands in v0 (and
//! v1 for 64-bit results), a3 carries the error flag, and the program
//! counter advances past the syscall instruction. execv and _exit do
//! not return this way: the one enters a fresh program image, the
//! other gives up the CPU for good.

use crate::arch::mips::VirtAddr;
use crate::arch::trapframe::Trapframe;
use crate::error::{Errno, KernelResult};
use crate::mm::copyinout::copyin_u32;

mod file;
mod memory;
mod process;
mod time;

pub use process::ParentDisposition;
pub use time::{reboot_requested, RB_HALT, RB_POWEROFF, RB_REBOOT};

/// System call numbers, as the userland syscall stubs encode them.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    // Process management
    Fork = 0,
    Execv = 1,
    Exit = 2,
    Waitpid = 3,
    Getpid = 4,
    Sbrk = 5,

    // File descriptors
    Open = 10,
    Read = 11,
    Write = 12,
    Lseek = 13,
    Close = 14,
    Dup2 = 15,
    Chdir = 16,
    GetCwd = 17,

    // System
    Reboot = 20,
    Time = 21,
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Fork),
            1 => Ok(Self::Execv),
            2 => Ok(Self::Exit),
            3 => Ok(Self::Waitpid),
            4 => Ok(Self::Getpid),
            5 => Ok(Self::Sbrk),
            10 => Ok(Self::Open),
            11 => Ok(Self::Read),
            12 => Ok(Self::Write),
            13 => Ok(Self::Lseek),
            14 => Ok(Self::Close),
            15 => Ok(Self::Dup2),
            16 => Ok(Self::Chdir),
            17 => Ok(Self::GetCwd),
            20 => Ok(Self::Reboot),
            21 => Ok(Self::Time),
            _ => Err(()),
        }
    }
}

/// What the trap-return path should do after a syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Ordinary return: the frame carries result and error flag, pc
    /// advanced.
    Return,
    /// The frame was replaced with a fresh program image (execv).
    EnterUser,
    /// The process is gone; pick another thread to run.
    Exited,
}

/// A successful syscall's result registers.
enum Ret {
    V32(u32),
    V64(u64),
}

enum Flow {
    Ret(KernelResult<Ret>),
    EnterUser,
    Exited,
}

fn ret32(result: KernelResult<u32>) -> Flow {
    Flow::Ret(result.map(Ret::V32))
}

/// System call dispatcher. `tf` is the frame saved at exception entry;
/// it is updated in place.
pub fn syscall(tf: &mut Trapframe) -> Dispatch {
    let callno = tf.tf_v0;
    let (a0, a1, a2, a3) = (tf.tf_a0, tf.tf_a1, tf.tf_a2, tf.tf_a3);

    let flow = match Syscall::try_from(callno) {
        Ok(Syscall::Fork) => ret32(process::sys_fork(tf)),
        Ok(Syscall::Execv) => match process::sys_execv(tf, VirtAddr::new(a0), VirtAddr::new(a1)) {
            Ok(()) => Flow::EnterUser,
            Err(e) => Flow::Ret(Err(e)),
        },
        Ok(Syscall::Exit) => {
            process::sys_exit(a0 as i32);
            Flow::Exited
        }
        Ok(Syscall::Waitpid) => {
            ret32(process::sys_waitpid(a0 as i32, VirtAddr::new(a1), a2 as i32))
        }
        Ok(Syscall::Getpid) => ret32(process::sys_getpid()),
        Ok(Syscall::Sbrk) => ret32(memory::sys_sbrk(a0 as i32)),

        Ok(Syscall::Open) => ret32(file::sys_open(VirtAddr::new(a0), a1)),
        Ok(Syscall::Read) => {
            ret32(file::sys_read(a0 as usize, VirtAddr::new(a1), a2 as usize))
        }
        Ok(Syscall::Write) => {
            ret32(file::sys_write(a0 as usize, VirtAddr::new(a1), a2 as usize))
        }
        Ok(Syscall::Lseek) => {
            // The 64-bit offset arrives in the aligned pair a2/a3 (a1
            // unused); whence overflowed onto the user stack.
            let pos = (((a2 as u64) << 32) | a3 as u64) as i64;
            let flow = copyin_u32(VirtAddr::new(tf.tf_sp + 16))
                .and_then(|whence| file::sys_lseek(a0 as usize, pos, whence));
            Flow::Ret(flow.map(Ret::V64))
        }
        Ok(Syscall::Close) => ret32(file::sys_close(a0 as usize)),
        Ok(Syscall::Dup2) => ret32(file::sys_dup2(a0 as usize, a1 as usize)),
        Ok(Syscall::Chdir) => ret32(file::sys_chdir(VirtAddr::new(a0))),
        Ok(Syscall::GetCwd) => {
            ret32(file::sys_getcwd(VirtAddr::new(a0), a1 as usize))
        }

        Ok(Syscall::Reboot) => ret32(time::sys_reboot(a0)),
        Ok(Syscall::Time) => {
            ret32(time::sys_time(VirtAddr::new(a0), VirtAddr::new(a1)))
        }

        Err(()) => {
            log::warn!("unknown syscall {}", callno);
            Flow::Ret(Err(Errno::Enosys))
        }
    };

    match flow {
        Flow::EnterUser => Dispatch::EnterUser,
        Flow::Exited => Dispatch::Exited,
        Flow::Ret(result) => {
            match result {
                Ok(Ret::V32(v)) => {
                    tf.tf_v0 = v;
                    tf.tf_a3 = 0;
                }
                Ok(Ret::V64(v)) => {
                    tf.tf_v0 = (v >> 32) as u32;
                    tf.tf_v1 = v as u32;
                    tf.tf_a3 = 0;
                }
                Err(e) => {
                    tf.tf_v0 = e.code() as u32;
                    tf.tf_a3 = 1;
                }
            }
            tf.tf_epc += 4;
            Dispatch::Return
        }
    }
}

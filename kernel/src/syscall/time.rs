//! System housekeeping calls
//!
//! `__time` serves a monotonic kernel clock; `reboot` validates and
//! records the request for the platform loop to act on.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::arch::mips::VirtAddr;
use crate::error::{Errno, KernelResult};
use crate::mm::copyinout::copyout;

/// reboot(2) operation codes.
pub const RB_REBOOT: u32 = 0;
pub const RB_HALT: u32 = 1;
pub const RB_POWEROFF: u32 = 2;

/// Nanoseconds the fake clock advances per reading. The machine model
/// has no timer device; monotonicity is what callers actually rely on.
const CLOCK_STEP_NS: u64 = 1_000_000;

static CLOCK_NS: AtomicU64 = AtomicU64::new(0);

/// Pending reboot code plus one, 0 = none.
static REBOOT_REQUEST: AtomicU32 = AtomicU32::new(0);

pub fn sys_time(sec_ptr: VirtAddr, nsec_ptr: VirtAddr) -> KernelResult<u32> {
    let now = CLOCK_NS.fetch_add(CLOCK_STEP_NS, Ordering::Relaxed);
    let sec = (now / 1_000_000_000) as u32;
    let nsec = (now % 1_000_000_000) as u32;

    if sec_ptr.as_u32() != 0 {
        copyout(sec_ptr, &sec.to_le_bytes())?;
    }
    if nsec_ptr.as_u32() != 0 {
        copyout(nsec_ptr, &nsec.to_le_bytes())?;
    }
    Ok(sec)
}

pub fn sys_reboot(code: u32) -> KernelResult<u32> {
    match code {
        RB_REBOOT | RB_HALT | RB_POWEROFF => {
            log::warn!("reboot requested (code {})", code);
            REBOOT_REQUEST.store(code + 1, Ordering::Release);
            Ok(0)
        }
        _ => Err(Errno::Einval),
    }
}

/// The platform loop polls this after each trap return.
pub fn reboot_requested() -> Option<u32> {
    match REBOOT_REQUEST.load(Ordering::Acquire) {
        0 => None,
        n => Some(n - 1),
    }
}

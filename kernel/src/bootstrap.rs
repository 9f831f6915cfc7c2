//! Kernel bring-up
//!
//! Subsystems initialize exactly once, in a fixed order: RAM, the
//! coremap over it, the VFS (the page file's backing image lives
//! there, so the VFS comes first), the page file, the process table,
//! and finally the kernel's own process. Nothing here is lazy; a
//! subsystem touched before its turn panics.

use spin::Once;

use crate::arch::mips::{PhysAddr, PAGE_SIZE};
use crate::fs::{self, OpenFlags, O_CREAT, O_RDWR};
use crate::mm;
use crate::proc::{self, table::proc_table, Pid, Process};

/// Machine parameters for boot.
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// Total RAM in bytes.
    pub ram_size: usize,
    /// First physical address past the boot image.
    pub ram_first_free: PhysAddr,
    /// Slots to size the page-file image with (0 = no swap).
    pub page_file_slots: usize,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            ram_size: 16 * 1024 * 1024,
            ram_first_free: PhysAddr::new(0x0002_0000),
            page_file_slots: 16,
        }
    }
}

static BOOTED: Once<()> = Once::new();

/// Bring the kernel up. Safe to call more than once; only the first
/// call does anything.
pub fn bootstrap(config: &BootConfig) {
    BOOTED.call_once(|| {
        crate::arch::ram::bootstrap(config.ram_size, config.ram_first_free);
        mm::coremap::bootstrap();
        fs::bootstrap();

        if config.page_file_slots > 0 {
            seed_page_file_image(config.page_file_slots);
        }
        mm::page_file::bootstrap();

        proc_table().init_kernel_entry();
        proc::register(Process::create("kernel", Pid::KERNEL));

        log::info!(
            "boot: {} frames managed, {} free",
            mm::coremap().pages_total(),
            mm::coremap().pages_free()
        );
    });
}

/// Whether `bootstrap` has completed.
pub fn is_booted() -> bool {
    BOOTED.get().is_some()
}

/// Create the swap backing image at its fixed size.
fn seed_page_file_image(slots: usize) {
    let flags = OpenFlags::from_bits(O_RDWR | O_CREAT).expect("constant flags are valid");
    let image = fs::vfs_open("/LHD0.img", &flags, "/").expect("cannot create page-file image");
    let size = slots * PAGE_SIZE;
    image
        .write_at(size as u64 - 1, &[0])
        .expect("cannot size page-file image");
}

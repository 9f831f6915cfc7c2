//! Address map and page geometry for the MIPS-like target
//!
//! 32-bit addresses, 4 KiB pages, user space below `USERSTACK` and the
//! kernel direct map (KSEG0) above it. Page numbers are indices, not
//! addresses; the distinction is enforced with newtypes.

use core::fmt;

/// Size of one page / physical frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// log2(PAGE_SIZE); shift between addresses and page indices.
pub const PAGE_SHIFT: u32 = 12;

/// Top of the user address space; the initial user stack pointer.
pub const USERSTACK: u32 = 0x8000_0000;

/// Pages in the fixed-size user stack window ending at `USERSTACK`.
pub const STACKPAGES: u32 = 18;

/// Base of the kernel direct-map window.
pub const KSEG0_BASE: u32 = 0x8000_0000;

/// Number of entries in the software-managed TLB.
pub const TLB_ENTRIES: usize = 64;

/// A virtual address (user or kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub u32);

/// A physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub u32);

/// A virtual page index (address >> PAGE_SHIFT, 20 significant bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPage(pub u32);

/// A physical page (frame) index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPage(pub u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The page this address falls in.
    pub const fn page(self) -> VirtPage {
        VirtPage(self.0 >> PAGE_SHIFT)
    }

    /// This address rounded down to its page base.
    pub const fn page_base(self) -> VirtAddr {
        VirtAddr(self.0 & !(PAGE_SIZE as u32 - 1))
    }

    /// Byte offset within the page.
    pub const fn page_offset(self) -> usize {
        (self.0 & (PAGE_SIZE as u32 - 1)) as usize
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u32 == 0
    }

    /// Does this address lie in the user half of the address space?
    pub const fn is_user(self) -> bool {
        self.0 < USERSTACK
    }
}

impl PhysAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn page(self) -> PhysPage {
        PhysPage(self.0 >> PAGE_SHIFT)
    }

    /// Translate into the kernel direct-map window.
    pub const fn to_kvaddr(self) -> VirtAddr {
        VirtAddr(self.0.wrapping_add(KSEG0_BASE))
    }
}

impl VirtPage {
    pub const fn base(self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SHIFT)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl PhysPage {
    pub const fn base(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SHIFT)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Translate a direct-map kernel virtual address back to physical.
///
/// Panics if the address is below the window; only KSEG0 addresses are
/// direct-mapped.
pub fn kvaddr_to_paddr(vaddr: VirtAddr) -> PhysAddr {
    assert!(
        vaddr.0 >= KSEG0_BASE,
        "kvaddr {:#x} below the direct-map window",
        vaddr.0
    );
    PhysAddr(vaddr.0 - KSEG0_BASE)
}

/// Pages needed to hold `bytes` bytes.
pub const fn size_to_page_count(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_page_round_trips() {
        let va = VirtAddr::new(0x0040_1234);
        assert_eq!(va.page(), VirtPage(0x401));
        assert_eq!(va.page_base(), VirtAddr(0x0040_1000));
        assert_eq!(va.page_offset(), 0x234);
        assert_eq!(VirtPage(0x401).base(), VirtAddr(0x0040_1000));
    }

    #[test]
    fn test_direct_map_translation() {
        let pa = PhysAddr::new(0x0003_2000);
        let kva = pa.to_kvaddr();
        assert_eq!(kva, VirtAddr(0x8003_2000));
        assert_eq!(kvaddr_to_paddr(kva), pa);
    }

    #[test]
    fn test_size_to_page_count() {
        assert_eq!(size_to_page_count(0), 0);
        assert_eq!(size_to_page_count(1), 1);
        assert_eq!(size_to_page_count(PAGE_SIZE), 1);
        assert_eq!(size_to_page_count(PAGE_SIZE + 1), 2);
    }

    #[test]
    fn test_user_boundary() {
        assert!(VirtAddr(0x7fff_fffc).is_user());
        assert!(!VirtAddr(USERSTACK).is_user());
    }
}

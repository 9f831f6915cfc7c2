//! Software-managed TLB
//!
//! A 64-entry TLB in the r3000 style: each entry pairs an EntryHi word
//! (virtual page and address-space id) with an EntryLo word (physical
//! frame and flag bits). The refill handler writes entries on fault;
//! `flush_all` invalidates everything on address-space switch.

use bitflags::bitflags;
use spin::Mutex;

use super::mips::{PhysAddr, VirtAddr, KSEG0_BASE, PAGE_SIZE, TLB_ENTRIES};
use crate::proc::Pid;

bitflags! {
    /// Flag bits in the EntryLo word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryLoFlags: u32 {
        /// Entry may be used for translation.
        const VALID = 0x0000_0200;
        /// Writes are permitted through this entry.
        const DIRTY = 0x0000_0400;
    }
}

/// Mask of the page-number bits in both entry words.
const PAGE_MASK: u32 = 0xffff_f000;

/// Shift of the address-space id field in EntryHi.
const ASID_SHIFT: u32 = 6;
const ASID_MASK: u32 = 0x0000_0fc0;

/// One TLB entry: raw EntryHi / EntryLo words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: u32,
    pub lo: u32,
}

impl TlbEntry {
    /// The unmatchable entry written into slot `slot` on invalidation.
    /// Distinct per slot so no two entries ever alias.
    pub const fn invalid(slot: usize) -> Self {
        Self {
            hi: KSEG0_BASE + (slot as u32) * PAGE_SIZE as u32,
            lo: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        EntryLoFlags::from_bits_truncate(self.lo).contains(EntryLoFlags::VALID)
    }

    pub fn vaddr(&self) -> VirtAddr {
        VirtAddr::new(self.hi & PAGE_MASK)
    }

    pub fn asid(&self) -> u32 {
        (self.hi & ASID_MASK) >> ASID_SHIFT
    }

    pub fn paddr(&self) -> PhysAddr {
        PhysAddr::new(self.lo & PAGE_MASK)
    }
}

/// Build the EntryHi word for a fault address and owning pid.
///
/// The pid lands in the address-space id field. Nothing relies on the
/// hardware honoring it; `flush_all` on every activate is what keeps
/// stale user entries out.
pub fn make_entryhi(vaddr: VirtAddr, pid: Pid) -> u32 {
    (vaddr.as_u32() & PAGE_MASK) | ((pid.raw() << ASID_SHIFT) & ASID_MASK)
}

/// Build the EntryLo word for a frame with the given flags.
pub fn make_entrylo(paddr: PhysAddr, flags: EntryLoFlags) -> u32 {
    (paddr.as_u32() & PAGE_MASK) | flags.bits()
}

pub struct Tlb {
    entries: Mutex<[TlbEntry; TLB_ENTRIES]>,
}

/// The machine TLB.
pub static TLB: Tlb = Tlb::new();

impl Tlb {
    const fn new() -> Self {
        let mut entries = [TlbEntry::invalid(0); TLB_ENTRIES];
        let mut i = 0;
        while i < TLB_ENTRIES {
            entries[i] = TlbEntry::invalid(i);
            i += 1;
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Read one slot.
    pub fn read(&self, slot: usize) -> TlbEntry {
        self.entries.lock()[slot]
    }

    /// Write one slot.
    pub fn write(&self, slot: usize, hi: u32, lo: u32) {
        self.entries.lock()[slot] = TlbEntry { hi, lo };
    }

    /// Index of the first slot with a clear valid bit.
    pub fn find_invalid_slot(&self) -> Option<usize> {
        let entries = self.entries.lock();
        entries.iter().position(|e| !e.is_valid())
    }

    /// Invalidate every slot. Done on each address-space activation.
    pub fn flush_all(&self) {
        let mut entries = self.entries.lock();
        for (i, entry) in entries.iter_mut().enumerate() {
            *entry = TlbEntry::invalid(i);
        }
    }

    /// Look up the valid entry translating `vaddr`, if any.
    pub fn probe(&self, vaddr: VirtAddr) -> Option<TlbEntry> {
        let target = vaddr.as_u32() & PAGE_MASK;
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.is_valid() && (e.hi & PAGE_MASK) == target)
            .copied()
    }

    /// Number of valid entries (diagnostics and tests).
    pub fn valid_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.is_valid()).count()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tlb_is_all_invalid() {
        let tlb = Tlb::new();
        assert_eq!(tlb.valid_count(), 0);
        assert_eq!(tlb.find_invalid_slot(), Some(0));
    }

    #[test]
    fn test_write_probe_flush() {
        let tlb = Tlb::new();
        let va = VirtAddr::new(0x0040_0000);
        let pa = PhysAddr::new(0x0001_2000);
        let hi = make_entryhi(va, Pid::new(7).unwrap());
        let lo = make_entrylo(pa, EntryLoFlags::VALID | EntryLoFlags::DIRTY);
        tlb.write(3, hi, lo);

        let hit = tlb.probe(VirtAddr::new(0x0040_0abc)).expect("probe should hit");
        assert_eq!(hit.paddr(), pa);
        assert_eq!(hit.asid(), 7);
        assert!(hit.is_valid());
        assert_eq!(tlb.valid_count(), 1);
        assert_eq!(tlb.find_invalid_slot(), Some(0));

        tlb.flush_all();
        assert_eq!(tlb.valid_count(), 0);
        assert!(tlb.probe(va).is_none());
    }

    #[test]
    fn test_invalid_entries_do_not_alias() {
        let a = TlbEntry::invalid(0);
        let b = TlbEntry::invalid(1);
        assert_ne!(a.hi, b.hi);
        assert!(!a.is_valid());
    }
}

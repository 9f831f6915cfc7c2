//! Physical frame allocator (coremap)
//!
//! One metadata entry per usable physical page, covering all RAM past
//! the boot image. At boot the coremap sizes itself, charges the pages
//! its own metadata occupies to the kernel, and marks the rest free.
//! Claims are contiguous first-fit runs; the whole scan-and-mark runs
//! under one spinlock.

use alloc::vec;
use alloc::vec::Vec;
use spin::{Mutex, Once};

use crate::arch::mips::{kvaddr_to_paddr, size_to_page_count, PhysPage, VirtAddr};
use crate::arch::ram::{ram, Ram};
use crate::proc::Pid;

/// Who a claimed frame is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    /// Kernel memory; never evictable.
    Kernel,
    /// A user process's page.
    Proc(Pid),
}

/// Allocation state of one physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Unallocated.
    Free,
    /// Reserved for kernel use.
    Kernel,
    /// Backing a user page of the given process.
    Owned(Pid),
}

impl From<FrameOwner> for FrameState {
    fn from(owner: FrameOwner) -> Self {
        match owner {
            FrameOwner::Kernel => FrameState::Kernel,
            FrameOwner::Proc(pid) => FrameState::Owned(pid),
        }
    }
}

pub struct CoreMap {
    /// One entry per managed frame; index 0 is `first_page`.
    entries: Mutex<Vec<FrameState>>,
    first_page: PhysPage,
    /// Pages the metadata array itself occupies (charged to the kernel).
    metadata_pages: usize,
}

static COREMAP: Once<CoreMap> = Once::new();

impl CoreMap {
    /// Build the coremap for a RAM instance.
    ///
    /// There is no allocator to stand on at this point in boot, so the
    /// map accounts for itself: the first `metadata_pages` frames hold
    /// the entry array and are marked kernel-owned before anything can
    /// claim them.
    pub fn bootstrap(ram: &Ram) -> Self {
        let num_pages = ram.pages_available();
        let metadata_bytes = num_pages * core::mem::size_of::<FrameState>();
        let metadata_pages = size_to_page_count(metadata_bytes);
        assert!(metadata_pages < num_pages, "coremap metadata would consume all of RAM");

        log::debug!(
            "coremap: {} frames from {}, metadata {} bytes ({} pages)",
            num_pages,
            ram.first_page().index(),
            metadata_bytes,
            metadata_pages
        );

        let mut entries = vec![FrameState::Free; num_pages];
        for entry in entries.iter_mut().take(metadata_pages) {
            *entry = FrameState::Kernel;
        }

        Self {
            entries: Mutex::new(entries),
            first_page: ram.first_page(),
            metadata_pages,
        }
    }

    /// Claim `n` contiguous free frames for `owner`.
    ///
    /// First fit, lowest index wins. Returns the absolute index of the
    /// first frame, or `None` when no contiguous run exists; callers
    /// map that to ENOMEM.
    pub fn claim(&self, n: usize, owner: FrameOwner) -> Option<PhysPage> {
        assert!(n > 0, "zero-page claim");
        let mut entries = self.entries.lock();

        let total = entries.len();
        if n > total {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..total {
            if entries[i] == FrameState::Free {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
                if run_len == n {
                    for entry in entries.iter_mut().skip(run_start).take(n) {
                        *entry = owner.into();
                    }
                    return Some(PhysPage(self.first_page.index() + run_start as u32));
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    /// Return one frame to the free pool. The frame is not zeroed.
    pub fn release(&self, ppage: PhysPage) {
        let idx = self.entry_index(ppage);
        let mut entries = self.entries.lock();
        assert!(
            entries[idx] != FrameState::Free,
            "releasing frame {} which is already free",
            ppage.index()
        );
        entries[idx] = FrameState::Free;
    }

    /// Allocation state of a frame.
    pub fn state_of(&self, ppage: PhysPage) -> FrameState {
        let idx = self.entry_index(ppage);
        self.entries.lock()[idx]
    }

    /// Allocate kernel pages and hand back a direct-map virtual address.
    pub fn alloc_kpages(&self, n: usize) -> Option<VirtAddr> {
        let ppage = self.claim(n, FrameOwner::Kernel)?;
        Some(ppage.base().to_kvaddr())
    }

    /// Free a kernel page previously returned by `alloc_kpages`.
    pub fn free_kpages(&self, kvaddr: VirtAddr) {
        let ppage = kvaddr_to_paddr(kvaddr).page();
        self.release(ppage);
    }

    /// Number of free frames.
    pub fn pages_free(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| **e == FrameState::Free)
            .count()
    }

    /// Number of frames in the managed range.
    pub fn pages_total(&self) -> usize {
        self.entries.lock().len()
    }

    /// Pages charged to the metadata array at bootstrap.
    pub fn metadata_pages(&self) -> usize {
        self.metadata_pages
    }

    /// First managed frame.
    pub fn first_page(&self) -> PhysPage {
        self.first_page
    }

    fn entry_index(&self, ppage: PhysPage) -> usize {
        let total = self.entries.lock().len();
        let first = self.first_page.index();
        assert!(
            ppage.index() >= first && ((ppage.index() - first) as usize) < total,
            "frame {} outside the coremap",
            ppage.index()
        );
        (ppage.index() - first) as usize
    }
}

/// Build the global coremap over the booted RAM. Called once, right
/// after RAM bringup.
pub fn bootstrap() {
    COREMAP.call_once(|| CoreMap::bootstrap(ram()));
}

/// The global frame allocator. Panics before `bootstrap`.
pub fn coremap() -> &'static CoreMap {
    COREMAP.get().expect("coremap accessed before bootstrap")
}

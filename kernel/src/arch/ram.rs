//! Physical memory
//!
//! Owns the machine's RAM from the first free address (everything below
//! it belongs to the boot image) to the end of memory, and provides the
//! KSEG0-style direct-map window the kernel uses to touch frame
//! contents: zeroing, frame-to-frame copies, and byte transfers in and
//! out of frames.
//!
//! Frame *ownership* lives in the coremap; this module only moves
//! bytes. All direct-map accesses funnel through one lock so raw frame
//! writes never race.

use core::cell::UnsafeCell;

use alloc::boxed::Box;
use alloc::vec;
use spin::{Mutex, Once};

use super::mips::{PhysAddr, PhysPage, PAGE_SIZE};

pub struct Ram {
    /// Backing store for the frames in `[first_page, last_page)`.
    storage: UnsafeCell<Box<[u8]>>,
    /// Serializes every direct-map access to `storage`.
    window: Mutex<()>,
    first_free: PhysAddr,
    end: PhysAddr,
}

// SAFETY: The raw storage is only touched through the accessor methods
// below, each of which holds `window` for the duration of the access,
// so no two threads dereference the buffer concurrently.
unsafe impl Sync for Ram {}

static RAM: Once<Ram> = Once::new();

impl Ram {
    /// First physical address not occupied by the boot image.
    pub fn first_free(&self) -> PhysAddr {
        self.first_free
    }

    /// One past the last physical address.
    pub fn end(&self) -> PhysAddr {
        self.end
    }

    /// First frame available to the VM system.
    pub fn first_page(&self) -> PhysPage {
        self.first_free.page()
    }

    /// One past the last available frame.
    pub fn last_page(&self) -> PhysPage {
        self.end.page()
    }

    /// Number of hardware pages available to the VM system.
    pub fn pages_available(&self) -> usize {
        (self.last_page().index() - self.first_page().index()) as usize
    }

    fn frame_ptr(&self, ppage: PhysPage) -> *mut u8 {
        assert!(
            ppage >= self.first_page() && ppage < self.last_page(),
            "frame {} outside managed RAM [{}, {})",
            ppage.index(),
            self.first_page().index(),
            self.last_page().index()
        );
        let offset = (ppage.index() - self.first_page().index()) as usize * PAGE_SIZE;
        // SAFETY: `storage` is never reallocated after bootstrap and the
        // offset was bounds-checked against the managed frame range above.
        unsafe { (*self.storage.get()).as_mut_ptr().add(offset) }
    }

    /// Fill a frame with zero bytes.
    pub fn zero_frame(&self, ppage: PhysPage) {
        let _window = self.window.lock();
        let dst = self.frame_ptr(ppage);
        // SAFETY: `dst` addresses one full in-bounds frame and the window
        // lock excludes concurrent access.
        unsafe { core::ptr::write_bytes(dst, 0, PAGE_SIZE) };
    }

    /// Copy a whole frame through the direct-map window.
    pub fn copy_frame(&self, src: PhysPage, dst: PhysPage) {
        assert_ne!(src, dst, "frame copied onto itself");
        let _window = self.window.lock();
        let src_ptr = self.frame_ptr(src);
        let dst_ptr = self.frame_ptr(dst);
        // SAFETY: Both pointers address full in-bounds frames, distinct
        // frames never overlap, and the window lock excludes concurrent
        // access.
        unsafe { core::ptr::copy_nonoverlapping(src_ptr, dst_ptr, PAGE_SIZE) };
    }

    /// Copy bytes into a frame at the given intra-frame offset.
    pub fn write_into(&self, ppage: PhysPage, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= PAGE_SIZE,
            "write of {} bytes at offset {} spills out of the frame",
            bytes.len(),
            offset
        );
        let _window = self.window.lock();
        let dst = self.frame_ptr(ppage);
        // SAFETY: The destination range was checked to lie inside one
        // in-bounds frame; `bytes` is a kernel slice disjoint from RAM
        // storage; the window lock excludes concurrent access.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.add(offset), bytes.len()) };
    }

    /// Copy bytes out of a frame at the given intra-frame offset.
    pub fn read_from(&self, ppage: PhysPage, offset: usize, bytes: &mut [u8]) {
        assert!(
            offset + bytes.len() <= PAGE_SIZE,
            "read of {} bytes at offset {} spills out of the frame",
            bytes.len(),
            offset
        );
        let _window = self.window.lock();
        let src = self.frame_ptr(ppage);
        // SAFETY: The source range was checked to lie inside one
        // in-bounds frame; `bytes` is a kernel slice disjoint from RAM
        // storage; the window lock excludes concurrent access.
        unsafe { core::ptr::copy_nonoverlapping(src.add(offset), bytes.as_mut_ptr(), bytes.len()) };
    }
}

/// Bring up physical memory. Called once, first thing in boot.
///
/// `size` is total machine RAM in bytes; `first_free` is the first
/// address past the boot image. Both must be page-aligned.
pub fn bootstrap(size: usize, first_free: PhysAddr) {
    assert!(size % PAGE_SIZE == 0, "RAM size not page-aligned");
    assert!(
        first_free.as_u32() as usize % PAGE_SIZE == 0,
        "first free address not page-aligned"
    );
    assert!((first_free.as_u32() as usize) < size, "no RAM left past the boot image");

    RAM.call_once(|| {
        let managed = size - first_free.as_u32() as usize;
        log::debug!(
            "ram: {} bytes total, {} managed from {}",
            size,
            managed,
            first_free
        );
        Ram {
            storage: UnsafeCell::new(vec![0u8; managed].into_boxed_slice()),
            window: Mutex::new(()),
            first_free,
            end: PhysAddr::new(size as u32),
        }
    });
}

/// The machine's RAM. Panics before `bootstrap`.
pub fn ram() -> &'static Ram {
    RAM.get().expect("ram accessed before bootstrap")
}

//! Page file (swap backing store)
//!
//! A bitmap of page-size slots over a disk-image vnode. Pages can be
//! parked in a free slot and brought back later; choosing *which*
//! pages to evict, and wiring that into the frame allocator, is left
//! to a future design.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::{Mutex, Once};

use crate::arch::mips::{PhysPage, PAGE_SIZE};
use crate::arch::ram::ram;
use crate::error::{Errno, KernelResult};
use crate::fs::{vfs_open, OpenFlags, Vnode, O_RDWR};

/// Path of the backing disk image.
const PAGE_FILE_PATH: &str = "/LHD0.img";

/// Index of a slot in the page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub u32);

pub struct PageFile {
    backing: Arc<dyn Vnode>,
    /// true = slot holds a page.
    map: Mutex<Vec<bool>>,
}

static PAGE_FILE: Once<PageFile> = Once::new();

impl PageFile {
    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.map.lock().len()
    }

    /// Number of occupied slots.
    pub fn slots_used(&self) -> usize {
        self.map.lock().iter().filter(|b| **b).count()
    }

    /// Park the contents of `src` in the first free slot.
    pub fn write(&self, src: PhysPage) -> KernelResult<SlotId> {
        let slot = {
            let mut map = self.map.lock();
            let Some(slot) = map.iter().position(|b| !*b) else {
                return Err(Errno::Enospc);
            };
            map[slot] = true;
            slot
        };

        let mut buf = vec![0u8; PAGE_SIZE];
        ram().read_from(src, 0, &mut buf);
        match self.backing.write_at((slot * PAGE_SIZE) as u64, &buf) {
            Ok(_) => Ok(SlotId(slot as u32)),
            Err(e) => {
                self.map.lock()[slot] = false;
                Err(e)
            }
        }
    }

    /// Load a parked page into `dst` and free its slot.
    pub fn read_and_free(&self, slot: SlotId, dst: PhysPage) -> KernelResult<()> {
        let index = slot.0 as usize;
        {
            let map = self.map.lock();
            if index >= map.len() || !map[index] {
                return Err(Errno::Einval);
            }
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        let got = self.backing.read_at((index * PAGE_SIZE) as u64, &mut buf)?;
        if got != PAGE_SIZE {
            return Err(Errno::Eio);
        }
        ram().write_into(dst, 0, &buf);

        self.map.lock()[index] = false;
        Ok(())
    }

    /// Free a slot without reading it back.
    pub fn free(&self, slot: SlotId) {
        let index = slot.0 as usize;
        let mut map = self.map.lock();
        assert!(index < map.len(), "page file slot {} out of range", index);
        assert!(map[index], "freeing page file slot {} which is free", index);
        map[index] = false;
    }
}

/// Open the backing image and size the slot map. Called once at boot,
/// after the VFS is up. A missing image is logged and tolerated; the
/// kernel runs without swap.
pub fn bootstrap() {
    let flags = match OpenFlags::from_bits(O_RDWR) {
        Ok(f) => f,
        Err(_) => return,
    };
    let backing = match vfs_open(PAGE_FILE_PATH, &flags, "/") {
        Ok(v) => v,
        Err(e) => {
            log::warn!("page_file: cannot open {}: {}", PAGE_FILE_PATH, e);
            return;
        }
    };
    let size = match backing.stat() {
        Ok(stat) => stat.size as usize,
        Err(e) => {
            log::warn!("page_file: cannot stat {}: {}", PAGE_FILE_PATH, e);
            return;
        }
    };

    let slots = size / PAGE_SIZE;
    log::debug!("page_file: {} slots over {}", slots, PAGE_FILE_PATH);
    PAGE_FILE.call_once(|| PageFile {
        backing,
        map: Mutex::new(vec![false; slots]),
    });
}

/// The page file, if a backing image was found at boot.
pub fn page_file() -> Option<&'static PageFile> {
    PAGE_FILE.get()
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::coremap::{coremap, FrameOwner};
    use crate::test_support::with_kernel;

    #[test]
    fn test_page_round_trip() {
        with_kernel(|| {
            let pf = page_file().expect("test boot provides a page file");
            let src = coremap().claim(1, FrameOwner::Kernel).expect("claim should succeed");
            let dst = coremap().claim(1, FrameOwner::Kernel).expect("claim should succeed");

            ram().write_into(src, 0, b"swapped out");
            let slot = pf.write(src).expect("write should find a slot");
            assert_eq!(pf.slots_used(), 1);

            pf.read_and_free(slot, dst).expect("read back should succeed");
            let mut buf = [0u8; 11];
            ram().read_from(dst, 0, &mut buf);
            assert_eq!(&buf, b"swapped out");
            assert_eq!(pf.slots_used(), 0);

            // The slot is free again; reading it again is an error.
            assert_eq!(pf.read_and_free(slot, dst).unwrap_err(), Errno::Einval);

            coremap().release(src);
            coremap().release(dst);
        });
    }

    #[test]
    fn test_slots_fill_lowest_first_and_free() {
        with_kernel(|| {
            let pf = page_file().expect("test boot provides a page file");
            let frame = coremap().claim(1, FrameOwner::Kernel).expect("claim should succeed");

            let a = pf.write(frame).expect("write should find a slot");
            let b = pf.write(frame).expect("write should find a slot");
            assert_eq!(a, SlotId(0));
            assert_eq!(b, SlotId(1));

            pf.free(a);
            let c = pf.write(frame).expect("write should find a slot");
            assert_eq!(c, SlotId(0));

            pf.free(b);
            pf.free(c);
            assert_eq!(pf.slots_used(), 0);
            coremap().release(frame);
        });
    }

    #[test]
    fn test_exhaustion_is_enospc() {
        with_kernel(|| {
            let pf = page_file().expect("test boot provides a page file");
            let frame = coremap().claim(1, FrameOwner::Kernel).expect("claim should succeed");

            let mut slots = alloc::vec::Vec::new();
            while let Ok(slot) = pf.write(frame) {
                slots.push(slot);
            }
            assert_eq!(slots.len(), pf.slot_count());

            let err = pf.write(frame).unwrap_err();
            assert_eq!(err, Errno::Enospc);

            for slot in slots {
                pf.free(slot);
            }
            coremap().release(frame);
        });
    }
}

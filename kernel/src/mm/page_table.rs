//! Per-address-space page table
//!
//! An open-addressed, linear-probing hash map from virtual page to
//! [`PageSlot`]. Absence means the page is not part of the address
//! space at all; `Reserved` means the address is legal but no frame
//! backs it yet; `Mapped` carries the frame.
//!
//! The table stays between 10% and 70% full, doubling and halving
//! around those bounds with a floor of [`CAPACITY_MIN`]. Removal uses
//! backward shifting so probe chains never break.

use alloc::vec;
use alloc::vec::Vec;

use crate::arch::mips::{PhysPage, VirtPage};

/// Minimum (and initial-default) bucket count.
pub const CAPACITY_MIN: usize = 8;

/// Above this load factor the table doubles.
pub const LOAD_FACTOR_MAX: f32 = 0.7;

/// Below this load factor the table halves.
pub const LOAD_FACTOR_MIN: f32 = 0.1;

const GROWTH_FACTOR: usize = 2;

/// What a virtual page maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    /// Legal address, frame allocated on first touch.
    Reserved,
    /// Fully materialized mapping.
    Mapped(PhysPage),
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    vpage: VirtPage,
    slot: PageSlot,
}

#[derive(Debug)]
pub struct PageTable {
    buckets: Vec<Option<Bucket>>,
    count: usize,
    /// Suppresses recursive resizing while rehashing.
    resize_pending: bool,
}

/// Marsaglia xorshift on `vpage + 1` (zero must not hash to zero).
fn hash(vpage: VirtPage) -> u32 {
    let mut x = vpage.index().wrapping_add(1);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

impl PageTable {
    pub fn new() -> Self {
        Self::with_capacity(CAPACITY_MIN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(CAPACITY_MIN);
        Self {
            buckets: vec![None; capacity],
            count: 0,
            resize_pending: false,
        }
    }

    /// Number of live mappings (not buckets).
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    pub fn load_factor(&self) -> f32 {
        if self.buckets.is_empty() {
            1.0
        } else {
            self.count as f32 / self.buckets.len() as f32
        }
    }

    /// Probe for `vpage`: the bucket holding it, or the empty bucket
    /// where it would be inserted.
    fn find_slot(&self, vpage: VirtPage) -> usize {
        let capacity = self.buckets.len();
        let mut i = hash(vpage) as usize % capacity;
        while let Some(bucket) = &self.buckets[i] {
            if bucket.vpage == vpage {
                break;
            }
            i = (i + 1) % capacity;
        }
        i
    }

    pub fn contains(&self, vpage: VirtPage) -> bool {
        self.buckets[self.find_slot(vpage)].is_some()
    }

    /// Look up a mapping. `None` means the page is not part of the
    /// address space.
    pub fn read(&self, vpage: VirtPage) -> Option<PageSlot> {
        self.buckets[self.find_slot(vpage)].map(|b| b.slot)
    }

    /// Insert or overwrite a mapping.
    pub fn write(&mut self, vpage: VirtPage, slot: PageSlot) {
        let i = self.find_slot(vpage);
        match &mut self.buckets[i] {
            Some(bucket) => {
                bucket.slot = slot;
            }
            empty => {
                *empty = Some(Bucket { vpage, slot });
                self.count += 1;
                if self.load_factor() > LOAD_FACTOR_MAX {
                    self.resize(self.buckets.len() * GROWTH_FACTOR);
                }
            }
        }
    }

    /// Remove a mapping; a miss is a no-op.
    ///
    /// Backward-shift deletion: every bucket after the hole that could
    /// only be reached through it is moved back so later probes still
    /// terminate correctly.
    pub fn remove(&mut self, vpage: VirtPage) {
        let capacity = self.buckets.len();
        let mut i = self.find_slot(vpage);
        if self.buckets[i].is_none() {
            return;
        }
        self.count -= 1;

        let mut j = i;
        'outer: loop {
            self.buckets[i] = None;
            loop {
                j = (j + 1) % capacity;
                let Some(bucket) = self.buckets[j] else {
                    break 'outer;
                };
                let k = hash(bucket.vpage) as usize % capacity;
                // If the element's home slot lies in (i, j] it is still
                // reachable; leave it and keep scanning.
                let reachable = if i <= j {
                    i < k && k <= j
                } else {
                    i < k || k <= j
                };
                if !reachable {
                    self.buckets[i] = Some(bucket);
                    i = j;
                    continue 'outer;
                }
            }
        }

        if self.load_factor() < LOAD_FACTOR_MIN {
            self.resize(self.buckets.len() / GROWTH_FACTOR);
        }
    }

    /// Rehash into `capacity` buckets (clamped to the floor). Re-entry
    /// from the writes performed while rehashing is suppressed.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(CAPACITY_MIN);
        assert!(capacity > self.count, "resize below live mapping count");

        if capacity == self.buckets.len() || self.resize_pending {
            return;
        }
        self.resize_pending = true;

        let old_buckets = core::mem::replace(&mut self.buckets, vec![None; capacity]);
        let old_count = self.count;
        self.count = 0;

        for bucket in old_buckets.into_iter().flatten() {
            self.write(bucket.vpage, bucket.slot);
        }
        assert_eq!(self.count, old_count, "mappings lost in rehash");

        self.resize_pending = false;
    }

    /// Iterate over live mappings in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = (VirtPage, PageSlot)> + '_ {
        self.buckets.iter().flatten().map(|b| (b.vpage, b.slot))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn vp(n: u32) -> VirtPage {
        VirtPage(n)
    }

    fn mapped(n: u32) -> PageSlot {
        PageSlot::Mapped(PhysPage(n))
    }

    #[test]
    fn test_write_then_read() {
        let mut pt = PageTable::new();
        pt.write(vp(7), mapped(42));
        pt.write(vp(8), PageSlot::Reserved);
        assert_eq!(pt.read(vp(7)), Some(mapped(42)));
        assert_eq!(pt.read(vp(8)), Some(PageSlot::Reserved));
        assert_eq!(pt.read(vp(9)), None);
        assert_eq!(pt.len(), 2);
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let mut pt = PageTable::new();
        pt.write(vp(7), PageSlot::Reserved);
        pt.write(vp(7), mapped(1));
        assert_eq!(pt.len(), 1);
        assert_eq!(pt.read(vp(7)), Some(mapped(1)));
    }

    #[test]
    fn test_remove_clears_membership() {
        let mut pt = PageTable::new();
        pt.write(vp(3), mapped(30));
        pt.remove(vp(3));
        assert!(!pt.contains(vp(3)));
        assert_eq!(pt.len(), 0);
        // Removing a missing key is a no-op.
        pt.remove(vp(3));
        assert_eq!(pt.len(), 0);
    }

    #[test]
    fn test_growth_and_shrink_bounds() {
        let mut pt = PageTable::new();
        for i in 0..200 {
            pt.write(vp(i), mapped(1000 + i));
            assert!(pt.load_factor() <= LOAD_FACTOR_MAX + f32::EPSILON);
        }
        assert_eq!(pt.len(), 200);
        for i in 0..200 {
            pt.remove(vp(i));
            if !pt.is_empty() {
                assert!(pt.load_factor() >= LOAD_FACTOR_MIN - f32::EPSILON || pt.capacity() == CAPACITY_MIN);
            }
        }
        assert_eq!(pt.capacity(), CAPACITY_MIN);
    }

    #[test]
    fn test_resize_preserves_mappings() {
        let mut pt = PageTable::new();
        for i in 0..50 {
            pt.write(vp(i * 3), mapped(i));
        }
        pt.resize(256);
        for i in 0..50 {
            assert_eq!(pt.read(vp(i * 3)), Some(mapped(i)));
        }
        assert_eq!(pt.len(), 50);
    }

    #[test]
    fn test_probe_chains_survive_removal() {
        // Force collisions by filling a small table without letting it
        // grow past its floor, then remove from the middle of chains.
        let mut pt = PageTable::with_capacity(64);
        let keys: Vec<u32> = (0..40).map(|i| i * 7 + 1).collect();
        for (i, &k) in keys.iter().enumerate() {
            pt.write(vp(k), mapped(i as u32));
        }
        for &k in keys.iter().step_by(3) {
            pt.remove(vp(k));
        }
        for (i, &k) in keys.iter().enumerate() {
            if keys.iter().step_by(3).any(|&r| r == k) {
                assert!(!pt.contains(vp(k)));
            } else {
                assert_eq!(pt.read(vp(k)), Some(mapped(i as u32)), "lost vpage {}", k);
            }
        }
    }

    #[test]
    fn test_churn_scenario() {
        // Insert 1..=100, remove the odd vpages, reinsert them with new
        // frames; spot-check final mappings, count, and load factor.
        let mut pt = PageTable::new();
        for v in 1..=100u32 {
            pt.write(vp(v), mapped(1000 + v));
        }
        for v in (1..=100u32).filter(|v| v % 2 == 1) {
            pt.remove(vp(v));
        }
        assert_eq!(pt.len(), 50);
        for (i, v) in (1..=100u32).filter(|v| v % 2 == 1).enumerate() {
            pt.write(vp(v), mapped(2001 + i as u32));
        }

        assert_eq!(pt.read(vp(3)), Some(mapped(2002)));
        assert_eq!(pt.read(vp(4)), Some(mapped(1004)));
        assert!(!pt.contains(vp(999)));
        assert_eq!(pt.len(), 100);
        let lf = pt.load_factor();
        assert!((LOAD_FACTOR_MIN..=LOAD_FACTOR_MAX).contains(&lf), "load factor {}", lf);
    }
}

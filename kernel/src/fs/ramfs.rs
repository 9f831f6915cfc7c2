//! In-memory filesystem nodes

use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{Errno, KernelResult};
use crate::fs::{NodeKind, Stat, Vnode};

/// A regular file backed by a growable byte vector.
pub struct RamFileNode {
    data: RwLock<Vec<u8>>,
}

impl RamFileNode {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Vec::new()),
        }
    }

    /// A file pre-sized to `size` zero bytes (disk images).
    pub fn with_size(size: usize) -> Self {
        Self {
            data: RwLock::new(alloc::vec![0u8; size]),
        }
    }

    pub fn truncate(&self) {
        self.data.write().clear();
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for RamFileNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Vnode for RamFileNode {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
        let data = self.data.read();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> KernelResult<usize> {
        let mut data = self.data.write();
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat {
            size: self.data.read().len() as u64,
            kind: NodeKind::File,
        })
    }
}

/// A directory. Carries no state of its own; the path registry holds
/// the structure. Byte I/O on a directory is an error.
pub struct DirNode;

impl Vnode for DirNode {
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(Errno::Eisdir)
    }

    fn write_at(&self, _offset: u64, _buf: &[u8]) -> KernelResult<usize> {
        Err(Errno::Eisdir)
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat {
            size: 0,
            kind: NodeKind::Dir,
        })
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_write_extends_with_zeros() {
        let f = RamFileNode::new();
        f.write_at(4, b"xy").unwrap();
        assert_eq!(f.len(), 6);
        let mut buf = [0xffu8; 6];
        assert_eq!(f.read_at(0, &mut buf).unwrap(), 6);
        assert_eq!(&buf, &[0, 0, 0, 0, b'x', b'y']);
    }

    #[test]
    fn test_read_past_end_is_empty() {
        let f = RamFileNode::new();
        f.write_at(0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(3, &mut buf).unwrap(), 0);
        assert_eq!(f.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_presized_file() {
        let f = RamFileNode::with_size(1024);
        assert_eq!(f.stat().unwrap().size, 1024);
    }

    #[test]
    fn test_dir_rejects_io() {
        let d = DirNode;
        assert_eq!(d.read_at(0, &mut [0u8; 1]).unwrap_err(), Errno::Eisdir);
        assert_eq!(d.write_at(0, &[0u8; 1]).unwrap_err(), Errno::Eisdir);
        assert_eq!(d.stat().unwrap().kind, NodeKind::Dir);
    }
}

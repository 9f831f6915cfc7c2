//! Per-process file descriptor table
//!
//! Each descriptor slot holds a shared reference to an open-file
//! handle. Handles are shared across descriptors of one process (dup2)
//! and across processes (fork); an explicit refcount tracks descriptor
//! references and the handle's seek offset is retired with the last
//! one. The handle's mutex serializes offset updates, so concurrent
//! reads and writes through sharing descriptors interleave at whole-
//! operation granularity.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{Errno, KernelResult};
use crate::fs::{ConsoleNode, OpenFlags, Vnode};
use crate::limits::OPEN_MAX;
use crate::sync::Mutex;

/// Lowest descriptor `open` may assign; 0..2 are the console.
pub const FIRST_NON_RESERVED_FD: usize = 3;

/// Seek origin for lseek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    Set,
    Cur,
    End,
}

impl SeekWhence {
    pub fn from_raw(raw: u32) -> KernelResult<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Cur),
            2 => Ok(Self::End),
            _ => Err(Errno::Einval),
        }
    }
}

/// One open file: vnode, open mode, shared seek offset, and the count
/// of descriptor slots referencing it.
pub struct FileHandle {
    vnode: Arc<dyn Vnode>,
    flags: OpenFlags,
    offset: Mutex<u64>,
    refcount: AtomicUsize,
}

impl FileHandle {
    pub fn create(vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Arc<Self> {
        Arc::new(Self {
            vnode,
            flags,
            offset: Mutex::new(0),
            refcount: AtomicUsize::new(1),
        })
    }

    pub fn vnode(&self) -> &Arc<dyn Vnode> {
        &self.vnode
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; returns the remaining count. At zero the
    /// vnode reference is the last thing keeping the file open, and it
    /// goes when the final `Arc` does.
    pub fn decref(&self) -> usize {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "file handle refcount underflow");
        prev - 1
    }

    pub fn offset(&self) -> u64 {
        *self.offset.lock()
    }

    /// Read at the shared offset, advancing it by the bytes read.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if !self.flags.read {
            return Err(Errno::Ebadf);
        }
        let mut offset = self.offset.lock();
        let n = self.vnode.read_at(*offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    /// Write at the shared offset (or the end, for append), advancing
    /// it by the bytes written.
    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        if !self.flags.write {
            return Err(Errno::Ebadf);
        }
        let mut offset = self.offset.lock();
        if self.flags.append {
            *offset = self.vnode.stat()?.size;
        }
        let n = self.vnode.write_at(*offset, buf)?;
        *offset += n as u64;
        Ok(n)
    }

    /// Reposition the shared offset.
    pub fn seek(&self, pos: i64, whence: SeekWhence) -> KernelResult<u64> {
        if !self.vnode.is_seekable() {
            return Err(Errno::Espipe);
        }
        let mut offset = self.offset.lock();
        let base = match whence {
            SeekWhence::Set => 0i128,
            SeekWhence::Cur => *offset as i128,
            SeekWhence::End => self.vnode.stat()?.size as i128,
        };
        let target = base + pos as i128;
        if target < 0 || target > u64::MAX as i128 {
            return Err(Errno::Einval);
        }
        *offset = target as u64;
        Ok(*offset)
    }
}

/// The descriptor table: OPEN_MAX slots of shared handles.
pub struct FileTable {
    slots: Vec<Option<Arc<FileHandle>>>,
}

impl FileTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(OPEN_MAX);
        slots.resize_with(OPEN_MAX, || None);
        Self { slots }
    }

    /// Wire the console onto descriptors 0..2.
    pub fn attach_console(&mut self) -> KernelResult<()> {
        let console: Arc<dyn Vnode> = Arc::new(ConsoleNode);
        self.slots[0] = Some(FileHandle::create(console.clone(), OpenFlags::read_only()));
        for fd in 1..FIRST_NON_RESERVED_FD {
            self.slots[fd] = Some(FileHandle::create(
                console.clone(),
                OpenFlags::from_bits(crate::fs::O_WRONLY)?,
            ));
        }
        Ok(())
    }

    /// Install a handle at the lowest free descriptor at or above
    /// `from`. EMFILE when every slot is taken.
    pub fn insert_lowest(&mut self, from: usize, handle: Arc<FileHandle>) -> KernelResult<usize> {
        for fd in from..OPEN_MAX {
            if self.slots[fd].is_none() {
                self.slots[fd] = Some(handle);
                return Ok(fd);
            }
        }
        Err(Errno::Emfile)
    }

    /// The handle behind a descriptor.
    pub fn get(&self, fd: usize) -> KernelResult<Arc<FileHandle>> {
        self.slots
            .get(fd)
            .and_then(|slot| slot.clone())
            .ok_or(Errno::Ebadf)
    }

    /// Close a descriptor, retiring the handle with its last reference.
    pub fn close(&mut self, fd: usize) -> KernelResult<()> {
        let slot = self.slots.get_mut(fd).ok_or(Errno::Ebadf)?;
        let handle = slot.take().ok_or(Errno::Ebadf)?;
        handle.decref();
        Ok(())
    }

    /// Alias `new_fd` to `old_fd`'s handle, closing whatever `new_fd`
    /// held. `dup2(fd, fd)` verifies the descriptor and is otherwise a
    /// no-op.
    pub fn dup2(&mut self, old_fd: usize, new_fd: usize) -> KernelResult<usize> {
        if old_fd >= OPEN_MAX || new_fd >= OPEN_MAX {
            return Err(Errno::Ebadf);
        }
        let handle = self.get(old_fd)?;
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        handle.incref();
        if let Some(existing) = self.slots[new_fd].take() {
            existing.decref();
        }
        self.slots[new_fd] = Some(handle);
        Ok(new_fd)
    }

    /// Duplicate the table for a fork: the child's slots alias the
    /// parent's handles, one refcount each.
    pub fn copy_for_fork(&self) -> Self {
        let mut slots = Vec::with_capacity(OPEN_MAX);
        for slot in &self.slots {
            match slot {
                Some(handle) => {
                    handle.incref();
                    slots.push(Some(handle.clone()));
                }
                None => slots.push(None),
            }
        }
        Self { slots }
    }

    /// Drop every descriptor (process teardown).
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                handle.decref();
            }
        }
    }

    /// Number of live descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

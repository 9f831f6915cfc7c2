//! Virtual filesystem boundary
//!
//! The kernel core consumes a small vnode contract: positional reads
//! and writes, stat, and seekability. Behind it sits an in-memory
//! filesystem with a flat registry of absolute paths, plus the console
//! device on `/dev/console`. Paths are resolved against a per-process
//! working directory.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::error::{Errno, KernelResult};
use crate::limits::PATH_MAX;

pub mod console;
pub mod ramfs;

pub use console::ConsoleNode;
pub use ramfs::{DirNode, RamFileNode};

/// What kind of object a vnode is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
    Device,
}

/// Metadata returned by `stat`.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub size: u64,
    pub kind: NodeKind,
}

/// The filesystem object contract the kernel core consumes.
pub trait Vnode: Send + Sync {
    /// Read into `buf` starting at `offset`; returns bytes read (0 at
    /// end of file).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write `buf` starting at `offset`; returns bytes written.
    fn write_at(&self, offset: u64, buf: &[u8]) -> KernelResult<usize>;

    fn stat(&self) -> KernelResult<Stat>;

    /// Whether lseek makes sense on this object.
    fn is_seekable(&self) -> bool {
        true
    }
}

impl core::fmt::Debug for dyn Vnode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("dyn Vnode").finish()
    }
}

// ---------------------------------------------------------------------------
// Open flags
// ---------------------------------------------------------------------------

/// Raw open(2) flag bits, as userland passes them.
pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_ACCMODE: u32 = 3;
pub const O_CREAT: u32 = 4;
pub const O_EXCL: u32 = 8;
pub const O_TRUNC: u32 = 16;
pub const O_APPEND: u32 = 32;

/// Decoded open flags.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            append: false,
            create: false,
            truncate: false,
        }
    }

    /// Decode raw bits; the access mode must be one of the three legal
    /// values.
    pub fn from_bits(bits: u32) -> KernelResult<Self> {
        let access = bits & O_ACCMODE;
        if access == O_ACCMODE {
            return Err(Errno::Einval);
        }
        Ok(Self {
            read: access == O_RDONLY || access == O_RDWR,
            write: access == O_WRONLY || access == O_RDWR,
            append: bits & O_APPEND != 0,
            create: bits & O_CREAT != 0,
            truncate: bits & O_TRUNC != 0,
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

enum VfsObject {
    File(Arc<RamFileNode>),
    Dir(Arc<DirNode>),
    Device(Arc<dyn Vnode>),
}

impl VfsObject {
    fn as_vnode(&self) -> Arc<dyn Vnode> {
        match self {
            VfsObject::File(n) => n.clone(),
            VfsObject::Dir(n) => n.clone(),
            VfsObject::Device(n) => n.clone(),
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            VfsObject::File(_) => NodeKind::File,
            VfsObject::Dir(_) => NodeKind::Dir,
            VfsObject::Device(_) => NodeKind::Device,
        }
    }
}

lazy_static::lazy_static! {
    /// Absolute path -> object. Flat; directory structure is implied by
    /// the path strings, with Dir entries marking valid directories.
    static ref REGISTRY: RwLock<BTreeMap<String, VfsObject>> = RwLock::new(BTreeMap::new());
}

/// Install the root, `/dev`, and the console. Called once at boot.
pub fn bootstrap() {
    let mut reg = REGISTRY.write();
    if reg.contains_key("/") {
        return;
    }
    reg.insert(String::from("/"), VfsObject::Dir(Arc::new(DirNode)));
    reg.insert(String::from("/dev"), VfsObject::Dir(Arc::new(DirNode)));
    reg.insert(
        String::from("/dev/console"),
        VfsObject::Device(Arc::new(ConsoleNode)),
    );
    log::debug!("vfs: ramfs root mounted, console attached");
}

/// Resolve `path` against `cwd` into a normalized absolute path.
///
/// Handles `.`, `..`, and repeated slashes. Rejects empty and oversize
/// paths.
pub fn resolve(cwd: &str, path: &str) -> KernelResult<String> {
    if path.is_empty() {
        return Err(Errno::Enoent);
    }
    if path.len() > PATH_MAX {
        return Err(Errno::Enametoolong);
    }

    let mut parts: Vec<&str> = Vec::new();
    if !path.starts_with('/') {
        for part in cwd.split('/').filter(|p| !p.is_empty()) {
            parts.push(part);
        }
    }
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Ok(String::from("/"));
    }
    let mut abs = String::new();
    for part in parts {
        abs.push('/');
        abs.push_str(part);
    }
    Ok(abs)
}

fn parent_dir(abs: &str) -> &str {
    match abs.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &abs[..i],
    }
}

/// Open a path, honoring O_CREAT and O_TRUNC. Returns the vnode.
pub fn vfs_open(path: &str, flags: &OpenFlags, cwd: &str) -> KernelResult<Arc<dyn Vnode>> {
    let abs = resolve(cwd, path)?;
    let mut reg = REGISTRY.write();

    match reg.get(&abs) {
        Some(VfsObject::Dir(_)) if flags.write => Err(Errno::Eisdir),
        Some(obj @ VfsObject::File(_)) => {
            let vnode = obj.as_vnode();
            if flags.truncate {
                if let VfsObject::File(file) = obj {
                    file.truncate();
                }
            }
            Ok(vnode)
        }
        Some(obj) => Ok(obj.as_vnode()),
        None => {
            if !flags.create {
                return Err(Errno::Enoent);
            }
            match reg.get(parent_dir(&abs)) {
                Some(VfsObject::Dir(_)) => {}
                Some(_) => return Err(Errno::Enotdir),
                None => return Err(Errno::Enoent),
            }
            let node = Arc::new(RamFileNode::new());
            reg.insert(abs, VfsObject::File(node.clone()));
            Ok(node)
        }
    }
}

/// Change directory: validate and return the normalized absolute path.
pub fn vfs_chdir(path: &str, cwd: &str) -> KernelResult<String> {
    let abs = resolve(cwd, path)?;
    let reg = REGISTRY.read();
    match reg.get(&abs) {
        Some(VfsObject::Dir(_)) => Ok(abs),
        Some(_) => Err(Errno::Enotdir),
        None => Err(Errno::Enoent),
    }
}

/// Create a directory.
pub fn vfs_mkdir(path: &str, cwd: &str) -> KernelResult<()> {
    let abs = resolve(cwd, path)?;
    let mut reg = REGISTRY.write();
    if reg.contains_key(&abs) {
        return Err(Errno::Einval);
    }
    match reg.get(parent_dir(&abs)) {
        Some(VfsObject::Dir(_)) => {}
        Some(_) => return Err(Errno::Enotdir),
        None => return Err(Errno::Enoent),
    }
    reg.insert(abs, VfsObject::Dir(Arc::new(DirNode)));
    Ok(())
}

/// Kind of the object at a path, if any (tests and diagnostics).
pub fn vfs_kind(path: &str, cwd: &str) -> Option<NodeKind> {
    let abs = resolve(cwd, path).ok()?;
    REGISTRY.read().get(&abs).map(|o| o.kind())
}

/// Remove a regular file (test cleanup).
pub fn vfs_remove(path: &str, cwd: &str) -> KernelResult<()> {
    let abs = resolve(cwd, path)?;
    let mut reg = REGISTRY.write();
    match reg.get(&abs) {
        Some(VfsObject::File(_)) => {
            reg.remove(&abs);
            Ok(())
        }
        Some(_) => Err(Errno::Eisdir),
        None => Err(Errno::Enoent),
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::test_support::with_kernel;

    #[test]
    fn test_resolve_normalizes() {
        assert_eq!(resolve("/", "a/b").unwrap(), "/a/b");
        assert_eq!(resolve("/a", "b").unwrap(), "/a/b");
        assert_eq!(resolve("/a/b", "../c").unwrap(), "/a/c");
        assert_eq!(resolve("/a", "/x//y/./z").unwrap(), "/x/y/z");
        assert_eq!(resolve("/a/b", "../..").unwrap(), "/");
        assert_eq!(resolve("/", "..").unwrap(), "/");
        assert_eq!(resolve("/", "").unwrap_err(), Errno::Enoent);
    }

    #[test]
    fn test_open_create_read_back() {
        with_kernel(|| {
            let flags = OpenFlags::from_bits(O_WRONLY | O_CREAT).unwrap();
            let node = vfs_open("/scratch_a", &flags, "/").expect("create should succeed");
            node.write_at(0, b"payload").expect("write should succeed");

            let ro = vfs_open("/scratch_a", &OpenFlags::read_only(), "/").expect("open should succeed");
            let mut buf = [0u8; 7];
            assert_eq!(ro.read_at(0, &mut buf).unwrap(), 7);
            assert_eq!(&buf, b"payload");

            vfs_remove("/scratch_a", "/").unwrap();
        });
    }

    #[test]
    fn test_open_missing_without_create_is_enoent() {
        with_kernel(|| {
            let err = vfs_open("/no_such_file", &OpenFlags::read_only(), "/").unwrap_err();
            assert_eq!(err, Errno::Enoent);
        });
    }

    #[test]
    fn test_open_dir_for_write_is_eisdir() {
        with_kernel(|| {
            let flags = OpenFlags::from_bits(O_WRONLY).unwrap();
            assert_eq!(vfs_open("/dev", &flags, "/").unwrap_err(), Errno::Eisdir);
        });
    }

    #[test]
    fn test_chdir_validation() {
        with_kernel(|| {
            assert_eq!(vfs_chdir("/dev", "/").unwrap(), "/dev");
            assert_eq!(vfs_chdir("console", "/dev").unwrap_err(), Errno::Enotdir);
            assert_eq!(vfs_chdir("/missing", "/").unwrap_err(), Errno::Enoent);
        });
    }

    #[test]
    fn test_bad_access_mode_rejected() {
        assert_eq!(OpenFlags::from_bits(O_ACCMODE).unwrap_err(), Errno::Einval);
        assert!(OpenFlags::from_bits(O_RDWR | O_CREAT).is_ok());
    }
}

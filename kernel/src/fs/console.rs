//! Console device
//!
//! Backs file descriptors 0..2 of user processes. Writes are forwarded
//! to the kernel log; reads report end-of-file (there is no input
//! device on this machine model). The console is not seekable.

use crate::error::KernelResult;
use crate::fs::{NodeKind, Stat, Vnode};

pub struct ConsoleNode;

impl Vnode for ConsoleNode {
    fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }

    fn write_at(&self, _offset: u64, buf: &[u8]) -> KernelResult<usize> {
        match core::str::from_utf8(buf) {
            Ok(text) => log::info!(target: "console", "{}", text),
            Err(_) => log::info!(target: "console", "{:02x?}", buf),
        }
        Ok(buf.len())
    }

    fn stat(&self) -> KernelResult<Stat> {
        Ok(Stat {
            size: 0,
            kind: NodeKind::Device,
        })
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_console_contract() {
        let c = ConsoleNode;
        assert!(!c.is_seekable());
        assert_eq!(c.read_at(0, &mut [0u8; 8]).unwrap(), 0);
        assert_eq!(c.write_at(0, b"boot ok\n").unwrap(), 8);
        assert_eq!(c.stat().unwrap().kind, NodeKind::Device);
    }
}

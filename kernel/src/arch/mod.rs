//! Machine layer
//!
//! Everything the rest of the kernel is allowed to know about the
//! hardware: the MIPS-like address map and page geometry, physical RAM
//! and the KSEG0 direct-map window, the software-managed TLB, and the
//! trapframe with its calling conventions.

pub mod mips;
pub mod ram;
pub mod tlb;
pub mod trapframe;

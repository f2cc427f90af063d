//! Register bus abstraction
//!
//! The driver reaches both the FIFO block and the SRIO control block through
//! [`FifoBus`], so the state machines run unchanged against memory-mapped
//! hardware or a scripted bus in tests.

use core::sync::atomic::{compiler_fence, Ordering};

/// Word-granular register access by byte offset from a block base.
pub trait FifoBus: Clone {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);

    fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        self.write(offset, f(self.read(offset)));
    }
}

/// Memory-mapped register block.
#[derive(Clone, Copy)]
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// Creates an accessor for the block at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a mapped register block of at least the accessed
    /// size, aligned to a word boundary, and must stay mapped for the
    /// lifetime of the accessor.
    pub const unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

impl FifoBus for Mmio {
    fn read(&self, offset: usize) -> u32 {
        compiler_fence(Ordering::SeqCst);
        // Safety: in-bounds per the contract of Mmio::new.
        let value = unsafe { self.base.byte_add(offset).read_volatile() };
        compiler_fence(Ordering::SeqCst);
        value
    }

    fn write(&self, offset: usize, value: u32) {
        compiler_fence(Ordering::SeqCst);
        // Safety: in-bounds per the contract of Mmio::new.
        unsafe { self.base.byte_add(offset).write_volatile(value) };
        compiler_fence(Ordering::SeqCst);
    }
}

// Safety: register access is word-atomic and the block is device memory;
// interleaving from multiple contexts cannot tear.
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

//! DMA descriptor pool
//!
//! A fixed arena of frame buffers shared between the stack and the hardware
//! driver. Each buffer is owned by at most one [`Descriptor`] handle at a
//! time; ownership moves between the stack's queues and the driver only by
//! moving the handle, and returns to the pool through [`Pool::free`].
//!
//! The tail of every buffer is painted with a guard pattern on allocation and
//! verified on free, so a hardware write past the frame area is caught at the
//! first recycle of the damaged buffer.

use core::cell::{RefCell, UnsafeCell};
use core::ptr::NonNull;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::frame::RespSig;

/// Usable frame bytes per buffer (header plus payload).
pub const DATA_SIZE: usize = 4096;
pub const GUARD_SIZE: usize = 16;
pub const GUARD_BYTE: u8 = 0xa5;

const BUF_SIZE: usize = DATA_SIZE + GUARD_SIZE;

/// Pending-acknowledgement state of a transmitted descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RespState {
    /// Signature the matching RESPONSE will carry.
    pub sig: RespSig,
    /// Remaining retry ticks before the transfer is reported failed.
    pub ttl: u8,
}

/// Exclusive owner handle of one pool buffer.
///
/// Not clonable; collections pass descriptors around by move only.
#[derive(Debug)]
pub struct Descriptor {
    buf: NonNull<[u8; BUF_SIZE]>,
    index: u8,
    /// Frame length in bytes, header included.
    pub used: u16,
    /// Transfer cursor, maintained by the hardware driver.
    pub offs: u16,
    /// Opaque caller tag, reported back on delivery failure.
    pub info: u32,
    /// Submission order tag assigned by the TX queue.
    pub cookie: u32,
    /// `Some` while an acknowledgement is outstanding.
    pub resp: Option<RespState>,
    /// Optional transmit destination register value.
    pub route: Option<u16>,
}

// Safety: the pointed-to buffer is exclusively owned by this handle until it
// is returned to its pool, and the pool arena is never moved.
unsafe impl Send for Descriptor {}

impl Descriptor {
    /// Full frame area. The guard region is not reachable from safe code.
    pub fn data(&self) -> &[u8] {
        // Safety: exclusive buffer ownership, see the Send impl.
        &(unsafe { self.buf.as_ref() })[..DATA_SIZE]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // Safety: exclusive buffer ownership, see the Send impl.
        &mut (unsafe { self.buf.as_mut() })[..DATA_SIZE]
    }

    /// The valid frame bytes, `..used`.
    pub fn frame(&self) -> &[u8] {
        &self.data()[..self.used as usize]
    }

    pub fn pool_index(&self) -> usize {
        self.index as usize
    }

    fn raw(&self) -> &[u8; BUF_SIZE] {
        // Safety: exclusive buffer ownership, see the Send impl.
        unsafe { self.buf.as_ref() }
    }

    fn raw_mut(&mut self) -> &mut [u8; BUF_SIZE] {
        // Safety: exclusive buffer ownership, see the Send impl.
        unsafe { self.buf.as_mut() }
    }
}

/// Pool access seam, object-safe so holders need not carry the pool's const
/// capacity parameter.
pub trait Pool {
    /// Takes a buffer. The returned descriptor has a zeroed cursor and tags
    /// and a freshly painted guard region.
    fn alloc(&self) -> Option<Descriptor>;

    /// Returns a buffer, verifying the guard first. Corruption is logged and
    /// counted; the buffer is recycled regardless.
    fn free(&self, desc: Descriptor);

    fn free_count(&self) -> usize;

    /// Guard verification failures observed so far.
    fn guard_violations(&self) -> u32;
}

struct PoolState<const N: usize> {
    free: heapless::Vec<u8, N>,
    guard_violations: u32,
}

pub struct DescriptorPool<M: RawMutex, const N: usize> {
    buffers: UnsafeCell<[[u8; BUF_SIZE]; N]>,
    state: Mutex<M, RefCell<PoolState<N>>>,
}

// Safety: buffer slots are reached only through Descriptor handles handed out
// under the state mutex, one handle per slot.
unsafe impl<M: RawMutex + Sync, const N: usize> Sync for DescriptorPool<M, N> {}

impl<M: RawMutex, const N: usize> DescriptorPool<M, N> {
    pub fn new() -> Self {
        assert!(N > 0 && N <= 256);
        let mut free = heapless::Vec::new();
        for index in (0..N as u16).rev() {
            let _ = free.push(index as u8);
        }
        Self {
            buffers: UnsafeCell::new([[0; BUF_SIZE]; N]),
            state: Mutex::new(RefCell::new(PoolState {
                free,
                guard_violations: 0,
            })),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<M: RawMutex, const N: usize> Default for DescriptorPool<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> Pool for DescriptorPool<M, N> {
    fn alloc(&self) -> Option<Descriptor> {
        let index = self.state.lock(|s| s.borrow_mut().free.pop())?;
        // Safety: the index came off the free list, so no other handle
        // aliases this slot.
        let buf = unsafe {
            let arena = self.buffers.get() as *mut [u8; BUF_SIZE];
            NonNull::new_unchecked(arena.add(index as usize))
        };
        let mut desc = Descriptor {
            buf,
            index,
            used: 0,
            offs: 0,
            info: 0,
            cookie: 0,
            resp: None,
            route: None,
        };
        desc.raw_mut()[DATA_SIZE..].fill(GUARD_BYTE);
        Some(desc)
    }

    fn free(&self, desc: Descriptor) {
        let guard = &desc.raw()[DATA_SIZE..];
        let intact = guard.iter().all(|&b| b == GUARD_BYTE);
        if !intact {
            let head = u32::from_le_bytes([guard[0], guard[1], guard[2], guard[3]]);
            error!(
                "pool: guard corrupted on descriptor {} (head {:x})",
                desc.index, head
            );
        }
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if !intact {
                s.guard_violations += 1;
            }
            debug_assert!(!s.free.contains(&desc.index));
            let _ = s.free.push(desc.index);
        });
    }

    fn free_count(&self) -> usize {
        self.state.lock(|s| s.borrow().free.len())
    }

    fn guard_violations(&self) -> u32 {
        self.state.lock(|s| s.borrow().guard_violations)
    }
}

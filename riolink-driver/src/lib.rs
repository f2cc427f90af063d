//! Riolink driver interface
//!
//! The crate provides an interface between an SRIO FIFO device driver and the
//! riolink stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Riolink stack users should
//! depend on the `riolink` crate instead.
//!
//! A `Link` encompasses three channels:
//! * `TxSource` produces descriptors for transmission
//! * `TxDone` consumes transmitted descriptors
//! * `RxSink` consumes received descriptors
//!
//! Unlike other network stack implementations, riolink relies on driver
//! runners to pull and push data. The basic stack structures are channel-like
//! while FIFO drivers need their own tasks to service interrupts, so the
//! inverse structure eliminates intermediate channels and redundant runners.
//!
//! Frame memory is shared through the descriptor pool in [`pool`]: the stack
//! and the driver exchange exclusive buffer handles instead of copying frame
//! bodies, which keeps the buffers usable as DMA targets.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod frame;
pub mod internal;
pub mod link;
pub mod pool;

pub mod time {
    pub use embassy_time::{Duration, Instant};
}

//! AXI-stream FIFO driver adapter for the riolink stack
//!
//! Moves HELLO frames between a `riolink` node and the Xilinx-style
//! AXI4-stream FIFO in front of an SRIO endpoint core.
//!
//! # Features
//!
//! * Interrupt-driven TX and RX with PIO or a pluggable board DMA engine
//! * Chunked reception of frames still arriving (store-and-forward off)
//! * Word-accurate flush of inbound frames when the descriptor pool is empty
//! * Directional FIFO reset and retransmission on faults and DMA timeouts
//! * SRIO link control: loopback modes, link reset, transceiver tuning
//!
//! # Limitations
//!
//! * One frame in flight per direction; the FIFO depth is not pipelined
//! * RX always moves words by PIO; the DMA seam covers the TX body only
//!
//! # Examples
//!
//! ```no_run
//! use riolink_axi::bus::Mmio;
//! use riolink_axi::dma::{NoDma, TransferMode};
//! use riolink_axi::{Config, Driver, Info};
//! # fn example(pool: &'static riolink_driver::pool::DescriptorPool<embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex, 16>, link: riolink_driver::link::Link<'static>) {
//! static INFO: Info = Info::new();
//!
//! // Safety: the FIFO and control blocks live at these addresses.
//! let fifo = unsafe { Mmio::new(0x4340_0000 as *mut u32) };
//! let ctrl = unsafe { Mmio::new(0x4350_0000 as *mut u32) };
//!
//! let driver = Driver::new(
//!     fifo,
//!     ctrl,
//!     pool,
//!     &INFO,
//!     TransferMode::<NoDma>::Pio,
//!     Config::default(),
//! );
//! let (control, tx_runner, rx_runner) = driver.start(link);
//! # }
//! ```
//!
//! Call `INFO.on_interrupt(&fifo)` from the FIFO interrupt handler and run
//! both runners for proper operation.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod bus;
pub mod config;
pub mod dma;
pub mod regs;

mod control;
mod driver;

pub use config::{Config, LoopbackMode};
pub use control::Control;
pub use driver::{DirStats, Driver, Info, RxRunner, TxRunner};

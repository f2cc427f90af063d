//! Riolink SRIO transport stack
//!
//! An async message transport for Serial RapidIO fabrics reached through
//! AXI-stream FIFO hardware. The stack exchanges HELLO-framed SWRITE, STREAM,
//! DOORBELL and MESSAGE traffic with fabric peers, tracks acknowledgements
//! with a TTL retry list, negotiates the local endpoint address by loopback
//! probing, and fans received frames out to filtered subscriber ports.
//!
//! A [`node::Node`] is the central object. `split()` yields:
//! * a [`node::Hub`] for opening [`socket::Port`]s and [`socket::Sender`]s,
//! * a [`node::Link`] a hardware driver (e.g. `riolink-axi`) consumes,
//! * a [`node::Runner`] driving retries and negotiation in the background.
//!
//! Frame memory lives in a shared [`pool::DescriptorPool`]; the stack and the
//! driver pass exclusive buffer handles instead of copying frame bodies.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub use riolink_core as core;
pub use riolink_driver::{frame, link, pool, time};

pub mod dispatch;
pub mod negotiate;
pub mod node;
pub mod socket;

mod retry;

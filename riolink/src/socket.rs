//! Higher-level API handles for the transport
//!
//! A [`Port`] is a filtered inbound endpoint in the shape of a character
//! device: non-blocking reads, async reads and poll-style readiness. A
//! [`Sender`] enqueues outbound transfers. Both are created from a
//! [`Hub`](crate::node::Hub) and are cheap to hold.

use core::future::poll_fn;

use riolink_core::{DeviceAddr, DoorbellRange, Mailbox, MailboxSet, SwriteRange};

use crate::dispatch::{Filter, Inbound};
use crate::node::Hub;

pub use crate::dispatch::RegistrationError;

/// An outbound transfer.
///
/// `ack` requests a RESPONSE from the target; acknowledged transfers are
/// retried by the node until the response arrives or the TTL runs out.
/// STREAM traffic is fire-and-forget by design and offers no ack.
#[derive(Debug, Clone, Copy)]
pub enum Outbound<'a> {
    Swrite {
        dst: DeviceAddr,
        /// 34-bit word-aligned target address.
        addr: u64,
        data: &'a [u8],
        ack: bool,
    },
    Doorbell {
        dst: DeviceAddr,
        info: u16,
        ack: bool,
    },
    Message {
        dst: DeviceAddr,
        mailbox: Mailbox,
        letter: u8,
        data: &'a [u8],
        ack: bool,
    },
    Stream {
        dst: DeviceAddr,
        stream_id: u16,
        cos: u8,
        data: &'a [u8],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// The local address is not bound yet (or negotiation failed).
    AddressUnset,
    /// The TX queue cannot take the transfer right now.
    QueueFull,
    /// The descriptor pool is exhausted.
    NoDescriptor,
    /// Payload exceeds the transfer limit for this frame type.
    TooLong,
    /// SWRITE target address out of range or unaligned.
    BadAddress,
}

/// Transmit handle.
///
/// `send` never blocks; it either enqueues the whole transfer or fails.
/// MESSAGE payloads longer than one fragment are segmented into numbered
/// fragments enqueued as one burst under a single cookie.
pub struct Sender<'a> {
    hub: Hub<'a>,
}

impl<'a> Sender<'a> {
    pub fn new(hub: Hub<'a>) -> Self {
        Self { hub }
    }

    /// Enqueues a transfer. Returns the cookie identifying it in delivery
    /// failure reports.
    pub fn send(&mut self, out: &Outbound<'_>) -> Result<u32, SendError> {
        self.hub.access().send(out, 0)
    }

    /// Like [`Sender::send`], with an opaque tag reported back on delivery
    /// failure.
    pub fn send_tagged(&mut self, out: &Outbound<'_>, info: u32) -> Result<u32, SendError> {
        self.hub.access().send(out, info)
    }
}

/// Filtered inbound endpoint.
///
/// Every frame matching the filter is delivered as an independent copy; a
/// port that stops reading loses its own copies only. The subscription slot
/// is released on drop.
pub struct Port<'a> {
    hub: Hub<'a>,
    handle: crate::dispatch::SubHandle,
    filter: Filter,
}

impl<'a> Port<'a> {
    pub fn open(hub: Hub<'a>, filter: Filter) -> Result<Self, RegistrationError> {
        let handle = hub.access().register(filter)?;
        Ok(Self {
            hub,
            handle,
            filter,
        })
    }

    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.hub.access().try_recv(&self.handle)
    }

    /// Asynchronously receives the next matching frame.
    pub async fn recv(&mut self) -> Inbound {
        poll_fn(|cx| self.hub.access().poll_recv(&self.handle, cx)).await
    }

    /// True when [`Port::try_recv`] would return a frame.
    pub fn recv_ready(&self) -> bool {
        self.hub.access().recv_ready(&self.handle)
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    /// Replaces the whole filter. Takes effect for subsequent frames; frames
    /// already queued stay readable.
    pub fn set_filter(&mut self, filter: Filter) {
        self.filter = filter;
        self.hub.access().set_filter(&self.handle, filter);
    }

    pub fn set_mailboxes(&mut self, mailboxes: MailboxSet) {
        self.filter.mailboxes = mailboxes;
        self.hub.access().set_filter(&self.handle, self.filter);
    }

    pub fn set_doorbells(&mut self, doorbells: Option<DoorbellRange>) {
        self.filter.doorbells = doorbells;
        self.hub.access().set_filter(&self.handle, self.filter);
    }

    pub fn set_swrites(&mut self, swrites: Option<SwriteRange>) {
        self.filter.swrites = swrites;
        self.hub.access().set_filter(&self.handle, self.filter);
    }

    pub fn set_streams(&mut self, streams: bool) {
        self.filter.streams = streams;
        self.hub.access().set_filter(&self.handle, self.filter);
    }
}

impl Drop for Port<'_> {
    fn drop(&mut self) {
        self.hub.access().unregister(&self.handle);
    }
}

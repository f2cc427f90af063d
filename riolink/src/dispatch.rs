//! Inbound dispatch: subscriber registry and MESSAGE reassembly
//!
//! Subscribers occupy generation-checked slots. A handle carries the slot
//! index plus the generation it was registered under, so a stale handle kept
//! past `unregister` can never read another subscriber's traffic.

use core::task::{Context, Poll};

use embassy_sync::waitqueue::WakerRegistration;
use heapless::{Deque, Vec};
use riolink_core::{DeviceAddr, DoorbellRange, Mailbox, MailboxSet, SwriteRange};

pub const SUBSCRIBER_SLOTS: usize = 8;
pub const SUB_QUEUE_DEPTH: usize = 4;
pub const REASSEMBLY_SLOTS: usize = 4;

/// Longest deliverable payload: bounds both reassembled MESSAGEs and
/// single-frame SWRITE/STREAM bodies.
pub const INBOUND_PAYLOAD_MAX: usize = 4096;

/// Subscription filter. The default matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Filter {
    pub mailboxes: MailboxSet,
    pub doorbells: Option<DoorbellRange>,
    pub swrites: Option<SwriteRange>,
    pub streams: bool,
}

impl Filter {
    pub const fn mailbox(mailbox: Mailbox) -> Self {
        Self {
            mailboxes: MailboxSet::new_eq(mailbox),
            doorbells: None,
            swrites: None,
            streams: false,
        }
    }

    fn matches(&self, kind: &InboundKind) -> bool {
        match *kind {
            InboundKind::Message { mailbox, .. } => self.mailboxes.contains(mailbox),
            InboundKind::Doorbell { info } => self.doorbells.is_some_and(|r| r.contains(info)),
            InboundKind::Swrite { addr } => self.swrites.is_some_and(|r| r.contains(addr)),
            InboundKind::Stream { .. } => self.streams,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundKind {
    Message { mailbox: Mailbox, letter: u8 },
    Doorbell { info: u16 },
    Swrite { addr: u64 },
    Stream { stream_id: u16, cos: u8 },
}

/// A delivered frame. Each matching subscriber receives its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub src: DeviceAddr,
    pub kind: InboundKind,
    pub data: Vec<u8, INBOUND_PAYLOAD_MAX>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationError {
    NoSlotLeft,
}

/// Subscriber slot handle. Valid until `unregister`.
#[derive(Debug)]
pub struct SubHandle {
    pub(crate) index: u8,
    pub(crate) generation: u16,
}

struct Slot {
    generation: u16,
    active: bool,
    filter: Filter,
    queue: Deque<Inbound, SUB_QUEUE_DEPTH>,
    waker: WakerRegistration,
}

pub(crate) struct Registry {
    slots: [Slot; SUBSCRIBER_SLOTS],
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                generation: 0,
                active: false,
                filter: Filter::default(),
                queue: Deque::new(),
                waker: WakerRegistration::new(),
            }),
        }
    }

    pub fn register(&mut self, filter: Filter) -> Result<SubHandle, RegistrationError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.active)
            .ok_or(RegistrationError::NoSlotLeft)?;
        slot.active = true;
        slot.filter = filter;
        slot.queue.clear();
        Ok(SubHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    pub fn unregister(&mut self, handle: &SubHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.active = false;
            slot.generation = slot.generation.wrapping_add(1);
            slot.queue.clear();
        }
    }

    pub fn set_filter(&mut self, handle: &SubHandle, filter: Filter) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.filter = filter;
        }
    }

    pub fn try_pop(&mut self, handle: &SubHandle) -> Option<Inbound> {
        self.slot_mut(handle)?.queue.pop_front()
    }

    pub fn poll_pop(&mut self, handle: &SubHandle, cx: &mut Context<'_>) -> Poll<Inbound> {
        let Some(slot) = self.slot_mut(handle) else {
            return Poll::Pending;
        };
        match slot.queue.pop_front() {
            Some(inbound) => Poll::Ready(inbound),
            None => {
                slot.waker.register(cx.waker());
                Poll::Pending
            }
        }
    }

    pub fn ready(&self, handle: &SubHandle) -> bool {
        self.slot(handle).is_some_and(|s| !s.queue.is_empty())
    }

    /// Copies one frame to every matching subscriber.
    ///
    /// Returns the number of matching subscribers and the number of copies
    /// lost to full queues.
    pub fn dispatch(&mut self, src: DeviceAddr, kind: InboundKind, data: &[u8]) -> (u32, u32) {
        let mut matched = 0;
        let mut dropped = 0;
        for slot in self.slots.iter_mut() {
            if !slot.active || !slot.filter.matches(&kind) {
                continue;
            }
            matched += 1;
            if slot.queue.is_full() {
                dropped += 1;
                continue;
            }
            let inbound = Inbound {
                src,
                kind,
                // Length is bounded by the frame data area.
                data: unwrap!(Vec::from_slice(data).ok()),
            };
            unwrap!(slot.queue.push_back(inbound).ok());
            slot.waker.wake();
        }
        (matched, dropped)
    }

    fn slot(&self, handle: &SubHandle) -> Option<&Slot> {
        let slot = &self.slots[handle.index as usize];
        (slot.active && slot.generation == handle.generation).then_some(slot)
    }

    fn slot_mut(&mut self, handle: &SubHandle) -> Option<&mut Slot> {
        let slot = &mut self.slots[handle.index as usize];
        (slot.active && slot.generation == handle.generation).then_some(slot)
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
struct ReasmKey {
    src: DeviceAddr,
    mailbox: Mailbox,
    letter: u8,
}

struct Session {
    key: ReasmKey,
    next_segment: u16,
    data: Vec<u8, INBOUND_PAYLOAD_MAX>,
}

pub(crate) enum FragOutcome {
    Pending,
    Complete(Vec<u8, INBOUND_PAYLOAD_MAX>),
    Dropped,
}

/// Inbound MESSAGE reassembly, keyed by (source, mailbox, letter).
///
/// Fragments must arrive in segment order; a gap drops the whole transfer.
/// A new segment 0 for an existing key restarts its session. Slot collision
/// evicts the stalest-looking entry.
pub(crate) struct ReassemblyTable {
    slots: [Option<Session>; REASSEMBLY_SLOTS],
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn push_fragment(
        &mut self,
        src: DeviceAddr,
        mailbox: Mailbox,
        letter: u8,
        segment: u16,
        last: bool,
        payload: &[u8],
    ) -> FragOutcome {
        let key = ReasmKey { src, mailbox, letter };
        let pos = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.key == key));

        if segment == 0 {
            let mut data = Vec::new();
            if data.extend_from_slice(payload).is_err() {
                return FragOutcome::Dropped;
            }
            if last {
                // Single-fragment transfer; forget any stale session.
                if let Some(pos) = pos {
                    self.slots[pos] = None;
                }
                return FragOutcome::Complete(data);
            }
            let target = pos
                .or_else(|| self.slots.iter().position(|s| s.is_none()))
                .unwrap_or(0);
            if pos.is_none() && self.slots[target].is_some() {
                debug!("reassembly: evicting session for a new transfer");
            }
            self.slots[target] = Some(Session {
                key,
                next_segment: 1,
                data,
            });
            return FragOutcome::Pending;
        }

        let Some(pos) = pos else {
            // Tail fragment of a transfer whose start was never seen.
            return FragOutcome::Dropped;
        };
        let mut session = unwrap!(self.slots[pos].take());
        if segment != session.next_segment || session.data.extend_from_slice(payload).is_err() {
            return FragOutcome::Dropped;
        }
        session.next_segment += 1;
        if last {
            FragOutcome::Complete(session.data)
        } else {
            self.slots[pos] = Some(session);
            FragOutcome::Pending
        }
    }
}

//! SRIO transport node
//!
//! The node holds everything the stack shares between user sockets, the
//! background runner and the hardware driver: address state, the TX queue,
//! the retry list, the subscriber registry, the reassembly table and the
//! counters. `split()` yields a [`Hub`] for sockets, a [`Link`] for the
//! driver and a [`Runner`] that must be spawned for retries and address
//! negotiation to make progress.
//!
//! ## Examples
//!
//! ```no_run
//! use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex as Mutex;
//! use riolink::node::{Node, NodeConfig};
//! use riolink::pool::DescriptorPool;
//! use static_cell::StaticCell;
//!
//! static POOL: StaticCell<DescriptorPool<Mutex, 16>> = StaticCell::new();
//! static NODE: StaticCell<Node<'static, Mutex>> = StaticCell::new();
//!
//! let pool = POOL.init(DescriptorPool::new());
//! let node = NODE.init(Node::new(pool, NodeConfig::default()));
//! let (hub, link, runner) = node.split();
//! ```

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::Ticker;
use heapless::Deque;

use riolink_driver::frame::{HeaderKind, HelloHeader, RespSig, HEADER_LEN, MSG_FRAG_MAX, SIZE_MAX};
use riolink_driver::internal::{DynamicLink, DynamicRxSink, DynamicTxDone, DynamicTxSource};
use riolink_driver::pool::{Descriptor, Pool, RespState, DATA_SIZE};

use crate::core::{DeviceAddr, Mailbox, SwriteRange};
use crate::dispatch::{
    Filter, FragOutcome, Inbound, InboundKind, ReassemblyTable, Registry, RegistrationError,
    SubHandle, INBOUND_PAYLOAD_MAX,
};
use crate::negotiate::{ProbeAction, ProbeConfig, Prober};
use crate::retry::{RetryList, RETRY_SLOTS};
use crate::socket::{Outbound, SendError};
use crate::time::Duration;

pub use riolink_driver::link::Link;

pub const TX_QUEUE_DEPTH: usize = 16;
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Largest MESSAGE payload accepted for sending; longer data must be split by
/// the application.
pub const MSG_PAYLOAD_MAX: usize = INBOUND_PAYLOAD_MAX;

const MSG_FRAGS_MAX: usize = MSG_PAYLOAD_MAX.div_ceil(MSG_FRAG_MAX);

/// Largest single-frame payload (SWRITE, STREAM).
pub const FRAME_PAYLOAD_MAX: usize = if DATA_SIZE - HEADER_LEN < SIZE_MAX {
    DATA_SIZE - HEADER_LEN
} else {
    SIZE_MAX
};

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Statically assigned address. `None` starts loopback negotiation.
    pub addr: Option<DeviceAddr>,
    pub probe: ProbeConfig,
    /// Retry scan period.
    pub retry_interval: Duration,
    /// Retry budget for ack-requested frames: TTL of n allows n - 1
    /// retransmissions before the failure report.
    pub ttl: u8,
    /// Priority field stamped on outbound frames.
    pub prio: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            addr: None,
            probe: ProbeConfig::default(),
            retry_interval: Duration::from_millis(100),
            ttl: 3,
            prio: 4,
        }
    }
}

/// An ack-requested transfer ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeliveryFailed {
    /// Caller tag passed at send time.
    pub info: u32,
    /// Cookie returned by the send call.
    pub cookie: u32,
}

/// Cumulative stack counters. Snapshot via [`Hub::counters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counters {
    pub tx_enqueued: u32,
    pub tx_completed: u32,
    pub retries: u32,
    pub delivery_failures: u32,
    pub responses_matched: u32,
    pub responses_unmatched: u32,
    pub acks_sent: u32,
    pub rx_malformed: u32,
    pub rx_dropped_unbound: u32,
    pub rx_addr_mismatch: u32,
    pub rx_no_subscriber: u32,
    pub sub_queue_drops: u32,
    pub reasm_drops: u32,
}

struct Inner {
    prober: Prober,
    next_cookie: u32,
    tx: Deque<Descriptor, TX_QUEUE_DEPTH>,
    tx_waker: WakerRegistration,
    retry: RetryList,
    subs: Registry,
    reasm: ReassemblyTable,
    events: Deque<DeliveryFailed, EVENT_QUEUE_DEPTH>,
    event_waker: WakerRegistration,
    counters: Counters,
}

impl Inner {
    fn push_event(&mut self, event: DeliveryFailed) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        unwrap!(self.events.push_back(event).ok());
        self.event_waker.wake();
    }

    fn fan_out(&mut self, src: DeviceAddr, kind: InboundKind, data: &[u8]) {
        let (matched, dropped) = self.subs.dispatch(src, kind, data);
        if matched == 0 {
            self.counters.rx_no_subscriber += 1;
            debug!("rx: no subscriber for frame from {}", src.into_u16());
        }
        self.counters.sub_queue_drops += dropped;
    }
}

/// SRIO transport node.
pub struct Node<'p, M: RawMutex> {
    pool: &'p (dyn Pool + Sync),
    config: NodeConfig,
    state: Mutex<M, RefCell<Inner>>,
}

impl<'p, M: RawMutex + Sync> Node<'p, M> {
    pub fn new(pool: &'p (dyn Pool + Sync), config: NodeConfig) -> Self {
        Self {
            pool,
            config,
            state: Mutex::new(RefCell::new(Inner {
                prober: Prober::new(config.probe, config.addr),
                next_cookie: 0,
                tx: Deque::new(),
                tx_waker: WakerRegistration::new(),
                retry: RetryList::new(),
                subs: Registry::new(),
                reasm: ReassemblyTable::new(),
                events: Deque::new(),
                event_waker: WakerRegistration::new(),
                counters: Counters::default(),
            })),
        }
    }

    pub fn split(&mut self) -> (Hub<'_>, Link<'_>, Runner<'_>) {
        let hub = Hub::new(&*self);
        let link = Link::new(&*self);
        let runner = Runner {
            node: &*self,
            retry_interval: self.config.retry_interval,
            probe_interval: self.config.probe.interval,
        };
        (hub, link, runner)
    }
}

impl<'p, M: RawMutex> Node<'p, M> {
    /// Builds a framed descriptor: header, payload, retry state.
    fn new_frame(&self, header: &HelloHeader, payload: &[u8]) -> Result<Descriptor, SendError> {
        let mut desc = self.pool.alloc().ok_or(SendError::NoDescriptor)?;
        desc.data_mut()[..HEADER_LEN].copy_from_slice(&header.encode());
        desc.data_mut()[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
        desc.used = (HEADER_LEN + payload.len()) as u16;
        desc.resp = RespSig::of_request(header).map(|sig| RespState {
            sig,
            ttl: self.config.ttl,
        });
        Ok(desc)
    }

    /// Atomically enqueues a burst under one fresh cookie. On failure the
    /// descriptors stay with the caller.
    fn enqueue_burst(
        &self,
        descs: &mut heapless::Vec<Descriptor, MSG_FRAGS_MAX>,
        info: u32,
    ) -> Result<u32, SendError> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if TX_QUEUE_DEPTH - s.tx.len() < descs.len() {
                return Err(SendError::QueueFull);
            }
            let cookie = s.next_cookie;
            s.next_cookie = s.next_cookie.wrapping_add(1);
            for mut desc in core::mem::take(descs) {
                desc.cookie = cookie;
                desc.info = info;
                s.counters.tx_enqueued += 1;
                unwrap!(s.tx.push_back(desc).ok());
            }
            s.tx_waker.wake();
            Ok(cookie)
        })
    }

    fn send_message(
        &self,
        src: DeviceAddr,
        dst: DeviceAddr,
        mailbox: Mailbox,
        letter: u8,
        data: &[u8],
        ack: bool,
        info: u32,
    ) -> Result<u32, SendError> {
        if data.len() > MSG_PAYLOAD_MAX {
            return Err(SendError::TooLong);
        }
        let frags = data.len().div_ceil(MSG_FRAG_MAX).max(1);
        let mut descs = heapless::Vec::<Descriptor, MSG_FRAGS_MAX>::new();
        for segment in 0..frags {
            let chunk = &data[segment * MSG_FRAG_MAX..data.len().min((segment + 1) * MSG_FRAG_MAX)];
            let last = segment == frags - 1;
            let header = HelloHeader {
                dst,
                src,
                kind: HeaderKind::Message {
                    mailbox,
                    letter,
                    segment: segment as u16,
                    last,
                },
                // The transfer-level ack rides on the final fragment only.
                ack: ack && last,
                prio: self.config.prio,
                seg_count: frags as u8,
                size: chunk.len() as u16,
            };
            match self.new_frame(&header, chunk) {
                Ok(desc) => unwrap!(descs.push(desc).ok()),
                Err(e) => {
                    for desc in descs {
                        self.pool.free(desc);
                    }
                    return Err(e);
                }
            }
        }
        self.enqueue_burst(&mut descs, info).inspect_err(|_| {
            for desc in core::mem::take(&mut descs) {
                self.pool.free(desc);
            }
        })
    }

    fn send_single(
        &self,
        header: &HelloHeader,
        payload: &[u8],
        info: u32,
    ) -> Result<u32, SendError> {
        let mut descs = heapless::Vec::<Descriptor, MSG_FRAGS_MAX>::new();
        unwrap!(descs.push(self.new_frame(header, payload)?).ok());
        self.enqueue_burst(&mut descs, info).inspect_err(|_| {
            for desc in core::mem::take(&mut descs) {
                self.pool.free(desc);
            }
        })
    }

    fn retry_tick(&self) {
        let mut to_free = heapless::Vec::<Descriptor, RETRY_SLOTS>::new();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let outcome = s.retry.tick();
            let retransmitting = !outcome.requeue.is_empty();
            for mut desc in outcome.requeue {
                desc.offs = 0;
                s.counters.retries += 1;
                if let Err(desc) = s.tx.push_back(desc) {
                    // No queue room to retransmit; report the failure now
                    // rather than stranding the descriptor.
                    s.counters.delivery_failures += 1;
                    s.push_event(DeliveryFailed {
                        info: desc.info,
                        cookie: desc.cookie,
                    });
                    unwrap!(to_free.push(desc).ok());
                }
            }
            if retransmitting {
                s.tx_waker.wake();
            }
            for desc in outcome.expired {
                s.counters.delivery_failures += 1;
                s.push_event(DeliveryFailed {
                    info: desc.info,
                    cookie: desc.cookie,
                });
                unwrap!(to_free.push(desc).ok());
            }
        });
        for desc in to_free {
            self.pool.free(desc);
        }
    }

    fn probe_tick(&self) {
        let action = self.state.lock(|s| s.borrow_mut().prober.next());
        match action {
            ProbeAction::Idle => {}
            ProbeAction::GiveUp => {
                error!("negotiation: address range exhausted, node stays unbound");
            }
            ProbeAction::Send { addr, cookie } => {
                let header = HelloHeader {
                    dst: addr,
                    src: addr,
                    kind: HeaderKind::Message {
                        mailbox: Mailbox::PROBE,
                        letter: 0,
                        segment: 0,
                        last: true,
                    },
                    ack: false,
                    prio: self.config.prio,
                    seg_count: 0,
                    size: 4,
                };
                if self.send_single(&header, &cookie.to_le_bytes(), 0).is_err() {
                    // A lost probe just falls through to the next candidate.
                    warn!("negotiation: probe for {} not sent", addr.into_u16());
                }
            }
        }
    }
}

impl<'p, M: RawMutex> DynamicTxSource for Node<'p, M> {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Descriptor> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            match s.tx.pop_front() {
                Some(desc) => Poll::Ready(desc),
                None => {
                    s.tx_waker.register(cx.waker());
                    Poll::Pending
                }
            }
        })
    }
}

impl<'p, M: RawMutex> DynamicTxDone for Node<'p, M> {
    fn complete(&self, mut desc: Descriptor) {
        let to_free = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.counters.tx_completed += 1;
            if desc.resp.is_none() {
                return Some(desc);
            }
            desc.offs = 0;
            match s.retry.enroll(desc) {
                Ok(()) => None,
                Err(desc) => {
                    s.counters.delivery_failures += 1;
                    s.push_event(DeliveryFailed {
                        info: desc.info,
                        cookie: desc.cookie,
                    });
                    warn!("retry list full, transfer {} reported failed", desc.cookie);
                    Some(desc)
                }
            }
        });
        if let Some(desc) = to_free {
            self.pool.free(desc);
        }
    }
}

impl<'p, M: RawMutex> DynamicRxSink for Node<'p, M> {
    fn deliver(&self, desc: Descriptor) {
        let mut matched: Option<Descriptor> = None;
        let mut ack_reply: Option<HelloHeader> = None;

        let header = HelloHeader::decode(desc.frame());
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let header = match header {
                Ok(header) if HEADER_LEN + header.size as usize <= desc.used as usize => header,
                _ => {
                    s.counters.rx_malformed += 1;
                    debug!("rx: malformed frame dropped");
                    return;
                }
            };
            let payload = &desc.frame()[HEADER_LEN..HEADER_LEN + header.size as usize];

            // RESPONSE frames only ever touch the retry list.
            if let Some(sig) = RespSig::of_response(&header) {
                match s.retry.take_match(sig) {
                    Some(desc) => {
                        s.counters.responses_matched += 1;
                        matched = Some(desc);
                    }
                    None => {
                        s.counters.responses_unmatched += 1;
                        debug!("rx: unmatched response dropped");
                    }
                }
                return;
            }

            if s.prober.is_probing() {
                if let HeaderKind::Message { mailbox, .. } = header.kind {
                    if mailbox == Mailbox::PROBE && payload.len() >= 4 {
                        let cookie =
                            u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                        if s.prober.check_echo(header.dst, cookie) {
                            info!("negotiation: bound address {}", header.dst.into_u16());
                        }
                        return;
                    }
                }
                s.counters.rx_dropped_unbound += 1;
                return;
            }

            let local = s.prober.local_addr();
            if local.is_unset() {
                s.counters.rx_dropped_unbound += 1;
                return;
            }
            if header.dst != local {
                s.counters.rx_addr_mismatch += 1;
                debug!("rx: frame for {} dropped", header.dst.into_u16());
                return;
            }

            if RespSig::of_request(&header).is_some() {
                ack_reply = Some(header.response_to());
            }

            let src = header.src;
            match header.kind {
                HeaderKind::Message {
                    mailbox,
                    letter,
                    segment,
                    last,
                } => {
                    let kind = InboundKind::Message { mailbox, letter };
                    if segment == 0 && last {
                        s.fan_out(src, kind, payload);
                    } else {
                        match s.reasm.push_fragment(src, mailbox, letter, segment, last, payload) {
                            FragOutcome::Pending => {}
                            FragOutcome::Complete(data) => s.fan_out(src, kind, &data),
                            FragOutcome::Dropped => {
                                s.counters.reasm_drops += 1;
                                debug!("rx: reassembly dropped a transfer from {}", src.into_u16());
                            }
                        }
                    }
                }
                HeaderKind::Doorbell { info } => {
                    s.fan_out(src, InboundKind::Doorbell { info }, &[]);
                }
                HeaderKind::Swrite { addr } => {
                    s.fan_out(src, InboundKind::Swrite { addr }, payload);
                }
                HeaderKind::Stream { stream_id, cos } => {
                    s.fan_out(src, InboundKind::Stream { stream_id, cos }, payload);
                }
                HeaderKind::Response { .. } => unreachable!(),
            }
        });

        if let Some(acked) = matched {
            self.pool.free(acked);
        }
        self.pool.free(desc);

        if let Some(reply) = ack_reply {
            match self.send_single(&reply, &[], 0) {
                Ok(_) => self.state.lock(|s| s.borrow_mut().counters.acks_sent += 1),
                Err(_) => debug!("rx: ack response dropped"),
            }
        }
    }
}

impl<'p, M: RawMutex> DynamicLink for Node<'p, M> {}

pub(crate) trait DynamicHub {
    fn send(&self, out: &Outbound<'_>, info: u32) -> Result<u32, SendError>;
    fn register(&self, filter: Filter) -> Result<SubHandle, RegistrationError>;
    fn unregister(&self, handle: &SubHandle);
    fn set_filter(&self, handle: &SubHandle, filter: Filter);
    fn try_recv(&self, handle: &SubHandle) -> Option<Inbound>;
    fn poll_recv(&self, handle: &SubHandle, cx: &mut Context<'_>) -> Poll<Inbound>;
    fn recv_ready(&self, handle: &SubHandle) -> bool;
    fn poll_failure(&self, cx: &mut Context<'_>) -> Poll<DeliveryFailed>;
    fn local_addr(&self) -> DeviceAddr;
    fn set_local_addr(&self, addr: DeviceAddr);
    fn reset(&self);
    fn counters(&self) -> Counters;
}

impl<'p, M: RawMutex> DynamicHub for Node<'p, M> {
    fn send(&self, out: &Outbound<'_>, info: u32) -> Result<u32, SendError> {
        let src = self.local_addr();
        if src.is_unset() {
            return Err(SendError::AddressUnset);
        }
        match *out {
            Outbound::Message {
                dst,
                mailbox,
                letter,
                data,
                ack,
            } => self.send_message(src, dst, mailbox, letter, data, ack, info),
            Outbound::Doorbell { dst, info: bell, ack } => {
                let header = HelloHeader {
                    dst,
                    src,
                    kind: HeaderKind::Doorbell { info: bell },
                    ack,
                    prio: self.config.prio,
                    seg_count: 0,
                    size: 0,
                };
                self.send_single(&header, &[], info)
            }
            Outbound::Swrite { dst, addr, data, ack } => {
                if addr > SwriteRange::ADDR_MAX || addr & 0x3 != 0 {
                    return Err(SendError::BadAddress);
                }
                if data.len() > FRAME_PAYLOAD_MAX {
                    return Err(SendError::TooLong);
                }
                let header = HelloHeader {
                    dst,
                    src,
                    kind: HeaderKind::Swrite { addr },
                    ack,
                    prio: self.config.prio,
                    seg_count: 0,
                    size: data.len() as u16,
                };
                self.send_single(&header, data, info)
            }
            Outbound::Stream {
                dst,
                stream_id,
                cos,
                data,
            } => {
                if data.len() > FRAME_PAYLOAD_MAX {
                    return Err(SendError::TooLong);
                }
                let header = HelloHeader {
                    dst,
                    src,
                    kind: HeaderKind::Stream { stream_id, cos },
                    ack: false,
                    prio: self.config.prio,
                    seg_count: 0,
                    size: data.len() as u16,
                };
                self.send_single(&header, data, info)
            }
        }
    }

    fn register(&self, filter: Filter) -> Result<SubHandle, RegistrationError> {
        self.state.lock(|s| s.borrow_mut().subs.register(filter))
    }

    fn unregister(&self, handle: &SubHandle) {
        self.state.lock(|s| s.borrow_mut().subs.unregister(handle));
    }

    fn set_filter(&self, handle: &SubHandle, filter: Filter) {
        self.state
            .lock(|s| s.borrow_mut().subs.set_filter(handle, filter));
    }

    fn try_recv(&self, handle: &SubHandle) -> Option<Inbound> {
        self.state.lock(|s| s.borrow_mut().subs.try_pop(handle))
    }

    fn poll_recv(&self, handle: &SubHandle, cx: &mut Context<'_>) -> Poll<Inbound> {
        self.state.lock(|s| s.borrow_mut().subs.poll_pop(handle, cx))
    }

    fn recv_ready(&self, handle: &SubHandle) -> bool {
        self.state.lock(|s| s.borrow().subs.ready(handle))
    }

    fn poll_failure(&self, cx: &mut Context<'_>) -> Poll<DeliveryFailed> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            match s.events.pop_front() {
                Some(event) => Poll::Ready(event),
                None => {
                    s.event_waker.register(cx.waker());
                    Poll::Pending
                }
            }
        })
    }

    fn local_addr(&self) -> DeviceAddr {
        self.state.lock(|s| s.borrow().prober.local_addr())
    }

    fn set_local_addr(&self, addr: DeviceAddr) {
        self.state.lock(|s| s.borrow_mut().prober.bind(addr));
    }

    fn reset(&self) {
        let mut to_free = heapless::Vec::<Descriptor, { TX_QUEUE_DEPTH + RETRY_SLOTS }>::new();
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            while let Some(desc) = s.tx.pop_front() {
                unwrap!(to_free.push(desc).ok());
            }
            for desc in s.retry.drain() {
                s.counters.delivery_failures += 1;
                s.push_event(DeliveryFailed {
                    info: desc.info,
                    cookie: desc.cookie,
                });
                unwrap!(to_free.push(desc).ok());
            }
            s.reasm.clear();
        });
        for desc in to_free {
            self.pool.free(desc);
        }
    }

    fn counters(&self) -> Counters {
        self.state.lock(|s| s.borrow().counters)
    }
}

/// Shared handle for sockets and node-level control.
#[derive(Clone, Copy)]
pub struct Hub<'a>(&'a (dyn DynamicHub + Sync));

impl<'a> Hub<'a> {
    pub(crate) fn new(hub: &'a (dyn DynamicHub + Sync)) -> Self {
        Self(hub)
    }

    pub(crate) fn access(self) -> &'a (dyn DynamicHub + Sync) {
        self.0
    }

    /// The bound local address, or [`DeviceAddr::UNSET`] while negotiation is
    /// pending or has failed.
    pub fn local_addr(&self) -> DeviceAddr {
        self.0.local_addr()
    }

    /// Binds the local address directly, cancelling negotiation.
    pub fn set_local_addr(&mut self, addr: DeviceAddr) {
        self.0.set_local_addr(addr);
    }

    /// Drains the TX queue and the retry list back to the pool and clears
    /// reassembly. Retry entries are reported as delivery failures.
    /// Subscriptions and the bound address survive. Idempotent.
    pub fn reset(&mut self) {
        self.0.reset();
    }

    pub fn counters(&self) -> Counters {
        self.0.counters()
    }

    /// Asynchronously fetches the next delivery failure report.
    pub async fn next_failure(&mut self) -> DeliveryFailed {
        poll_fn(|cx| self.0.poll_failure(cx)).await
    }
}

pub(crate) trait DynamicRunner {
    fn retry_tick(&self);
    fn probe_tick(&self);
}

impl<'p, M: RawMutex> DynamicRunner for Node<'p, M> {
    fn retry_tick(&self) {
        Node::retry_tick(self);
    }

    fn probe_tick(&self) {
        Node::probe_tick(self);
    }
}

/// Node background task runner.
///
/// Run for proper node operation: the retry scan and address negotiation are
/// both driven from here.
pub struct Runner<'a> {
    node: &'a (dyn DynamicRunner + Sync),
    retry_interval: Duration,
    probe_interval: Duration,
}

impl<'a> Runner<'a> {
    pub async fn run(&mut self) -> ! {
        let mut retry = Ticker::every(self.retry_interval);
        let mut probe = Ticker::every(self.probe_interval);

        loop {
            match select(retry.next(), probe.next()).await {
                Either::First(()) => self.node.retry_tick(),
                Either::Second(()) => self.node.probe_tick(),
            }
        }
    }
}

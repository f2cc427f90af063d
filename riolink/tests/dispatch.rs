use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use futures_executor::LocalPool;
use riolink::core::{DeviceAddr, DoorbellRange, Mailbox, MailboxSet};
use riolink::dispatch::{Filter, InboundKind};
use riolink::frame::{HeaderKind, HelloHeader, HEADER_LEN};
use riolink::node::{Hub, Link, Node, NodeConfig};
use riolink::pool::{DescriptorPool, Pool};
use riolink::socket::Port;
use std::boxed::Box;

const POOL_SIZE: usize = 8;
const LOCAL: DeviceAddr = DeviceAddr::new(5).unwrap();
const PEER: DeviceAddr = DeviceAddr::new(2).unwrap();

type TestPool = DescriptorPool<CriticalSectionRawMutex, POOL_SIZE>;

fn make_node() -> (Hub<'static>, Link<'static>, &'static TestPool) {
    let pool = Box::leak(Box::new(TestPool::new()));
    let config = NodeConfig {
        addr: Some(LOCAL),
        ..NodeConfig::default()
    };
    let node = Box::leak(Box::new(Node::<CriticalSectionRawMutex>::new(pool, config)));
    let (hub, link, _runner) = node.split();
    (hub, link, pool)
}

fn inject(rx: &mut riolink::link::RxSink<'_>, pool: &dyn Pool, header: HelloHeader, payload: &[u8]) {
    let mut desc = pool.alloc().unwrap();
    desc.data_mut()[..HEADER_LEN].copy_from_slice(&header.encode());
    desc.data_mut()[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    desc.used = (HEADER_LEN + payload.len()) as u16;
    rx.deliver(desc);
}

fn message(mailbox: u8, segment: u16, last: bool, ack: bool, size: usize) -> HelloHeader {
    HelloHeader {
        dst: LOCAL,
        src: PEER,
        kind: HeaderKind::Message {
            mailbox: Mailbox::new(mailbox).unwrap(),
            letter: 0,
            segment,
            last,
        },
        ack,
        prio: 4,
        seg_count: 0,
        size: size as u16,
    }
}

#[test]
fn test_fan_out_independent_copies() {
    let (hub, link, pool) = make_node();
    let (_tx_src, _tx_done, mut rx) = link.split();

    let mut a = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();
    let mut b = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();
    let mut other = Port::open(hub, Filter::mailbox(Mailbox::new(6).unwrap())).unwrap();

    inject(&mut rx, pool, message(5, 0, true, false, 4), b"ping");

    let ia = a.try_recv().unwrap();
    let ib = b.try_recv().unwrap();
    assert_eq!(ia.src, PEER);
    assert_eq!(ia.data.as_slice(), b"ping");
    assert_eq!(ia, ib);
    assert!(other.try_recv().is_none());

    // The source descriptor went back to the pool after the copies.
    assert_eq!(pool.free_count(), POOL_SIZE);
}

#[test]
fn test_address_and_subscriber_drops() {
    let (hub, link, pool) = make_node();
    let (_tx_src, _tx_done, mut rx) = link.split();

    // Frame for someone else on the fabric.
    let mut stray = message(5, 0, true, false, 0);
    stray.dst = DeviceAddr::new(7).unwrap();
    inject(&mut rx, pool, stray, &[]);
    assert_eq!(hub.counters().rx_addr_mismatch, 1);

    // Nobody subscribed.
    inject(&mut rx, pool, message(5, 0, true, false, 0), &[]);
    assert_eq!(hub.counters().rx_no_subscriber, 1);

    // Malformed: size field larger than the frame.
    let mut desc = pool.alloc().unwrap();
    let mut bad = message(5, 0, true, false, 64);
    bad.size = 64;
    desc.data_mut()[..HEADER_LEN].copy_from_slice(&bad.encode());
    desc.used = HEADER_LEN as u16;
    rx.deliver(desc);
    assert_eq!(hub.counters().rx_malformed, 1);

    assert_eq!(pool.free_count(), POOL_SIZE);
}

#[test]
fn test_ack_synthesized() {
    let mut executor = LocalPool::new();
    let (hub, link, pool) = make_node();
    let (mut tx_src, _tx_done, mut rx) = link.split();
    let mut port = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();

    let request = message(5, 0, true, true, 2);
    inject(&mut rx, pool, request, b"hi");

    // Delivered to the subscriber and acknowledged on the wire.
    assert!(port.try_recv().is_some());
    let reply = executor.run_until(tx_src.pop());
    let header = HelloHeader::decode(reply.frame()).unwrap();
    assert_eq!(header.dst, PEER);
    assert_eq!(header.src, LOCAL);
    assert_eq!(header.size, 0);
    assert_eq!(header.kind, HeaderKind::Response {
        echo: request.word1()
    });
    assert_eq!(hub.counters().acks_sent, 1);
}

#[test]
fn test_doorbell_range_and_filter_update() {
    let (hub, link, pool) = make_node();
    let (_tx_src, _tx_done, mut rx) = link.split();

    let filter = Filter {
        doorbells: DoorbellRange::new(0x10, 0x1f),
        ..Filter::default()
    };
    let mut port = Port::open(hub, filter).unwrap();

    let bell = |info| HelloHeader {
        dst: LOCAL,
        src: PEER,
        kind: HeaderKind::Doorbell { info },
        ack: false,
        prio: 4,
        seg_count: 0,
        size: 0,
    };

    inject(&mut rx, pool, bell(0x15), &[]);
    inject(&mut rx, pool, bell(0x25), &[]);
    let inbound = port.try_recv().unwrap();
    assert_eq!(inbound.kind, InboundKind::Doorbell { info: 0x15 });
    assert!(port.try_recv().is_none());

    // Updates apply to subsequent frames.
    port.set_doorbells(DoorbellRange::new(0x20, 0x2f));
    inject(&mut rx, pool, bell(0x15), &[]);
    inject(&mut rx, pool, bell(0x25), &[]);
    let inbound = port.try_recv().unwrap();
    assert_eq!(inbound.kind, InboundKind::Doorbell { info: 0x25 });
    assert!(port.try_recv().is_none());

    // Mailboxes can be added without touching the doorbell range.
    port.set_mailboxes(MailboxSet::new_eq(Mailbox::new(5).unwrap()));
    inject(&mut rx, pool, message(5, 0, true, false, 0), &[]);
    assert!(port.try_recv().is_some());
}

#[test]
fn test_port_drop_releases_slot() {
    let (hub, link, pool) = make_node();
    let (_tx_src, _tx_done, mut rx) = link.split();

    let port = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();
    drop(port);

    // The frame delivered after the drop goes nowhere.
    inject(&mut rx, pool, message(5, 0, true, false, 0), &[]);
    assert_eq!(hub.counters().rx_no_subscriber, 1);

    // And the slot is usable again.
    let mut fresh = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();
    inject(&mut rx, pool, message(5, 0, true, false, 0), &[]);
    assert!(fresh.try_recv().is_some());
}

#[test]
fn test_wire_reassembly() {
    let (hub, link, pool) = make_node();
    let (_tx_src, _tx_done, mut rx) = link.split();
    let mut port = Port::open(hub, Filter::mailbox(Mailbox::new(5).unwrap())).unwrap();

    inject(&mut rx, pool, message(5, 0, false, false, 3), b"abc");
    assert!(port.try_recv().is_none());
    inject(&mut rx, pool, message(5, 1, true, false, 3), b"def");

    let inbound = port.try_recv().unwrap();
    assert_eq!(inbound.data.as_slice(), b"abcdef");
    assert_eq!(pool.free_count(), POOL_SIZE);

    // A gap kills the transfer without delivering anything.
    inject(&mut rx, pool, message(5, 0, false, false, 3), b"abc");
    inject(&mut rx, pool, message(5, 2, true, false, 3), b"xyz");
    assert!(port.try_recv().is_none());
    assert_eq!(hub.counters().reasm_drops, 1);
}

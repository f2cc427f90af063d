use core::task::{Context, Poll};
use std::boxed::Box;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::MockDriver;
use futures_executor::LocalPool;
use futures_task::LocalSpawn;

use riolink_axi::bus::FifoBus;
use riolink_axi::dma::{DmaChannel, DmaError, NoDma, TransferMode};
use riolink_axi::regs::{self, IrqStatus};
use riolink_axi::{Config, Control, Driver, Info, LoopbackMode, RxRunner, TxRunner};
use riolink_driver::internal::{DynamicLink, DynamicRxSink, DynamicTxDone, DynamicTxSource};
use riolink_driver::link::Link;
use riolink_driver::pool::{Descriptor, DescriptorPool, Pool};
use riolink_driver::time::Duration;

const POOL_SIZE: usize = 4;
const RLR_PARTIAL: u32 = 1 << 31;

type TestPool = DescriptorPool<CriticalSectionRawMutex, POOL_SIZE>;

#[derive(Default)]
struct FifoState {
    isr: u32,
    ier: u32,
    tdfv: u32,
    tdfd: Vec<u32>,
    tlr: Vec<u32>,
    tdr: Option<u32>,
    tdfr_strobes: u32,
    rdfr_strobes: u32,
    srr_writes: u32,
    rlr: VecDeque<u32>,
    rdfd: VecDeque<u32>,
}

/// Scripted register block. The FIFO variant models the data-path side
/// effects; the plain variant is a bare register file for the control block.
#[derive(Clone)]
enum MockBus {
    Fifo(Rc<RefCell<FifoState>>),
    Plain(Rc<RefCell<HashMap<usize, u32>>>),
}

impl FifoBus for MockBus {
    fn read(&self, offset: usize) -> u32 {
        match self {
            MockBus::Fifo(state) => {
                let mut state = state.borrow_mut();
                match offset {
                    regs::ISR => state.isr,
                    regs::IER => state.ier,
                    regs::TDFV => state.tdfv,
                    regs::RDFO => state.rdfd.len() as u32,
                    regs::RLR => state.rlr.pop_front().expect("RLR read past the script"),
                    regs::RDFD => state.rdfd.pop_front().expect("RDFD read past the script"),
                    regs::RDR => 0,
                    _ => panic!("unexpected FIFO read at {offset:#x}"),
                }
            }
            MockBus::Plain(regs) => *regs.borrow().get(&offset).unwrap_or(&0),
        }
    }

    fn write(&self, offset: usize, value: u32) {
        match self {
            MockBus::Fifo(state) => {
                let mut state = state.borrow_mut();
                match offset {
                    regs::ISR => state.isr &= !value,
                    regs::IER => state.ier = value,
                    regs::TDFD => {
                        state.tdfd.push(value);
                        state.tdfv = state.tdfv.saturating_sub(1);
                    }
                    regs::TLR => state.tlr.push(value),
                    regs::TDR => state.tdr = Some(value),
                    regs::TDFR => {
                        assert_eq!(value, regs::RESET_KEY);
                        state.tdfr_strobes += 1;
                        state.isr |= IrqStatus::TRC.into_bits();
                    }
                    regs::RDFR => {
                        assert_eq!(value, regs::RESET_KEY);
                        state.rdfr_strobes += 1;
                        state.isr |= IrqStatus::RRC.into_bits();
                    }
                    regs::SRR => {
                        assert_eq!(value, regs::RESET_KEY);
                        state.srr_writes += 1;
                    }
                    _ => panic!("unexpected FIFO write at {offset:#x}"),
                }
            }
            MockBus::Plain(regs) => {
                regs.borrow_mut().insert(offset, value);
            }
        }
    }
}

struct LinkState {
    tx: VecDeque<Descriptor>,
    completed: Vec<Descriptor>,
    delivered: Vec<Descriptor>,
    waker: WakerRegistration,
}

struct TestLink {
    state: Mutex<CriticalSectionRawMutex, RefCell<LinkState>>,
}

impl TestLink {
    fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(LinkState {
                tx: VecDeque::new(),
                completed: Vec::new(),
                delivered: Vec::new(),
                waker: WakerRegistration::new(),
            })),
        }
    }

    fn push_tx(&self, desc: Descriptor) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.tx.push_back(desc);
            s.waker.wake();
        });
    }

    fn take_completed(&self) -> Vec<Descriptor> {
        self.state.lock(|s| core::mem::take(&mut s.borrow_mut().completed))
    }

    fn take_delivered(&self) -> Vec<Descriptor> {
        self.state.lock(|s| core::mem::take(&mut s.borrow_mut().delivered))
    }
}

impl DynamicTxSource for TestLink {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Descriptor> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            match s.tx.pop_front() {
                Some(desc) => Poll::Ready(desc),
                None => {
                    s.waker.register(cx.waker());
                    Poll::Pending
                }
            }
        })
    }
}

impl DynamicTxDone for TestLink {
    fn complete(&self, desc: Descriptor) {
        self.state.lock(|s| s.borrow_mut().completed.push(desc));
    }
}

impl DynamicRxSink for TestLink {
    fn deliver(&self, desc: Descriptor) {
        self.state.lock(|s| s.borrow_mut().delivered.push(desc));
    }
}

impl DynamicLink for TestLink {}

struct MockDma {
    stall_once: bool,
}

impl DmaChannel<MockBus> for MockDma {
    async fn push(&mut self, bus: &MockBus, offset: usize, data: &[u8]) -> Result<(), DmaError> {
        if self.stall_once {
            self.stall_once = false;
            core::future::pending::<()>().await;
        }
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            bus.write(offset, u32::from_le_bytes(word));
        }
        Ok(())
    }

    async fn pull(&mut self, _bus: &MockBus, _offset: usize, _data: &mut [u8]) -> Result<(), DmaError> {
        unreachable!()
    }
}

struct Rig<D: DmaChannel<MockBus>> {
    executor: LocalPool,
    bus: MockBus,
    fifo: Rc<RefCell<FifoState>>,
    info: &'static Info,
    link: &'static TestLink,
    pool: &'static TestPool,
    control: Control<'static, MockBus>,
    tx: Option<TxRunner<'static, MockBus, D>>,
    rx: Option<RxRunner<'static, MockBus>>,
}

fn make_rig<D: DmaChannel<MockBus> + 'static>(mode: TransferMode<D>, config: Config) -> Rig<D> {
    let fifo = Rc::new(RefCell::new(FifoState::default()));
    let bus = MockBus::Fifo(fifo.clone());
    let ctrl = MockBus::Plain(Rc::new(RefCell::new(HashMap::new())));

    let pool: &'static TestPool = Box::leak(Box::new(TestPool::new()));
    let info: &'static Info = Box::leak(Box::new(Info::new()));
    let link: &'static TestLink = Box::leak(Box::new(TestLink::new()));

    let driver = Driver::new(bus.clone(), ctrl, pool, info, mode, config);
    let (control, tx, rx) = driver.start(Link::new(link));

    Rig {
        executor: LocalPool::new(),
        bus,
        fifo,
        info,
        link,
        pool,
        control,
        tx: Some(tx),
        rx: Some(rx),
    }
}

impl<D: DmaChannel<MockBus> + 'static> Rig<D> {
    fn spawn_tx(&mut self) {
        let tx = Box::leak(Box::new(self.tx.take().unwrap()));
        self.executor
            .spawner()
            .spawn_local_obj(Box::new(async move { tx.run().await; }).into())
            .unwrap();
    }

    fn spawn_rx(&mut self) {
        let rx = Box::leak(Box::new(self.rx.take().unwrap()));
        self.executor
            .spawner()
            .spawn_local_obj(Box::new(async move { rx.run().await; }).into())
            .unwrap();
    }

    /// Raises interrupt bits, services the interrupt and lets tasks run.
    fn kick(&mut self, events: IrqStatus) {
        self.fifo.borrow_mut().isr |= events.into_bits();
        self.info.on_interrupt(&self.bus);
        self.executor.run_until_stalled();
    }
}

fn frame_desc(pool: &'static TestPool, len: usize) -> Descriptor {
    let mut desc = pool.alloc().unwrap();
    for (i, byte) in desc.data_mut()[..len].iter_mut().enumerate() {
        *byte = i as u8;
    }
    desc.used = len as u16;
    desc
}

#[test]
fn test_tx_pio_vacancy_suspend() {
    let mut rig = make_rig(TransferMode::<NoDma>::Pio, Config::default());
    rig.fifo.borrow_mut().tdfv = 2;

    // 18 bytes round up to 5 words.
    rig.link.push_tx(frame_desc(rig.pool, 18));
    rig.spawn_tx();
    rig.executor.run_until_stalled();

    // Two words fit, then the writer parks on vacancy.
    {
        let fifo = rig.fifo.borrow();
        assert_eq!(fifo.tdfd, [0x0302_0100, 0x0706_0504]);
        assert!(fifo.tlr.is_empty());
    }
    let stats = rig.control.tx_stats();
    assert_eq!((stats.starts, stats.chunks), (1, 1));

    // Vacancy returns; the rest of the frame and the length go out.
    rig.fifo.borrow_mut().tdfv = 8;
    rig.kick(IrqStatus::TFPE);
    {
        let fifo = rig.fifo.borrow();
        assert_eq!(fifo.tdfd.len(), 5);
        // The tail word is zero-padded.
        assert_eq!(*fifo.tdfd.last().unwrap(), 0x0000_1110);
        assert_eq!(fifo.tlr, [18]);
    }
    assert_eq!(rig.control.tx_stats().chunks, 2);
    assert!(rig.link.take_completed().is_empty());

    rig.kick(IrqStatus::TC);
    assert_eq!(rig.link.take_completed().len(), 1);
    let stats = rig.control.tx_stats();
    assert_eq!((stats.completes, stats.errors, stats.resets), (1, 0, 0));
}

#[test]
fn test_tx_dest_register() {
    let mut config = Config::default();
    config.use_dest_reg = true;
    let mut rig = make_rig(TransferMode::<NoDma>::Pio, config);
    rig.fifo.borrow_mut().tdfv = 16;

    let mut desc = frame_desc(rig.pool, 12);
    desc.route = Some(0x00e9);
    rig.link.push_tx(desc);
    rig.spawn_tx();
    rig.executor.run_until_stalled();

    assert_eq!(rig.fifo.borrow().tdr, Some(0x00e9));
    rig.kick(IrqStatus::TC);
    assert_eq!(rig.link.take_completed().len(), 1);
}

#[test]
fn test_tx_dma_timeout_resets_and_retransmits() {
    let mut config = Config::default();
    config.dma_timeout = Duration::from_millis(10);
    let mut rig = make_rig(TransferMode::Dma(MockDma { stall_once: true }), config);
    rig.fifo.borrow_mut().tdfv = 16;

    rig.link.push_tx(frame_desc(rig.pool, 8));
    rig.spawn_tx();
    rig.executor.run_until_stalled();

    // The engine stalls; nothing reaches the data window.
    assert!(rig.fifo.borrow().tdfd.is_empty());

    // The timeout fires, the direction resets, the frame goes out again.
    MockDriver::get().advance(Duration::from_millis(11));
    rig.executor.run_until_stalled();
    rig.kick(IrqStatus::NONE);
    {
        let fifo = rig.fifo.borrow();
        // One strobe from start, one from the fault.
        assert_eq!(fifo.tdfr_strobes, 2);
        assert_eq!(fifo.tdfd, [0x0302_0100, 0x0706_0504]);
        assert_eq!(fifo.tlr, [8]);
    }
    let stats = rig.control.tx_stats();
    assert_eq!((stats.starts, stats.timeouts, stats.resets), (2, 1, 1));

    rig.kick(IrqStatus::TC);
    assert_eq!(rig.link.take_completed().len(), 1);
    assert_eq!(rig.control.tx_stats().completes, 1);
}

#[test]
fn test_rx_chunked_assembly() {
    let mut rig = make_rig(TransferMode::<NoDma>::Pio, Config::default());
    rig.spawn_rx();
    rig.executor.run_until_stalled();

    // First chunk: 8 bytes of a frame still arriving.
    {
        let mut fifo = rig.fifo.borrow_mut();
        fifo.rlr.push_back(RLR_PARTIAL | 8);
        fifo.rdfd.extend([0x0302_0100, 0x0706_0504]);
    }
    rig.kick(IrqStatus::RC);
    assert!(rig.link.take_delivered().is_empty());

    // Final chunk completes the frame.
    {
        let mut fifo = rig.fifo.borrow_mut();
        fifo.rlr.push_back(4);
        fifo.rdfd.push_back(0x0b0a_0908);
    }
    rig.kick(IrqStatus::RC);

    let delivered = rig.link.take_delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].used, 12);
    let expected: Vec<u8> = (0u8..12).collect();
    assert_eq!(delivered[0].frame(), expected.as_slice());

    let stats = rig.control.rx_stats();
    assert_eq!((stats.starts, stats.chunks, stats.completes), (1, 2, 1));
}

#[test]
fn test_rx_backpressure_flush() {
    let mut rig = make_rig(TransferMode::<NoDma>::Pio, Config::default());
    rig.spawn_rx();
    rig.executor.run_until_stalled();

    let held: Vec<Descriptor> = (0..POOL_SIZE).map(|_| rig.pool.alloc().unwrap()).collect();

    // A 10-byte frame with no descriptor left: exactly 3 words flushed.
    {
        let mut fifo = rig.fifo.borrow_mut();
        fifo.rlr.push_back(10);
        fifo.rdfd.extend([0x1111_1111, 0x2222_2222, 0x3333_3333]);
    }
    rig.kick(IrqStatus::RC);
    assert!(rig.link.take_delivered().is_empty());
    assert!(rig.fifo.borrow().rdfd.is_empty());
    let stats = rig.control.rx_stats();
    assert_eq!((stats.starts, stats.completes), (1, 0));

    // With the pool refilled the next frame arrives normally.
    for desc in held {
        rig.pool.free(desc);
    }
    {
        let mut fifo = rig.fifo.borrow_mut();
        fifo.rlr.push_back(4);
        fifo.rdfd.push_back(0x4444_4444);
    }
    rig.kick(IrqStatus::RC);
    let delivered = rig.link.take_delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].frame(), &0x4444_4444u32.to_le_bytes()[..]);
}

#[test]
fn test_rx_spurious_interrupt_resets() {
    let mut rig = make_rig(TransferMode::<NoDma>::Pio, Config::default());
    rig.spawn_rx();
    rig.executor.run_until_stalled();

    // RC with an empty FIFO twice over; each one is an error and a reset,
    // and the driver comes back for more.
    for round in 1..=2u32 {
        rig.kick(IrqStatus::RC);
        rig.kick(IrqStatus::NONE);
        let stats = rig.control.rx_stats();
        assert_eq!((stats.errors, stats.resets), (round, round));
        // One strobe from start plus one per round.
        assert_eq!(rig.fifo.borrow().rdfr_strobes, 1 + round);
    }
    assert!(rig.link.take_delivered().is_empty());
}

#[test]
fn test_control_block() {
    let ctrl_regs = Rc::new(RefCell::new(HashMap::new()));
    let fifo = Rc::new(RefCell::new(FifoState::default()));
    let bus = MockBus::Fifo(fifo.clone());
    let ctrl = MockBus::Plain(ctrl_regs.clone());

    let pool: &'static TestPool = Box::leak(Box::new(TestPool::new()));
    let info: &'static Info = Box::leak(Box::new(Info::new()));
    let link: &'static TestLink = Box::leak(Box::new(TestLink::new()));

    let driver = Driver::new(
        bus,
        ctrl,
        pool,
        info,
        TransferMode::<NoDma>::Pio,
        Config::default(),
    );
    let (mut control, _tx, _rx) = driver.start(Link::new(link));

    assert!(!control.link_ok());
    ctrl_regs
        .borrow_mut()
        .insert(riolink_axi::regs::ctrl::LSR, 1);
    assert!(control.link_ok());

    control.set_loopback(LoopbackMode::Digital);
    assert_eq!(ctrl_regs.borrow()[&riolink_axi::regs::ctrl::LCR], 0b010);
    control.set_loopback(LoopbackMode::Serial);
    assert_eq!(ctrl_regs.borrow()[&riolink_axi::regs::ctrl::LCR], 0b100);
    // A link reset strobe leaves the mode bits alone.
    control.link_reset();
    assert_eq!(ctrl_regs.borrow()[&riolink_axi::regs::ctrl::LCR], 0b100);

    control.set_tx_drive(0x1f);
    control.set_tx_precursor(0x08);
    control.set_tx_postcursor(0x0c);
    control.set_rx_equalizer(true);
    assert_eq!(
        ctrl_regs.borrow()[&riolink_axi::regs::ctrl::TCR],
        (1 << 24) | (0x0c << 16) | (0x08 << 8) | 0x1f
    );

    control.core_reset();
    assert_eq!(fifo.borrow().srr_writes, 1);
}

#[test]
fn test_no_dma_fails_without_moving_data() {
    let reg_file = Rc::new(RefCell::new(HashMap::new()));
    let bus = MockBus::Plain(reg_file.clone());
    let mut executor = LocalPool::new();
    let mut dma = NoDma;

    assert_eq!(
        executor.run_until(dma.push(&bus, regs::TDFD, &[0x11; 8])),
        Err(DmaError)
    );
    let mut body = [0u8; 8];
    assert_eq!(
        executor.run_until(dma.pull(&bus, regs::RDFD, &mut body)),
        Err(DmaError)
    );
    assert!(reg_file.borrow().is_empty());
}

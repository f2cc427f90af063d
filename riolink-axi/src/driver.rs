use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::with_timeout;

use riolink_driver::link::{Link, RxSink, TxDone, TxSource};
use riolink_driver::pool::{Descriptor, Pool, DATA_SIZE};
use riolink_driver::time::Duration;

use crate::bus::FifoBus;
use crate::config::Config;
use crate::control::Control;
use crate::dma::{DmaChannel, TransferMode};
use crate::regs::{self, IrqStatus};

const TX_EVENT_MASK: IrqStatus = IrqStatus::TC
    .union(IrqStatus::TSE)
    .union(IrqStatus::TRC)
    .union(IrqStatus::TFPF)
    .union(IrqStatus::TFPE)
    .union(IrqStatus::TPOE);

const RX_EVENT_MASK: IrqStatus = IrqStatus::RC
    .union(IrqStatus::RRC)
    .union(IrqStatus::RFPF)
    .union(IrqStatus::RFPE)
    .union(IrqStatus::RPUE)
    .union(IrqStatus::RPORE)
    .union(IrqStatus::RPURE);

const RX_FAULTS: IrqStatus = IrqStatus::RPUE
    .union(IrqStatus::RPORE)
    .union(IrqStatus::RPURE);

const TX_DONE: IrqStatus = IrqStatus::TC.union(IrqStatus::TSE).union(IrqStatus::TPOE);

/// Interrupt events the driver arms at start.
const IER_VALUE: IrqStatus = IrqStatus::TC
    .union(IrqStatus::TSE)
    .union(IrqStatus::TPOE)
    .union(IrqStatus::TFPE)
    .union(IrqStatus::TRC)
    .union(IrqStatus::RC)
    .union(IrqStatus::RFPF)
    .union(IrqStatus::RRC)
    .union(IrqStatus::RPUE)
    .union(IrqStatus::RPORE)
    .union(IrqStatus::RPURE);

/// Bound on a directional reset completing.
const RESET_TIMEOUT: Duration = Duration::from_millis(1);

/// Per-direction transfer statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DirStats {
    /// Frame transfers begun (retransmissions included).
    pub starts: u32,
    /// FIFO data window bursts.
    pub chunks: u32,
    /// Frame transfers finished.
    pub completes: u32,
    /// Transfers abandoned on timeout.
    pub timeouts: u32,
    /// Hardware faults and spurious interrupts.
    pub errors: u32,
    /// Directional FIFO resets issued.
    pub resets: u32,
}

struct State {
    tx_events: IrqStatus,
    rx_events: IrqStatus,
    tx_waker: WakerRegistration,
    rx_waker: WakerRegistration,
    tx_stats: DirStats,
    rx_stats: DirStats,
}

/// Shared interrupt plumbing.
///
/// Keep one per FIFO block in a `static` and call [`Info::on_interrupt`]
/// from the block's interrupt handler.
pub struct Info {
    state: Mutex<CriticalSectionRawMutex, RefCell<State>>,
}

impl Info {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                tx_events: IrqStatus::NONE,
                rx_events: IrqStatus::NONE,
                tx_waker: WakerRegistration::new(),
                rx_waker: WakerRegistration::new(),
                tx_stats: DirStats {
                    starts: 0,
                    chunks: 0,
                    completes: 0,
                    timeouts: 0,
                    errors: 0,
                    resets: 0,
                },
                rx_stats: DirStats {
                    starts: 0,
                    chunks: 0,
                    completes: 0,
                    timeouts: 0,
                    errors: 0,
                    resets: 0,
                },
            })),
        }
    }

    /// Reads and acknowledges the interrupt status, then wakes the runners
    /// the events belong to. Call from the FIFO interrupt handler.
    pub fn on_interrupt<B: FifoBus>(&self, bus: &B) {
        let isr = IrqStatus::from_bits(bus.read(regs::ISR));
        if isr.is_empty() {
            return;
        }
        // Write-one-to-clear.
        bus.write(regs::ISR, isr.into_bits());
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let tx = isr & TX_EVENT_MASK;
            if !tx.is_empty() {
                s.tx_events |= tx;
                s.tx_waker.wake();
            }
            let rx = isr & RX_EVENT_MASK;
            if !rx.is_empty() {
                s.rx_events |= rx;
                s.rx_waker.wake();
            }
        });
    }

    pub fn tx_stats(&self) -> DirStats {
        self.state.lock(|s| s.borrow().tx_stats)
    }

    pub fn rx_stats(&self) -> DirStats {
        self.state.lock(|s| s.borrow().rx_stats)
    }

    fn note_tx(&self, f: impl FnOnce(&mut DirStats)) {
        self.state.lock(|s| f(&mut s.borrow_mut().tx_stats));
    }

    fn note_rx(&self, f: impl FnOnce(&mut DirStats)) {
        self.state.lock(|s| f(&mut s.borrow_mut().rx_stats));
    }

    /// Clears and returns any accumulated TX events in `mask`.
    fn take_tx(&self, mask: IrqStatus) -> IrqStatus {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let hit = s.tx_events & mask;
            s.tx_events &= !mask;
            hit
        })
    }

    fn poll_tx(&self, mask: IrqStatus, cx: &mut Context<'_>) -> Poll<IrqStatus> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let hit = s.tx_events & mask;
            if hit.is_empty() {
                s.tx_waker.register(cx.waker());
                Poll::Pending
            } else {
                s.tx_events &= !mask;
                Poll::Ready(hit)
            }
        })
    }

    async fn wait_tx(&self, mask: IrqStatus) -> IrqStatus {
        poll_fn(|cx| self.poll_tx(mask, cx)).await
    }

    fn poll_rx(&self, mask: IrqStatus, cx: &mut Context<'_>) -> Poll<IrqStatus> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let hit = s.rx_events & mask;
            if hit.is_empty() {
                s.rx_waker.register(cx.waker());
                Poll::Pending
            } else {
                s.rx_events &= !mask;
                Poll::Ready(hit)
            }
        })
    }

    async fn wait_rx(&self, mask: IrqStatus) -> IrqStatus {
        poll_fn(|cx| self.poll_rx(mask, cx)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum TxFault {
    Timeout,
    Hardware,
}

pub struct Driver<'a, B: FifoBus, D: DmaChannel<B>> {
    fifo: B,
    ctrl: B,
    pool: &'a (dyn Pool + Sync),
    info: &'a Info,
    mode: TransferMode<D>,
    config: Config,
}

impl<'a, B: FifoBus, D: DmaChannel<B>> Driver<'a, B, D> {
    /// Creates the driver. The FIFO stays quiet until [`Driver::start`].
    pub fn new(
        fifo: B,
        ctrl: B,
        pool: &'a (dyn Pool + Sync),
        info: &'a Info,
        mode: TransferMode<D>,
        config: Config,
    ) -> Self {
        Self {
            fifo,
            ctrl,
            pool,
            info,
            mode,
            config,
        }
    }

    /// Binds to the link and brings the FIFO up.
    ///
    /// Run the produced runners for proper operation.
    pub fn start(self, link: Link<'a>) -> (Control<'a, B>, TxRunner<'a, B, D>, RxRunner<'a, B>) {
        // Drop whatever status a previous life left behind, then put both
        // directions into a known state.
        self.fifo.write(regs::ISR, u32::MAX);
        self.fifo.write(regs::TDFR, regs::RESET_KEY);
        self.fifo.write(regs::RDFR, regs::RESET_KEY);
        self.fifo.write(regs::IER, IER_VALUE.into_bits());

        let (source, done, sink) = link.split();
        let control = Control::new(self.fifo.clone(), self.ctrl, self.info);
        let tx_runner = TxRunner {
            bus: self.fifo.clone(),
            info: self.info,
            source,
            done,
            mode: self.mode,
            config: self.config,
        };
        let rx_runner = RxRunner {
            bus: self.fifo,
            info: self.info,
            pool: self.pool,
            sink,
            use_dest_reg: self.config.use_dest_reg,
            drops: 0,
        };
        (control, tx_runner, rx_runner)
    }
}

/// Frame transmitting task.
///
/// Run for proper driver operation.
pub struct TxRunner<'a, B: FifoBus, D: DmaChannel<B>> {
    bus: B,
    info: &'a Info,
    source: TxSource<'a>,
    done: TxDone<'a>,
    mode: TransferMode<D>,
    config: Config,
}

impl<'a, B: FifoBus, D: DmaChannel<B>> TxRunner<'a, B, D> {
    pub async fn run(&mut self) -> ! {
        loop {
            let mut desc = self.source.pop().await;
            loop {
                self.info.note_tx(|s| s.starts += 1);
                match self.transfer(&mut desc).await {
                    Ok(()) => {
                        self.info.note_tx(|s| s.completes += 1);
                        break;
                    }
                    Err(fault) => {
                        warn!("tx: {:?}, resetting and retransmitting", fault);
                        self.info.note_tx(|s| match fault {
                            TxFault::Timeout => s.timeouts += 1,
                            TxFault::Hardware => s.errors += 1,
                        });
                        self.reset_tx().await;
                        desc.offs = 0;
                    }
                }
            }
            self.done.complete(desc);
        }
    }

    async fn transfer(&mut self, desc: &mut Descriptor) -> Result<(), TxFault> {
        // Stale completion status belongs to a frame already accounted for.
        let _ = self.info.take_tx(TX_DONE);

        match &mut self.mode {
            TransferMode::Pio => {
                Self::push_pio(&self.bus, self.info, desc).await?;
            }
            TransferMode::Dma(dma) => {
                self.info.note_tx(|s| s.chunks += 1);
                match with_timeout(
                    self.config.dma_timeout,
                    dma.push(&self.bus, regs::TDFD, desc.frame()),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(TxFault::Hardware),
                    Err(_) => return Err(TxFault::Timeout),
                }
            }
        }

        if self.config.use_dest_reg {
            if let Some(route) = desc.route {
                self.bus.write(regs::TDR, route as u32);
            }
        }
        // Writing the length launches the frame.
        self.bus.write(regs::TLR, desc.used as u32);

        let events = match &self.mode {
            TransferMode::Pio => self.info.wait_tx(TX_DONE).await,
            TransferMode::Dma(_) => with_timeout(self.config.dma_timeout, self.info.wait_tx(TX_DONE))
                .await
                .map_err(|_| TxFault::Timeout)?,
        };
        if events.intersects(IrqStatus::TSE.union(IrqStatus::TPOE)) {
            return Err(TxFault::Hardware);
        }
        Ok(())
    }

    /// Writes the frame body into the data window, suspending whenever the
    /// FIFO runs out of vacancy.
    async fn push_pio(bus: &B, info: &Info, desc: &mut Descriptor) -> Result<(), TxFault> {
        let total = desc.used as usize;
        while (desc.offs as usize) < total {
            let vacancy = bus.read(regs::TDFV) as usize;
            if vacancy == 0 {
                let events = info
                    .wait_tx(IrqStatus::TFPE.union(IrqStatus::TPOE))
                    .await;
                if events.intersects(IrqStatus::TPOE) {
                    return Err(TxFault::Hardware);
                }
                continue;
            }
            info.note_tx(|s| s.chunks += 1);
            let frame = desc.frame();
            let mut offs = desc.offs as usize;
            for _ in 0..vacancy {
                if offs >= total {
                    break;
                }
                let end = (offs + 4).min(total);
                let mut word = [0u8; 4];
                word[..end - offs].copy_from_slice(&frame[offs..end]);
                bus.write(regs::TDFD, u32::from_le_bytes(word));
                offs = end;
            }
            desc.offs = offs as u16;
        }
        Ok(())
    }

    async fn reset_tx(&mut self) {
        let ier = self.bus.read(regs::IER);
        self.bus.write(regs::IER, IrqStatus::TRC.into_bits());
        self.bus.write(regs::TDFR, regs::RESET_KEY);
        if with_timeout(RESET_TIMEOUT, self.info.wait_tx(IrqStatus::TRC))
            .await
            .is_err()
        {
            warn!("tx: reset did not complete");
        }
        self.bus.write(regs::IER, ier);
        self.info.note_tx(|s| s.resets += 1);
    }
}

/// Frame receiving task.
///
/// Run for proper driver operation. Delivery to the stack runs inline in
/// this task's context.
pub struct RxRunner<'a, B: FifoBus> {
    bus: B,
    info: &'a Info,
    pool: &'a (dyn Pool + Sync),
    sink: RxSink<'a>,
    use_dest_reg: bool,
    drops: u32,
}

impl<'a, B: FifoBus> RxRunner<'a, B> {
    pub async fn run(&mut self) -> ! {
        loop {
            let events = self
                .info
                .wait_rx(IrqStatus::RC.union(IrqStatus::RFPF).union(RX_FAULTS))
                .await;
            if events.intersects(RX_FAULTS) {
                warn!("rx: hardware fault {:?}", events);
                self.info.note_rx(|s| s.errors += 1);
                self.reset_rx().await;
                continue;
            }
            let mut drained = false;
            while self.bus.read(regs::RDFO) != 0 {
                drained = true;
                self.receive_frame().await;
            }
            if !drained {
                // An RX interrupt with nothing readable means the FIFO state
                // machine and ours disagree.
                self.info.note_rx(|s| s.errors += 1);
                self.reset_rx().await;
            }
        }
    }

    /// Reads one frame chunk by chunk. With the pool exhausted the frame is
    /// flushed word-accurately so the FIFO stays frame-aligned.
    async fn receive_frame(&mut self) {
        if self.use_dest_reg {
            let _ = self.bus.read(regs::RDR);
        }
        let mut desc = self.pool.alloc();
        if desc.is_none() {
            self.drops += 1;
            if self.drops % 64 == 1 {
                warn!("rx: pool empty, dropping inbound frames ({} so far)", self.drops);
            }
        }
        self.info.note_rx(|s| s.starts += 1);

        let mut used = 0usize;
        loop {
            let (bytes, partial) = regs::rlr_fields(self.bus.read(regs::RLR));
            let bytes = bytes as usize;
            let words = bytes.div_ceil(4);
            self.info.note_rx(|s| s.chunks += 1);
            match desc.as_mut() {
                Some(d) => {
                    let chunk_end = (used + bytes).min(DATA_SIZE);
                    let mut offs = used;
                    for _ in 0..words {
                        let word = self.bus.read(regs::RDFD).to_le_bytes();
                        let end = (offs + 4).min(chunk_end);
                        if offs < end {
                            d.data_mut()[offs..end].copy_from_slice(&word[..end - offs]);
                        }
                        offs += 4;
                    }
                    used = chunk_end;
                }
                None => {
                    for _ in 0..words {
                        let _ = self.bus.read(regs::RDFD);
                    }
                }
            }
            if !partial {
                break;
            }
            // The rest of the frame is announced by another interrupt.
            let events = self
                .info
                .wait_rx(IrqStatus::RC.union(IrqStatus::RFPF).union(RX_FAULTS))
                .await;
            if events.intersects(RX_FAULTS) {
                if let Some(d) = desc.take() {
                    self.pool.free(d);
                }
                self.info.note_rx(|s| s.errors += 1);
                self.reset_rx().await;
                return;
            }
        }

        if let Some(mut d) = desc {
            d.used = used as u16;
            self.sink.deliver(d);
            self.info.note_rx(|s| s.completes += 1);
        }
    }

    async fn reset_rx(&mut self) {
        let ier = self.bus.read(regs::IER);
        self.bus.write(regs::IER, IrqStatus::RRC.into_bits());
        self.bus.write(regs::RDFR, regs::RESET_KEY);
        if with_timeout(RESET_TIMEOUT, self.info.wait_rx(IrqStatus::RRC))
            .await
            .is_err()
        {
            warn!("rx: reset did not complete");
        }
        self.bus.write(regs::IER, ier);
        self.info.note_rx(|s| s.resets += 1);
    }
}

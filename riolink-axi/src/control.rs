use crate::bus::FifoBus;
use crate::config::LoopbackMode;
use crate::driver::{DirStats, Info};
use crate::regs::{self, ctrl};

/// Out-of-band interface control.
///
/// Whole-interface reset, SRIO link management, transceiver tuning and the
/// transfer statistics. Everything here is a plain register access; no
/// background task is needed.
pub struct Control<'a, B: FifoBus> {
    fifo: B,
    ctrl: B,
    info: &'a Info,
}

impl<'a, B: FifoBus> Control<'a, B> {
    pub(crate) fn new(fifo: B, ctrl: B, info: &'a Info) -> Self {
        Self { fifo, ctrl, info }
    }

    /// Resets the whole FIFO core, both data paths included.
    pub fn core_reset(&mut self) {
        self.fifo.write(regs::SRR, regs::RESET_KEY);
    }

    /// True when the SRIO link is trained and up.
    pub fn link_ok(&self) -> bool {
        self.ctrl.read(ctrl::LSR) & ctrl::LSR_LINK_OK != 0
    }

    /// Strobes an SRIO link reset. The link retrains afterwards.
    pub fn link_reset(&mut self) {
        self.ctrl
            .modify(ctrl::LCR, |v| v | ctrl::LCR_LINK_RESET);
        self.ctrl
            .modify(ctrl::LCR, |v| v & !ctrl::LCR_LINK_RESET);
    }

    pub fn set_loopback(&mut self, mode: LoopbackMode) {
        self.ctrl.modify(ctrl::LCR, |v| {
            (v & !ctrl::LCR_LOOPBACK_MASK) | (mode.into_bits() << ctrl::LCR_LOOPBACK_SHIFT)
        });
    }

    pub fn set_tx_drive(&mut self, drive: u8) {
        self.ctrl.modify(ctrl::TCR, |v| {
            (v & !(0xff << ctrl::TCR_DRIVE_SHIFT)) | ((drive as u32) << ctrl::TCR_DRIVE_SHIFT)
        });
    }

    pub fn set_tx_precursor(&mut self, precursor: u8) {
        self.ctrl.modify(ctrl::TCR, |v| {
            (v & !(0xff << ctrl::TCR_PRECURSOR_SHIFT))
                | ((precursor as u32) << ctrl::TCR_PRECURSOR_SHIFT)
        });
    }

    pub fn set_tx_postcursor(&mut self, postcursor: u8) {
        self.ctrl.modify(ctrl::TCR, |v| {
            (v & !(0xff << ctrl::TCR_POSTCURSOR_SHIFT))
                | ((postcursor as u32) << ctrl::TCR_POSTCURSOR_SHIFT)
        });
    }

    pub fn set_rx_equalizer(&mut self, enabled: bool) {
        self.ctrl.modify(ctrl::TCR, |v| {
            if enabled {
                v | ctrl::TCR_RXEQ
            } else {
                v & !ctrl::TCR_RXEQ
            }
        });
    }

    pub fn tx_stats(&self) -> DirStats {
        self.info.tx_stats()
    }

    pub fn rx_stats(&self) -> DirStats {
        self.info.rx_stats()
    }
}

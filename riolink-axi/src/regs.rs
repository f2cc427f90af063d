//! AXI4-stream FIFO and SRIO control register maps

/// Interrupt status, write-one-to-clear.
pub const ISR: usize = 0x00;
/// Interrupt enable.
pub const IER: usize = 0x04;
/// TX FIFO reset, takes [`RESET_KEY`].
pub const TDFR: usize = 0x08;
/// TX FIFO vacancy in words.
pub const TDFV: usize = 0x0c;
/// TX data window.
pub const TDFD: usize = 0x10;
/// TX length; writing it launches the frame.
pub const TLR: usize = 0x14;
/// RX FIFO reset, takes [`RESET_KEY`].
pub const RDFR: usize = 0x18;
/// RX FIFO occupancy in words.
pub const RDFO: usize = 0x1c;
/// RX data window.
pub const RDFD: usize = 0x20;
/// RX length of the readable chunk.
pub const RLR: usize = 0x24;
/// Whole-interface reset, takes [`RESET_KEY`].
pub const SRR: usize = 0x28;
/// TX destination register.
pub const TDR: usize = 0x2c;
/// RX destination register.
pub const RDR: usize = 0x30;

/// Unlock value for the TDFR/RDFR/SRR reset registers.
pub const RESET_KEY: u32 = 0xa5;

const RLR_PARTIAL: u32 = 1 << 31;
const RLR_BYTES_MASK: u32 = 0x003f_ffff;

/// Splits an RLR read into (readable bytes, partial flag). The partial flag
/// means the frame is still arriving and more chunks follow.
pub const fn rlr_fields(raw: u32) -> (u32, bool) {
    (raw & RLR_BYTES_MASK, raw & RLR_PARTIAL != 0)
}

/// Set of interrupt event bits as laid out in ISR/IER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqStatus(u32);

impl IrqStatus {
    pub const NONE: IrqStatus = IrqStatus(0);

    /// RX partial underrun: RLR read while no partial chunk was ready.
    pub const RPURE: IrqStatus = IrqStatus(1 << 31);
    /// RX overrun.
    pub const RPORE: IrqStatus = IrqStatus(1 << 30);
    /// RX underrun: RDFD read past the frame.
    pub const RPUE: IrqStatus = IrqStatus(1 << 29);
    /// TX overrun: TDFD write with no vacancy.
    pub const TPOE: IrqStatus = IrqStatus(1 << 28);
    /// TX complete.
    pub const TC: IrqStatus = IrqStatus(1 << 27);
    /// RX complete: a frame (or chunk) became readable.
    pub const RC: IrqStatus = IrqStatus(1 << 26);
    /// TX size error: TLR value impossible for the FIFO.
    pub const TSE: IrqStatus = IrqStatus(1 << 25);
    /// TX reset complete.
    pub const TRC: IrqStatus = IrqStatus(1 << 24);
    /// RX reset complete.
    pub const RRC: IrqStatus = IrqStatus(1 << 23);
    /// TX FIFO programmable full.
    pub const TFPF: IrqStatus = IrqStatus(1 << 22);
    /// TX FIFO programmable empty: vacancy is back.
    pub const TFPE: IrqStatus = IrqStatus(1 << 21);
    /// RX FIFO programmable full.
    pub const RFPF: IrqStatus = IrqStatus(1 << 20);
    /// RX FIFO programmable empty.
    pub const RFPE: IrqStatus = IrqStatus(1 << 19);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: IrqStatus) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: IrqStatus) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::ops::BitOr for IrqStatus {
    type Output = IrqStatus;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for IrqStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for IrqStatus {
    type Output = IrqStatus;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::BitAndAssign for IrqStatus {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl core::ops::Not for IrqStatus {
    type Output = IrqStatus;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// SRIO control block, at its own base address.
pub mod ctrl {
    /// Link control: reset strobe and loopback mode.
    pub const LCR: usize = 0x00;
    /// Link status.
    pub const LSR: usize = 0x04;
    /// Transceiver tuning.
    pub const TCR: usize = 0x08;

    pub const LCR_LINK_RESET: u32 = 1 << 0;
    pub const LCR_LOOPBACK_MASK: u32 = 0x3 << 1;
    pub const LCR_LOOPBACK_SHIFT: u32 = 1;

    pub const LSR_LINK_OK: u32 = 1 << 0;

    pub const TCR_DRIVE_SHIFT: u32 = 0;
    pub const TCR_PRECURSOR_SHIFT: u32 = 8;
    pub const TCR_POSTCURSOR_SHIFT: u32 = 16;
    pub const TCR_RXEQ: u32 = 1 << 24;
}

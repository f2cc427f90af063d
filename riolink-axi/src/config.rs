use riolink_driver::time::Duration;

/// Driver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Bound on a DMA body transfer and the completion wait. Expiry resets
    /// the direction and retransmits the frame.
    pub dma_timeout: Duration,
    /// Program the destination registers (TDR/RDR) around each frame. Leave
    /// off for FIFO configurations without them.
    pub use_dest_reg: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dma_timeout: Duration::from_secs(1),
            use_dest_reg: false,
        }
    }
}

/// Loopback point of the SRIO link, set through [`Control`](crate::Control).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopbackMode {
    /// Normal operation.
    None,
    /// Loop before the transceiver; frames never leave the FPGA.
    Digital,
    /// Loop at the serial pins.
    Serial,
}

impl LoopbackMode {
    pub(crate) const fn into_bits(self) -> u32 {
        match self {
            LoopbackMode::None => 0,
            LoopbackMode::Digital => 1,
            LoopbackMode::Serial => 2,
        }
    }
}

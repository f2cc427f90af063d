//! DMA seam
//!
//! The FIFO data windows are single fixed addresses, so a board's DMA engine
//! only needs non-incrementing bulk word copies. Boards plug theirs in via
//! [`DmaChannel`]; without one the driver moves words itself (PIO).

use crate::bus::FifoBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaError;

/// Bulk word mover against a FIFO data window.
///
/// `data` lengths are rounded up to whole words by the implementation; the
/// pad bytes are don't-care.
pub trait DmaChannel<B: FifoBus> {
    async fn push(&mut self, bus: &B, offset: usize, data: &[u8]) -> Result<(), DmaError>;
    async fn pull(&mut self, bus: &B, offset: usize, data: &mut [u8]) -> Result<(), DmaError>;
}

/// Placeholder for PIO-only configurations. Fails every transfer, so a
/// `TransferMode::Dma(NoDma)` misconfiguration surfaces as DMA faults
/// instead of moving data.
pub struct NoDma;

impl<B: FifoBus> DmaChannel<B> for NoDma {
    async fn push(&mut self, _bus: &B, _offset: usize, _data: &[u8]) -> Result<(), DmaError> {
        Err(DmaError)
    }

    async fn pull(&mut self, _bus: &B, _offset: usize, _data: &mut [u8]) -> Result<(), DmaError> {
        Err(DmaError)
    }
}

/// How frame bodies cross the FIFO data windows.
pub enum TransferMode<D> {
    /// The runner tasks move words through TDFD/RDFD themselves.
    Pio,
    /// A board DMA engine moves the body.
    Dma(D),
}

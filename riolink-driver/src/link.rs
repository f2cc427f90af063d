//! Channels connecting driver and riolink stack

use core::future::poll_fn;

use crate::internal;
use crate::pool::Descriptor;

/// Producer of descriptors for transmission
///
/// Descriptors come out in submission order. The driver should keep exactly
/// one descriptor in flight: pop, transfer, then hand it to [`TxDone`] before
/// popping the next.
pub struct TxSource<'a>(&'a (dyn internal::DynamicTxSource + Sync));

impl<'a> TxSource<'a> {
    /// Asynchronously fetches the next outbound descriptor. Safe to drop.
    pub async fn pop(&mut self) -> Descriptor {
        poll_fn(|cx| self.0.poll_pop(cx)).await
    }
}

/// Consumer of transmitted descriptors
///
/// Never blocks. The stack enrolls the descriptor for acknowledgement
/// tracking or returns it to the pool.
pub struct TxDone<'a>(&'a (dyn internal::DynamicTxDone + Sync));

impl<'a> TxDone<'a> {
    pub fn complete(&mut self, desc: Descriptor) {
        self.0.complete(desc);
    }
}

/// Consumer of received descriptors
///
/// Never blocks, but classification and subscriber fan-out run inline in the
/// caller's context, so the driver should deliver from its own task rather
/// than an interrupt handler. The stack always recycles the descriptor.
pub struct RxSink<'a>(&'a (dyn internal::DynamicRxSink + Sync));

impl<'a> RxSink<'a> {
    pub fn deliver(&mut self, desc: Descriptor) {
        self.0.deliver(desc);
    }
}

/// Channel container. A driver should consume it.
pub struct Link<'a>(&'a (dyn internal::DynamicLink + Sync));

impl<'a> Link<'a> {
    pub fn new(access: &'a (dyn internal::DynamicLink + Sync)) -> Self {
        Self(access)
    }

    pub fn split(self) -> (TxSource<'a>, TxDone<'a>, RxSink<'a>) {
        (TxSource(self.0), TxDone(self.0), RxSink(self.0))
    }
}

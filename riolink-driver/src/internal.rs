/// Private interfaces for the riolink Node
///
/// Drivers should not use this module.
/// Backward-incompatible changes can be made without major version bump.
use core::task::{Context, Poll};

use crate::pool::Descriptor;

pub trait DynamicTxSource {
    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Descriptor>;
}

pub trait DynamicTxDone {
    fn complete(&self, desc: Descriptor);
}

pub trait DynamicRxSink {
    fn deliver(&self, desc: Descriptor);
}

pub trait DynamicLink: DynamicTxSource + DynamicTxDone + DynamicRxSink {}

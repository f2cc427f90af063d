//! TTL retry list for ack-requested transmissions
//!
//! A transmitted descriptor with an outstanding acknowledgement is enrolled
//! here until its RESPONSE arrives or its TTL runs out. Each scan tick
//! decrements every TTL; a survivor leaves the list to be retransmitted and
//! re-enrolls at the next TX completion, so a descriptor is always in exactly
//! one place: the TX queue, the driver, or this list.

use heapless::Vec;
use riolink_driver::frame::RespSig;
use riolink_driver::pool::Descriptor;

pub(crate) const RETRY_SLOTS: usize = 16;

pub(crate) struct RetryList {
    slots: [Option<Descriptor>; RETRY_SLOTS],
}

/// Descriptors a scan tick removed from the list.
pub(crate) struct TickOutcome {
    /// TTL still positive, to be requeued for retransmission.
    pub requeue: Vec<Descriptor, RETRY_SLOTS>,
    /// TTL exhausted, to be reported failed and freed.
    pub expired: Vec<Descriptor, RETRY_SLOTS>,
}

impl RetryList {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Enrolls a completed descriptor. The descriptor must carry `resp`.
    pub fn enroll(&mut self, desc: Descriptor) -> Result<(), Descriptor> {
        debug_assert!(desc.resp.is_some());
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(desc);
                Ok(())
            }
            None => Err(desc),
        }
    }

    /// Removes the one entry whose signature matches an inbound RESPONSE.
    pub fn take_match(&mut self, sig: RespSig) -> Option<Descriptor> {
        let slot = self.slots.iter_mut().find(|s| {
            s.as_ref()
                .and_then(|d| d.resp)
                .is_some_and(|r| r.sig == sig)
        })?;
        slot.take()
    }

    /// Decrements every TTL and empties the matching slots.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome {
            requeue: Vec::new(),
            expired: Vec::new(),
        };
        for slot in self.slots.iter_mut() {
            let Some(mut desc) = slot.take() else {
                continue;
            };
            let resp = unwrap!(desc.resp.as_mut());
            resp.ttl -= 1;
            if resp.ttl == 0 {
                unwrap!(outcome.expired.push(desc).ok());
            } else {
                unwrap!(outcome.requeue.push(desc).ok());
            }
        }
        outcome
    }

    /// Empties the list, e.g. on interface reset.
    pub fn drain(&mut self) -> Vec<Descriptor, RETRY_SLOTS> {
        let mut drained = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(desc) = slot.take() {
                unwrap!(drained.push(desc).ok());
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use riolink_core::DeviceAddr;
    use riolink_driver::frame::{HeaderKind, HelloHeader, RespSig};
    use riolink_driver::pool::{DescriptorPool, Pool, RespState};

    use super::*;

    fn doorbell(info: u16) -> HelloHeader {
        HelloHeader {
            dst: DeviceAddr::new(9).unwrap(),
            src: DeviceAddr::new(1).unwrap(),
            kind: HeaderKind::Doorbell { info },
            ack: true,
            prio: 4,
            seg_count: 0,
            size: 0,
        }
    }

    fn enrollable(pool: &dyn Pool, info: u16, ttl: u8) -> Descriptor {
        let mut desc = pool.alloc().unwrap();
        let sig = RespSig::of_request(&doorbell(info)).unwrap();
        desc.resp = Some(RespState { sig, ttl });
        desc
    }

    #[test]
    fn test_ttl_countdown() {
        let pool = DescriptorPool::<CriticalSectionRawMutex, 2>::new();
        let mut list = RetryList::new();

        list.enroll(enrollable(&pool, 1, 3)).unwrap();

        // Two ticks requeue, the third expires.
        for expected_ttl in [2, 1] {
            let outcome = list.tick();
            assert_eq!(outcome.requeue.len(), 1);
            assert!(outcome.expired.is_empty());
            let desc = outcome.requeue.into_iter().next().unwrap();
            assert_eq!(desc.resp.unwrap().ttl, expected_ttl);
            list.enroll(desc).unwrap();
        }
        let outcome = list.tick();
        assert!(outcome.requeue.is_empty());
        assert_eq!(outcome.expired.len(), 1);
        assert_eq!(list.len(), 0);

        for desc in outcome.expired {
            pool.free(desc);
        }
    }

    #[test]
    fn test_signature_match_removes_one() {
        let pool = DescriptorPool::<CriticalSectionRawMutex, 2>::new();
        let mut list = RetryList::new();

        list.enroll(enrollable(&pool, 1, 3)).unwrap();
        list.enroll(enrollable(&pool, 2, 3)).unwrap();

        let sig = RespSig::of_request(&doorbell(2)).unwrap();
        let taken = list.take_match(sig).unwrap();
        assert_eq!(taken.resp.unwrap().sig, sig);
        assert_eq!(list.len(), 1);

        // A duplicate response no longer matches anything.
        assert!(list.take_match(sig).is_none());

        pool.free(taken);
        for desc in list.drain() {
            pool.free(desc);
        }
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_full_list_rejects() {
        let pool = DescriptorPool::<CriticalSectionRawMutex, 32>::new();
        let mut list = RetryList::new();

        for info in 0..RETRY_SLOTS as u16 {
            list.enroll(enrollable(&pool, info, 1)).unwrap();
        }
        let overflow = list.enroll(enrollable(&pool, 99, 1)).unwrap_err();
        pool.free(overflow);

        for desc in list.drain() {
            pool.free(desc);
        }
    }
}

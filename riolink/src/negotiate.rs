//! Loopback address negotiation
//!
//! With the far end of the link looped back (digitally or through the serial
//! transceiver), a frame sent to an address we own comes straight back. The
//! prober walks a candidate range, sending a self-addressed MESSAGE to the
//! reserved probe mailbox with a random cookie; seeing the cookie echo back
//! proves the loop and binds the candidate as the local address.

use riolink_core::DeviceAddr;

use crate::time::Duration;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProbeConfig {
    /// First candidate address.
    pub min: u16,
    /// Last candidate address, inclusive.
    pub max: u16,
    /// Additional full sweeps of the range after the first.
    pub repeat: u8,
    /// Delay between probes.
    pub interval: Duration,
    /// Cookie PRNG seed; derive from a board serial so parallel links do not
    /// probe with identical cookies.
    pub seed: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 0xfe,
            repeat: 3,
            interval: Duration::from_millis(100),
            seed: 0x5eed_0001,
        }
    }
}

struct XorShift(u32);

impl XorShift {
    fn new(seed: u32) -> Self {
        // Xorshift has a fixed point at zero.
        Self(if seed == 0 { 0x6b8b_4567 } else { seed })
    }

    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}

enum AddrState {
    Unset,
    Probing,
    Bound(DeviceAddr),
}

pub(crate) enum ProbeAction {
    /// Not probing; nothing to do.
    Idle,
    /// Emit a probe for this candidate.
    Send { addr: DeviceAddr, cookie: u32 },
    /// Range and repeats exhausted; the node stays unbound.
    GiveUp,
}

pub(crate) struct Prober {
    config: ProbeConfig,
    state: AddrState,
    candidate: u16,
    sweeps_left: u8,
    outstanding: Option<(DeviceAddr, u32)>,
    rng: XorShift,
}

impl Prober {
    pub fn new(config: ProbeConfig, fixed: Option<DeviceAddr>) -> Self {
        let state = match fixed {
            Some(addr) => AddrState::Bound(addr),
            None => AddrState::Probing,
        };
        Self {
            config,
            state,
            candidate: config.min,
            sweeps_left: config.repeat,
            outstanding: None,
            rng: XorShift::new(config.seed),
        }
    }

    pub fn is_probing(&self) -> bool {
        matches!(self.state, AddrState::Probing)
    }

    pub fn local_addr(&self) -> DeviceAddr {
        match self.state {
            AddrState::Bound(addr) => addr,
            _ => DeviceAddr::UNSET,
        }
    }

    /// Binds directly, cancelling any probing in progress.
    pub fn bind(&mut self, addr: DeviceAddr) {
        self.state = AddrState::Bound(addr);
        self.outstanding = None;
    }

    /// Advances the probe state machine by one tick.
    pub fn next(&mut self) -> ProbeAction {
        if !self.is_probing() {
            return ProbeAction::Idle;
        }
        if self.candidate > self.config.max {
            if self.sweeps_left == 0 {
                self.state = AddrState::Unset;
                self.outstanding = None;
                return ProbeAction::GiveUp;
            }
            self.sweeps_left -= 1;
            self.candidate = self.config.min;
        }
        let Some(addr) = DeviceAddr::new(self.candidate) else {
            // Candidate range ran into the sentinel; nothing left to try.
            self.state = AddrState::Unset;
            self.outstanding = None;
            return ProbeAction::GiveUp;
        };
        let cookie = self.rng.next();
        self.outstanding = Some((addr, cookie));
        self.candidate += 1;
        ProbeAction::Send { addr, cookie }
    }

    /// Checks an echoed probe against the one outstanding. A match binds the
    /// candidate.
    pub fn check_echo(&mut self, addr: DeviceAddr, cookie: u32) -> bool {
        if self.is_probing() && self.outstanding == Some((addr, cookie)) {
            self.state = AddrState::Bound(addr);
            self.outstanding = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: u16, max: u16, repeat: u8) -> ProbeConfig {
        ProbeConfig {
            min,
            max,
            repeat,
            ..ProbeConfig::default()
        }
    }

    fn expect_send(prober: &mut Prober) -> (DeviceAddr, u32) {
        match prober.next() {
            ProbeAction::Send { addr, cookie } => (addr, cookie),
            _ => panic!("expected a probe"),
        }
    }

    #[test]
    fn test_sweep_and_recycle() {
        let mut prober = Prober::new(config(1, 3, 1), None);

        for expected in [1u16, 2, 3, 1, 2, 3] {
            let (addr, _) = expect_send(&mut prober);
            assert_eq!(addr.into_u16(), expected);
        }
        assert!(matches!(prober.next(), ProbeAction::GiveUp));
        assert!(prober.local_addr().is_unset());
        assert!(matches!(prober.next(), ProbeAction::Idle));
    }

    #[test]
    fn test_echo_binds() {
        let mut prober = Prober::new(config(1, 3, 1), None);

        let _ = expect_send(&mut prober);
        let (addr, cookie) = expect_send(&mut prober);

        // A stale or corrupt echo does not bind.
        assert!(!prober.check_echo(addr, cookie.wrapping_add(1)));
        assert!(!prober.check_echo(DeviceAddr::new(1).unwrap(), cookie));
        assert!(prober.is_probing());

        assert!(prober.check_echo(addr, cookie));
        assert_eq!(prober.local_addr(), addr);
        assert!(matches!(prober.next(), ProbeAction::Idle));
    }

    #[test]
    fn test_cookies_differ() {
        let mut prober = Prober::new(config(1, 1, 3), None);
        let (_, first) = expect_send(&mut prober);
        let (_, second) = expect_send(&mut prober);
        assert_ne!(first, second);
    }

    #[test]
    fn test_static_bind_skips_probing() {
        let addr = DeviceAddr::new(42).unwrap();
        let mut prober = Prober::new(ProbeConfig::default(), Some(addr));
        assert!(!prober.is_probing());
        assert_eq!(prober.local_addr(), addr);
        assert!(matches!(prober.next(), ProbeAction::Idle));
    }
}

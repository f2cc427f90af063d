//! SRIO transport core data types
//!
//! This crate provides basic data type definitions used by other Riolink crates.
//! Riolink users should not depend on this crate directly. Use `riolink::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Endpoint address on the RapidIO fabric.
///
/// Addresses are negotiated at runtime (or assigned statically). The all-ones
/// value is reserved as the "not yet negotiated" sentinel and never appears as
/// a valid endpoint address on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceAddr(u16);

impl DeviceAddr {
    const UNSET_VALUE: u16 = 0xffff;

    /// Sentinel carried by nodes that have not bound an address yet.
    pub const UNSET: DeviceAddr = DeviceAddr(Self::UNSET_VALUE);
    pub const MAX: DeviceAddr = DeviceAddr(Self::UNSET_VALUE - 1);

    pub const fn new(value: u16) -> Option<Self> {
        if value < Self::UNSET_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Reinterprets a wire field without validation. The sentinel passes
    /// through; use [`DeviceAddr::is_unset`] before trusting the value.
    pub const fn from_raw(value: u16) -> Self {
        Self(value)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }

    pub const fn is_unset(self) -> bool {
        self.0 == Self::UNSET_VALUE
    }
}

impl From<DeviceAddr> for u16 {
    fn from(value: DeviceAddr) -> Self {
        value.into_u16()
    }
}

impl From<DeviceAddr> for usize {
    fn from(value: DeviceAddr) -> Self {
        u16::from(value).into()
    }
}

impl TryFrom<u16> for DeviceAddr {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// HELLO frame type codes.
///
/// The numeric encoding matches the ftype field of the wire header; gaps are
/// codes the transport does not carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum MsgType {
    /// Streaming write to a target memory address. Never acknowledged.
    Swrite = 6,
    /// Data streaming channel frame, distinguished by stream id and class of
    /// service. Never acknowledged.
    Stream = 9,
    /// 16-bit doorbell notification, no payload.
    Doorbell = 10,
    /// Mailbox message, possibly segmented.
    Message = 11,
    /// Acknowledgement of an ack-requested frame.
    Response = 13,
}

impl MsgType {
    pub const fn from_u8(code: u8) -> Option<MsgType> {
        match code {
            6 => Some(MsgType::Swrite),
            9 => Some(MsgType::Stream),
            10 => Some(MsgType::Doorbell),
            11 => Some(MsgType::Message),
            13 => Some(MsgType::Response),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<MsgType> for u8 {
    fn from(value: MsgType) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for MsgType {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or(InvalidValue)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mailbox(u8);

impl Mailbox {
    const MAX_VALUE: u8 = 0x3f;
    pub const MAX: Mailbox = Mailbox(Self::MAX_VALUE);

    /// Reserved for the loopback probes of address negotiation.
    pub const PROBE: Mailbox = Mailbox(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<Mailbox> for u8 {
    fn from(value: Mailbox) -> Self {
        value.into_u8()
    }
}

impl From<Mailbox> for usize {
    fn from(value: Mailbox) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for Mailbox {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// A set of mailbox numbers, used as a subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MailboxSet(u64);

impl MailboxSet {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(u64::MAX);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u64 {
        self.0
    }

    pub const fn complement(self) -> Self {
        Self(!self.0)
    }

    pub const fn new_eq(mailbox: Mailbox) -> Self {
        Self(1u64 << mailbox.into_u8())
    }

    pub const fn contains(&self, mailbox: Mailbox) -> bool {
        (self.0 >> mailbox.into_u8()) & 0x1 != 0
    }

    pub const fn insert(&mut self, mailbox: Mailbox) {
        self.0 |= Self::new_eq(mailbox).0
    }

    pub const fn remove(&mut self, mailbox: Mailbox) {
        self.0 &= Self::new_eq(mailbox).complement().0
    }

    pub const fn first(&self) -> Option<Mailbox> {
        Mailbox::new(self.0.trailing_zeros() as u8)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl Default for MailboxSet {
    fn default() -> Self {
        MailboxSet::NONE
    }
}

impl core::ops::Not for MailboxSet {
    type Output = Self;
    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl core::ops::BitAnd<MailboxSet> for MailboxSet {
    type Output = Self;
    fn bitand(self, rhs: MailboxSet) -> Self::Output {
        MailboxSet(self.0 & rhs.0)
    }
}

impl core::ops::BitAndAssign<MailboxSet> for MailboxSet {
    fn bitand_assign(&mut self, rhs: MailboxSet) {
        self.0 &= rhs.0
    }
}

impl core::ops::BitOr<MailboxSet> for MailboxSet {
    type Output = Self;
    fn bitor(self, rhs: MailboxSet) -> Self::Output {
        MailboxSet(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign<MailboxSet> for MailboxSet {
    fn bitor_assign(&mut self, rhs: MailboxSet) {
        self.0 |= rhs.0;
    }
}

impl core::iter::IntoIterator for MailboxSet {
    type Item = Mailbox;
    type IntoIter = MailboxSetIterator;
    fn into_iter(self) -> Self::IntoIter {
        MailboxSetIterator { residual: self }
    }
}

pub struct MailboxSetIterator {
    residual: MailboxSet,
}

impl core::iter::Iterator for MailboxSetIterator {
    type Item = Mailbox;
    fn next(&mut self) -> Option<Self::Item> {
        let first = self.residual.first();
        if let Some(mailbox) = first {
            self.residual.remove(mailbox);
        }
        first
    }
}

/// Inclusive range of doorbell info values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DoorbellRange {
    lo: u16,
    hi: u16,
}

impl DoorbellRange {
    pub const ALL: Self = Self { lo: 0, hi: u16::MAX };

    pub const fn new(lo: u16, hi: u16) -> Option<Self> {
        if lo <= hi {
            Some(Self { lo, hi })
        } else {
            None
        }
    }

    pub const fn new_eq(info: u16) -> Self {
        Self { lo: info, hi: info }
    }

    pub const fn lo(&self) -> u16 {
        self.lo
    }

    pub const fn hi(&self) -> u16 {
        self.hi
    }

    pub const fn contains(&self, info: u16) -> bool {
        self.lo <= info && info <= self.hi
    }
}

/// Inclusive range of SWRITE target addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SwriteRange {
    lo: u64,
    hi: u64,
}

impl SwriteRange {
    /// Target addresses are 34 bits wide in the small-system model.
    pub const ADDR_MAX: u64 = (1 << 34) - 1;

    pub const ALL: Self = Self {
        lo: 0,
        hi: Self::ADDR_MAX,
    };

    pub const fn new(lo: u64, hi: u64) -> Option<Self> {
        if lo <= hi && hi <= Self::ADDR_MAX {
            Some(Self { lo, hi })
        } else {
            None
        }
    }

    pub const fn lo(&self) -> u64 {
        self.lo
    }

    pub const fn hi(&self) -> u64 {
        self.hi
    }

    pub const fn contains(&self, addr: u64) -> bool {
        self.lo <= addr && addr <= self.hi
    }
}

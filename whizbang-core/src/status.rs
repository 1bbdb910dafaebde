//! The status bitmask shared by outbox, inbox and perspective-checkpoint
//! rows, and the failure-reason enum recorded alongside a terminal failure.

use serde::{Deserialize, Serialize};

/// Bit flags tracked on outbox/inbox/perspective rows. Hand-rolled rather
/// than pulled from the `bitflags` crate: there are exactly five bits to
/// name, each with claim-eligibility semantics specific to this schema, and
/// the helper methods below (`is_claimable`, `mark_terminal_failure`, ...)
/// encode those semantics directly rather than leaving callers to combine
/// raw flags correctly by hand.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusFlags(u16);

impl StatusFlags {
    pub const PENDING: StatusFlags = StatusFlags(0x0001);
    pub const RECEPTOR_PROCESSED: StatusFlags = StatusFlags(0x0002);
    /// `Published` for outbox rows, `EventStored` for event-sourced inbox
    /// consumers — same bit, role-dependent name, per the specification.
    pub const COMPLETED: StatusFlags = StatusFlags(0x0004);
    pub const CATCHING_UP: StatusFlags = StatusFlags(0x0008);
    pub const TERMINAL_FAILURE: StatusFlags = StatusFlags(0x8000);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: StatusFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: StatusFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: StatusFlags) {
        self.0 &= !other.0;
    }

    /// A row is claimable iff it has not failed terminally, has not already
    /// completed its role-specific terminal step, and either has no lease
    /// holder or its lease has expired — the last part is checked by the
    /// caller against `lease_expiry`, since this type has no notion of time.
    pub const fn is_claimable_status(self) -> bool {
        !self.contains(Self::TERMINAL_FAILURE) && !self.contains(Self::COMPLETED)
    }

    pub fn mark_terminal_failure(&mut self) {
        self.insert(Self::TERMINAL_FAILURE);
    }

    pub fn mark_completed(&mut self) {
        self.insert(Self::COMPLETED);
        self.remove(Self::CATCHING_UP);
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::PENDING
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = StatusFlags;

    fn bitor(self, rhs: StatusFlags) -> StatusFlags {
        StatusFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for StatusFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::PENDING) {
            names.push("PENDING");
        }
        if self.contains(Self::RECEPTOR_PROCESSED) {
            names.push("RECEPTOR_PROCESSED");
        }
        if self.contains(Self::COMPLETED) {
            names.push("COMPLETED");
        }
        if self.contains(Self::CATCHING_UP) {
            names.push("CATCHING_UP");
        }
        if self.contains(Self::TERMINAL_FAILURE) {
            names.push("TERMINAL_FAILURE");
        }
        write!(f, "StatusFlags({:#06x} = {})", self.0, names.join("|"))
    }
}

/// Why a message ended up in terminal failure. Discriminants match the
/// specification exactly, including the gap between `LeaseExpired` (6) and
/// `Unknown` (99), which the specification leaves reserved rather than
/// defined. Values in that gap are never produced by this crate, but a
/// `FailureReason` read back from a database written by some other,
/// newer deployment must still round-trip instead of panicking, hence
/// `Reserved`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FailureReason {
    None,
    TransportNotReady,
    TransportException,
    SerializationError,
    ValidationError,
    MaxAttemptsExceeded,
    LeaseExpired,
    /// Codes 7..=98: reserved by the specification, not yet assigned.
    Reserved(u8),
    Unknown,
}

impl FailureReason {
    pub const fn code(self) -> u8 {
        match self {
            FailureReason::None => 0,
            FailureReason::TransportNotReady => 1,
            FailureReason::TransportException => 2,
            FailureReason::SerializationError => 3,
            FailureReason::ValidationError => 4,
            FailureReason::MaxAttemptsExceeded => 5,
            FailureReason::LeaseExpired => 6,
            FailureReason::Reserved(code) => code,
            FailureReason::Unknown => 99,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => FailureReason::None,
            1 => FailureReason::TransportNotReady,
            2 => FailureReason::TransportException,
            3 => FailureReason::SerializationError,
            4 => FailureReason::ValidationError,
            5 => FailureReason::MaxAttemptsExceeded,
            6 => FailureReason::LeaseExpired,
            99 => FailureReason::Unknown,
            other => FailureReason::Reserved(other),
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, FailureReason::None)
    }
}

impl From<FailureReason> for u8 {
    fn from(value: FailureReason) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for FailureReason {
    type Error = std::convert::Infallible;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(Self::from_code(value))
    }
}

use rusty_p4_shell_proto::proto::v1::Uint128;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// A 128-bit election id, compared as an unsigned integer (`high` first).
#[derive(Hash, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Default)]
pub struct ElectionId {
    pub high: u64,
    pub low: u64,
}

impl ElectionId {
    pub fn new(high: u64, low: u64) -> ElectionId {
        ElectionId { high, low }
    }

    pub fn as_u128(&self) -> u128 {
        ((self.high as u128) << 64) | self.low as u128
    }
}

impl From<u128> for ElectionId {
    fn from(v: u128) -> Self {
        ElectionId {
            high: (v >> 64) as u64,
            low: v as u64,
        }
    }
}

impl From<(u64, u64)> for ElectionId {
    fn from((high, low): (u64, u64)) -> Self {
        ElectionId { high, low }
    }
}

impl From<ElectionId> for Uint128 {
    fn from(id: ElectionId) -> Self {
        Uint128 {
            high: id.high,
            low: id.low,
        }
    }
}

impl From<Uint128> for ElectionId {
    fn from(id: Uint128) -> Self {
        ElectionId {
            high: id.high,
            low: id.low,
        }
    }
}

impl Debug for ElectionId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "({}, {})", self.high, self.low)
    }
}

impl Display for ElectionId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Lifecycle of a controller session.
///
/// `Disconnected -> Connecting -> Arbitrating -> Active | Standby`; a session
/// moves between `Active` and `Standby` whenever the device reports a new
/// primary, and back to `Disconnected` on teardown or stream failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Arbitrating,
    /// Primacy held, writes allowed.
    Active,
    /// Connected but another controller is primary; reads only.
    Standby,
}

impl SessionState {
    pub fn can_write(&self) -> bool {
        *self == SessionState::Active
    }

    pub fn can_read(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Standby)
    }
}

//! Shared identifiers and small value types used across the engine.

use std::fmt;

/// Opaque platform-native serial device identifier (e.g. `/dev/ttyUSB0`,
/// `COM54`). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(String);

impl PortId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PortId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PortId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// One of the three fixed slots in the fan-out/fan-in fabric. Fixed at
/// engine start. Fan-out depends on exactly two outgoing roles — a fourth
/// role would break the all-or-nothing broadcast invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Incoming,
    OutgoingA,
    OutgoingB,
}

impl PortRole {
    pub const ALL: [PortRole; 3] = [PortRole::Incoming, PortRole::OutgoingA, PortRole::OutgoingB];

    /// Stable ownership key used by the port manager and surfaced in
    /// telemetry/log lines. These exact strings are load-bearing: the
    /// watchdog and engine both address handlers by this name.
    pub fn owner_name(self) -> &'static str {
        match self {
            PortRole::Incoming => "IncomingPortOwner",
            PortRole::OutgoingA => "Port131Owner",
            PortRole::OutgoingB => "Port141Owner",
        }
    }

    pub fn index(self) -> usize {
        match self {
            PortRole::Incoming => 0,
            PortRole::OutgoingA => 1,
            PortRole::OutgoingB => 2,
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.owner_name())
    }
}

/// Acquisition / fixed lexical order used everywhere ports are opened or
/// released: Incoming, then OutgoingA, then OutgoingB; released in reverse.
pub const ACQUIRE_ORDER: [PortRole; 3] = [PortRole::Incoming, PortRole::OutgoingA, PortRole::OutgoingB];

/// Data-plane direction a byte transfer ran in, keyed for the
/// `bytes_transferred` display counters (e.g. `"COM54->131&141"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    IncomingToOutgoing,
    OutgoingAToIncoming,
    OutgoingBToIncoming,
}

impl TransferDirection {
    pub fn label(self) -> &'static str {
        match self {
            TransferDirection::IncomingToOutgoing => "incoming->outgoing",
            TransferDirection::OutgoingAToIncoming => "outgoingA->incoming",
            TransferDirection::OutgoingBToIncoming => "outgoingB->incoming",
        }
    }
}

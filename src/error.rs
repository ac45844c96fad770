// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy shared by every component.
//!
//! The original C library returned sentinel values and stashed a
//! diagnostic string in a module-scoped buffer (`veError`). We keep the
//! same four-tier severity model (fatal / per-slave fatal / recoverable /
//! expected) described in the specification but express it with
//! `thiserror` enums instead of sentinels, and log through `tracing`
//! instead of a module-prefixed stream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed slave sentinel argument: {0}")]
    MalformedSentinel(String),
    #[error("i/o error on connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("payload length {0} exceeds header capacity")]
    PayloadOverflow(usize),
    #[error("spawn helper failed: {0}")]
    SpawnFailed(String),
    #[error("fast channel negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("operation timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("slave {0} not found")]
    UnknownSlave(u32),
    #[error("state variable tag {0} already registered")]
    DuplicateStateVar(i32),
    #[error("state variable tag {0} not registered")]
    UnknownStateVar(i32),
    #[error("state variable tag {0} length mismatch: local={1} incoming={2}")]
    StateVarLengthMismatch(i32, usize, usize),
    #[error("slave bring-up failed for ({0}, {1}): {2}")]
    BringUpFailed(String, String, String),
    #[error("serialization error pushing {0}: {1}")]
    Serialization(String, String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("filter {0} reported an error")]
    FilterError(String),
    #[error("cannot convert {0:?} content without a state= or threshold= hint")]
    UnconvertibleContent(&'static str),
    #[error("invalid filter parameter: {0}")]
    BadParam(String),
    #[error("expression parse error: {0}")]
    ExprParse(String),
    #[error("unknown filter definition: {0}")]
    UnknownFilter(String),
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("deserialization error: {0}")]
    Deserialize(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame direction and up vectors are parallel")]
    ParallelFrame,
}

/// Per-module debug selector, set via `-ve_debug <spec>`.
///
/// The original toolkit's `VE_DEBUGM(level, ...)` calls (`ve_mp.c`) gate
/// on a single numeric verbosity level. This bitmask groups the same
/// kind of diagnostic noise by subsystem instead, and drives `tracing`'s
/// `EnvFilter` with it rather than a bespoke printf gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags(pub u32);

impl DebugFlags {
    pub const MP: u32 = 1 << 0;
    pub const DEVICE: u32 = 1 << 1;
    pub const ENV: u32 = 1 << 2;
    pub const TRANSPORT: u32 = 1 << 3;
    pub const ALL: u32 = Self::MP | Self::DEVICE | Self::ENV | Self::TRANSPORT;

    pub fn parse(spec: &str) -> Self {
        let mut bits = 0u32;
        for tok in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            bits |= match tok {
                "mp" => Self::MP,
                "device" => Self::DEVICE,
                "env" => Self::ENV,
                "transport" => Self::TRANSPORT,
                "all" => Self::ALL,
                _ => 0,
            };
        }
        DebugFlags(bits)
    }

    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

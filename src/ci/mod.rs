// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! MIDI Capability Inquiry (MIDI-CI) protocol negotiation.
//!
//! Both ends exchange their preferred protocols through Universal SysEx
//! messages and switch to the first mutually supported one. Without an
//! answer in time the link stays at MIDI 1.0.

use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;
use derive_more::Display;
use rand::Rng as _;
use strum::FromRepr;

mod filter;
pub use self::filter::CiInputFilter;

mod message;
pub use self::message::{CiBody, CiMessage, SubId, TEST_DATA_LEN};

mod negotiator;
pub use self::negotiator::{
    CiInbox, CiTransport, NegotiationConfig, NegotiationOutcome, NegotiationRole, Negotiator,
    DEFAULT_PHASE_TIMEOUT, DEFAULT_POLL_STEP,
};

/// MIDI Unique Identifier.
///
/// A random 28-bit number that identifies a MIDI-CI device on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{_0:07x}")]
pub struct Muid(u32);

impl Muid {
    pub const BROADCAST: Self = Self(0x0fff_ffff);

    /// Upper bound of regular identifiers, exclusive.
    const RESERVED_START: u32 = 0x0fff_ff00;

    /// Generate a random identifier outside of the reserved range.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(0..Self::RESERVED_START))
    }

    /// Masks the value to 28 bits.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x0fff_ffff)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Four 7-bit bytes, least significant first.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub const fn to_bytes(self) -> [u8; 4] {
        let value = self.0;
        [
            (value & 0x7f) as u8,
            (value >> 7 & 0x7f) as u8,
            (value >> 14 & 0x7f) as u8,
            (value >> 21 & 0x7f) as u8,
        ]
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let value = bytes
            .iter()
            .rev()
            .fold(0, |value, byte| value << 7 | u32::from(byte & 0x7f));
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum MidiProtocol {
    Midi1 = 0x01,
    Midi2 = 0x02,
}

/// Protocol specific extension flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[display("{_0:#04x}")]
pub struct Extension(pub u8);

impl Extension {
    pub const NONE: Self = Self(0x00);
}

/// A protocol with its extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("{protocol:?}/{extension}")]
pub struct ProtocolSelection {
    pub protocol: MidiProtocol,
    pub extension: Extension,
}

impl ProtocolSelection {
    /// Used until a negotiation succeeds.
    pub const FALLBACK: Self = Self {
        protocol: MidiProtocol::Midi1,
        extension: Extension::NONE,
    };

    #[must_use]
    pub const fn new(protocol: MidiProtocol, extension: Extension) -> Self {
        Self {
            protocol,
            extension,
        }
    }
}

impl Default for ProtocolSelection {
    fn default() -> Self {
        Self::FALLBACK
    }
}

/// Protocol of a port, updated by a negotiation.
pub type SharedProtocol = Arc<AtomicCell<ProtocolSelection>>;

/// Steps of the negotiation handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPhase {
    Start,
    /// Sent or received the initiate message
    Initiate,
    /// Sent or received the reply
    Reply,
    SetNew,
    TestInitiatorToResponder,
    TestResponderToInitiator,
    Confirmation,
    End,
}

// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use strum::FromRepr;

use super::{Extension, MidiProtocol, Muid, ProtocolSelection};
use crate::midi1::{SYSEX_END, SYSEX_START};

const UNIVERSAL_NON_REAL_TIME: u8 = 0x7e;
const DEVICE_ID_FUNCTION_BLOCK: u8 = 0x7f;
const SUB_ID1_MIDI_CI: u8 = 0x0d;
const MESSAGE_VERSION: u8 = 0x01;
const AUTHORITY_LEVEL: u8 = 0x60;

/// Unframed bytes preceding the payload.
const HEADER_LEN: usize = 14;

const PROTOCOL_ENTRY_LEN: usize = 5;

/// Length of the test payload.
pub const TEST_DATA_LEN: usize = 48;

#[expect(clippy::cast_possible_truncation)]
const TEST_DATA: [u8; TEST_DATA_LEN] = {
    let mut data = [0; TEST_DATA_LEN];
    let mut i = 0;
    while i < TEST_DATA_LEN {
        data[i] = i as u8;
        i += 1;
    }
    data
};

/// Sub-ID#2 of protocol negotiation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum SubId {
    InitiateProtocolNegotiation = 0x10,
    ReplyToInitiateProtocolNegotiation = 0x11,
    SetNewProtocol = 0x12,
    TestNewProtocolInitiatorToResponder = 0x13,
    TestNewProtocolResponderToInitiator = 0x14,
    ConfirmationNewProtocolEstablished = 0x15,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiBody {
    Initiate {
        /// Ordered by preference
        preferences: Vec<ProtocolSelection>,
        current: ProtocolSelection,
    },
    Reply {
        preferences: Vec<ProtocolSelection>,
    },
    SetNewProtocol {
        selection: ProtocolSelection,
    },
    TestInitiatorToResponder,
    TestResponderToInitiator,
    Confirmation,
}

impl CiBody {
    #[must_use]
    pub const fn sub_id(&self) -> SubId {
        match self {
            Self::Initiate { .. } => SubId::InitiateProtocolNegotiation,
            Self::Reply { .. } => SubId::ReplyToInitiateProtocolNegotiation,
            Self::SetNewProtocol { .. } => SubId::SetNewProtocol,
            Self::TestInitiatorToResponder => SubId::TestNewProtocolInitiatorToResponder,
            Self::TestResponderToInitiator => SubId::TestNewProtocolResponderToInitiator,
            Self::Confirmation => SubId::ConfirmationNewProtocolEstablished,
        }
    }
}

/// A MIDI-CI protocol negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiMessage {
    pub source: Muid,
    pub destination: Muid,
    pub body: CiBody,
}

fn encode_entry(selection: ProtocolSelection) -> [u8; PROTOCOL_ENTRY_LEN] {
    [selection.protocol as u8, 0x00, 0x00, selection.extension.0, 0x00]
}

fn parse_entry(bytes: &[u8]) -> Option<ProtocolSelection> {
    let protocol = MidiProtocol::from_repr(bytes[0])?;
    Some(ProtocolSelection::new(protocol, Extension(bytes[3])))
}

/// Parse a counted list of entries.
///
/// Returns the entries and the remaining bytes.
fn parse_entries(payload: &[u8]) -> Option<(Vec<ProtocolSelection>, &[u8])> {
    let (&count, payload) = payload.split_first()?;
    let len = usize::from(count) * PROTOCOL_ENTRY_LEN;
    if payload.len() < len {
        return None;
    }
    let (entries, rest) = payload.split_at(len);
    // Unknown protocols are skipped
    let entries = entries
        .chunks_exact(PROTOCOL_ENTRY_LEN)
        .filter_map(parse_entry)
        .collect();
    Some((entries, rest))
}

impl CiMessage {
    #[must_use]
    pub const fn new(source: Muid, destination: Muid, body: CiBody) -> Self {
        Self {
            source,
            destination,
            body,
        }
    }

    /// Encode into a complete SysEx message, including `F0`/`F7`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + HEADER_LEN + TEST_DATA_LEN);
        bytes.extend_from_slice(&[
            SYSEX_START,
            UNIVERSAL_NON_REAL_TIME,
            DEVICE_ID_FUNCTION_BLOCK,
            SUB_ID1_MIDI_CI,
            self.body.sub_id() as u8,
            MESSAGE_VERSION,
        ]);
        bytes.extend_from_slice(&self.source.to_bytes());
        bytes.extend_from_slice(&self.destination.to_bytes());
        bytes.push(AUTHORITY_LEVEL);
        match &self.body {
            CiBody::Initiate {
                preferences,
                current,
            } => {
                encode_entries(&mut bytes, preferences);
                bytes.extend_from_slice(&encode_entry(*current));
            }
            CiBody::Reply { preferences } => {
                encode_entries(&mut bytes, preferences);
            }
            CiBody::SetNewProtocol { selection } => {
                bytes.extend_from_slice(&encode_entry(*selection));
            }
            CiBody::TestInitiatorToResponder | CiBody::TestResponderToInitiator => {
                bytes.extend_from_slice(&TEST_DATA);
            }
            CiBody::Confirmation => (),
        }
        bytes.push(SYSEX_END);
        bytes
    }

    /// Parse a SysEx message with or without `F0`/`F7` framing.
    ///
    /// Returns `None` for anything that is not a well-formed protocol
    /// negotiation message.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        let data = data.strip_prefix(&[SYSEX_START]).unwrap_or(data);
        let data = data.strip_suffix(&[SYSEX_END]).unwrap_or(data);
        if data.len() < HEADER_LEN {
            return None;
        }
        let (header, payload) = data.split_at(HEADER_LEN);
        if header[..3] != [UNIVERSAL_NON_REAL_TIME, DEVICE_ID_FUNCTION_BLOCK, SUB_ID1_MIDI_CI]
            || header[4] != MESSAGE_VERSION
            || header[13] != AUTHORITY_LEVEL
        {
            return None;
        }
        let sub_id = SubId::from_repr(header[3])?;
        let source = Muid::from_bytes([header[5], header[6], header[7], header[8]]);
        let destination = Muid::from_bytes([header[9], header[10], header[11], header[12]]);
        let body = match sub_id {
            SubId::InitiateProtocolNegotiation => {
                let (preferences, rest) = parse_entries(payload)?;
                if rest.len() < PROTOCOL_ENTRY_LEN {
                    return None;
                }
                let current = parse_entry(rest)?;
                CiBody::Initiate {
                    preferences,
                    current,
                }
            }
            SubId::ReplyToInitiateProtocolNegotiation => {
                let (preferences, _) = parse_entries(payload)?;
                CiBody::Reply { preferences }
            }
            SubId::SetNewProtocol => {
                if payload.len() < PROTOCOL_ENTRY_LEN {
                    return None;
                }
                CiBody::SetNewProtocol {
                    selection: parse_entry(payload)?,
                }
            }
            SubId::TestNewProtocolInitiatorToResponder => {
                if !payload.starts_with(&TEST_DATA) {
                    return None;
                }
                CiBody::TestInitiatorToResponder
            }
            SubId::TestNewProtocolResponderToInitiator => {
                if !payload.starts_with(&TEST_DATA) {
                    return None;
                }
                CiBody::TestResponderToInitiator
            }
            SubId::ConfirmationNewProtocolEstablished => CiBody::Confirmation,
        };
        Some(Self {
            source,
            destination,
            body,
        })
    }

    /// Whether `muid` is the destination, directly or by broadcast.
    #[must_use]
    pub const fn is_addressed_to(&self, muid: Muid) -> bool {
        self.destination.is_broadcast() || self.destination.value() == muid.value()
    }
}

fn encode_entries(bytes: &mut Vec<u8>, entries: &[ProtocolSelection]) {
    // The count is a 7-bit value
    let entries = &entries[..entries.len().min(0x7f)];
    #[expect(clippy::cast_possible_truncation)]
    bytes.push(entries.len() as u8);
    for entry in entries {
        bytes.extend_from_slice(&encode_entry(*entry));
    }
}

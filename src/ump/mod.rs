// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Universal MIDI Packets (UMP).
//!
//! Packets consist of 1 to 4 32-bit words. The high nibble of the first
//! byte contains the message type, the low nibble the group.

use strum::FromRepr;

use crate::{
    input::InputPort,
    midi1::MidiEvent,
    output::{OutputPort, PacketEncoder},
    usb::PacketFormat,
};

mod decoder;
pub use self::decoder::UmpDecoder;

mod encoder;
pub use self::encoder::encode_event;

mod port;

pub const WORD_LEN: usize = 4;

pub const MAX_PACKET_LEN: usize = 4 * WORD_LEN;

/// Maximum payload of a single 7-bit SysEx packet.
pub const SYSEX7_CHUNK_LEN: usize = 6;

/// Maximum payload of a single 8-bit SysEx packet, without the stream id.
pub const SYSEX8_CHUNK_LEN: usize = 13;

/// Bytes per Mixed Data Set header or payload packet.
pub const MIXED_DATA_SET_CHUNK_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum MessageType {
    Utility = 0x0,
    System = 0x1,
    Midi1ChannelVoice = 0x2,
    Data64 = 0x3,
    Midi2ChannelVoice = 0x4,
    Data128 = 0x5,
}

/// Packet length in bytes for all 16 message types.
///
/// Includes reserved message types to skip them while keeping alignment.
#[must_use]
pub const fn packet_len(message_type: u8) -> usize {
    match message_type & 0x0f {
        0x0..=0x2 | 0x6 | 0x7 => WORD_LEN,
        0x3 | 0x4 | 0x8..=0xa => 2 * WORD_LEN,
        0xb | 0xc => 3 * WORD_LEN,
        _ => 4 * WORD_LEN,
    }
}

/// Status of a SysEx packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum SysExStatus {
    Complete = 0x0,
    Start = 0x1,
    Continue = 0x2,
    End = 0x3,
}

impl SysExStatus {
    /// Status of the chunk at `index` when sending `count` chunks.
    #[must_use]
    pub const fn for_chunk(index: usize, count: usize) -> Self {
        if count <= 1 {
            Self::Complete
        } else if index == 0 {
            Self::Start
        } else if index + 1 < count {
            Self::Continue
        } else {
            Self::End
        }
    }
}

pub(crate) const MIXED_DATA_SET_HEADER_STATUS: u8 = 0x8;
pub(crate) const MIXED_DATA_SET_PAYLOAD_STATUS: u8 = 0x9;

/// MIDI 2.0 channel voice message.
///
/// Channels are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Midi2Event {
    RegisteredPerNoteController {
        channel: u8,
        note: u8,
        index: u8,
        data: u32,
    },
    AssignablePerNoteController {
        channel: u8,
        note: u8,
        index: u8,
        data: u32,
    },
    /// RPN
    RegisteredController {
        channel: u8,
        bank: u8,
        index: u8,
        data: u32,
    },
    /// NRPN
    AssignableController {
        channel: u8,
        bank: u8,
        index: u8,
        data: u32,
    },
    RelativeRegisteredController {
        channel: u8,
        bank: u8,
        index: u8,
        data: i32,
    },
    RelativeAssignableController {
        channel: u8,
        bank: u8,
        index: u8,
        data: i32,
    },
    PerNotePitchBend {
        channel: u8,
        note: u8,
        data: u32,
    },
    NoteOff {
        channel: u8,
        note: u8,
        velocity: u16,
        attribute_type: u8,
        attribute: u16,
    },
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u16,
        attribute_type: u8,
        attribute: u16,
    },
    PolyphonicAftertouch {
        channel: u8,
        note: u8,
        data: u32,
    },
    ControlChange {
        channel: u8,
        index: u8,
        data: u32,
    },
    ProgramChange {
        channel: u8,
        program: u8,
        /// 14-bit bank number
        bank: Option<u16>,
    },
    ChannelAftertouch {
        channel: u8,
        data: u32,
    },
    /// 32-bit amount, centered at 0x8000_0000
    PitchBend {
        channel: u8,
        data: u32,
    },
    PerNoteManagement {
        channel: u8,
        note: u8,
        options: u8,
    },
}

impl Midi2Event {
    pub(crate) const fn status(&self) -> u8 {
        match self {
            Self::RegisteredPerNoteController { .. } => 0x0,
            Self::AssignablePerNoteController { .. } => 0x1,
            Self::RegisteredController { .. } => 0x2,
            Self::AssignableController { .. } => 0x3,
            Self::RelativeRegisteredController { .. } => 0x4,
            Self::RelativeAssignableController { .. } => 0x5,
            Self::PerNotePitchBend { .. } => 0x6,
            Self::NoteOff { .. } => 0x8,
            Self::NoteOn { .. } => 0x9,
            Self::PolyphonicAftertouch { .. } => 0xa,
            Self::ControlChange { .. } => 0xb,
            Self::ProgramChange { .. } => 0xc,
            Self::ChannelAftertouch { .. } => 0xd,
            Self::PitchBend { .. } => 0xe,
            Self::PerNoteManagement { .. } => 0xf,
        }
    }
}

/// Header of a Mixed Data Set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MixedDataSetHeader {
    pub mds_id: u8,
    /// Number of valid bytes in this chunk
    pub valid_bytes: u16,
    pub chunk_count: u16,
    /// 1-based
    pub chunk_index: u16,
    pub manufacturer_id: u16,
    pub device_id: u16,
    pub sub_id1: u16,
    pub sub_id2: u16,
}

impl MixedDataSetHeader {
    pub(crate) fn from_bytes(mds_id: u8, bytes: &[u8; MIXED_DATA_SET_CHUNK_LEN]) -> Self {
        let field = |offset: usize| u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        Self {
            mds_id,
            valid_bytes: field(0),
            chunk_count: field(2),
            chunk_index: field(4),
            manufacturer_id: field(6),
            device_id: field(8),
            sub_id1: field(10),
            sub_id2: field(12),
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; MIXED_DATA_SET_CHUNK_LEN] {
        let mut bytes = [0; MIXED_DATA_SET_CHUNK_LEN];
        let fields = [
            self.valid_bytes,
            self.chunk_count,
            self.chunk_index,
            self.manufacturer_id,
            self.device_id,
            self.sub_id1,
            self.sub_id2,
        ];
        for (chunk, field) in bytes.chunks_exact_mut(2).zip(fields) {
            chunk.copy_from_slice(&field.to_be_bytes());
        }
        bytes
    }
}

/// A decoded Universal MIDI Packet message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UmpEvent<'a> {
    Noop,
    JitterReductionClock {
        time: u16,
    },
    JitterReductionTimestamp {
        timestamp: u16,
    },
    /// System common and real-time messages
    System(MidiEvent<'static>),
    Midi1ChannelVoice(MidiEvent<'static>),
    Midi2ChannelVoice(Midi2Event),
    /// Complete 7-bit SysEx payload without `F0`/`F7` framing
    SystemExclusive7 {
        data: &'a [u8],
    },
    /// Complete 8-bit SysEx payload
    SystemExclusive8 {
        stream_id: u8,
        data: &'a [u8],
    },
    MixedDataSetHeader(MixedDataSetHeader),
    MixedDataSetPayload {
        mds_id: u8,
        data: &'a [u8; MIXED_DATA_SET_CHUNK_LEN],
    },
}

impl UmpEvent<'_> {
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::Noop | Self::JitterReductionClock { .. } | Self::JitterReductionTimestamp { .. } => {
                MessageType::Utility
            }
            Self::System(_) => MessageType::System,
            Self::Midi1ChannelVoice(_) => MessageType::Midi1ChannelVoice,
            Self::Midi2ChannelVoice(_) => MessageType::Midi2ChannelVoice,
            Self::SystemExclusive7 { .. } => MessageType::Data64,
            Self::SystemExclusive8 { .. }
            | Self::MixedDataSetHeader(_)
            | Self::MixedDataSetPayload { .. } => MessageType::Data128,
        }
    }
}

/// Receives decoded UMP messages on the reader thread.
pub trait UmpInputHandler: Send {
    /// Invoked for each incoming message.
    fn handle_ump_event(&mut self, group: u8, event: UmpEvent<'_>);
}

impl<F> UmpInputHandler for F
where
    F: FnMut(u8, UmpEvent<'_>) + Send,
{
    fn handle_ump_event(&mut self, group: u8, event: UmpEvent<'_>) {
        self(group, event);
    }
}

/// Marker of UMP output ports.
#[derive(Debug)]
pub struct UmpEncoder;

impl PacketEncoder for UmpEncoder {
    const FORMAT: PacketFormat = PacketFormat::Ump;
}

pub type UmpInputPort = InputPort<UmpDecoder>;

pub type UmpOutputPort = OutputPort<UmpEncoder>;

impl UmpInputPort {
    /// Install an event handler.
    pub fn set_ump_handler(&self, handler: impl UmpInputHandler + 'static) {
        self.set_handler(Some(Box::new(handler)));
    }
}

#[cfg(test)]
mod tests;

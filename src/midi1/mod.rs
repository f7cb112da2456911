// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! USB-MIDI 1.0 event packets.
//!
//! Every packet has 4 bytes. The first byte contains the virtual cable
//! number in the high nibble and the Code Index Number (CIN) in the low
//! nibble. The remaining 3 bytes carry the MIDI message, unused bytes
//! are zero.

use strum::FromRepr;

use crate::{
    input::InputPort,
    output::{OutputPort, PacketEncoder},
    usb::PacketFormat,
};

mod decoder;
pub use self::decoder::MidiDecoder;

mod encoder;
pub use self::encoder::{encode_event, event_packet, sysex_packets};

mod port;

pub const PACKET_LEN: usize = 4;

pub const SYSEX_START: u8 = 0xf0;
pub const SYSEX_END: u8 = 0xf7;

/// Reassembled SysEx messages that exceed this size are discarded.
pub const MAX_SYSEX_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum CodeIndexNumber {
    MiscFunction = 0x0,
    CableEvent = 0x1,
    SystemCommon2 = 0x2,
    SystemCommon3 = 0x3,
    SysExStart = 0x4,
    /// Single-byte system common message or SysEx ending with 1 byte
    SingleSystemCommonOrSysExEnd1 = 0x5,
    SysExEnd2 = 0x6,
    SysExEnd3 = 0x7,
    NoteOff = 0x8,
    NoteOn = 0x9,
    PolyphonicKeyPressure = 0xa,
    ControlChange = 0xb,
    ProgramChange = 0xc,
    ChannelPressure = 0xd,
    PitchBend = 0xe,
    SingleByte = 0xf,
}

impl CodeIndexNumber {
    /// Extract the CIN from the first byte of a packet.
    #[must_use]
    pub fn from_header(header: u8) -> Self {
        // All 16 values are defined
        Self::from_repr(header & 0x0f).unwrap_or(Self::MiscFunction)
    }

    /// Number of valid MIDI bytes in a packet.
    #[must_use]
    pub const fn data_len(self) -> usize {
        match self {
            Self::SingleSystemCommonOrSysExEnd1 | Self::SingleByte => 1,
            Self::SystemCommon2
            | Self::SysExEnd2
            | Self::ProgramChange
            | Self::ChannelPressure => 2,
            Self::MiscFunction
            | Self::CableEvent
            | Self::SystemCommon3
            | Self::SysExStart
            | Self::SysExEnd3
            | Self::NoteOff
            | Self::NoteOn
            | Self::PolyphonicKeyPressure
            | Self::ControlChange
            | Self::PitchBend => 3,
        }
    }
}

/// A decoded MIDI 1.0 message.
///
/// Channels are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent<'a> {
    /// Reserved for future extensions
    MiscFunction { data: [u8; 3] },
    /// Reserved for future extensions
    CableEvent { data: [u8; 3] },
    TimeCodeQuarterFrame { value: u8 },
    SongSelect { song: u8 },
    SongPositionPointer { position: u16 },
    TuneRequest,
    /// Any other system common message, including the status byte
    SystemCommon { data: &'a [u8] },
    /// A complete message, framed by `F0` and `F7`
    SystemExclusive { data: &'a [u8] },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyphonicAftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, function: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// 14-bit amount, centered at 0x2000
    PitchWheel { channel: u8, amount: u16 },
    /// A single byte that is not a real-time message
    SingleByte { byte: u8 },
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

impl MidiEvent<'_> {
    /// Map a single byte to a real-time message.
    #[must_use]
    pub const fn from_single_byte(byte: u8) -> MidiEvent<'static> {
        match byte {
            0xf8 => MidiEvent::TimingClock,
            0xfa => MidiEvent::Start,
            0xfb => MidiEvent::Continue,
            0xfc => MidiEvent::Stop,
            0xfe => MidiEvent::ActiveSensing,
            0xff => MidiEvent::Reset,
            byte => MidiEvent::SingleByte { byte },
        }
    }

    /// Parse a channel voice, system common, or real-time message.
    ///
    /// SysEx and undefined status bytes are rejected.
    #[must_use]
    pub fn from_message_bytes([status, data1, data2]: [u8; 3]) -> Option<MidiEvent<'static>> {
        let channel = status & 0x0f;
        let event = match status {
            0x80..=0x8f => MidiEvent::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            },
            0x90..=0x9f => MidiEvent::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            },
            0xa0..=0xaf => MidiEvent::PolyphonicAftertouch {
                channel,
                note: data1,
                pressure: data2,
            },
            0xb0..=0xbf => MidiEvent::ControlChange {
                channel,
                function: data1,
                value: data2,
            },
            0xc0..=0xcf => MidiEvent::ProgramChange {
                channel,
                program: data1,
            },
            0xd0..=0xdf => MidiEvent::ChannelAftertouch {
                channel,
                pressure: data1,
            },
            0xe0..=0xef => MidiEvent::PitchWheel {
                channel,
                amount: u16::from(data1 & 0x7f) | u16::from(data2 & 0x7f) << 7,
            },
            0xf1 => MidiEvent::TimeCodeQuarterFrame { value: data1 },
            0xf2 => MidiEvent::SongPositionPointer {
                position: u16::from(data1 & 0x7f) | u16::from(data2 & 0x7f) << 7,
            },
            0xf3 => MidiEvent::SongSelect { song: data1 },
            0xf6 => MidiEvent::TuneRequest,
            0xf8 | 0xfa | 0xfb | 0xfc | 0xfe | 0xff => MidiEvent::from_single_byte(status),
            _ => return None,
        };
        Some(event)
    }

    /// Inverse of [`Self::from_message_bytes()`].
    #[must_use]
    pub fn to_message_bytes(&self) -> Option<[u8; 3]> {
        if matches!(
            self,
            Self::MiscFunction { .. }
                | Self::CableEvent { .. }
                | Self::SystemCommon { .. }
                | Self::SystemExclusive { .. }
                | Self::SingleByte { .. }
        ) {
            return None;
        }
        let mut message = None;
        let encoded = encode_event(0, self, |[_, status, data1, data2]| {
            message = Some([status, data1, data2]);
            Ok::<_, std::convert::Infallible>(())
        });
        debug_assert!(encoded.is_ok());
        message
    }

    /// Channel voice messages
    #[must_use]
    pub const fn is_channel_voice(&self) -> bool {
        matches!(
            self,
            Self::NoteOff { .. }
                | Self::NoteOn { .. }
                | Self::PolyphonicAftertouch { .. }
                | Self::ControlChange { .. }
                | Self::ProgramChange { .. }
                | Self::ChannelAftertouch { .. }
                | Self::PitchWheel { .. }
        )
    }
}

/// Receives decoded MIDI 1.0 messages on the reader thread.
pub trait MidiInputHandler: Send {
    /// Invoked for each incoming message.
    fn handle_midi_event(&mut self, cable: u8, event: MidiEvent<'_>);
}

impl<F> MidiInputHandler for F
where
    F: FnMut(u8, MidiEvent<'_>) + Send,
{
    fn handle_midi_event(&mut self, cable: u8, event: MidiEvent<'_>) {
        self(cable, event);
    }
}

/// Marker of USB-MIDI 1.0 output ports.
#[derive(Debug)]
pub struct MidiEncoder;

impl PacketEncoder for MidiEncoder {
    const FORMAT: PacketFormat = PacketFormat::UsbMidi1;
}

pub type MidiInputPort = InputPort<MidiDecoder>;

pub type MidiOutputPort = OutputPort<MidiEncoder>;

impl MidiInputPort {
    /// Install an event handler.
    pub fn set_midi_handler(&self, handler: impl MidiInputHandler + 'static) {
        self.set_handler(Some(Box::new(handler)));
    }
}

#[cfg(test)]
mod tests;

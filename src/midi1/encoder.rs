// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::{CodeIndexNumber, MidiEvent, PACKET_LEN};

#[must_use]
pub const fn event_packet(cable: u8, cin: CodeIndexNumber, data: [u8; 3]) -> [u8; PACKET_LEN] {
    [(cable & 0x0f) << 4 | cin as u8, data[0], data[1], data[2]]
}

const fn channel_packet(
    cable: u8,
    cin: CodeIndexNumber,
    channel: u8,
    data1: u8,
    data2: u8,
) -> [u8; PACKET_LEN] {
    event_packet(
        cable,
        cin,
        [(cin as u8) << 4 | channel & 0x0f, data1 & 0x7f, data2 & 0x7f],
    )
}

const fn single_byte_packet(cable: u8, cin: CodeIndexNumber, byte: u8) -> [u8; PACKET_LEN] {
    event_packet(cable, cin, [byte, 0, 0])
}

/// Split a 14-bit value into LSB and MSB.
#[expect(clippy::cast_possible_truncation)]
const fn split_u14(value: u16) -> (u8, u8) {
    ((value & 0x7f) as u8, (value >> 7 & 0x7f) as u8)
}

/// Pack a SysEx message into packets of 3 bytes.
///
/// The message is expected to include the `F0` and `F7` framing. All
/// packets except the last one are tagged as start/continue, the last
/// packet as end with 1, 2, or 3 bytes.
pub fn sysex_packets(cable: u8, message: &[u8]) -> impl Iterator<Item = [u8; PACKET_LEN]> + '_ {
    let last_index = message.len().saturating_sub(1) / 3;
    message.chunks(3).enumerate().map(move |(index, chunk)| {
        let mut data = [0; 3];
        data[..chunk.len()].copy_from_slice(chunk);
        let cin = if index < last_index {
            CodeIndexNumber::SysExStart
        } else {
            match chunk.len() {
                1 => CodeIndexNumber::SingleSystemCommonOrSysExEnd1,
                2 => CodeIndexNumber::SysExEnd2,
                _ => CodeIndexNumber::SysExEnd3,
            }
        };
        event_packet(cable, cin, data)
    })
}

/// Encode a message into one or more packets.
pub fn encode_event<E>(
    cable: u8,
    event: &MidiEvent<'_>,
    mut emit: impl FnMut([u8; PACKET_LEN]) -> Result<(), E>,
) -> Result<(), E> {
    let packet = match *event {
        MidiEvent::MiscFunction { data } => {
            event_packet(cable, CodeIndexNumber::MiscFunction, data)
        }
        MidiEvent::CableEvent { data } => event_packet(cable, CodeIndexNumber::CableEvent, data),
        MidiEvent::TimeCodeQuarterFrame { value } => {
            event_packet(cable, CodeIndexNumber::SystemCommon2, [0xf1, value & 0x7f, 0])
        }
        MidiEvent::SongSelect { song } => {
            event_packet(cable, CodeIndexNumber::SystemCommon2, [0xf3, song & 0x7f, 0])
        }
        MidiEvent::SongPositionPointer { position } => {
            let (lsb, msb) = split_u14(position);
            event_packet(cable, CodeIndexNumber::SystemCommon3, [0xf2, lsb, msb])
        }
        MidiEvent::TuneRequest => single_byte_packet(
            cable,
            CodeIndexNumber::SingleSystemCommonOrSysExEnd1,
            0xf6,
        ),
        MidiEvent::SystemCommon { data } => {
            let cin = match data.len() {
                0 => return Ok(()),
                1 => CodeIndexNumber::SingleSystemCommonOrSysExEnd1,
                2 => CodeIndexNumber::SystemCommon2,
                _ => CodeIndexNumber::SystemCommon3,
            };
            let mut bytes = [0; 3];
            let len = data.len().min(bytes.len());
            bytes[..len].copy_from_slice(&data[..len]);
            event_packet(cable, cin, bytes)
        }
        MidiEvent::SystemExclusive { data } => {
            for packet in sysex_packets(cable, data) {
                emit(packet)?;
            }
            return Ok(());
        }
        MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        } => channel_packet(cable, CodeIndexNumber::NoteOff, channel, note, velocity),
        MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        } => channel_packet(cable, CodeIndexNumber::NoteOn, channel, note, velocity),
        MidiEvent::PolyphonicAftertouch {
            channel,
            note,
            pressure,
        } => channel_packet(
            cable,
            CodeIndexNumber::PolyphonicKeyPressure,
            channel,
            note,
            pressure,
        ),
        MidiEvent::ControlChange {
            channel,
            function,
            value,
        } => channel_packet(
            cable,
            CodeIndexNumber::ControlChange,
            channel,
            function,
            value,
        ),
        MidiEvent::ProgramChange { channel, program } => {
            channel_packet(cable, CodeIndexNumber::ProgramChange, channel, program, 0)
        }
        MidiEvent::ChannelAftertouch { channel, pressure } => channel_packet(
            cable,
            CodeIndexNumber::ChannelPressure,
            channel,
            pressure,
            0,
        ),
        MidiEvent::PitchWheel { channel, amount } => {
            let (lsb, msb) = split_u14(amount);
            channel_packet(cable, CodeIndexNumber::PitchBend, channel, lsb, msb)
        }
        MidiEvent::SingleByte { byte } => {
            single_byte_packet(cable, CodeIndexNumber::SingleByte, byte)
        }
        MidiEvent::TimingClock => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xf8),
        MidiEvent::Start => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xfa),
        MidiEvent::Continue => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xfb),
        MidiEvent::Stop => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xfc),
        MidiEvent::ActiveSensing => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xfe),
        MidiEvent::Reset => single_byte_packet(cable, CodeIndexNumber::SingleByte, 0xff),
    };
    emit(packet)
}

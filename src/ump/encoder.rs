// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::{
    Midi2Event, MessageType, SysExStatus, UmpEvent, MAX_PACKET_LEN, MIXED_DATA_SET_CHUNK_LEN,
    MIXED_DATA_SET_HEADER_STATUS, MIXED_DATA_SET_PAYLOAD_STATUS, SYSEX7_CHUNK_LEN,
    SYSEX8_CHUNK_LEN, WORD_LEN,
};

const fn header(message_type: MessageType, group: u8) -> u8 {
    (message_type as u8) << 4 | group & 0x0f
}

#[expect(clippy::cast_possible_truncation)]
const fn split_u14(value: u16) -> [u8; 2] {
    [(value >> 7 & 0x7f) as u8, (value & 0x7f) as u8]
}

fn encode_midi2(group: u8, event: &Midi2Event) -> [u8; 2 * WORD_LEN] {
    let (byte2, byte3, word1) = match *event {
        Midi2Event::RegisteredPerNoteController {
            note, index, data, ..
        }
        | Midi2Event::AssignablePerNoteController {
            note, index, data, ..
        } => (note, index, data.to_be_bytes()),
        Midi2Event::RegisteredController {
            bank, index, data, ..
        }
        | Midi2Event::AssignableController {
            bank, index, data, ..
        } => (bank, index, data.to_be_bytes()),
        Midi2Event::RelativeRegisteredController {
            bank, index, data, ..
        }
        | Midi2Event::RelativeAssignableController {
            bank, index, data, ..
        } => (bank, index, data.to_be_bytes()),
        Midi2Event::PerNotePitchBend { note, data, .. }
        | Midi2Event::PolyphonicAftertouch { note, data, .. } => (note, 0, data.to_be_bytes()),
        Midi2Event::NoteOff {
            note,
            velocity,
            attribute_type,
            attribute,
            ..
        }
        | Midi2Event::NoteOn {
            note,
            velocity,
            attribute_type,
            attribute,
            ..
        } => {
            let [velocity_msb, velocity_lsb] = velocity.to_be_bytes();
            let [attribute_msb, attribute_lsb] = attribute.to_be_bytes();
            (
                note,
                attribute_type,
                [velocity_msb, velocity_lsb, attribute_msb, attribute_lsb],
            )
        }
        Midi2Event::ControlChange { index, data, .. } => (index, 0, data.to_be_bytes()),
        Midi2Event::ProgramChange { program, bank, .. } => {
            let [bank_msb, bank_lsb] = bank.map_or([0, 0], split_u14);
            (0, u8::from(bank.is_some()), [program, 0, bank_msb, bank_lsb])
        }
        Midi2Event::ChannelAftertouch { data, .. } | Midi2Event::PitchBend { data, .. } => {
            (0, 0, data.to_be_bytes())
        }
        Midi2Event::PerNoteManagement { note, options, .. } => (note, options, [0; 4]),
    };
    let channel = match *event {
        Midi2Event::RegisteredPerNoteController { channel, .. }
        | Midi2Event::AssignablePerNoteController { channel, .. }
        | Midi2Event::RegisteredController { channel, .. }
        | Midi2Event::AssignableController { channel, .. }
        | Midi2Event::RelativeRegisteredController { channel, .. }
        | Midi2Event::RelativeAssignableController { channel, .. }
        | Midi2Event::PerNotePitchBend { channel, .. }
        | Midi2Event::NoteOff { channel, .. }
        | Midi2Event::NoteOn { channel, .. }
        | Midi2Event::PolyphonicAftertouch { channel, .. }
        | Midi2Event::ControlChange { channel, .. }
        | Midi2Event::ProgramChange { channel, .. }
        | Midi2Event::ChannelAftertouch { channel, .. }
        | Midi2Event::PitchBend { channel, .. }
        | Midi2Event::PerNoteManagement { channel, .. } => channel,
    };
    let [word1_0, word1_1, word1_2, word1_3] = word1;
    [
        header(MessageType::Midi2ChannelVoice, group),
        event.status() << 4 | channel & 0x0f,
        byte2,
        byte3,
        word1_0,
        word1_1,
        word1_2,
        word1_3,
    ]
}

/// Encode a message into one or more packets.
///
/// Each packet is emitted separately. Multi-packet SysEx messages are
/// split into chunks of 6 (7-bit) or 13 (8-bit) bytes.
pub fn encode_event<E>(
    group: u8,
    event: &UmpEvent<'_>,
    mut emit: impl FnMut(&[u8]) -> Result<(), E>,
) -> Result<(), E> {
    match *event {
        UmpEvent::Noop => emit(&[header(MessageType::Utility, group), 0x00, 0x00, 0x00]),
        UmpEvent::JitterReductionClock { time } => {
            let [msb, lsb] = time.to_be_bytes();
            emit(&[header(MessageType::Utility, group), 0x10, msb, lsb])
        }
        UmpEvent::JitterReductionTimestamp { timestamp } => {
            let [msb, lsb] = timestamp.to_be_bytes();
            emit(&[header(MessageType::Utility, group), 0x20, msb, lsb])
        }
        UmpEvent::System(event) => {
            let Some([status, data1, data2]) = event
                .to_message_bytes()
                .filter(|_| !event.is_channel_voice())
            else {
                log::warn!("Not a system message: {event:?}");
                return Ok(());
            };
            emit(&[header(MessageType::System, group), status, data1, data2])
        }
        UmpEvent::Midi1ChannelVoice(event) => {
            let Some([status, data1, data2]) = event
                .to_message_bytes()
                .filter(|_| event.is_channel_voice())
            else {
                log::warn!("Not a MIDI 1.0 channel voice message: {event:?}");
                return Ok(());
            };
            emit(&[
                header(MessageType::Midi1ChannelVoice, group),
                status,
                data1,
                data2,
            ])
        }
        UmpEvent::Midi2ChannelVoice(event) => emit(&encode_midi2(group, &event)),
        UmpEvent::SystemExclusive7 { data } => {
            let count = data.len().div_ceil(SYSEX7_CHUNK_LEN).max(1);
            for index in 0..count {
                let start = (index * SYSEX7_CHUNK_LEN).min(data.len());
                let end = (start + SYSEX7_CHUNK_LEN).min(data.len());
                let chunk = &data[start..end];
                let status = SysExStatus::for_chunk(index, count) as u8;
                let mut packet = [0; 2 * WORD_LEN];
                packet[0] = header(MessageType::Data64, group);
                #[expect(clippy::cast_possible_truncation)]
                let len = chunk.len() as u8;
                packet[1] = status << 4 | len;
                packet[2..2 + chunk.len()].copy_from_slice(chunk);
                emit(&packet)?;
            }
            Ok(())
        }
        UmpEvent::SystemExclusive8 { stream_id, data } => {
            let count = data.len().div_ceil(SYSEX8_CHUNK_LEN).max(1);
            for index in 0..count {
                let start = (index * SYSEX8_CHUNK_LEN).min(data.len());
                let end = (start + SYSEX8_CHUNK_LEN).min(data.len());
                let chunk = &data[start..end];
                let status = SysExStatus::for_chunk(index, count) as u8;
                let mut packet = [0; MAX_PACKET_LEN];
                packet[0] = header(MessageType::Data128, group);
                // The byte count includes the stream id
                #[expect(clippy::cast_possible_truncation)]
                let len = chunk.len() as u8 + 1;
                packet[1] = status << 4 | len;
                packet[2] = stream_id;
                packet[3..3 + chunk.len()].copy_from_slice(chunk);
                emit(&packet)?;
            }
            Ok(())
        }
        UmpEvent::MixedDataSetHeader(mds_header) => {
            let mut packet = [0; MAX_PACKET_LEN];
            packet[0] = header(MessageType::Data128, group);
            packet[1] = MIXED_DATA_SET_HEADER_STATUS << 4 | mds_header.mds_id & 0x0f;
            packet[2..].copy_from_slice(&mds_header.to_bytes());
            emit(&packet)
        }
        UmpEvent::MixedDataSetPayload { mds_id, data } => {
            let mut packet = [0; MAX_PACKET_LEN];
            packet[0] = header(MessageType::Data128, group);
            packet[1] = MIXED_DATA_SET_PAYLOAD_STATUS << 4 | mds_id & 0x0f;
            packet[2..2 + MIXED_DATA_SET_CHUNK_LEN].copy_from_slice(data);
            emit(&packet)
        }
    }
}

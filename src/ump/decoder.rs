// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;

use super::{
    packet_len, Midi2Event, MessageType, MixedDataSetHeader, SysExStatus, UmpEvent,
    UmpInputHandler, MAX_PACKET_LEN, MIXED_DATA_SET_CHUNK_LEN, MIXED_DATA_SET_HEADER_STATUS,
    MIXED_DATA_SET_PAYLOAD_STATUS, SYSEX7_CHUNK_LEN, SYSEX8_CHUNK_LEN, WORD_LEN,
};
use crate::{
    input::PacketDecoder,
    midi1::{MidiEvent, MAX_SYSEX_LEN},
};

const GROUP_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SysExState {
    #[default]
    Idle,
    Active,
    /// Remaining chunks are dropped until the next start
    Overflowed,
}

/// Reusable accumulator of a segmented SysEx message.
#[derive(Debug, Default)]
struct SysExBuffer {
    data: Vec<u8>,
    state: SysExState,
}

impl SysExBuffer {
    fn start(&mut self, chunk: &[u8]) {
        if self.state == SysExState::Active {
            log::warn!(
                "Discarding unterminated SysEx: {len} byte(s)",
                len = self.data.len()
            );
        }
        self.data.clear();
        self.data.extend_from_slice(chunk);
        self.state = SysExState::Active;
    }

    /// Returns `false` if no message has been started.
    fn append(&mut self, chunk: &[u8]) -> bool {
        match self.state {
            SysExState::Idle => false,
            SysExState::Overflowed => true,
            SysExState::Active => {
                if self.data.len() + chunk.len() > MAX_SYSEX_LEN {
                    log::warn!("Discarding oversized SysEx: more than {MAX_SYSEX_LEN} byte(s)");
                    self.data.clear();
                    self.state = SysExState::Overflowed;
                } else {
                    self.data.extend_from_slice(chunk);
                }
                true
            }
        }
    }

    /// Append the last chunk and return the complete message.
    fn end(&mut self, chunk: &[u8]) -> Option<&[u8]> {
        let appended = self.append(chunk);
        let state = std::mem::take(&mut self.state);
        (appended && state == SysExState::Active).then_some(self.data.as_slice())
    }
}

/// Decodes a stream of Universal MIDI Packets.
///
/// The stream may be split arbitrarily between transfers.
#[derive(Debug)]
pub struct UmpDecoder {
    /// Incomplete trailing word of the last transfer
    carry: [u8; WORD_LEN],
    carry_len: usize,
    /// Words of the current packet
    waiting: [u8; MAX_PACKET_LEN],
    waiting_len: usize,
    waiting_packet_len: usize,
    sysex7: [SysExBuffer; GROUP_COUNT],
    sysex8: HashMap<(u8, u8), SysExBuffer>,
    mds_header: [[u8; MIXED_DATA_SET_CHUNK_LEN]; GROUP_COUNT],
    mds_payload: [[u8; MIXED_DATA_SET_CHUNK_LEN]; GROUP_COUNT],
}

impl Default for UmpDecoder {
    fn default() -> Self {
        Self {
            carry: [0; WORD_LEN],
            carry_len: 0,
            waiting: [0; MAX_PACKET_LEN],
            waiting_len: 0,
            waiting_packet_len: 0,
            sysex7: Default::default(),
            sysex8: HashMap::new(),
            mds_header: [[0; MIXED_DATA_SET_CHUNK_LEN]; GROUP_COUNT],
            mds_payload: [[0; MIXED_DATA_SET_CHUNK_LEN]; GROUP_COUNT],
        }
    }
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_midi2(packet: &[u8]) -> Option<Midi2Event> {
    let status = packet[1] >> 4;
    let channel = packet[1] & 0x0f;
    let byte2 = packet[2];
    let byte3 = packet[3];
    let data = be_u32(&packet[4..8]);
    let event = match status {
        0x0 => Midi2Event::RegisteredPerNoteController {
            channel,
            note: byte2,
            index: byte3,
            data,
        },
        0x1 => Midi2Event::AssignablePerNoteController {
            channel,
            note: byte2,
            index: byte3,
            data,
        },
        0x2 => Midi2Event::RegisteredController {
            channel,
            bank: byte2,
            index: byte3,
            data,
        },
        0x3 => Midi2Event::AssignableController {
            channel,
            bank: byte2,
            index: byte3,
            data,
        },
        0x4 => Midi2Event::RelativeRegisteredController {
            channel,
            bank: byte2,
            index: byte3,
            data: i32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        },
        0x5 => Midi2Event::RelativeAssignableController {
            channel,
            bank: byte2,
            index: byte3,
            data: i32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
        },
        0x6 => Midi2Event::PerNotePitchBend {
            channel,
            note: byte2,
            data,
        },
        0x8 => Midi2Event::NoteOff {
            channel,
            note: byte2,
            attribute_type: byte3,
            velocity: be_u16(&packet[4..6]),
            attribute: be_u16(&packet[6..8]),
        },
        0x9 => Midi2Event::NoteOn {
            channel,
            note: byte2,
            attribute_type: byte3,
            velocity: be_u16(&packet[4..6]),
            attribute: be_u16(&packet[6..8]),
        },
        0xa => Midi2Event::PolyphonicAftertouch {
            channel,
            note: byte2,
            data,
        },
        0xb => Midi2Event::ControlChange {
            channel,
            index: byte2,
            data,
        },
        0xc => Midi2Event::ProgramChange {
            channel,
            program: packet[4],
            bank: (byte3 & 0x01 != 0)
                .then(|| u16::from(packet[6] & 0x7f) << 7 | u16::from(packet[7] & 0x7f)),
        },
        0xd => Midi2Event::ChannelAftertouch { channel, data },
        0xe => Midi2Event::PitchBend { channel, data },
        0xf => Midi2Event::PerNoteManagement {
            channel,
            note: byte2,
            options: byte3,
        },
        _ => return None,
    };
    Some(event)
}

impl UmpDecoder {
    /// Number of buffered bytes that do not form a complete packet yet.
    #[must_use]
    pub const fn pending_len(&self) -> usize {
        self.carry_len + self.waiting_len
    }

    fn push_word<H>(&mut self, word: [u8; WORD_LEN], handler: Option<&mut H>)
    where
        H: UmpInputHandler + ?Sized,
    {
        if self.waiting_len == 0 {
            self.waiting_packet_len = packet_len(word[0] >> 4);
        }
        self.waiting[self.waiting_len..self.waiting_len + WORD_LEN].copy_from_slice(&word);
        self.waiting_len += WORD_LEN;
        if self.waiting_len < self.waiting_packet_len {
            return;
        }
        let packet_len = self.waiting_packet_len;
        let packet = self.waiting;
        self.waiting_len = 0;
        self.waiting_packet_len = 0;
        self.decode_packet(&packet[..packet_len], handler);
    }

    /// Decode a single, complete packet.
    ///
    /// Packets with a length that does not match their message type are skipped.
    pub fn decode_packet<H>(&mut self, packet: &[u8], handler: Option<&mut H>)
    where
        H: UmpInputHandler + ?Sized,
    {
        let Some(&header) = packet.first() else {
            return;
        };
        if packet_len(header >> 4) != packet.len() {
            log::debug!("Skipping packet with mismatching length: {packet:02x?}");
            return;
        }
        let group = header & 0x0f;
        let Some(message_type) = MessageType::from_repr(header >> 4) else {
            log::debug!("Skipping packet with reserved message type: {packet:02x?}");
            return;
        };
        let event = match message_type {
            MessageType::Utility => match packet[1] >> 4 {
                0x0 => UmpEvent::Noop,
                0x1 => UmpEvent::JitterReductionClock {
                    time: be_u16(&packet[2..4]),
                },
                0x2 => UmpEvent::JitterReductionTimestamp {
                    timestamp: be_u16(&packet[2..4]),
                },
                _ => {
                    log::debug!("Skipping unsupported utility message: {packet:02x?}");
                    return;
                }
            },
            MessageType::System => {
                match MidiEvent::from_message_bytes([packet[1], packet[2], packet[3]]) {
                    Some(event) if !event.is_channel_voice() => UmpEvent::System(event),
                    _ => {
                        log::debug!("Skipping invalid system message: {packet:02x?}");
                        return;
                    }
                }
            }
            MessageType::Midi1ChannelVoice => {
                match MidiEvent::from_message_bytes([packet[1], packet[2], packet[3]]) {
                    Some(event) if event.is_channel_voice() => UmpEvent::Midi1ChannelVoice(event),
                    _ => {
                        log::debug!("Skipping invalid MIDI 1.0 channel voice message: {packet:02x?}");
                        return;
                    }
                }
            }
            MessageType::Midi2ChannelVoice => {
                let Some(event) = decode_midi2(packet) else {
                    log::debug!("Skipping invalid MIDI 2.0 channel voice message: {packet:02x?}");
                    return;
                };
                UmpEvent::Midi2ChannelVoice(event)
            }
            MessageType::Data64 => {
                self.decode_sysex7(group, packet, handler);
                return;
            }
            MessageType::Data128 => {
                self.decode_data128(group, packet, handler);
                return;
            }
        };
        if let Some(handler) = handler {
            handler.handle_ump_event(group, event);
        }
    }

    fn decode_sysex7<H>(&mut self, group: u8, packet: &[u8], handler: Option<&mut H>)
    where
        H: UmpInputHandler + ?Sized,
    {
        let Some(status) = SysExStatus::from_repr(packet[1] >> 4) else {
            log::debug!("Skipping 64-bit data message: {packet:02x?}");
            return;
        };
        let count = usize::from(packet[1] & 0x0f).min(SYSEX7_CHUNK_LEN);
        let chunk = &packet[2..2 + count];
        let buffer = &mut self.sysex7[usize::from(group)];
        let data = match status {
            SysExStatus::Complete => chunk,
            SysExStatus::Start => {
                buffer.start(chunk);
                return;
            }
            SysExStatus::Continue => {
                if !buffer.append(chunk) {
                    log::warn!("Discarding SysEx continuation without start in group {group}");
                }
                return;
            }
            SysExStatus::End => {
                let Some(data) = buffer.end(chunk) else {
                    log::warn!("Discarding incomplete SysEx in group {group}");
                    return;
                };
                data
            }
        };
        if let Some(handler) = handler {
            handler.handle_ump_event(group, UmpEvent::SystemExclusive7 { data });
        }
    }

    fn decode_data128<H>(&mut self, group: u8, packet: &[u8], handler: Option<&mut H>)
    where
        H: UmpInputHandler + ?Sized,
    {
        let status = packet[1] >> 4;
        let low_nibble = packet[1] & 0x0f;
        match status {
            MIXED_DATA_SET_HEADER_STATUS => {
                let header = &mut self.mds_header[usize::from(group)];
                header.copy_from_slice(&packet[2..2 + MIXED_DATA_SET_CHUNK_LEN]);
                let header = MixedDataSetHeader::from_bytes(low_nibble, header);
                if let Some(handler) = handler {
                    handler.handle_ump_event(group, UmpEvent::MixedDataSetHeader(header));
                }
                return;
            }
            MIXED_DATA_SET_PAYLOAD_STATUS => {
                let payload = &mut self.mds_payload[usize::from(group)];
                payload.copy_from_slice(&packet[2..2 + MIXED_DATA_SET_CHUNK_LEN]);
                if let Some(handler) = handler {
                    let event = UmpEvent::MixedDataSetPayload {
                        mds_id: low_nibble,
                        data: payload,
                    };
                    handler.handle_ump_event(group, event);
                }
                return;
            }
            _ => (),
        }
        let Some(status) = SysExStatus::from_repr(status) else {
            log::debug!("Skipping 128-bit data message: {packet:02x?}");
            return;
        };
        // The byte count includes the stream id
        let count = usize::from(low_nibble)
            .saturating_sub(1)
            .min(SYSEX8_CHUNK_LEN);
        let stream_id = packet[2];
        let chunk = &packet[3..3 + count];
        let buffer = self.sysex8.entry((group, stream_id)).or_default();
        let data = match status {
            SysExStatus::Complete => chunk,
            SysExStatus::Start => {
                buffer.start(chunk);
                return;
            }
            SysExStatus::Continue => {
                if !buffer.append(chunk) {
                    log::warn!(
                        "Discarding SysEx8 continuation without start in group {group}, stream {stream_id}"
                    );
                }
                return;
            }
            SysExStatus::End => {
                let Some(data) = buffer.end(chunk) else {
                    log::warn!(
                        "Discarding incomplete SysEx8 in group {group}, stream {stream_id}"
                    );
                    return;
                };
                data
            }
        };
        if let Some(handler) = handler {
            handler.handle_ump_event(group, UmpEvent::SystemExclusive8 { stream_id, data });
        }
    }
}

impl PacketDecoder for UmpDecoder {
    type Handler = dyn UmpInputHandler;

    fn decode(&mut self, mut data: &[u8], mut handler: Option<&mut Self::Handler>) {
        if self.carry_len > 0 {
            let take = (WORD_LEN - self.carry_len).min(data.len());
            self.carry[self.carry_len..self.carry_len + take].copy_from_slice(&data[..take]);
            self.carry_len += take;
            data = &data[take..];
            if self.carry_len < WORD_LEN {
                return;
            }
            self.carry_len = 0;
            let word = self.carry;
            self.push_word(word, handler.as_deref_mut());
        }
        let mut words = data.chunks_exact(WORD_LEN);
        for word in words.by_ref() {
            let Ok(word) = word.try_into() else {
                continue;
            };
            self.push_word(word, handler.as_deref_mut());
        }
        let remainder = words.remainder();
        if !remainder.is_empty() {
            log::trace!("Carrying {remainder:02x?}");
            self.carry[..remainder.len()].copy_from_slice(remainder);
            self.carry_len = remainder.len();
        }
    }
}

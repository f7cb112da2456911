// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::{
    CodeIndexNumber, MidiEvent, MidiInputHandler, MAX_SYSEX_LEN, PACKET_LEN, SYSEX_END,
    SYSEX_START,
};
use crate::input::PacketDecoder;

const CABLE_COUNT: usize = 16;

/// Decodes USB-MIDI 1.0 event packets.
///
/// SysEx messages are reassembled separately for each virtual cable.
#[derive(Debug)]
pub struct MidiDecoder {
    sysex: [Vec<u8>; CABLE_COUNT],
}

impl Default for MidiDecoder {
    fn default() -> Self {
        Self {
            sysex: std::array::from_fn(|_| Vec::new()),
        }
    }
}

impl MidiDecoder {
    /// Decode a single packet.
    pub fn decode_packet<H>(&mut self, packet: &[u8; PACKET_LEN], handler: Option<&mut H>)
    where
        H: MidiInputHandler + ?Sized,
    {
        if packet == &[0; PACKET_LEN] {
            // Padding
            return;
        }
        let cable = packet[0] >> 4;
        let cin = CodeIndexNumber::from_header(packet[0]);
        let [_, byte1, byte2, byte3] = *packet;
        let channel = byte1 & 0x0f;
        let event = match cin {
            CodeIndexNumber::MiscFunction => MidiEvent::MiscFunction {
                data: [byte1, byte2, byte3],
            },
            CodeIndexNumber::CableEvent => MidiEvent::CableEvent {
                data: [byte1, byte2, byte3],
            },
            CodeIndexNumber::SystemCommon2 => match byte1 {
                0xf1 => MidiEvent::TimeCodeQuarterFrame { value: byte2 },
                0xf3 => MidiEvent::SongSelect { song: byte2 },
                _ => MidiEvent::SystemCommon {
                    data: &packet[1..3],
                },
            },
            CodeIndexNumber::SystemCommon3 => match byte1 {
                0xf2 => MidiEvent::SongPositionPointer {
                    position: u16::from(byte2 & 0x7f) | u16::from(byte3 & 0x7f) << 7,
                },
                _ => MidiEvent::SystemCommon {
                    data: &packet[1..4],
                },
            },
            CodeIndexNumber::SysExStart => {
                self.continue_sysex(cable, &packet[1..4]);
                return;
            }
            CodeIndexNumber::SingleSystemCommonOrSysExEnd1 => match byte1 {
                0xf6 => MidiEvent::TuneRequest,
                0xf1..=0xf5 => MidiEvent::SystemCommon {
                    data: &packet[1..2],
                },
                _ if byte1 == SYSEX_END || !self.sysex[usize::from(cable)].is_empty() => {
                    self.end_sysex(cable, &packet[1..2], handler);
                    return;
                }
                _ => MidiEvent::from_single_byte(byte1),
            },
            CodeIndexNumber::SysExEnd2 => {
                self.end_sysex(cable, &packet[1..3], handler);
                return;
            }
            CodeIndexNumber::SysExEnd3 => {
                self.end_sysex(cable, &packet[1..4], handler);
                return;
            }
            CodeIndexNumber::NoteOff => MidiEvent::NoteOff {
                channel,
                note: byte2,
                velocity: byte3,
            },
            CodeIndexNumber::NoteOn => MidiEvent::NoteOn {
                channel,
                note: byte2,
                velocity: byte3,
            },
            CodeIndexNumber::PolyphonicKeyPressure => MidiEvent::PolyphonicAftertouch {
                channel,
                note: byte2,
                pressure: byte3,
            },
            CodeIndexNumber::ControlChange => MidiEvent::ControlChange {
                channel,
                function: byte2,
                value: byte3,
            },
            CodeIndexNumber::ProgramChange => MidiEvent::ProgramChange {
                channel,
                program: byte2,
            },
            CodeIndexNumber::ChannelPressure => MidiEvent::ChannelAftertouch {
                channel,
                pressure: byte2,
            },
            CodeIndexNumber::PitchBend => MidiEvent::PitchWheel {
                channel,
                amount: u16::from(byte2 & 0x7f) | u16::from(byte3 & 0x7f) << 7,
            },
            CodeIndexNumber::SingleByte => MidiEvent::from_single_byte(byte1),
        };
        if let Some(handler) = handler {
            handler.handle_midi_event(cable, event);
        }
    }

    fn continue_sysex(&mut self, cable: u8, bytes: &[u8]) {
        let sysex = &mut self.sysex[usize::from(cable)];
        if bytes.first() == Some(&SYSEX_START) {
            if !sysex.is_empty() {
                log::warn!(
                    "Discarding unterminated SysEx on cable {cable}: {len} byte(s)",
                    len = sysex.len()
                );
            }
            sysex.clear();
        } else if sysex.is_empty() {
            // Not started or already discarded
            return;
        }
        if sysex.len() + bytes.len() > MAX_SYSEX_LEN {
            log::warn!(
                "Discarding oversized SysEx on cable {cable}: more than {MAX_SYSEX_LEN} byte(s)"
            );
            sysex.clear();
            return;
        }
        sysex.extend_from_slice(bytes);
    }

    fn end_sysex<H>(&mut self, cable: u8, bytes: &[u8], handler: Option<&mut H>)
    where
        H: MidiInputHandler + ?Sized,
    {
        self.continue_sysex(cable, bytes);
        let sysex = &mut self.sysex[usize::from(cable)];
        if sysex.first() == Some(&SYSEX_START) {
            if let Some(handler) = handler {
                let event = MidiEvent::SystemExclusive {
                    data: sysex.as_slice(),
                };
                handler.handle_midi_event(cable, event);
            }
        } else {
            log::warn!("Discarding incomplete SysEx on cable {cable}");
        }
        sysex.clear();
    }
}

impl PacketDecoder for MidiDecoder {
    type Handler = dyn MidiInputHandler;

    fn decode(&mut self, data: &[u8], mut handler: Option<&mut Self::Handler>) {
        let mut packets = data.chunks_exact(PACKET_LEN);
        for packet in packets.by_ref() {
            let Ok(packet) = packet.try_into() else {
                continue;
            };
            self.decode_packet(packet, handler.as_deref_mut());
        }
        let remainder = packets.remainder();
        if !remainder.is_empty() {
            log::debug!("Ignoring incomplete packet: {remainder:02x?}");
        }
    }
}

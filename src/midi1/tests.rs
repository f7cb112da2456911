// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::{convert::Infallible, sync::Arc, time::Duration};

use super::*;
use crate::{
    input::PacketDecoder as _,
    output::OutputConfig,
    port::PortDescriptor,
    usb::{
        mock::{midi_device, midi_streaming_interface, MockConnection, MIDI_OUT_ENDPOINT},
        DeviceKey, Direction, UsbConnection,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Recorded {
    Event(u8, MidiEvent<'static>),
    SysEx(u8, Vec<u8>),
    SystemCommon(u8, Vec<u8>),
}

#[derive(Default)]
struct Recorder(Vec<Recorded>);

impl MidiInputHandler for Recorder {
    fn handle_midi_event(&mut self, cable: u8, event: MidiEvent<'_>) {
        let recorded = match event {
            MidiEvent::SystemExclusive { data } => Recorded::SysEx(cable, data.to_vec()),
            MidiEvent::SystemCommon { data } => Recorded::SystemCommon(cable, data.to_vec()),
            MidiEvent::MiscFunction { data } => {
                Recorded::Event(cable, MidiEvent::MiscFunction { data })
            }
            MidiEvent::CableEvent { data } => {
                Recorded::Event(cable, MidiEvent::CableEvent { data })
            }
            MidiEvent::TimeCodeQuarterFrame { value } => {
                Recorded::Event(cable, MidiEvent::TimeCodeQuarterFrame { value })
            }
            MidiEvent::SongSelect { song } => {
                Recorded::Event(cable, MidiEvent::SongSelect { song })
            }
            MidiEvent::SongPositionPointer { position } => {
                Recorded::Event(cable, MidiEvent::SongPositionPointer { position })
            }
            MidiEvent::TuneRequest => Recorded::Event(cable, MidiEvent::TuneRequest),
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => Recorded::Event(
                cable,
                MidiEvent::NoteOff {
                    channel,
                    note,
                    velocity,
                },
            ),
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => Recorded::Event(
                cable,
                MidiEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                },
            ),
            MidiEvent::PolyphonicAftertouch {
                channel,
                note,
                pressure,
            } => Recorded::Event(
                cable,
                MidiEvent::PolyphonicAftertouch {
                    channel,
                    note,
                    pressure,
                },
            ),
            MidiEvent::ControlChange {
                channel,
                function,
                value,
            } => Recorded::Event(
                cable,
                MidiEvent::ControlChange {
                    channel,
                    function,
                    value,
                },
            ),
            MidiEvent::ProgramChange { channel, program } => {
                Recorded::Event(cable, MidiEvent::ProgramChange { channel, program })
            }
            MidiEvent::ChannelAftertouch { channel, pressure } => {
                Recorded::Event(cable, MidiEvent::ChannelAftertouch { channel, pressure })
            }
            MidiEvent::PitchWheel { channel, amount } => {
                Recorded::Event(cable, MidiEvent::PitchWheel { channel, amount })
            }
            MidiEvent::SingleByte { byte } => {
                Recorded::Event(cable, MidiEvent::SingleByte { byte })
            }
            MidiEvent::TimingClock => Recorded::Event(cable, MidiEvent::TimingClock),
            MidiEvent::Start => Recorded::Event(cable, MidiEvent::Start),
            MidiEvent::Continue => Recorded::Event(cable, MidiEvent::Continue),
            MidiEvent::Stop => Recorded::Event(cable, MidiEvent::Stop),
            MidiEvent::ActiveSensing => Recorded::Event(cable, MidiEvent::ActiveSensing),
            MidiEvent::Reset => Recorded::Event(cable, MidiEvent::Reset),
        };
        self.0.push(recorded);
    }
}

fn encode(cable: u8, event: &MidiEvent<'_>) -> Vec<u8> {
    let mut bytes = Vec::new();
    encode_event(cable, event, |packet| {
        bytes.extend_from_slice(&packet);
        Ok::<_, Infallible>(())
    })
    .unwrap();
    bytes
}

fn decode(bytes: &[u8]) -> Vec<Recorded> {
    let mut decoder = MidiDecoder::default();
    let mut recorder = Recorder::default();
    decoder.decode(bytes, Some(&mut recorder as &mut dyn MidiInputHandler));
    recorder.0
}

#[test]
fn note_on_wire_layout() {
    let event = MidiEvent::NoteOn {
        channel: 3,
        note: 60,
        velocity: 64,
    };
    let bytes = encode(2, &event);
    assert_eq!(vec![0x29, 0x93, 0x3c, 0x40], bytes);
    assert_eq!(vec![Recorded::Event(2, event)], decode(&bytes));
}

#[test]
fn channel_messages_round_trip() {
    let events = [
        MidiEvent::NoteOff {
            channel: 15,
            note: 127,
            velocity: 0,
        },
        MidiEvent::PolyphonicAftertouch {
            channel: 1,
            note: 64,
            pressure: 100,
        },
        MidiEvent::ControlChange {
            channel: 9,
            function: 7,
            value: 127,
        },
        MidiEvent::ProgramChange {
            channel: 0,
            program: 42,
        },
        MidiEvent::ChannelAftertouch {
            channel: 4,
            pressure: 33,
        },
        MidiEvent::PitchWheel {
            channel: 2,
            amount: 0x3fff,
        },
        MidiEvent::TimeCodeQuarterFrame { value: 0x35 },
        MidiEvent::SongSelect { song: 3 },
        MidiEvent::SongPositionPointer { position: 0x1234 },
        MidiEvent::TuneRequest,
        MidiEvent::TimingClock,
        MidiEvent::Start,
        MidiEvent::Continue,
        MidiEvent::Stop,
        MidiEvent::ActiveSensing,
        MidiEvent::Reset,
    ];
    for cable in [0, 7, 15] {
        let bytes: Vec<u8> = events
            .iter()
            .flat_map(|event| encode(cable, event))
            .collect();
        let expected: Vec<_> = events
            .iter()
            .map(|event| Recorded::Event(cable, *event))
            .collect();
        assert_eq!(expected, decode(&bytes));
    }
}

#[test]
fn pitch_wheel_is_14_bit() {
    let bytes = encode(
        0,
        &MidiEvent::PitchWheel {
            channel: 0,
            amount: 0x2000,
        },
    );
    assert_eq!(vec![0x0e, 0xe0, 0x00, 0x40], bytes);
}

#[test]
fn sysex_round_trip_for_every_length() {
    for payload_len in 0..32_u8 {
        let mut message = vec![SYSEX_START];
        message.extend(0..payload_len);
        message.push(SYSEX_END);
        let bytes = encode(5, &MidiEvent::SystemExclusive { data: &message });
        assert_eq!(message.len().div_ceil(3) * PACKET_LEN, bytes.len());
        assert_eq!(vec![Recorded::SysEx(5, message)], decode(&bytes));
    }
}

#[test]
fn sysex_code_index_numbers() {
    let message = [0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7];
    assert_eq!(
        vec![0x14, 0xf0, 0x7e, 0x7f, 0x17, 0x06, 0x01, 0xf7],
        encode(1, &MidiEvent::SystemExclusive { data: &message })
    );
    let message = [0xf0, 0x01, 0x02, 0xf7];
    assert_eq!(
        vec![0x04, 0xf0, 0x01, 0x02, 0x05, 0xf7, 0x00, 0x00],
        encode(0, &MidiEvent::SystemExclusive { data: &message })
    );
}

#[test]
fn reassemble_sysex_per_cable() {
    let first = [0xf0, 0x01, 0x02, 0x03, 0x04, 0xf7];
    let second = [0xf0, 0x11, 0x12, 0x13, 0x14, 0x15, 0xf7];
    let first_packets: Vec<_> = sysex_packets(1, &first).collect();
    let second_packets: Vec<_> = sysex_packets(2, &second).collect();
    // Interleave the packets of both cables
    let mut bytes = Vec::new();
    for i in 0..first_packets.len().max(second_packets.len()) {
        if let Some(packet) = first_packets.get(i) {
            bytes.extend_from_slice(packet);
        }
        if let Some(packet) = second_packets.get(i) {
            bytes.extend_from_slice(packet);
        }
    }
    let recorded = decode(&bytes);
    assert_eq!(2, recorded.len());
    assert!(recorded.contains(&Recorded::SysEx(1, first.to_vec())));
    assert!(recorded.contains(&Recorded::SysEx(2, second.to_vec())));
}

#[test]
fn discard_sysex_without_start() {
    let bytes = [0x04, 0x01, 0x02, 0x03, 0x06, 0x04, 0xf7, 0x00];
    assert!(decode(&bytes).is_empty());
}

#[test]
fn restart_unterminated_sysex() {
    let bytes = [
        0x04, 0xf0, 0x01, 0x02, // never terminated
        0x04, 0xf0, 0x03, 0x04, //
        0x06, 0x05, 0xf7, 0x00,
    ];
    assert_eq!(
        vec![Recorded::SysEx(0, vec![0xf0, 0x03, 0x04, 0x05, 0xf7])],
        decode(&bytes)
    );
}

#[test]
fn discard_oversized_sysex() {
    let mut oversized = vec![SYSEX_START];
    oversized.resize(MAX_SYSEX_LEN, 0x55);
    oversized.push(SYSEX_END);
    let message = [0xf0, 0x7e, 0x01, 0xf7];
    let mut bytes = encode(2, &MidiEvent::SystemExclusive { data: &oversized });
    bytes.extend(encode(2, &MidiEvent::SystemExclusive { data: &message }));
    assert_eq!(vec![Recorded::SysEx(2, message.to_vec())], decode(&bytes));
}

#[test]
fn accept_sysex_of_maximum_size() {
    let mut message = vec![SYSEX_START];
    message.resize(MAX_SYSEX_LEN - 1, 0x11);
    message.push(SYSEX_END);
    let bytes = encode(0, &MidiEvent::SystemExclusive { data: &message });
    assert_eq!(vec![Recorded::SysEx(0, message)], decode(&bytes));
}

#[test]
fn skip_padding_and_incomplete_packets() {
    let bytes = [
        0x00, 0x00, 0x00, 0x00, //
        0x0f, 0xf8, 0x00, 0x00, //
        0x00, 0x00, 0x00, 0x00, //
        0x09, 0x90,
    ];
    assert_eq!(vec![Recorded::Event(0, MidiEvent::TimingClock)], decode(&bytes));
}

#[test]
fn system_common_with_undefined_status() {
    let bytes = [0x02, 0xf4, 0x01, 0x00, 0x05, 0xf5, 0x00, 0x00];
    assert_eq!(
        vec![
            Recorded::SystemCommon(0, vec![0xf4, 0x01]),
            Recorded::SystemCommon(0, vec![0xf5]),
        ],
        decode(&bytes)
    );
}

#[test]
fn single_byte_system_common_round_trip() {
    let bytes = encode(3, &MidiEvent::SystemCommon { data: &[0xf4] });
    assert_eq!(vec![0x35, 0xf4, 0x00, 0x00], bytes);
    assert_eq!(vec![Recorded::SystemCommon(3, vec![0xf4])], decode(&bytes));
}

fn start_output_port(connection: &Arc<MockConnection>) -> MidiOutputPort {
    let descriptor = PortDescriptor::new(
        Arc::new(midi_device(DeviceKey { bus: 1, address: 1 }, false)),
        midi_streaming_interface(0),
        Direction::Out,
        None,
        PacketFormat::UsbMidi1,
    )
    .unwrap();
    MidiOutputPort::new(
        descriptor,
        Arc::clone(connection) as Arc<dyn UsbConnection>,
        OutputConfig::default(),
    )
    .unwrap()
}

fn wait_for_written(connection: &MockConnection, len: usize) -> Vec<u8> {
    for _ in 0..2000 {
        let written = connection.written_bytes(MIDI_OUT_ENDPOINT);
        if written.len() >= len {
            return written;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    connection.written_bytes(MIDI_OUT_ENDPOINT)
}

#[test]
fn send_rpn_as_control_changes() {
    let connection = Arc::new(MockConnection::default());
    let port = start_output_port(&connection);
    port.send_rpn(0, 1, 0x0000, 0x0100).unwrap();
    assert_eq!(
        vec![
            0x0b, 0xb1, 101, 0x00, //
            0x0b, 0xb1, 100, 0x00, //
            0x0b, 0xb1, 6, 0x02, //
            0x0b, 0xb1, 38, 0x00,
        ],
        wait_for_written(&connection, 16)
    );
}

#[test]
fn send_unframed_sysex() {
    let connection = Arc::new(MockConnection::default());
    let port = start_output_port(&connection);
    port.send_system_exclusive(3, &[0x7e, 0x00, 0x06, 0x01])
        .unwrap();
    let written = wait_for_written(&connection, 8);
    assert_eq!(
        vec![
            Recorded::SysEx(3, vec![0xf0, 0x7e, 0x00, 0x06, 0x01, 0xf7])
        ],
        decode(&written)
    );
}

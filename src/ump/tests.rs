// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::{convert::Infallible, sync::Arc, time::Duration};

use super::*;
use crate::{
    input::PacketDecoder as _,
    midi1::MAX_SYSEX_LEN,
    output::OutputConfig,
    port::PortDescriptor,
    usb::{
        mock::{midi_device, midi_streaming_interface, MockConnection, MIDI_OUT_ENDPOINT},
        DeviceKey, Direction, UsbConnection, UMP_ALTERNATE_SETTING,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Recorded {
    Event(u8, UmpEvent<'static>),
    SysEx7(u8, Vec<u8>),
    SysEx8(u8, u8, Vec<u8>),
    MixedDataSetPayload(u8, u8, [u8; MIXED_DATA_SET_CHUNK_LEN]),
}

#[derive(Default)]
struct Recorder(Vec<Recorded>);

impl UmpInputHandler for Recorder {
    fn handle_ump_event(&mut self, group: u8, event: UmpEvent<'_>) {
        let recorded = match event {
            UmpEvent::Noop => Recorded::Event(group, UmpEvent::Noop),
            UmpEvent::JitterReductionClock { time } => {
                Recorded::Event(group, UmpEvent::JitterReductionClock { time })
            }
            UmpEvent::JitterReductionTimestamp { timestamp } => {
                Recorded::Event(group, UmpEvent::JitterReductionTimestamp { timestamp })
            }
            UmpEvent::System(event) => Recorded::Event(group, UmpEvent::System(event)),
            UmpEvent::Midi1ChannelVoice(event) => {
                Recorded::Event(group, UmpEvent::Midi1ChannelVoice(event))
            }
            UmpEvent::Midi2ChannelVoice(event) => {
                Recorded::Event(group, UmpEvent::Midi2ChannelVoice(event))
            }
            UmpEvent::SystemExclusive7 { data } => Recorded::SysEx7(group, data.to_vec()),
            UmpEvent::SystemExclusive8 { stream_id, data } => {
                Recorded::SysEx8(group, stream_id, data.to_vec())
            }
            UmpEvent::MixedDataSetHeader(header) => {
                Recorded::Event(group, UmpEvent::MixedDataSetHeader(header))
            }
            UmpEvent::MixedDataSetPayload { mds_id, data } => {
                Recorded::MixedDataSetPayload(group, mds_id, *data)
            }
        };
        self.0.push(recorded);
    }
}

fn encode(group: u8, event: &UmpEvent<'_>) -> Vec<u8> {
    let mut bytes = Vec::new();
    encode_event(group, event, |packet| {
        bytes.extend_from_slice(packet);
        Ok::<_, Infallible>(())
    })
    .unwrap();
    bytes
}

fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<Recorded> {
    let mut decoder = UmpDecoder::default();
    let mut recorder = Recorder::default();
    for chunk in chunks {
        decoder.decode(chunk, Some(&mut recorder as &mut dyn UmpInputHandler));
    }
    recorder.0
}

fn decode(bytes: &[u8]) -> Vec<Recorded> {
    decode_chunks([bytes])
}

fn sample_events() -> Vec<UmpEvent<'static>> {
    vec![
        UmpEvent::Noop,
        UmpEvent::JitterReductionClock { time: 0x1234 },
        UmpEvent::JitterReductionTimestamp { timestamp: 0xfedc },
        UmpEvent::System(MidiEvent::SongPositionPointer { position: 0x0abc }),
        UmpEvent::System(MidiEvent::TimingClock),
        UmpEvent::Midi1ChannelVoice(MidiEvent::NoteOn {
            channel: 5,
            note: 60,
            velocity: 100,
        }),
        UmpEvent::Midi2ChannelVoice(Midi2Event::NoteOn {
            channel: 1,
            note: 64,
            velocity: 0xabcd,
            attribute_type: 3,
            attribute: 0x1357,
        }),
        UmpEvent::Midi2ChannelVoice(Midi2Event::ControlChange {
            channel: 15,
            index: 74,
            data: 0x8000_0001,
        }),
        UmpEvent::Midi2ChannelVoice(Midi2Event::ProgramChange {
            channel: 0,
            program: 12,
            bank: Some(0x1f80),
        }),
        UmpEvent::Midi2ChannelVoice(Midi2Event::RelativeAssignableController {
            channel: 2,
            bank: 3,
            index: 4,
            data: -5,
        }),
        UmpEvent::Midi2ChannelVoice(Midi2Event::PerNoteManagement {
            channel: 7,
            note: 70,
            options: 0x03,
        }),
    ]
}

#[test]
fn midi2_note_on_wire_layout() {
    let bytes = encode(
        3,
        &UmpEvent::Midi2ChannelVoice(Midi2Event::NoteOn {
            channel: 2,
            note: 60,
            velocity: 0x8000,
            attribute_type: 0,
            attribute: 0,
        }),
    );
    assert_eq!(vec![0x43, 0x92, 0x3c, 0x00, 0x80, 0x00, 0x00, 0x00], bytes);
}

#[test]
fn messages_round_trip() {
    for group in [0, 9, 15] {
        let events = sample_events();
        let bytes: Vec<u8> = events.iter().flat_map(|event| encode(group, event)).collect();
        let expected: Vec<_> = events
            .into_iter()
            .map(|event| Recorded::Event(group, event))
            .collect();
        assert_eq!(expected, decode(&bytes));
    }
}

#[test]
fn decoding_is_independent_of_transfer_boundaries() {
    let mut bytes: Vec<u8> = sample_events()
        .iter()
        .flat_map(|event| encode(4, event))
        .collect();
    let payload: Vec<u8> = (0..20).collect();
    bytes.extend(encode(4, &UmpEvent::SystemExclusive7 { data: &payload }));
    let expected = decode(&bytes);
    assert_eq!(sample_events().len() + 1, expected.len());
    for split in 0..=bytes.len() {
        let (head, tail) = bytes.split_at(split);
        assert_eq!(expected, decode_chunks([head, tail]), "split at {split}");
    }
    // Single bytes
    assert_eq!(expected, decode_chunks(bytes.chunks(1)));
    assert_eq!(expected, decode_chunks(bytes.chunks(3)));
}

#[test]
fn carry_incomplete_trailing_bytes() {
    let bytes = encode(0, &UmpEvent::JitterReductionClock { time: 1 });
    let mut decoder = UmpDecoder::default();
    let mut recorder = Recorder::default();
    decoder.decode(&bytes[..3], Some(&mut recorder as &mut dyn UmpInputHandler));
    assert_eq!(3, decoder.pending_len());
    assert!(recorder.0.is_empty());
    decoder.decode(&bytes[3..], Some(&mut recorder as &mut dyn UmpInputHandler));
    assert_eq!(0, decoder.pending_len());
    assert_eq!(1, recorder.0.len());
}

#[test]
fn sysex7_chunking() {
    for len in [0usize, 1, 5, 6, 7, 12, 13, 100] {
        let payload: Vec<u8> = (0..len).map(|i| u8::try_from(i % 0x80).unwrap()).collect();
        let bytes = encode(2, &UmpEvent::SystemExclusive7 { data: &payload });
        let packet_count = len.div_ceil(SYSEX7_CHUNK_LEN).max(1);
        assert_eq!(packet_count * 2 * WORD_LEN, bytes.len(), "length {len}");
        let statuses: Vec<_> = bytes.chunks(8).map(|packet| packet[1] >> 4).collect();
        if packet_count == 1 {
            assert_eq!(vec![SysExStatus::Complete as u8], statuses);
        } else {
            assert_eq!(SysExStatus::Start as u8, statuses[0]);
            assert_eq!(SysExStatus::End as u8, statuses[packet_count - 1]);
            assert!(statuses[1..packet_count - 1]
                .iter()
                .all(|status| *status == SysExStatus::Continue as u8));
        }
        assert_eq!(vec![Recorded::SysEx7(2, payload)], decode(&bytes));
    }
}

#[test]
fn sysex8_count_includes_stream_id() {
    let payload: Vec<u8> = (0..3).collect();
    let bytes = encode(
        0,
        &UmpEvent::SystemExclusive8 {
            stream_id: 9,
            data: &payload,
        },
    );
    assert_eq!(MAX_PACKET_LEN, bytes.len());
    assert_eq!(0x50, bytes[0]);
    assert_eq!(0x04, bytes[1]);
    assert_eq!(9, bytes[2]);
    assert_eq!(&[0, 1, 2], &bytes[3..6]);
}

#[test]
fn sysex8_streams_are_reassembled_separately() {
    for len in [12usize, 13, 14, 26, 27, 40] {
        let first: Vec<u8> = (0..len).map(|i| u8::try_from(i % 0x100).unwrap()).collect();
        let second: Vec<u8> = (0..len).map(|i| u8::try_from(0xff - i % 0x100).unwrap()).collect();
        let first_bytes = encode(
            1,
            &UmpEvent::SystemExclusive8 {
                stream_id: 1,
                data: &first,
            },
        );
        let second_bytes = encode(
            1,
            &UmpEvent::SystemExclusive8 {
                stream_id: 2,
                data: &second,
            },
        );
        // Interleave the packets of both streams
        let mut bytes = Vec::new();
        for (a, b) in first_bytes
            .chunks(MAX_PACKET_LEN)
            .zip(second_bytes.chunks(MAX_PACKET_LEN))
        {
            bytes.extend_from_slice(a);
            bytes.extend_from_slice(b);
        }
        assert_eq!(
            vec![Recorded::SysEx8(1, 1, first), Recorded::SysEx8(1, 2, second)],
            decode(&bytes),
            "length {len}"
        );
    }
}

#[test]
fn discard_sysex7_continuation_without_start() {
    let bytes = [
        0x30, 0x22, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, //
        0x30, 0x31, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];
    assert!(decode(&bytes).is_empty());
}

#[test]
fn discard_oversized_sysex7() {
    let oversized = vec![0x55; MAX_SYSEX_LEN + 1];
    let message = [0x7e, 0x01, 0x02];
    let mut bytes = encode(4, &UmpEvent::SystemExclusive7 { data: &oversized });
    bytes.extend(encode(4, &UmpEvent::SystemExclusive7 { data: &message }));
    assert_eq!(vec![Recorded::SysEx7(4, message.to_vec())], decode(&bytes));
    // Exactly at the limit
    let message = vec![0x11; MAX_SYSEX_LEN];
    let bytes = encode(4, &UmpEvent::SystemExclusive7 { data: &message });
    assert_eq!(vec![Recorded::SysEx7(4, message)], decode(&bytes));
}

#[test]
fn discard_oversized_sysex8() {
    let oversized = vec![0xaa; MAX_SYSEX_LEN + 1];
    let message = [0x01, 0x02, 0x03];
    let mut bytes = encode(
        1,
        &UmpEvent::SystemExclusive8 {
            stream_id: 3,
            data: &oversized,
        },
    );
    bytes.extend(encode(
        1,
        &UmpEvent::SystemExclusive8 {
            stream_id: 3,
            data: &message,
        },
    ));
    assert_eq!(vec![Recorded::SysEx8(1, 3, message.to_vec())], decode(&bytes));
}

#[test]
fn skip_packet_with_mismatching_length() {
    let mut decoder = UmpDecoder::default();
    let mut recorder = Recorder::default();
    let packet = encode(0, &UmpEvent::SystemExclusive7 { data: &[1, 2] });
    for packet in [&[][..], &packet[..WORD_LEN], &packet[..1]] {
        decoder.decode_packet(packet, Some(&mut recorder));
    }
    assert!(recorder.0.is_empty());
    decoder.decode_packet(&packet, Some(&mut recorder));
    assert_eq!(vec![Recorded::SysEx7(0, vec![1, 2])], recorder.0);
}

#[test]
fn mixed_data_set() {
    let header = MixedDataSetHeader {
        mds_id: 2,
        valid_bytes: 14,
        chunk_count: 1,
        chunk_index: 1,
        manufacturer_id: 0x0041,
        device_id: 0x0102,
        sub_id1: 0x0304,
        sub_id2: 0x0506,
    };
    let payload: [u8; MIXED_DATA_SET_CHUNK_LEN] = core::array::from_fn(|i| u8::try_from(i + 1).unwrap());
    let mut bytes = encode(6, &UmpEvent::MixedDataSetHeader(header));
    assert_eq!(0x82, bytes[1]);
    bytes.extend(encode(
        6,
        &UmpEvent::MixedDataSetPayload {
            mds_id: 2,
            data: &payload,
        },
    ));
    assert_eq!(
        vec![
            Recorded::Event(6, UmpEvent::MixedDataSetHeader(header)),
            Recorded::MixedDataSetPayload(6, 2, payload),
        ],
        decode(&bytes)
    );
}

#[test]
fn skip_reserved_message_types() {
    let mut bytes = Vec::new();
    for message_type in 0x6..=0xf_u8 {
        let mut packet = vec![0; packet_len(message_type)];
        packet[0] = message_type << 4;
        packet[1] = 0xff;
        bytes.extend(packet);
        bytes.extend(encode(0, &UmpEvent::System(MidiEvent::Start)));
    }
    let recorded = decode(&bytes);
    assert_eq!(10, recorded.len());
    assert!(recorded
        .iter()
        .all(|recorded| *recorded == Recorded::Event(0, UmpEvent::System(MidiEvent::Start))));
}

#[test]
fn packet_lengths() {
    let lengths: Vec<_> = (0..16).map(packet_len).collect();
    assert_eq!(
        vec![4, 4, 4, 8, 8, 16, 4, 4, 8, 8, 8, 12, 12, 16, 16, 16],
        lengths
    );
}

fn start_output_port(connection: &Arc<MockConnection>) -> UmpOutputPort {
    let descriptor = PortDescriptor::new(
        Arc::new(midi_device(DeviceKey { bus: 2, address: 5 }, true)),
        midi_streaming_interface(UMP_ALTERNATE_SETTING),
        Direction::Out,
        None,
        PacketFormat::Ump,
    )
    .unwrap();
    UmpOutputPort::new(
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
fn send_framed_sysex7() {
    let connection = Arc::new(MockConnection::default());
    let port = start_output_port(&connection);
    let message = [0xf0, 0x7e, 0x7f, 0x06, 0x01, 0x00, 0x00, 0xf7];
    port.send_system_exclusive7(1, &message).unwrap();
    let written = wait_for_written(&connection, 16);
    assert_eq!(
        vec![Recorded::SysEx7(1, message[1..7].to_vec())],
        decode(&written)
    );
}

#[test]
fn send_midi2_note_on() {
    let connection = Arc::new(MockConnection::default());
    let port = start_output_port(&connection);
    port.send_midi2_note_on(0, 9, 36, 0xffff, 0, 0).unwrap();
    port.send_timing_clock(0).unwrap();
    assert_eq!(
        vec![
            0x40, 0x99, 0x24, 0x00, 0xff, 0xff, 0x00, 0x00, //
            0x10, 0xf8, 0x00, 0x00,
        ],
        wait_for_written(&connection, 12)
    );
}

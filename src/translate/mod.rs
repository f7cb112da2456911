// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Conversion between MIDI 1.0 and MIDI 2.0 channel voice messages.
//!
//! Only messages with a direct 1:1 counterpart are translated. Values are
//! rescaled with [`crate::scale`]. Bank numbers of MIDI 2.0 program changes
//! are dropped, a MIDI 1.0 program change never carries a bank.

use crate::{
    midi1::MidiEvent,
    scale::{u14_to_u32, u16_to_u7, u32_to_u14, u32_to_u7, u7_to_u16, u7_to_u32},
    ump::{Midi2Event, UmpEvent},
};

/// Upgrade a MIDI 1.0 channel voice message.
///
/// Note On with velocity 0 becomes a Note Off.
#[must_use]
pub fn midi1_to_midi2(event: &MidiEvent<'_>) -> Option<Midi2Event> {
    let event = match *event {
        MidiEvent::NoteOn {
            channel,
            note,
            velocity: 0,
        } => Midi2Event::NoteOff {
            channel,
            note,
            velocity: 0,
            attribute_type: 0,
            attribute: 0,
        },
        MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        } => Midi2Event::NoteOn {
            channel,
            note,
            velocity: u7_to_u16(velocity),
            attribute_type: 0,
            attribute: 0,
        },
        MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        } => Midi2Event::NoteOff {
            channel,
            note,
            velocity: u7_to_u16(velocity),
            attribute_type: 0,
            attribute: 0,
        },
        MidiEvent::PolyphonicAftertouch {
            channel,
            note,
            pressure,
        } => Midi2Event::PolyphonicAftertouch {
            channel,
            note,
            data: u7_to_u32(pressure),
        },
        MidiEvent::ControlChange {
            channel,
            function,
            value,
        } => Midi2Event::ControlChange {
            channel,
            index: function,
            data: u7_to_u32(value),
        },
        MidiEvent::ProgramChange { channel, program } => Midi2Event::ProgramChange {
            channel,
            program,
            bank: None,
        },
        MidiEvent::ChannelAftertouch { channel, pressure } => Midi2Event::ChannelAftertouch {
            channel,
            data: u7_to_u32(pressure),
        },
        MidiEvent::PitchWheel { channel, amount } => Midi2Event::PitchBend {
            channel,
            data: u14_to_u32(amount),
        },
        _ => return None,
    };
    Some(event)
}

/// Downgrade a MIDI 2.0 channel voice message.
///
/// A Note On never degrades into velocity 0.
#[must_use]
pub fn midi2_to_midi1(event: &Midi2Event) -> Option<MidiEvent<'static>> {
    let event = match *event {
        Midi2Event::NoteOn {
            channel,
            note,
            velocity,
            ..
        } => MidiEvent::NoteOn {
            channel,
            note,
            velocity: u16_to_u7(velocity).max(1),
        },
        Midi2Event::NoteOff {
            channel,
            note,
            velocity,
            ..
        } => MidiEvent::NoteOff {
            channel,
            note,
            velocity: u16_to_u7(velocity),
        },
        Midi2Event::PolyphonicAftertouch {
            channel,
            note,
            data,
        } => MidiEvent::PolyphonicAftertouch {
            channel,
            note,
            pressure: u32_to_u7(data),
        },
        Midi2Event::ControlChange {
            channel,
            index,
            data,
        } => MidiEvent::ControlChange {
            channel,
            function: index,
            value: u32_to_u7(data),
        },
        Midi2Event::ProgramChange {
            channel, program, ..
        } => MidiEvent::ProgramChange { channel, program },
        Midi2Event::ChannelAftertouch { channel, data } => MidiEvent::ChannelAftertouch {
            channel,
            pressure: u32_to_u7(data),
        },
        Midi2Event::PitchBend { channel, data } => MidiEvent::PitchWheel {
            channel,
            amount: u32_to_u14(data),
        },
        Midi2Event::RegisteredPerNoteController { .. }
        | Midi2Event::AssignablePerNoteController { .. }
        | Midi2Event::RegisteredController { .. }
        | Midi2Event::AssignableController { .. }
        | Midi2Event::RelativeRegisteredController { .. }
        | Midi2Event::RelativeAssignableController { .. }
        | Midi2Event::PerNotePitchBend { .. }
        | Midi2Event::PerNoteManagement { .. } => return None,
    };
    Some(event)
}

/// Convert MIDI 1.0 channel voice packets of a UMP stream to MIDI 2.0.
///
/// All other messages are passed through unchanged.
#[must_use]
pub fn upgrade_ump_event<'a>(event: UmpEvent<'a>) -> UmpEvent<'a> {
    match event {
        UmpEvent::Midi1ChannelVoice(midi1) => {
            midi1_to_midi2(&midi1).map_or(event, UmpEvent::Midi2ChannelVoice)
        }
        event => event,
    }
}

/// Convert MIDI 2.0 channel voice packets of a UMP stream to MIDI 1.0.
///
/// Messages without a MIDI 1.0 counterpart are passed through unchanged.
#[must_use]
pub fn downgrade_ump_event<'a>(event: UmpEvent<'a>) -> UmpEvent<'a> {
    match event {
        UmpEvent::Midi2ChannelVoice(midi2) => {
            midi2_to_midi1(&midi2).map_or(event, UmpEvent::Midi1ChannelVoice)
        }
        event => event,
    }
}

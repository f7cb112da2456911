// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::{
    encode_event, Midi2Event, MixedDataSetHeader, UmpEvent, UmpOutputPort,
    MIXED_DATA_SET_CHUNK_LEN,
};
use crate::{
    midi1::{MidiEvent, SYSEX_END, SYSEX_START},
    output::{OutputResult, SizeClass},
};

/// Remove `F0`/`F7` framing.
fn strip_sysex_framing(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[SYSEX_START]).unwrap_or(data);
    data.strip_suffix(&[SYSEX_END]).unwrap_or(data)
}

impl UmpOutputPort {
    /// Encode and enqueue a message.
    pub fn send_event(&self, group: u8, event: &UmpEvent<'_>) -> OutputResult<()> {
        encode_event(group, event, |packet| {
            let class = SizeClass::for_len(packet.len()).unwrap_or(SizeClass::Packet128);
            debug_assert_eq!(class.len(), packet.len());
            self.send_with(class, |buf| buf.copy_from_slice(packet))
        })
    }

    pub fn send_noop(&self, group: u8) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::Noop)
    }

    pub fn send_jitter_reduction_clock(&self, group: u8, time: u16) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::JitterReductionClock { time })
    }

    pub fn send_jitter_reduction_timestamp(&self, group: u8, timestamp: u16) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::JitterReductionTimestamp { timestamp })
    }

    fn send_system(&self, group: u8, event: MidiEvent<'static>) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::System(event))
    }

    pub fn send_time_code_quarter_frame(&self, group: u8, value: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::TimeCodeQuarterFrame { value })
    }

    pub fn send_song_position_pointer(&self, group: u8, position: u16) -> OutputResult<()> {
        self.send_system(group, MidiEvent::SongPositionPointer { position })
    }

    pub fn send_song_select(&self, group: u8, song: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::SongSelect { song })
    }

    pub fn send_tune_request(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::TuneRequest)
    }

    pub fn send_timing_clock(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::TimingClock)
    }

    pub fn send_start(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::Start)
    }

    pub fn send_continue(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::Continue)
    }

    pub fn send_stop(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::Stop)
    }

    pub fn send_active_sensing(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::ActiveSensing)
    }

    pub fn send_reset(&self, group: u8) -> OutputResult<()> {
        self.send_system(group, MidiEvent::Reset)
    }

    fn send_midi1(&self, group: u8, event: MidiEvent<'static>) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::Midi1ChannelVoice(event))
    }

    pub fn send_midi1_note_off(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        velocity: u8,
    ) -> OutputResult<()> {
        self.send_midi1(
            group,
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn send_midi1_note_on(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        velocity: u8,
    ) -> OutputResult<()> {
        self.send_midi1(
            group,
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn send_midi1_polyphonic_aftertouch(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        pressure: u8,
    ) -> OutputResult<()> {
        self.send_midi1(
            group,
            MidiEvent::PolyphonicAftertouch {
                channel,
                note,
                pressure,
            },
        )
    }

    pub fn send_midi1_control_change(
        &self,
        group: u8,
        channel: u8,
        function: u8,
        value: u8,
    ) -> OutputResult<()> {
        self.send_midi1(
            group,
            MidiEvent::ControlChange {
                channel,
                function,
                value,
            },
        )
    }

    pub fn send_midi1_program_change(
        &self,
        group: u8,
        channel: u8,
        program: u8,
    ) -> OutputResult<()> {
        self.send_midi1(group, MidiEvent::ProgramChange { channel, program })
    }

    pub fn send_midi1_channel_aftertouch(
        &self,
        group: u8,
        channel: u8,
        pressure: u8,
    ) -> OutputResult<()> {
        self.send_midi1(group, MidiEvent::ChannelAftertouch { channel, pressure })
    }

    pub fn send_midi1_pitch_wheel(&self, group: u8, channel: u8, amount: u16) -> OutputResult<()> {
        self.send_midi1(group, MidiEvent::PitchWheel { channel, amount })
    }

    pub fn send_midi2(&self, group: u8, event: Midi2Event) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::Midi2ChannelVoice(event))
    }

    pub fn send_midi2_note_off(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        velocity: u16,
        attribute_type: u8,
        attribute: u16,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::NoteOff {
                channel,
                note,
                velocity,
                attribute_type,
                attribute,
            },
        )
    }

    pub fn send_midi2_note_on(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        velocity: u16,
        attribute_type: u8,
        attribute: u16,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::NoteOn {
                channel,
                note,
                velocity,
                attribute_type,
                attribute,
            },
        )
    }

    pub fn send_midi2_polyphonic_aftertouch(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::PolyphonicAftertouch {
                channel,
                note,
                data,
            },
        )
    }

    pub fn send_midi2_control_change(
        &self,
        group: u8,
        channel: u8,
        index: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::ControlChange {
                channel,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_program_change(
        &self,
        group: u8,
        channel: u8,
        program: u8,
        bank: Option<u16>,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::ProgramChange {
                channel,
                program,
                bank,
            },
        )
    }

    pub fn send_midi2_channel_aftertouch(
        &self,
        group: u8,
        channel: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(group, Midi2Event::ChannelAftertouch { channel, data })
    }

    pub fn send_midi2_pitch_bend(&self, group: u8, channel: u8, data: u32) -> OutputResult<()> {
        self.send_midi2(group, Midi2Event::PitchBend { channel, data })
    }

    pub fn send_midi2_per_note_pitch_bend(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::PerNotePitchBend {
                channel,
                note,
                data,
            },
        )
    }

    /// RPN
    pub fn send_midi2_registered_controller(
        &self,
        group: u8,
        channel: u8,
        bank: u8,
        index: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::RegisteredController {
                channel,
                bank,
                index,
                data,
            },
        )
    }

    /// NRPN
    pub fn send_midi2_assignable_controller(
        &self,
        group: u8,
        channel: u8,
        bank: u8,
        index: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::AssignableController {
                channel,
                bank,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_relative_registered_controller(
        &self,
        group: u8,
        channel: u8,
        bank: u8,
        index: u8,
        data: i32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::RelativeRegisteredController {
                channel,
                bank,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_relative_assignable_controller(
        &self,
        group: u8,
        channel: u8,
        bank: u8,
        index: u8,
        data: i32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::RelativeAssignableController {
                channel,
                bank,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_registered_per_note_controller(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        index: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::RegisteredPerNoteController {
                channel,
                note,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_assignable_per_note_controller(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        index: u8,
        data: u32,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::AssignablePerNoteController {
                channel,
                note,
                index,
                data,
            },
        )
    }

    pub fn send_midi2_per_note_management(
        &self,
        group: u8,
        channel: u8,
        note: u8,
        options: u8,
    ) -> OutputResult<()> {
        self.send_midi2(
            group,
            Midi2Event::PerNoteManagement {
                channel,
                note,
                options,
            },
        )
    }

    /// Send a 7-bit SysEx message.
    ///
    /// `F0`/`F7` framing is removed if present.
    pub fn send_system_exclusive7(&self, group: u8, data: &[u8]) -> OutputResult<()> {
        let data = strip_sysex_framing(data);
        self.send_event(group, &UmpEvent::SystemExclusive7 { data })
    }

    pub fn send_system_exclusive8(
        &self,
        group: u8,
        stream_id: u8,
        data: &[u8],
    ) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::SystemExclusive8 { stream_id, data })
    }

    pub fn send_mixed_data_set_header(
        &self,
        group: u8,
        header: MixedDataSetHeader,
    ) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::MixedDataSetHeader(header))
    }

    pub fn send_mixed_data_set_payload(
        &self,
        group: u8,
        mds_id: u8,
        data: &[u8; MIXED_DATA_SET_CHUNK_LEN],
    ) -> OutputResult<()> {
        self.send_event(group, &UmpEvent::MixedDataSetPayload { mds_id, data })
    }
}

// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::borrow::Cow;

use super::{encode_event, MidiEvent, MidiOutputPort, SYSEX_END, SYSEX_START};
use crate::output::{OutputResult, SizeClass};

const CC_RPN_MSB: u8 = 101;
const CC_RPN_LSB: u8 = 100;
const CC_NRPN_MSB: u8 = 99;
const CC_NRPN_LSB: u8 = 98;
const CC_DATA_ENTRY_MSB: u8 = 6;
const CC_DATA_ENTRY_LSB: u8 = 38;

/// Add `F0` and `F7` if missing.
pub(crate) fn frame_sysex(data: &[u8]) -> Cow<'_, [u8]> {
    let starts = data.first() == Some(&SYSEX_START);
    let ends = data.len() > usize::from(starts) && data.last() == Some(&SYSEX_END);
    if starts && ends {
        return Cow::Borrowed(data);
    }
    let mut framed = Vec::with_capacity(data.len() + 2);
    if !starts {
        framed.push(SYSEX_START);
    }
    framed.extend_from_slice(data);
    if !ends {
        framed.push(SYSEX_END);
    }
    Cow::Owned(framed)
}

#[expect(clippy::cast_possible_truncation)]
const fn split_u14(value: u16) -> (u8, u8) {
    ((value >> 7 & 0x7f) as u8, (value & 0x7f) as u8)
}

impl MidiOutputPort {
    /// Encode and enqueue a message.
    pub fn send_event(&self, cable: u8, event: &MidiEvent<'_>) -> OutputResult<()> {
        encode_event(cable, event, |packet| {
            self.send_with(SizeClass::Packet32, |buf| buf.copy_from_slice(&packet))
        })
    }

    pub fn send_misc_function(&self, cable: u8, data: [u8; 3]) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::MiscFunction { data })
    }

    pub fn send_cable_event(&self, cable: u8, data: [u8; 3]) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::CableEvent { data })
    }

    /// Send a system common message with 1 to 3 bytes.
    pub fn send_system_common(&self, cable: u8, data: &[u8]) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::SystemCommon { data })
    }

    /// Send a SysEx message.
    ///
    /// Missing `F0`/`F7` framing is added.
    pub fn send_system_exclusive(&self, cable: u8, data: &[u8]) -> OutputResult<()> {
        let data = frame_sysex(data);
        self.send_event(cable, &MidiEvent::SystemExclusive { data: &data })
    }

    pub fn send_note_off(&self, cable: u8, channel: u8, note: u8, velocity: u8) -> OutputResult<()> {
        self.send_event(
            cable,
            &MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn send_note_on(&self, cable: u8, channel: u8, note: u8, velocity: u8) -> OutputResult<()> {
        self.send_event(
            cable,
            &MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            },
        )
    }

    pub fn send_polyphonic_aftertouch(
        &self,
        cable: u8,
        channel: u8,
        note: u8,
        pressure: u8,
    ) -> OutputResult<()> {
        self.send_event(
            cable,
            &MidiEvent::PolyphonicAftertouch {
                channel,
                note,
                pressure,
            },
        )
    }

    pub fn send_control_change(
        &self,
        cable: u8,
        channel: u8,
        function: u8,
        value: u8,
    ) -> OutputResult<()> {
        self.send_event(
            cable,
            &MidiEvent::ControlChange {
                channel,
                function,
                value,
            },
        )
    }

    pub fn send_program_change(&self, cable: u8, channel: u8, program: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::ProgramChange { channel, program })
    }

    pub fn send_channel_aftertouch(
        &self,
        cable: u8,
        channel: u8,
        pressure: u8,
    ) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::ChannelAftertouch { channel, pressure })
    }

    /// Send a pitch bend with a 14-bit amount, centered at 0x2000.
    pub fn send_pitch_wheel(&self, cable: u8, channel: u8, amount: u16) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::PitchWheel { channel, amount })
    }

    pub fn send_single_byte(&self, cable: u8, byte: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::from_single_byte(byte))
    }

    pub fn send_time_code_quarter_frame(&self, cable: u8, value: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::TimeCodeQuarterFrame { value })
    }

    pub fn send_song_select(&self, cable: u8, song: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::SongSelect { song })
    }

    pub fn send_song_position_pointer(&self, cable: u8, position: u16) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::SongPositionPointer { position })
    }

    pub fn send_tune_request(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::TuneRequest)
    }

    pub fn send_timing_clock(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::TimingClock)
    }

    pub fn send_start(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::Start)
    }

    pub fn send_continue(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::Continue)
    }

    pub fn send_stop(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::Stop)
    }

    pub fn send_active_sensing(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::ActiveSensing)
    }

    pub fn send_reset(&self, cable: u8) -> OutputResult<()> {
        self.send_event(cable, &MidiEvent::Reset)
    }

    /// Set a registered parameter (RPN) with a 14-bit value.
    pub fn send_rpn(&self, cable: u8, channel: u8, function: u16, value: u16) -> OutputResult<()> {
        self.send_parameter_number(cable, channel, [CC_RPN_MSB, CC_RPN_LSB], function, value)
    }

    /// Set a non-registered parameter (NRPN) with a 14-bit value.
    pub fn send_nrpn(&self, cable: u8, channel: u8, function: u16, value: u16) -> OutputResult<()> {
        self.send_parameter_number(cable, channel, [CC_NRPN_MSB, CC_NRPN_LSB], function, value)
    }

    fn send_parameter_number(
        &self,
        cable: u8,
        channel: u8,
        [cc_msb, cc_lsb]: [u8; 2],
        function: u16,
        value: u16,
    ) -> OutputResult<()> {
        let (function_msb, function_lsb) = split_u14(function);
        let (value_msb, value_lsb) = split_u14(value);
        self.send_control_change(cable, channel, cc_msb, function_msb)?;
        self.send_control_change(cable, channel, cc_lsb, function_lsb)?;
        self.send_control_change(cable, channel, CC_DATA_ENTRY_MSB, value_msb)?;
        self.send_control_change(cable, channel, CC_DATA_ENTRY_LSB, value_lsb)
    }
}

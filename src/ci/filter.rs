// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::CiInbox;
use crate::{
    midi1::{MidiEvent, MidiInputHandler},
    ump::{UmpEvent, UmpInputHandler},
};

/// Intercepts MIDI-CI messages before they reach an input handler.
///
/// Negotiation messages are forwarded to a [`super::Negotiator`], all
/// other events are passed through to the wrapped handler.
#[derive(Debug)]
pub struct CiInputFilter<H> {
    inbox: CiInbox,
    inner: H,
}

impl<H> CiInputFilter<H> {
    #[must_use]
    pub const fn new(inbox: CiInbox, inner: H) -> Self {
        Self { inbox, inner }
    }

    #[must_use]
    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H> MidiInputHandler for CiInputFilter<H>
where
    H: MidiInputHandler,
{
    fn handle_midi_event(&mut self, cable: u8, event: MidiEvent<'_>) {
        if let MidiEvent::SystemExclusive { data } = event {
            if self.inbox.deliver_sysex(data) {
                return;
            }
        }
        self.inner.handle_midi_event(cable, event);
    }
}

impl<H> UmpInputHandler for CiInputFilter<H>
where
    H: UmpInputHandler,
{
    fn handle_ump_event(&mut self, group: u8, event: UmpEvent<'_>) {
        if let UmpEvent::SystemExclusive7 { data } = event {
            if self.inbox.deliver_sysex(data) {
                return;
            }
        }
        self.inner.handle_ump_event(group, event);
    }
}

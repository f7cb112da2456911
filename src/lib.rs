// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

#![allow(rustdoc::invalid_rust_codeblocks)]
#![doc = include_str!("../README.md")]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod ci;
pub mod input;
pub mod midi1;
pub mod output;
pub mod port;
pub mod scale;
pub mod translate;
pub mod ump;
pub mod usb;
pub mod watcher;

mod thread;

pub use self::{
    ci::{Muid, NegotiationConfig, NegotiationOutcome, Negotiator, ProtocolSelection},
    input::{InputConfig, InputPort},
    midi1::{MidiEvent, MidiInputHandler, MidiInputPort, MidiOutputPort},
    output::{OutputConfig, OutputError, OutputPort, OutputResult},
    port::{PortDescriptor, PortError, PortResult},
    ump::{UmpEvent, UmpInputHandler, UmpInputPort, UmpOutputPort},
    usb::{TransportError, TransportResult, UsbConnection, UsbDeviceInfo, UsbHost},
    watcher::{
        AttachedDevice, AttachedPort, ConnectionEvent, ConnectionEventHandler,
        DeviceConnectionWatcher, WatcherConfig,
    },
};

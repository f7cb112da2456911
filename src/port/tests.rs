// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::usb::{
    mock::{midi_device, midi_streaming_interface, MIDI_IN_ENDPOINT, MIDI_OUT_ENDPOINT},
    DeviceKey,
};

fn device() -> Arc<UsbDeviceInfo> {
    Arc::new(midi_device(DeviceKey { bus: 1, address: 1 }, false))
}

#[test]
fn bind_first_endpoint_of_direction() {
    let descriptor = PortDescriptor::new(
        device(),
        midi_streaming_interface(0),
        Direction::Out,
        None,
        PacketFormat::UsbMidi1,
    )
    .unwrap();
    assert_eq!(MIDI_OUT_ENDPOINT, descriptor.endpoint().address);
    assert_eq!(64, descriptor.max_packet_size());
}

#[test]
fn missing_endpoint_fails_construction() {
    let err = PortDescriptor::new(
        device(),
        midi_streaming_interface(0),
        Direction::Out,
        Some(MIDI_IN_ENDPOINT),
        PacketFormat::UsbMidi1,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PortError::NoEndpoint {
            direction: Direction::Out,
            ..
        }
    ));
}

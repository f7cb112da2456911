// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use super::{mock::midi_device, *};

fn vendor_device() -> UsbDeviceInfo {
    UsbDeviceInfo {
        key: DeviceKey { bus: 1, address: 9 },
        vendor_id: 0x1235,
        product_id: 0x0011,
        product_name: Some("Vendor Synth".into()),
        interfaces: vec![UsbInterface {
            number: 1,
            alternate_setting: 0,
            class: 0xff,
            subclass: 0x00,
            protocol: 0x00,
            endpoints: vec![UsbEndpoint {
                address: 0x83,
                direction: Direction::In,
                transfer_type: TransferType::Bulk,
                max_packet_size: 64,
            }],
        }],
    }
}

#[test]
fn class_compliant_device_is_midi() {
    let device = midi_device(DeviceKey { bus: 1, address: 2 }, false);
    assert!(is_midi_device(&device, &[]));
}

#[test]
fn vendor_device_requires_filter() {
    let device = vendor_device();
    assert!(!is_midi_device(&device, &[]));
    let filter = DeviceFilter {
        vendor_id: 0x1235,
        ..Default::default()
    };
    assert!(is_midi_device(&device, &[filter.clone()]));
    let other_product = DeviceFilter {
        product_id: Some(0x001e),
        ..filter
    };
    assert!(!is_midi_device(&device, &[other_product]));
}

#[test]
fn select_ump_alternate_setting_if_preferred() {
    let device = midi_device(DeviceKey { bus: 1, address: 2 }, true);
    let selected = select_midi_interfaces(&device, &[], true);
    assert_eq!(1, selected.len());
    assert_eq!(PacketFormat::Ump, selected[0].1);
    assert_eq!(UMP_ALTERNATE_SETTING, selected[0].0.alternate_setting);

    let selected = select_midi_interfaces(&device, &[], false);
    assert_eq!(1, selected.len());
    assert_eq!(PacketFormat::UsbMidi1, selected[0].1);
}

#[test]
fn dropped_responder_denies() {
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    let key = DeviceKey { bus: 3, address: 4 };
    drop(PermissionResponder::new(key, reply_tx));
    assert_eq!(
        PermissionOutcome {
            key,
            granted: false
        },
        reply_rx.try_recv().unwrap()
    );
    assert!(reply_rx.try_recv().is_err());
}

#[test]
fn responder_replies_once() {
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    let key = DeviceKey { bus: 3, address: 5 };
    PermissionResponder::new(key, reply_tx).grant();
    assert!(reply_rx.try_recv().unwrap().granted);
    assert!(reply_rx.try_recv().is_err());
}

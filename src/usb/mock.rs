// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! In-memory host for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use super::{
    DeviceKey, Direction, PermissionResponder, TransferType, TransportError, TransportResult,
    UsbConnection, UsbDeviceInfo, UsbEndpoint, UsbHost, UsbInterface, UMP_ALTERNATE_SETTING,
    USB_CLASS_AUDIO, USB_SUBCLASS_MIDISTREAMING,
};
use crate::thread::lock;

pub(crate) const MIDI_IN_ENDPOINT: u8 = 0x81;
pub(crate) const MIDI_OUT_ENDPOINT: u8 = 0x02;

pub(crate) fn midi_in_endpoint(max_packet_size: u16) -> UsbEndpoint {
    UsbEndpoint {
        address: MIDI_IN_ENDPOINT,
        direction: Direction::In,
        transfer_type: TransferType::Bulk,
        max_packet_size,
    }
}

pub(crate) fn midi_out_endpoint(max_packet_size: u16) -> UsbEndpoint {
    UsbEndpoint {
        address: MIDI_OUT_ENDPOINT,
        direction: Direction::Out,
        transfer_type: TransferType::Bulk,
        max_packet_size,
    }
}

pub(crate) fn midi_streaming_interface(alternate_setting: u8) -> UsbInterface {
    UsbInterface {
        number: 1,
        alternate_setting,
        class: USB_CLASS_AUDIO,
        subclass: USB_SUBCLASS_MIDISTREAMING,
        protocol: 0,
        endpoints: vec![midi_in_endpoint(64), midi_out_endpoint(64)],
    }
}

/// A class compliant device with one MIDI Streaming interface.
pub(crate) fn midi_device(key: DeviceKey, with_ump: bool) -> UsbDeviceInfo {
    let mut interfaces = vec![midi_streaming_interface(0)];
    if with_ump {
        interfaces.push(midi_streaming_interface(UMP_ALTERNATE_SETTING));
    }
    UsbDeviceInfo {
        key,
        vendor_id: 0x0582,
        product_id: 0x0001,
        product_name: Some(format!("Mock MIDI {key}")),
        interfaces,
    }
}

/// A device without any MIDI interface, e.g. a keyboard.
pub(crate) fn hid_device(key: DeviceKey) -> UsbDeviceInfo {
    UsbDeviceInfo {
        key,
        vendor_id: 0x046d,
        product_id: 0xc31c,
        product_name: None,
        interfaces: vec![UsbInterface {
            number: 0,
            alternate_setting: 0,
            class: 0x03,
            subclass: 0x01,
            protocol: 0x01,
            endpoints: vec![UsbEndpoint {
                address: 0x81,
                direction: Direction::In,
                transfer_type: TransferType::Interrupt,
                max_packet_size: 8,
            }],
        }],
    }
}

#[derive(Debug, Default)]
struct Inbound {
    chunks: Mutex<HashMap<u8, VecDeque<Vec<u8>>>>,
    available: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct MockConnection {
    inbound: Inbound,
    written: Mutex<Vec<(u8, Vec<u8>)>>,
    fail_writes: AtomicUsize,
    claimed: Mutex<HashSet<u8>>,
    released: Mutex<Vec<u8>>,
    alternate_settings: Mutex<HashMap<u8, u8>>,
    closed: AtomicBool,
}

impl MockConnection {
    /// Queue a chunk that is returned by a single bulk-in transfer.
    pub(crate) fn push_inbound(&self, endpoint_address: u8, chunk: impl Into<Vec<u8>>) {
        lock(&self.inbound.chunks)
            .entry(endpoint_address)
            .or_default()
            .push_back(chunk.into());
        self.inbound.available.notify_all();
    }

    /// All chunks written to the given endpoint.
    pub(crate) fn written(&self, endpoint_address: u8) -> Vec<Vec<u8>> {
        lock(&self.written)
            .iter()
            .filter(|(address, _)| *address == endpoint_address)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    /// All bytes written to the given endpoint, concatenated.
    pub(crate) fn written_bytes(&self, endpoint_address: u8) -> Vec<u8> {
        self.written(endpoint_address).concat()
    }

    /// Let the next `count` bulk-out transfers fail.
    pub(crate) fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    pub(crate) fn is_claimed(&self, interface_number: u8) -> bool {
        lock(&self.claimed).contains(&interface_number)
    }

    pub(crate) fn released(&self) -> Vec<u8> {
        lock(&self.released).clone()
    }

    pub(crate) fn alternate_setting(&self, interface_number: u8) -> Option<u8> {
        lock(&self.alternate_settings)
            .get(&interface_number)
            .copied()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl UsbConnection for MockConnection {
    fn claim_interface(&self, interface: &UsbInterface, _force: bool) -> TransportResult<()> {
        lock(&self.claimed).insert(interface.number);
        Ok(())
    }

    fn release_interface(&self, interface: &UsbInterface) -> TransportResult<()> {
        lock(&self.claimed).remove(&interface.number);
        lock(&self.released).push(interface.number);
        Ok(())
    }

    fn set_alternate_setting(&self, interface: &UsbInterface) -> TransportResult<()> {
        lock(&self.alternate_settings).insert(interface.number, interface.alternate_setting);
        Ok(())
    }

    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::NoDevice);
        }
        let chunks = lock(&self.inbound.chunks);
        let (mut chunks, _) = self
            .inbound
            .available
            .wait_timeout_while(chunks, timeout, |chunks| {
                chunks
                    .get(&endpoint.address)
                    .map_or(true, VecDeque::is_empty)
            })
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(chunk) = chunks
            .get_mut(&endpoint.address)
            .and_then(VecDeque::pop_front)
        else {
            return Err(TransportError::Timeout);
        };
        let len = chunk.len().min(buf.len());
        buf[..len].copy_from_slice(&chunk[..len]);
        Ok(len)
    }

    fn bulk_out(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        _timeout: Duration,
    ) -> TransportResult<usize> {
        if self.is_closed() {
            return Err(TransportError::NoDevice);
        }
        let failed = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(TransportError::Io { code: -1 });
        }
        lock(&self.written).push((endpoint.address, data.to_vec()));
        Ok(data.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.available.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PermissionMode {
    Grant,
    Deny,
    /// Keep responders until answered by the test.
    Manual,
}

#[derive(Debug)]
pub(crate) struct MockHost {
    devices: Mutex<Vec<UsbDeviceInfo>>,
    permission_mode: Mutex<PermissionMode>,
    permission_requests: Mutex<Vec<DeviceKey>>,
    pending_responders: Mutex<Vec<PermissionResponder>>,
    unopenable: Mutex<HashSet<DeviceKey>>,
    connections: Mutex<HashMap<DeviceKey, Arc<MockConnection>>>,
}

impl MockHost {
    pub(crate) fn new(permission_mode: PermissionMode) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            permission_mode: Mutex::new(permission_mode),
            permission_requests: Mutex::new(Vec::new()),
            pending_responders: Mutex::new(Vec::new()),
            unopenable: Mutex::new(HashSet::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn plug(&self, device: UsbDeviceInfo) {
        lock(&self.devices).push(device);
    }

    pub(crate) fn unplug(&self, key: DeviceKey) {
        lock(&self.devices).retain(|device| device.key != key);
        if let Some(connection) = lock(&self.connections).get(&key) {
            connection.close();
        }
    }

    /// Opening the device will not yield a connection.
    pub(crate) fn set_unopenable(&self, key: DeviceKey) {
        lock(&self.unopenable).insert(key);
    }

    pub(crate) fn permission_requests(&self) -> Vec<DeviceKey> {
        lock(&self.permission_requests).clone()
    }

    /// Answer the oldest pending permission request.
    pub(crate) fn answer_next(&self, granted: bool) -> Option<DeviceKey> {
        let mut pending = lock(&self.pending_responders);
        if pending.is_empty() {
            return None;
        }
        let responder = pending.remove(0);
        let key = responder.key();
        if granted {
            responder.grant();
        } else {
            responder.deny();
        }
        Some(key)
    }

    pub(crate) fn connection(&self, key: DeviceKey) -> Option<Arc<MockConnection>> {
        lock(&self.connections).get(&key).cloned()
    }
}

impl UsbHost for MockHost {
    fn devices(&self) -> TransportResult<Vec<UsbDeviceInfo>> {
        Ok(lock(&self.devices).clone())
    }

    fn request_permission(&self, device: &UsbDeviceInfo, responder: PermissionResponder) {
        lock(&self.permission_requests).push(device.key);
        let permission_mode = *lock(&self.permission_mode);
        match permission_mode {
            PermissionMode::Grant => responder.grant(),
            PermissionMode::Deny => responder.deny(),
            PermissionMode::Manual => lock(&self.pending_responders).push(responder),
        }
    }

    fn open(&self, device: &UsbDeviceInfo) -> TransportResult<Option<Arc<dyn UsbConnection>>> {
        if lock(&self.unopenable).contains(&device.key) {
            return Ok(None);
        }
        let connection = Arc::new(MockConnection::default());
        lock(&self.connections).insert(device.key, Arc::clone(&connection));
        Ok(Some(connection))
    }
}

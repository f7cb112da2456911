// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use crossbeam_channel::Sender;

use super::{AttachedDevice, AttachedPort, ConnectionEvent, ProtocolPreference, WatcherConfig};
use crate::{
    midi1::{MidiInputPort, MidiOutputPort},
    port::{PortDescriptor, PortResult},
    ump::{UmpInputPort, UmpOutputPort},
    usb::{
        is_midi_device, select_midi_interfaces, DeviceFilter, DeviceKey, Direction, PacketFormat,
        PermissionOutcome, PermissionResponder, UsbConnection, UsbDeviceInfo, UsbHost,
        UsbInterface,
    },
};

struct Connected {
    device: Arc<UsbDeviceInfo>,
    connection: Arc<dyn UsbConnection>,
    ports: Vec<AttachedPort>,
}

#[derive(Default)]
pub(super) struct WatcherState {
    connected: BTreeMap<DeviceKey, Connected>,
    /// Devices observed by the previous poll
    known: HashSet<DeviceKey>,
    in_flight: Option<UsbDeviceInfo>,
    pending: VecDeque<UsbDeviceInfo>,
}

impl WatcherState {
    pub(super) fn snapshot(&self) -> Vec<AttachedDevice> {
        self.connected
            .values()
            .map(|connected| AttachedDevice {
                device: Arc::clone(&connected.device),
                ports: connected.ports.clone(),
            })
            .collect()
    }

    fn is_in_flight(&self, key: DeviceKey) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|device| device.key == key)
    }

    fn is_pending(&self, key: DeviceKey) -> bool {
        self.pending.iter().any(|device| device.key == key)
    }

    /// Reconcile with the devices that are currently present.
    pub(super) fn update_present(
        &mut self,
        devices: &[UsbDeviceInfo],
        filters: &[DeviceFilter],
        events: &mut Vec<ConnectionEvent>,
    ) {
        let present: HashSet<DeviceKey> = devices.iter().map(|device| device.key).collect();

        // Vanished devices
        if let Some(in_flight) = &self.in_flight {
            if !present.contains(&in_flight.key) {
                log::debug!(
                    "Device {key} vanished while awaiting permission",
                    key = in_flight.key
                );
                self.in_flight = None;
            }
        }
        self.pending.retain(|device| present.contains(&device.key));
        let vanished: Vec<DeviceKey> = self
            .connected
            .keys()
            .copied()
            .filter(|key| !present.contains(key))
            .collect();
        for key in vanished {
            if let Some(connected) = self.connected.remove(&key) {
                detach(connected, events);
            }
        }

        // New devices
        for device in devices {
            let key = device.key;
            if self.known.contains(&key)
                || self.connected.contains_key(&key)
                || self.is_in_flight(key)
                || self.is_pending(key)
            {
                continue;
            }
            if !is_midi_device(device, filters) {
                log::trace!("Ignoring device {device}");
                continue;
            }
            log::debug!("Queueing device {device} for permission");
            self.pending.push_back(device.clone());
        }

        self.known = present;
    }

    /// Request permission for the next pending device.
    ///
    /// Returns `true` if a request has been issued.
    pub(super) fn request_next_permission(
        &mut self,
        host: &dyn UsbHost,
        reply_tx: &Sender<PermissionOutcome>,
    ) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let Some(device) = self.pending.pop_front() else {
            return false;
        };
        log::debug!("Requesting permission for device {device}");
        let responder = PermissionResponder::new(device.key, reply_tx.clone());
        // The marker must be set before the host might answer synchronously
        self.in_flight = Some(device.clone());
        host.request_permission(&device, responder);
        true
    }

    pub(super) fn resolve_permission(
        &mut self,
        host: &dyn UsbHost,
        config: &WatcherConfig,
        outcome: PermissionOutcome,
        events: &mut Vec<ConnectionEvent>,
    ) {
        if !self.is_in_flight(outcome.key) {
            log::debug!("Ignoring stale {outcome:?}");
            return;
        }
        let Some(device) = self.in_flight.take() else {
            return;
        };
        if !outcome.granted {
            log::info!("Permission denied for device {device}");
            return;
        }
        if let Some(connected) = attach(host, config, device) {
            for port in &connected.ports {
                events.push(ConnectionEvent::PortAttached(port.clone()));
            }
            events.push(ConnectionEvent::DeviceAttached(Arc::clone(&connected.device)));
            self.connected.insert(connected.device.key, connected);
        }
    }

    /// Detach all devices and forget everything observed so far.
    pub(super) fn detach_all(&mut self, events: &mut Vec<ConnectionEvent>) {
        for connected in std::mem::take(&mut self.connected).into_values() {
            detach(connected, events);
        }
        self.known.clear();
        self.pending.clear();
        self.in_flight = None;
    }
}

fn attach(host: &dyn UsbHost, config: &WatcherConfig, device: UsbDeviceInfo) -> Option<Connected> {
    let connection = match host.open(&device) {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            log::warn!("Failed to open device {device}");
            return None;
        }
        Err(err) => {
            log::warn!("Failed to open device {device}: {err}");
            return None;
        }
    };
    let device = Arc::new(device);
    let prefer_ump = config.protocol_preference == ProtocolPreference::Ump;
    let mut ports = Vec::new();
    for (interface, format) in select_midi_interfaces(&device, &config.filters, prefer_ump) {
        if let Err(err) = connection.claim_interface(interface, true) {
            log::warn!(
                "Failed to claim interface {number} of device {device}: {err}",
                number = interface.number
            );
            continue;
        }
        if let Err(err) = connection.set_alternate_setting(interface) {
            log::warn!(
                "Failed to activate alternate setting {alternate_setting} of interface {number} of device {device}: {err}",
                alternate_setting = interface.alternate_setting,
                number = interface.number
            );
            if let Err(err) = connection.release_interface(interface) {
                log::warn!("Failed to release interface {}: {err}", interface.number);
            }
            continue;
        }
        for direction in [Direction::In, Direction::Out] {
            for address in interface
                .midi_endpoints(direction)
                .map(|endpoint| endpoint.address)
            {
                match create_port(&device, interface, direction, address, format, &connection, config) {
                    Ok(port) => ports.push(port),
                    Err(err) => {
                        log::warn!(
                            "Failed to create port for endpoint {address:02x} of device {device}: {err}"
                        );
                    }
                }
            }
        }
    }
    if ports.is_empty() {
        log::warn!("No MIDI ports available on device {device}");
        connection.close();
        return None;
    }
    log::info!(
        "Attached device {device} with {count} port(s)",
        count = ports.len()
    );
    Some(Connected {
        device,
        connection,
        ports,
    })
}

fn create_port(
    device: &Arc<UsbDeviceInfo>,
    interface: &UsbInterface,
    direction: Direction,
    address: u8,
    format: PacketFormat,
    connection: &Arc<dyn UsbConnection>,
    config: &WatcherConfig,
) -> PortResult<AttachedPort> {
    let descriptor = PortDescriptor::new(
        Arc::clone(device),
        interface.clone(),
        direction,
        Some(address),
        format,
    )?;
    let connection = Arc::clone(connection);
    let port = match (direction, format) {
        (Direction::In, PacketFormat::UsbMidi1) => {
            Arc::new(MidiInputPort::new(descriptor, connection, config.input.clone())?).into()
        }
        (Direction::Out, PacketFormat::UsbMidi1) => {
            Arc::new(MidiOutputPort::new(descriptor, connection, config.output.clone())?).into()
        }
        (Direction::In, PacketFormat::Ump) => {
            Arc::new(UmpInputPort::new(descriptor, connection, config.input.clone())?).into()
        }
        (Direction::Out, PacketFormat::Ump) => {
            Arc::new(UmpOutputPort::new(descriptor, connection, config.output.clone())?).into()
        }
    };
    Ok(port)
}

/// Stop all ports before closing the connection.
fn detach(connected: Connected, events: &mut Vec<ConnectionEvent>) {
    let Connected {
        device,
        connection,
        ports,
    } = connected;
    for port in &ports {
        port.stop();
    }
    connection.close();
    log::info!("Detached device {device}");
    events.extend(ports.into_iter().map(ConnectionEvent::PortDetached));
    events.push(ConnectionEvent::DeviceDetached(device));
}

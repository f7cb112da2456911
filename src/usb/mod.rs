// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Host USB transport primitives.
//!
//! The core only needs a handful of capabilities from the host USB stack:
//! enumerating devices, asking for permission, opening a device, claiming
//! interfaces, and bulk transfers with a timeout. Those are captured by
//! [`UsbHost`] and [`UsbConnection`].

use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

use crossbeam_channel::Sender;
use strum::FromRepr;
use thiserror::Error;

#[cfg(feature = "rusb")]
pub mod rusb;

#[cfg(test)]
pub(crate) mod mock;

/// USB interface class: Audio
pub const USB_CLASS_AUDIO: u8 = 0x01;

/// USB interface subclass: MIDI Streaming
pub const USB_SUBCLASS_MIDISTREAMING: u8 = 0x03;

/// Alternate setting of a MIDI Streaming interface that carries
/// Universal MIDI Packets (USB MIDI 2.0).
pub const UMP_ALTERNATE_SETTING: u8 = 1;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timeout")]
    Timeout,

    #[error("no device")]
    NoDevice,

    #[error("access denied")]
    Access,

    #[error("I/O error {code}")]
    Io { code: i32 },

    #[error("{msg}")]
    Other { msg: Cow<'static, str> },
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Connection-independent key of a device while it is plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{bus:03}:{address:03}")]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbEndpoint {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl UsbEndpoint {
    /// Only bulk and interrupt endpoints are able to carry MIDI data.
    #[must_use]
    pub const fn is_bulk_or_interrupt(&self) -> bool {
        matches!(
            self.transfer_type,
            TransferType::Bulk | TransferType::Interrupt
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbInterface {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<UsbEndpoint>,
}

impl UsbInterface {
    #[must_use]
    pub const fn is_midi_streaming(&self) -> bool {
        self.class == USB_CLASS_AUDIO && self.subclass == USB_SUBCLASS_MIDISTREAMING
    }

    pub fn midi_endpoints(&self, direction: Direction) -> impl Iterator<Item = &UsbEndpoint> {
        self.endpoints
            .iter()
            .filter(move |endpoint| endpoint.direction == direction && endpoint.is_bulk_or_interrupt())
    }

    fn has_midi_endpoints(&self) -> bool {
        self.endpoints.iter().any(UsbEndpoint::is_bulk_or_interrupt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    /// All interfaces, one entry per alternate setting.
    pub interfaces: Vec<UsbInterface>,
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            key,
            vendor_id,
            product_id,
            product_name,
            ..
        } = self;
        write!(f, "{key} [{vendor_id:04x}:{product_id:04x}]")?;
        if let Some(product_name) = product_name {
            write!(f, " \"{product_name}\"")?;
        }
        Ok(())
    }
}

/// Matches devices that do not follow the USB MIDI class.
///
/// All interfaces of a matching device that have bulk or interrupt
/// endpoints are treated as USB-MIDI 1.0 interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: Option<u16>,
    pub interface_class: Option<u8>,
    pub interface_subclass: Option<u8>,
    pub interface_protocol: Option<u8>,
}

impl DeviceFilter {
    #[must_use]
    pub fn matches(&self, device: &UsbDeviceInfo, interface: &UsbInterface) -> bool {
        let Self {
            vendor_id,
            product_id,
            interface_class,
            interface_subclass,
            interface_protocol,
        } = self;
        *vendor_id == device.vendor_id
            && product_id.map_or(true, |product_id| product_id == device.product_id)
            && interface_class.map_or(true, |class| class == interface.class)
            && interface_subclass.map_or(true, |subclass| subclass == interface.subclass)
            && interface_protocol.map_or(true, |protocol| protocol == interface.protocol)
    }
}

/// Wire format carried by an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketFormat {
    /// 4-byte USB-MIDI 1.0 event packets
    UsbMidi1,
    /// Universal MIDI Packets
    Ump,
}

fn is_midi_interface(
    device: &UsbDeviceInfo,
    interface: &UsbInterface,
    filters: &[DeviceFilter],
) -> bool {
    if interface.is_midi_streaming() {
        return true;
    }
    interface.has_midi_endpoints() && filters.iter().any(|filter| filter.matches(device, interface))
}

/// Checks if a device exposes at least one MIDI interface.
#[must_use]
pub fn is_midi_device(device: &UsbDeviceInfo, filters: &[DeviceFilter]) -> bool {
    device
        .interfaces
        .iter()
        .any(|interface| is_midi_interface(device, interface, filters))
}

/// Select one alternate setting per MIDI interface.
///
/// If a MIDI Streaming interface offers both a USB-MIDI 1.0 and a UMP
/// alternate setting, `prefer_ump` decides which one is used.
#[must_use]
pub fn select_midi_interfaces<'a>(
    device: &'a UsbDeviceInfo,
    filters: &[DeviceFilter],
    prefer_ump: bool,
) -> Vec<(&'a UsbInterface, PacketFormat)> {
    let mut selected: Vec<(&UsbInterface, PacketFormat)> = Vec::new();
    for interface in &device.interfaces {
        if !is_midi_interface(device, interface, filters) {
            continue;
        }
        let format = if interface.is_midi_streaming()
            && interface.alternate_setting == UMP_ALTERNATE_SETTING
        {
            PacketFormat::Ump
        } else {
            PacketFormat::UsbMidi1
        };
        if let Some(existing) = selected
            .iter_mut()
            .find(|(existing, _)| existing.number == interface.number)
        {
            let replace = match (existing.1, format) {
                (PacketFormat::UsbMidi1, PacketFormat::Ump) => prefer_ump,
                (PacketFormat::Ump, PacketFormat::UsbMidi1) => !prefer_ump,
                _ => false,
            };
            if replace {
                *existing = (interface, format);
            }
            continue;
        }
        selected.push((interface, format));
    }
    selected
}

/// Host-side USB subsystem.
pub trait UsbHost: Send + Sync {
    /// List all currently present devices.
    fn devices(&self) -> TransportResult<Vec<UsbDeviceInfo>>;

    /// Ask the user for permission to access a device.
    ///
    /// The answer is given asynchronously through the responder,
    /// possibly before this function returns. Dropping the responder
    /// without an answer counts as a denial.
    fn request_permission(&self, device: &UsbDeviceInfo, responder: PermissionResponder);

    /// Open a device.
    ///
    /// Returns `Ok(None)` if the host did not provide a connection.
    fn open(&self, device: &UsbDeviceInfo) -> TransportResult<Option<Arc<dyn UsbConnection>>>;
}

/// An open device.
///
/// All functions might be invoked concurrently from the reader and
/// writer threads of different ports.
pub trait UsbConnection: Send + Sync {
    fn claim_interface(&self, interface: &UsbInterface, force: bool) -> TransportResult<()>;

    fn release_interface(&self, interface: &UsbInterface) -> TransportResult<()>;

    /// Activate the alternate setting of a claimed interface.
    fn set_alternate_setting(&self, interface: &UsbInterface) -> TransportResult<()> {
        let _ = interface;
        Ok(())
    }

    /// Read from an IN endpoint, returns the number of bytes received.
    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    /// Write to an OUT endpoint, returns the number of bytes sent.
    fn bulk_out(&self, endpoint: &UsbEndpoint, data: &[u8], timeout: Duration)
        -> TransportResult<usize>;

    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOutcome {
    pub key: DeviceKey,
    pub granted: bool,
}

/// One-shot answer to a permission request.
#[derive(Debug)]
pub struct PermissionResponder {
    key: DeviceKey,
    reply_tx: Option<Sender<PermissionOutcome>>,
}

impl PermissionResponder {
    #[must_use]
    pub(crate) const fn new(key: DeviceKey, reply_tx: Sender<PermissionOutcome>) -> Self {
        Self {
            key,
            reply_tx: Some(reply_tx),
        }
    }

    #[must_use]
    pub const fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn grant(mut self) {
        self.reply(true);
    }

    pub fn deny(mut self) {
        self.reply(false);
    }

    fn reply(&mut self, granted: bool) {
        let Some(reply_tx) = self.reply_tx.take() else {
            return;
        };
        let outcome = PermissionOutcome {
            key: self.key,
            granted,
        };
        if reply_tx.send(outcome).is_err() {
            log::debug!("Discarding {outcome:?}: watcher has terminated");
        }
    }
}

impl Drop for PermissionResponder {
    fn drop(&mut self) {
        if self.reply_tx.is_some() {
            log::debug!("Permission request for {key} abandoned", key = self.key);
            self.reply(false);
        }
    }
}

#[cfg(test)]
mod tests;

// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Binding of a single endpoint to its device and interface.

use std::{fmt, sync::Arc};

use thiserror::Error;

use crate::usb::{Direction, PacketFormat, TransportError, UsbDeviceInfo, UsbEndpoint, UsbInterface};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no matching {direction:?} endpoint {address:02x?} on interface {interface}")]
    NoEndpoint {
        interface: u8,
        direction: Direction,
        address: Option<u8>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to spawn thread: {0}")]
    Thread(#[from] std::io::Error),
}

pub type PortResult<T> = std::result::Result<T, PortError>;

/// Identifies the endpoint a port is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    device: Arc<UsbDeviceInfo>,
    interface: UsbInterface,
    endpoint: UsbEndpoint,
    format: PacketFormat,
}

impl PortDescriptor {
    /// Bind a bulk or interrupt endpoint of an interface.
    ///
    /// Without an `address` the first matching endpoint is selected.
    pub fn new(
        device: Arc<UsbDeviceInfo>,
        interface: UsbInterface,
        direction: Direction,
        address: Option<u8>,
        format: PacketFormat,
    ) -> PortResult<Self> {
        let Some(endpoint) = interface
            .midi_endpoints(direction)
            .find(|endpoint| address.map_or(true, |address| address == endpoint.address))
            .cloned()
        else {
            return Err(PortError::NoEndpoint {
                interface: interface.number,
                direction,
                address,
            });
        };
        Ok(Self {
            device,
            interface,
            endpoint,
            format,
        })
    }

    #[must_use]
    pub fn device(&self) -> &UsbDeviceInfo {
        &self.device
    }

    #[must_use]
    pub const fn interface(&self) -> &UsbInterface {
        &self.interface
    }

    #[must_use]
    pub const fn endpoint(&self) -> &UsbEndpoint {
        &self.endpoint
    }

    #[must_use]
    pub const fn format(&self) -> PacketFormat {
        self.format
    }

    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        usize::from(self.endpoint.max_packet_size)
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            device,
            interface,
            endpoint,
            format,
        } = self;
        write!(
            f,
            "{key}/{interface}.{alternate_setting}/{address:#04x} ({format:?})",
            key = device.key,
            interface = interface.number,
            alternate_setting = interface.alternate_setting,
            address = endpoint.address,
        )
    }
}

#[cfg(test)]
mod tests;

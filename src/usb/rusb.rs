// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Host transport backed by libusb.
//!
//! Desktop hosts have no interactive permission flow. Access is
//! granted immediately and failures surface when opening the device.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use rusb::{Context, Device, DeviceHandle, UsbContext as _};

use super::{
    DeviceKey, Direction, PermissionResponder, TransferType, TransportError, TransportResult,
    UsbConnection, UsbDeviceInfo, UsbEndpoint, UsbHost, UsbInterface,
};

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => Self::Timeout,
            rusb::Error::NoDevice | rusb::Error::NotFound => Self::NoDevice,
            rusb::Error::Access => Self::Access,
            rusb::Error::Io => Self::Io { code: -1 },
            rusb::Error::Pipe => Self::Io { code: -9 },
            rusb::Error::Overflow => Self::Io { code: -8 },
            err => Self::Other {
                msg: err.to_string().into(),
            },
        }
    }
}

#[derive(Debug)]
pub struct RusbHost {
    context: Context,
}

impl RusbHost {
    pub fn new() -> TransportResult<Self> {
        let context = Context::new()?;
        Ok(Self { context })
    }

    fn find_device(&self, key: DeviceKey) -> TransportResult<Option<Device<Context>>> {
        let device = self
            .context
            .devices()?
            .iter()
            .find(|device| device.bus_number() == key.bus && device.address() == key.address);
        Ok(device)
    }
}

fn device_info(device: &Device<Context>) -> TransportResult<UsbDeviceInfo> {
    let device_desc = device.device_descriptor()?;
    let config_desc = device.active_config_descriptor()?;
    let mut interfaces = Vec::with_capacity(usize::from(config_desc.num_interfaces()));
    for interface in config_desc.interfaces() {
        for interface_desc in interface.descriptors() {
            let endpoints = interface_desc
                .endpoint_descriptors()
                .map(|endpoint_desc| UsbEndpoint {
                    address: endpoint_desc.address(),
                    direction: match endpoint_desc.direction() {
                        rusb::Direction::In => Direction::In,
                        rusb::Direction::Out => Direction::Out,
                    },
                    transfer_type: match endpoint_desc.transfer_type() {
                        rusb::TransferType::Control => TransferType::Control,
                        rusb::TransferType::Isochronous => TransferType::Isochronous,
                        rusb::TransferType::Bulk => TransferType::Bulk,
                        rusb::TransferType::Interrupt => TransferType::Interrupt,
                    },
                    max_packet_size: endpoint_desc.max_packet_size(),
                })
                .collect();
            interfaces.push(UsbInterface {
                number: interface_desc.interface_number(),
                alternate_setting: interface_desc.setting_number(),
                class: interface_desc.class_code(),
                subclass: interface_desc.sub_class_code(),
                protocol: interface_desc.protocol_code(),
                endpoints,
            });
        }
    }
    Ok(UsbDeviceInfo {
        key: DeviceKey {
            bus: device.bus_number(),
            address: device.address(),
        },
        vendor_id: device_desc.vendor_id(),
        product_id: device_desc.product_id(),
        product_name: None,
        interfaces,
    })
}

impl UsbHost for RusbHost {
    fn devices(&self) -> TransportResult<Vec<UsbDeviceInfo>> {
        let devices = self.context.devices()?;
        let mut infos = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            match device_info(&device) {
                Ok(info) => infos.push(info),
                Err(err) => {
                    // Devices without an active configuration are skipped.
                    log::debug!(
                        "Skipping device {bus:03}:{address:03}: {err}",
                        bus = device.bus_number(),
                        address = device.address()
                    );
                }
            }
        }
        Ok(infos)
    }

    fn request_permission(&self, _device: &UsbDeviceInfo, responder: PermissionResponder) {
        responder.grant();
    }

    fn open(&self, device: &UsbDeviceInfo) -> TransportResult<Option<Arc<dyn UsbConnection>>> {
        let Some(found) = self.find_device(device.key)? else {
            return Ok(None);
        };
        let handle = found.open()?;
        let product_name = found
            .device_descriptor()
            .ok()
            .and_then(|device_desc| handle.read_product_string_ascii(&device_desc).ok());
        if let Some(product_name) = product_name {
            log::debug!("Opened device {key}: {product_name}", key = device.key);
        }
        Ok(Some(Arc::new(RusbConnection {
            handle: RwLock::new(Some(handle)),
        })))
    }
}

#[derive(Debug)]
pub struct RusbConnection {
    handle: RwLock<Option<DeviceHandle<Context>>>,
}

impl RusbConnection {
    fn with_handle<T>(
        &self,
        f: impl FnOnce(&DeviceHandle<Context>) -> rusb::Result<T>,
    ) -> TransportResult<T> {
        let handle = self
            .handle
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(handle) = handle.as_ref() else {
            return Err(TransportError::NoDevice);
        };
        f(handle).map_err(Into::into)
    }
}

impl UsbConnection for RusbConnection {
    fn claim_interface(&self, interface: &UsbInterface, force: bool) -> TransportResult<()> {
        self.with_handle(|handle| {
            if force {
                match handle.set_auto_detach_kernel_driver(true) {
                    Ok(()) | Err(rusb::Error::NotSupported) => (),
                    Err(err) => return Err(err),
                }
            }
            handle.claim_interface(interface.number)
        })
    }

    fn release_interface(&self, interface: &UsbInterface) -> TransportResult<()> {
        self.with_handle(|handle| handle.release_interface(interface.number))
    }

    fn set_alternate_setting(&self, interface: &UsbInterface) -> TransportResult<()> {
        self.with_handle(|handle| {
            handle.set_alternate_setting(interface.number, interface.alternate_setting)
        })
    }

    fn bulk_in(
        &self,
        endpoint: &UsbEndpoint,
        buf: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.with_handle(|handle| match endpoint.transfer_type {
            TransferType::Interrupt => handle.read_interrupt(endpoint.address, buf, timeout),
            _ => handle.read_bulk(endpoint.address, buf, timeout),
        })
    }

    fn bulk_out(
        &self,
        endpoint: &UsbEndpoint,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.with_handle(|handle| match endpoint.transfer_type {
            TransferType::Interrupt => handle.write_interrupt(endpoint.address, data, timeout),
            _ => handle.write_bulk(endpoint.address, data, timeout),
        })
    }

    fn close(&self) {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        // Dropping the handle closes the device.
        drop(handle);
    }
}

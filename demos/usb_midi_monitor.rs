// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::{io::stdin, sync::Arc};

use usbmidi::{
    usb::rusb::RusbHost, AttachedPort, ConnectionEvent, DeviceConnectionWatcher, MidiEvent,
    UmpEvent, WatcherConfig,
};

fn on_connection_event(event: ConnectionEvent) {
    match event {
        ConnectionEvent::PortAttached(port) => {
            let name = port.descriptor().to_string();
            log::info!("Port attached: {name}");
            match port {
                AttachedPort::MidiInput(port) => {
                    port.set_midi_handler(move |cable: u8, event: MidiEvent<'_>| {
                        log::info!("{name} [cable {cable}]: {event:?}");
                    });
                }
                AttachedPort::UmpInput(port) => {
                    port.set_ump_handler(move |group: u8, event: UmpEvent<'_>| {
                        log::info!("{name} [group {group}]: {event:?}");
                    });
                }
                AttachedPort::MidiOutput(_) | AttachedPort::UmpOutput(_) => (),
            }
        }
        ConnectionEvent::DeviceAttached(device) => {
            log::info!("Device attached: {device}");
        }
        ConnectionEvent::PortDetached(port) => {
            log::info!("Port detached: {}", port.descriptor());
        }
        ConnectionEvent::DeviceDetached(device) => {
            log::info!("Device detached: {device}");
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let host = Arc::new(RusbHost::new()?);
    let watcher = DeviceConnectionWatcher::new(host, WatcherConfig::default());
    watcher.start(on_connection_event)?;

    log::info!("Watching for USB MIDI devices, press ENTER to exit...");
    let mut input = String::new();
    stdin().read_line(&mut input)?;

    watcher.stop()
}

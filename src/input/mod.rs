// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Input ports with a dedicated reader thread.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{
    ci::{ProtocolSelection, SharedProtocol},
    port::{PortDescriptor, PortError, PortResult},
    thread::{lock, CancellationToken, Worker},
    usb::{Direction, TransportError, UsbConnection, UsbEndpoint},
};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

pub const DEFAULT_SUSPENDED_WAIT: Duration = Duration::from_millis(100);

/// Minimum size of the read buffer.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

// Prevent burning too much CPU if a device fails repeatedly and
// returns immediately from every read request.
const MIN_CYCLE_TIME: Duration = Duration::from_micros(250); // 4 kHz

#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Timeout of a single bulk-in transfer
    pub read_timeout: Duration,

    /// Upper bound for parking the reader while suspended
    pub suspended_wait: Duration,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            suspended_wait: DEFAULT_SUSPENDED_WAIT,
        }
    }
}

/// Stateful decoder of an incoming byte stream.
///
/// Each input port owns a single decoder that is only accessed
/// from the reader thread.
pub trait PacketDecoder: Default + Send + 'static {
    /// Receiver of decoded events
    type Handler: ?Sized + Send + 'static;

    /// Decode the bytes received by a single transfer.
    ///
    /// Events are discarded if no handler is available. The decoder
    /// state is updated nevertheless.
    fn decode(&mut self, data: &[u8], handler: Option<&mut Self::Handler>);
}

struct Shared<H: ?Sized> {
    handler: Mutex<Option<Box<H>>>,
    suspended: Mutex<bool>,
    resumed: Condvar,
}

impl<H: ?Sized> Shared<H> {
    /// Park the calling thread while suspended.
    ///
    /// Returns `true` if the port was suspended.
    fn wait_while_suspended(&self, timeout: Duration) -> bool {
        let suspended = lock(&self.suspended);
        if !*suspended {
            return false;
        }
        drop(
            self.resumed
                .wait_timeout(suspended, timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        true
    }

    fn set_suspended(&self, suspended: bool) {
        *lock(&self.suspended) = suspended;
        self.resumed.notify_all();
    }
}

/// Receives packets from a single IN endpoint.
pub struct InputPort<D: PacketDecoder> {
    descriptor: PortDescriptor,
    connection: Arc<dyn UsbConnection>,
    shared: Arc<Shared<D::Handler>>,
    protocol: SharedProtocol,
    worker: Mutex<Option<Worker>>,
}

impl<D: PacketDecoder> fmt::Debug for InputPort<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("descriptor", &self.descriptor)
            .field("protocol", &self.protocol.load())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<D: PacketDecoder> InputPort<D> {
    /// Bind the port and start reading.
    pub fn new(
        descriptor: PortDescriptor,
        connection: Arc<dyn UsbConnection>,
        config: InputConfig,
    ) -> PortResult<Self> {
        let endpoint = descriptor.endpoint().clone();
        if endpoint.direction != Direction::In {
            return Err(PortError::NoEndpoint {
                interface: descriptor.interface().number,
                direction: Direction::In,
                address: Some(endpoint.address),
            });
        }
        let shared = Arc::new(Shared {
            handler: Mutex::new(None),
            suspended: Mutex::new(false),
            resumed: Condvar::new(),
        });
        let read_len = descriptor.max_packet_size().max(MIN_READ_BUFFER_SIZE);
        let worker = Worker::spawn(format!("usbmidi-in-{descriptor}"), {
            let connection = Arc::clone(&connection);
            let shared = Arc::clone(&shared);
            let port = descriptor.to_string();
            move |token| {
                log::debug!("Entering reader thread of {port}");
                read_loop::<D>(
                    &token,
                    connection.as_ref(),
                    &endpoint,
                    &shared,
                    &config,
                    read_len,
                );
                log::debug!("Exiting reader thread of {port}");
            }
        })?;
        log::debug!("Created input port {descriptor}");
        Ok(Self {
            descriptor,
            connection,
            shared,
            protocol: Arc::new(ProtocolSelection::FALLBACK.into()),
            worker: Mutex::new(Some(worker)),
        })
    }

    #[must_use]
    pub const fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    /// Replace the event handler.
    ///
    /// Returns the previous handler.
    pub fn set_handler(&self, handler: Option<Box<D::Handler>>) -> Option<Box<D::Handler>> {
        std::mem::replace(&mut *lock(&self.shared.handler), handler)
    }

    pub fn suspend(&self) {
        log::debug!("Suspending input port {}", self.descriptor);
        self.shared.set_suspended(true);
    }

    pub fn resume(&self) {
        log::debug!("Resuming input port {}", self.descriptor);
        self.shared.set_suspended(false);
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        *lock(&self.shared.suspended)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Protocol agreed upon by MIDI-CI negotiation.
    #[must_use]
    pub fn protocol(&self) -> ProtocolSelection {
        self.protocol.load()
    }

    #[must_use]
    pub const fn shared_protocol(&self) -> &SharedProtocol {
        &self.protocol
    }

    /// Stop the reader thread and release the interface.
    ///
    /// The interface is only released after the reader thread has exited.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        worker.token().cancel();
        // Wake up a parked reader
        self.shared.set_suspended(false);
        if let Err(err) = worker.cancel_and_join() {
            log::error!("Failed to join reader of {}: {err}", self.descriptor);
        }
        if let Err(err) = self
            .connection
            .release_interface(self.descriptor.interface())
        {
            log::warn!(
                "Failed to release interface of {port}: {err}",
                port = self.descriptor
            );
        }
        log::debug!("Stopped input port {}", self.descriptor);
    }
}

impl<D: PacketDecoder> Drop for InputPort<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop<D: PacketDecoder>(
    token: &CancellationToken,
    connection: &dyn UsbConnection,
    endpoint: &UsbEndpoint,
    shared: &Shared<D::Handler>,
    config: &InputConfig,
    read_len: usize,
) {
    let mut decoder = D::default();
    let mut read_buf = vec![0; read_len];
    let mut last_cycle_started = Instant::now();
    let mut missing_handler_logged = false;
    while !token.is_cancelled() {
        if shared.wait_while_suspended(config.suspended_wait) {
            continue;
        }
        let mut cycle_started = Instant::now();
        let earliest_next_cycle = last_cycle_started + MIN_CYCLE_TIME;
        if earliest_next_cycle > cycle_started {
            std::thread::sleep(earliest_next_cycle.duration_since(cycle_started));
            cycle_started = Instant::now();
        }
        last_cycle_started = cycle_started;
        let bytes_read = match connection.bulk_in(endpoint, &mut read_buf, config.read_timeout) {
            Ok(bytes_read) => bytes_read,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::NoDevice) => {
                log::debug!("Device disconnected, terminating reader");
                break;
            }
            Err(err) => {
                log::debug!(
                    "Failed to read from endpoint {address:#04x}: {err}",
                    address = endpoint.address
                );
                continue;
            }
        };
        if bytes_read == 0 {
            continue;
        }
        let data = &read_buf[..bytes_read];
        log::trace!("Received {data:02x?}");
        let mut handler = lock(&shared.handler);
        if handler.is_none() && !missing_handler_logged {
            log::warn!("Discarding input without a handler");
            missing_handler_logged = true;
        }
        decoder.decode(data, handler.as_deref_mut());
    }
}

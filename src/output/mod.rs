// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Output ports with a pooled send queue and a dedicated writer thread.

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crossbeam_channel::{select, Receiver, Sender};
use thiserror::Error;

use crate::{
    ci::{ProtocolSelection, SharedProtocol},
    port::{PortDescriptor, PortError, PortResult},
    thread::{lock, CancellationToken, Worker},
    usb::{Direction, PacketFormat, UsbConnection, UsbEndpoint},
};

mod pool;
pub use self::pool::{BufferPool, SizeClass};

pub const DEFAULT_POOL_CAPACITY: usize = 1024;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(10);

pub const DEFAULT_MAX_WRITE_ATTEMPTS: usize = 10;

pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(500);

pub const DEFAULT_POOL_RETRY: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum OutputError {
    /// The writer gave up after repeated transfer failures.
    #[error("disconnected")]
    Disconnected,

    #[error("stopped")]
    Stopped,
}

pub type OutputResult<T> = std::result::Result<T, OutputError>;

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Number of pre-allocated buffers per size class
    pub pool_capacity: usize,

    /// Timeout of a single bulk-out transfer
    pub write_timeout: Duration,

    /// Failed transfers of a single fragment until the device is
    /// considered gone
    pub max_write_attempts: usize,

    /// Maximum time the writer waits for the next buffer
    pub idle_wait: Duration,

    /// Sleep time while waiting for a free buffer
    pub pool_retry: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            idle_wait: DEFAULT_IDLE_WAIT,
            pool_retry: DEFAULT_POOL_RETRY,
        }
    }
}

/// Wire format of an output port.
pub trait PacketEncoder: Send + Sync + 'static {
    const FORMAT: PacketFormat;
}

#[derive(Debug)]
struct OutputBuffer {
    bytes: Vec<u8>,
    /// Pool of origin
    class: Option<SizeClass>,
}

#[derive(Debug)]
struct Shared {
    pool: Mutex<BufferPool>,
    suspended: AtomicBool,
    dead: AtomicBool,
    stopped: AtomicBool,
    /// Closed when the writer exits
    queue_tx: Mutex<Option<Sender<OutputBuffer>>>,
}

impl Shared {
    fn recycle(&self, buffer: OutputBuffer) {
        let OutputBuffer { bytes, class } = buffer;
        if let Some(class) = class {
            lock(&self.pool).release(class, bytes);
        }
    }

    /// Reject further packets and return all queued buffers to the pool.
    fn close_queue(&self, queue_rx: &Receiver<OutputBuffer>) {
        drop(lock(&self.queue_tx).take());
        while let Ok(buffer) = queue_rx.try_recv() {
            self.recycle(buffer);
        }
    }

    fn check_usable(&self) -> OutputResult<()> {
        if self.dead.load(Ordering::Acquire) {
            return Err(OutputError::Disconnected);
        }
        if self.stopped.load(Ordering::Acquire) {
            return Err(OutputError::Stopped);
        }
        Ok(())
    }
}

/// Sends packets to a single OUT endpoint.
///
/// Packets are sent in FIFO order by a background writer.
pub struct OutputPort<E> {
    descriptor: PortDescriptor,
    connection: Arc<dyn UsbConnection>,
    shared: Arc<Shared>,
    wake_tx: Sender<()>,
    pool_retry: Duration,
    protocol: SharedProtocol,
    worker: Mutex<Option<Worker>>,
    _encoder: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for OutputPort<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("descriptor", &self.descriptor)
            .field("protocol", &self.protocol.load())
            .field("suspended", &self.shared.suspended)
            .field("dead", &self.shared.dead)
            .finish_non_exhaustive()
    }
}

impl<E: PacketEncoder> OutputPort<E> {
    /// Bind the port and start the writer.
    pub fn new(
        descriptor: PortDescriptor,
        connection: Arc<dyn UsbConnection>,
        config: OutputConfig,
    ) -> PortResult<Self> {
        let endpoint = descriptor.endpoint().clone();
        if endpoint.direction != Direction::Out {
            return Err(PortError::NoEndpoint {
                interface: descriptor.interface().number,
                direction: Direction::Out,
                address: Some(endpoint.address),
            });
        }
        debug_assert_eq!(E::FORMAT, descriptor.format());
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            pool: Mutex::new(BufferPool::new(config.pool_capacity)),
            suspended: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            queue_tx: Mutex::new(Some(queue_tx)),
        });
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let pool_retry = config.pool_retry;
        let worker = Worker::spawn(format!("usbmidi-out-{descriptor}"), {
            let connection = Arc::clone(&connection);
            let shared = Arc::clone(&shared);
            let port = descriptor.to_string();
            move |token| {
                log::debug!("Entering writer thread of {port}");
                write_loop(
                    &token,
                    connection.as_ref(),
                    &endpoint,
                    &shared,
                    &queue_rx,
                    &wake_rx,
                    &config,
                );
                log::debug!("Exiting writer thread of {port}");
            }
        })?;
        log::debug!("Created output port {descriptor}");
        Ok(Self {
            descriptor,
            connection,
            shared,
            wake_tx,
            pool_retry,
            protocol: Arc::new(ProtocolSelection::FALLBACK.into()),
            worker: Mutex::new(Some(worker)),
            _encoder: PhantomData,
        })
    }
}

impl<E> OutputPort<E> {
    #[must_use]
    pub const fn descriptor(&self) -> &PortDescriptor {
        &self.descriptor
    }

    /// Take a zeroed buffer from the pool.
    ///
    /// Blocks until a buffer becomes available.
    fn acquire(&self, class: SizeClass) -> OutputResult<OutputBuffer> {
        loop {
            self.shared.check_usable()?;
            if let Some(bytes) = lock(&self.shared.pool).try_acquire(class) {
                return Ok(OutputBuffer {
                    bytes,
                    class: Some(class),
                });
            }
            log::trace!("No free {class:?} buffer available");
            std::thread::sleep(self.pool_retry);
        }
    }

    fn enqueue(&self, buffer: OutputBuffer) -> OutputResult<()> {
        let rejected = match lock(&self.shared.queue_tx).as_ref() {
            Some(queue_tx) => match queue_tx.send(buffer) {
                Ok(()) => return Ok(()),
                Err(err) => err.into_inner(),
            },
            None => buffer,
        };
        self.shared.recycle(rejected);
        self.shared.check_usable()?;
        Err(OutputError::Stopped)
    }

    /// Fill a pooled packet and enqueue it.
    pub(crate) fn send_with(
        &self,
        class: SizeClass,
        fill: impl FnOnce(&mut [u8]),
    ) -> OutputResult<()> {
        let mut buffer = self.acquire(class)?;
        fill(&mut buffer.bytes);
        self.enqueue(buffer)
    }

    /// Enqueue raw bytes.
    ///
    /// Bytes that match a pooled size class exactly are copied into a
    /// pooled buffer.
    pub fn send_bytes(&self, bytes: &[u8]) -> OutputResult<()> {
        match SizeClass::for_len(bytes.len()) {
            Some(class) if class.len() == bytes.len() => {
                self.send_with(class, |buf| buf.copy_from_slice(bytes))
            }
            _ => self.send_owned(bytes.to_vec()),
        }
    }

    /// Enqueue an unpooled buffer.
    pub fn send_owned(&self, bytes: Vec<u8>) -> OutputResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.shared.check_usable()?;
        self.enqueue(OutputBuffer { bytes, class: None })
    }

    fn wake_writer(&self) {
        // A pending wake-up is sufficient
        let _ = self.wake_tx.try_send(());
    }

    /// Park the writer without dropping queued packets.
    pub fn suspend(&self) {
        log::debug!("Suspending output port {}", self.descriptor);
        self.shared.suspended.store(true, Ordering::Release);
        self.wake_writer();
    }

    pub fn resume(&self) {
        log::debug!("Resuming output port {}", self.descriptor);
        self.shared.suspended.store(false, Ordering::Release);
        self.wake_writer();
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    /// Neither stopped nor disconnected.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.shared.check_usable().is_ok()
    }

    #[must_use]
    pub fn free_buffers(&self, class: SizeClass) -> usize {
        lock(&self.shared.pool).free_count(class)
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

    /// Stop the writer and release the interface.
    ///
    /// Packets that have not been sent yet are discarded.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        self.shared.stopped.store(true, Ordering::Release);
        worker.token().cancel();
        self.wake_writer();
        if let Err(err) = worker.cancel_and_join() {
            log::error!("Failed to join writer of {}: {err}", self.descriptor);
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
        log::debug!("Stopped output port {}", self.descriptor);
    }
}

impl<E> Drop for OutputPort<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Send all bytes in fragments of at most `max_packet_size`.
///
/// Returns `false` if a fragment could not be sent.
fn transmit(
    connection: &dyn UsbConnection,
    endpoint: &UsbEndpoint,
    data: &[u8],
    config: &OutputConfig,
) -> bool {
    let max_packet_size = usize::from(endpoint.max_packet_size).max(1);
    for fragment in data.chunks(max_packet_size) {
        let mut remaining = fragment;
        let mut failed_attempts = 0;
        while !remaining.is_empty() {
            match connection.bulk_out(endpoint, remaining, config.write_timeout) {
                Ok(bytes_written) if bytes_written > 0 => {
                    remaining = &remaining[bytes_written.min(remaining.len())..];
                    continue;
                }
                Ok(_) => {
                    log::debug!("No bytes written");
                }
                Err(err) => {
                    log::debug!("Failed to write {remaining:02x?}: {err}");
                }
            }
            failed_attempts += 1;
            if failed_attempts >= config.max_write_attempts {
                return false;
            }
        }
        log::trace!("Sent {fragment:02x?}");
    }
    true
}

fn write_loop(
    token: &CancellationToken,
    connection: &dyn UsbConnection,
    endpoint: &UsbEndpoint,
    shared: &Shared,
    queue_rx: &Receiver<OutputBuffer>,
    wake_rx: &Receiver<()>,
    config: &OutputConfig,
) {
    // A buffer that has been dequeued while suspending
    let mut pending = None;
    while !token.is_cancelled() {
        if shared.suspended.load(Ordering::Acquire) {
            select! {
                recv(wake_rx) -> _ => (),
                default(config.idle_wait) => (),
            }
            continue;
        }
        let buffer = if let Some(buffer) = pending.take() {
            buffer
        } else {
            select! {
                recv(queue_rx) -> msg => {
                    let Ok(buffer) = msg else {
                        break;
                    };
                    buffer
                }
                recv(wake_rx) -> _ => continue,
                default(config.idle_wait) => continue,
            }
        };
        if shared.suspended.load(Ordering::Acquire) || token.is_cancelled() {
            pending = Some(buffer);
            continue;
        }
        let sent = transmit(connection, endpoint, &buffer.bytes, config);
        shared.recycle(buffer);
        if !sent {
            log::warn!(
                "Giving up after {attempts} failed attempts: endpoint {address:#04x} is gone",
                attempts = config.max_write_attempts,
                address = endpoint.address
            );
            shared.dead.store(true, Ordering::Release);
            break;
        }
    }
    // Return all unsent buffers to the pool
    if let Some(buffer) = pending {
        shared.recycle(buffer);
    }
    shared.close_queue(queue_rx);
}

// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Hot-plug detection of USB MIDI devices.
//!
//! The watcher polls the host periodically, asks for permission to access
//! newly discovered MIDI devices one at a time, and creates ports for all
//! MIDI endpoints of a device after the permission has been granted.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use derive_more::From;
use discro::{Publisher, Subscriber};

use crate::{
    input::InputConfig,
    midi1::{MidiInputPort, MidiOutputPort},
    output::OutputConfig,
    port::PortDescriptor,
    thread::{lock, Worker},
    ump::{UmpInputPort, UmpOutputPort},
    usb::{DeviceFilter, PermissionOutcome, UsbDeviceInfo, UsbHost},
};

mod state;
use self::state::WatcherState;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which wire format to use if a device offers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolPreference {
    /// Always use the USB-MIDI 1.0 alternate setting
    Midi1,
    /// Use the UMP alternate setting when offered
    #[default]
    Ump,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Vendor specific devices that are not class compliant
    pub filters: Vec<DeviceFilter>,
    pub protocol_preference: ProtocolPreference,
    pub input: InputConfig,
    pub output: OutputConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            filters: Vec::new(),
            protocol_preference: ProtocolPreference::default(),
            input: InputConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// A port of an attached device.
#[derive(Debug, Clone, From)]
pub enum AttachedPort {
    MidiInput(Arc<MidiInputPort>),
    MidiOutput(Arc<MidiOutputPort>),
    UmpInput(Arc<UmpInputPort>),
    UmpOutput(Arc<UmpOutputPort>),
}

impl AttachedPort {
    #[must_use]
    pub fn descriptor(&self) -> &PortDescriptor {
        match self {
            Self::MidiInput(port) => port.descriptor(),
            Self::MidiOutput(port) => port.descriptor(),
            Self::UmpInput(port) => port.descriptor(),
            Self::UmpOutput(port) => port.descriptor(),
        }
    }

    /// Stop the port thread and release its interface.
    pub fn stop(&self) {
        match self {
            Self::MidiInput(port) => port.stop(),
            Self::MidiOutput(port) => port.stop(),
            Self::UmpInput(port) => port.stop(),
            Self::UmpOutput(port) => port.stop(),
        }
    }
}

/// Snapshot of an attached device and its ports.
#[derive(Debug, Clone)]
pub struct AttachedDevice {
    pub device: Arc<UsbDeviceInfo>,
    pub ports: Vec<AttachedPort>,
}

/// Attach and detach notifications.
///
/// Ports are attached before their device and detached before their
/// device. Detached ports have already been stopped.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    PortAttached(AttachedPort),
    DeviceAttached(Arc<UsbDeviceInfo>),
    PortDetached(AttachedPort),
    DeviceDetached(Arc<UsbDeviceInfo>),
}

/// Receives [`ConnectionEvent`]s.
///
/// Invoked on the watcher thread or on the thread that invoked
/// [`DeviceConnectionWatcher::check_now()`] or
/// [`DeviceConnectionWatcher::stop()`].
///
/// No lock is held while the handler runs, i.e. it may call back into
/// the watcher. Events caused by such a call are delivered after the
/// current event has been handled.
pub trait ConnectionEventHandler: Send {
    fn handle_connection_event(&mut self, event: ConnectionEvent);
}

impl<F> ConnectionEventHandler for F
where
    F: FnMut(ConnectionEvent) + Send,
{
    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        self(event);
    }
}

/// Delivers events to the handler one at a time.
#[derive(Default)]
struct Dispatcher {
    handler: Option<Box<dyn ConnectionEventHandler>>,
    queued: VecDeque<ConnectionEvent>,
    /// Events are currently being delivered
    busy: bool,
    /// The handler has been replaced while being invoked
    replaced: bool,
}

/// State shared between the owner and the watcher thread.
struct Core {
    host: Arc<dyn UsbHost>,
    config: WatcherConfig,
    state: Mutex<WatcherState>,
    dispatcher: Mutex<Dispatcher>,
    permission_tx: Sender<PermissionOutcome>,
    permission_rx: Receiver<PermissionOutcome>,
    attached: Publisher<Vec<AttachedDevice>>,
}

impl Core {
    fn dispatch(&self, events: Vec<ConnectionEvent>) {
        if events.is_empty() {
            return;
        }
        let mut dispatcher = lock(&self.dispatcher);
        dispatcher.queued.extend(events);
        if dispatcher.busy {
            // Picked up by the dispatching thread
            return;
        }
        dispatcher.busy = true;
        while !dispatcher.queued.is_empty() {
            let Some(mut handler) = dispatcher.handler.take() else {
                log::debug!(
                    "Discarding {count} connection event(s)",
                    count = dispatcher.queued.len()
                );
                dispatcher.queued.clear();
                break;
            };
            dispatcher.replaced = false;
            let events = std::mem::take(&mut dispatcher.queued);
            drop(dispatcher);
            for event in events {
                handler.handle_connection_event(event);
            }
            dispatcher = lock(&self.dispatcher);
            if !dispatcher.replaced {
                dispatcher.handler = Some(handler);
            }
        }
        dispatcher.busy = false;
    }

    fn publish(&self, state: &WatcherState) {
        self.attached.write(state.snapshot());
    }

    /// Poll the host and process all pending permission outcomes.
    fn poll(&self) {
        let devices = match self.host.devices() {
            Ok(devices) => devices,
            Err(err) => {
                log::warn!("Failed to enumerate devices: {err}");
                return;
            }
        };
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            state.update_present(&devices, &self.config.filters, &mut events);
            self.process_permissions(&mut state, &mut events);
            self.publish(&state);
        }
        self.dispatch(events);
    }

    /// Handle a single permission outcome received while waiting.
    fn on_permission_outcome(&self, outcome: PermissionOutcome) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            state.resolve_permission(&*self.host, &self.config, outcome, &mut events);
            self.process_permissions(&mut state, &mut events);
            self.publish(&state);
        }
        self.dispatch(events);
    }

    /// Request permissions until a request stays in flight.
    ///
    /// Hosts might answer synchronously, i.e. before the request returns.
    fn process_permissions(&self, state: &mut WatcherState, events: &mut Vec<ConnectionEvent>) {
        loop {
            while let Ok(outcome) = self.permission_rx.try_recv() {
                state.resolve_permission(&*self.host, &self.config, outcome, events);
            }
            if !state.request_next_permission(&*self.host, &self.permission_tx) {
                break;
            }
            if self.permission_rx.is_empty() {
                break;
            }
        }
    }

    fn detach_all(&self) {
        let mut events = Vec::new();
        {
            let mut state = lock(&self.state);
            state.detach_all(&mut events);
            self.publish(&state);
        }
        self.dispatch(events);
    }
}

/// Watches for USB MIDI devices being plugged in and out.
pub struct DeviceConnectionWatcher {
    core: Arc<Core>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for DeviceConnectionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnectionWatcher")
            .field("config", &self.core.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DeviceConnectionWatcher {
    #[must_use]
    pub fn new(host: Arc<dyn UsbHost>, config: WatcherConfig) -> Self {
        let (permission_tx, permission_rx) = crossbeam_channel::unbounded();
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let core = Core {
            host,
            config,
            state: Mutex::new(WatcherState::default()),
            dispatcher: Mutex::new(Dispatcher::default()),
            permission_tx,
            permission_rx,
            attached: Publisher::new(Vec::new()),
        };
        Self {
            core: Arc::new(core),
            wake_tx,
            wake_rx,
            worker: Mutex::new(None),
        }
    }

    /// Replace the event handler.
    ///
    /// Returns the previous handler unless it is currently being invoked.
    pub fn set_handler(
        &self,
        handler: Option<Box<dyn ConnectionEventHandler>>,
    ) -> Option<Box<dyn ConnectionEventHandler>> {
        let mut dispatcher = lock(&self.core.dispatcher);
        dispatcher.replaced = dispatcher.busy;
        std::mem::replace(&mut dispatcher.handler, handler)
    }

    /// Observe the list of attached devices.
    #[must_use]
    pub fn subscribe(&self) -> Subscriber<Vec<AttachedDevice>> {
        self.core.attached.subscribe()
    }

    /// The currently attached devices.
    #[must_use]
    pub fn attached_devices(&self) -> Vec<AttachedDevice> {
        lock(&self.core.state).snapshot()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Start polling on a background thread.
    ///
    /// The first poll happens immediately. Starting a running watcher
    /// only replaces the handler.
    pub fn start(&self, handler: impl ConnectionEventHandler + 'static) -> std::io::Result<()> {
        self.set_handler(Some(Box::new(handler)));
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|worker| !worker.is_finished()) {
            log::debug!("Watcher is already running");
            return Ok(());
        }
        // Discard stale wake up signals
        while self.wake_rx.try_recv().is_ok() {}
        let core = Arc::clone(&self.core);
        let wake_rx = self.wake_rx.clone();
        *worker = Some(Worker::spawn("usbmidi-watcher", move |token| {
            log::debug!("Entering watcher thread");
            let poll_interval = core.config.poll_interval;
            while !token.is_cancelled() {
                core.poll();
                let deadline = Instant::now() + poll_interval;
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    crossbeam_channel::select! {
                        recv(core.permission_rx) -> outcome => {
                            if let Ok(outcome) = outcome {
                                core.on_permission_outcome(outcome);
                            }
                        }
                        recv(wake_rx) -> _ => (),
                        default(remaining) => break,
                    }
                }
            }
            log::debug!("Exiting watcher thread");
        })?);
        Ok(())
    }

    /// Poll immediately on the current thread.
    ///
    /// Events are delivered before this function returns unless another
    /// thread or an outer call is already delivering events.
    pub fn check_now(&self) {
        self.core.poll();
    }

    /// Stop polling and detach all devices.
    ///
    /// Detach events for all attached devices are delivered before this
    /// function returns.
    pub fn stop(&self) -> anyhow::Result<()> {
        let worker = lock(&self.worker).take();
        let joined = worker.map_or(Ok(()), |worker| {
            worker.token().cancel();
            // The channel might be full if already signaled
            let _ = self.wake_tx.try_send(());
            worker.cancel_and_join()
        });
        self.core.detach_all();
        joined
    }
}

impl Drop for DeviceConnectionWatcher {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("Failed to stop watcher: {err}");
        }
    }
}

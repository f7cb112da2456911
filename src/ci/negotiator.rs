// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use crossbeam_utils::atomic::AtomicCell;

use super::{
    CiBody, CiMessage, Extension, MidiProtocol, Muid, NegotiationPhase, ProtocolSelection,
    SharedProtocol,
};
use crate::{
    midi1::MidiOutputPort,
    output::OutputResult,
    thread::{lock, CancellationToken, Worker},
    ump::UmpOutputPort,
};

/// Maximum time to wait for each answer of the remote end.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_millis(300);

pub const DEFAULT_POLL_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationRole {
    #[default]
    Initiator,
    Responder,
}

#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub role: NegotiationRole,
    /// Supported protocols, most preferred first
    pub preferences: Vec<ProtocolSelection>,
    pub phase_timeout: Duration,
    pub poll_step: Duration,
    /// Random if `None`
    pub muid: Option<Muid>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            role: NegotiationRole::default(),
            preferences: vec![
                ProtocolSelection::new(MidiProtocol::Midi2, Extension::NONE),
                ProtocolSelection::FALLBACK,
            ],
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
            poll_step: DEFAULT_POLL_STEP,
            muid: None,
        }
    }
}

/// Result of a negotiation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub selection: ProtocolSelection,
    /// The remote end, if it answered at all
    pub remote: Option<Muid>,
    /// `false` if the attempt timed out and fell back
    pub established: bool,
}

/// Sends MIDI-CI messages to the remote end.
pub trait CiTransport: Send + Sync {
    /// Send a complete SysEx message, including `F0`/`F7`.
    fn send_ci_message(&self, message: &[u8]) -> OutputResult<()>;
}

impl CiTransport for MidiOutputPort {
    fn send_ci_message(&self, message: &[u8]) -> OutputResult<()> {
        self.send_system_exclusive(0, message)
    }
}

impl CiTransport for UmpOutputPort {
    fn send_ci_message(&self, message: &[u8]) -> OutputResult<()> {
        self.send_system_exclusive7(0, message)
    }
}

/// Entry point for messages received from the remote end.
#[derive(Debug, Clone)]
pub struct CiInbox(Sender<CiMessage>);

impl CiInbox {
    pub fn deliver(&self, message: CiMessage) {
        if self.0.send(message).is_err() {
            log::debug!("Negotiator has been dropped");
        }
    }

    /// Deliver a SysEx message if it is a negotiation message.
    ///
    /// Returns `false` if the message has not been consumed.
    pub fn deliver_sysex(&self, data: &[u8]) -> bool {
        let Some(message) = CiMessage::parse(data) else {
            return false;
        };
        log::trace!("Received {message:?}");
        self.deliver(message);
        true
    }
}

/// Runs the negotiation handshake on a background thread.
#[derive(Debug)]
pub struct Negotiator {
    config: NegotiationConfig,
    local: Muid,
    phase: Arc<AtomicCell<NegotiationPhase>>,
    inbox_tx: Sender<CiMessage>,
    inbox_rx: Receiver<CiMessage>,
    worker: Mutex<Option<Worker>>,
}

impl Negotiator {
    #[must_use]
    pub fn new(config: NegotiationConfig) -> Self {
        let local = config.muid.unwrap_or_else(Muid::random);
        let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            local,
            phase: Arc::new(AtomicCell::new(NegotiationPhase::Start)),
            inbox_tx,
            inbox_rx,
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn local_muid(&self) -> Muid {
        self.local
    }

    #[must_use]
    pub fn phase(&self) -> NegotiationPhase {
        self.phase.load()
    }

    #[must_use]
    pub fn inbox(&self) -> CiInbox {
        CiInbox(self.inbox_tx.clone())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Start a new negotiation.
    ///
    /// The protocol of all `targets` is updated when an attempt finishes.
    /// `on_outcome` is invoked once per attempt on the negotiation thread.
    /// A responder keeps accepting new attempts until stopped.
    /// Messages received before starting are discarded.
    pub fn start(
        &self,
        transport: Arc<dyn CiTransport>,
        targets: Vec<SharedProtocol>,
        on_outcome: impl FnMut(NegotiationOutcome) + Send + 'static,
    ) -> std::io::Result<()> {
        self.stop();
        // Messages left over from a previous attempt
        let stale = self.inbox_rx.try_iter().count();
        if stale > 0 {
            log::debug!("Discarding {stale} stale MIDI-CI message(s)");
        }
        self.phase.store(NegotiationPhase::Start);
        let session = Session {
            config: self.config.clone(),
            local: self.local,
            phase: Arc::clone(&self.phase),
            inbox: self.inbox_rx.clone(),
            transport,
            targets,
            remote: None,
        };
        let thread_name = format!("usbmidi-ci-{}", self.local);
        let worker = Worker::spawn(thread_name, move |token| {
            session.run(&token, on_outcome);
        })?;
        *lock(&self.worker) = Some(worker);
        Ok(())
    }

    /// Abort a running negotiation.
    ///
    /// The outcome callback is not invoked for an aborted attempt.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        if let Err(err) = worker.cancel_and_join() {
            log::error!("Failed to join negotiator {}: {err}", self.local);
        }
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Session {
    config: NegotiationConfig,
    local: Muid,
    phase: Arc<AtomicCell<NegotiationPhase>>,
    inbox: Receiver<CiMessage>,
    transport: Arc<dyn CiTransport>,
    targets: Vec<SharedProtocol>,
    remote: Option<Muid>,
}

enum Interrupt {
    /// Timed out or no common protocol
    Fallback,
    Cancelled,
}

type Step<T> = Result<T, Interrupt>;

impl Session {
    fn run(mut self, token: &CancellationToken, mut on_outcome: impl FnMut(NegotiationOutcome)) {
        match self.config.role {
            NegotiationRole::Initiator => {
                let result = self.initiate(token);
                self.phase.store(NegotiationPhase::End);
                if let Some(outcome) = self.outcome(result) {
                    on_outcome(outcome);
                }
            }
            NegotiationRole::Responder => {
                while !token.is_cancelled() {
                    self.phase.store(NegotiationPhase::Start);
                    self.remote = None;
                    let result = self.respond(token);
                    let Some(outcome) = self.outcome(result) else {
                        break;
                    };
                    on_outcome(outcome);
                }
            }
        }
        log::debug!("Negotiator {} finished", self.local);
    }

    fn outcome(&self, result: Step<ProtocolSelection>) -> Option<NegotiationOutcome> {
        let outcome = match result {
            Ok(selection) => {
                log::info!(
                    "Negotiated {selection} between {local} and {remote:?}",
                    local = self.local,
                    remote = self.remote
                );
                NegotiationOutcome {
                    selection,
                    remote: self.remote,
                    established: true,
                }
            }
            Err(Interrupt::Fallback) => {
                log::info!(
                    "Negotiation of {local} failed in phase {phase:?}, falling back to {fallback}",
                    local = self.local,
                    phase = self.phase.load(),
                    fallback = ProtocolSelection::FALLBACK
                );
                NegotiationOutcome {
                    selection: ProtocolSelection::FALLBACK,
                    remote: self.remote,
                    established: false,
                }
            }
            Err(Interrupt::Cancelled) => return None,
        };
        for target in &self.targets {
            target.store(outcome.selection);
        }
        Some(outcome)
    }

    fn advance(&self, from: NegotiationPhase, to: NegotiationPhase) {
        match self.phase.compare_exchange(from, to) {
            Ok(_) => log::debug!("Negotiator {}: {from:?} -> {to:?}", self.local),
            Err(actual) => log::warn!(
                "Negotiator {}: unexpected phase {actual:?} instead of {from:?}",
                self.local
            ),
        }
    }

    fn send(&self, body: CiBody) {
        let destination = self.remote.unwrap_or(Muid::BROADCAST);
        let message = CiMessage::new(self.local, destination, body);
        log::trace!("Sending {message:?}");
        if let Err(err) = self.transport.send_ci_message(&message.encode()) {
            // The remote end will not answer and the step times out
            log::warn!("Failed to send {:?}: {err}", message.body.sub_id());
        }
    }

    /// Wait for the first message accepted by `accept`.
    ///
    /// Other messages are discarded. Waits forever without a `timeout`.
    fn wait_for<T>(
        &self,
        token: &CancellationToken,
        timeout: Option<Duration>,
        mut accept: impl FnMut(&CiMessage) -> Option<T>,
    ) -> Step<(Muid, T)> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if token.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            let mut wait = self.config.poll_step;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Interrupt::Fallback);
                }
                wait = wait.min(remaining);
            }
            let message = match self.inbox.recv_timeout(wait) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(Interrupt::Cancelled),
            };
            if message.source == self.local || !message.is_addressed_to(self.local) {
                continue;
            }
            if self.remote.is_some_and(|remote| remote != message.source) {
                log::debug!("Ignoring message from {}", message.source);
                continue;
            }
            if let Some(accepted) = accept(&message) {
                return Ok((message.source, accepted));
            }
            log::debug!("Ignoring unexpected {:?}", message.body.sub_id());
        }
    }

    fn select(&self, remote_preferences: &[ProtocolSelection]) -> Option<ProtocolSelection> {
        self.config
            .preferences
            .iter()
            .find(|selection| remote_preferences.contains(selection))
            .copied()
    }

    fn initiate(&mut self, token: &CancellationToken) -> Step<ProtocolSelection> {
        let timeout = Some(self.config.phase_timeout);
        let current = self
            .targets
            .first()
            .map_or(ProtocolSelection::FALLBACK, |target| target.load());
        self.send(CiBody::Initiate {
            preferences: self.config.preferences.clone(),
            current,
        });
        self.advance(NegotiationPhase::Start, NegotiationPhase::Initiate);
        let (remote, remote_preferences) = self.wait_for(token, timeout, |message| {
            if let CiBody::Reply { preferences } = &message.body {
                Some(preferences.clone())
            } else {
                None
            }
        })?;
        self.remote = Some(remote);
        self.advance(NegotiationPhase::Initiate, NegotiationPhase::Reply);
        let Some(selection) = self.select(&remote_preferences) else {
            log::info!("No common protocol with {remote}");
            return Err(Interrupt::Fallback);
        };
        self.send(CiBody::SetNewProtocol { selection });
        self.advance(NegotiationPhase::Reply, NegotiationPhase::SetNew);
        self.send(CiBody::TestInitiatorToResponder);
        self.advance(
            NegotiationPhase::SetNew,
            NegotiationPhase::TestInitiatorToResponder,
        );
        self.wait_for(token, timeout, |message| {
            matches!(message.body, CiBody::TestResponderToInitiator).then_some(())
        })?;
        self.advance(
            NegotiationPhase::TestInitiatorToResponder,
            NegotiationPhase::TestResponderToInitiator,
        );
        self.send(CiBody::Confirmation);
        self.advance(
            NegotiationPhase::TestResponderToInitiator,
            NegotiationPhase::Confirmation,
        );
        Ok(selection)
    }

    fn respond(&mut self, token: &CancellationToken) -> Step<ProtocolSelection> {
        let timeout = Some(self.config.phase_timeout);
        let (remote, ()) = self.wait_for(token, None, |message| {
            matches!(message.body, CiBody::Initiate { .. }).then_some(())
        })?;
        self.remote = Some(remote);
        self.advance(NegotiationPhase::Start, NegotiationPhase::Initiate);
        self.send(CiBody::Reply {
            preferences: self.config.preferences.clone(),
        });
        self.advance(NegotiationPhase::Initiate, NegotiationPhase::Reply);
        let (_, selection) = self.wait_for(token, timeout, |message| match message.body {
            CiBody::SetNewProtocol { selection } if self.config.preferences.contains(&selection) => {
                Some(selection)
            }
            _ => None,
        })?;
        self.advance(NegotiationPhase::Reply, NegotiationPhase::SetNew);
        self.wait_for(token, timeout, |message| {
            matches!(message.body, CiBody::TestInitiatorToResponder).then_some(())
        })?;
        self.advance(
            NegotiationPhase::SetNew,
            NegotiationPhase::TestInitiatorToResponder,
        );
        self.send(CiBody::TestResponderToInitiator);
        self.advance(
            NegotiationPhase::TestInitiatorToResponder,
            NegotiationPhase::TestResponderToInitiator,
        );
        self.wait_for(token, timeout, |message| {
            matches!(message.body, CiBody::Confirmation).then_some(())
        })?;
        self.advance(
            NegotiationPhase::TestResponderToInitiator,
            NegotiationPhase::Confirmation,
        );
        Ok(selection)
    }
}

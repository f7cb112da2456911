// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

//! Dedicated worker threads with cooperative cancellation.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
};

/// Shared stop signal between the owner and a worker thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A named OS thread that runs until cancelled.
#[derive(Debug)]
pub(crate) struct Worker {
    token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: impl Into<String>, thread_fn: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let join_handle = std::thread::Builder::new().name(name.into()).spawn({
            let token = token.clone();
            move || thread_fn(token)
        })?;
        log::debug!("Spawned thread: {join_handle:?}");
        Ok(Self { token, join_handle })
    }

    #[must_use]
    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub(crate) fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    pub(crate) fn cancel_and_join(self) -> anyhow::Result<()> {
        let Self { token, join_handle } = self;
        token.cancel();
        if join_handle.thread().id() == std::thread::current().id() {
            // Joining itself would deadlock.
            log::debug!("Detaching current thread: {join_handle:?}");
            return Ok(());
        }
        log::debug!("Joining thread: {join_handle:?}");
        let thread_name = join_handle.thread().name().map(ToOwned::to_owned);
        join_handle.join().map_err(|err| {
            let thread_name = thread_name.as_deref().unwrap_or("unnamed");
            log::error!("Thread {thread_name} panicked: {err:?}");
            anyhow::anyhow!("Thread {thread_name} panicked: {err:?}")
        })
    }
}

/// Lock a mutex, ignoring poisoning.
///
/// All data guarded by mutexes in this crate stays consistent even if
/// a handler panics while the lock is held.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Readiness, disposal, and fetch classification shared by both managers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use kernsync_poll::{Outcome, PollError, PollTask, Poller};
use kernsync_signal::Signal;
use parking_lot::ReentrantMutex;
use tokio::sync::watch;

use crate::api::ApiError;
use crate::config::ServerSettings;
use crate::{Error, Result};

/// Lifecycle of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
	/// The first fetch has not settled yet.
	Pending,
	/// The first fetch settled; polling is armed.
	Ready,
	/// Terminal. Background activity stopped, cache cleared.
	Disposed,
}

pub(crate) struct ManagerBase {
	name: &'static str,
	state: watch::Sender<ManagerState>,
	ready: AtomicBool,
	/// Serializes cache-update-then-emit sequences so emissions follow cache order.
	order: ReentrantMutex<()>,
	settings: ServerSettings,
	connection_failure: Signal<ApiError>,
	disposed: Signal<()>,
}

impl ManagerBase {
	pub(crate) fn new(name: &'static str, settings: ServerSettings) -> Self {
		let (state, _) = watch::channel(ManagerState::Pending);
		Self {
			name,
			state,
			ready: AtomicBool::new(false),
			order: ReentrantMutex::new(()),
			settings,
			connection_failure: Signal::new("connection_failure"),
			disposed: Signal::new("disposed"),
		}
	}

	pub(crate) fn name(&self) -> &'static str {
		self.name
	}

	pub(crate) fn state(&self) -> ManagerState {
		*self.state.borrow()
	}

	pub(crate) fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Acquire)
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.state() == ManagerState::Disposed
	}

	pub(crate) fn settings(&self) -> &ServerSettings {
		&self.settings
	}

	pub(crate) fn connection_failure(&self) -> &Signal<ApiError> {
		&self.connection_failure
	}

	pub(crate) fn disposed(&self) -> &Signal<()> {
		&self.disposed
	}

	pub(crate) fn order(&self) -> parking_lot::ReentrantMutexGuard<'_, ()> {
		self.order.lock()
	}

	pub(crate) fn ensure_live(&self) -> Result<()> {
		if self.is_disposed() { Err(Error::Disposed) } else { Ok(()) }
	}

	/// Moves `Pending` to `Ready`. Returns `false` if already ready or disposed.
	pub(crate) fn mark_ready(&self) -> bool {
		let ready = &self.ready;
		let marked = self.state.send_if_modified(|state| {
			if *state != ManagerState::Pending {
				return false;
			}
			ready.store(true, Ordering::Release);
			*state = ManagerState::Ready;
			true
		});
		if marked {
			tracing::info!(manager = self.name, "manager.ready");
		}
		marked
	}

	/// Moves to `Disposed`. Returns `true` only for the first caller.
	pub(crate) fn begin_dispose(&self) -> bool {
		self.state.send_if_modified(|state| {
			if *state == ManagerState::Disposed {
				return false;
			}
			*state = ManagerState::Disposed;
			true
		})
	}

	/// Fires the disposed signal once, then severs every base channel.
	pub(crate) fn finish_dispose(&self) {
		self.disposed.emit(&());
		self.disposed.close();
		self.connection_failure.close();
		tracing::info!(manager = self.name, "manager.disposed");
	}

	/// Waits until the first fetch settled.
	pub(crate) async fn ready(&self) -> Result<()> {
		let mut rx = self.state.subscribe();
		let _ = rx.wait_for(|state| *state != ManagerState::Pending).await;
		if self.is_ready() { Ok(()) } else { Err(Error::Disposed) }
	}

	/// Splits a fetch result into fresh data, a recovered transient failure (`Ok(None)`), or a
	/// fatal failure.
	pub(crate) fn classify<T>(&self, fetched: std::result::Result<T, ApiError>) -> std::result::Result<Option<T>, ApiError> {
		match fetched {
			Ok(value) => Ok(Some(value)),
			Err(err) if err.is_transient() => {
				tracing::warn!(manager = self.name, error = %err, "manager.connection_failure");
				self.connection_failure.emit(&err);
				Ok(None)
			}
			Err(err) => {
				tracing::debug!(manager = self.name, error = %err, "manager.fetch_failed");
				Err(err)
			}
		}
	}
}

/// A manager driven by a [`Poller`] over its own fetch-and-reconcile pass.
#[async_trait]
pub(crate) trait Managed: Send + Sync + Sized + 'static {
	fn base(&self) -> &ManagerBase;

	fn poller(&self) -> &Poller<ManagerPoll<Self>>;

	/// One fetch-and-reconcile pass.
	async fn request(&self) -> std::result::Result<Outcome, ApiError>;
}

/// Poll task holding a weak reference back to its manager.
pub(crate) struct ManagerPoll<M> {
	manager: Weak<M>,
}

impl<M> ManagerPoll<M> {
	pub(crate) fn new(manager: Weak<M>) -> Self {
		Self { manager }
	}
}

#[async_trait]
impl<M: Managed> PollTask for ManagerPoll<M> {
	type Error = ApiError;

	async fn poll(&self) -> std::result::Result<Outcome, ApiError> {
		let Some(manager) = self.manager.upgrade() else {
			return Ok(Outcome::Resolved);
		};
		if manager.base().is_disposed() {
			return Ok(Outcome::Resolved);
		}
		manager.request().await
	}
}

/// Runs the first fetch, then marks the manager ready and arms its poller.
///
/// Readiness settles whatever the fetch outcome, unless the manager is disposed first.
pub(crate) fn spawn_readiness<M: Managed>(manager: &Arc<M>) {
	let weak = Arc::downgrade(manager);
	tokio::spawn(async move {
		let Some(poller) = weak.upgrade().map(|m| m.poller().clone()) else {
			return;
		};
		let result = poller.refresh().await;
		let Some(manager) = weak.upgrade() else {
			return;
		};
		match result {
			Ok(_) => {}
			Err(PollError::Disposed) => return,
			Err(err) => tracing::warn!(manager = manager.base().name(), error = %err, "manager.ready.fetch_failed"),
		}
		if manager.base().mark_ready() {
			poller.start();
		}
	});
}

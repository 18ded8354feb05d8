//! Running-kernel manager.
//!
//! # Purpose
//!
//! - Define [`KernelManager`], which keeps a local cache of the server's running kernels in sync
//!   without callers polling or diffing.
//! - Own the live connections created through the manager and prune them when their kernel
//!   disappears remotely.
//! - Exclude the transport and the kernel messaging protocol; see [`crate::api`].
//!
//! # Mental model
//!
//! - Construction spawns a readiness pass: one fetch, then the manager is ready and its poller is
//!   armed, whatever the fetch outcome.
//! - Every poll fetches the running list. Transient failures emit on
//!   [`KernelManager::connection_failure`] and leave the cache alone; fatal failures grow the
//!   backoff and leave the cache alone; successes are diffed and, only on change, replace the
//!   cache, prune vanished connections, and emit on [`KernelManager::running_changed`].
//! - Mutations (`connect_to`, `start_new`, `shutdown`, `shutdown_all`) update the cache eagerly
//!   and emit themselves; the next poll corrects anything the server disagrees with.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`KernelManager`] | Cloneable handle to one manager | MUST be created inside a Tokio runtime | `KernelManager::new_with_config` |
//! | [`Snapshot`] | Immutable running list | MUST be replaced wholesale, never mutated | `KernelRegistry::*` |
//! | `KernelRegistry` | Cache plus owned live connections | MUST only be touched under the state lock | `KernelManager::*` |
//!
//! # Invariants
//!
//! 1. `running_changed` fires iff a fetched snapshot differs structurally from the cached one.
//!    - Enforced in: `KernelRegistry::reconcile`
//!    - Tested by: `kernel::tests::unchanged_polls_do_not_emit`
//! 2. Emission happens after the cache update it reports, in cache-update order.
//!    - Enforced in: `ManagerBase::order`, `Inner::reconcile`, `Inner::unregister`
//!    - Tested by: `kernel::tests::listener_sees_updated_cache`
//! 3. After `shutdown(id)` resolves, neither the cache nor the registry holds `id`, even if the
//!    remote call failed.
//!    - Enforced in: `KernelManager::shutdown`
//!    - Tested by: `kernel::tests::failed_shutdown_still_removes_locally`
//! 4. `shutdown_all` tears down every owned connection whatever the remote outcomes.
//!    - Enforced in: `KernelManager::shutdown_all`
//!    - Tested by: `kernel::tests::shutdown_all_tears_down_on_partial_failure`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use kernsync_poll::{Outcome, Poller};
use kernsync_signal::Signal;
use parking_lot::Mutex;

use crate::api::{ApiError, KernelApi, KernelConnection};
use crate::base::{Managed, ManagerBase, ManagerPoll, ManagerState, spawn_readiness};
use crate::config::{ConfigError, ManagerConfig, PollingConfig, ServerSettings};
use crate::model::{KernelId, KernelModel, Snapshot, StartOptions};
use crate::{Error, Result};

mod registry;

use registry::KernelRegistry;

/// Client-side manager for the server's running kernels.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct KernelManager {
	inner: Arc<Inner>,
}

struct Inner {
	base: ManagerBase,
	api: Arc<dyn KernelApi>,
	state: Mutex<KernelRegistry>,
	running_changed: Signal<Snapshot>,
	poller: Poller<ManagerPoll<Inner>>,
	/// `shutdown_all` calls in progress; their connections are disposed even by `dispose`.
	draining: AtomicUsize,
}

impl std::fmt::Debug for KernelManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("KernelManager")
			.field("state", &self.inner.base.state())
			.field("running", &state.snapshot().len())
			.field("live", &state.live_count())
			.finish_non_exhaustive()
	}
}

impl KernelManager {
	/// Creates a manager with default configuration.
	///
	/// # Panics
	///
	/// Panics if called outside a Tokio runtime.
	pub fn new(api: Arc<dyn KernelApi>) -> Self {
		Self::start(api, &ManagerConfig::default())
	}

	/// Validates `config`, then creates a manager and starts its readiness pass.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Invalid`] if the poll schedule is out of range.
	///
	/// # Panics
	///
	/// Panics if called outside a Tokio runtime.
	pub fn new_with_config(api: Arc<dyn KernelApi>, config: ManagerConfig) -> std::result::Result<Self, ConfigError> {
		config.validate()?;
		Ok(Self::start(api, &config))
	}

	fn start(api: Arc<dyn KernelApi>, config: &ManagerConfig) -> Self {
		let policy = config.polling_or(PollingConfig::kernels()).policy();
		let standby = config.standby();
		let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
			base: ManagerBase::new("kernels", config.server.clone()),
			api,
			state: Mutex::new(KernelRegistry::new()),
			running_changed: Signal::new("running_changed"),
			poller: Poller::new("kernels", ManagerPoll::new(weak.clone()), policy, standby),
			draining: AtomicUsize::new(0),
		});
		spawn_readiness(&inner);
		Self { inner }
	}

	/// Waits until the first fetch settled, successfully or not.
	///
	/// # Errors
	///
	/// Returns [`Error::Disposed`] if the manager was disposed before becoming ready.
	pub async fn ready(&self) -> Result<()> {
		self.inner.base.ready().await
	}

	/// Returns `true` once the first fetch settled. Never reverts.
	pub fn is_ready(&self) -> bool {
		self.inner.base.is_ready()
	}

	/// Returns `true` once disposed.
	pub fn is_disposed(&self) -> bool {
		self.inner.base.is_disposed()
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ManagerState {
		self.inner.base.state()
	}

	/// Connection settings this manager was configured with.
	pub fn server_settings(&self) -> &ServerSettings {
		self.inner.base.settings()
	}

	/// Interval the poller currently waits between polls.
	pub fn poll_interval(&self) -> Duration {
		self.inner.poller.interval()
	}

	/// Fires with the new snapshot whenever the cached running list changes.
	pub fn running_changed(&self) -> &Signal<Snapshot> {
		&self.inner.running_changed
	}

	/// Fires with the error whenever a fetch fails transiently.
	pub fn connection_failure(&self) -> &Signal<ApiError> {
		self.inner.base.connection_failure()
	}

	/// Fires once when the manager is disposed.
	pub fn disposed(&self) -> &Signal<()> {
		self.inner.base.disposed()
	}

	/// Snapshot of the cached running kernels at call time.
	///
	/// The snapshot can be iterated any number of times and never changes.
	pub fn running(&self) -> Snapshot {
		self.inner.state.lock().snapshot()
	}

	/// Number of cached running kernels.
	pub fn running_count(&self) -> usize {
		self.inner.state.lock().snapshot().len()
	}

	/// Forces a poll, or joins the outstanding one, and waits for it.
	///
	/// # Errors
	///
	/// Returns [`Error::Fetch`] if the fetch failed fatally, [`Error::Disposed`] after disposal.
	pub async fn refresh_running(&self) -> Result<()> {
		self.inner.base.ensure_live()?;
		self.inner.poller.refresh().await?;
		Ok(())
	}

	/// Creates a live connection to an existing kernel and registers it. Performs no remote call.
	///
	/// # Errors
	///
	/// Returns [`Error::Disposed`] after disposal.
	pub fn connect_to(&self, model: KernelModel) -> Result<Arc<dyn KernelConnection>> {
		self.inner.base.ensure_live()?;
		let conn = self.inner.api.connect_to(model);
		self.inner.register(Arc::clone(&conn));
		Ok(conn)
	}

	/// Starts a kernel on the server, then connects to it.
	///
	/// The new kernel is in [`Self::running`] as soon as this returns.
	///
	/// # Errors
	///
	/// Returns [`Error::RemoteCreation`] if the server refused; nothing is registered then.
	pub async fn start_new(&self, options: StartOptions) -> Result<Arc<dyn KernelConnection>> {
		self.inner.base.ensure_live()?;
		let model = self.inner.api.start_new(options).await.map_err(Error::RemoteCreation)?;
		tracing::info!(kernel = %model.id, name = %model.name, "kernels.started");
		self.connect_to(model)
	}

	/// Shuts a kernel down.
	///
	/// The kernel leaves the cache and its owned connections are disposed before the remote call
	/// is issued. Local removal is not rolled back if the call fails. Unknown identities are a
	/// no-op.
	///
	/// # Errors
	///
	/// Returns [`Error::RemoteShutdown`] if the server call failed.
	pub async fn shutdown(&self, id: &KernelId) -> Result<()> {
		self.inner.base.ensure_live()?;
		if !self.inner.unregister(id) {
			tracing::trace!(kernel = %id, "kernels.shutdown.unknown");
			return Ok(());
		}

		self.inner.api.shutdown(id).await.map_err(|source| {
			tracing::warn!(kernel = %id, error = %source, "kernels.shutdown.failed");
			Error::RemoteShutdown { id: id.clone(), source }
		})
	}

	/// Shuts down every running kernel.
	///
	/// Refreshes first, then issues all remote shutdowns concurrently. Every owned connection is
	/// disposed and the cache cleared afterwards, whatever the remote outcomes.
	///
	/// # Errors
	///
	/// Returns [`Error::ShutdownAll`] listing the kernels whose remote shutdown failed, after the
	/// local teardown ran. Returns [`Error::Disposed`] if the manager was disposed before the
	/// remote shutdowns were issued.
	pub async fn shutdown_all(&self) -> Result<()> {
		self.inner.base.ensure_live()?;
		let _draining = DrainGuard::enter(&self.inner.draining);
		self.shutdown_all_inner().await
	}

	async fn shutdown_all_inner(&self) -> Result<()> {
		match self.refresh_running().await {
			Ok(()) => {}
			Err(Error::Disposed) => return Err(Error::Disposed),
			Err(err) => tracing::warn!(error = %err, "kernels.shutdown_all.refresh_failed"),
		}
		// Disposal during the refresh already tore down the cache.
		self.inner.base.ensure_live()?;

		let ids = self.inner.state.lock().ids();
		let api = &self.inner.api;
		let results = futures::future::join_all(ids.iter().map(|id| api.shutdown(id))).await;
		let failures: Vec<(KernelId, ApiError)> = ids.into_iter().zip(results).filter_map(|(id, res)| res.err().map(|err| (id, err))).collect();

		self.inner.teardown();

		if failures.is_empty() {
			tracing::info!("kernels.shutdown_all");
			Ok(())
		} else {
			tracing::warn!(failed = failures.len(), "kernels.shutdown_all.partial");
			Err(Error::ShutdownAll { failures })
		}
	}

	/// Looks up one kernel on the server. Does not touch the cache.
	///
	/// # Errors
	///
	/// Returns [`Error::Lookup`] if the server call failed.
	pub async fn find_by_id(&self, id: &KernelId) -> Result<Option<KernelModel>> {
		self.inner.base.ensure_live()?;
		self.inner.api.find_by_id(id).await.map_err(Error::Lookup)
	}

	/// Stops polling, severs every subscriber, and clears the cache. Idempotent.
	///
	/// Live connections handed out earlier stay open unless an in-progress
	/// [`Self::shutdown_all`] owned them.
	pub fn dispose(&self) {
		let inner = &self.inner;
		if !inner.base.begin_dispose() {
			return;
		}
		inner.poller.dispose();

		let conns = {
			let _order = inner.base.order();
			let (conns, _) = inner.state.lock().clear();
			conns
		};
		if inner.draining.load(Ordering::Acquire) > 0 {
			for conn in &conns {
				conn.dispose();
			}
		}
		drop(conns);

		inner.base.finish_dispose();
		inner.running_changed.close();
	}
}

impl Inner {
	/// Takes ownership of `conn` and tracks its disposal.
	fn register(self: &Arc<Self>, conn: Arc<dyn KernelConnection>) {
		if conn.is_disposed() {
			return;
		}
		let weak = Arc::downgrade(self);
		let on_disposed = conn.disposed().connect(move |id: &KernelId| {
			if let Some(inner) = weak.upgrade() {
				inner.unregister(id);
			}
		});

		let _order = self.base.order();
		let inserted = self.state.lock().register(conn, on_disposed);
		if let Some(snapshot) = inserted {
			self.running_changed.emit(&snapshot);
		}
	}

	/// Drops and disposes every connection for `id` and removes its model.
	///
	/// Returns `true` if anything was known about `id`.
	fn unregister(&self, id: &KernelId) -> bool {
		let _order = self.base.order();
		let (conns, changed) = self.state.lock().unregister(id);
		let known = !conns.is_empty() || changed.is_some();
		for conn in conns {
			conn.dispose();
		}
		if let Some(snapshot) = changed {
			tracing::debug!(kernel = %id, "kernels.removed");
			self.running_changed.emit(&snapshot);
		}
		known
	}

	/// Applies a fetched running list.
	fn reconcile(&self, models: Vec<KernelModel>) {
		let _order = self.base.order();
		if self.base.is_disposed() {
			return;
		}
		let Some(reconciled) = self.state.lock().reconcile(models) else {
			tracing::trace!("kernels.refresh.unchanged");
			return;
		};

		tracing::debug!(
			added = ?reconciled.diff.added,
			removed = ?reconciled.diff.removed,
			updated = reconciled.diff.updated.len(),
			pruned = reconciled.pruned.len(),
			"kernels.refresh.changed"
		);
		for conn in reconciled.pruned {
			conn.dispose();
		}
		self.running_changed.emit(&reconciled.snapshot);
	}

	/// Disposes every owned connection and clears the cache, emitting once if it was non-empty.
	fn teardown(&self) {
		let _order = self.base.order();
		let (conns, changed) = self.state.lock().clear();
		for conn in conns {
			conn.dispose();
		}
		if let Some(snapshot) = changed {
			self.running_changed.emit(&snapshot);
		}
	}
}

#[async_trait]
impl Managed for Inner {
	fn base(&self) -> &ManagerBase {
		&self.base
	}

	fn poller(&self) -> &Poller<ManagerPoll<Self>> {
		&self.poller
	}

	async fn request(&self) -> std::result::Result<Outcome, ApiError> {
		let fetched = self.api.list_running().await;
		let Some(models) = self.base.classify(fetched)? else {
			return Ok(Outcome::Degraded);
		};
		self.reconcile(models);
		Ok(Outcome::Resolved)
	}
}

/// Counts one in-progress `shutdown_all`, released even if the caller drops the future.
struct DrainGuard<'a>(&'a AtomicUsize);

impl<'a> DrainGuard<'a> {
	fn enter(count: &'a AtomicUsize) -> Self {
		count.fetch_add(1, Ordering::AcqRel);
		Self(count)
	}
}

impl Drop for DrainGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::AcqRel);
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.poller.dispose();
	}
}

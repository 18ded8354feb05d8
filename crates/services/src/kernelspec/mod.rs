//! Kernel spec manager.
//!
//! Same readiness, polling, and diff-gated emission as the running-kernel manager, applied to the
//! single spec document the server serves. There is nothing to create, connect, or shut down.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use kernsync_poll::{Outcome, Poller};
use kernsync_signal::Signal;
use parking_lot::Mutex;

use crate::Result;
use crate::api::{ApiError, KernelSpecApi};
use crate::base::{Managed, ManagerBase, ManagerPoll, ManagerState, spawn_readiness};
use crate::config::{ConfigError, ManagerConfig, PollingConfig, ServerSettings};
use crate::diff;
use crate::model::KernelSpecs;

/// Client-side manager for the server's kernel spec document.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct KernelSpecManager {
	inner: Arc<Inner>,
}

struct Inner {
	base: ManagerBase,
	api: Arc<dyn KernelSpecApi>,
	/// `None` until the first successful fetch, and again after disposal.
	specs: Mutex<Option<Arc<KernelSpecs>>>,
	specs_changed: Signal<Arc<KernelSpecs>>,
	poller: Poller<ManagerPoll<Inner>>,
}

impl std::fmt::Debug for KernelSpecManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KernelSpecManager")
			.field("state", &self.inner.base.state())
			.field("loaded", &self.inner.specs.lock().is_some())
			.finish_non_exhaustive()
	}
}

impl KernelSpecManager {
	/// Creates a manager with default configuration.
	///
	/// # Panics
	///
	/// Panics if called outside a Tokio runtime.
	pub fn new(api: Arc<dyn KernelSpecApi>) -> Self {
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
	pub fn new_with_config(api: Arc<dyn KernelSpecApi>, config: ManagerConfig) -> std::result::Result<Self, ConfigError> {
		config.validate()?;
		Ok(Self::start(api, &config))
	}

	fn start(api: Arc<dyn KernelSpecApi>, config: &ManagerConfig) -> Self {
		let policy = config.polling_or(PollingConfig::kernel_specs()).policy();
		let standby = config.standby();
		let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
			base: ManagerBase::new("kernelspecs", config.server.clone()),
			api,
			specs: Mutex::new(None),
			specs_changed: Signal::new("specs_changed"),
			poller: Poller::new("kernelspecs", ManagerPoll::new(weak.clone()), policy, standby),
		});
		spawn_readiness(&inner);
		Self { inner }
	}

	/// Waits until the first fetch settled, successfully or not.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Disposed`] if the manager was disposed before becoming ready.
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

	/// The cached spec document, or `None` if no fetch has succeeded yet.
	pub fn specs(&self) -> Option<Arc<KernelSpecs>> {
		self.inner.specs.lock().clone()
	}

	/// Fires with the new document whenever the cached one changes.
	pub fn specs_changed(&self) -> &Signal<Arc<KernelSpecs>> {
		&self.inner.specs_changed
	}

	/// Fires with the error whenever a fetch fails transiently.
	pub fn connection_failure(&self) -> &Signal<ApiError> {
		self.inner.base.connection_failure()
	}

	/// Fires once when the manager is disposed.
	pub fn disposed(&self) -> &Signal<()> {
		self.inner.base.disposed()
	}

	/// Forces a fetch, or joins the outstanding one, and waits for it.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Fetch`] if the fetch failed fatally, [`crate::Error::Disposed`]
	/// after disposal.
	pub async fn refresh_specs(&self) -> Result<()> {
		self.inner.base.ensure_live()?;
		self.inner.poller.refresh().await?;
		Ok(())
	}

	/// Stops polling, severs every subscriber, and drops the cached document. Idempotent.
	pub fn dispose(&self) {
		let inner = &self.inner;
		if !inner.base.begin_dispose() {
			return;
		}
		inner.poller.dispose();
		{
			let _order = inner.base.order();
			inner.specs.lock().take();
		}
		inner.base.finish_dispose();
		inner.specs_changed.close();
	}
}

impl Inner {
	fn apply(&self, fetched: KernelSpecs) {
		let _order = self.base.order();
		if self.base.is_disposed() {
			return;
		}
		let next = {
			let mut cache = self.specs.lock();
			if cache.as_deref().is_some_and(|current| diff::is_unchanged(current, &fetched)) {
				None
			} else {
				let next = Arc::new(fetched);
				*cache = Some(Arc::clone(&next));
				Some(next)
			}
		};
		let Some(next) = next else {
			tracing::trace!("kernelspecs.refresh.unchanged");
			return;
		};
		tracing::debug!(default = %next.default, specs = next.kernelspecs.len(), "kernelspecs.refresh.changed");
		self.specs_changed.emit(&next);
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
		let fetched = self.api.get_specs().await;
		let Some(specs) = self.base.classify(fetched)? else {
			return Ok(Outcome::Degraded);
		};
		self.apply(specs);
		Ok(Outcome::Resolved)
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.poller.dispose();
	}
}

#[cfg(test)]
mod tests;

//! Client-side managers that keep a local view of server-owned kernels in sync.
//!
//! # Purpose
//!
//! - Define [`KernelManager`], the collection manager for running kernels and the live
//!   connections bound to them.
//! - Define [`KernelSpecManager`], the singleton manager for the server's kernel spec document.
//! - Define the transport seams ([`KernelApi`], [`KernelSpecApi`], [`KernelConnection`]); HTTP,
//!   websockets, and authentication live behind them.
//!
//! # Mental model
//!
//! - Both managers follow the same pattern: a readiness pass, then a backoff poller that fetches,
//!   diffs structurally against the cache, and only on change replaces the cache and emits.
//! - The cache is best-effort. Mutations update it eagerly and are never rolled back; the next
//!   poll corrects it.
//! - Subscribers are plain callbacks on [`Signal`]s, or async streams via [`Signal::listen`].
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`KernelManager`] | Running kernels plus owned live connections | MUST be created inside a Tokio runtime | `KernelManager::new_with_config` |
//! | [`KernelSpecManager`] | Kernel spec document | MUST be created inside a Tokio runtime | `KernelSpecManager::new_with_config` |
//! | [`ManagerConfig`] | Server settings, standby, poll schedule | MUST pass [`ManagerConfig::validate`] | `ManagerConfig::from_toml_str` |
//! | [`Error`] | Failure surfaced to manager callers | Transient fetch failures never appear here | manager operations |
//!
//! # Invariants
//!
//! 1. A manager becomes ready exactly once, after its first fetch settles, whatever the outcome.
//!    - Enforced in: `base::spawn_readiness`, `ManagerBase::mark_ready`
//!    - Tested by: `kernel::tests::ready_settles_after_failed_first_fetch`
//! 2. Transient fetch failures never reach callers and never touch the cache.
//!    - Enforced in: `ManagerBase::classify`
//!    - Tested by: `kernel::tests::transient_failure_keeps_cache_and_notifies`
//! 3. After `dispose`, no signal fires again and every operation fails with [`Error::Disposed`].
//!    - Enforced in: `ManagerBase::finish_dispose`, `ManagerBase::ensure_live`
//!    - Tested by: `kernel::tests::dispose_is_idempotent_and_silences_channels`

pub mod api;
mod base;
pub mod config;
pub mod diff;
mod kernel;
mod kernelspec;
pub mod model;
#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiError, KernelApi, KernelConnection, KernelSpecApi};
pub use base::ManagerState;
pub use config::{ConfigError, ManagerConfig, PollingConfig, ServerSettings};
pub use diff::CollectionDiff;
pub use kernel::KernelManager;
pub use kernelspec::KernelSpecManager;
pub use kernsync_poll::{StandbyPolicy, Visibility};
pub use kernsync_signal::{Signal, SignalReceiver, Subscription};
pub use model::{KernelId, KernelModel, KernelSpec, KernelSpecFile, KernelSpecs, Snapshot, StartOptions};

use kernsync_poll::PollError;

/// Result type for manager operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced to manager callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The manager was disposed.
	#[error("manager disposed")]
	Disposed,
	/// A forced refresh failed with a non-transient error.
	#[error("fetch failed: {0}")]
	Fetch(#[source] ApiError),
	/// The refresh attempt was torn down before it finished.
	#[error("refresh aborted")]
	Aborted,
	/// The server refused to start a kernel.
	#[error("kernel creation failed: {0}")]
	RemoteCreation(#[source] ApiError),
	/// The server failed to shut a kernel down. The kernel was already removed locally.
	#[error("shutdown of kernel {id} failed: {source}")]
	RemoteShutdown {
		/// Kernel whose shutdown failed.
		id: KernelId,
		/// Transport failure.
		#[source]
		source: ApiError,
	},
	/// One or more shutdowns issued by `shutdown_all` failed. Local teardown still ran.
	#[error("{} kernel shutdowns failed", .failures.len())]
	ShutdownAll {
		/// Failed kernels with their transport failures.
		failures: Vec<(KernelId, ApiError)>,
	},
	/// Looking up a kernel on the server failed.
	#[error("kernel lookup failed: {0}")]
	Lookup(#[source] ApiError),
}

impl From<PollError<ApiError>> for Error {
	fn from(err: PollError<ApiError>) -> Self {
		match err {
			PollError::Disposed => Self::Disposed,
			PollError::Aborted => Self::Aborted,
			PollError::Failed(err) => Self::Fetch(err),
		}
	}
}

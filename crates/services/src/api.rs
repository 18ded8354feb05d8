//! Collaborators supplied by the transport layer.
//!
//! The managers never talk HTTP or the kernel messaging protocol themselves; they consume these
//! traits and only classify the failures they return.

use std::sync::Arc;

use async_trait::async_trait;
use kernsync_signal::Signal;

use crate::model::{KernelId, KernelModel, KernelSpecs, StartOptions};

/// Failure reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
	/// The server could not be reached.
	#[error("network error: {0}")]
	Network(String),
	/// The server answered with an error status.
	#[error("server responded {status}: {message}")]
	Response {
		/// HTTP status code.
		status: u16,
		/// Server-provided message.
		message: String,
	},
	/// Any other transport failure.
	#[error("{0}")]
	Other(String),
}

impl ApiError {
	/// Service unavailable.
	pub const SERVICE_UNAVAILABLE: u16 = 503;
	/// Failed dependency; returned by hubs when the single-user server is not running.
	pub const FAILED_DEPENDENCY: u16 = 424;

	/// Creates an error-status failure.
	pub fn response(status: u16, message: impl Into<String>) -> Self {
		Self::Response {
			status,
			message: message.into(),
		}
	}

	/// Returns `true` for failures expected to clear up on their own.
	///
	/// Unreachable servers and the service-unavailable statuses are transient. Everything else
	/// is fatal for the attempt that observed it.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Network(_) => true,
			Self::Response { status, .. } => matches!(*status, Self::SERVICE_UNAVAILABLE | Self::FAILED_DEPENDENCY),
			Self::Other(_) => false,
		}
	}
}

/// Kernel REST client.
#[async_trait]
pub trait KernelApi: Send + Sync + 'static {
	/// Lists the kernels currently running on the server.
	async fn list_running(&self) -> Result<Vec<KernelModel>, ApiError>;

	/// Asks the server to start a new kernel.
	async fn start_new(&self, options: StartOptions) -> Result<KernelModel, ApiError>;

	/// Asks the server to shut down one kernel.
	async fn shutdown(&self, id: &KernelId) -> Result<(), ApiError>;

	/// Fetches the current model of one kernel, or `None` if the server does not know it.
	async fn find_by_id(&self, id: &KernelId) -> Result<Option<KernelModel>, ApiError>;

	/// Builds a live connection bound to an existing kernel. Performs no remote call.
	fn connect_to(&self, model: KernelModel) -> Arc<dyn KernelConnection>;
}

/// Kernel spec REST client.
#[async_trait]
pub trait KernelSpecApi: Send + Sync + 'static {
	/// Fetches the kernel spec document.
	async fn get_specs(&self) -> Result<KernelSpecs, ApiError>;
}

/// A live connection to one running kernel.
///
/// Implementations must emit [`Self::disposed`] exactly once, from [`Self::dispose`], with the
/// connection's identity as payload.
pub trait KernelConnection: Send + Sync + 'static {
	/// Identity of the backing kernel.
	fn id(&self) -> &KernelId;

	/// Latest model known to this connection.
	fn model(&self) -> KernelModel;

	/// Fires once when the connection is disposed.
	fn disposed(&self) -> &Signal<KernelId>;

	/// Closes the connection.
	fn dispose(&self);

	/// Returns `true` once disposed.
	fn is_disposed(&self) -> bool;
}

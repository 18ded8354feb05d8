//! Remote resource models as last observed from the server.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-assigned kernel identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KernelId(String);

impl KernelId {
	/// Wraps a server-assigned identifier.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Borrows the raw identifier.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for KernelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for KernelId {
	fn from(id: &str) -> Self {
		Self::new(id)
	}
}

impl From<String> for KernelId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

/// One running kernel as reported by the server.
///
/// Models are never mutated in place; a changed kernel arrives as a new model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelModel {
	/// Kernel identity.
	pub id: KernelId,
	/// Kernel spec name the kernel was started from.
	pub name: String,
	/// ISO-8601 timestamp of the last observed activity.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_activity: Option<String>,
	/// Last reported execution state (`idle`, `busy`, ...).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub execution_state: Option<String>,
	/// Number of open client connections.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connections: Option<u64>,
	/// Failure reason reported for a dead kernel.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	/// Failure traceback reported for a dead kernel.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub traceback: Option<String>,
}

impl KernelModel {
	/// Creates a model carrying only identity and spec name.
	pub fn new(id: impl Into<KernelId>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			last_activity: None,
			execution_state: None,
			connections: None,
			reason: None,
			traceback: None,
		}
	}

	/// Sets the execution state.
	#[must_use]
	pub fn with_execution_state(mut self, state: impl Into<String>) -> Self {
		self.execution_state = Some(state.into());
		self
	}
}

/// Immutable snapshot of the running kernels, in server-reported order.
pub type Snapshot = Arc<[KernelModel]>;

/// Options for starting a new kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
	/// Kernel spec name; the server default is used when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Extra environment for the kernel process.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub env: BTreeMap<String, String>,
}

impl StartOptions {
	/// Requests a specific kernel spec.
	pub fn named(name: impl Into<String>) -> Self {
		Self {
			name: Some(name.into()),
			..Self::default()
		}
	}
}

/// The kernel spec document served by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecs {
	/// Name of the default kernel spec.
	pub default: String,
	/// Available kernel specs keyed by name.
	#[serde(default)]
	pub kernelspecs: BTreeMap<String, KernelSpec>,
}

/// One installed kernel spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
	/// Spec name.
	pub name: String,
	/// Parsed `kernel.json` contents.
	pub spec: KernelSpecFile,
	/// Resource URLs (logos, js) keyed by resource name.
	#[serde(default)]
	pub resources: BTreeMap<String, String>,
}

/// Contents of one `kernel.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpecFile {
	/// Kernel language.
	pub language: String,
	/// Human-readable name.
	pub display_name: String,
	/// Launch command line.
	#[serde(default)]
	pub argv: Vec<String>,
	/// Launch environment.
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	/// Free-form metadata; compared structurally.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

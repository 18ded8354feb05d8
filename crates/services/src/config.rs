//! Manager configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use kernsync_poll::{BackoffPolicy, Standby, StandbyPolicy, Visibility};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// Errors produced while loading a [`ManagerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The document is not valid TOML or does not match the schema.
	#[error("invalid manager config: {0}")]
	Parse(#[from] toml::de::Error),
	/// A value is out of range.
	#[error("invalid manager config: {0}")]
	Invalid(String),
}

/// Connection settings handed through to the transport; never interpreted by the managers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
	/// Base URL of the server.
	#[serde(default)]
	pub base_url: String,
	/// Authentication token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
	/// Transport-specific extras.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub extra: BTreeMap<String, Value>,
}

/// Poll schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
	/// Interval between polls while they succeed, in milliseconds.
	pub interval_ms: u64,
	/// Upper bound for the backed-off interval, in milliseconds.
	#[serde(default = "default_max_interval_ms")]
	pub max_interval_ms: u64,
	/// Interval growth factor per consecutive failure.
	#[serde(default = "default_backoff")]
	pub backoff: f64,
}

/// Returns the default backoff cap in milliseconds.
fn default_max_interval_ms() -> u64 {
	300_000
}

/// Returns the default backoff growth factor.
fn default_backoff() -> f64 {
	2.0
}

impl PollingConfig {
	/// Running-kernel poll schedule.
	pub const fn kernels() -> Self {
		Self {
			interval_ms: 10_000,
			max_interval_ms: 300_000,
			backoff: 2.0,
		}
	}

	/// Kernel spec poll schedule.
	pub const fn kernel_specs() -> Self {
		Self {
			interval_ms: 61_000,
			max_interval_ms: 300_000,
			backoff: 2.0,
		}
	}

	/// Backoff policy for the poller.
	pub fn policy(&self) -> BackoffPolicy {
		BackoffPolicy::new(Duration::from_millis(self.interval_ms), Duration::from_millis(self.max_interval_ms)).factor(self.backoff)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.interval_ms == 0 {
			return Err(ConfigError::Invalid("polling.interval_ms must be greater than zero".into()));
		}
		if self.max_interval_ms < self.interval_ms {
			return Err(ConfigError::Invalid(format!(
				"polling.max_interval_ms ({}) is below polling.interval_ms ({})",
				self.max_interval_ms, self.interval_ms
			)));
		}
		if !self.backoff.is_finite() || self.backoff < 1.0 {
			return Err(ConfigError::Invalid(format!("polling.backoff must be at least 1.0, got {}", self.backoff)));
		}
		Ok(())
	}
}

/// Configuration shared by the kernel and kernel spec managers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
	/// Server connection settings.
	#[serde(default)]
	pub server: ServerSettings,
	/// When scheduled polling stands by.
	#[serde(default)]
	pub standby: StandbyPolicy,
	/// Poll schedule; each manager falls back to its own default when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub polling: Option<PollingConfig>,
	/// Visibility source consulted by [`StandbyPolicy::WhenHidden`].
	#[serde(skip)]
	pub visibility: Option<watch::Receiver<Visibility>>,
}

impl ManagerConfig {
	/// Parses and validates a TOML document.
	///
	/// # Errors
	///
	/// Returns [`ConfigError`] on malformed TOML or out-of-range values.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks value ranges.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Invalid`] naming the offending field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		match &self.polling {
			Some(polling) => polling.validate(),
			None => Ok(()),
		}
	}

	/// Attaches the visibility source for the `when-hidden` standby policy.
	#[must_use]
	pub fn with_visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
		self.visibility = Some(visibility);
		self
	}

	pub(crate) fn polling_or(&self, fallback: PollingConfig) -> PollingConfig {
		self.polling.unwrap_or(fallback)
	}

	pub(crate) fn standby(&self) -> Standby {
		Standby::new(self.standby, self.visibility.clone())
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_uses_defaults() {
		let config = ManagerConfig::from_toml_str("").ok();
		let config = config.as_ref();
		assert_eq!(config.map(|c| c.standby), Some(StandbyPolicy::Never));
		assert_eq!(config.and_then(|c| c.polling), None);
		assert_eq!(config.map(|c| c.polling_or(PollingConfig::kernel_specs()).interval_ms), Some(61_000));
	}

	#[test]
	fn parses_full_document() {
		let source = r#"
standby = "when-hidden"

[server]
base_url = "http://localhost:8888"
token = "secret"

[polling]
interval_ms = 5000
"#;
		let config = match ManagerConfig::from_toml_str(source) {
			Ok(config) => config,
			Err(err) => panic!("config should parse: {err}"),
		};
		assert_eq!(config.standby, StandbyPolicy::WhenHidden);
		assert_eq!(config.server.base_url, "http://localhost:8888");
		assert_eq!(config.server.token.as_deref(), Some("secret"));
		assert_eq!(
			config.polling,
			Some(PollingConfig {
				interval_ms: 5000,
				max_interval_ms: 300_000,
				backoff: 2.0,
			})
		);
		assert_eq!(config.polling_or(PollingConfig::kernels()).policy().interval(2), Duration::from_secs(20));
	}

	#[test]
	fn rejects_out_of_range_polling() {
		for source in [
			"[polling]\ninterval_ms = 0",
			"[polling]\ninterval_ms = 1000\nmax_interval_ms = 10",
			"[polling]\ninterval_ms = 1000\nbackoff = 0.5",
		] {
			assert!(matches!(ManagerConfig::from_toml_str(source), Err(ConfigError::Invalid(_))), "{source}");
		}
	}

	#[test]
	fn rejects_unknown_standby_policy() {
		assert!(matches!(ManagerConfig::from_toml_str("standby = \"sometimes\""), Err(ConfigError::Parse(_))));
	}
}

//! Standby policies that suspend scheduled polling.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// When scheduled polling should stand by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StandbyPolicy {
	/// Always poll on schedule.
	#[default]
	Never,
	/// Suspend scheduled polling while the consumer reports [`Visibility::Hidden`].
	WhenHidden,
}

/// Consumer visibility reported to the poller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
	/// The consumer is active.
	#[default]
	Visible,
	/// The consumer is inactive; `when-hidden` pollers stand by.
	Hidden,
}

/// A standby policy bound to the visibility source it consults.
#[derive(Debug, Clone, Default)]
pub struct Standby {
	policy: StandbyPolicy,
	visibility: Option<watch::Receiver<Visibility>>,
}

impl Standby {
	/// Never stands by.
	pub fn never() -> Self {
		Self::default()
	}

	/// Binds `policy` to a visibility source.
	pub fn new(policy: StandbyPolicy, visibility: Option<watch::Receiver<Visibility>>) -> Self {
		Self { policy, visibility }
	}

	/// Configured policy.
	pub fn policy(&self) -> StandbyPolicy {
		self.policy
	}

	/// Returns `true` if scheduled polling should currently stand by.
	pub fn is_active(&self) -> bool {
		match (self.policy, &self.visibility) {
			(StandbyPolicy::WhenHidden, Some(rx)) => *rx.borrow() == Visibility::Hidden,
			_ => false,
		}
	}

	/// Waits until the standby condition no longer holds.
	///
	/// Returns `false` if `cancel` fired first. A dropped visibility source releases standby.
	pub(crate) async fn released(&self, cancel: &CancellationToken) -> bool {
		let (StandbyPolicy::WhenHidden, Some(rx)) = (self.policy, &self.visibility) else {
			return true;
		};
		let mut rx = rx.clone();
		let mut announced = false;
		loop {
			if *rx.borrow_and_update() == Visibility::Visible {
				if announced {
					tracing::debug!("poll.standby.leave");
				}
				return true;
			}
			if !announced {
				tracing::debug!("poll.standby.enter");
				announced = true;
			}
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return false,
				changed = rx.changed() => {
					if changed.is_err() {
						return true;
					}
				}
			}
		}
	}
}

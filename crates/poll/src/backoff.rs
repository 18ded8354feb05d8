//! Exponential backoff schedule.

use std::time::Duration;

/// Shortest interval any policy yields.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Interval schedule that grows with consecutive failures.
///
/// The interval after `n` consecutive failures is `base × factor^n`, clamped to `max`.
/// A success resets `n` to zero, so the next interval is `base` again. Intervals never drop
/// below [`MIN_INTERVAL`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
	/// Interval used while attempts succeed.
	pub base: Duration,
	/// Upper bound for the grown interval.
	pub max: Duration,
	/// Multiplicative growth per consecutive failure.
	pub factor: f64,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(10),
			max: Duration::from_secs(300),
			factor: 2.0,
		}
	}
}

impl BackoffPolicy {
	/// Creates a doubling policy.
	pub fn new(base: Duration, max: Duration) -> Self {
		Self { base, max, factor: 2.0 }
	}

	/// Sets the growth factor.
	#[must_use]
	pub fn factor(mut self, factor: f64) -> Self {
		self.factor = factor;
		self
	}

	/// Returns the interval to wait after `failures` consecutive failed attempts.
	pub fn interval(&self, failures: u32) -> Duration {
		let base = self.base.max(MIN_INTERVAL);
		let max = self.max.max(base);
		if failures == 0 {
			return base;
		}

		let exp = failures.min(i32::MAX as u32) as i32;
		let secs = base.as_secs_f64() * self.factor.max(1.0).powi(exp);
		if !secs.is_finite() || secs >= max.as_secs_f64() {
			max
		} else {
			Duration::from_secs_f64(secs)
		}
	}
}

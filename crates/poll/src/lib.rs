//! Backoff poller.
//!
//! # Purpose
//!
//! - Define [`Poller`], a restartable, cancelable scheduler that runs a [`PollTask`] on an interval.
//! - Define [`BackoffPolicy`], the interval schedule that grows after consecutive failures.
//! - Define [`Standby`], which suspends scheduled attempts while an external condition holds.
//!
//! # Mental model
//!
//! - A poller has one schedule loop (armed by [`Poller::start`], disarmed by [`Poller::stop`]) and
//!   at most one outstanding attempt.
//! - Every attempt, scheduled or forced through [`Poller::refresh`], goes through the same
//!   single-flight slot; a caller arriving while an attempt is outstanding joins it.
//! - Failed and [`Outcome::Degraded`] attempts grow the interval; [`Outcome::Resolved`] resets it.
//! - Standby only gates the schedule loop. Explicit refreshes always run, and standby never
//!   touches the accumulated backoff.
//! - [`Poller::dispose`] is terminal: the loop is cancelled and later refreshes are rejected.
//!
//! # Invariants
//!
//! 1. At most one attempt is outstanding per poller.
//!    - Enforced in: `Shared::begin`
//!    - Tested by: `poller::tests::concurrent_refreshes_share_one_attempt`
//! 2. After `n` consecutive failures the interval is `min(base × factor^n, max)`.
//!    - Enforced in: `BackoffPolicy::interval`, `Shared::settle`
//!    - Tested by: `poller::tests::failures_grow_interval_and_success_resets_it`
//! 3. A disposed poller never runs another attempt.
//!    - Enforced in: `Poller::dispose`, `Shared::begin`
//!    - Tested by: `poller::tests::dispose_is_idempotent_and_rejects_refresh`

mod backoff;
mod poller;
mod standby;

pub use backoff::{BackoffPolicy, MIN_INTERVAL};
pub use poller::{Outcome, PollTask, Poller};
pub use standby::{Standby, StandbyPolicy, Visibility};

/// Errors returned to callers awaiting a poll attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError<E> {
	/// The poller was disposed.
	#[error("poller disposed")]
	Disposed,
	/// The attempt task was dropped before it published a result.
	#[error("poll attempt aborted")]
	Aborted,
	/// The attempt itself failed.
	#[error("poll attempt failed: {0}")]
	Failed(E),
}

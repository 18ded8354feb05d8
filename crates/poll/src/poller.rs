use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use crate::{BackoffPolicy, PollError, Standby};

/// How a completed attempt should feed the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// The attempt observed authoritative state; backoff resets.
	Resolved,
	/// The attempt recovered from a transient failure; callers see success but backoff grows.
	Degraded,
}

/// Work performed by each poll attempt.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
	/// Failure type surfaced to explicit [`Poller::refresh`] callers.
	type Error: Clone + Send + Sync + 'static;

	/// Runs one attempt.
	async fn poll(&self) -> Result<Outcome, Self::Error>;
}

type AttemptResult<E> = Arc<Result<Outcome, E>>;
type AttemptReceiver<E> = watch::Receiver<Option<AttemptResult<E>>>;

/// Most recent completed attempt, published to [`Poller::tick`] waiters.
struct Completed<E> {
	seq: u64,
	last: Option<AttemptResult<E>>,
}

struct PollState<E> {
	/// Consecutive failed or degraded attempts.
	failures: u32,
	/// Receiver for the attempt currently outstanding, if any.
	inflight: Option<AttemptReceiver<E>>,
	/// Cancellation for the running schedule loop.
	run: Option<CancellationToken>,
	disposed: bool,
}

struct Shared<T: PollTask> {
	name: String,
	task: T,
	policy: BackoffPolicy,
	standby: Standby,
	state: Mutex<PollState<T::Error>>,
	cancel: CancellationToken,
	completed: watch::Sender<Completed<T::Error>>,
	rescheduled: Notify,
}

/// Restartable, cancelable scheduler running a [`PollTask`] with exponential backoff.
///
/// At most one attempt is outstanding at any time: [`Self::refresh`] joins the in-flight attempt
/// instead of racing it, and the schedule loop does the same when its timer fires. Attempts run on
/// their own Tokio task so a dropped caller never strands the other waiters.
///
/// The poller must be started from within a Tokio runtime.
pub struct Poller<T: PollTask> {
	shared: Arc<Shared<T>>,
}

impl<T: PollTask> Clone for Poller<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T: PollTask> fmt::Debug for Poller<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("Poller")
			.field("name", &self.shared.name)
			.field("failures", &state.failures)
			.field("running", &state.run.is_some())
			.field("inflight", &state.inflight.is_some())
			.field("disposed", &state.disposed)
			.finish_non_exhaustive()
	}
}

impl<T: PollTask> Poller<T> {
	/// Creates a stopped poller.
	pub fn new(name: impl Into<String>, task: T, policy: BackoffPolicy, standby: Standby) -> Self {
		let (completed, _) = watch::channel(Completed { seq: 0, last: None });
		Self {
			shared: Arc::new(Shared {
				name: name.into(),
				task,
				policy,
				standby,
				state: Mutex::new(PollState {
					failures: 0,
					inflight: None,
					run: None,
					disposed: false,
				}),
				cancel: CancellationToken::new(),
				completed,
				rescheduled: Notify::new(),
			}),
		}
	}

	/// Poller name used in log events.
	pub fn name(&self) -> &str {
		&self.shared.name
	}

	/// Arms the schedule loop. Does nothing if already running or disposed.
	pub fn start(&self) {
		let run = {
			let mut state = self.shared.state.lock();
			if state.disposed || state.run.is_some() {
				return;
			}
			let run = self.shared.cancel.child_token();
			state.run = Some(run.clone());
			run
		};
		tracing::debug!(poller = %self.shared.name, "poll.start");
		let shared = Arc::clone(&self.shared);
		tokio::spawn(shared.run_loop(run));
	}

	/// Stops the schedule loop, keeping backoff state. An outstanding attempt still completes.
	pub fn stop(&self) {
		let run = self.shared.state.lock().run.take();
		if let Some(run) = run {
			tracing::debug!(poller = %self.shared.name, "poll.stop");
			run.cancel();
		}
	}

	/// Stops permanently. Later refreshes fail with [`PollError::Disposed`].
	pub fn dispose(&self) {
		let run = {
			let mut state = self.shared.state.lock();
			if state.disposed {
				return;
			}
			state.disposed = true;
			state.run.take()
		};
		if let Some(run) = run {
			run.cancel();
		}
		self.shared.cancel.cancel();
		tracing::debug!(poller = %self.shared.name, "poll.dispose");
	}

	/// Forces an out-of-band attempt, or joins the outstanding one, and waits for its result.
	///
	/// # Errors
	///
	/// Returns [`PollError::Failed`] if the attempt failed, [`PollError::Disposed`] after
	/// [`Self::dispose`], and [`PollError::Aborted`] if the attempt task was torn down.
	pub async fn refresh(&self) -> Result<Outcome, PollError<T::Error>> {
		let rx = self.shared.begin()?;
		Shared::<T>::wait(rx).await
	}

	/// Waits for the next attempt to finish, whoever started it.
	///
	/// # Errors
	///
	/// Same as [`Self::refresh`].
	pub async fn tick(&self) -> Result<Outcome, PollError<T::Error>> {
		if self.is_disposed() {
			return Err(PollError::Disposed);
		}
		let mut rx = self.shared.completed.subscribe();
		rx.borrow_and_update();
		tokio::select! {
			biased;
			_ = self.shared.cancel.cancelled() => Err(PollError::Disposed),
			changed = rx.changed() => {
				if changed.is_err() {
					return Err(PollError::Aborted);
				}
				let last = rx.borrow().last.clone();
				match last {
					Some(result) => into_poll_result(&result),
					None => Err(PollError::Aborted),
				}
			}
		}
	}

	/// Returns `true` while the schedule loop is armed.
	pub fn is_running(&self) -> bool {
		self.shared.state.lock().run.is_some()
	}

	/// Returns `true` once disposed.
	pub fn is_disposed(&self) -> bool {
		self.shared.state.lock().disposed
	}

	/// Consecutive failed or degraded attempts.
	pub fn failures(&self) -> u32 {
		self.shared.state.lock().failures
	}

	/// Interval the schedule loop waits before its next attempt.
	pub fn interval(&self) -> Duration {
		self.shared.interval()
	}

	/// Borrows the task run by each attempt.
	pub fn task(&self) -> &T {
		&self.shared.task
	}
}

impl<T: PollTask> Shared<T> {
	fn interval(&self) -> Duration {
		self.policy.interval(self.state.lock().failures)
	}

	/// Returns the receiver of the outstanding attempt, spawning one if idle.
	fn begin(self: &Arc<Self>) -> Result<AttemptReceiver<T::Error>, PollError<T::Error>> {
		let (tx, rx) = {
			let mut state = self.state.lock();
			if state.disposed {
				return Err(PollError::Disposed);
			}
			if let Some(rx) = &state.inflight {
				tracing::trace!(poller = %self.name, "poll.attempt.join");
				return Ok(rx.clone());
			}
			let (tx, rx) = watch::channel(None);
			state.inflight = Some(rx.clone());
			(tx, rx)
		};

		let shared = Arc::clone(self);
		tokio::spawn(async move {
			let guard = AttemptGuard { shared: &shared, done: false };
			guard.run(tx).await;
		});
		Ok(rx)
	}

	async fn wait(mut rx: AttemptReceiver<T::Error>) -> Result<Outcome, PollError<T::Error>> {
		loop {
			let published = {
				let borrow = rx.borrow_and_update();
				borrow.as_ref().cloned()
			};
			if let Some(result) = published {
				return into_poll_result(&result);
			}
			if rx.changed().await.is_err() {
				return Err(PollError::Aborted);
			}
		}
	}

	async fn run_loop(self: Arc<Self>, run: CancellationToken) {
		loop {
			let delay = self.interval();
			tracing::trace!(poller = %self.name, delay_ms = delay.as_millis() as u64, "poll.schedule");
			let rescheduled = self.rescheduled.notified();
			tokio::select! {
				biased;
				_ = run.cancelled() => break,
				_ = rescheduled => continue,
				_ = tokio::time::sleep(delay) => {}
			}

			if !self.standby.released(&run).await {
				break;
			}

			let Ok(rx) = self.begin() else {
				break;
			};
			// Failures are already logged and recorded by the attempt itself.
			let _ = Self::wait(rx).await;
		}
		tracing::trace!(poller = %self.name, "poll.loop.exit");
	}

	/// Records a finished attempt and returns the interval it leaves behind.
	fn settle(&self, result: &Result<Outcome, T::Error>) -> (u32, Duration) {
		let mut state = self.state.lock();
		state.inflight = None;
		state.failures = match result {
			Ok(Outcome::Resolved) => 0,
			Ok(Outcome::Degraded) | Err(_) => state.failures.saturating_add(1),
		};
		(state.failures, self.policy.interval(state.failures))
	}
}

/// Clears the in-flight slot if the attempt task is dropped before publishing.
struct AttemptGuard<'a, T: PollTask> {
	shared: &'a Arc<Shared<T>>,
	done: bool,
}

impl<T: PollTask> AttemptGuard<'_, T> {
	async fn run(mut self, tx: watch::Sender<Option<AttemptResult<T::Error>>>) {
		let shared = self.shared;
		tracing::trace!(poller = %shared.name, "poll.attempt.start");
		let result = shared.task.poll().await;

		let (failures, interval) = shared.settle(&result);
		self.done = true;
		let interval_ms = interval.as_millis() as u64;
		match &result {
			Ok(Outcome::Resolved) => tracing::trace!(poller = %shared.name, interval_ms, "poll.attempt.resolved"),
			Ok(Outcome::Degraded) => tracing::debug!(poller = %shared.name, failures, interval_ms, "poll.attempt.degraded"),
			Err(_) => tracing::debug!(poller = %shared.name, failures, interval_ms, "poll.attempt.failed"),
		}

		let result = Arc::new(result);
		let _ = tx.send(Some(Arc::clone(&result)));
		shared.completed.send_modify(|completed| {
			completed.seq = completed.seq.wrapping_add(1);
			completed.last = Some(result);
		});
		shared.rescheduled.notify_waiters();
	}
}

impl<T: PollTask> Drop for AttemptGuard<'_, T> {
	fn drop(&mut self) {
		if self.done {
			return;
		}
		// Waiters observe the dropped sender as `Aborted`; un-wedge later attempts.
		self.shared.state.lock().inflight = None;
		tracing::debug!(poller = %self.shared.name, "poll.attempt.aborted");
	}
}

fn into_poll_result<E: Clone>(result: &Result<Outcome, E>) -> Result<Outcome, PollError<E>> {
	match result {
		Ok(outcome) => Ok(*outcome),
		Err(err) => Err(PollError::Failed(err.clone())),
	}
}

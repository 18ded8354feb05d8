//! Typed notification channels.
//!
//! # Purpose
//!
//! - Define [`Signal`], one publish/subscribe channel per semantically distinct event kind.
//! - Define [`Subscription`], the guard that keeps one subscriber connected.
//! - Define [`SignalReceiver`], an async stream adapter over a signal.
//!
//! # Mental model
//!
//! - Subscribers are callbacks invoked synchronously, in connection order, on the emitting thread.
//! - [`Signal::emit`] takes a point-in-time copy of the subscriber list before invoking anything, so
//!   subscribers connected or disconnected from inside a callback do not change the current emission.
//! - No lock is held while a callback runs; callbacks may re-enter the signal freely.
//! - [`Signal::close`] severs every subscriber and turns later emissions and connections into no-ops.
//!
//! # Invariants
//!
//! 1. A subscriber disconnected during an emission still observes that emission and no later one.
//! 2. A closed signal never invokes a subscriber again.
//! 3. Dropping a [`Subscription`] disconnects it unless it was [`detached`](Subscription::detach).

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Subscriber callback. Returning `false` asks the signal to drop the slot.
type Slot<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

struct SignalState<T> {
	next_id: u64,
	slots: Vec<(u64, Slot<T>)>,
	closed: bool,
}

impl<T> SignalState<T> {
	fn remove(&mut self, id: u64) -> bool {
		let before = self.slots.len();
		self.slots.retain(|(slot_id, _)| *slot_id != id);
		before != self.slots.len()
	}
}

/// Type-erased slot table so [`Subscription`] does not carry the payload type.
trait SlotTable: Send + Sync {
	fn disconnect(&self, id: u64) -> bool;
}

impl<T> SlotTable for Mutex<SignalState<T>> {
	fn disconnect(&self, id: u64) -> bool {
		self.lock().remove(id)
	}
}

/// A typed publish/subscribe channel.
///
/// Cloning a signal yields another handle to the same subscriber table.
pub struct Signal<T> {
	name: &'static str,
	state: Arc<Mutex<SignalState<T>>>,
}

impl<T> Clone for Signal<T> {
	fn clone(&self) -> Self {
		Self {
			name: self.name,
			state: Arc::clone(&self.state),
		}
	}
}

impl<T> fmt::Debug for Signal<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Signal")
			.field("name", &self.name)
			.field("subscribers", &state.slots.len())
			.field("closed", &state.closed)
			.finish()
	}
}

impl<T: 'static> Signal<T> {
	/// Creates an open signal with no subscribers.
	///
	/// `name` only shows up in logs.
	pub fn new(name: &'static str) -> Self {
		Self {
			name,
			state: Arc::new(Mutex::new(SignalState {
				next_id: 0,
				slots: Vec::new(),
				closed: false,
			})),
		}
	}

	/// Signal name used in log events.
	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Connects a callback invoked with every emitted value.
	///
	/// Connecting to a closed signal returns an inert subscription.
	pub fn connect(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
		self.connect_slot(Arc::new(move |value: &T| {
			callback(value);
			true
		}))
	}

	/// Returns an async receiver fed with a clone of every emitted value.
	///
	/// The receiver ends once the signal is closed.
	pub fn listen(&self) -> SignalReceiver<T>
	where
		T: Clone + Send,
	{
		let (tx, rx) = mpsc::unbounded_channel();
		let subscription = self.connect_slot(Arc::new(move |value: &T| tx.send(value.clone()).is_ok()));
		SignalReceiver { rx, _subscription: subscription }
	}

	fn connect_slot(&self, slot: Slot<T>) -> Subscription {
		let mut state = self.state.lock();
		if state.closed {
			tracing::trace!(signal = self.name, "signal.connect.closed");
			return Subscription::inert();
		}
		state.next_id = state.next_id.wrapping_add(1);
		let id = state.next_id;
		state.slots.push((id, slot));
		let table: Weak<dyn SlotTable> = Arc::downgrade(&self.state) as Weak<dyn SlotTable>;
		Subscription { id, table: Some(table) }
	}

	/// Invokes every currently connected subscriber with `value`.
	///
	/// Returns the number of subscribers invoked.
	pub fn emit(&self, value: &T) -> usize {
		let slots: Vec<(u64, Slot<T>)> = {
			let state = self.state.lock();
			if state.closed {
				return 0;
			}
			state.slots.clone()
		};

		let mut stale = Vec::new();
		for (id, slot) in &slots {
			if !slot(value) {
				stale.push(*id);
			}
		}

		if !stale.is_empty() {
			let mut state = self.state.lock();
			for id in stale {
				state.remove(id);
			}
		}

		tracing::trace!(signal = self.name, subscribers = slots.len(), "signal.emit");
		slots.len()
	}

	/// Disconnects every subscriber but keeps the signal usable.
	pub fn disconnect_all(&self) {
		self.state.lock().slots.clear();
	}

	/// Severs every subscriber and rejects further connections and emissions.
	pub fn close(&self) {
		let slots = {
			let mut state = self.state.lock();
			state.closed = true;
			std::mem::take(&mut state.slots)
		};
		// Slots may own channel senders; drop them outside the lock.
		drop(slots);
	}

	/// Returns `true` once [`Self::close`] has been called.
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Number of connected subscribers.
	pub fn subscriber_count(&self) -> usize {
		self.state.lock().slots.len()
	}
}

/// Connection guard for one subscriber.
///
/// Dropping the guard disconnects the subscriber.
#[must_use = "dropping a Subscription disconnects it immediately"]
pub struct Subscription {
	id: u64,
	table: Option<Weak<dyn SlotTable>>,
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("connected", &self.is_connected())
			.finish()
	}
}

impl Subscription {
	fn inert() -> Self {
		Self { id: 0, table: None }
	}

	/// Returns `true` while the owning signal is alive and this guard is still attached.
	pub fn is_connected(&self) -> bool {
		self.table.as_ref().is_some_and(|table| table.strong_count() > 0)
	}

	/// Disconnects the subscriber now.
	///
	/// Returns `true` if the subscriber was still connected.
	pub fn disconnect(mut self) -> bool {
		self.release()
	}

	/// Keeps the subscriber connected for the lifetime of the signal.
	pub fn detach(mut self) {
		self.table = None;
	}

	fn release(&mut self) -> bool {
		match self.table.take().and_then(|table| table.upgrade()) {
			Some(table) => table.disconnect(self.id),
			None => false,
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

/// Async adapter yielding every value emitted on a [`Signal`].
#[derive(Debug)]
pub struct SignalReceiver<T> {
	rx: mpsc::UnboundedReceiver<T>,
	_subscription: Subscription,
}

impl<T> SignalReceiver<T> {
	/// Waits for the next emitted value, or `None` once the signal is closed.
	pub async fn recv(&mut self) -> Option<T> {
		self.rx.recv().await
	}

	/// Returns one buffered value without waiting.
	pub fn try_recv(&mut self) -> Option<T> {
		self.rx.try_recv().ok()
	}
}

#[cfg(test)]
mod tests;

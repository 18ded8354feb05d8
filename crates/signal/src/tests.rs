use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::*;

#[test]
fn emit_reaches_subscribers_in_connection_order() {
	let signal = Signal::<u32>::new("test");
	let seen = Arc::new(Mutex::new(Vec::new()));

	let first = {
		let seen = Arc::clone(&seen);
		signal.connect(move |v| seen.lock().push(("first", *v)))
	};
	let second = {
		let seen = Arc::clone(&seen);
		signal.connect(move |v| seen.lock().push(("second", *v)))
	};

	assert_eq!(signal.emit(&7), 2);
	assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);

	drop(first);
	drop(second);
	assert_eq!(signal.subscriber_count(), 0);
}

#[test]
fn connect_during_emit_waits_for_next_emission() {
	let signal = Signal::<u32>::new("test");
	let late_calls = Arc::new(AtomicUsize::new(0));
	let late_subs = Arc::new(Mutex::new(Vec::new()));

	let _outer = {
		let signal = signal.clone();
		let late_calls = Arc::clone(&late_calls);
		let late_subs = Arc::clone(&late_subs);
		signal.clone().connect(move |_| {
			let late_calls = Arc::clone(&late_calls);
			let sub = signal.connect(move |_| {
				late_calls.fetch_add(1, Ordering::SeqCst);
			});
			late_subs.lock().push(sub);
		})
	};

	signal.emit(&1);
	assert_eq!(late_calls.load(Ordering::SeqCst), 0, "subscriber added mid-emission must not see it");

	signal.emit(&2);
	assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn disconnect_during_emit_still_receives_current_value() {
	let signal = Signal::<u32>::new("test");
	let victim_calls = Arc::new(AtomicUsize::new(0));
	let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

	let _killer = {
		let victim_slot = Arc::clone(&victim_slot);
		signal.connect(move |_| {
			if let Some(sub) = victim_slot.lock().take() {
				assert!(sub.disconnect());
			}
		})
	};
	let victim = {
		let victim_calls = Arc::clone(&victim_calls);
		signal.connect(move |_| {
			victim_calls.fetch_add(1, Ordering::SeqCst);
		})
	};
	*victim_slot.lock() = Some(victim);

	signal.emit(&1);
	assert_eq!(victim_calls.load(Ordering::SeqCst), 1);

	signal.emit(&2);
	assert_eq!(victim_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn close_severs_subscribers_and_rejects_new_ones() {
	let signal = Signal::<u32>::new("test");
	let calls = Arc::new(AtomicUsize::new(0));
	let sub = {
		let calls = Arc::clone(&calls);
		signal.connect(move |_| {
			calls.fetch_add(1, Ordering::SeqCst);
		})
	};

	signal.close();
	assert!(signal.is_closed());
	assert_eq!(signal.emit(&1), 0);
	assert_eq!(calls.load(Ordering::SeqCst), 0);
	assert!(!sub.disconnect());

	let late = signal.connect(|_| panic!("closed signal must not invoke subscribers"));
	assert!(!late.is_connected());
	assert_eq!(signal.emit(&2), 0);
}

#[test]
fn detached_subscription_outlives_guard() {
	let signal = Signal::<u32>::new("test");
	let calls = Arc::new(AtomicUsize::new(0));
	{
		let calls = Arc::clone(&calls);
		signal
			.connect(move |_| {
				calls.fetch_add(1, Ordering::SeqCst);
			})
			.detach();
	}

	signal.emit(&1);
	assert_eq!(calls.load(Ordering::SeqCst), 1);

	signal.disconnect_all();
	signal.emit(&2);
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn listen_streams_values_until_close() {
	let signal = Signal::<String>::new("test");
	let mut rx = signal.listen();

	signal.emit(&"a".to_string());
	signal.emit(&"b".to_string());
	signal.close();

	assert_eq!(rx.recv().await.as_deref(), Some("a"));
	assert_eq!(rx.recv().await.as_deref(), Some("b"));
	assert_eq!(rx.recv().await, None);
}

#[test]
fn dropped_listener_is_pruned() {
	let signal = Signal::<u32>::new("test");
	let rx = signal.listen();
	assert_eq!(signal.subscriber_count(), 1);

	drop(rx);
	assert_eq!(signal.subscriber_count(), 0);
	assert_eq!(signal.emit(&1), 0);
}

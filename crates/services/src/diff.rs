//! Snapshot comparison.
//!
//! Change notifications are gated on [`is_unchanged`]: deep, order-sensitive structural
//! equality over the snapshot's value type. [`diff_collection`] only summarizes a change for logs.

use std::collections::HashSet;
use std::hash::Hash;

use crate::model::{KernelId, KernelModel};

/// Returns `true` if `next` is structurally equal to `previous`.
pub fn is_unchanged<T: PartialEq + ?Sized>(previous: &T, next: &T) -> bool {
	previous == next
}

/// Values with a stable identity inside a collection.
pub trait Keyed {
	/// Identity type.
	type Key: Clone + Eq + Hash;

	/// Identity of this value.
	fn key(&self) -> &Self::Key;
}

impl Keyed for KernelModel {
	type Key = KernelId;

	fn key(&self) -> &KernelId {
		&self.id
	}
}

/// Summary of how one collection snapshot differs from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionDiff<K> {
	/// Identities present only in the new snapshot.
	pub added: Vec<K>,
	/// Identities present only in the previous snapshot.
	pub removed: Vec<K>,
	/// Identities present in both whose values differ.
	pub updated: Vec<K>,
	/// Whether identities present in both appear in a different order.
	pub reordered: bool,
}

impl<K> Default for CollectionDiff<K> {
	fn default() -> Self {
		Self {
			added: Vec::new(),
			removed: Vec::new(),
			updated: Vec::new(),
			reordered: false,
		}
	}
}

impl<K> CollectionDiff<K> {
	/// Returns `true` if the snapshots are equal.
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty() && !self.reordered
	}
}

/// Summarizes the difference between two keyed snapshots.
pub fn diff_collection<T>(previous: &[T], next: &[T]) -> CollectionDiff<T::Key>
where
	T: Keyed + PartialEq,
{
	let prev_keys: HashSet<&T::Key> = previous.iter().map(Keyed::key).collect();
	let next_keys: HashSet<&T::Key> = next.iter().map(Keyed::key).collect();

	let mut diff = CollectionDiff::default();
	for item in next {
		if !prev_keys.contains(item.key()) {
			diff.added.push(item.key().clone());
		}
	}
	for item in previous {
		let key = item.key();
		if !next_keys.contains(key) {
			diff.removed.push(key.clone());
		} else if next.iter().find(|n| n.key() == key).is_some_and(|n| n != item) {
			diff.updated.push(key.clone());
		}
	}

	let kept_prev = previous.iter().map(Keyed::key).filter(|k| next_keys.contains(k));
	let kept_next = next.iter().map(Keyed::key).filter(|k| prev_keys.contains(k));
	diff.reordered = !kept_prev.eq(kept_next);
	diff
}

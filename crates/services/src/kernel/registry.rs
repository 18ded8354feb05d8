//! Running-kernel cache and the live connections reconciled against it.

use std::collections::HashMap;
use std::sync::Arc;

use kernsync_signal::Subscription;

use crate::api::KernelConnection;
use crate::diff::{self, CollectionDiff};
use crate::model::{KernelId, KernelModel, Snapshot};

/// One owned live connection.
struct LiveEntry {
	conn: Arc<dyn KernelConnection>,
	/// Unregisters the connection when it is disposed elsewhere; dropped with the entry.
	_on_disposed: Subscription,
}

/// Result of applying a fetched snapshot.
pub(super) struct Reconciled {
	pub(super) snapshot: Snapshot,
	pub(super) diff: CollectionDiff<KernelId>,
	/// Owned connections whose kernel vanished remotely. Dispose outside the state lock.
	pub(super) pruned: Vec<Arc<dyn KernelConnection>>,
}

/// Consolidated cache and live-connection state, kept under one lock.
///
/// Every live connection's identity is present in `models` unless it was pruned by the same
/// operation that removed the model.
pub(super) struct KernelRegistry {
	models: Snapshot,
	live: HashMap<KernelId, Vec<LiveEntry>>,
}

impl KernelRegistry {
	pub(super) fn new() -> Self {
		Self {
			models: Arc::from(Vec::new()),
			live: HashMap::new(),
		}
	}

	pub(super) fn snapshot(&self) -> Snapshot {
		Arc::clone(&self.models)
	}

	pub(super) fn ids(&self) -> Vec<KernelId> {
		self.models.iter().map(|m| m.id.clone()).collect()
	}

	pub(super) fn live_count(&self) -> usize {
		self.live.values().map(Vec::len).sum()
	}

	#[cfg(test)]
	pub(super) fn is_live(&self, id: &KernelId) -> bool {
		self.live.contains_key(id)
	}

	/// Takes ownership of `conn`. Returns the new snapshot if its model had to be added.
	pub(super) fn register(&mut self, conn: Arc<dyn KernelConnection>, on_disposed: Subscription) -> Option<Snapshot> {
		let id = conn.id().clone();
		let inserted = if self.models.iter().any(|m| m.id == id) {
			None
		} else {
			let mut models = self.models.to_vec();
			models.push(conn.model());
			self.models = Arc::from(models);
			Some(self.snapshot())
		};
		self.live.entry(id).or_default().push(LiveEntry {
			conn,
			_on_disposed: on_disposed,
		});
		inserted
	}

	/// Drops every connection and the cached model for `id`.
	///
	/// Returns the removed connections and, if the cache changed, the new snapshot.
	pub(super) fn unregister(&mut self, id: &KernelId) -> (Vec<Arc<dyn KernelConnection>>, Option<Snapshot>) {
		let removed = self.take_live(id);
		let changed = if self.models.iter().any(|m| &m.id == id) {
			let models: Vec<KernelModel> = self.models.iter().filter(|m| &m.id != id).cloned().collect();
			self.models = Arc::from(models);
			Some(self.snapshot())
		} else {
			None
		};
		(removed, changed)
	}

	/// Replaces the cache with `models` unless nothing changed, pruning connections whose kernel
	/// is gone.
	pub(super) fn reconcile(&mut self, models: Vec<KernelModel>) -> Option<Reconciled> {
		if diff::is_unchanged(&*self.models, models.as_slice()) {
			return None;
		}

		let diff = diff::diff_collection(&self.models, &models);
		self.models = Arc::from(models);

		let vanished: Vec<KernelId> = self.live.keys().filter(|id| !self.models.iter().any(|m| &m.id == *id)).cloned().collect();
		let pruned = vanished.iter().flat_map(|id| self.take_live(id)).collect();

		Some(Reconciled {
			snapshot: self.snapshot(),
			diff,
			pruned,
		})
	}

	/// Clears the cache and hands back every owned connection.
	///
	/// The snapshot is `Some` only if the cache was non-empty.
	pub(super) fn clear(&mut self) -> (Vec<Arc<dyn KernelConnection>>, Option<Snapshot>) {
		let conns = self.live.drain().flat_map(|(_, entries)| entries.into_iter().map(|e| e.conn)).collect();
		let changed = if self.models.is_empty() {
			None
		} else {
			self.models = Arc::from(Vec::new());
			Some(self.snapshot())
		};
		(conns, changed)
	}

	fn take_live(&mut self, id: &KernelId) -> Vec<Arc<dyn KernelConnection>> {
		self.live.remove(id).map(|entries| entries.into_iter().map(|e| e.conn).collect()).unwrap_or_default()
	}
}

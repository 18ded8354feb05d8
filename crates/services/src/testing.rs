//! In-memory transport used by the manager tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use kernsync_signal::Signal;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::api::{ApiError, KernelApi, KernelConnection, KernelSpecApi};
use crate::model::{KernelId, KernelModel, KernelSpecs, StartOptions};

pub(crate) fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::TRACE).try_init();
}

pub(crate) fn kernels(ids: &[&str]) -> Vec<KernelModel> {
	ids.iter().map(|id| KernelModel::new(*id, "python3")).collect()
}

pub(crate) fn ids(models: &[KernelModel]) -> Vec<&str> {
	models.iter().map(|m| m.id.as_str()).collect()
}

/// Scriptable kernel REST client.
#[derive(Default)]
pub(crate) struct MockKernelApi {
	running: Mutex<Option<Result<Vec<KernelModel>, ApiError>>>,
	list_calls: AtomicUsize,
	/// Held closed while set; every `list_running` waits for one permit.
	list_gate: Mutex<Option<Arc<Notify>>>,
	start_failure: Mutex<Option<ApiError>>,
	started: AtomicUsize,
	shutdown_failures: Mutex<HashMap<KernelId, ApiError>>,
	shutdown_calls: Mutex<Vec<KernelId>>,
	connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockKernelApi {
	pub(crate) fn with_running(models: Vec<KernelModel>) -> Arc<Self> {
		let api = Self::default();
		api.set_running(models);
		Arc::new(api)
	}

	pub(crate) fn set_running(&self, models: Vec<KernelModel>) {
		*self.running.lock() = Some(Ok(models));
	}

	pub(crate) fn fail_listing(&self, err: ApiError) {
		*self.running.lock() = Some(Err(err));
	}

	pub(crate) fn gate_listing(&self, gate: Arc<Notify>) {
		*self.list_gate.lock() = Some(gate);
	}

	pub(crate) fn fail_start(&self, err: ApiError) {
		*self.start_failure.lock() = Some(err);
	}

	pub(crate) fn fail_shutdown(&self, id: &str, err: ApiError) {
		self.shutdown_failures.lock().insert(KernelId::from(id), err);
	}

	pub(crate) fn list_calls(&self) -> usize {
		self.list_calls.load(Ordering::SeqCst)
	}

	pub(crate) fn shutdown_calls(&self) -> Vec<KernelId> {
		self.shutdown_calls.lock().clone()
	}

	pub(crate) fn connections(&self) -> Vec<Arc<MockConnection>> {
		self.connections.lock().clone()
	}

	pub(crate) fn connection(&self, id: &str) -> Option<Arc<MockConnection>> {
		self.connections.lock().iter().find(|c| c.id.as_str() == id).cloned()
	}
}

#[async_trait]
impl KernelApi for MockKernelApi {
	async fn list_running(&self) -> Result<Vec<KernelModel>, ApiError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);
		let gate = self.list_gate.lock().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}
		self.running.lock().clone().unwrap_or_else(|| Ok(Vec::new()))
	}

	async fn start_new(&self, options: StartOptions) -> Result<KernelModel, ApiError> {
		if let Some(err) = self.start_failure.lock().clone() {
			return Err(err);
		}
		let n = self.started.fetch_add(1, Ordering::SeqCst);
		let model = KernelModel::new(format!("started-{n}"), options.name.unwrap_or_else(|| "python3".into()));
		if let Some(Ok(running)) = self.running.lock().as_mut() {
			running.push(model.clone());
		}
		Ok(model)
	}

	async fn shutdown(&self, id: &KernelId) -> Result<(), ApiError> {
		self.shutdown_calls.lock().push(id.clone());
		if let Some(err) = self.shutdown_failures.lock().get(id).cloned() {
			return Err(err);
		}
		if let Some(Ok(running)) = self.running.lock().as_mut() {
			running.retain(|m| &m.id != id);
		}
		Ok(())
	}

	async fn find_by_id(&self, id: &KernelId) -> Result<Option<KernelModel>, ApiError> {
		match self.running.lock().clone() {
			Some(Ok(running)) => Ok(running.into_iter().find(|m| &m.id == id)),
			Some(Err(err)) => Err(err),
			None => Ok(None),
		}
	}

	fn connect_to(&self, model: KernelModel) -> Arc<dyn KernelConnection> {
		let conn = Arc::new(MockConnection::new(model));
		self.connections.lock().push(Arc::clone(&conn));
		conn
	}
}

/// Live connection that only tracks its own disposal.
pub(crate) struct MockConnection {
	id: KernelId,
	model: KernelModel,
	disposed: Signal<KernelId>,
	is_disposed: AtomicBool,
}

impl MockConnection {
	pub(crate) fn new(model: KernelModel) -> Self {
		Self {
			id: model.id.clone(),
			model,
			disposed: Signal::new("kernel_disposed"),
			is_disposed: AtomicBool::new(false),
		}
	}
}

impl KernelConnection for MockConnection {
	fn id(&self) -> &KernelId {
		&self.id
	}

	fn model(&self) -> KernelModel {
		self.model.clone()
	}

	fn disposed(&self) -> &Signal<KernelId> {
		&self.disposed
	}

	fn dispose(&self) {
		if self.is_disposed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.disposed.emit(&self.id);
		self.disposed.close();
	}

	fn is_disposed(&self) -> bool {
		self.is_disposed.load(Ordering::Acquire)
	}
}

/// Scriptable kernel spec REST client.
#[derive(Default)]
pub(crate) struct MockSpecApi {
	specs: Mutex<Option<Result<KernelSpecs, ApiError>>>,
	calls: AtomicUsize,
}

impl MockSpecApi {
	pub(crate) fn with_specs(specs: KernelSpecs) -> Arc<Self> {
		let api = Self::default();
		api.set_specs(specs);
		Arc::new(api)
	}

	pub(crate) fn set_specs(&self, specs: KernelSpecs) {
		*self.specs.lock() = Some(Ok(specs));
	}

	pub(crate) fn fail(&self, err: ApiError) {
		*self.specs.lock() = Some(Err(err));
	}

	pub(crate) fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl KernelSpecApi for MockSpecApi {
	async fn get_specs(&self) -> Result<KernelSpecs, ApiError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.specs.lock().clone().unwrap_or_else(|| Ok(KernelSpecs::default()))
	}
}

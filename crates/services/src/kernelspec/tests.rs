use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::Error;
use crate::model::{KernelSpec, KernelSpecFile};
use crate::testing::{MockSpecApi, init_tracing};

fn spec(name: &str, metadata: Option<serde_json::Value>) -> KernelSpec {
	KernelSpec {
		name: name.into(),
		spec: KernelSpecFile {
			language: "python".into(),
			display_name: format!("Python ({name})"),
			argv: vec!["python".into(), "-m".into(), "ipykernel_launcher".into()],
			env: BTreeMap::new(),
			metadata,
		},
		resources: BTreeMap::new(),
	}
}

fn specs(default: &str, names: &[&str]) -> KernelSpecs {
	KernelSpecs {
		default: default.into(),
		kernelspecs: names.iter().map(|n| ((*n).to_owned(), spec(n, None))).collect(),
	}
}

async fn ready_manager(api: &Arc<MockSpecApi>) -> KernelSpecManager {
	init_tracing();
	let manager = KernelSpecManager::new(Arc::clone(api) as Arc<dyn KernelSpecApi>);
	assert_eq!(manager.ready().await, Ok(()));
	manager
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn first_fetch_populates_cache() {
	let api = MockSpecApi::with_specs(specs("python3", &["python3"]));
	let manager = ready_manager(&api).await;

	assert_eq!(manager.specs().as_deref(), Some(&specs("python3", &["python3"])));
	assert_eq!(manager.state(), ManagerState::Ready);
	assert_eq!(manager.poll_interval(), Duration::from_secs(61));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn identical_document_does_not_emit() {
	let api = MockSpecApi::with_specs(specs("python3", &["python3", "julia"]));
	let manager = ready_manager(&api).await;
	let count = Arc::new(AtomicUsize::new(0));
	let _sub = manager.specs_changed().connect({
		let count = Arc::clone(&count);
		move |_| {
			count.fetch_add(1, Ordering::SeqCst);
		}
	});
	let before = manager.specs();

	api.set_specs(specs("python3", &["python3", "julia"]));
	assert_eq!(manager.refresh_specs().await, Ok(()));

	assert_eq!(count.load(Ordering::SeqCst), 0);
	assert!(matches!((before, manager.specs()), (Some(a), Some(b)) if Arc::ptr_eq(&a, &b)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn nested_metadata_change_emits() {
	let api = MockSpecApi::with_specs(specs("python3", &["python3"]));
	let manager = ready_manager(&api).await;
	let mut rx = manager.specs_changed().listen();

	let mut next = specs("python3", &["python3"]);
	if let Some(python) = next.kernelspecs.get_mut("python3") {
		python.spec.metadata = Some(serde_json::json!({"debugger": true}));
	}
	api.set_specs(next.clone());
	assert_eq!(manager.refresh_specs().await, Ok(()));

	assert_eq!(rx.try_recv().as_deref(), Some(&next));
	assert_eq!(manager.specs().as_deref(), Some(&next));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn transient_failure_keeps_document() {
	let api = MockSpecApi::with_specs(specs("python3", &["python3"]));
	let manager = ready_manager(&api).await;
	let mut failures = manager.connection_failure().listen();

	api.fail(ApiError::response(ApiError::FAILED_DEPENDENCY, "server not running"));
	assert_eq!(manager.refresh_specs().await, Ok(()));

	assert_eq!(manager.specs().as_deref(), Some(&specs("python3", &["python3"])));
	assert_eq!(failures.try_recv(), Some(ApiError::response(424, "server not running")));
	assert_eq!(manager.poll_interval(), Duration::from_secs(122));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_first_fetch_still_becomes_ready() {
	init_tracing();
	let api = Arc::new(MockSpecApi::default());
	let err = ApiError::response(500, "boom");
	api.fail(err.clone());
	let manager = KernelSpecManager::new(Arc::clone(&api) as Arc<dyn KernelSpecApi>);

	assert_eq!(manager.ready().await, Ok(()));
	assert_eq!(manager.specs(), None);
	assert_eq!(manager.refresh_specs().await, Err(Error::Fetch(err)));

	api.set_specs(specs("python3", &["python3"]));
	assert_eq!(manager.refresh_specs().await, Ok(()));
	assert!(manager.specs().is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn configured_interval_drives_schedule() {
	init_tracing();
	let api = MockSpecApi::with_specs(specs("python3", &["python3"]));
	let config = match ManagerConfig::from_toml_str("[server]\nbase_url = \"http://hub:8000\"\n\n[polling]\ninterval_ms = 1000") {
		Ok(config) => config,
		Err(err) => panic!("config should parse: {err}"),
	};
	let Ok(manager) = KernelSpecManager::new_with_config(Arc::clone(&api) as Arc<dyn KernelSpecApi>, config) else {
		panic!("config should validate");
	};
	assert_eq!(manager.ready().await, Ok(()));

	tokio::time::sleep(Duration::from_millis(3500)).await;
	assert_eq!(api.calls(), 4);
	assert_eq!(manager.poll_interval(), Duration::from_secs(1));
	assert_eq!(manager.server_settings().base_url, "http://hub:8000");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dispose_clears_document_and_stops_polling() {
	let api = MockSpecApi::with_specs(specs("python3", &["python3"]));
	let manager = ready_manager(&api).await;
	let mut changed = manager.specs_changed().listen();
	let mut disposed = manager.disposed().listen();

	manager.dispose();
	manager.dispose();

	assert!(manager.is_disposed());
	assert_eq!(manager.specs(), None);
	assert_eq!(disposed.recv().await, Some(()));
	assert_eq!(disposed.recv().await, None);
	assert_eq!(changed.recv().await, None);
	assert_eq!(manager.refresh_specs().await, Err(Error::Disposed));

	let calls = api.calls();
	tokio::time::sleep(Duration::from_secs(600)).await;
	assert_eq!(api.calls(), calls);
}

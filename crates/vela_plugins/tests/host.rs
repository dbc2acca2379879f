//! Loading, caching and name claims against in-process fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use vela_plugins::testing::{StaticLoader, counter_plugin};
use vela_plugins::{ClaimKind, NameOwner, PluginError, PluginHost, PluginVTable};

counter_plugin!(
    counter,
    r#"{
        "name": "counter",
        "services": [{"name": "counter", "methods": ["increment", "get"]}],
        "actions": [{"name": "Increment", "verbs": ["increment"]}],
        "qualifiers": [{"name": "doubled", "inputTypes": ["Integer"]}]
    }"#
);
counter_plugin!(
    impostor,
    r#"{"name": "impostor", "services": [{"name": "counter"}]}"#
);
counter_plugin!(
    racy,
    r#"{"name": "racy", "services": [{"name": "racy"}]}"#
);

struct Fixture {
    dir: TempDir,
    loader: Arc<StaticLoader>,
    host: PluginHost,
}

impl Fixture {
    fn new() -> Self {
        let loader = Arc::new(StaticLoader::new());
        let host = PluginHost::with_loader(loader.clone());
        Self {
            dir: tempfile::tempdir().unwrap(),
            loader,
            host,
        }
    }

    fn library(&self, file: &str, vtable: PluginVTable) -> PathBuf {
        let path = self.dir.path().join(file);
        std::fs::write(&path, b"").unwrap();
        // SAFETY: fixtures implement the plugin contract.
        unsafe { self.loader.insert(&path, vtable) };
        path
    }
}

#[test]
fn same_library_loads_once() {
    let fixture = Fixture::new();
    let path = fixture.library("libcounter.so", counter::vtable());
    let dotted = fixture.dir.path().join(".").join("libcounter.so");

    let first = fixture.host.load(&path).unwrap();
    let second = fixture.host.load(&dotted).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fixture.host.load_count(), 1);
    assert_eq!(fixture.host.loaded_paths().len(), 1);
    assert!(fixture.host.is_loaded(&path));
}

#[test]
fn concurrent_first_loads_initialize_once() {
    let fixture = Fixture::new();
    let path = fixture.library("libcounter.so", counter::vtable());

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| fixture.host.load(&path).unwrap());
        }
    });
    assert_eq!(fixture.host.load_count(), 1);
}

#[test]
fn missing_file_is_not_found() {
    let fixture = Fixture::new();
    let err = fixture
        .host
        .load(Path::new("/definitely/not/here.so"))
        .unwrap_err();
    assert!(matches!(err, PluginError::NotFound(_)));
    assert_eq!(fixture.host.load_count(), 0);
}

#[test]
fn duplicate_service_name_rejects_second_plugin() {
    let fixture = Fixture::new();
    let first = fixture.library("libcounter.so", counter::vtable());
    let second = fixture.library("libimpostor.so", impostor::vtable());

    fixture.host.load(&first).unwrap();
    let err = fixture.host.load(&second).unwrap_err();

    assert!(err.is_configuration_error(), "{err}");
    assert!(matches!(
        err,
        PluginError::DuplicateName { kind: ClaimKind::Service, ref name, .. } if name == "counter"
    ));
    assert!(!fixture.host.is_loaded(&second));
    assert_eq!(fixture.host.loaded_paths().len(), 1);
}

#[test]
fn builtin_reservation_blocks_plugins() {
    let fixture = Fixture::new();
    fixture
        .host
        .reserve_builtin(ClaimKind::Service, "counter")
        .unwrap();
    let path = fixture.library("libcounter.so", counter::vtable());

    let err = fixture.host.load(&path).unwrap_err();
    assert!(matches!(
        err,
        PluginError::DuplicateName {
            owner: NameOwner::Builtin,
            ..
        }
    ));

    assert!(fixture.host.release_builtin(ClaimKind::Service, "counter"));
    fixture.host.load(&path).unwrap();
    assert!(matches!(
        fixture.host.owner_of(ClaimKind::Action, "increment"),
        Some(NameOwner::Plugin { ref name, .. }) if name == "counter"
    ));
    assert!(
        fixture
            .host
            .plugin_for(ClaimKind::Qualifier, "doubled")
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stateful_plugin_calls_are_serialized() {
    let fixture = Fixture::new();
    let path = fixture.library("libracy.so", racy::vtable());
    let handle = fixture.host.load(&path).unwrap();
    handle.execute("reset", &json!({})).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                handle
                    .execute_async("racy.increment", json!({}), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(racy::count(), 1000);
    assert_eq!(
        handle.execute("get", &json!({})).unwrap(),
        json!({"count": 1000})
    );
    assert_eq!(racy::live_buffers(), 0);
}

//! Integration tests for engine state handling and teardown.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::tempdir;

use porter::engine::{
    CommonConfig, ENGINE_NAME, Engine, EngineConfig, StateManager, cleanup_container,
};
use porter_common::{ContainerId, PorterError, PorterPaths};
use porter_oci::{ContainerState, ContainerStatus, Spec};

mod common;
use common::RecordingExecutor;

fn engine_config(image: &str) -> EngineConfig {
    EngineConfig {
        image: image.into(),
        writable_image: false,
        overlay_image: None,
        overlay_fs_enabled: true,
        contain: false,
        is_instance: false,
    }
}

#[test]
fn test_engine_rejects_foreign_config() {
    let common = CommonConfig {
        engine_name: "somebody-else".to_string(),
        container_id: ContainerId::new("c1").unwrap(),
        engine_config: engine_config("/images/root.img"),
        spec: Spec::default(),
    };
    let engine = Engine::new(common, PorterPaths::with_root("/tmp/porter-it"));

    let (conn, _peer) = UnixStream::pair().unwrap();
    let err = engine.create_container(1, conn).unwrap_err();
    match err {
        PorterError::EngineMismatch { expected, found } => {
            assert_eq!(expected, ENGINE_NAME);
            assert_eq!(found, "somebody-else");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_state_round_trip_and_listing() {
    let temp = tempdir().unwrap();
    let manager = StateManager::new(PorterPaths::with_root(temp.path()));

    let mut state = ContainerState::new("web", "/images/web.img");
    state.set_created(100);
    manager.save_state(&state).unwrap();

    let mut state = ContainerState::new("db", "/images/db.img");
    state.set_created(200);
    state.set_started();
    manager.save_state(&state).unwrap();

    let loaded = manager.load("web").unwrap();
    assert_eq!(loaded.status, ContainerStatus::Created);
    assert_eq!(loaded.pid, Some(100));

    // Listing is sorted by id.
    let all = manager.list().unwrap();
    let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["db", "web"]);

    assert!(manager.exists("db"));
    assert!(!manager.exists("ghost"));
}

#[test]
fn test_cleanup_unmounts_in_teardown_order() {
    let temp = tempdir().unwrap();
    let paths = PorterPaths::with_root(temp.path());

    // A container with persisted state and a session tree.
    let state = ContainerState::new("c1", "/images/root.img");
    StateManager::new(paths.clone()).save_state(&state).unwrap();
    let base = paths.session("c1");
    std::fs::create_dir_all(base.join("rootfs")).unwrap();
    std::fs::create_dir_all(base.join("final")).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor::new("exec", Arc::clone(&log));

    cleanup_container("c1", &paths, &executor).unwrap();

    let seen = log.lock().clone();
    assert_eq!(
        seen,
        vec![
            format!("exec: unmount {}", base.join("final").display()),
            format!("exec: unmount {}", base.join("rootfs").display()),
            format!("exec: unmount {}", base.display()),
        ]
    );
    assert!(!base.exists());
    assert!(!paths.container("c1").exists());
}

#[test]
fn test_cleanup_unknown_container_fails() {
    let temp = tempdir().unwrap();
    let paths = PorterPaths::with_root(temp.path());

    let log = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor::new("exec", Arc::clone(&log));

    let err = cleanup_container("ghost", &paths, &executor).unwrap_err();
    assert!(matches!(err, PorterError::ContainerNotFound { .. }));
}

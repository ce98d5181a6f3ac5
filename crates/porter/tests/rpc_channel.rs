//! Integration tests for the helper channel: a real server loop on one
//! end of a socketpair, the client on the other.

use std::os::unix::net::UnixStream;
use std::path::Path;

use rustix::mount::MountFlags;

use porter::filesystem::loopdev::{LoopInfo, LoopMode};
use porter::rpc::{RpcClient, serve};
use porter_common::PorterError;

fn spawn_server() -> (RpcClient, std::thread::JoinHandle<porter_common::PorterResult<()>>) {
    let (ours, theirs) = UnixStream::pair().unwrap();
    let server = std::thread::spawn(move || serve(theirs));
    (RpcClient::new(ours), server)
}

#[test]
fn test_chroot_error_crosses_the_channel() {
    let (client, server) = spawn_server();

    let err = client
        .chroot(Path::new("/porter-test-no-such-dir"))
        .unwrap_err();
    match err {
        PorterError::RpcCallFailed { operation, .. } => assert_eq!(operation, "chroot"),
        other => panic!("unexpected error: {other:?}"),
    }

    drop(client);
    server.join().unwrap().unwrap();
}

#[test]
fn test_mount_refusal_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let (client, server) = spawn_server();

    // An unknown filesystem type is refused with or without privileges.
    let err = client
        .mount(
            Path::new("none"),
            temp.path(),
            "porterfs-does-not-exist",
            MountFlags::empty(),
            "",
        )
        .unwrap_err();
    match err {
        PorterError::RpcCallFailed { operation, .. } => assert_eq!(operation, "mount"),
        other => panic!("unexpected error: {other:?}"),
    }

    drop(client);
    server.join().unwrap().unwrap();
}

#[test]
fn test_loop_attach_failure_is_reported() {
    let (client, server) = spawn_server();

    let err = client
        .loop_device(
            Path::new("/porter-test-no-such-image"),
            LoopMode::ReadOnly,
            &LoopInfo::default(),
        )
        .unwrap_err();
    match err {
        PorterError::RpcCallFailed { operation, reason } => {
            assert_eq!(operation, "loop_device");
            assert!(!reason.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    drop(client);
    server.join().unwrap().unwrap();
}

#[test]
fn test_server_survives_many_requests_then_exits_on_eof() {
    let (client, server) = spawn_server();

    for _ in 0..16 {
        let _ = client.chroot(Path::new("/porter-test-no-such-dir"));
    }

    drop(client);
    server.join().unwrap().unwrap();
}

//! Router delivery tests against mock socket endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

use cim_core::{CiName, CommsConfig, CommsError, Endpoint, EndpointKind, EndpointStatus};
use cim_inbox::{Category, InboxStore};
use cim_registry::{spawn_registry, RegistryHandle};
use cim_router::{Deposit, Router};

fn test_config(dir: &tempfile::TempDir) -> CommsConfig {
    CommsConfig {
        state_dir: dir.path().join("state"),
        socket_dir: dir.path().join("sock"),
        ..CommsConfig::default()
    }
}

fn setup(dir: &tempfile::TempDir) -> (CommsConfig, RegistryHandle, Router) {
    let config = test_config(dir);
    let registry = spawn_registry(&config);
    let router = Router::new(
        registry.clone(),
        InboxStore::new(config.inbox_root()),
        config.clone(),
        CiName::new("test-origin"),
    );
    (config, registry, router)
}

/// Binds a line-echo responder: every `\n` frame is answered with
/// `echo:<line>\n`. Serves clients sequentially, like a bridge.
fn spawn_echo(socket: PathBuf) {
    std::fs::create_dir_all(socket.parent().expect("parent")).expect("create dir");
    let listener = UnixListener::bind(&socket).expect("bind");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut residual: Vec<u8> = Vec::new();
            let mut buf = vec![0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        residual.extend_from_slice(&buf[..n]);
                        while let Some(pos) = residual.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = residual.drain(..=pos).collect();
                            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                            let reply = format!("echo:{text}\n");
                            if stream.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    });
}

/// Binds a responder that accepts and reads but never answers.
fn spawn_silent(socket: PathBuf) {
    std::fs::create_dir_all(socket.parent().expect("parent")).expect("create dir");
    let listener = UnixListener::bind(&socket).expect("bind");
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 4096];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        }
    });
}

async fn register_mock(
    registry: &RegistryHandle,
    config: &CommsConfig,
    name: &str,
    socket: &Path,
) {
    let endpoint = Endpoint::new(
        CiName::new(name),
        "localhost",
        config.derived_port(name),
        EndpointKind::ToolBridge,
    )
    .with_socket_path(socket);
    registry.register(endpoint).await.expect("register");
}

#[tokio::test]
async fn test_send_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let socket = config.bridge_socket_path("echo");
    spawn_echo(socket.clone());
    register_mock(&registry, &config, "echo", &socket).await;

    let response = router
        .send(&CiName::new("echo"), "hello", None, None)
        .await
        .expect("send");
    assert_eq!(response, "echo:hello");
}

#[tokio::test]
async fn test_send_unknown_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_config, _registry, router) = setup(&dir);

    let result = router.send(&CiName::new("ghost"), "anyone?", None, None).await;
    assert!(matches!(result, Err(CommsError::EndpointNotFound(_))));
}

#[tokio::test]
async fn test_refused_marks_unreachable_and_recovers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let socket = config.bridge_socket_path("flaky");
    register_mock(&registry, &config, "flaky", &socket).await;

    // No listener yet: refused, marked unreachable
    let result = router.send(&CiName::new("flaky"), "ping", None, None).await;
    assert!(matches!(result, Err(CommsError::ConnectionRefused { .. })));
    let endpoint = registry.discover(&CiName::new("flaky")).await.expect("discover");
    assert_eq!(endpoint.status, EndpointStatus::Unreachable);

    // Listener appears: reconnect succeeds, marked active again
    spawn_echo(socket);
    let response = router
        .send(&CiName::new("flaky"), "ping", None, None)
        .await
        .expect("send after recovery");
    assert_eq!(response, "echo:ping");
    let endpoint = registry.discover(&CiName::new("flaky")).await.expect("discover");
    assert_eq!(endpoint.status, EndpointStatus::Active);
}

#[tokio::test]
async fn test_broadcast_isolates_timeouts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let echo_socket = config.bridge_socket_path("fast");
    spawn_echo(echo_socket.clone());
    register_mock(&registry, &config, "fast", &echo_socket).await;

    let silent_socket = config.bridge_socket_path("mute");
    spawn_silent(silent_socket.clone());
    register_mock(&registry, &config, "mute", &silent_socket).await;

    let window = Duration::from_millis(200);
    let started = tokio::time::Instant::now();
    let results = router
        .broadcast(
            &[CiName::new("fast"), CiName::new("mute")],
            "team update",
            Some(window),
        )
        .await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 2);
    assert_eq!(
        results.get(&CiName::new("fast")).and_then(|r| r.as_ref().ok()),
        Some(&"echo:team update".to_string())
    );
    assert!(matches!(
        results.get(&CiName::new("mute")),
        Some(Err(CommsError::Timeout { .. }))
    ));
    // The silent member costs ~its own window, not a serial pile-up
    assert!(elapsed < Duration::from_secs(2), "broadcast took {elapsed:?}");
}

#[tokio::test]
async fn test_broadcast_active_skips_unreachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let socket = config.bridge_socket_path("up");
    spawn_echo(socket.clone());
    register_mock(&registry, &config, "up", &socket).await;
    registry.heartbeat(&CiName::new("up")).await.expect("heartbeat");

    // Registered but never heartbeated: not Active, not a target
    register_mock(&registry, &config, "down", &config.bridge_socket_path("down")).await;

    let results = router.broadcast_active("hello team", None).await;
    assert_eq!(results.len(), 1);
    assert!(results.contains_key(&CiName::new("up")));
}

#[tokio::test]
async fn test_concurrent_sends_get_matching_responses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let socket = config.bridge_socket_path("shared");
    spawn_echo(socket.clone());
    register_mock(&registry, &config, "shared", &socket).await;

    let target = CiName::new("shared");
    let (a, b) = tokio::join!(
        router.send(&target, "alpha", None, None),
        router.send(&target, "beta", None, None),
    );
    assert_eq!(a.expect("first send"), "echo:alpha");
    assert_eq!(b.expect("second send"), "echo:beta");
}

#[tokio::test]
async fn test_deposit_files_response() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry, router) = setup(&dir);

    let socket = config.bridge_socket_path("echo");
    spawn_echo(socket.clone());
    register_mock(&registry, &config, "echo", &socket).await;

    let deposit = Deposit {
        endpoint: CiName::new("watcher"),
        category: Category::New,
    };
    router
        .send(&CiName::new("echo"), "for the record", None, Some(deposit))
        .await
        .expect("send");

    let inbox = InboxStore::new(config.inbox_root());
    let entry = inbox
        .pop(&CiName::new("watcher"), Category::New)
        .await
        .expect("pop")
        .expect("deposited entry");
    assert_eq!(entry.body, "echo:for the record");
    assert_eq!(entry.from, CiName::new("echo"));
}

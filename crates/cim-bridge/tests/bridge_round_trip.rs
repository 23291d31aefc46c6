//! End-to-end bridge tests over real child processes.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use cim_bridge::{BridgeSpec, ProcessBridge};
use cim_core::{CiName, CommsConfig, CommsError, Delimiter, EndpointKind, EndpointStatus};
use cim_registry::{spawn_registry, ListFilter, RegistryHandle};

fn test_config(dir: &tempfile::TempDir) -> CommsConfig {
    CommsConfig {
        state_dir: dir.path().join("state"),
        socket_dir: dir.path().join("sock"),
        ..CommsConfig::default()
    }
}

fn setup(dir: &tempfile::TempDir) -> (CommsConfig, RegistryHandle) {
    let config = test_config(dir);
    let registry = spawn_registry(&config);
    (config, registry)
}

/// Reads from the stream until `want` bytes arrived or the stream hit
/// EOF, bounded by a generous deadline.
async fn read_at_least(stream: &mut UnixStream, want: usize) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = vec![0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    while collected.len() < want {
        let read = tokio::time::timeout_at(deadline, stream.read(&mut buf))
            .await
            .expect("read deadline")
            .expect("read");
        if read == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..read]);
    }
    collected
}

#[tokio::test]
async fn test_cat_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let mut handle = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-cat"), "cat"),
        registry.clone(),
        &config,
    )
    .await
    .expect("spawn bridge");

    let mut stream = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect");
    stream.write_all(b"hello\n").await.expect("write");

    let echoed = read_at_least(&mut stream, 6).await;
    assert_eq!(echoed, b"hello\n");

    drop(stream);
    handle.terminate().await.expect("terminate");
}

#[tokio::test]
async fn test_registration_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let mut handle = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-echo"), "cat"),
        registry.clone(),
        &config,
    )
    .await
    .expect("spawn bridge");

    let endpoint = registry
        .discover(&CiName::new("test-echo"))
        .await
        .expect("discover");
    assert_eq!(endpoint.kind, EndpointKind::ToolBridge);
    assert_eq!(endpoint.pid, Some(handle.pid()));
    assert_eq!(
        endpoint.socket_path.as_deref(),
        Some(handle.socket_path())
    );
    assert!(config.port_in_range(endpoint.port));

    handle.terminate().await.expect("terminate");
}

#[tokio::test]
async fn test_cleanup_after_natural_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let mut handle = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-true"), "true"),
        registry.clone(),
        &config,
    )
    .await
    .expect("spawn bridge");

    let socket_path = handle.socket_path().to_path_buf();
    handle.wait().await.expect("wait");

    assert!(!socket_path.exists(), "socket file should be unlinked");
    assert!(matches!(
        registry.discover(&CiName::new("test-true")).await,
        Err(CommsError::EndpointNotFound(_))
    ));
}

#[tokio::test]
async fn test_partial_final_frame_delivered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    // Emits an unterminated chunk, then exits
    let spec = BridgeSpec::new(CiName::new("test-tail"), "sh")
        .with_args(vec!["-c".to_string(), "sleep 0.5; printf tail".to_string()]);
    let mut handle = ProcessBridge::spawn(spec, registry.clone(), &config)
        .await
        .expect("spawn bridge");

    let mut stream = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect");

    let collected = read_at_least(&mut stream, 4).await;
    assert_eq!(collected, b"tail");

    handle.wait().await.expect("wait");
}

#[tokio::test]
async fn test_second_client_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let mut handle = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-busy"), "cat"),
        registry.clone(),
        &config,
    )
    .await
    .expect("spawn bridge");

    let mut first = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect first");
    first.write_all(b"ping\n").await.expect("write");
    assert_eq!(read_at_least(&mut first, 5).await, b"ping\n");

    let mut second = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect second");
    let rejection = read_at_least(&mut second, 6).await;
    assert!(
        rejection.starts_with(b"error:"),
        "expected busy rejection, got {:?}",
        rejection
    );

    // First client still served after the rejection
    first.write_all(b"pong\n").await.expect("write");
    assert_eq!(read_at_least(&mut first, 5).await, b"pong\n");

    drop(first);
    handle.terminate().await.expect("terminate");
}

#[tokio::test]
async fn test_rejection_uses_bridge_delimiter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let spec = BridgeSpec::new(CiName::new("test-crlf"), "cat")
        .with_delimiter(Delimiter::parse("\\r\\n").expect("delimiter"));
    let mut handle = ProcessBridge::spawn(spec, registry.clone(), &config)
        .await
        .expect("spawn bridge");

    let mut first = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect first");
    first.write_all(b"ping\r\n").await.expect("write");
    assert_eq!(read_at_least(&mut first, 6).await, b"ping\r\n");

    let mut second = UnixStream::connect(handle.socket_path())
        .await
        .expect("connect second");
    let rejection = read_at_least(&mut second, b"error: bridge busy\r\n".len()).await;
    assert_eq!(rejection, b"error: bridge busy\r\n");

    drop(first);
    handle.terminate().await.expect("terminate");
}

#[tokio::test]
async fn test_spawn_failure_is_typed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let result = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-nope"), "definitely-not-a-command"),
        registry,
        &config,
    )
    .await;

    assert!(matches!(result, Err(CommsError::ProcessSpawn { .. })));
}

#[tokio::test]
async fn test_duplicate_bridge_name_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, registry) = setup(&dir);

    let mut first = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-dup"), "cat"),
        registry.clone(),
        &config,
    )
    .await
    .expect("spawn first");

    let second = ProcessBridge::spawn(
        BridgeSpec::new(CiName::new("test-dup"), "cat"),
        registry.clone(),
        &config,
    )
    .await;
    assert!(matches!(
        second,
        Err(CommsError::RegistrationConflict { .. })
    ));

    // The live bridge keeps its registration and socket
    let listed = registry
        .list(ListFilter {
            kind: Some(EndpointKind::ToolBridge),
            status: None,
        })
        .await;
    assert_eq!(listed.len(), 1);
    assert_ne!(listed[0].status, EndpointStatus::Evicted);

    first.terminate().await.expect("terminate");
}

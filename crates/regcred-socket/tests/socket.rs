//! Credential server and socket store over a real Unix socket

use std::sync::Arc;
use std::time::Duration;

use regcred_core::{AuthConfig, ConfigFile};
use regcred_socket::{
    check_credential_server, CredentialServer, ServerConfig, ShutdownReason, SocketError,
    SocketStore,
};
use regcred_store::{CredentialStore, FileStore, MemoryStore, SharedStore};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

fn memory() -> SharedStore {
    Arc::new(MemoryStore::new())
}

#[tokio::test]
async fn test_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let file = ConfigFile::load_from_dir(dir.path()).unwrap();
    let backing: SharedStore = Arc::new(FileStore::new(file));
    let socket_path = dir.path().join("run").join("credentials.sock");

    let server = CredentialServer::bind(backing, ServerConfig::new(&socket_path))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));

    let store = SocketStore::new(&socket_path);
    store
        .store(AuthConfig::new("r.test", "u", "p"))
        .await
        .unwrap();

    let auth = store.get("r.test").await.unwrap().unwrap();
    assert_eq!(auth.username, "u");
    assert_eq!(auth.password, "p");

    let all = store.get_all().await.unwrap();
    assert!(all.contains_key("r.test"));

    // Written through to the host's config file
    let on_disk = ConfigFile::load_from_dir(dir.path()).unwrap();
    assert!(on_disk.auths.contains_key("r.test"));

    store.erase("r.test").await.unwrap();
    assert!(store.get("r.test").await.unwrap().is_none());

    drop(store);
    cancel.cancel();
    let reason = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Cancelled);
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_key_with_port_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("credentials.sock");
    let server = CredentialServer::bind(memory(), ServerConfig::new(&socket_path))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));

    let store = SocketStore::new(&socket_path);
    store
        .store(AuthConfig::new("r.test:5000", "u", "p+q&r"))
        .await
        .unwrap();

    let auth = store.get("r.test:5000").await.unwrap().unwrap();
    assert_eq!(auth.password, "p+q&r");
    store.erase("r.test:5000").await.unwrap();
    assert!(store.get("r.test:5000").await.unwrap().is_none());

    drop(store);
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_idle_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("credentials.sock");
    let config = ServerConfig::new(&socket_path).with_idle_timeout(Duration::from_millis(200));

    let server = CredentialServer::bind(memory(), config).await.unwrap();
    let reason = tokio::time::timeout(Duration::from_secs(5), server.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reason, ShutdownReason::Idle);
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_open_connection_holds_server() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("credentials.sock");
    let config = ServerConfig::new(&socket_path).with_idle_timeout(Duration::from_millis(200));

    let server = CredentialServer::bind(memory(), config).await.unwrap();
    let handle = tokio::spawn(server.run(CancellationToken::new()));

    let conn = UnixStream::connect(&socket_path).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!handle.is_finished());

    drop(conn);
    let reason = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Idle);
}

#[tokio::test]
async fn test_second_server_refused() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("credentials.sock");

    let first = CredentialServer::bind(memory(), ServerConfig::new(&socket_path))
        .await
        .unwrap();
    assert!(check_credential_server(&socket_path).await);

    let err = CredentialServer::bind(memory(), ServerConfig::new(&socket_path))
        .await
        .unwrap_err();
    assert!(matches!(err, SocketError::AlreadyRunning(_)));
    drop(first);
}

#[tokio::test]
async fn test_stale_socket_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("credentials.sock");

    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());
    assert!(!check_credential_server(&socket_path).await);

    let server = CredentialServer::bind(memory(), ServerConfig::new(&socket_path))
        .await
        .unwrap();
    assert!(check_credential_server(server.socket_path()).await);
}

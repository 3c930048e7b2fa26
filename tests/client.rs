use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use rtftp::client::{Client, ClientConfig};
use rtftp::server::{Config, Server};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn start_server(directory: &Path, read_only: bool) -> SocketAddr {
    let config = Config::new(
        "127.0.0.1".parse().unwrap(),
        0,
        directory.to_path_buf(),
        read_only,
    );
    let server = Server::new(&config).await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run());
    addr
}

fn client_for(addr: SocketAddr) -> Client {
    let config = ClientConfig::new(addr.ip(), addr.port())
        .with_timeout(Duration::from_millis(500))
        .with_max_retries(3);
    Client::new(config).unwrap()
}

#[tokio::test]
async fn get_restores_the_remote_file() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let content = pattern(200_000);
    std::fs::write(server_dir.path().join("remote.bin"), &content).unwrap();

    let addr = start_server(server_dir.path(), false).await;
    let client = client_for(addr);

    let local = local_dir.path().join("copy.bin");
    client.get("remote.bin", &local).await.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), content);
}

#[tokio::test]
async fn put_stores_the_local_file() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let content = pattern(150_000);
    let local = local_dir.path().join("source.bin");
    std::fs::write(&local, &content).unwrap();

    let addr = start_server(server_dir.path(), false).await;
    let client = client_for(addr);

    client.put(&local, "stored.bin").await.unwrap();
    assert_eq!(
        std::fs::read(server_dir.path().join("stored.bin")).unwrap(),
        content
    );
}

#[tokio::test]
async fn empty_file_round_trips_both_ways() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let local = local_dir.path().join("empty.bin");
    std::fs::write(&local, b"").unwrap();

    let addr = start_server(server_dir.path(), false).await;
    let client = client_for(addr);

    client.put(&local, "empty.bin").await.unwrap();
    assert_eq!(
        std::fs::read(server_dir.path().join("empty.bin")).unwrap(),
        Vec::<u8>::new()
    );

    let copy = local_dir.path().join("empty-copy.bin");
    client.get("empty.bin", &copy).await.unwrap();
    assert_eq!(std::fs::read(&copy).unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn block_aligned_file_round_trips_exactly() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let content = pattern(1024);
    std::fs::write(server_dir.path().join("aligned.bin"), &content).unwrap();

    let addr = start_server(server_dir.path(), false).await;
    let client = client_for(addr);

    let local = local_dir.path().join("aligned.bin");
    client.get("aligned.bin", &local).await.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), content);
}

#[tokio::test]
async fn get_of_a_missing_file_reports_the_peer_error() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();

    let addr = start_server(server_dir.path(), false).await;
    let client = client_for(addr);

    let err = client
        .get("no-such-file.bin", &local_dir.path().join("out.bin"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("peer error"), "got: {err:#}");
}

#[tokio::test]
async fn put_to_a_read_only_server_reports_the_peer_error() {
    let server_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let local = local_dir.path().join("source.bin");
    std::fs::write(&local, b"payload").unwrap();

    let addr = start_server(server_dir.path(), true).await;
    let client = client_for(addr);

    let err = client.put(&local, "refused.bin").await.unwrap_err();
    assert!(err.to_string().contains("peer error"), "got: {err:#}");
}

#[tokio::test]
async fn put_of_a_missing_local_file_fails_before_any_transfer() {
    let local_dir = tempfile::tempdir().unwrap();
    let config = ClientConfig::new("127.0.0.1".parse().unwrap(), 9);
    let client = Client::new(config).unwrap();

    let err = client
        .put(&local_dir.path().join("absent.bin"), "absent.bin")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"), "got: {err:#}");
}

#[tokio::test]
async fn get_gives_up_when_nothing_answers() {
    let local_dir = tempfile::tempdir().unwrap();

    // Reserve an address, then free it so nothing is listening there
    let placeholder = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = placeholder.local_addr().unwrap();
    drop(placeholder);

    let config = ClientConfig::new(addr.ip(), addr.port())
        .with_timeout(Duration::from_millis(200))
        .with_max_retries(1);
    let client = Client::new(config).unwrap();

    let err = client
        .get("anything.bin", &local_dir.path().join("out.bin"))
        .await
        .unwrap_err();
    let _ = err;
}

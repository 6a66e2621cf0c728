//! Drives a real `rendezvous-server --remote` subprocess over its stdio.

use std::time::Duration;

use rendezvous_core::coordination::JoinRequest;
use rendezvous_core::{Framing, PoolInfo, RemoteClient, ServerAddress, TcpTransport};
use tokio::process::Command;

const WAIT: Duration = Duration::from_secs(20);

fn server_command(framing: &str) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_rendezvous-server"));
    command
        .args(["--remote", "--port", "0", "--bind", "127.0.0.1"])
        .args(["--framing", framing, "--log-level", "debug"])
        .env_remove("RUST_LOG");
    command
}

async fn control_session(framing: Framing, name: &str) {
    let client = RemoteClient::spawn(server_command(name), framing)
        .await
        .unwrap();
    assert!(!client.local_address().is_empty());

    let names = client.get_service_names().await.unwrap();
    assert_eq!(names, vec!["coordination".to_string()]);

    client.add_hubs(&["hub0:4000"]).await.unwrap();
    assert_eq!(client.get_hubs().await.unwrap(), vec!["hub0:4000".to_string()]);

    // The coordination service is reachable while the server is controlled.
    let stats = client.get_statistics("coordination").await.unwrap().unwrap();
    let listening = stats["listening"].clone().unwrap();
    let request = JoinRequest {
        pool_name: "solo".to_string(),
        host_id: "node0".to_string(),
        cluster_id: "rack0".to_string(),
        size: 1,
    };
    let info = PoolInfo::join_at(
        &TcpTransport::client().direct(),
        &ServerAddress::parse(&listening, 0).unwrap(),
        request,
        WAIT,
    )
    .await
    .unwrap();
    assert_eq!(info.rank(), 0);

    let stats = client.get_statistics("coordination").await.unwrap().unwrap();
    assert_eq!(stats["last_pool"], Some("solo".to_string()));

    let status = client.end(Duration::from_millis(500)).await.unwrap();
    assert!(status.unwrap().success());
}

#[tokio::test]
async fn test_spawned_server_binary_framing() {
    tokio::time::timeout(WAIT, control_session(Framing::Binary, "binary"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_spawned_server_line_framing() {
    tokio::time::timeout(WAIT, control_session(Framing::Line, "line"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_spawned_server_exits_when_controller_hangs_up() {
    let mut command = server_command("binary");
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);
    let mut child = command.spawn().unwrap();

    // Closing stdin before any handshake ends the server.
    drop(child.stdin.take());
    let status = tokio::time::timeout(WAIT, child.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());
}

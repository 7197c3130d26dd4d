//! Discovery responder, liveness ping, and per-datagram error containment.

use bytes::Bytes;
use starlane_server::server::bind_ephemeral;
use starlane_shared::codec::PacketReader;
use starlane_shared::config::ServerConfig;
use starlane_shared::packet::{BROADCAST_MAGIC, PING_MAGIC};
use starlane_tests::TestClient;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_ping_reports_server_status() -> anyhow::Result<()> {
    init_tracing();
    let cfg = ServerConfig {
        server_name: "Integration Test Server".into(),
        server_description: "A transient server.".into(),
        data_version: "2026.08".into(),
        max_players: 64,
        ..ServerConfig::default()
    };
    let mut server = bind_ephemeral(cfg).await?;
    server.start()?;

    let client = TestClient::new(server.discovery_addr()).await?;
    client.send_raw(&BROADCAST_MAGIC.to_le_bytes()).await?;

    let response = client.expect_raw().await?;
    let mut r = PacketReader::new(Bytes::from(response));
    assert_eq!(r.get_u8()?, 1);
    let _instance = r.get_u128()?;
    let _port = r.get_var_u32()?;
    assert_eq!(r.get_string()?, "Integration Test Server");
    assert_eq!(r.get_string()?, "A transient server.");
    assert_eq!(r.get_string()?, "2026.08");
    assert_eq!(r.get_var_u32()?, 0); // current players
    assert_eq!(r.get_var_u32()?, 64); // capacity
    assert_eq!(r.remaining(), 0);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_ignores_wrong_magic() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    server.start()?;

    let client = TestClient::new(server.discovery_addr()).await?;
    client.send_raw(&0xdead_beefu64.to_le_bytes()).await?;
    assert!(client.expect_raw().await.is_err(), "no response expected");

    // A correct probe afterwards still works.
    client.send_raw(&BROADCAST_MAGIC.to_le_bytes()).await?;
    assert!(!client.expect_raw().await?.is_empty());

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn liveness_ping_answers_single_byte() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    server.start()?;

    let client = TestClient::new(server.local_addr()).await?;
    client.send_raw(&PING_MAGIC.to_le_bytes()).await?;
    assert_eq!(client.expect_raw().await?, vec![0u8]);

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_datagrams_do_not_kill_the_listener() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    server.start()?;

    let client = TestClient::new(server.local_addr()).await?;
    // Garbage, an unknown packet tag behind valid flags, and a reserved
    // flag byte: each must cost at most the sender.
    client.send_raw(&[0xff, 0xfe, 0xfd]).await?;
    client.send_raw(&[0x00, 0xEE]).await?;
    client.send_raw(&[0x80, 0x02]).await?;

    // The listener is still alive and answering pings.
    client.send_raw(&PING_MAGIC.to_le_bytes()).await?;
    assert_eq!(client.expect_raw().await?, vec![0u8]);

    server.stop().await;
    Ok(())
}

//! Full socket-based integration tests for the connect/auth/table-sync flow.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use starlane_server::player::PlayerEvent;
use starlane_server::server::bind_ephemeral;
use starlane_server::world::{RegionDriver, RegionId};
use starlane_server::GameServer;
use starlane_shared::auth::{StaticTokenVerifier, TokenVerifier};
use starlane_shared::codec::{PacketReader, PacketWriter};
use starlane_shared::config::ServerConfig;
use starlane_shared::guid::PlayerGuid;
use starlane_shared::packet::{handshake_key, Packet, DEFAULT_APP_IDENT};
use starlane_tests::TestClient;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn good_key() -> String {
    handshake_key(DEFAULT_APP_IDENT)
}

/// Recording driver handed to the scheduler for the test region.
struct RecordingDriver {
    applied: Arc<Mutex<Vec<(PlayerGuid, Vec<u8>)>>>,
}

impl RegionDriver for RecordingDriver {
    fn update(&mut self, _dt: f64, _total: f64) -> bool {
        true
    }

    fn apply_packet(&mut self, from: PlayerGuid, payload: &[u8]) {
        self.applied.lock().unwrap().push((from, payload.to_vec()));
    }
}

/// Spawns the "gameplay layer": every connected player is assigned the test
/// region, spinning it up on first arrival.
fn spawn_region_assigner(
    server: &mut GameServer,
    region: RegionId,
    applied: Arc<Mutex<Vec<(PlayerGuid, Vec<u8>)>>>,
) {
    let handle = server.scheduler_handle();
    let mut events = server.take_game_events().expect("events already taken");
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let PlayerEvent::Connected(guid) = event {
                let driver = Box::new(RecordingDriver {
                    applied: Arc::clone(&applied),
                });
                handle.request_spin_up(region.clone(), driver, Some(guid));
            }
        }
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identity_handshake_creates_session_and_syncs_table() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    let hpids = server.hpids();
    let registry = server.registry();

    // Strings interned before the client ever connects must arrive in the
    // initial full-table push.
    hpids.register("li01_planet_newlondon");
    hpids.register("li01_tradelane_04");

    let applied = Arc::new(Mutex::new(Vec::new()));
    spawn_region_assigner(
        &mut server,
        RegionId::new("li01"),
        Arc::clone(&applied),
    );
    server.start()?;

    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    assert_eq!(client.expect_packet().await?, Packet::ConnectAccept);
    assert_eq!(client.expect_packet().await?, Packet::IdentityChallenge);

    let guid = PlayerGuid::from_u128(0xA11CE);
    client.send_packet(&Packet::IdentityReply { guid }).await?;

    // The very first session traffic is the full table, ordered by code.
    let first = client.expect_packet().await?;
    let strings = match first {
        Packet::SetStrings { strings } => strings,
        other => panic!("expected SetStrings before any other traffic, got {other:?}"),
    };
    assert_eq!(
        strings,
        vec![
            "li01_planet_newlondon".to_string(),
            "li01_tradelane_04".to_string()
        ]
    );

    // Wait for the gameplay layer to spin up the region and attach us.
    let attached = async {
        loop {
            if let Some(player) = registry.by_guid(guid) {
                if player.region().is_some() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), attached)
        .await
        .expect("player never attached to region");

    // A gameplay packet referencing a synced table code reaches the region.
    let code = hpids.lookup("li01_tradelane_04").unwrap();
    let mut payload = PacketWriter::new();
    payload.put_var_u32(code.as_u32());
    let payload = payload.freeze().to_vec();
    client
        .send_packet(&Packet::Game {
            payload: payload.clone(),
        })
        .await?;

    let delivered = async {
        loop {
            if !applied.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), delivered)
        .await
        .expect("gameplay packet never reached the region");

    let got = applied.lock().unwrap().remove(0);
    assert_eq!(got, (guid, payload.clone()));
    // The simulation side can resolve the referenced code.
    let mut r = PacketReader::new(bytes::Bytes::from(payload));
    let sent_code = r.get_var_u32()?;
    assert_eq!(
        hpids.snapshot()[(sent_code - 1) as usize],
        "li01_tradelane_04"
    );

    assert_eq!(registry.len(), 1);
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_strings_broadcast_to_connected_peers() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    let hpids = server.hpids();
    server.start()?;

    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    client.expect_packet().await?; // ConnectAccept
    client.expect_packet().await?; // IdentityChallenge
    client
        .send_packet(&Packet::IdentityReply {
            guid: PlayerGuid::from_u128(7),
        })
        .await?;
    let Packet::SetStrings { strings } = client.expect_packet().await? else {
        panic!("expected SetStrings");
    };
    assert!(strings.is_empty());

    // A string registered after authentication arrives incrementally, with
    // its assigned code.
    let code = hpids.register("br01_battleship_hood");
    let packet = client.expect_packet().await?;
    assert_eq!(
        packet,
        Packet::AddString {
            code: code.as_u32(),
            string: "br01_battleship_hood".into()
        }
    );

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_handshake_key_is_rejected_without_a_session() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    let registry = server.registry();
    server.start()?;

    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: "starlane00000000".into(),
            token: None,
        })
        .await?;
    assert_eq!(
        client.expect_packet().await?,
        Packet::Reject {
            reason: "bad key".into()
        }
    );
    assert_eq!(registry.len(), 0);
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_overflow_is_rejected() -> anyhow::Result<()> {
    init_tracing();
    let cfg = ServerConfig {
        max_players: 1,
        ..ServerConfig::default()
    };
    let mut server = bind_ephemeral(cfg).await?;
    server.start()?;

    let first = TestClient::new(server.local_addr()).await?;
    first
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    first.expect_packet().await?; // ConnectAccept
    first.expect_packet().await?; // IdentityChallenge
    first
        .send_packet(&Packet::IdentityReply {
            guid: PlayerGuid::from_u128(1),
        })
        .await?;
    first.expect_packet().await?; // SetStrings

    let second = TestClient::new(server.local_addr()).await?;
    second
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    assert_eq!(
        second.expect_packet().await?,
        Packet::Reject {
            reason: "server full".into()
        }
    );
    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_guid_and_wrong_packet_are_rejected() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(ServerConfig::default()).await?;
    server.start()?;

    // Zero GUID.
    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    client.expect_packet().await?;
    client.expect_packet().await?;
    client
        .send_packet(&Packet::IdentityReply {
            guid: PlayerGuid::ZERO,
        })
        .await?;
    assert_eq!(
        client.expect_packet().await?,
        Packet::Disconnect {
            reason: "bad GUID".into()
        }
    );

    // Wrong packet type while the challenge is outstanding.
    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    client.expect_packet().await?;
    client.expect_packet().await?;
    client
        .send_packet(&Packet::Game { payload: vec![1] })
        .await?;
    assert_eq!(
        client.expect_packet().await?,
        Packet::Disconnect {
            reason: "Invalid packet".into()
        }
    );

    server.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_auth_token_flow() -> anyhow::Result<()> {
    init_tracing();
    let guid = PlayerGuid::from_u128(0xBEEF);
    let verifier: Arc<dyn TokenVerifier> =
        Arc::new(StaticTokenVerifier::new().with_identity("valid-token", guid));
    let cfg = ServerConfig {
        port: 0,
        discovery_port: 0,
        login_url: Some("https://login.test/session".into()),
        ..ServerConfig::default()
    };
    let mut server = GameServer::bind_with_verifier(cfg, Some(verifier)).await?;
    server.start()?;

    // No token: the reject names the login service.
    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: None,
        })
        .await?;
    assert_eq!(
        client.expect_packet().await?,
        Packet::Reject {
            reason: "TokenRequired?https://login.test/session".into()
        }
    );

    // Bad token: verification completes with no identity.
    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: Some("forged".into()),
        })
        .await?;
    assert_eq!(
        client.expect_packet().await?,
        Packet::Reject {
            reason: "Login failure".into()
        }
    );

    // Good token: accepted and synced.
    let client = TestClient::new(server.local_addr()).await?;
    client
        .send_packet(&Packet::ConnectRequest {
            key: good_key(),
            token: Some("valid-token".into()),
        })
        .await?;
    assert_eq!(client.expect_packet().await?, Packet::ConnectAccept);
    assert!(matches!(
        client.expect_packet().await?,
        Packet::SetStrings { .. }
    ));
    assert!(server.registry().by_guid(guid).is_some());

    server.stop().await;
    Ok(())
}

//! UDP transport listener.
//!
//! One long-lived task owns both sockets: the primary game socket and the
//! unauthenticated discovery responder. Inbound datagrams are demultiplexed
//! by connection state — pre-authentication traffic drives the session state
//! machine, established traffic is decoded and either applied directly
//! (table maintenance, acks) or queued for the scheduler.
//!
//! Error containment: anything that goes wrong while processing a single
//! datagram is caught at the per-datagram boundary, logged, and costs at
//! most the peer that sent it. The listener task itself never dies over a
//! bad datagram; only a failed socket bind is fatal, at startup.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use starlane_shared::auth::TokenVerifier;
use starlane_shared::codec::{PacketReader, PacketWriter};
use starlane_shared::config::ServerConfig;
use starlane_shared::guid::PlayerGuid;
use starlane_shared::hpid::{HpidCode, HpidTable};
use starlane_shared::packet::{decode_frame, encode_frame, Packet, BROADCAST_MAGIC, PING_MAGIC};
use starlane_shared::session::{
    evaluate_connect, evaluate_identity_reply, evaluate_verification, AuthDecision,
    ConnectDecision,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::acks::{AckContext, PendingAcks};
use crate::player::{Player, PlayerEvent};
use crate::registry::PlayerRegistry;
use crate::scheduler::SchedulerHandle;

/// Pre-authentication state of a peer the listener is still negotiating with.
enum PendingConn {
    /// Identity challenge sent; waiting for the reply.
    AwaitingIdentity,
    /// External token verification round-trip in flight.
    Verifying,
}

/// Cross-task events consumed by the listener at a defined point in its
/// loop, instead of letting worker tasks mutate shared state directly.
enum ListenerEvent {
    AuthCompleted {
        addr: SocketAddr,
        guid: Option<PlayerGuid>,
    },
}

enum Wake {
    Primary(usize, SocketAddr),
    Discovery(usize, SocketAddr),
    Event(ListenerEvent),
    Flush,
    Stopped,
}

pub struct Listener {
    cfg: ServerConfig,
    socket: UdpSocket,
    discovery: UdpSocket,
    registry: Arc<PlayerRegistry>,
    hpids: Arc<HpidTable>,
    pending: HashMap<SocketAddr, PendingConn>,
    events_tx: UnboundedSender<ListenerEvent>,
    events_rx: UnboundedReceiver<ListenerEvent>,
    string_rx: UnboundedReceiver<(HpidCode, String)>,
    flush: Arc<Notify>,
    stop: watch::Receiver<bool>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    game_events: UnboundedSender<PlayerEvent>,
    scheduler: SchedulerHandle,
    acks: PendingAcks,
    /// Per-process instance GUID advertised in discovery responses.
    instance: u128,
}

impl Listener {
    /// Binds both sockets. Bind failures are fatal: no sessions can exist
    /// without a transport.
    #[allow(clippy::too_many_arguments)]
    pub async fn bind(
        cfg: ServerConfig,
        registry: Arc<PlayerRegistry>,
        hpids: Arc<HpidTable>,
        scheduler: SchedulerHandle,
        verifier: Option<Arc<dyn TokenVerifier>>,
        game_events: UnboundedSender<PlayerEvent>,
        flush: Arc<Notify>,
        stop: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.port))
            .await
            .context("bind primary socket")?;
        let discovery = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, cfg.discovery_port))
            .await
            .context("bind discovery socket")?;

        let (string_tx, string_rx) = mpsc::unbounded_channel();
        hpids.set_notify(string_tx);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            cfg,
            socket,
            discovery,
            registry,
            hpids,
            pending: HashMap::new(),
            events_tx,
            events_rx,
            string_rx,
            flush,
            stop,
            verifier,
            game_events,
            scheduler,
            acks: PendingAcks::new(),
            instance: rand::random::<u128>(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn discovery_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.discovery.local_addr()?)
    }

    pub async fn run(mut self) {
        let mut buf = vec![0u8; 64 * 1024];
        let mut dbuf = vec![0u8; 512];
        match self.local_addr() {
            Ok(addr) => info!(%addr, "Listening"),
            Err(_) => info!("Listening"),
        }
        loop {
            let wake = tokio::select! {
                r = self.socket.recv_from(&mut buf) => match r {
                    Ok((n, addr)) => Wake::Primary(n, addr),
                    Err(e) => {
                        warn!(error = %e, "Primary socket receive error");
                        continue;
                    }
                },
                r = self.discovery.recv_from(&mut dbuf) => match r {
                    Ok((n, addr)) => Wake::Discovery(n, addr),
                    Err(e) => {
                        warn!(error = %e, "Discovery socket receive error");
                        continue;
                    }
                },
                ev = self.events_rx.recv() => match ev {
                    Some(ev) => Wake::Event(ev),
                    None => Wake::Stopped,
                },
                _ = self.flush.notified() => Wake::Flush,
                _ = self.stop.changed() => Wake::Stopped,
            };
            match wake {
                Wake::Primary(n, addr) => {
                    let data = Bytes::copy_from_slice(&buf[..n]);
                    if let Err(e) = self.on_datagram(addr, data).await {
                        warn!(%addr, error = %e, "Error processing datagram");
                        self.disconnect_errored(addr).await;
                    }
                }
                Wake::Discovery(n, addr) => {
                    let data = Bytes::copy_from_slice(&dbuf[..n]);
                    self.on_discovery(data, addr).await;
                }
                Wake::Event(ev) => self.on_event(ev).await,
                Wake::Flush => self.flush_outbound().await,
                Wake::Stopped => break,
            }
        }
        info!("Listener stopped");
    }

    /// Handles one datagram from the primary socket. Any error returned here
    /// is contained to the sending peer by the caller.
    async fn on_datagram(&mut self, addr: SocketAddr, data: Bytes) -> anyhow::Result<()> {
        // Unconnected liveness ping: fixed 4-byte magic, one-byte reply.
        if data.len() == 4 && data[..] == PING_MAGIC.to_le_bytes() {
            self.send_raw(addr, &[0u8]).await;
            return Ok(());
        }

        let (seq, packet) = decode_frame(data)?;
        if let Some(seq) = seq {
            self.send_packet_to(addr, &Packet::Ack { seq }).await;
        }

        match self.registry.by_addr(&addr) {
            Some(player) => self.on_session_packet(player, packet).await?,
            None => self.on_unestablished(addr, packet).await,
        }
        Ok(())
    }

    async fn on_session_packet(
        &mut self,
        player: Arc<Player>,
        packet: Packet,
    ) -> anyhow::Result<()> {
        match packet {
            Packet::SetStrings { strings } => player.apply_set_strings(strings),
            Packet::AddString { code, string } => {
                player.apply_add_string(HpidCode::from_u32(code), string)?
            }
            Packet::Ack { seq } => {
                if let Some(ctx) = self.acks.confirm(seq) {
                    debug!(guid = %ctx.player, label = ctx.label, "Delivery confirmed");
                }
            }
            Packet::Game { .. } => player.enqueue_inbound(packet),
            Packet::Disconnect { reason } => {
                self.disconnect_player(&player, &reason, false).await;
            }
            Packet::ConnectRequest { .. } => {
                debug!(addr = %player.addr(), "Duplicate connect from established peer");
            }
            _ => {
                self.disconnect_player(&player, "Invalid packet", true).await;
            }
        }
        Ok(())
    }

    async fn on_unestablished(&mut self, addr: SocketAddr, packet: Packet) {
        match self.pending.get(&addr) {
            Some(PendingConn::Verifying) => {
                debug!(%addr, "Datagram while token verification in flight");
            }
            Some(PendingConn::AwaitingIdentity) => {
                self.pending.remove(&addr);
                match evaluate_identity_reply(&packet) {
                    AuthDecision::Accept { guid } => self.accept_player(addr, guid).await,
                    AuthDecision::Reject { reason } => {
                        debug!(%addr, %reason, "Identity reply rejected");
                        self.send_packet_to(addr, &Packet::Disconnect { reason }).await;
                    }
                }
            }
            None => self.on_connect_attempt(addr, packet).await,
        }
    }

    async fn on_connect_attempt(&mut self, addr: SocketAddr, packet: Packet) {
        let connected = self.registry.len() + self.pending.len();
        let login_url = self.cfg.login_url.clone();
        let decision = evaluate_connect(
            &packet,
            &self.cfg.expected_key(),
            connected,
            self.cfg.max_players as usize,
            login_url.as_deref(),
        );
        match decision {
            ConnectDecision::Reject { reason } => {
                debug!(%addr, %reason, "Rejected connection");
                self.send_packet_to(addr, &Packet::Reject { reason }).await;
            }
            ConnectDecision::BeginTokenVerification { token } => {
                let (Some(verifier), Some(url)) = (self.verifier.clone(), login_url) else {
                    warn!(%addr, "Login URL configured but no verifier installed");
                    self.send_packet_to(
                        addr,
                        &Packet::Reject {
                            reason: "Login failure".into(),
                        },
                    )
                    .await;
                    return;
                };
                self.pending.insert(addr, PendingConn::Verifying);
                let events = self.events_tx.clone();
                // The round-trip runs off-task; the result re-enters through
                // the event queue, never by touching shared state from here.
                tokio::spawn(async move {
                    let guid = match verifier.verify(&url, &token).await {
                        Ok(guid) => guid,
                        Err(e) => {
                            warn!(%addr, error = %e, "Login service round-trip failed");
                            None
                        }
                    };
                    let _ = events.send(ListenerEvent::AuthCompleted { addr, guid });
                });
            }
            ConnectDecision::IssueIdentityChallenge => {
                info!(%addr, "Connected, requesting identity");
                self.pending.insert(addr, PendingConn::AwaitingIdentity);
                self.send_packet_to(addr, &Packet::ConnectAccept).await;
                self.send_packet_to(addr, &Packet::IdentityChallenge).await;
            }
        }
    }

    async fn on_event(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::AuthCompleted { addr, guid } => {
                if !matches!(self.pending.get(&addr), Some(PendingConn::Verifying)) {
                    debug!(%addr, "Stale verification result");
                    return;
                }
                self.pending.remove(&addr);
                match evaluate_verification(guid) {
                    AuthDecision::Accept { guid } => {
                        info!(%addr, %guid, "Login verified");
                        self.send_packet_to(addr, &Packet::ConnectAccept).await;
                        self.accept_player(addr, guid).await;
                    }
                    AuthDecision::Reject { reason } => {
                        info!(%addr, "Login failed");
                        self.send_packet_to(addr, &Packet::Reject { reason }).await;
                    }
                }
            }
        }
    }

    /// Promotes a peer to an authenticated session.
    async fn accept_player(&mut self, addr: SocketAddr, guid: PlayerGuid) {
        // Full table first: the peer must know every code before any packet
        // referencing one can be sent to it. The push happens before the
        // registry insert, so the broadcast path cannot observe the player
        // until the snapshot is on the wire.
        let strings = self.hpids.snapshot();
        let seq = self.acks.next_seq();
        self.acks.register(
            seq,
            AckContext {
                player: guid,
                label: "set-strings",
            },
        );
        let frame = encode_frame(&Packet::SetStrings { strings }, Some(seq));
        self.send_raw(addr, &frame).await;

        let player = Arc::new(Player::new(guid, addr));
        self.registry.insert(player);
        let _ = self.game_events.send(PlayerEvent::Connected(guid));
        info!(%addr, %guid, "Player connected");
    }

    async fn disconnect_player(&mut self, player: &Arc<Player>, reason: &str, notify_peer: bool) {
        if notify_peer {
            self.send_packet_to(
                player.addr(),
                &Packet::Disconnect {
                    reason: reason.into(),
                },
            )
            .await;
        }
        self.registry.remove(&player.addr());
        self.scheduler.detach(player.guid());
        let _ = self
            .game_events
            .send(PlayerEvent::Disconnected(player.guid()));
        info!(addr = %player.addr(), guid = %player.guid(), %reason, "Player disconnected");
    }

    /// Containment path for a datagram that errored mid-processing.
    async fn disconnect_errored(&mut self, addr: SocketAddr) {
        if let Some(player) = self.registry.by_addr(&addr) {
            self.disconnect_player(&player, "Packet processing error", true)
                .await;
        } else if self.pending.remove(&addr).is_some() {
            self.send_packet_to(
                addr,
                &Packet::Disconnect {
                    reason: "Packet processing error".into(),
                },
            )
            .await;
        }
    }

    /// Answers unauthenticated discovery pings with the server status.
    async fn on_discovery(&mut self, data: Bytes, addr: SocketAddr) {
        let mut r = PacketReader::new(data);
        let Ok(magic) = r.get_u64() else { return };
        if magic != BROADCAST_MAGIC {
            return;
        }
        let mut w = PacketWriter::new();
        w.put_u8(1);
        w.put_u128(self.instance);
        w.put_var_u32(u32::from(self.cfg.port));
        w.put_string(&self.cfg.server_name);
        w.put_string(&self.cfg.server_description);
        w.put_string(&self.cfg.data_version);
        // Counts are re-derived at send time; best-effort versus concurrent
        // connects and disconnects.
        w.put_var_u32(self.registry.len() as u32);
        w.put_var_u32(self.cfg.max_players);
        let frame = w.freeze();
        if let Err(e) = self.discovery.send_to(&frame, addr).await {
            debug!(%addr, error = %e, "Discovery response send failed");
        }
    }

    /// Flushes buffered outbound traffic. String-table additions drain ahead
    /// of the player queues so a new code is always announced before any
    /// packet that references it.
    async fn flush_outbound(&mut self) {
        while let Ok((code, string)) = self.string_rx.try_recv() {
            let packet = Packet::add_string(code, string);
            for player in self.registry.snapshot() {
                let seq = self.acks.next_seq();
                self.acks.register(
                    seq,
                    AckContext {
                        player: player.guid(),
                        label: "add-string",
                    },
                );
                player.queue_frame(encode_frame(&packet, Some(seq)));
            }
        }
        for player in self.registry.snapshot() {
            for frame in player.drain_outbound() {
                if let Err(e) = self.socket.send_to(&frame, player.addr()).await {
                    debug!(addr = %player.addr(), error = %e, "Outbound send failed");
                }
            }
        }
    }

    async fn send_packet_to(&self, addr: SocketAddr, packet: &Packet) {
        let frame = encode_frame(packet, None);
        self.send_raw(addr, &frame).await;
    }

    async fn send_raw(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, addr).await {
            debug!(%addr, error = %e, "Send failed");
        }
    }
}

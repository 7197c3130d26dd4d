//! Server assembly.
//!
//! Wires the registry, string table, scheduler, and transport listener
//! together and runs the two long-lived tasks. Startup is all-or-nothing: a
//! socket bind failure aborts before any task is spawned.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use starlane_shared::auth::{HttpTokenVerifier, TokenVerifier};
use starlane_shared::config::ServerConfig;
use starlane_shared::guid::PlayerGuid;
use starlane_shared::hpid::HpidTable;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

use crate::listener::Listener;
use crate::player::PlayerEvent;
use crate::registry::PlayerRegistry;
use crate::scheduler::{Scheduler, SchedulerHandle};

/// The authoritative game server core.
pub struct GameServer {
    pub cfg: ServerConfig,
    registry: Arc<PlayerRegistry>,
    hpids: Arc<HpidTable>,
    handle: SchedulerHandle,
    flush: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
    scheduler: Option<Scheduler>,
    listener: Option<Listener>,
    game_events_rx: Option<UnboundedReceiver<PlayerEvent>>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
    discovery_addr: SocketAddr,
}

impl GameServer {
    /// Binds the server with the production token verifier when a login URL
    /// is configured.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        let verifier = cfg
            .login_url
            .as_ref()
            .map(|_| Arc::new(HttpTokenVerifier::new()) as Arc<dyn TokenVerifier>);
        Self::bind_with_verifier(cfg, verifier).await
    }

    /// Binds with an explicit verifier (dependency injection for tests).
    pub async fn bind_with_verifier(
        cfg: ServerConfig,
        verifier: Option<Arc<dyn TokenVerifier>>,
    ) -> anyhow::Result<Self> {
        let registry = Arc::new(PlayerRegistry::new());
        let hpids = Arc::new(HpidTable::new());
        let flush = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let (scheduler, handle) = Scheduler::new(
            &cfg,
            Arc::clone(&registry),
            Arc::clone(&flush),
            stop_rx.clone(),
        );
        let listener = Listener::bind(
            cfg.clone(),
            Arc::clone(&registry),
            Arc::clone(&hpids),
            handle.clone(),
            verifier,
            game_tx,
            Arc::clone(&flush),
            stop_rx,
        )
        .await
        .context("bind listener")?;
        let local_addr = listener.local_addr()?;
        let discovery_addr = listener.discovery_addr()?;

        Ok(Self {
            cfg,
            registry,
            hpids,
            handle,
            flush,
            stop_tx,
            scheduler: Some(scheduler),
            listener: Some(listener),
            game_events_rx: Some(game_rx),
            tasks: Vec::new(),
            local_addr,
            discovery_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    pub fn registry(&self) -> Arc<PlayerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn hpids(&self) -> Arc<HpidTable> {
        Arc::clone(&self.hpids)
    }

    /// Handle the gameplay layer uses to post lifecycle requests and
    /// loopback packets.
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Takes the player-connected/disconnected event stream. Yields `None`
    /// once taken.
    pub fn take_game_events(&mut self) -> Option<UnboundedReceiver<PlayerEvent>> {
        self.game_events_rx.take()
    }

    /// Marks the in-process loopback session. Must be called before `start`.
    pub fn set_local_player(&mut self, guid: PlayerGuid) -> anyhow::Result<()> {
        self.scheduler
            .as_mut()
            .context("server already started")?
            .set_local_player(guid);
        Ok(())
    }

    /// Spawns the listener and scheduler tasks.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let listener = self.listener.take().context("server already started")?;
        let scheduler = self.scheduler.take().context("server already started")?;
        self.tasks.push(tokio::spawn(listener.run()));
        self.tasks.push(tokio::spawn(scheduler.run()));
        info!(addr = %self.local_addr, "Server started");
        Ok(())
    }

    /// Requests a stop and waits for both tasks. The scheduler finishes its
    /// current tick; nothing is interrupted mid-execution.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        self.flush.notify_one();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Server stopped");
    }

    /// One-line status report (console `status` command).
    pub fn status(&self) -> String {
        format!(
            "players={} interned_strings={} addr={}",
            self.registry.len(),
            self.hpids.len(),
            self.local_addr
        )
    }
}

/// Helper for tests: bind both sockets to ephemeral ports.
pub async fn bind_ephemeral(mut cfg: ServerConfig) -> anyhow::Result<GameServer> {
    cfg.port = 0;
    cfg.discovery_port = 0;
    GameServer::bind(cfg).await
}

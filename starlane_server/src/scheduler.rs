//! Fixed-timestep region scheduler.
//!
//! The scheduler owns the region map outright: worlds are created, ticked,
//! and torn down only inside a tick boundary, so the map itself needs no
//! lock. Everything arriving from other tasks — loopback packets, world
//! lifecycle requests — comes in through thread-safe queues drained at
//! defined points in the tick.
//!
//! The loop runs at one of two rates: a busy rate while any region is
//! active, an idle rate otherwise. A stop request is honored only at tick
//! boundaries; no tick is interrupted mid-execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use starlane_shared::config::ServerConfig;
use starlane_shared::guid::PlayerGuid;
use starlane_shared::packet::Packet;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::perf::TickStats;
use crate::registry::PlayerRegistry;
use crate::world::{RegionDriver, RegionId, ServerWorld};

/// World lifecycle requests produced by the gameplay layer when a player's
/// region assignment changes.
pub enum WorldRequest {
    /// Create the region if it is not already live, optionally attaching a
    /// first player.
    SpinUp {
        region: RegionId,
        driver: Box<dyn RegionDriver>,
        player: Option<PlayerGuid>,
    },
    Attach {
        region: RegionId,
        player: PlayerGuid,
    },
    Detach {
        player: PlayerGuid,
    },
}

/// Cloneable handle for posting work to the scheduler from other tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    requests: UnboundedSender<WorldRequest>,
    local_packets: UnboundedSender<Packet>,
    local_paused: Arc<AtomicBool>,
}

impl SchedulerHandle {
    pub fn request_spin_up(
        &self,
        region: RegionId,
        driver: Box<dyn RegionDriver>,
        player: Option<PlayerGuid>,
    ) {
        let _ = self.requests.send(WorldRequest::SpinUp {
            region,
            driver,
            player,
        });
    }

    pub fn attach(&self, region: RegionId, player: PlayerGuid) {
        let _ = self.requests.send(WorldRequest::Attach { region, player });
    }

    pub fn detach(&self, player: PlayerGuid) {
        let _ = self.requests.send(WorldRequest::Detach { player });
    }

    /// Injects a server-local packet that bypasses the network entirely.
    pub fn send_local(&self, packet: Packet) {
        let _ = self.local_packets.send(packet);
    }

    pub fn set_local_paused(&self, paused: bool) {
        self.local_paused.store(paused, Ordering::Relaxed);
    }
}

pub struct Scheduler {
    registry: Arc<PlayerRegistry>,
    worlds: HashMap<RegionId, ServerWorld>,
    requests_rx: UnboundedReceiver<WorldRequest>,
    local_rx: UnboundedReceiver<Packet>,
    flush: Arc<Notify>,
    stop: watch::Receiver<bool>,

    busy: Duration,
    idle: Duration,
    slow_budget: Duration,
    timestep: Duration,
    total: f64,

    local_player: Option<PlayerGuid>,
    local_paused: Arc<AtomicBool>,
    mission_runtime: f64,

    stats: TickStats,
    last_debug_info: String,
}

impl Scheduler {
    pub fn new(
        cfg: &ServerConfig,
        registry: Arc<PlayerRegistry>,
        flush: Arc<Notify>,
        stop: watch::Receiver<bool>,
    ) -> (Self, SchedulerHandle) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let local_paused = Arc::new(AtomicBool::new(false));
        let idle = cfg.idle_timestep();
        let scheduler = Self {
            registry,
            worlds: HashMap::new(),
            requests_rx,
            local_rx,
            flush,
            stop,
            busy: cfg.busy_timestep(),
            idle,
            slow_budget: cfg.slow_tick_budget(),
            timestep: idle,
            total: 0.0,
            local_player: None,
            local_paused: Arc::clone(&local_paused),
            mission_runtime: 0.0,
            stats: TickStats::default(),
            last_debug_info: String::new(),
        };
        let handle = SchedulerHandle {
            requests: requests_tx,
            local_packets: local_tx,
            local_paused,
        };
        (scheduler, handle)
    }

    /// Marks the in-process loopback session, if the server hosts one.
    pub fn set_local_player(&mut self, guid: PlayerGuid) {
        self.local_player = Some(guid);
    }

    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    pub fn region_count(&self) -> usize {
        self.worlds.len()
    }

    pub fn has_region(&self, region: &RegionId) -> bool {
        self.worlds.contains_key(region)
    }

    pub fn region_player_count(&self, region: &RegionId) -> Option<usize> {
        self.worlds.get(region).map(ServerWorld::player_count)
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }

    pub fn mission_runtime(&self) -> f64 {
        self.mission_runtime
    }

    pub fn debug_info(&self) -> &str {
        &self.last_debug_info
    }

    /// Runs the loop until a stop is requested.
    pub async fn run(mut self) {
        let mut next = tokio::time::Instant::now();
        loop {
            if *self.stop.borrow() {
                break;
            }
            self.step(self.timestep.as_secs_f64());
            // The adapted rate takes effect from the very next deadline.
            next += self.timestep;
            tokio::time::sleep_until(next).await;
        }
        info!("Scheduler stopped");
    }

    /// Executes one fixed simulation step.
    pub fn step(&mut self, dt: f64) {
        let started = std::time::Instant::now();

        // 1. Server-local packets bypass the network.
        while let Ok(packet) = self.local_rx.try_recv() {
            self.process_local(packet);
        }

        // 2. At most one world lifecycle request per tick.
        if let Ok(request) = self.requests_rx.try_recv() {
            self.apply_request(request);
        }

        // 3. Bookkeeping not tied to a region.
        if self.local_player.is_some() && !self.local_paused.load(Ordering::Relaxed) {
            self.mission_runtime += dt;
        }

        // 4. Route queued inbound packets into their region's simulation.
        self.route_inbound();

        // 5. Tick every active region once.
        let mut spin_down = Vec::new();
        let mut debug_info = String::new();
        for (region, world) in &mut self.worlds {
            if !world.update(dt, self.total) {
                spin_down.push(region.clone());
            }
            let line = world.debug_info();
            if !line.is_empty() {
                debug_info.push_str(region.as_str());
                debug_info.push_str(": ");
                debug_info.push_str(&line);
                debug_info.push('\n');
            }
        }
        self.last_debug_info = debug_info;

        // 6. Deferred teardown: only if no player raced in this tick.
        for region in spin_down {
            let empty = self
                .worlds
                .get(&region)
                .map(|w| w.player_count() == 0)
                .unwrap_or(false);
            if empty {
                self.worlds.remove(&region);
                info!(%region, "Shut down region");
            }
        }

        // 7. Adapt the rate to load.
        let was_idle = self.timestep == self.idle;
        self.timestep = if self.worlds.is_empty() {
            self.idle
        } else {
            self.busy
        };

        // 8. Account the tick; overruns are observability only.
        let elapsed = started.elapsed();
        self.stats.record(elapsed.as_secs_f64() as f32 * 1000.0);
        if elapsed > self.slow_budget && !was_idle {
            warn!(
                "Running slow: update took {:.2}ms",
                elapsed.as_secs_f64() * 1000.0
            );
        }
        self.total += dt;

        // 9. Push buffered outbound traffic out now, not at the next poll.
        self.flush.notify_one();
    }

    fn process_local(&mut self, packet: Packet) {
        let Some(guid) = self.local_player else {
            debug!("Dropping local packet: no local session");
            return;
        };
        let Packet::Game { payload } = packet else {
            debug!("Dropping non-gameplay local packet");
            return;
        };
        let Some(region) = self.registry.by_guid(guid).and_then(|p| p.region()) else {
            debug!("Dropping local packet: local session has no region");
            return;
        };
        if let Some(world) = self.worlds.get_mut(&region) {
            world.apply_packet(guid, &payload);
        }
    }

    fn apply_request(&mut self, request: WorldRequest) {
        match request {
            WorldRequest::SpinUp {
                region,
                driver,
                player,
            } => {
                if self.worlds.contains_key(&region) {
                    warn!(%region, "Ignoring spin-up for already-live region");
                } else {
                    self.worlds
                        .insert(region.clone(), ServerWorld::new(region.clone(), driver));
                    info!(%region, "Spun up region");
                }
                if let Some(guid) = player {
                    self.attach_player(&region, guid);
                }
            }
            WorldRequest::Attach { region, player } => self.attach_player(&region, player),
            WorldRequest::Detach { player } => self.detach_player(player),
        }
    }

    fn attach_player(&mut self, region: &RegionId, guid: PlayerGuid) {
        let Some(world) = self.worlds.get_mut(region) else {
            warn!(%region, %guid, "Attach to region that is not live");
            return;
        };
        world.attach(guid);
        if let Some(player) = self.registry.by_guid(guid) {
            player.set_region(Some(region.clone()));
        }
    }

    fn detach_player(&mut self, guid: PlayerGuid) {
        // The player may already be gone from the registry (disconnect), so
        // sweep every world rather than trusting a recorded assignment.
        for world in self.worlds.values_mut() {
            world.detach(guid);
        }
        if let Some(player) = self.registry.by_guid(guid) {
            player.set_region(None);
        }
    }

    fn route_inbound(&mut self) {
        for player in self.registry.snapshot() {
            let packets = player.drain_inbound();
            if packets.is_empty() {
                continue;
            }
            let Some(region) = player.region() else {
                debug!(guid = %player.guid(), "Dropping packets: player has no region");
                continue;
            };
            let Some(world) = self.worlds.get_mut(&region) else {
                debug!(guid = %player.guid(), %region, "Dropping packets: region not live");
                continue;
            };
            for packet in packets {
                if let Packet::Game { payload } = packet {
                    world.apply_packet(player.guid(), &payload);
                }
            }
        }
    }
}

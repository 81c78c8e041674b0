use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use room_store::{
    Entry, KeyPath, MemoryRoom, MemoryRoomServer, ParticipantIdentity, RoomStore, SetOptions,
    StoreResult, Subscription, SubscriptionId, WriteContext,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url_follow::{Document, FatalError, FollowConfig, FollowError, FollowerPhase, UrlFollower};

use crate::cli::RaceArgs;

/// Page that reports every load back to the simulation driver.
struct SimDocument {
    index: usize,
    location: Mutex<String>,
    loads: mpsc::UnboundedSender<usize>,
}

impl Document for SimDocument {
    fn location(&self) -> String {
        self.location.lock().clone()
    }

    fn navigate(&self, url: &str) {
        *self.location.lock() = url.to_string();
        let _ = self.loads.send(self.index);
    }

    fn reload(&self) {
        let _ = self.loads.send(self.index);
    }
}

/// Memory room with a random per-call delay, so participants interleave.
struct LaggyRoom {
    inner: MemoryRoom,
    max_latency_ms: u64,
}

impl LaggyRoom {
    async fn lag(&self) {
        if self.max_latency_ms == 0 {
            return;
        }
        let delay = rand::thread_rng().gen_range(0..=self.max_latency_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

#[async_trait]
impl RoomStore for LaggyRoom {
    async fn identity(&self) -> StoreResult<ParticipantIdentity> {
        self.lag().await;
        self.inner.identity().await
    }

    async fn get(&self, key: &KeyPath) -> StoreResult<Entry> {
        self.lag().await;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &KeyPath,
        value: Value,
        options: SetOptions,
    ) -> StoreResult<WriteContext> {
        self.lag().await;
        self.inner.set(key, value, options).await
    }

    async fn subscribe(&self, key: &KeyPath) -> StoreResult<Subscription> {
        self.inner.subscribe(key).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        self.inner.unsubscribe(id).await
    }
}

struct Slot {
    id: String,
    room: Arc<LaggyRoom>,
    document: Arc<SimDocument>,
    follower: Option<Arc<UrlFollower>>,
    bootstrap: Option<JoinHandle<()>>,
}

struct Simulation {
    config: FollowConfig,
    server: MemoryRoomServer,
    slots: Vec<Slot>,
    loads: usize,
    max_loads: usize,
    init_tx: mpsc::UnboundedSender<(usize, Result<(), FollowError>)>,
    fatal_tx: mpsc::UnboundedSender<(String, FatalError)>,
}

impl Simulation {
    /// Replaces a participant's page: the old coordinator goes away and a new one bootstraps.
    async fn load(&mut self, index: usize) -> Result<()> {
        self.loads += 1;
        if self.loads > self.max_loads {
            bail!("room did not settle within {} page loads", self.max_loads);
        }

        let slot = &mut self.slots[index];
        if let Some(task) = slot.bootstrap.take() {
            task.abort();
        }
        if let Some(previous) = slot.follower.take() {
            if previous.phase() == FollowerPhase::Subscribed {
                previous
                    .destroy()
                    .await
                    .with_context(|| format!("tearing down {}", slot.id))?;
            }
        }

        let follower = Arc::new(UrlFollower::new(
            slot.room.clone(),
            slot.document.clone(),
            &self.config,
        )?);
        if let Some(mut fatal) = follower.take_fatal_errors() {
            let fatal_tx = self.fatal_tx.clone();
            let id = slot.id.clone();
            tokio::spawn(async move {
                while let Some(err) = fatal.recv().await {
                    let _ = fatal_tx.send((id.clone(), err));
                }
            });
        }

        debug!(
            target = "follow_sim",
            participant = %slot.id,
            location = %slot.document.location(),
            "page load"
        );
        slot.follower = Some(follower.clone());
        let init_tx = self.init_tx.clone();
        slot.bootstrap = Some(tokio::spawn(async move {
            let result = follower.initialize().await;
            let _ = init_tx.send((index, result));
        }));
        Ok(())
    }

    /// Leaves the room: pending bootstraps are cancelled and subscribed followers torn down.
    async fn shutdown(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(task) = slot.bootstrap.take() {
                task.abort();
            }
            let Some(follower) = slot.follower.take() else {
                continue;
            };
            if follower.phase() == FollowerPhase::Subscribed {
                follower
                    .destroy()
                    .await
                    .with_context(|| format!("tearing down {}", slot.id))?;
            }
        }
        debug!(target = "follow_sim", "all participants left the room");
        Ok(())
    }

    fn report(&self) -> Result<()> {
        let namespace = self.config.namespace()?;
        let version = self
            .server
            .value(namespace.version())
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        let leader = self
            .server
            .last_writer(namespace.version())
            .unwrap_or_else(|| "-".into());
        let agreed = self
            .server
            .value(&namespace.url_for(version)?)
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "-".into());

        println!("room version {version} led by {leader}: {agreed}");
        for slot in &self.slots {
            let acknowledged = self
                .server
                .value(&namespace.participant_version(&slot.id)?)
                .and_then(|value| value.as_u64())
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".into());
            let phase = slot
                .follower
                .as_ref()
                .map(|follower| format!("{:?}", follower.phase()))
                .unwrap_or_else(|| "-".into());
            println!(
                "  {:<6} {:<12} v{:<4} {}",
                slot.id,
                phase,
                acknowledged,
                slot.document.location()
            );
        }
        Ok(())
    }
}

pub async fn run_race(args: RaceArgs) -> Result<()> {
    race(&args, FollowConfig::from_env()?, MemoryRoomServer::new()).await
}

async fn race(args: &RaceArgs, config: FollowConfig, server: MemoryRoomServer) -> Result<()> {
    if args.participants == 0 {
        bail!("at least one participant is required");
    }

    let (loads_tx, mut loads_rx) = mpsc::unbounded_channel();
    let (init_tx, mut init_rx) = mpsc::unbounded_channel();
    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

    let slots = (0..args.participants)
        .map(|index| {
            let id = format!("p{index}");
            let page = args
                .origin
                .join(&format!("/{id}"))
                .with_context(|| format!("building start page for {id}"))?;
            let identity = ParticipantIdentity::new(id.clone(), format!("Guest {index}"));
            Ok(Slot {
                room: Arc::new(LaggyRoom {
                    inner: server.join(identity),
                    max_latency_ms: args.latency_ms,
                }),
                document: Arc::new(SimDocument {
                    index,
                    location: Mutex::new(page.to_string()),
                    loads: loads_tx.clone(),
                }),
                follower: None,
                bootstrap: None,
                id,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut sim = Simulation {
        config,
        server,
        slots,
        loads: 0,
        max_loads: args.max_loads,
        init_tx,
        fatal_tx,
    };
    info!(
        target = "follow_sim",
        participants = args.participants,
        origin = %args.origin,
        "starting race"
    );

    for index in 0..sim.slots.len() {
        sim.load(index).await?;
    }
    let settle = Duration::from_millis(args.settle_ms);
    settle_room(&mut sim, &mut loads_rx, &mut init_rx, &mut fatal_rx, settle).await?;
    sim.report()?;

    if let Some(path) = &args.navigate {
        let target = args
            .origin
            .join(path)
            .with_context(|| format!("resolving navigation target {path}"))?;
        println!("p0 browses to {target}");
        *sim.slots[0].document.location.lock() = target.to_string();
        sim.load(0).await?;
        settle_room(&mut sim, &mut loads_rx, &mut init_rx, &mut fatal_rx, settle).await?;
        sim.report()?;
    }
    sim.shutdown().await
}

async fn settle_room(
    sim: &mut Simulation,
    loads_rx: &mut mpsc::UnboundedReceiver<usize>,
    init_rx: &mut mpsc::UnboundedReceiver<(usize, Result<(), FollowError>)>,
    fatal_rx: &mut mpsc::UnboundedReceiver<(String, FatalError)>,
    settle: Duration,
) -> Result<()> {
    loop {
        tokio::select! {
            Some(index) = loads_rx.recv() => sim.load(index).await?,
            Some((index, result)) = init_rx.recv() => {
                let id = &sim.slots[index].id;
                result.with_context(|| format!("{id} failed to initialize"))?;
                debug!(target = "follow_sim", participant = %id, "bootstrap finished");
            }
            Some((id, err)) = fatal_rx.recv() => {
                bail!("{id} hit a fatal listener error: {err}");
            }
            _ = tokio::time::sleep(settle) => return Ok(()),
        }
    }
}

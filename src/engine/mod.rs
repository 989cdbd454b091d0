mod error;
mod mutations;
mod queries;
mod store;
mod validate;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::policy::CompatibilityPolicy;
use crate::wal::Wal;

use store::apply_to_floor;

pub type SharedFloorState = Arc<RwLock<FloorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Blocks for the first append, drains whatever else is already
/// queued, then makes the whole batch durable with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One parking lot: its spot inventory, split per floor, and the WAL that
/// makes it durable.
///
/// Lock order: `bulk` first, then floor locks in ascending floor number.
pub struct Engine {
    pub(super) floors: DashMap<u32, SharedFloorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) policy: Arc<CompatibilityPolicy>,
    /// Held by inventory-wide operations (clear, insert, seed, compact).
    pub(super) bulk: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: Arc<CompatibilityPolicy>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            floors: DashMap::new(),
            wal_tx,
            policy,
            bulk: Mutex::new(()),
        };

        // Nothing else holds these locks yet. Lots are opened from async code,
        // so blocking_write is off the table.
        for event in &events {
            for floor in engine.floors_touched(event) {
                let fs = engine.floor_or_create(floor);
                let Ok(mut guard) = fs.try_write() else {
                    return Err(io::Error::other(format!("floor {floor} locked during replay")));
                };
                apply_to_floor(&mut guard, event);
            }
        }

        Ok(engine)
    }

    /// Floors an event applies to, creating none.
    fn floors_touched(&self, event: &Event) -> Vec<u32> {
        match event {
            Event::InventoryCleared => self.floor_ids(),
            Event::SpotsInserted { spots } => spot_floors(spots),
            Event::InventoryReset { spots } => {
                let mut floors = self.floor_ids();
                floors.extend(spot_floors(spots));
                floors.sort_unstable();
                floors.dedup();
                floors
            }
            Event::SpotSaved { spot } => vec![spot.floor],
        }
    }

    pub(super) fn floor_or_create(&self, floor: u32) -> SharedFloorState {
        self.floors
            .entry(floor)
            .or_insert_with(|| Arc::new(RwLock::new(FloorState::new(floor))))
            .value()
            .clone()
    }

    /// Send an event to the group-commit writer and wait until it is durable.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Make the event durable, then apply it to every floor the caller has locked.
    pub(super) async fn persist_and_apply(
        &self,
        guards: &mut [OwnedRwLockWriteGuard<FloorState>],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for guard in guards.iter_mut() {
            apply_to_floor(guard, event);
        }
        Ok(())
    }

    /// Write-lock the given floors in ascending order.
    pub(super) async fn lock_floors(
        &self,
        floors: &[u32],
    ) -> Vec<OwnedRwLockWriteGuard<FloorState>> {
        let mut sorted = floors.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for floor in sorted {
            if let Some(fs) = self.get_floor(floor) {
                guards.push(fs.write_owned().await);
            }
        }
        guards
    }
}

/// Distinct floors of `spots`, ascending.
pub(super) fn spot_floors(spots: &[SpotRecord]) -> Vec<u32> {
    let mut floors: Vec<u32> = spots.iter().map(|s| s.floor).collect();
    floors.sort_unstable();
    floors.dedup();
    floors
}

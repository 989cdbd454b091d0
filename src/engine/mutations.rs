use std::collections::HashSet;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;
use crate::seed::Layout;

use super::validate::{validate_park, validate_plate, validate_spot};
use super::{spot_floors, Engine, EngineError, WalCommand};

impl Engine {
    /// Assign a free, size-compatible spot on `floor` to the vehicle.
    ///
    /// Find and mark happen under the floor's write lock, so concurrent parks
    /// never receive the same spot.
    pub async fn park(
        &self,
        vehicle_type: &str,
        floor: u32,
        plate_number: &str,
    ) -> Result<SpotRecord, EngineError> {
        validate_park(vehicle_type, floor, plate_number)?;
        let filter = SpotFilter::new()
            .floor(floor)
            .spot_types(self.policy.allowed_spot_types(vehicle_type))
            .occupied(false);

        let fs = self
            .get_floor(floor)
            .ok_or(EngineError::NoAvailableSpot { floor })?;
        let mut guard = fs.write_owned().await;
        let pos = guard
            .position(&filter)
            .ok_or(EngineError::NoAvailableSpot { floor })?;

        let mut spot = guard.spots[pos].clone();
        spot.occupy(Vehicle {
            vehicle_type: vehicle_type.to_string(),
            plate_number: plate_number.to_string(),
        });
        let event = Event::SpotSaved { spot: spot.clone() };
        self.persist_and_apply(std::slice::from_mut(&mut guard), &event)
            .await?;
        debug!(
            "parked {vehicle_type} {plate_number} on floor {floor} spot {}",
            spot.spot_number
        );
        Ok(spot)
    }

    /// Free the first occupied spot (lowest floor, then spot number) holding
    /// `plate_number`. Returns the freed record and the vehicle that left it.
    pub async fn unpark(&self, plate_number: &str) -> Result<(SpotRecord, Vehicle), EngineError> {
        validate_plate(plate_number)?;
        let filter = SpotFilter::new().occupied(true).plate_number(plate_number);

        for floor in self.floor_ids() {
            let Some(fs) = self.get_floor(floor) else {
                continue;
            };
            let mut guard = fs.write_owned().await;
            let Some(pos) = guard.position(&filter) else {
                continue;
            };

            let mut spot = guard.spots[pos].clone();
            let Some(vehicle) = spot.release() else {
                continue;
            };
            let event = Event::SpotSaved { spot: spot.clone() };
            self.persist_and_apply(std::slice::from_mut(&mut guard), &event)
                .await?;
            debug!("unparked {plate_number} from floor {floor} spot {}", spot.spot_number);
            return Ok((spot, vehicle));
        }

        Err(EngineError::NotFound(plate_number.to_string()))
    }

    /// Persist a mutated record. The spot must already exist.
    pub async fn save(&self, spot: SpotRecord) -> Result<(), EngineError> {
        validate_spot(&spot)?;
        let unknown = EngineError::UnknownSpot {
            floor: spot.floor,
            spot_number: spot.spot_number,
        };
        let Some(fs) = self.get_floor(spot.floor) else {
            return Err(unknown);
        };
        let mut guard = fs.write_owned().await;
        if guard.get_mut(spot.spot_number).is_none() {
            return Err(unknown);
        }
        let event = Event::SpotSaved { spot };
        self.persist_and_apply(std::slice::from_mut(&mut guard), &event)
            .await
    }

    /// Drop every spot in the lot.
    pub async fn delete_all(&self) -> Result<(), EngineError> {
        let _bulk = self.bulk.lock().await;
        self.clear_inventory().await
    }

    /// Add spots. All-or-nothing: a duplicate `(floor, spot_number)`, either
    /// against the lot or within the batch, rejects the whole batch.
    pub async fn insert_many(&self, spots: Vec<SpotRecord>) -> Result<usize, EngineError> {
        let _bulk = self.bulk.lock().await;
        self.insert_spots(spots).await
    }

    /// Replace the whole inventory with a freshly built, all-free layout.
    ///
    /// Logged as one `InventoryReset`, so replay sees either the old
    /// inventory or the new one.
    pub async fn seed_inventory(&self, layout: &Layout) -> Result<usize, EngineError> {
        let _bulk = self.bulk.lock().await;
        let spots = layout.spots();
        check_batch(&spots)?;

        let mut floors = self.floor_ids();
        for floor in spot_floors(&spots) {
            self.floor_or_create(floor);
            floors.push(floor);
        }
        let mut guards = self.lock_floors(&floors).await;

        let count = spots.len();
        self.persist_and_apply(&mut guards, &Event::InventoryReset { spots })
            .await?;
        info!(
            "seeded {count} spots: {} floors x {} spots",
            layout.floors, layout.spots_per_floor
        );
        Ok(count)
    }

    // Callers hold `bulk`.
    async fn clear_inventory(&self) -> Result<(), EngineError> {
        let mut guards = self.lock_floors(&self.floor_ids()).await;
        self.persist_and_apply(&mut guards, &Event::InventoryCleared)
            .await
    }

    // Callers hold `bulk`.
    async fn insert_spots(&self, spots: Vec<SpotRecord>) -> Result<usize, EngineError> {
        if spots.is_empty() {
            return Ok(0);
        }
        check_batch(&spots)?;

        let floors = spot_floors(&spots);
        for &floor in &floors {
            self.floor_or_create(floor);
        }
        let mut guards = self.lock_floors(&floors).await;

        if let Some(spot) = spots.iter().find(|s| occupies_slot(&guards, s)) {
            return Err(EngineError::DuplicateSpot {
                floor: spot.floor,
                spot_number: spot.spot_number,
            });
        }

        let count = spots.len();
        let event = Event::SpotsInserted { spots };
        self.persist_and_apply(&mut guards, &event).await?;
        Ok(count)
    }

    /// Rewrite the WAL with one insert per current spot.
    ///
    /// Read locks on every floor are held until the writer has swapped files,
    /// so no save can land in the old log after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _bulk = self.bulk.lock().await;
        let mut guards = Vec::new();
        for floor in self.floor_ids() {
            if let Some(fs) = self.get_floor(floor) {
                guards.push(fs.read_owned().await);
            }
        }

        let spots: Vec<SpotRecord> = guards
            .iter()
            .flat_map(|g| g.spots.iter().cloned())
            .collect();
        let events = if spots.is_empty() {
            Vec::new()
        } else {
            vec![Event::SpotsInserted { spots }]
        };

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Size limit, per-spot validity and no repeated `(floor, spot_number)`.
fn check_batch(spots: &[SpotRecord]) -> Result<(), EngineError> {
    if spots.len() > MAX_SPOTS_PER_INSERT {
        return Err(EngineError::LimitExceeded("too many spots in one insert"));
    }
    let mut seen = HashSet::with_capacity(spots.len());
    for spot in spots {
        validate_spot(spot)?;
        if !seen.insert(spot.key()) {
            return Err(EngineError::DuplicateSpot {
                floor: spot.floor,
                spot_number: spot.spot_number,
            });
        }
    }
    Ok(())
}

fn occupies_slot(guards: &[OwnedRwLockWriteGuard<FloorState>], spot: &SpotRecord) -> bool {
    guards
        .iter()
        .find(|g| g.floor == spot.floor)
        .is_some_and(|g| {
            g.spots
                .binary_search_by_key(&spot.spot_number, |s| s.spot_number)
                .is_ok()
        })
}

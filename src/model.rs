use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Size class of a physical spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpotType {
    Motorcycle,
    Compact,
    Large,
}

impl SpotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotType::Motorcycle => "motorcycle",
            SpotType::Compact => "compact",
            SpotType::Large => "large",
        }
    }
}

impl fmt::Display for SpotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motorcycle" => Ok(SpotType::Motorcycle),
            "compact" => Ok(SpotType::Compact),
            "large" => Ok(SpotType::Large),
            other => Err(format!("unknown spot type: {other}")),
        }
    }
}

/// The vehicle currently assigned to a spot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_type: String,
    pub plate_number: String,
}

/// One physical parking spot and its occupancy.
///
/// `vehicle` is `Some` exactly when `is_occupied` is true. Mutate occupancy
/// only through [`SpotRecord::occupy`] and [`SpotRecord::release`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub id: Ulid,
    pub floor: u32,
    pub spot_number: u32,
    pub spot_type: SpotType,
    pub is_occupied: bool,
    pub vehicle: Option<Vehicle>,
}

impl SpotRecord {
    /// A fresh, unoccupied spot.
    pub fn new(floor: u32, spot_number: u32, spot_type: SpotType) -> Self {
        Self {
            id: Ulid::new(),
            floor,
            spot_number,
            spot_type,
            is_occupied: false,
            vehicle: None,
        }
    }

    pub fn occupy(&mut self, vehicle: Vehicle) {
        self.is_occupied = true;
        self.vehicle = Some(vehicle);
    }

    /// Free the spot, returning the vehicle that held it.
    pub fn release(&mut self) -> Option<Vehicle> {
        self.is_occupied = false;
        self.vehicle.take()
    }

    pub fn plate_number(&self) -> Option<&str> {
        self.vehicle.as_ref().map(|v| v.plate_number.as_str())
    }

    pub fn key(&self) -> SpotKey {
        SpotKey {
            floor: self.floor,
            spot_number: self.spot_number,
        }
    }
}

/// Natural key of a spot: unique across a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpotKey {
    pub floor: u32,
    pub spot_number: u32,
}

/// All spots on one floor, sorted by `spot_number`.
#[derive(Debug, Clone)]
pub struct FloorState {
    pub floor: u32,
    pub spots: Vec<SpotRecord>,
}

impl FloorState {
    pub fn new(floor: u32) -> Self {
        Self {
            floor,
            spots: Vec::new(),
        }
    }

    /// Insert a spot keeping sort order. Returns false if the number is taken.
    pub fn insert_spot(&mut self, spot: SpotRecord) -> bool {
        match self
            .spots
            .binary_search_by_key(&spot.spot_number, |s| s.spot_number)
        {
            Ok(_) => false,
            Err(pos) => {
                self.spots.insert(pos, spot);
                true
            }
        }
    }

    pub fn get_mut(&mut self, spot_number: u32) -> Option<&mut SpotRecord> {
        let pos = self
            .spots
            .binary_search_by_key(&spot_number, |s| s.spot_number)
            .ok()?;
        Some(&mut self.spots[pos])
    }

    /// Replace the stored record with the same spot number.
    pub fn replace(&mut self, spot: SpotRecord) -> bool {
        match self.get_mut(spot.spot_number) {
            Some(slot) => {
                *slot = spot;
                true
            }
            None => false,
        }
    }

    /// Position of the first spot matching `filter`, in spot-number order.
    pub fn position(&self, filter: &SpotFilter) -> Option<usize> {
        self.spots.iter().position(|s| filter.matches(s))
    }

    pub fn available(&self) -> usize {
        self.spots.iter().filter(|s| !s.is_occupied).count()
    }
}

/// Equality/membership predicate over spot records.
///
/// Unset fields match everything. An empty `spot_types` set matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotFilter {
    pub floor: Option<u32>,
    pub spot_types: Option<Vec<SpotType>>,
    pub is_occupied: Option<bool>,
    pub plate_number: Option<String>,
}

impl SpotFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn floor(mut self, floor: u32) -> Self {
        self.floor = Some(floor);
        self
    }

    pub fn spot_types(mut self, types: &[SpotType]) -> Self {
        self.spot_types = Some(types.to_vec());
        self
    }

    pub fn occupied(mut self, occupied: bool) -> Self {
        self.is_occupied = Some(occupied);
        self
    }

    pub fn plate_number(mut self, plate: impl Into<String>) -> Self {
        self.plate_number = Some(plate.into());
        self
    }

    pub fn matches(&self, spot: &SpotRecord) -> bool {
        if self.floor.is_some_and(|f| f != spot.floor) {
            return false;
        }
        if let Some(types) = &self.spot_types
            && !types.contains(&spot.spot_type)
        {
            return false;
        }
        if self.is_occupied.is_some_and(|o| o != spot.is_occupied) {
            return false;
        }
        if let Some(plate) = &self.plate_number
            && spot.plate_number() != Some(plate.as_str())
        {
            return false;
        }
        true
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    InventoryCleared,
    SpotsInserted { spots: Vec<SpotRecord> },
    /// Clear plus insert as a single record, so a reseed is never half applied.
    InventoryReset { spots: Vec<SpotRecord> },
    SpotSaved { spot: SpotRecord },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorSummary {
    pub floor: u32,
    pub total: usize,
    pub available: usize,
}

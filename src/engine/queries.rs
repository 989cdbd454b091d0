use crate::model::*;
use crate::policy::CompatibilityPolicy;

use super::{Engine, SharedFloorState};

impl Engine {
    pub fn policy(&self) -> &CompatibilityPolicy {
        &self.policy
    }

    pub fn get_floor(&self, floor: u32) -> Option<SharedFloorState> {
        self.floors.get(&floor).map(|e| e.value().clone())
    }

    /// Known floor numbers, ascending. Includes floors emptied by a clear.
    pub fn floor_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.floors.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Floors the filter can match, ascending.
    fn candidate_floors(&self, filter: &SpotFilter) -> Vec<u32> {
        match filter.floor {
            Some(floor) => vec![floor],
            None => self.floor_ids(),
        }
    }

    /// First matching record in storage order (floor, then spot number).
    pub async fn find_one(&self, filter: &SpotFilter) -> Option<SpotRecord> {
        for floor in self.candidate_floors(filter) {
            let Some(fs) = self.get_floor(floor) else {
                continue;
            };
            let guard = fs.read().await;
            if let Some(pos) = guard.position(filter) {
                return Some(guard.spots[pos].clone());
            }
        }
        None
    }

    pub async fn find(&self, filter: &SpotFilter) -> Vec<SpotRecord> {
        let mut out = Vec::new();
        for floor in self.candidate_floors(filter) {
            let Some(fs) = self.get_floor(floor) else {
                continue;
            };
            let guard = fs.read().await;
            out.extend(guard.spots.iter().filter(|s| filter.matches(s)).cloned());
        }
        out
    }

    pub async fn find_all(&self) -> Vec<SpotRecord> {
        self.find(&SpotFilter::new()).await
    }

    /// Total and free spot counts for every floor that has spots.
    pub async fn floor_summaries(&self) -> Vec<FloorSummary> {
        let mut out = Vec::new();
        for floor in self.floor_ids() {
            let Some(fs) = self.get_floor(floor) else {
                continue;
            };
            let guard = fs.read().await;
            if guard.spots.is_empty() {
                continue;
            }
            out.push(FloorSummary {
                floor,
                total: guard.spots.len(),
                available: guard.available(),
            });
        }
        out
    }

    pub async fn spot_count(&self) -> usize {
        let mut total = 0;
        for floor in self.floor_ids() {
            if let Some(fs) = self.get_floor(floor) {
                total += fs.read().await.spots.len();
            }
        }
        total
    }
}

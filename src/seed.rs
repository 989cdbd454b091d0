use crate::model::{SpotRecord, SpotType};

/// Floor/spot layout used to (re)build a lot's inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub floors: u32,
    pub spots_per_floor: u32,
    /// Spots `1..=motorcycle_last` are motorcycle spots.
    pub motorcycle_last: u32,
    /// Spots `motorcycle_last+1..=compact_last` are compact; the rest are large.
    pub compact_last: u32,
}

/// 5 floors × 24 spots: 1–8 motorcycle, 9–20 compact, 21–24 large.
pub const CANONICAL_LAYOUT: Layout = Layout {
    floors: 5,
    spots_per_floor: 24,
    motorcycle_last: 8,
    compact_last: 20,
};

impl Layout {
    pub fn spot_type(&self, spot_number: u32) -> SpotType {
        if spot_number <= self.motorcycle_last {
            SpotType::Motorcycle
        } else if spot_number <= self.compact_last {
            SpotType::Compact
        } else {
            SpotType::Large
        }
    }

    pub fn total_spots(&self) -> usize {
        (self.floors as usize) * (self.spots_per_floor as usize)
    }

    /// Every spot of the layout, free, ordered by floor then spot number.
    pub fn spots(&self) -> Vec<SpotRecord> {
        let mut spots = Vec::with_capacity(self.total_spots());
        for floor in 1..=self.floors {
            for n in 1..=self.spots_per_floor {
                spots.push(SpotRecord::new(floor, n, self.spot_type(n)));
            }
        }
        spots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_has_120_free_spots() {
        let spots = CANONICAL_LAYOUT.spots();
        assert_eq!(spots.len(), 120);
        assert!(spots.iter().all(|s| !s.is_occupied && s.vehicle.is_none()));
        for floor in 1..=5 {
            assert_eq!(spots.iter().filter(|s| s.floor == floor).count(), 24);
        }
    }

    #[test]
    fn canonical_type_bands() {
        for s in CANONICAL_LAYOUT.spots() {
            let expected = match s.spot_number {
                1..=8 => SpotType::Motorcycle,
                9..=20 => SpotType::Compact,
                21..=24 => SpotType::Large,
                n => panic!("unexpected spot number {n}"),
            };
            assert_eq!(s.spot_type, expected);
        }
    }

    #[test]
    fn ids_are_distinct() {
        let spots = CANONICAL_LAYOUT.spots();
        let mut ids: Vec<_> = spots.iter().map(|s| s.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), spots.len());
    }
}

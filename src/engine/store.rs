use crate::model::*;

/// Apply the part of `event` that concerns `fs`. The caller holds the floor's
/// write lock (or owns it outright during replay).
pub(super) fn apply_to_floor(fs: &mut FloorState, event: &Event) {
    match event {
        Event::InventoryCleared => fs.spots.clear(),
        Event::SpotsInserted { spots } => insert_own(fs, spots),
        Event::InventoryReset { spots } => {
            fs.spots.clear();
            insert_own(fs, spots);
        }
        Event::SpotSaved { spot } if spot.floor == fs.floor => {
            fs.replace(spot.clone());
        }
        Event::SpotSaved { .. } => {}
    }
}

fn insert_own(fs: &mut FloorState, spots: &[SpotRecord]) {
    let floor = fs.floor;
    for spot in spots.iter().filter(|s| s.floor == floor) {
        fs.insert_spot(spot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_only_touches_own_floor() {
        let mut fs = FloorState::new(2);
        let event = Event::SpotsInserted {
            spots: vec![
                SpotRecord::new(1, 1, SpotType::Motorcycle),
                SpotRecord::new(2, 1, SpotType::Motorcycle),
                SpotRecord::new(2, 9, SpotType::Compact),
            ],
        };
        apply_to_floor(&mut fs, &event);
        assert_eq!(fs.spots.len(), 2);
        assert!(fs.spots.iter().all(|s| s.floor == 2));
    }

    #[test]
    fn saved_spot_replaces_in_place() {
        let mut fs = FloorState::new(1);
        let spot = SpotRecord::new(1, 21, SpotType::Large);
        apply_to_floor(
            &mut fs,
            &Event::SpotsInserted {
                spots: vec![spot.clone()],
            },
        );

        let mut occupied = spot.clone();
        occupied.occupy(Vehicle {
            vehicle_type: "bus".into(),
            plate_number: "XYZ123".into(),
        });
        apply_to_floor(&mut fs, &Event::SpotSaved { spot: occupied.clone() });
        assert_eq!(fs.spots, vec![occupied]);

        // A save for another floor is ignored.
        let other = SpotRecord::new(3, 21, SpotType::Large);
        apply_to_floor(&mut fs, &Event::SpotSaved { spot: other });
        assert_eq!(fs.spots.len(), 1);
        assert!(fs.spots[0].is_occupied);
    }

    #[test]
    fn clear_empties_floor() {
        let mut fs = FloorState::new(1);
        fs.insert_spot(SpotRecord::new(1, 1, SpotType::Motorcycle));
        apply_to_floor(&mut fs, &Event::InventoryCleared);
        assert!(fs.spots.is_empty());
    }

    #[test]
    fn reset_replaces_floor_contents() {
        let mut fs = FloorState::new(1);
        let mut old = SpotRecord::new(1, 1, SpotType::Motorcycle);
        old.occupy(Vehicle {
            vehicle_type: "motorcycle".into(),
            plate_number: "OLD".into(),
        });
        fs.insert_spot(old);
        fs.insert_spot(SpotRecord::new(1, 30, SpotType::Large));

        let fresh = vec![
            SpotRecord::new(1, 1, SpotType::Motorcycle),
            SpotRecord::new(1, 2, SpotType::Compact),
            SpotRecord::new(2, 1, SpotType::Motorcycle),
        ];
        apply_to_floor(&mut fs, &Event::InventoryReset { spots: fresh });

        let numbers: Vec<u32> = fs.spots.iter().map(|s| s.spot_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(fs.spots.iter().all(|s| !s.is_occupied && s.floor == 1));
    }
}

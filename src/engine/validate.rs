use crate::limits::*;
use crate::model::SpotRecord;

use super::EngineError;

pub(crate) fn validate_park(
    vehicle_type: &str,
    floor: u32,
    plate_number: &str,
) -> Result<(), EngineError> {
    if vehicle_type.is_empty() {
        return Err(EngineError::Validation("vehicle_type is required"));
    }
    if floor == 0 {
        return Err(EngineError::Validation("floor is required"));
    }
    validate_plate(plate_number)?;
    if vehicle_type.len() > MAX_VEHICLE_TYPE_LEN {
        return Err(EngineError::LimitExceeded("vehicle type too long"));
    }
    Ok(())
}

pub(crate) fn validate_plate(plate_number: &str) -> Result<(), EngineError> {
    if plate_number.is_empty() {
        return Err(EngineError::Validation("plate_number is required"));
    }
    if plate_number.len() > MAX_PLATE_LEN {
        return Err(EngineError::LimitExceeded("plate number too long"));
    }
    Ok(())
}

pub(crate) fn validate_spot(spot: &SpotRecord) -> Result<(), EngineError> {
    if spot.floor == 0 || spot.floor > MAX_FLOORS {
        return Err(EngineError::LimitExceeded("floor out of range"));
    }
    if spot.spot_number == 0 || spot.spot_number > MAX_SPOTS_PER_FLOOR {
        return Err(EngineError::LimitExceeded("spot number out of range"));
    }
    if spot.is_occupied != spot.vehicle.is_some() {
        return Err(EngineError::Validation("vehicle must be set exactly when occupied"));
    }
    Ok(())
}

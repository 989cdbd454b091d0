//! Hard limits applied at the engine and lot boundaries.

pub const MAX_LOTS: usize = 1024;
pub const MAX_LOT_NAME_LEN: usize = 256;

pub const MAX_FLOORS: u32 = 1_000;
pub const MAX_SPOTS_PER_FLOOR: u32 = 10_000;
pub const MAX_SPOTS_PER_INSERT: usize = 100_000;

pub const MAX_PLATE_LEN: usize = 32;
pub const MAX_VEHICLE_TYPE_LEN: usize = 32;

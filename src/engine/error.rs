#[derive(Debug)]
pub enum EngineError {
    /// A required field is missing or empty.
    Validation(&'static str),
    NoAvailableSpot { floor: u32 },
    /// No occupied spot holds this plate.
    NotFound(String),
    UnknownSpot { floor: u32, spot_number: u32 },
    DuplicateSpot { floor: u32, spot_number: u32 },
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "missing fields: {msg}"),
            EngineError::NoAvailableSpot { floor } => {
                write!(f, "no available spot on this floor (floor {floor})")
            }
            EngineError::NotFound(plate) => write!(f, "car not found: {plate}"),
            EngineError::UnknownSpot { floor, spot_number } => {
                write!(f, "no spot #{spot_number} on floor #{floor}")
            }
            EngineError::DuplicateSpot { floor, spot_number } => {
                write!(f, "spot #{spot_number} on floor #{floor} already exists")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

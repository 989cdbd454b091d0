use std::collections::HashMap;

use crate::model::SpotType;

/// Which spot size classes each vehicle class may occupy.
///
/// Built once at startup and shared by every lot. The per-vehicle lists are
/// ordered smallest first, but allocation treats them as a set: the first free
/// spot in storage order wins regardless of its position in the list.
#[derive(Debug, Clone)]
pub struct CompatibilityPolicy {
    allowed: HashMap<String, Vec<SpotType>>,
}

impl CompatibilityPolicy {
    pub fn standard() -> Self {
        let mut allowed = HashMap::new();
        allowed.insert(
            "motorcycle".to_string(),
            vec![SpotType::Motorcycle, SpotType::Compact, SpotType::Large],
        );
        allowed.insert("car".to_string(), vec![SpotType::Compact, SpotType::Large]);
        allowed.insert("bus".to_string(), vec![SpotType::Large]);
        Self { allowed }
    }

    /// Spot types a vehicle may park in. Unknown vehicle types get none.
    pub fn allowed_spot_types(&self, vehicle_type: &str) -> &[SpotType] {
        self.allowed
            .get(vehicle_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn vehicle_types(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }
}

impl Default for CompatibilityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

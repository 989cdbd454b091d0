use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::policy::CompatibilityPolicy;

/// Opens one engine per parking lot. A lot is the database name of the
/// pgwire connection; each has its own inventory, WAL file and compactor.
pub struct LotManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    policy: Arc<CompatibilityPolicy>,
}

impl LotManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, policy: Arc<CompatibilityPolicy>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            policy,
        }
    }

    /// Get the lot's engine, opening (and replaying) it on first use.
    ///
    /// Lots are keyed by their file name, so names that sanitize alike
    /// (`north.lot`, `northlot`) share one engine rather than one WAL.
    pub fn get_or_open(&self, lot: &str) -> std::io::Result<Arc<Engine>> {
        if lot.len() > MAX_LOT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "lot name too long",
            ));
        }
        let key = file_stem(lot);
        if key.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty lot name",
            ));
        }
        if let Some(engine) = self.engines.get(&key) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_LOTS {
            return Err(std::io::Error::other("too many lots"));
        }

        // Two connections may race to open the same lot; only one engine wins.
        let engine = match self.engines.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{}.wal", slot.key()));
                let engine = Arc::new(Engine::new(wal_path, self.policy.clone())?);
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!("opened lot {lot}");
        metrics::gauge!(crate::observability::LOTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

/// Lot names become file names: keep alphanumerics, `_` and `-`.
fn file_stem(lot: &str) -> String {
    lot.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::CANONICAL_LAYOUT;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_lots").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> LotManager {
        LotManager::new(dir, 1000, Arc::new(CompatibilityPolicy::standard()))
    }

    #[tokio::test]
    async fn lots_are_isolated() {
        let lots = manager(test_data_dir("isolation"));
        let north = lots.get_or_open("north").unwrap();
        let south = lots.get_or_open("south").unwrap();

        north.seed_inventory(&CANONICAL_LAYOUT).await.unwrap();
        north.park("car", 1, "ISO1").await.unwrap();

        assert!(south.find_all().await.is_empty());
        assert!(south.park("car", 1, "ISO2").await.is_err());
        assert!(south.unpark("ISO1").await.is_err());
    }

    #[tokio::test]
    async fn opening_creates_wal_file() {
        let dir = test_data_dir("lazy");
        let lots = manager(dir.clone());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _engine = lots.get_or_open("garage_a").unwrap();
        assert!(dir.join("garage_a.wal").exists());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let lots = manager(test_data_dir("same"));
        let a = lots.get_or_open("lot").unwrap();
        let b = lots.get_or_open("lot").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn lot_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let lots = manager(dir.clone());

        let _engine = lots.get_or_open("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        assert!(lots.get_or_open("../..").is_err());
    }

    #[tokio::test]
    async fn names_sharing_a_file_share_one_engine() {
        let dir = test_data_dir("shared_stem");
        {
            let lots = manager(dir.clone());
            let dotted = lots.get_or_open("north.lot").unwrap();
            let plain = lots.get_or_open("northlot").unwrap();
            assert!(Arc::ptr_eq(&dotted, &plain));

            dotted.seed_inventory(&CANONICAL_LAYOUT).await.unwrap();
            dotted.park("bus", 1, "ONLY_ONE").await.unwrap();
            assert_eq!(plain.find_all().await.len(), 120);
        }
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

        let lots = manager(dir);
        let reopened = lots.get_or_open("northlot").unwrap();
        let (spot, _) = reopened.unpark("ONLY_ONE").await.unwrap();
        assert_eq!((spot.floor, spot.spot_number), (1, 21));
        assert!(reopened.unpark("ONLY_ONE").await.is_err());
    }

    #[tokio::test]
    async fn lot_name_too_long() {
        let lots = manager(test_data_dir("too_long"));
        let err = lots
            .get_or_open(&"x".repeat(MAX_LOT_NAME_LEN + 1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("lot name too long"));
    }

    #[tokio::test]
    async fn lot_count_limit() {
        let lots = manager(test_data_dir("count_limit"));
        for i in 0..MAX_LOTS {
            lots.get_or_open(&format!("l{i}")).unwrap();
        }
        let err = lots.get_or_open("one_more").err().unwrap();
        assert!(err.to_string().contains("too many lots"));
    }

    #[tokio::test]
    async fn reopened_lot_replays_wal() {
        let dir = test_data_dir("reopen");
        {
            let lots = manager(dir.clone());
            let engine = lots.get_or_open("main").unwrap();
            engine.seed_inventory(&CANONICAL_LAYOUT).await.unwrap();
            engine.park("motorcycle", 4, "MOTO").await.unwrap();
        }

        let lots = manager(dir);
        let engine = lots.get_or_open("main").unwrap();
        assert_eq!(engine.find_all().await.len(), 120);
        let (spot, vehicle) = engine.unpark("MOTO").await.unwrap();
        assert_eq!(spot.floor, 4);
        assert_eq!(vehicle.vehicle_type, "motorcycle");
    }
}

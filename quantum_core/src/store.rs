//! Durable slot for the local debt value.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;

/// Key under which the debt value is stored.
pub const DEBT_KEY: &str = "quantumDebt";

/// Trait for the persistence collaborator.
///
/// Implementations must be thread-safe. A value that was never written
/// reads back as `None`.
pub trait DebtStore: Send + Sync {
    fn read_debt(&self) -> Result<Option<f64>, StoreError>;
    fn write_debt(&self, value: f64) -> Result<(), StoreError>;
}

/// Volatile store, for tests, simulation and `--ephemeral` peers.
#[derive(Debug, Default)]
pub struct MemoryDebtStore {
    slot: Mutex<Option<f64>>,
}

impl MemoryDebtStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `value`.
    pub fn with_value(value: f64) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }
}

impl DebtStore for MemoryDebtStore {
    fn read_debt(&self) -> Result<Option<f64>, StoreError> {
        Ok(*self.slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_debt(&self, value: f64) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }
}

/// Sled-based persistent debt store
///
/// The value is kept as its decimal text so the slot stays readable with
/// any key-value browser.
pub struct SledDebtStore {
    db: sled::Db,
}

impl SledDebtStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Open(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()
            .map_err(|e| StoreError::Open(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Writes raw bytes into the slot (test hook for corrupt values).
    #[cfg(test)]
    fn write_raw(&self, bytes: &[u8]) {
        self.db.insert(DEBT_KEY, bytes).unwrap();
    }
}

impl DebtStore for SledDebtStore {
    fn read_debt(&self) -> Result<Option<f64>, StoreError> {
        let Some(raw) = self.db.get(DEBT_KEY)
            .map_err(|e| StoreError::Read(e.to_string()))?
        else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&raw)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        text.trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{:?}: {}", text, e)))
    }

    fn write_debt(&self, value: f64) -> Result<(), StoreError> {
        self.db.insert(DEBT_KEY, value.to_string().as_bytes())
            .map_err(|e| StoreError::Write(format!("Insert failed: {}", e)))?;
        self.db.flush()
            .map_err(|e| StoreError::Write(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_starts_empty() {
        let store = MemoryDebtStore::new();
        assert_eq!(store.read_debt().unwrap(), None);
        store.write_debt(42.5).unwrap();
        assert_eq!(store.read_debt().unwrap(), Some(42.5));
    }

    #[test]
    fn test_sled_store_round_trips_fractional_values() {
        let store = SledDebtStore::open_temp().unwrap();
        assert_eq!(store.read_debt().unwrap(), None);

        store.write_debt(99.9).unwrap();
        assert_eq!(store.read_debt().unwrap(), Some(99.9));
    }

    #[test]
    fn test_sled_store_reports_corrupt_values() {
        let store = SledDebtStore::open_temp().unwrap();
        store.write_raw(b"lots");
        assert!(matches!(store.read_debt(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_sled_store_accepts_legacy_integer_text() {
        let store = SledDebtStore::open_temp().unwrap();
        store.write_raw(b"85");
        assert_eq!(store.read_debt().unwrap(), Some(85.0));
    }
}

//! Consumed-capacity accounting.
//!
//! Every store call reports the read/write units it consumed per table. A
//! [`CapacityAccumulator`] is created per request (or per transaction) and passed
//! explicitly; it is cheap to clone and safe to share between tasks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Bytes covered by one read unit.
pub const READ_UNIT_BYTES: usize = 4 * 1024;
/// Bytes covered by one write unit.
pub const WRITE_UNIT_BYTES: usize = 1024;

/// How a call was issued; transactional calls cost double.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Standard,
    Transactional,
}

impl AccessMode {
    fn multiplier(self) -> f64 {
        match self {
            Self::Standard => 1.0,
            Self::Transactional => 2.0,
        }
    }
}

/// Read units for reading `size` bytes (minimum one unit).
pub fn read_units(size: usize, mode: AccessMode) -> f64 {
    size.div_ceil(READ_UNIT_BYTES).max(1) as f64 * mode.multiplier()
}

/// Write units for writing `size` bytes (minimum one unit).
pub fn write_units(size: usize, mode: AccessMode) -> f64 {
    size.div_ceil(WRITE_UNIT_BYTES).max(1) as f64 * mode.multiplier()
}

/// Units consumed against a single table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumedCapacity {
    pub table: String,
    pub read_units: f64,
    pub write_units: f64,
}

impl ConsumedCapacity {
    pub fn read(table: impl Into<String>, units: f64) -> Self {
        Self {
            table: table.into(),
            read_units: units,
            write_units: 0.0,
        }
    }

    pub fn write(table: impl Into<String>, units: f64) -> Self {
        Self {
            table: table.into(),
            read_units: 0.0,
            write_units: units,
        }
    }

    pub fn total_units(&self) -> f64 {
        self.read_units + self.write_units
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Units {
    read: f64,
    write: f64,
}

/// Thread-safe per-table aggregator.
#[derive(Debug, Clone, Default)]
pub struct CapacityAccumulator {
    inner: Arc<Mutex<BTreeMap<String, Units>>>,
}

impl CapacityAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, capacity: &ConsumedCapacity) {
        let mut tables = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tables.entry(capacity.table.clone()).or_default();
        entry.read += capacity.read_units;
        entry.write += capacity.write_units;
    }

    pub fn extend<'a>(&self, capacities: impl IntoIterator<Item = &'a ConsumedCapacity>) {
        for capacity in capacities {
            self.add(capacity);
        }
    }

    /// Fold another accumulator's totals into this one.
    pub fn merge(&self, other: &CapacityAccumulator) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return;
        }
        self.extend(&other.snapshot());
    }

    /// Per-table totals, ordered by table name.
    pub fn snapshot(&self) -> Vec<ConsumedCapacity> {
        let tables = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        tables
            .iter()
            .map(|(table, units)| ConsumedCapacity {
                table: table.clone(),
                read_units: units.read,
                write_units: units.write,
            })
            .collect()
    }

    pub fn table(&self, table: &str) -> Option<ConsumedCapacity> {
        self.snapshot().into_iter().find(|c| c.table == table)
    }

    /// Sum over all tables as `(read, write)`.
    pub fn totals(&self) -> (f64, f64) {
        self.snapshot()
            .iter()
            .fold((0.0, 0.0), |(r, w), c| (r + c.read_units, w + c.write_units))
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_rounding() {
        assert_eq!(read_units(0, AccessMode::Standard), 1.0);
        assert_eq!(read_units(4096, AccessMode::Standard), 1.0);
        assert_eq!(read_units(4097, AccessMode::Standard), 2.0);
        assert_eq!(write_units(1500, AccessMode::Transactional), 4.0);
    }

    #[test]
    fn test_accumulates_per_table() {
        let acc = CapacityAccumulator::new();
        acc.add(&ConsumedCapacity::read("ceremonies", 1.0));
        acc.add(&ConsumedCapacity::write("ceremonies", 2.0));
        acc.add(&ConsumedCapacity::write("users", 2.0));

        let ceremonies = acc.table("ceremonies").unwrap();
        assert_eq!(ceremonies.read_units, 1.0);
        assert_eq!(ceremonies.write_units, 2.0);
        assert_eq!(acc.totals(), (1.0, 4.0));
    }

    #[test]
    fn test_merge_is_not_doubled_for_shared_accumulator() {
        let acc = CapacityAccumulator::new();
        acc.add(&ConsumedCapacity::read("users", 1.0));
        let alias = acc.clone();
        acc.merge(&alias);
        assert_eq!(acc.totals(), (1.0, 0.0));

        let other = CapacityAccumulator::new();
        other.add(&ConsumedCapacity::read("users", 3.0));
        acc.merge(&other);
        assert_eq!(acc.totals(), (4.0, 0.0));
    }

    #[test]
    fn test_concurrent_adds() {
        let acc = CapacityAccumulator::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let acc = acc.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        acc.add(&ConsumedCapacity::write("credentials", 1.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(acc.totals(), (0.0, 800.0));
    }
}

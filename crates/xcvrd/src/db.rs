//! State database interface.
//!
//! Each port publishes one identity row and one DOM row keyed by its
//! external id, and reads its administrative settings from a config row.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Serialize;

use crate::attributes::FieldValues;
use crate::error::DatabaseError;
use crate::inventory::MAX_LANES;
use crate::tables::fields;

/// Administrative settings for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdminConfig {
    pub hw_enable: bool,
    pub split: bool,
    pub hw_enable_subport: [bool; MAX_LANES as usize],
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            hw_enable: true,
            split: false,
            hw_enable_subport: [true; MAX_LANES as usize],
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "enable" | "up" => Some(true),
        "false" | "0" | "disable" | "down" => Some(false),
        _ => None,
    }
}

impl AdminConfig {
    /// Builds settings from a config row; missing or malformed fields keep
    /// their defaults.
    pub fn from_fields(values: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = values.get(fields::HW_ENABLE).and_then(|v| parse_bool(v)) {
            config.hw_enable = v;
        }
        if let Some(v) = values.get(fields::SPLIT).and_then(|v| parse_bool(v)) {
            config.split = v;
        }
        if let Some(list) = values.get(fields::HW_ENABLE_SUBPORT) {
            for (slot, value) in config.hw_enable_subport.iter_mut().zip(list.split(',')) {
                if let Some(v) = parse_bool(value) {
                    *slot = v;
                }
            }
        }
        config
    }

    /// Config row fields for these settings.
    pub fn to_fields(&self) -> FieldValues {
        let subports = self
            .hw_enable_subport
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            (fields::HW_ENABLE.to_string(), self.hw_enable.to_string()),
            (fields::SPLIT.to_string(), self.split.to_string()),
            (fields::HW_ENABLE_SUBPORT.to_string(), subports),
        ]
    }

    /// Whether `lane` carries traffic. Subport enables count only when split.
    pub fn lane_enabled(&self, lane: usize) -> bool {
        if !self.hw_enable {
            return false;
        }
        if self.split {
            self.hw_enable_subport.get(lane).copied().unwrap_or(false)
        } else {
            true
        }
    }

    /// Bit per lane, set for lanes whose transmitter should be disabled.
    pub fn tx_disable_mask(&self, lanes: usize) -> u8 {
        (0..lanes)
            .filter(|&lane| !self.lane_enabled(lane))
            .fold(0, |mask, lane| mask | (1 << lane))
    }
}

/// State database operations used by the driver.
#[async_trait]
pub trait StateDatabase: Send {
    /// Replaces the identity and DOM rows of `external_id`.
    async fn write_record(
        &mut self,
        external_id: &str,
        attributes: &FieldValues,
        dom: &FieldValues,
    ) -> Result<(), DatabaseError>;

    /// Removes both rows of `external_id`.
    async fn clear_record(&mut self, external_id: &str) -> Result<(), DatabaseError>;

    /// Settings row for `external_id`, `None` when not configured.
    async fn read_admin_config(
        &mut self,
        external_id: &str,
    ) -> Result<Option<AdminConfig>, DatabaseError>;
}

/// Stored rows of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub info: BTreeMap<String, String>,
    pub dom: BTreeMap<String, String>,
}

/// A confirmed database operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbOp {
    Write(String),
    Clear(String),
}

/// Process-local database.
///
/// Records every confirmed operation. Can be switched unavailable to make
/// every call fail.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    records: BTreeMap<String, StoredRecord>,
    admin: HashMap<String, AdminConfig>,
    log: Vec<DbOp>,
    unavailable: bool,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    pub fn set_admin_config(&mut self, external_id: impl Into<String>, config: AdminConfig) {
        self.admin.insert(external_id.into(), config);
    }

    pub fn remove_admin_config(&mut self, external_id: &str) {
        self.admin.remove(external_id);
    }

    /// Seeds a row, as if left behind by an earlier process.
    pub fn insert_record(&mut self, external_id: impl Into<String>, record: StoredRecord) {
        self.records.insert(external_id.into(), record);
    }

    pub fn record(&self, external_id: &str) -> Option<&StoredRecord> {
        self.records.get(external_id)
    }

    pub fn records(&self) -> &BTreeMap<String, StoredRecord> {
        &self.records
    }

    pub fn log(&self) -> &[DbOp] {
        &self.log
    }

    /// Returns and forgets the operation log.
    pub fn take_log(&mut self) -> Vec<DbOp> {
        std::mem::take(&mut self.log)
    }

    /// Confirmed writes of `external_id`.
    pub fn writes_for(&self, external_id: &str) -> usize {
        self.count(|op| matches!(op, DbOp::Write(id) if id == external_id))
    }

    /// Confirmed clears of `external_id`.
    pub fn clears_for(&self, external_id: &str) -> usize {
        self.count(|op| matches!(op, DbOp::Clear(id) if id == external_id))
    }

    fn count(&self, matches: impl Fn(&DbOp) -> bool) -> usize {
        self.log.iter().filter(|op| matches(op)).count()
    }

    fn check_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable {
            return Err(DatabaseError::Unavailable(
                "in-memory database switched off".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_map(values: &FieldValues) -> BTreeMap<String, String> {
    values.iter().cloned().collect()
}

#[async_trait]
impl StateDatabase for InMemoryDatabase {
    async fn write_record(
        &mut self,
        external_id: &str,
        attributes: &FieldValues,
        dom: &FieldValues,
    ) -> Result<(), DatabaseError> {
        self.check_available()?;
        self.records.insert(
            external_id.to_string(),
            StoredRecord {
                info: to_map(attributes),
                dom: to_map(dom),
            },
        );
        self.log.push(DbOp::Write(external_id.to_string()));
        Ok(())
    }

    async fn clear_record(&mut self, external_id: &str) -> Result<(), DatabaseError> {
        self.check_available()?;
        self.records.remove(external_id);
        self.log.push(DbOp::Clear(external_id.to_string()));
        Ok(())
    }

    async fn read_admin_config(
        &mut self,
        external_id: &str,
    ) -> Result<Option<AdminConfig>, DatabaseError> {
        self.check_available()?;
        Ok(self.admin.get(external_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_admin_config_from_fields() {
        let config = AdminConfig::from_fields(&row(&[
            ("hw_enable", "true"),
            ("split", "true"),
            ("hw_enable_subport", "true,false,true,true"),
        ]));
        assert!(config.hw_enable);
        assert!(config.split);
        assert_eq!(config.hw_enable_subport, [true, false, true, true]);
        assert_eq!(config.tx_disable_mask(4), 0b0010);
    }

    #[test]
    fn test_admin_config_defaults() {
        let config = AdminConfig::from_fields(&row(&[("hw_enable", "bogus")]));
        assert_eq!(config, AdminConfig::default());
        assert_eq!(config.tx_disable_mask(4), 0);
    }

    #[test]
    fn test_subports_ignored_unless_split() {
        let config = AdminConfig {
            hw_enable: true,
            split: false,
            hw_enable_subport: [true, false, false, false],
        };
        assert!(config.lane_enabled(1));
        assert_eq!(config.tx_disable_mask(4), 0);

        let disabled = AdminConfig {
            hw_enable: false,
            ..config
        };
        assert_eq!(disabled.tx_disable_mask(4), 0b1111);
        assert_eq!(disabled.tx_disable_mask(1), 0b0001);
    }

    #[test]
    fn test_fields_round_trip() {
        let config = AdminConfig {
            hw_enable: false,
            split: true,
            hw_enable_subport: [false, true, true, false],
        };
        let values: HashMap<String, String> = config.to_fields().into_iter().collect();
        assert_eq!(AdminConfig::from_fields(&values), config);
    }

    #[tokio::test]
    async fn test_in_memory_write_and_clear() {
        let mut db = InMemoryDatabase::new();
        let attrs = vec![("vendor_name".to_string(), "ACME".to_string())];
        db.write_record("Ethernet0", &attrs, &Vec::new()).await.unwrap();
        assert_eq!(db.record("Ethernet0").unwrap().info["vendor_name"], "ACME");

        db.clear_record("Ethernet0").await.unwrap();
        assert!(db.record("Ethernet0").is_none());
        assert_eq!(db.writes_for("Ethernet0"), 1);
        assert_eq!(db.clears_for("Ethernet0"), 1);
    }

    #[tokio::test]
    async fn test_in_memory_unavailable() {
        let mut db = InMemoryDatabase::new();
        db.set_unavailable(true);
        assert!(db.clear_record("Ethernet0").await.is_err());
        assert!(db.read_admin_config("Ethernet0").await.is_err());
        assert!(db.log().is_empty());

        db.set_unavailable(false);
        assert_eq!(db.read_admin_config("Ethernet0").await.unwrap(), None);
    }
}

//! Port registry.
//!
//! Owns one [`PortRecord`] per inventory port, keyed by
//! `(subsystem, instance)`. Records persist across reloads; removed ports
//! leave their row ids queued for a clearing write until the database
//! confirms it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::inventory::{validate_inventory, PortDescriptor, PortKey};
use crate::port::{PortDump, PortRecord};

/// Counts from one reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub retired: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: BTreeMap<PortKey, PortRecord>,
    /// Row ids whose records are gone but whose rows may remain
    retired: BTreeSet<String>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for a validated inventory.
    pub fn from_inventory(inventory: &[PortDescriptor]) -> Result<Self> {
        validate_inventory(inventory)?;
        let mut registry = Self::new();
        registry.allocate(inventory);
        Ok(registry)
    }

    /// Creates records for ports not yet tracked. Returns how many were
    /// created.
    ///
    /// Persisting ports keep their runtime state; a changed row id replaces
    /// the record.
    pub fn allocate(&mut self, inventory: &[PortDescriptor]) -> usize {
        let mut created = 0;

        for descriptor in inventory {
            let key = descriptor.key();
            let same_row = self
                .ports
                .get(&key)
                .map(|port| port.external_id() == descriptor.external_id());
            match same_row {
                Some(true) => {
                    if let Some(port) = self.ports.get_mut(&key) {
                        if **port.descriptor() != *descriptor {
                            port.replace_descriptor(Arc::new(descriptor.clone()));
                        }
                    }
                }
                Some(false) => {
                    if let Some(old) = self.ports.remove(&key) {
                        info!(port = %key, "xcvrd: row id changed, replacing record");
                        self.retire(old);
                    }
                    self.insert(descriptor);
                    created += 1;
                }
                None => {
                    self.insert(descriptor);
                    created += 1;
                }
            }
        }

        created
    }

    fn insert(&mut self, descriptor: &PortDescriptor) {
        let record = PortRecord::new(Arc::new(descriptor.clone()));
        // The new record starts dirty and rewrites its row
        self.retired.remove(record.external_id());
        self.ports.insert(record.key().clone(), record);
    }

    fn retire(&mut self, record: PortRecord) {
        self.retired.extend(record.row_ids());
    }

    /// Retires records whose ports left the inventory. Returns how many.
    pub fn reconcile(&mut self, inventory: &[PortDescriptor]) -> usize {
        let wanted: BTreeSet<PortKey> = inventory.iter().map(PortDescriptor::key).collect();
        let gone: Vec<PortKey> = self
            .ports
            .keys()
            .filter(|key| !wanted.contains(*key))
            .cloned()
            .collect();

        for key in &gone {
            if let Some(record) = self.ports.remove(key) {
                info!(port = %key, "xcvrd: port removed from inventory");
                self.retire(record);
            }
        }
        gone.len()
    }

    /// Validates, then allocates and reconciles. A rejected inventory leaves
    /// the registry untouched.
    pub fn reload(&mut self, inventory: &[PortDescriptor]) -> Result<ReloadSummary> {
        validate_inventory(inventory)?;
        let added = self.allocate(inventory);
        let retired = self.reconcile(inventory);
        self.release_reclaimed();
        Ok(ReloadSummary {
            added,
            retired,
            total: self.ports.len(),
        })
    }

    pub fn get(&self, key: &PortKey) -> Option<&PortRecord> {
        self.ports.get(key)
    }

    pub fn get_mut(&mut self, key: &PortKey) -> Option<&mut PortRecord> {
        self.ports.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &PortRecord> {
        self.ports.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PortRecord> {
        self.ports.values_mut()
    }

    /// Row ids still owed a clearing write.
    pub fn retired(&self) -> impl Iterator<Item = &String> {
        self.retired.iter()
    }

    pub(crate) fn confirm_retired(&mut self, id: &str) {
        self.retired.remove(id);
    }

    /// Drops queued clears for row ids a live record publishes again.
    ///
    /// A live record always starts its rows dirty, so its first write
    /// replaces whatever the retired record left behind.
    pub(crate) fn release_reclaimed(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        let live: BTreeSet<&str> = self
            .ports
            .values()
            .flat_map(|port| {
                std::iter::once(port.external_id()).chain(port.lanes.iter().map(|l| l.id.as_str()))
            })
            .collect();
        self.retired.retain(|id| !live.contains(id.as_str()));
    }

    /// JSON view of one port.
    pub fn dump(&self, key: &PortKey) -> Result<Option<String>> {
        self.ports
            .get(key)
            .map(|port| serde_json::to_string_pretty(&port.dump()))
            .transpose()
            .map_err(Into::into)
    }

    /// JSON view of every port plus pending clears.
    pub fn dump_all(&self) -> Result<String> {
        #[derive(serde::Serialize)]
        struct RegistryDump {
            ports: Vec<PortDump>,
            retired: Vec<String>,
        }

        let dump = RegistryDump {
            ports: self.ports.values().map(PortRecord::dump).collect(),
            retired: self.retired.iter().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&dump)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Field;
    use crate::error::XcvrdError;

    fn port(instance: &str, external_id: &str) -> PortDescriptor {
        PortDescriptor {
            subsystem: "base".to_string(),
            instance: instance.to_string(),
            external_id: Some(external_id.to_string()),
            bus_address: format!("bus{}", instance),
            module_family: "SFP_PLUS".to_string(),
            lane_count: 1,
            split_capable: false,
        }
    }

    #[test]
    fn test_allocate_once() {
        let inventory = vec![port("1", "Ethernet0"), port("2", "Ethernet4")];
        let mut registry = PortRegistry::from_inventory(&inventory).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.allocate(&inventory), 0);
    }

    #[test]
    fn test_persisting_record_keeps_state() {
        let inventory = vec![port("1", "Ethernet0")];
        let mut registry = PortRegistry::from_inventory(&inventory).unwrap();
        let key = PortKey::new("base", "1");
        registry
            .get_mut(&key)
            .unwrap()
            .attributes
            .set(Field::VendorName, "ACME");

        let mut updated = inventory.clone();
        updated[0].bus_address = "moved".to_string();
        let summary = registry.reload(&updated).unwrap();
        assert_eq!(summary.added, 0);

        let record = registry.get(&key).unwrap();
        assert_eq!(record.attributes.get(Field::VendorName), Some("ACME"));
        assert_eq!(record.bus_address(), "moved");
    }

    #[test]
    fn test_removed_port_queues_clear() {
        let mut registry =
            PortRegistry::from_inventory(&[port("1", "Ethernet0"), port("2", "Ethernet4")])
                .unwrap();
        let summary = registry.reload(&[port("1", "Ethernet0")]).unwrap();
        assert_eq!(summary.retired, 1);
        assert_eq!(summary.total, 1);
        assert_eq!(registry.retired().collect::<Vec<_>>(), vec!["Ethernet4"]);

        // Re-adding before the clear lands drops the queued clear
        registry
            .reload(&[port("1", "Ethernet0"), port("2", "Ethernet4")])
            .unwrap();
        assert_eq!(registry.retired().count(), 0);
    }

    #[test]
    fn test_external_id_change_replaces_record() {
        let mut registry = PortRegistry::from_inventory(&[port("1", "Ethernet0")]).unwrap();
        let summary = registry.reload(&[port("1", "Ethernet8")]).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(registry.retired().collect::<Vec<_>>(), vec!["Ethernet0"]);
        assert_eq!(
            registry.get(&PortKey::new("base", "1")).unwrap().external_id(),
            "Ethernet8"
        );
    }

    #[test]
    fn test_row_id_moved_to_new_port_is_not_cleared() {
        let mut registry = PortRegistry::from_inventory(&[port("1", "Ethernet0")]).unwrap();
        let summary = registry.reload(&[port("2", "Ethernet0")]).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.retired, 1);
        assert_eq!(registry.retired().count(), 0);
        assert!(registry.get(&PortKey::new("base", "2")).unwrap().is_dirty());
    }

    #[test]
    fn test_reclaimed_lane_row_is_not_cleared() {
        let mut split = port("1", "Ethernet0");
        split.module_family = "QSFP28".to_string();
        split.lane_count = 4;
        split.split_capable = true;
        let mut registry = PortRegistry::from_inventory(&[split.clone()]).unwrap();
        let key = PortKey::new("base", "1");
        let record = registry.get_mut(&key).unwrap();
        record.admin.split = true;
        record.fan_out_lanes();

        let mut moved = split.clone();
        moved.instance = "2".to_string();
        registry.reload(&[moved]).unwrap();
        assert_eq!(registry.retired().count(), 4);

        let record = registry.get_mut(&PortKey::new("base", "2")).unwrap();
        record.admin.split = true;
        record.fan_out_lanes();
        registry.release_reclaimed();
        assert_eq!(registry.retired().count(), 0);
    }

    #[test]
    fn test_conflicting_reload_leaves_registry() {
        let mut registry = PortRegistry::from_inventory(&[port("1", "Ethernet0")]).unwrap();
        let err = registry
            .reload(&[port("2", "Ethernet4"), port("2", "Ethernet8")])
            .unwrap_err();
        assert!(matches!(err, XcvrdError::InventoryConflict { .. }));
        assert!(registry.get(&PortKey::new("base", "1")).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_dump_does_not_mutate() {
        let registry = PortRegistry::from_inventory(&[port("1", "Ethernet0")]).unwrap();
        let key = PortKey::new("base", "1");
        let before = registry.get(&key).unwrap().attributes.clone();

        let json = registry.dump(&key).unwrap().unwrap();
        assert!(json.contains("\"external_id\": \"Ethernet0\""));
        assert!(registry.dump(&PortKey::new("base", "9")).unwrap().is_none());
        assert!(registry.dump_all().unwrap().contains("retired"));
        assert_eq!(registry.get(&key).unwrap().attributes, before);
    }
}

//! Per-port runtime record.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::attributes::{AttributeSet, Field};
use crate::db::AdminConfig;
use crate::dom::DomReading;
use crate::error::ParseError;
use crate::inventory::{PortDescriptor, PortKey};
use crate::module_fsm::ModuleState;
use crate::pages::{ModuleFamily, RawPages};
use crate::parser::NormalizedAttributes;

/// One breakout lane of a split port, published as its own row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneRecord {
    /// Row id, `<external_id>-<lane+1>`
    pub id: String,
    pub lane: usize,
    pub attributes: AttributeSet,
}

impl LaneRecord {
    fn new(external_id: &str, lane: usize) -> Self {
        Self {
            id: lane_row_id(external_id, lane),
            lane,
            attributes: AttributeSet::unpublished(),
        }
    }
}

pub fn lane_row_id(external_id: &str, lane: usize) -> String {
    format!("{}-{}", external_id, lane + 1)
}

/// Runtime state of one inventory port.
#[derive(Debug)]
pub struct PortRecord {
    key: PortKey,
    external_id: String,
    descriptor: Arc<PortDescriptor>,

    pub state: ModuleState,
    pub present: bool,
    pub admin: AdminConfig,
    pub optical: bool,
    pub retry_count: u32,
    pub retry_deadline: Option<Instant>,
    /// DOM collection pursued; only ever set while `optical`
    pub a2_read_requested: bool,
    /// Identification gave up on the current insertion
    pub insertion_failed: bool,
    pub last_error: Option<String>,

    pub raw: RawPages,
    pub attributes: AttributeSet,
    pub lanes: Vec<LaneRecord>,

    pub(crate) identity: Option<NormalizedAttributes>,
    pub(crate) last_dom: Option<DomReading>,
    /// TX disable mask last confirmed written to the module
    pub(crate) applied_tx_disable: Option<u8>,
    /// Lane rows dropped by an unsplit, still owed a clearing write
    pub(crate) pending_lane_clears: Vec<String>,
}

impl PortRecord {
    pub fn new(descriptor: Arc<PortDescriptor>) -> Self {
        let family = ModuleFamily::from_hint(&descriptor.module_family).ok();
        Self {
            key: descriptor.key(),
            external_id: descriptor.external_id().to_string(),
            descriptor,
            state: ModuleState::Absent,
            present: false,
            admin: AdminConfig::default(),
            optical: false,
            retry_count: 0,
            retry_deadline: None,
            a2_read_requested: false,
            insertion_failed: false,
            last_error: None,
            raw: RawPages::for_family(family),
            attributes: AttributeSet::unpublished(),
            lanes: Vec::new(),
            identity: None,
            last_dom: None,
            applied_tx_disable: None,
            pending_lane_clears: Vec::new(),
        }
    }

    pub fn key(&self) -> &PortKey {
        &self.key
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn descriptor(&self) -> &Arc<PortDescriptor> {
        &self.descriptor
    }

    /// Swaps in an updated descriptor with the same row id.
    pub(crate) fn replace_descriptor(&mut self, descriptor: Arc<PortDescriptor>) {
        if descriptor.module_family != self.descriptor.module_family {
            let family = ModuleFamily::from_hint(&descriptor.module_family).ok();
            self.raw = RawPages::for_family(family);
            // Force a fresh identification under the new layout
            self.forget_module();
            self.state = ModuleState::Absent;
            self.present = false;
        }
        self.descriptor = descriptor;
    }

    pub fn family(&self) -> Result<ModuleFamily, ParseError> {
        ModuleFamily::from_hint(&self.descriptor.module_family)
    }

    pub fn bus_address(&self) -> &str {
        &self.descriptor.bus_address
    }

    pub fn identity(&self) -> Option<&NormalizedAttributes> {
        self.identity.as_ref()
    }

    /// True while this record or any of its lane rows owes a write.
    pub fn is_dirty(&self) -> bool {
        self.attributes.is_dirty()
            || self.lanes.iter().any(|l| l.attributes.is_dirty())
            || !self.pending_lane_clears.is_empty()
    }

    /// Every row id this record may have published.
    pub fn row_ids(&self) -> Vec<String> {
        let mut ids = vec![self.external_id.clone()];
        ids.extend(self.lanes.iter().map(|l| l.id.clone()));
        ids.extend(self.pending_lane_clears.iter().cloned());
        ids
    }

    /// Drops module-derived state, keeping admin settings and lane enables.
    pub(crate) fn forget_module(&mut self) {
        self.optical = false;
        self.a2_read_requested = false;
        self.retry_count = 0;
        self.retry_deadline = None;
        self.identity = None;
        self.last_dom = None;
        self.applied_tx_disable = None;
        self.raw.clear();
        self.attributes.retain(|f| !f.is_derived());
    }

    /// Module pulled: everything derived goes and the row is rewritten.
    pub(crate) fn mark_removed(&mut self) {
        self.forget_module();
        self.state = ModuleState::Absent;
        self.present = false;
        self.insertion_failed = false;
        self.last_error = None;
        self.attributes.mark_dirty();
    }

    /// Lanes this port should publish under the current settings.
    fn desired_lanes(&self) -> usize {
        let lanes = usize::from(self.descriptor.lane_count);
        if self.admin.split && self.descriptor.split_capable && lanes > 1 {
            lanes
        } else {
            0
        }
    }

    /// Brings lane rows in line with the split setting and module state.
    pub fn fan_out_lanes(&mut self) {
        let desired = self.desired_lanes();

        if self.lanes.len() > desired {
            let dropped = self.lanes.split_off(desired);
            self.pending_lane_clears
                .extend(dropped.into_iter().map(|l| l.id));
        }
        for lane in self.lanes.len()..desired {
            let record = LaneRecord::new(&self.external_id, lane);
            self.pending_lane_clears.retain(|id| *id != record.id);
            self.lanes.push(record);
        }

        let lane_count = self.lanes.len().max(1) as u32;
        let lane_speed = self
            .identity
            .as_ref()
            .and_then(NormalizedAttributes::max_speed)
            .map(|speed| speed / lane_count);
        let ready = self.state == ModuleState::Ready;

        for lane in &mut self.lanes {
            let enabled = self.admin.lane_enabled(lane.lane);
            let set = &mut lane.attributes;
            set.set(Field::HwEnable, if enabled { "true" } else { "false" });

            if !ready {
                set.retain(|f| !f.is_derived());
                continue;
            }
            set.set_opt(Field::LaneSpeed, lane_speed);

            match self.last_dom.as_ref().and_then(|d| d.lanes.get(lane.lane)) {
                Some(dom) => {
                    set.set(Field::TxBias, &dom.tx_bias);
                    set.set(Field::TxPower, &dom.tx_power);
                    set.set(Field::RxPower, &dom.rx_power);
                    set.set(Field::TxBiasAlarm, dom.tx_bias_alarm);
                    set.set(Field::TxPowerAlarm, dom.tx_power_alarm);
                    set.set(Field::RxPowerAlarm, dom.rx_power_alarm);
                }
                None => {
                    set.retain(|f| !f.is_dom());
                }
            }
        }
    }

    /// Serializable snapshot; does not touch state.
    pub fn dump(&self) -> PortDump {
        PortDump {
            key: self.key.to_string(),
            external_id: self.external_id.clone(),
            bus_address: self.descriptor.bus_address.clone(),
            module_family: self.descriptor.module_family.clone(),
            state: self.state,
            present: self.present,
            admin: self.admin,
            optical: self.optical,
            a2_read_requested: self.a2_read_requested,
            retry_count: self.retry_count,
            insertion_failed: self.insertion_failed,
            last_error: self.last_error.clone(),
            dirty: self.is_dirty(),
            attributes: self.attributes.to_map(),
            upper_pages: self
                .raw
                .upper
                .iter()
                .map(|(page, slot)| (*page, slot.is_some()))
                .collect(),
            lanes: self
                .lanes
                .iter()
                .map(|l| LaneDump {
                    id: l.id.clone(),
                    dirty: l.attributes.is_dirty(),
                    attributes: l.attributes.to_map(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneDump {
    pub id: String,
    pub dirty: bool,
    pub attributes: BTreeMap<String, String>,
}

/// Debug view of a port record.
#[derive(Debug, Clone, Serialize)]
pub struct PortDump {
    pub key: String,
    pub external_id: String,
    pub bus_address: String,
    pub module_family: String,
    pub state: ModuleState,
    pub present: bool,
    pub admin: AdminConfig,
    pub optical: bool,
    pub a2_read_requested: bool,
    pub retry_count: u32,
    pub insertion_failed: bool,
    pub last_error: Option<String>,
    pub dirty: bool,
    pub attributes: BTreeMap<String, String>,
    /// Upper page number to whether its last read succeeded
    pub upper_pages: BTreeMap<u8, bool>,
    pub lanes: Vec<LaneDump>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(split_capable: bool) -> Arc<PortDescriptor> {
        Arc::new(PortDescriptor {
            subsystem: "base".to_string(),
            instance: "1".to_string(),
            external_id: Some("Ethernet0".to_string()),
            bus_address: "bus0".to_string(),
            module_family: "QSFP28".to_string(),
            lane_count: 4,
            split_capable,
        })
    }

    #[test]
    fn test_new_record_is_unpublished() {
        let port = PortRecord::new(descriptor(false));
        assert_eq!(port.state, ModuleState::Absent);
        assert!(port.attributes.is_dirty());
        assert_eq!(port.raw.upper.len(), 1);
        assert_eq!(port.external_id(), "Ethernet0");
    }

    #[test]
    fn test_lane_fan_out_and_unsplit() {
        let mut port = PortRecord::new(descriptor(true));
        port.admin.split = true;
        port.fan_out_lanes();
        assert_eq!(port.lanes.len(), 4);
        assert_eq!(port.lanes[3].id, "Ethernet0-4");
        assert_eq!(port.lanes[0].attributes.get(Field::HwEnable), Some("true"));

        port.admin.split = false;
        port.fan_out_lanes();
        assert!(port.lanes.is_empty());
        assert_eq!(port.pending_lane_clears.len(), 4);
        assert!(port.is_dirty());

        // Re-split before the clears land
        port.admin.split = true;
        port.fan_out_lanes();
        assert!(port.pending_lane_clears.is_empty());
    }

    #[test]
    fn test_split_ignored_without_capability() {
        let mut port = PortRecord::new(descriptor(false));
        port.admin.split = true;
        port.fan_out_lanes();
        assert!(port.lanes.is_empty());
    }

    #[test]
    fn test_mark_removed_forces_dirty() {
        let mut port = PortRecord::new(descriptor(false));
        port.attributes.set(Field::VendorName, "ACME");
        port.attributes.mark_clean();
        port.present = true;
        port.state = ModuleState::Ready;

        port.mark_removed();
        assert!(port.attributes.is_empty());
        assert!(port.attributes.is_dirty());
        assert!(!port.present);
    }

    #[test]
    fn test_dump_reports_pending_lane_clears() {
        let mut port = PortRecord::new(descriptor(true));
        port.attributes.mark_clean();
        port.admin.split = true;
        port.fan_out_lanes();
        for lane in &mut port.lanes {
            lane.attributes.mark_clean();
        }
        assert!(!port.dump().dirty);

        port.admin.split = false;
        port.fan_out_lanes();
        assert!(!port.attributes.is_dirty());
        assert!(port.dump().dirty);
    }

    #[test]
    fn test_dump_serializes() {
        let port = PortRecord::new(descriptor(false));
        let json = serde_json::to_value(port.dump()).unwrap();
        assert_eq!(json["state"], "absent");
        assert_eq!(json["key"], "base/1");
        assert_eq!(json["upper_pages"]["3"], false);
    }
}

//! Change-tracked attribute set.
//!
//! Every published value goes through [`AttributeSet::set`] or
//! [`AttributeSet::clear`], which compare against the stored value of that
//! one field and raise the dirty flag only on an actual change. The driver
//! writes a row only while it is dirty and lowers the flag only after the
//! database confirms the write, so write volume follows changed fields, not
//! polled fields.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::dom::{format_decimal, DomQuantity};

/// Key-value tuple representing a field and its value.
pub type FieldValue = (String, String);

/// Collection of field-value pairs for a table row.
pub type FieldValues = Vec<FieldValue>;

/// A published attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Connector,
    ConnectorStatus,
    SupportedSpeeds,
    MaxSpeed,
    PowerMode,
    VendorName,
    VendorOui,
    VendorPartNumber,
    VendorRevision,
    VendorSerialNumber,
    CableTechnology,
    CableLength,
    /// Alarm threshold from QSFP upper page 03h
    Threshold { quantity: DomQuantity, high: bool },
    /// Identification page, text encoded
    A0,
    /// QSFP lower page, text encoded
    A0Lower,
    /// SFP diagnostic page, text encoded
    A2,
    /// QSFP upper page by number, text encoded
    A0Upper(u8),
    DomReadStatus,
    ModuleError,
    /// Lane rows only
    HwEnable,
    /// Lane rows only
    LaneSpeed,
    Temperature,
    Voltage,
    TxBias,
    TxPower,
    RxPower,
    TempAlarm,
    VoltageAlarm,
    TxBiasAlarm,
    TxPowerAlarm,
    RxPowerAlarm,
}

impl Field {
    /// Database field name.
    pub fn name(&self) -> Cow<'static, str> {
        let name = match self {
            Field::Connector => "connector",
            Field::ConnectorStatus => "connector_status",
            Field::SupportedSpeeds => "supported_speeds",
            Field::MaxSpeed => "max_speed",
            Field::PowerMode => "power_mode",
            Field::VendorName => "vendor_name",
            Field::VendorOui => "vendor_oui",
            Field::VendorPartNumber => "vendor_part_number",
            Field::VendorRevision => "vendor_revision",
            Field::VendorSerialNumber => "vendor_serial_number",
            Field::CableTechnology => "cable_technology",
            Field::CableLength => "cable_length",
            Field::Threshold { quantity, high } => {
                let bound = if *high { "high" } else { "low" };
                return Cow::Owned(format!("{}_{}_alarm_threshold", quantity.name(), bound));
            }
            Field::A0 => "a0",
            Field::A0Lower => "a0_lower",
            Field::A2 => "a2",
            Field::A0Upper(page) => return Cow::Owned(format!("a0_upper_{}", page)),
            Field::DomReadStatus => "dom_read_status",
            Field::ModuleError => "module_error",
            Field::HwEnable => "hw_enable",
            Field::LaneSpeed => "lane_speed",
            Field::Temperature => "temperature",
            Field::Voltage => "voltage",
            Field::TxBias => "tx_bias",
            Field::TxPower => "tx_power",
            Field::RxPower => "rx_power",
            Field::TempAlarm => "temp_alarm",
            Field::VoltageAlarm => "voltage_alarm",
            Field::TxBiasAlarm => "tx_bias_alarm",
            Field::TxPowerAlarm => "tx_power_alarm",
            Field::RxPowerAlarm => "rx_power_alarm",
        };
        Cow::Borrowed(name)
    }

    /// True for live monitor values published to the DOM table.
    pub fn is_dom(&self) -> bool {
        matches!(
            self,
            Field::Temperature
                | Field::Voltage
                | Field::TxBias
                | Field::TxPower
                | Field::RxPower
                | Field::TempAlarm
                | Field::VoltageAlarm
                | Field::TxBiasAlarm
                | Field::TxPowerAlarm
                | Field::RxPowerAlarm
        )
    }

    /// True for values derived from module memory, as opposed to
    /// configuration echoed back.
    pub fn is_derived(&self) -> bool {
        !matches!(self, Field::HwEnable)
    }
}

/// Conversion of a candidate value into its published text.
pub trait AttrValue {
    fn render(self) -> String;
}

impl AttrValue for String {
    fn render(self) -> String {
        self
    }
}

impl AttrValue for &String {
    fn render(self) -> String {
        self.clone()
    }
}

impl AttrValue for &str {
    fn render(self) -> String {
        self.to_string()
    }
}

impl AttrValue for bool {
    fn render(self) -> String {
        if self { "On" } else { "Off" }.to_string()
    }
}

impl AttrValue for f64 {
    fn render(self) -> String {
        format_decimal(self)
    }
}

macro_rules! impl_attr_value_int {
    ($($t:ty),*) => {
        $(impl AttrValue for $t {
            fn render(self) -> String {
                self.to_string()
            }
        })*
    };
}

impl_attr_value_int!(u8, u16, u32, u64, usize, i32, i64);

/// Published attributes of one database row plus its dirty flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet {
    values: BTreeMap<Field, String>,
    dirty: bool,
}

impl AttributeSet {
    /// Empty, clean set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set for a row whose database state is unknown; the first flush
    /// writes (or clears) it.
    pub fn unpublished() -> Self {
        Self {
            values: BTreeMap::new(),
            dirty: true,
        }
    }

    /// Stores `value` if it differs from the current value.
    ///
    /// Returns true when the set changed.
    pub fn set(&mut self, field: Field, value: impl AttrValue) -> bool {
        let value = value.render();
        if self.values.get(&field) == Some(&value) {
            return false;
        }
        self.values.insert(field, value);
        self.dirty = true;
        true
    }

    /// `set` for `Some`, `clear` for `None`.
    pub fn set_opt<V: AttrValue>(&mut self, field: Field, value: Option<V>) -> bool {
        match value {
            Some(value) => self.set(field, value),
            None => self.clear(field),
        }
    }

    /// Removes `field`; a no-op when it was not set.
    pub fn clear(&mut self, field: Field) -> bool {
        if self.values.remove(&field).is_some() {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Removes every field for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&Field) -> bool) -> bool {
        let before = self.values.len();
        self.values.retain(|field, _| keep(field));
        let changed = self.values.len() != before;
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Removes every field.
    pub fn clear_all(&mut self) -> bool {
        self.retain(|_| false)
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.values.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forces a write on the next flush.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Called once the database has confirmed a write of this set.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Field, &str)> {
        self.values.iter().map(|(f, v)| (f, v.as_str()))
    }

    /// Identity fields as database field-values.
    pub fn info_field_values(&self) -> FieldValues {
        self.field_values(|f| !f.is_dom())
    }

    /// DOM fields as database field-values.
    pub fn dom_field_values(&self) -> FieldValues {
        self.field_values(Field::is_dom)
    }

    fn field_values(&self, include: impl Fn(&Field) -> bool) -> FieldValues {
        self.values
            .iter()
            .filter(|(f, _)| include(f))
            .map(|(f, v)| (f.name().into_owned(), v.clone()))
            .collect()
    }

    /// Field name to value, for dumps.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(f, v)| (f.name().into_owned(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_if_changed() {
        let mut set = AttributeSet::new();
        assert!(!set.is_dirty());

        assert!(set.set(Field::VendorName, "ACME"));
        assert!(set.is_dirty());
        set.mark_clean();

        // Same value again: no change, stays clean
        assert!(!set.set(Field::VendorName, "ACME"));
        assert!(!set.is_dirty());

        assert!(set.set(Field::VendorName, "OTHER"));
        assert!(set.is_dirty());
    }

    #[test]
    fn test_value_sequence_dirty_iff_changed() {
        let sequences: [&[&str]; 3] = [&["a", "a", "a"], &["a", "b", "a"], &["b", "b"]];
        for seq in sequences {
            let mut set = AttributeSet::new();
            set.set(Field::VendorName, "a");
            set.mark_clean();

            let mut differed = false;
            for v in seq {
                differed |= *v != "a";
                set.set(Field::VendorName, *v);
            }
            assert_eq!(set.is_dirty(), differed, "sequence {:?}", seq);
        }
    }

    #[test]
    fn test_clear_absent_is_noop() {
        let mut set = AttributeSet::new();
        assert!(!set.clear(Field::CableLength));
        assert!(!set.is_dirty());

        set.set(Field::CableLength, 3u8);
        set.mark_clean();
        assert!(set.clear(Field::CableLength));
        assert!(set.is_dirty());
    }

    #[test]
    fn test_set_opt() {
        let mut set = AttributeSet::new();
        set.set_opt(Field::PowerMode, Some("low"));
        assert_eq!(set.get(Field::PowerMode), Some("low"));
        set.set_opt::<&str>(Field::PowerMode, None);
        assert!(!set.contains(Field::PowerMode));
    }

    #[test]
    fn test_value_rendering() {
        let mut set = AttributeSet::new();
        set.set(Field::TempAlarm, false);
        set.set(Field::RxPowerAlarm, true);
        set.set(Field::Temperature, 42.5);
        set.set(Field::MaxSpeed, 10_000u32);
        assert_eq!(set.get(Field::TempAlarm), Some("Off"));
        assert_eq!(set.get(Field::RxPowerAlarm), Some("On"));
        assert_eq!(set.get(Field::Temperature), Some("42.50"));
        assert_eq!(set.get(Field::MaxSpeed), Some("10000"));
    }

    #[test]
    fn test_field_names() {
        assert_eq!(Field::A0Upper(3).name(), "a0_upper_3");
        assert_eq!(
            Field::Threshold {
                quantity: DomQuantity::Temperature,
                high: true
            }
            .name(),
            "temperature_high_alarm_threshold"
        );
        assert_eq!(Field::TempAlarm.name(), "temp_alarm");
    }

    #[test]
    fn test_info_dom_partition() {
        let mut set = AttributeSet::new();
        set.set(Field::VendorName, "ACME");
        set.set(Field::Temperature, "42.50");
        assert_eq!(
            set.info_field_values(),
            vec![("vendor_name".to_string(), "ACME".to_string())]
        );
        assert_eq!(
            set.dom_field_values(),
            vec![("temperature".to_string(), "42.50".to_string())]
        );
    }

    #[test]
    fn test_retain_and_clear_all() {
        let mut set = AttributeSet::new();
        set.set(Field::HwEnable, true);
        set.set(Field::TxPower, "1.00");
        set.mark_clean();

        assert!(set.retain(|f| !f.is_derived()));
        assert_eq!(set.len(), 1);
        assert!(set.is_dirty());

        set.mark_clean();
        assert!(set.clear_all());
        assert!(!set.clear_all());
        assert!(set.is_empty());
    }

    #[test]
    fn test_unpublished_starts_dirty() {
        let set = AttributeSet::unpublished();
        assert!(set.is_dirty());
        assert!(set.is_empty());
    }
}

//! Identification page parser.
//!
//! Decodes the serial ID block of SFF-8472 (A0h lower) and SFF-8636 (upper
//! page 00h) into normalized attributes. Both layouts share the offsets used
//! here relative to the start of the 128-byte page.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::attributes::{AttributeSet, Field};
use crate::dom::{parse_thresholds, DomQuantity, Threshold};
use crate::error::ParseError;
use crate::pages::{ModuleFamily, RawPage};

/// Byte offsets within the identification page.
mod offset {
    pub const IDENTIFIER: usize = 0;
    pub const CONNECTOR: usize = 2;
    pub const COMPLIANCE_10G: usize = 3;
    pub const COMPLIANCE_1G: usize = 6;
    pub const SFP_CABLE_TECH: usize = 8;
    pub const NOMINAL_RATE: usize = 12;
    pub const COPPER_LENGTH: usize = 18;
    pub const QSFP_DEVICE_TECH: usize = 19;
    pub const VENDOR_NAME: std::ops::Range<usize> = 20..36;
    pub const VENDOR_OUI: std::ops::Range<usize> = 37..40;
    pub const VENDOR_PN: std::ops::Range<usize> = 40..56;
    pub const SFP_VENDOR_REV: std::ops::Range<usize> = 56..60;
    pub const QSFP_VENDOR_REV: std::ops::Range<usize> = 56..58;
    pub const QSFP_EXT_COMPLIANCE: usize = 64;
    pub const VENDOR_SN: std::ops::Range<usize> = 68..84;
    pub const SFP_DIAG_TYPE: usize = 92;
}

/// Byte offsets within the QSFP lower page.
mod lower_offset {
    pub const STATUS: usize = 2;
    pub const POWER_CONTROL: usize = 93;
}

/// SFF-8024 connector codes.
mod connector {
    pub const SC: u8 = 0x01;
    pub const FC: u8 = 0x04;
    pub const LC: u8 = 0x07;
    pub const MT_RJ: u8 = 0x08;
    pub const MU: u8 = 0x09;
    pub const SG: u8 = 0x0A;
    pub const OPTICAL_PIGTAIL: u8 = 0x0B;
    pub const MPO_1X12: u8 = 0x0C;
    pub const MPO_2X16: u8 = 0x0D;
    pub const COPPER_PIGTAIL: u8 = 0x21;
    pub const RJ45: u8 = 0x22;
    pub const NO_SEPARABLE: u8 = 0x23;
}

/// SFF-8024 extended compliance codes for 100G media.
const EXT_COMPLIANCE_100G: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0B];

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorClass {
    Fiber,
    Copper,
    Rj45,
    Unknown,
}

fn classify_connector(code: u8) -> ConnectorClass {
    match code {
        connector::SC
        | connector::FC
        | connector::LC
        | connector::MT_RJ
        | connector::MU
        | connector::SG
        | connector::OPTICAL_PIGTAIL
        | connector::MPO_1X12
        | connector::MPO_2X16 => ConnectorClass::Fiber,
        connector::COPPER_PIGTAIL | connector::NO_SEPARABLE => ConnectorClass::Copper,
        connector::RJ45 => ConnectorClass::Rj45,
        _ => ConnectorClass::Unknown,
    }
}

/// Whether the module identified itself as the family we expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Supported,
    Unrecognized,
    Unsupported,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Supported => "supported",
            ConnectorStatus::Unrecognized => "unrecognized",
            ConnectorStatus::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CableTechnology {
    Passive,
    Active,
}

impl CableTechnology {
    pub fn as_str(&self) -> &'static str {
        match self {
            CableTechnology::Passive => "passive",
            CableTechnology::Active => "active",
        }
    }
}

/// Copper cable properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CableInfo {
    pub technology: Option<CableTechnology>,
    pub length_m: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VendorInfo {
    pub name: String,
    pub oui: String,
    pub part_number: String,
    pub revision: String,
    pub serial_number: String,
}

/// QSFP power class control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    /// Software override, low power requested
    Low,
    /// Software override, high power allowed
    High,
    /// LPMode pin controls power
    Hardware,
}

impl PowerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerMode::Low => "low",
            PowerMode::High => "high",
            PowerMode::Hardware => "hardware",
        }
    }
}

/// Typed result of parsing an identification page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedAttributes {
    pub family: ModuleFamily,
    pub connector: String,
    pub connector_status: ConnectorStatus,
    pub optical: bool,
    /// Mb/s, ascending
    pub supported_speeds: Vec<u32>,
    pub vendor: VendorInfo,
    /// Copper modules only
    pub cable: Option<CableInfo>,
    pub ddm_supported: bool,
    /// From QSFP upper page 03h, empty when not read
    pub thresholds: Vec<Threshold>,
}

impl NormalizedAttributes {
    pub fn max_speed(&self) -> Option<u32> {
        self.supported_speeds.last().copied()
    }

    pub fn speeds_text(&self) -> Option<String> {
        if self.supported_speeds.is_empty() {
            return None;
        }
        Some(
            self.supported_speeds
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Publishes identity fields; fields this module lacks are cleared.
    pub fn apply_to(&self, set: &mut AttributeSet) {
        set.set(Field::Connector, &self.connector);
        set.set(Field::ConnectorStatus, self.connector_status.as_str());
        set.set_opt(Field::SupportedSpeeds, self.speeds_text());
        set.set_opt(Field::MaxSpeed, self.max_speed());

        set.set(Field::VendorName, &self.vendor.name);
        set.set(Field::VendorOui, &self.vendor.oui);
        set.set(Field::VendorPartNumber, &self.vendor.part_number);
        set.set(Field::VendorRevision, &self.vendor.revision);
        set.set(Field::VendorSerialNumber, &self.vendor.serial_number);

        let technology = self
            .cable
            .as_ref()
            .and_then(|c| c.technology)
            .map(|t| t.as_str());
        set.set_opt(Field::CableTechnology, technology);
        set.set_opt(Field::CableLength, self.cable.as_ref().map(|c| c.length_m));

        for quantity in DomQuantity::ALL {
            let threshold = self.thresholds.iter().find(|t| t.quantity == quantity);
            set.set_opt(
                Field::Threshold {
                    quantity,
                    high: true,
                },
                threshold.map(|t| &t.high_alarm),
            );
            set.set_opt(
                Field::Threshold {
                    quantity,
                    high: false,
                },
                threshold.map(|t| &t.low_alarm),
            );
        }
    }
}

/// Trims a fixed-width ASCII field. Blank, all-zero or non-printable values
/// become `unknown`.
fn ascii_field(bytes: &[u8]) -> String {
    let trimmed = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(&bytes[..0], |end| &bytes[..=end]);

    if trimmed.is_empty() || !trimmed.iter().all(|b| (0x20..0x7f).contains(b)) {
        return UNKNOWN.to_string();
    }
    String::from_utf8_lossy(trimmed).into_owned()
}

fn oui_field(bytes: &[u8]) -> String {
    if bytes.iter().all(|&b| b == 0) {
        return UNKNOWN.to_string();
    }
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn connector_name(family: ModuleFamily, class: ConnectorClass, optical: bool) -> &'static str {
    match (family, class) {
        (_, ConnectorClass::Unknown) => UNKNOWN,
        (ModuleFamily::SfpPlus, ConnectorClass::Rj45) => "SFP_RJ45",
        (ModuleFamily::SfpPlus, _) if optical => "SFP_PLUS",
        (ModuleFamily::SfpPlus, _) => "SFP_DAC",
        (ModuleFamily::QsfpPlus, _) if optical => "QSFP_PLUS",
        (ModuleFamily::QsfpPlus, _) => "QSFP_DAC",
        (ModuleFamily::Qsfp28, _) if optical => "QSFP28",
        (ModuleFamily::Qsfp28, _) => "QSFP28_DAC",
    }
}

fn sfp_speeds(page: &[u8]) -> Vec<u32> {
    let mut speeds = Vec::new();
    if page[offset::COMPLIANCE_1G] & 0x0F != 0 {
        speeds.push(1_000);
    }
    if page[offset::COMPLIANCE_10G] & 0xF0 != 0 {
        speeds.push(10_000);
    }
    if speeds.is_empty() {
        // Units of 100 MBd
        match page[offset::NOMINAL_RATE] {
            rate if rate >= 100 => speeds.push(10_000),
            rate if rate >= 10 => speeds.push(1_000),
            _ => {}
        }
    }
    speeds
}

fn qsfp_speeds(page: &[u8], family: ModuleFamily) -> Vec<u32> {
    let mut speeds = Vec::new();
    if page[offset::COMPLIANCE_10G] & 0x0F != 0 {
        speeds.push(40_000);
    }
    if family == ModuleFamily::Qsfp28
        && EXT_COMPLIANCE_100G.contains(&page[offset::QSFP_EXT_COMPLIANCE])
    {
        speeds.push(100_000);
    }
    speeds
}

fn cable_info(page: &[u8], family: ModuleFamily) -> CableInfo {
    let technology = if family.is_qsfp() {
        match page[offset::QSFP_DEVICE_TECH] >> 4 {
            0xA | 0xB => Some(CableTechnology::Passive),
            0xC..=0xF => Some(CableTechnology::Active),
            _ => None,
        }
    } else {
        let tech = page[offset::SFP_CABLE_TECH];
        if tech & 0x08 != 0 {
            Some(CableTechnology::Active)
        } else if tech & 0x04 != 0 {
            Some(CableTechnology::Passive)
        } else {
            None
        }
    };

    CableInfo {
        technology,
        length_m: page[offset::COPPER_LENGTH],
    }
}

/// Parses an identification page, plus any upper pages read alongside it.
///
/// `upper_pages` maps QSFP upper page numbers to their last read; unread
/// slots are skipped.
pub fn parse_identification(
    id_page: &RawPage,
    upper_pages: &BTreeMap<u8, Option<RawPage>>,
    family: ModuleFamily,
) -> Result<NormalizedAttributes, ParseError> {
    let page = id_page.require_full()?;

    let class = classify_connector(page[offset::CONNECTOR]);
    let optical = if family.is_qsfp() {
        class != ConnectorClass::Unknown && page[offset::QSFP_DEVICE_TECH] >> 4 < 0xA
    } else {
        class == ConnectorClass::Fiber
    };

    let connector_status = if !family.identifiers().contains(&page[offset::IDENTIFIER]) {
        ConnectorStatus::Unsupported
    } else if class == ConnectorClass::Unknown {
        ConnectorStatus::Unrecognized
    } else {
        ConnectorStatus::Supported
    };

    let supported_speeds = if family.is_qsfp() {
        qsfp_speeds(page, family)
    } else {
        sfp_speeds(page)
    };

    let revision = if family.is_qsfp() {
        offset::QSFP_VENDOR_REV
    } else {
        offset::SFP_VENDOR_REV
    };
    let vendor = VendorInfo {
        name: ascii_field(&page[offset::VENDOR_NAME]),
        oui: oui_field(&page[offset::VENDOR_OUI]),
        part_number: ascii_field(&page[offset::VENDOR_PN]),
        revision: ascii_field(&page[revision]),
        serial_number: ascii_field(&page[offset::VENDOR_SN]),
    };

    let cable = (!optical && class != ConnectorClass::Unknown).then(|| cable_info(page, family));

    let ddm_supported = family.is_qsfp() || page[offset::SFP_DIAG_TYPE] & 0x40 != 0;

    let thresholds = match upper_pages.get(&0x03) {
        Some(Some(page)) if family.is_qsfp() => parse_thresholds(page)?,
        _ => Vec::new(),
    };

    Ok(NormalizedAttributes {
        family,
        connector: connector_name(family, class, optical).to_string(),
        connector_status,
        optical,
        supported_speeds,
        vendor,
        cable,
        ddm_supported,
        thresholds,
    })
}

/// True when the QSFP lower page reports flat memory (no upper pages).
pub fn qsfp_flat_memory(lower: &RawPage) -> Result<bool, ParseError> {
    let page = lower.require_full()?;
    Ok(page[lower_offset::STATUS] & 0x04 != 0)
}

/// QSFP power control state from lower page byte 93.
pub fn qsfp_power_mode(lower: &RawPage) -> Result<PowerMode, ParseError> {
    let page = lower.require_full()?;
    let control = page[lower_offset::POWER_CONTROL];
    let mode = match (control & 0x01 != 0, control & 0x02 != 0) {
        (true, true) => PowerMode::Low,
        (true, false) => PowerMode::High,
        (false, _) => PowerMode::Hardware,
    };
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_ascii(page: &mut [u8], range: std::ops::Range<usize>, text: &str) {
        let field = &mut page[range];
        field.fill(b' ');
        field[..text.len()].copy_from_slice(text.as_bytes());
    }

    fn sfp_optical() -> Vec<u8> {
        let mut page = vec![0u8; 128];
        page[0] = 0x03;
        page[2] = connector::LC;
        page[3] = 0x10; // 10GBASE-SR
        page[12] = 0x67;
        write_ascii(&mut page, 20..36, "ACME CORP");
        page[37..40].copy_from_slice(&[0x00, 0x90, 0x65]);
        write_ascii(&mut page, 40..56, "SFP-10G-SR");
        write_ascii(&mut page, 56..60, "A");
        write_ascii(&mut page, 68..84, "SN0001");
        page[92] = 0x68;
        page
    }

    fn no_upper() -> BTreeMap<u8, Option<RawPage>> {
        BTreeMap::new()
    }

    #[test]
    fn test_sfp_optical_identity() {
        let attrs =
            parse_identification(&RawPage::new(sfp_optical()), &no_upper(), ModuleFamily::SfpPlus)
                .unwrap();
        assert_eq!(attrs.connector, "SFP_PLUS");
        assert_eq!(attrs.connector_status, ConnectorStatus::Supported);
        assert!(attrs.optical);
        assert_eq!(attrs.vendor.name, "ACME CORP");
        assert_eq!(attrs.vendor.oui, "00:90:65");
        assert_eq!(attrs.vendor.part_number, "SFP-10G-SR");
        assert_eq!(attrs.vendor.revision, "A");
        assert_eq!(attrs.supported_speeds, vec![10_000]);
        assert_eq!(attrs.max_speed(), Some(10_000));
        assert!(attrs.cable.is_none());
        assert!(attrs.ddm_supported);
    }

    #[test]
    fn test_sfp_dac() {
        let mut page = sfp_optical();
        page[2] = connector::COPPER_PIGTAIL;
        page[3] = 0;
        page[8] = 0x04;
        page[12] = 0x0D;
        page[18] = 3;
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::SfpPlus).unwrap();
        assert_eq!(attrs.connector, "SFP_DAC");
        assert!(!attrs.optical);
        assert_eq!(
            attrs.cable,
            Some(CableInfo {
                technology: Some(CableTechnology::Passive),
                length_m: 3
            })
        );
        assert_eq!(attrs.speeds_text().as_deref(), Some("1000"));
    }

    #[test]
    fn test_sfp_rj45_and_both_speeds() {
        let mut page = sfp_optical();
        page[2] = connector::RJ45;
        page[6] = 0x08; // 1000BASE-T
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::SfpPlus).unwrap();
        assert_eq!(attrs.connector, "SFP_RJ45");
        assert_eq!(attrs.speeds_text().as_deref(), Some("1000,10000"));
    }

    #[test]
    fn test_unknown_connector_and_wrong_identifier() {
        let mut page = sfp_optical();
        page[2] = 0x99;
        let attrs =
            parse_identification(&RawPage::new(page.clone()), &no_upper(), ModuleFamily::SfpPlus)
                .unwrap();
        assert_eq!(attrs.connector, "unknown");
        assert_eq!(attrs.connector_status, ConnectorStatus::Unrecognized);

        page[0] = 0x11;
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::SfpPlus).unwrap();
        assert_eq!(attrs.connector_status, ConnectorStatus::Unsupported);
    }

    #[test]
    fn test_blank_vendor_fields() {
        let mut page = sfp_optical();
        page[20..36].fill(0);
        page[37..40].fill(0);
        page[68..84].copy_from_slice(&[0xff; 16]);
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::SfpPlus).unwrap();
        assert_eq!(attrs.vendor.name, "unknown");
        assert_eq!(attrs.vendor.oui, "unknown");
        assert_eq!(attrs.vendor.serial_number, "unknown");
    }

    #[test]
    fn test_no_derivable_speed() {
        let mut page = sfp_optical();
        page[3] = 0;
        page[12] = 0;
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::SfpPlus).unwrap();
        assert!(attrs.supported_speeds.is_empty());

        let mut set = AttributeSet::new();
        attrs.apply_to(&mut set);
        assert!(!set.contains(Field::SupportedSpeeds));
        assert!(!set.contains(Field::MaxSpeed));
    }

    #[test]
    fn test_qsfp28_with_thresholds() {
        let mut page = vec![0u8; 128];
        page[0] = 0x11;
        page[2] = connector::MPO_1X12;
        page[3] = 0x80;
        page[64] = 0x02; // 100GBASE-SR4
        write_ascii(&mut page, 20..36, "ACME CORP");
        write_ascii(&mut page, 56..58, "1A");

        let mut p03 = vec![0u8; 128];
        p03[0..2].copy_from_slice(&[0x4B, 0x00]);
        let mut upper = BTreeMap::new();
        upper.insert(0x03, Some(RawPage::new(p03)));

        let attrs = parse_identification(&RawPage::new(page), &upper, ModuleFamily::Qsfp28).unwrap();
        assert_eq!(attrs.connector, "QSFP28");
        assert_eq!(attrs.supported_speeds, vec![100_000]);
        assert_eq!(attrs.vendor.revision, "1A");
        assert_eq!(attrs.thresholds.len(), 5);

        let mut set = AttributeSet::new();
        attrs.apply_to(&mut set);
        assert_eq!(
            set.get(Field::Threshold {
                quantity: DomQuantity::Temperature,
                high: true
            }),
            Some("75.00")
        );
    }

    #[test]
    fn test_qsfp_dac_by_device_tech() {
        let mut page = vec![0u8; 128];
        page[0] = 0x0D;
        page[2] = connector::NO_SEPARABLE;
        page[3] = 0x08; // 40GBASE-CR4
        page[18] = 1;
        page[19] = 0xA0;
        let attrs =
            parse_identification(&RawPage::new(page), &no_upper(), ModuleFamily::QsfpPlus).unwrap();
        assert_eq!(attrs.connector, "QSFP_DAC");
        assert_eq!(attrs.supported_speeds, vec![40_000]);
        assert_eq!(
            attrs.cable.unwrap().technology,
            Some(CableTechnology::Passive)
        );
    }

    #[test]
    fn test_truncated_identification() {
        let err = parse_identification(&RawPage::new(vec![0; 20]), &no_upper(), ModuleFamily::SfpPlus)
            .unwrap_err();
        assert_eq!(err.kind(), "truncated");
    }

    #[test]
    fn test_round_trip_yields_same_attributes() {
        let original = RawPage::new(sfp_optical());
        let decoded = RawPage::decode(&original.encode()).unwrap();
        assert_eq!(
            parse_identification(&original, &no_upper(), ModuleFamily::SfpPlus).unwrap(),
            parse_identification(&decoded, &no_upper(), ModuleFamily::SfpPlus).unwrap()
        );
    }

    #[test]
    fn test_power_mode_and_flat_memory() {
        let mut lower = vec![0u8; 128];
        assert_eq!(
            qsfp_power_mode(&RawPage::new(lower.clone())).unwrap(),
            PowerMode::Hardware
        );
        lower[93] = 0x03;
        assert_eq!(qsfp_power_mode(&RawPage::new(lower.clone())).unwrap(), PowerMode::Low);
        lower[93] = 0x01;
        assert_eq!(qsfp_power_mode(&RawPage::new(lower.clone())).unwrap(), PowerMode::High);

        assert!(!qsfp_flat_memory(&RawPage::new(lower.clone())).unwrap());
        lower[2] = 0x04;
        assert!(qsfp_flat_memory(&RawPage::new(lower)).unwrap());
    }
}

//! Digital optical monitoring (DOM) formatting.
//!
//! Converts the fixed-point monitor encodings of SFF-8472 (A2h) and SFF-8636
//! (lower page) into two-decimal strings. Change detection compares these
//! strings, so the same input bytes must always render the same text.

use serde::Serialize;

use crate::error::ParseError;
use crate::pages::{ModuleFamily, RawPage};

/// Power reported for a zero reading: the 0.1 uW encoding floor.
const POWER_FLOOR_DBM: f64 = -40.0;

/// A monitored quantity and its fixed-point encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DomQuantity {
    /// Signed, 1/256 degC
    Temperature,
    /// Unsigned, 100 uV
    Voltage,
    /// Unsigned, 2 uA
    TxBias,
    /// Unsigned, 0.1 uW
    TxPower,
    /// Unsigned, 0.1 uW
    RxPower,
}

impl DomQuantity {
    pub const ALL: [DomQuantity; 5] = [
        DomQuantity::Temperature,
        DomQuantity::Voltage,
        DomQuantity::TxBias,
        DomQuantity::TxPower,
        DomQuantity::RxPower,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DomQuantity::Temperature => "temperature",
            DomQuantity::Voltage => "voltage",
            DomQuantity::TxBias => "tx_bias",
            DomQuantity::TxPower => "tx_power",
            DomQuantity::RxPower => "rx_power",
        }
    }

    /// Decodes a big-endian monitor word into degC, V, mA or dBm.
    pub fn value(&self, raw: [u8; 2]) -> f64 {
        match self {
            DomQuantity::Temperature => f64::from(i16::from_be_bytes(raw)) / 256.0,
            DomQuantity::Voltage => f64::from(u16::from_be_bytes(raw)) / 10_000.0,
            DomQuantity::TxBias => f64::from(u16::from_be_bytes(raw)) * 0.002,
            DomQuantity::TxPower | DomQuantity::RxPower => {
                let word = u16::from_be_bytes(raw);
                if word == 0 {
                    POWER_FLOOR_DBM
                } else {
                    10.0 * (f64::from(word) / 10_000.0).log10()
                }
            }
        }
    }

    pub fn render(&self, raw: [u8; 2]) -> String {
        format_decimal(self.value(raw))
    }
}

/// Renders a value with exactly two decimals; `-0.00` becomes `0.00`.
pub fn format_decimal(value: f64) -> String {
    let text = format!("{:.2}", value);
    if text == "-0.00" {
        "0.00".to_string()
    } else {
        text
    }
}

/// Per-lane monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneDom {
    pub tx_bias: String,
    pub tx_power: String,
    pub rx_power: String,
    pub tx_bias_alarm: bool,
    pub tx_power_alarm: bool,
    pub rx_power_alarm: bool,
}

/// One decoded DOM page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomReading {
    pub temperature: String,
    pub voltage: String,
    pub temp_alarm: bool,
    pub voltage_alarm: bool,
    /// One entry for SFP, four for QSFP.
    pub lanes: Vec<LaneDom>,
}

impl DomReading {
    /// True when `flag` is raised on any lane.
    pub fn any_lane(&self, flag: impl Fn(&LaneDom) -> bool) -> bool {
        self.lanes.iter().any(flag)
    }
}

fn word(page: &[u8], offset: usize) -> [u8; 2] {
    [page[offset], page[offset + 1]]
}

// High/low alarm pair for a flag byte laid out as bit 7 (high), bit 6 (low).
fn alarm_pair(byte: u8, high_bit: u8) -> bool {
    byte & (0b11 << (high_bit - 1)) != 0
}

// SFF-8636 packs two lanes per flag byte: lane 0 in bits 7/6, lane 1 in 3/2.
fn qsfp_lane_alarm(page: &[u8], base: usize, lane: usize) -> bool {
    let byte = page[base + lane / 2];
    let high_bit = if lane % 2 == 0 { 7 } else { 3 };
    alarm_pair(byte, high_bit)
}

/// Decodes the DOM page of `family`.
///
/// SFP+: A2h lower page. QSFP: lower page.
pub fn format_dom(page: &RawPage, family: ModuleFamily) -> Result<DomReading, ParseError> {
    let page = page.require_full()?;

    if family.is_qsfp() {
        let lanes = (0..4)
            .map(|lane| LaneDom {
                rx_power: DomQuantity::RxPower.render(word(page, 34 + 2 * lane)),
                tx_bias: DomQuantity::TxBias.render(word(page, 42 + 2 * lane)),
                tx_power: DomQuantity::TxPower.render(word(page, 50 + 2 * lane)),
                rx_power_alarm: qsfp_lane_alarm(page, 9, lane),
                tx_bias_alarm: qsfp_lane_alarm(page, 11, lane),
                tx_power_alarm: qsfp_lane_alarm(page, 13, lane),
            })
            .collect();

        return Ok(DomReading {
            temperature: DomQuantity::Temperature.render(word(page, 22)),
            voltage: DomQuantity::Voltage.render(word(page, 26)),
            temp_alarm: alarm_pair(page[6], 7),
            voltage_alarm: alarm_pair(page[7], 7),
            lanes,
        });
    }

    let flags = page[112];
    Ok(DomReading {
        temperature: DomQuantity::Temperature.render(word(page, 96)),
        voltage: DomQuantity::Voltage.render(word(page, 98)),
        temp_alarm: alarm_pair(flags, 7),
        voltage_alarm: alarm_pair(flags, 5),
        lanes: vec![LaneDom {
            tx_bias: DomQuantity::TxBias.render(word(page, 100)),
            tx_power: DomQuantity::TxPower.render(word(page, 102)),
            rx_power: DomQuantity::RxPower.render(word(page, 104)),
            tx_bias_alarm: alarm_pair(flags, 3),
            tx_power_alarm: alarm_pair(flags, 1),
            rx_power_alarm: alarm_pair(page[113], 7),
        }],
    })
}

/// Alarm thresholds from QSFP upper page 03h.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Threshold {
    pub quantity: DomQuantity,
    pub high_alarm: String,
    pub low_alarm: String,
}

/// Decodes the high/low alarm thresholds of upper page 03h.
pub fn parse_thresholds(page: &RawPage) -> Result<Vec<Threshold>, ParseError> {
    let page = page.require_full()?;
    let offset = |quantity: DomQuantity| match quantity {
        DomQuantity::Temperature => 0,
        DomQuantity::Voltage => 16,
        DomQuantity::RxPower => 48,
        DomQuantity::TxBias => 56,
        DomQuantity::TxPower => 64,
    };

    Ok(DomQuantity::ALL
        .iter()
        .map(|&quantity| {
            let base = offset(quantity);
            Threshold {
                quantity,
                high_alarm: quantity.render(word(page, base)),
                low_alarm: quantity.render(word(page, base + 2)),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sfp_a2() -> Vec<u8> {
        let mut page = vec![0u8; 128];
        page[96..98].copy_from_slice(&[0x2A, 0x80]); // 42.5 C
        page[98..100].copy_from_slice(&33_000u16.to_be_bytes()); // 3.3 V
        page[100..102].copy_from_slice(&3_000u16.to_be_bytes()); // 6 mA
        page[102..104].copy_from_slice(&10_000u16.to_be_bytes()); // 1 mW
        page[104..106].copy_from_slice(&5_000u16.to_be_bytes()); // 0.5 mW
        page
    }

    #[test]
    fn test_sfp_temperature_no_alarm() {
        let reading = format_dom(&RawPage::new(sfp_a2()), ModuleFamily::SfpPlus).unwrap();
        assert_eq!(reading.temperature, "42.50");
        assert!(!reading.temp_alarm);
        assert_eq!(reading.voltage, "3.30");
        assert_eq!(reading.lanes.len(), 1);
        assert_eq!(reading.lanes[0].tx_bias, "6.00");
        assert_eq!(reading.lanes[0].tx_power, "0.00");
        assert_eq!(reading.lanes[0].rx_power, "-3.01");
    }

    #[test]
    fn test_sfp_alarm_bits() {
        let mut page = sfp_a2();
        page[112] = 0b0100_0010; // temp low alarm, tx power high alarm
        page[113] = 0b0100_0000; // rx power low alarm
        let reading = format_dom(&RawPage::new(page), ModuleFamily::SfpPlus).unwrap();
        assert!(reading.temp_alarm);
        assert!(!reading.voltage_alarm);
        assert!(!reading.lanes[0].tx_bias_alarm);
        assert!(reading.lanes[0].tx_power_alarm);
        assert!(reading.lanes[0].rx_power_alarm);
    }

    #[test]
    fn test_negative_temperature() {
        // -10.25 C
        let raw = (-2624i16).to_be_bytes();
        assert_eq!(DomQuantity::Temperature.render(raw), "-10.25");
    }

    #[test]
    fn test_zero_power_floor() {
        assert_eq!(DomQuantity::RxPower.render([0, 0]), "-40.00");
    }

    #[test]
    fn test_format_decimal_stable() {
        assert_eq!(format_decimal(-0.001), "0.00");
        assert_eq!(format_decimal(1.0), "1.00");
        assert_eq!(format_decimal(2.5), "2.50");
    }

    #[test]
    fn test_qsfp_lanes() {
        let mut page = vec![0u8; 128];
        page[22..24].copy_from_slice(&[0x19, 0x00]); // 25 C
        page[26..28].copy_from_slice(&32_500u16.to_be_bytes());
        page[36..38].copy_from_slice(&10_000u16.to_be_bytes()); // lane 1 rx 1 mW
        page[9] = 0b0000_1000; // lane 1 rx high alarm
        page[12] = 0b1000_0000; // lane 2 bias high alarm
        let reading = format_dom(&RawPage::new(page), ModuleFamily::Qsfp28).unwrap();
        assert_eq!(reading.temperature, "25.00");
        assert_eq!(reading.voltage, "3.25");
        assert_eq!(reading.lanes.len(), 4);
        assert_eq!(reading.lanes[1].rx_power, "0.00");
        assert!(!reading.lanes[0].rx_power_alarm);
        assert!(reading.lanes[1].rx_power_alarm);
        assert!(reading.lanes[2].tx_bias_alarm);
        assert!(reading.any_lane(|l| l.tx_bias_alarm));
        assert!(!reading.any_lane(|l| l.tx_power_alarm));
    }

    #[test]
    fn test_truncated_page() {
        let err = format_dom(&RawPage::new(vec![0; 100]), ModuleFamily::SfpPlus).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { actual: 100, .. }));
    }

    #[test]
    fn test_thresholds() {
        let mut page = vec![0u8; 128];
        page[0..2].copy_from_slice(&[0x4B, 0x00]); // 75 C
        page[2..4].copy_from_slice(&(-1280i16).to_be_bytes()); // -5 C
        let thresholds = parse_thresholds(&RawPage::new(page)).unwrap();
        let temp = thresholds
            .iter()
            .find(|t| t.quantity == DomQuantity::Temperature)
            .unwrap();
        assert_eq!(temp.high_alarm, "75.00");
        assert_eq!(temp.low_alarm, "-5.00");
        assert_eq!(thresholds.len(), 5);
    }
}

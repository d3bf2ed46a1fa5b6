//! Table name constants for xcvrd.
//!
//! These match the transceiver tables consumed by the rest of SONiC.

/// STATE_DB table holding module identity, one row per port.
pub const STATE_TRANSCEIVER_INFO_TABLE_NAME: &str = "TRANSCEIVER_INFO";

/// STATE_DB table holding live diagnostic values.
pub const STATE_TRANSCEIVER_DOM_SENSOR_TABLE_NAME: &str = "TRANSCEIVER_DOM_SENSOR";

/// CONFIG_DB table with per-port hardware enable and split settings.
pub const CFG_TRANSCEIVER_CONFIG_TABLE_NAME: &str = "TRANSCEIVER_CONFIG";

/// Key separator used by STATE_DB and CONFIG_DB.
pub const TABLE_KEY_SEPARATOR: &str = "|";

/// Field names in the CONFIG_DB transceiver table.
pub mod fields {
    /// Hardware path enable ("true"/"false").
    pub const HW_ENABLE: &str = "hw_enable";

    /// Breakout configuration ("true"/"false").
    pub const SPLIT: &str = "split";

    /// Per-lane enables, comma separated ("true,true,false,true").
    pub const HW_ENABLE_SUBPORT: &str = "hw_enable_subport";
}

/// Builds a `TABLE|key` database key.
pub fn table_key(table: &str, key: &str) -> String {
    format!("{}{}{}", table, TABLE_KEY_SEPARATOR, key)
}

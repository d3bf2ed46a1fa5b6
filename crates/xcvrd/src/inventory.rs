//! Static port inventory.
//!
//! The platform describes each physical port once; the registry allocates a
//! record per descriptor. The inventory file holds one `[[port]]` table per
//! port:
//!
//! ```toml
//! [[port]]
//! subsystem = "base"
//! instance = "1"
//! external_id = "Ethernet0"
//! bus_address = "/sys/bus/i2c/devices/11-0050"
//! module_family = "QSFP28"
//! lane_count = 4
//! split_capable = true
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, XcvrdError};

/// Most lanes a single port is split into.
pub const MAX_LANES: u8 = 4;

/// Hardware description of one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub subsystem: String,
    pub instance: String,

    /// Database row id; defaults to `instance`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Hardware address understood by the module backend
    pub bus_address: String,

    /// Family hint selecting the memory layout (SFP_PLUS, QSFP_PLUS, QSFP28)
    pub module_family: String,

    #[serde(default = "default_lane_count")]
    pub lane_count: u8,

    #[serde(default)]
    pub split_capable: bool,
}

fn default_lane_count() -> u8 {
    1
}

impl PortDescriptor {
    pub fn key(&self) -> PortKey {
        PortKey::new(&self.subsystem, &self.instance)
    }

    pub fn external_id(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.instance)
    }
}

/// Registry key of a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortKey {
    pub subsystem: String,
    pub instance: String,
}

impl PortKey {
    pub fn new(subsystem: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subsystem, self.instance)
    }
}

/// Source of port descriptors.
pub trait Inventory: Send {
    fn load(&self) -> Result<Vec<PortDescriptor>>;
}

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default, rename = "port")]
    ports: Vec<PortDescriptor>,
}

/// Inventory read from a TOML file.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Inventory for FileInventory {
    fn load(&self) -> Result<Vec<PortDescriptor>> {
        let content = fs::read_to_string(&self.path)?;
        parse_inventory(&content).map_err(|e| {
            XcvrdError::Configuration(format!(
                "Failed to parse inventory {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Inventory held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    pub ports: Vec<PortDescriptor>,
}

impl StaticInventory {
    pub fn new(ports: Vec<PortDescriptor>) -> Self {
        Self { ports }
    }
}

impl Inventory for StaticInventory {
    fn load(&self) -> Result<Vec<PortDescriptor>> {
        Ok(self.ports.clone())
    }
}

/// Parses inventory TOML.
pub fn parse_inventory(content: &str) -> std::result::Result<Vec<PortDescriptor>, toml::de::Error> {
    let file: InventoryFile = toml::from_str(content)?;
    Ok(file.ports)
}

/// Rejects inventories the registry cannot represent.
///
/// Duplicate `(subsystem, instance)` keys are an `InventoryConflict`;
/// duplicate row ids and out-of-range lane counts are configuration errors.
pub fn validate_inventory(ports: &[PortDescriptor]) -> Result<()> {
    let mut keys = HashSet::new();
    let mut ids = HashSet::new();

    for port in ports {
        if !keys.insert(port.key()) {
            return Err(XcvrdError::InventoryConflict {
                subsystem: port.subsystem.clone(),
                instance: port.instance.clone(),
            });
        }
        if !ids.insert(port.external_id()) {
            return Err(XcvrdError::Configuration(format!(
                "external_id {} used by more than one port",
                port.external_id()
            )));
        }
        if port.lane_count == 0 || port.lane_count > MAX_LANES {
            return Err(XcvrdError::Configuration(format!(
                "port {}: lane_count must be 1-{}",
                port.key(),
                MAX_LANES
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn port(instance: &str) -> PortDescriptor {
        PortDescriptor {
            subsystem: "base".to_string(),
            instance: instance.to_string(),
            external_id: None,
            bus_address: format!("bus-{}", instance),
            module_family: "SFP_PLUS".to_string(),
            lane_count: 1,
            split_capable: false,
        }
    }

    #[test]
    fn test_parse_inventory() {
        let ports = parse_inventory(
            r#"
[[port]]
subsystem = "base"
instance = "1"
external_id = "Ethernet0"
bus_address = "11-0050"
module_family = "QSFP28"
lane_count = 4
split_capable = true

[[port]]
subsystem = "base"
instance = "2"
bus_address = "12-0050"
module_family = "SFP_PLUS"
"#,
        )
        .unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].external_id(), "Ethernet0");
        assert_eq!(ports[0].lane_count, 4);
        assert_eq!(ports[1].external_id(), "2");
        assert_eq!(ports[1].lane_count, 1);
        assert!(!ports[1].split_capable);
    }

    #[test]
    fn test_empty_inventory() {
        assert!(parse_inventory("").unwrap().is_empty());
    }

    #[test]
    fn test_static_inventory() {
        let inventory = StaticInventory::new(vec![port("1"), port("2")]);
        let ports = inventory.load().unwrap();
        assert_eq!(ports, inventory.ports);
        assert!(validate_inventory(&ports).is_ok());
    }

    #[test]
    fn test_duplicate_key_conflict() {
        let err = validate_inventory(&[port("1"), port("1")]).unwrap_err();
        assert!(matches!(err, XcvrdError::InventoryConflict { .. }));
    }

    #[test]
    fn test_duplicate_external_id() {
        let mut b = port("2");
        b.external_id = Some("1".to_string());
        let err = validate_inventory(&[port("1"), b]).unwrap_err();
        assert!(matches!(err, XcvrdError::Configuration(_)));
    }

    #[test]
    fn test_lane_count_range() {
        let mut p = port("1");
        p.lane_count = 8;
        assert!(validate_inventory(&[p]).is_err());
        assert!(validate_inventory(&[port("1"), port("2")]).is_ok());
    }

    #[test]
    fn test_file_inventory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[port]]\nsubsystem = \"base\"\ninstance = \"7\"\nbus_address = \"x\"\nmodule_family = \"QSFP_PLUS\""
        )
        .unwrap();

        let ports = FileInventory::new(file.path()).load().unwrap();
        assert_eq!(ports[0].key(), PortKey::new("base", "7"));
        assert_eq!(ports[0].key().to_string(), "base/7");
    }

    #[test]
    fn test_file_inventory_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[port]]\nsubsystem = 3").unwrap();
        let err = FileInventory::new(file.path()).load().unwrap_err();
        assert!(matches!(err, XcvrdError::Configuration(_)));
    }
}

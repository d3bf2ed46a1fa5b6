//! Pluggable Transceiver Daemon for SONiC
//!
//! This crate provides xcvrd, which detects, identifies and monitors the
//! pluggable modules (SFP+, QSFP+, QSFP28) in a switch's front panel ports
//! and publishes their identity and diagnostic state to SONiC's Redis
//! databases.
//!
//! # Architecture
//!
//! ```text
//! +----------------+     +--------------------------+     +-----------------+
//! |  Module EEPROM |     |          xcvrd           |     |  Redis (SONiC)  |
//! |  (optoe sysfs) |---->|  ModuleHardware          |     |                 |
//! |                |     |       |                  |     |  STATE_DB       |
//! +----------------+     |       v                  |     |  TRANSCEIVER_   |
//!                        |  module_fsm -> parser    |     |    INFO         |
//! +----------------+     |       |        dom       |---->|    DOM_SENSOR   |
//! |   Inventory    |---->|       v                  |     |                 |
//! |   (TOML)       |     |  AttributeSet (dirty)    |<----|  CONFIG_DB      |
//! +----------------+     |       |                  |     |  TRANSCEIVER_   |
//!                        |  SyncDriver -> db        |     |    CONFIG       |
//!                        +--------------------------+     +-----------------+
//! ```
//!
//! One driver task owns the [`PortRegistry`] and walks every port once per
//! tick. Each port row is written only when one of its attributes actually
//! changed.

pub mod attributes;
pub mod config;
pub mod db;
pub mod dom;
pub mod error;
pub mod hardware;
pub mod inventory;
pub mod module_fsm;
pub mod pages;
pub mod parser;
pub mod port;
pub mod redis_adapter;
pub mod registry;
pub mod simulated;
pub mod sync;
pub mod tables;

pub use attributes::{AttrValue, AttributeSet, Field, FieldValues};
pub use config::{DatabaseBackend, HardwareBackend, XcvrdConfig};
pub use db::{AdminConfig, InMemoryDatabase, StateDatabase};
pub use dom::{format_dom, DomReading};
pub use error::{DatabaseError, HardwareError, ModuleError, ParseError, Result, XcvrdError};
pub use hardware::{ModuleHardware, SysfsHardware};
pub use inventory::{FileInventory, Inventory, PortDescriptor, PortKey, StaticInventory};
pub use module_fsm::{ModuleState, PollSettings};
pub use pages::{decode_page, encode_page, ModuleFamily, RawPage, RawPages};
pub use parser::{parse_identification, NormalizedAttributes};
pub use port::{PortDump, PortRecord};
pub use redis_adapter::RedisStateDb;
pub use registry::PortRegistry;
pub use simulated::{SimulatedHardware, SyntheticModule};
pub use sync::{DriverCommand, SyncDriver, TickReport};

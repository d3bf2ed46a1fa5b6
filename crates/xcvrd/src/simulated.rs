//! Simulated module hardware.
//!
//! Each synthetic module is a small linear memory map laid out the way
//! `optoe` exposes real modules. Almost every byte reads as zero; the
//! builders set only what identification and DOM decoding look at. Faults
//! (read errors, stalls, presence errors) are injected per bus.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::HardwareError;
use crate::hardware::ModuleHardware;
use crate::inventory::PortDescriptor;
use crate::pages::{identifier, ModuleFamily, RawPage, PAGE_SIZE};

/// One synthetic module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticModule {
    pub family: ModuleFamily,
    pub present: bool,
    map: Vec<u8>,
}

impl SyntheticModule {
    // SFF-8472 / SFF-8636 check codes, relative to the identification page.
    const CC_BASE: usize = 63;
    const CC_EXT: usize = 95;

    fn blank(family: ModuleFamily) -> Self {
        // SFP: A0h lower, A0h upper, A2h lower. QSFP: lower, upper 00h-03h.
        let blocks = if family.is_qsfp() { 5 } else { 3 };
        let mut module = Self {
            family,
            present: true,
            map: vec![0; blocks * PAGE_SIZE],
        };
        let ident = family.identifiers()[0];
        module.set_byte(family.identification_page(), 0, ident);
        if let Some(lower) = family.lower_page() {
            module.set_byte(lower, 0, ident);
        }
        module
    }

    fn set_ascii(&mut self, page_index: u16, range: std::ops::Range<usize>, text: &str) {
        let base = usize::from(page_index) * PAGE_SIZE;
        let field = &mut self.map[base + range.start..base + range.end];
        field.fill(b' ');
        let len = text.len().min(field.len());
        field[..len].copy_from_slice(&text.as_bytes()[..len]);
    }

    fn set_word(&mut self, page_index: u16, offset: usize, word: [u8; 2]) {
        let base = usize::from(page_index) * PAGE_SIZE + offset;
        self.map[base..base + 2].copy_from_slice(&word);
    }

    fn with_vendor(mut self, vendor: &str, part_number: &str, serial: &str) -> Self {
        let id = self.family.identification_page();
        self.set_ascii(id, 20..36, vendor);
        let base = usize::from(id) * PAGE_SIZE;
        self.map[base + 37..base + 40].copy_from_slice(&[0x00, 0x90, 0x65]);
        self.set_ascii(id, 40..56, part_number);
        if self.family.is_qsfp() {
            self.set_ascii(id, 56..58, "1A");
        } else {
            self.set_ascii(id, 56..60, "A");
        }
        self.set_ascii(id, 68..84, serial);
        self.fill_checksums();
        self
    }

    fn with_nominal_dom(mut self) -> Self {
        let page = self.family.dom_page();
        let lanes = self.family.max_lanes();
        if self.family.is_qsfp() {
            self.set_word(page, 26, 33_000u16.to_be_bytes());
            for lane in 0..lanes {
                self.set_word(page, 34 + 2 * lane, 5_000u16.to_be_bytes());
                self.set_word(page, 42 + 2 * lane, 3_000u16.to_be_bytes());
                self.set_word(page, 50 + 2 * lane, 5_000u16.to_be_bytes());
            }
        } else {
            self.set_word(page, 98, 33_000u16.to_be_bytes());
            self.set_word(page, 100, 3_000u16.to_be_bytes());
            self.set_word(page, 102, 5_000u16.to_be_bytes());
            self.set_word(page, 104, 5_000u16.to_be_bytes());
        }
        self.set_temperature(42.5);
        self
    }

    /// SFP+ 10GBASE-SR, LC connector, with diagnostics.
    pub fn sfp_optical(vendor: &str, serial: &str) -> Self {
        let mut module = Self::blank(ModuleFamily::SfpPlus);
        module.set_byte(0, 2, 0x07);
        module.set_byte(0, 3, 0x10);
        module.set_byte(0, 12, 0x67);
        module.set_byte(0, 92, 0x68);
        module
            .with_vendor(vendor, "SFP-10G-SR", serial)
            .with_nominal_dom()
    }

    /// SFP+ passive 3 m direct attach cable.
    pub fn sfp_dac(vendor: &str, serial: &str) -> Self {
        let mut module = Self::blank(ModuleFamily::SfpPlus);
        module.set_byte(0, 2, 0x21);
        module.set_byte(0, 8, 0x04);
        module.set_byte(0, 12, 0x67);
        module.set_byte(0, 18, 3);
        module.with_vendor(vendor, "SFP-H10GB-CU3M", serial)
    }

    /// QSFP+ 40GBASE-SR4, MPO connector, paged memory.
    pub fn qsfp_plus_optical(vendor: &str, serial: &str) -> Self {
        let mut module = Self::blank(ModuleFamily::QsfpPlus);
        module.set_byte(1, 0, identifier::QSFP_PLUS);
        module.set_byte(0, 0, identifier::QSFP_PLUS);
        module.set_byte(1, 2, 0x0C);
        module.set_byte(1, 3, 0x04);
        module
            .with_thresholds()
            .with_vendor(vendor, "QSFP-40G-SR4", serial)
            .with_nominal_dom()
    }

    /// QSFP28 100GBASE-SR4, MPO connector, paged memory.
    pub fn qsfp28_optical(vendor: &str, serial: &str) -> Self {
        let mut module = Self::blank(ModuleFamily::Qsfp28);
        module.set_byte(1, 2, 0x0C);
        module.set_byte(1, 3, 0x80);
        module.set_byte(1, 64, 0x02);
        module
            .with_thresholds()
            .with_vendor(vendor, "QSFP-100G-SR4", serial)
            .with_nominal_dom()
    }

    /// QSFP passive 1 m copper cable with flat memory.
    pub fn qsfp_dac(family: ModuleFamily, vendor: &str, serial: &str) -> Self {
        let mut module = Self::blank(family);
        // Flat memory
        module.set_byte(0, 2, 0b100);
        module.set_byte(1, 2, 0x23);
        module.set_byte(1, 3, 0x08);
        module.set_byte(1, 18, 1);
        module.set_byte(1, 19, 0xA0);
        module.with_vendor(vendor, "QSFP-DAC-1M", serial)
    }

    /// Default optical module for a family.
    pub fn for_family(family: ModuleFamily, vendor: &str, serial: &str) -> Self {
        match family {
            ModuleFamily::SfpPlus => Self::sfp_optical(vendor, serial),
            ModuleFamily::QsfpPlus => Self::qsfp_plus_optical(vendor, serial),
            ModuleFamily::Qsfp28 => Self::qsfp28_optical(vendor, serial),
        }
    }

    // Upper page 03h: temperature 75/-5 C, voltage 3.6/3.0 V.
    fn with_thresholds(mut self) -> Self {
        let page = ModuleFamily::upper_page_index(0x03);
        self.set_word(page, 0, [0x4B, 0x00]);
        self.set_word(page, 2, (-1280i16).to_be_bytes());
        self.set_word(page, 16, 36_000u16.to_be_bytes());
        self.set_word(page, 18, 30_000u16.to_be_bytes());
        self
    }

    /// Compute the identification page check codes: the low-order 8 bits of
    /// the sum of the bytes each covers.
    fn fill_checksums(&mut self) {
        fn sum(bytes: &[u8]) -> u8 {
            let sum: u32 = bytes.iter().copied().map(u32::from).sum();
            (sum & 0xFF) as u8
        }
        let base = usize::from(self.family.identification_page()) * PAGE_SIZE;
        self.map[base + Self::CC_BASE] = sum(&self.map[base..base + Self::CC_BASE]);
        self.map[base + Self::CC_EXT] =
            sum(&self.map[base + Self::CC_BASE + 1..base + Self::CC_EXT]);
    }

    pub fn set_byte(&mut self, page_index: u16, offset: usize, value: u8) {
        self.map[usize::from(page_index) * PAGE_SIZE + offset] = value;
    }

    pub fn byte(&self, page_index: u16, offset: usize) -> u8 {
        self.map[usize::from(page_index) * PAGE_SIZE + offset]
    }

    /// Sets the reported module temperature.
    pub fn set_temperature(&mut self, celsius: f64) {
        let raw = (celsius * 256.0).round() as i16;
        let offset = if self.family.is_qsfp() { 22 } else { 96 };
        self.set_word(self.family.dom_page(), offset, raw.to_be_bytes());
    }

    pub fn set_vendor_name(&mut self, vendor: &str) {
        self.set_ascii(self.family.identification_page(), 20..36, vendor);
        self.fill_checksums();
    }

    fn page(&self, page_index: u16) -> Option<RawPage> {
        let start = usize::from(page_index) * PAGE_SIZE;
        self.map
            .get(start..start + PAGE_SIZE)
            .map(|bytes| RawPage::new(bytes.to_vec()))
    }
}

/// A recorded control write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlWrite {
    pub bus: String,
    pub page_index: u16,
    pub offset: u8,
    pub value: u8,
}

/// Hardware backed by synthetic modules.
#[derive(Debug, Default)]
pub struct SimulatedHardware {
    modules: HashMap<String, SyntheticModule>,
    failing_reads: HashSet<String>,
    failing_pages: HashSet<(String, u16)>,
    failing_presence: HashSet<String>,
    stalled: HashSet<String>,
    page_reads: HashMap<String, usize>,
    writes: Vec<ControlWrite>,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// One default module per port whose family hint resolves.
    pub fn from_inventory(ports: &[PortDescriptor]) -> Self {
        let mut hw = Self::new();
        for port in ports {
            if let Ok(family) = ModuleFamily::from_hint(&port.module_family) {
                let serial = format!("SIM{}", port.external_id());
                hw.insert(
                    port.bus_address.clone(),
                    SyntheticModule::for_family(family, "SONIC SIM", &serial),
                );
            }
        }
        hw
    }

    /// Plugs `module` into `bus`, replacing any module already there.
    pub fn insert(&mut self, bus: impl Into<String>, module: SyntheticModule) {
        self.modules.insert(bus.into(), module);
    }

    /// Unplugs the module at `bus`, keeping its memory for re-insertion.
    pub fn set_present(&mut self, bus: &str, present: bool) {
        if let Some(module) = self.modules.get_mut(bus) {
            module.present = present;
        }
    }

    pub fn module_mut(&mut self, bus: &str) -> Option<&mut SyntheticModule> {
        self.modules.get_mut(bus)
    }

    /// Every page read on `bus` fails with an I/O error.
    pub fn fail_reads(&mut self, bus: &str, fail: bool) {
        toggle(&mut self.failing_reads, bus.to_string(), fail);
    }

    /// Reads of one block on `bus` fail with an I/O error.
    pub fn fail_page(&mut self, bus: &str, page_index: u16, fail: bool) {
        toggle(&mut self.failing_pages, (bus.to_string(), page_index), fail);
    }

    /// Presence reads on `bus` fail with an I/O error.
    pub fn fail_presence(&mut self, bus: &str, fail: bool) {
        toggle(&mut self.failing_presence, bus.to_string(), fail);
    }

    /// Every access on `bus` hangs until the caller times out.
    pub fn stall(&mut self, bus: &str, stall: bool) {
        toggle(&mut self.stalled, bus.to_string(), stall);
    }

    /// Page reads attempted on `bus`, failed ones included.
    pub fn page_reads(&self, bus: &str) -> usize {
        self.page_reads.get(bus).copied().unwrap_or(0)
    }

    pub fn writes(&self) -> &[ControlWrite] {
        &self.writes
    }

    async fn check_stall(&self, bus: &str) {
        if self.stalled.contains(bus) {
            std::future::pending::<()>().await;
        }
    }

    fn present_module(&self, bus: &str) -> Result<&SyntheticModule, HardwareError> {
        let module = self
            .modules
            .get(bus)
            .ok_or_else(|| HardwareError::UnknownBus(bus.to_string()))?;
        if !module.present {
            return Err(HardwareError::io(bus, "no module present"));
        }
        Ok(module)
    }
}

fn toggle<T: std::hash::Hash + Eq>(set: &mut HashSet<T>, item: T, on: bool) {
    if on {
        set.insert(item);
    } else {
        set.remove(&item);
    }
}

#[async_trait]
impl ModuleHardware for SimulatedHardware {
    async fn read_presence(&mut self, bus: &str) -> Result<bool, HardwareError> {
        self.check_stall(bus).await;
        if self.failing_presence.contains(bus) {
            return Err(HardwareError::io(bus, "presence read failed"));
        }
        Ok(self.modules.get(bus).is_some_and(|m| m.present))
    }

    async fn read_page(&mut self, bus: &str, page_index: u16) -> Result<RawPage, HardwareError> {
        *self.page_reads.entry(bus.to_string()).or_default() += 1;
        self.check_stall(bus).await;

        if self.failing_reads.contains(bus)
            || self.failing_pages.contains(&(bus.to_string(), page_index))
        {
            return Err(HardwareError::io(bus, format!("read of block {} failed", page_index)));
        }

        self.present_module(bus)?
            .page(page_index)
            .ok_or_else(|| HardwareError::io(bus, format!("block {} not implemented", page_index)))
    }

    async fn write_byte(
        &mut self,
        bus: &str,
        page_index: u16,
        offset: u8,
        value: u8,
    ) -> Result<(), HardwareError> {
        self.check_stall(bus).await;
        if self.failing_reads.contains(bus) {
            return Err(HardwareError::io(bus, "write failed"));
        }
        self.present_module(bus)?;

        if let Some(module) = self.modules.get_mut(bus) {
            module.set_byte(page_index, usize::from(offset), value);
        }
        self.writes.push(ControlWrite {
            bus: bus.to_string(),
            page_index,
            offset,
            value,
        });
        Ok(())
    }
}

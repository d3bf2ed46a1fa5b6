//! Raw module memory pages.
//!
//! Module memory is addressed as 128-byte blocks of the linear map exposed by
//! the kernel `optoe` driver:
//!
//! | Family | Block 0 | Block 1 | Block 2 | Block n+1 |
//! |--------|---------|---------|---------|-----------|
//! | SFP+ (SFF-8472) | A0h lower (identification) | A0h upper | A2h lower (diagnostics) | - |
//! | QSFP+/QSFP28 (SFF-8636) | lower page | upper page 00h (identification) | upper page 01h | upper page n |
//!
//! Pages are re-exposed to downstream consumers in a text-safe encoding:
//! lowercase hex, grouped by 4 bytes, groups separated by a single space.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::ParseError;

/// Size of every page read from a module.
pub const PAGE_SIZE: usize = 128;

/// Bytes per group in the text encoding.
const GROUP_BYTES: usize = 4;

/// SFF-8024 identifier codes.
pub mod identifier {
    pub const SFP: u8 = 0x03;
    pub const QSFP: u8 = 0x0C;
    pub const QSFP_PLUS: u8 = 0x0D;
    pub const QSFP28: u8 = 0x11;
}

/// Module family, which selects the memory layout.
///
/// Taken from the inventory descriptor, never probed from module bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleFamily {
    #[serde(rename = "SFP_PLUS")]
    SfpPlus,
    #[serde(rename = "QSFP_PLUS")]
    QsfpPlus,
    #[serde(rename = "QSFP28")]
    Qsfp28,
}

impl ModuleFamily {
    /// Resolves an inventory family hint.
    pub fn from_hint(hint: &str) -> Result<Self, ParseError> {
        match hint.trim().to_ascii_uppercase().as_str() {
            "SFP_PLUS" | "SFP+" => Ok(ModuleFamily::SfpPlus),
            "QSFP_PLUS" | "QSFP+" => Ok(ModuleFamily::QsfpPlus),
            "QSFP28" => Ok(ModuleFamily::Qsfp28),
            _ => Err(ParseError::UnsupportedFamily(hint.to_string())),
        }
    }

    /// Family name as used in the inventory.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFamily::SfpPlus => "SFP_PLUS",
            ModuleFamily::QsfpPlus => "QSFP_PLUS",
            ModuleFamily::Qsfp28 => "QSFP28",
        }
    }

    pub fn is_qsfp(&self) -> bool {
        matches!(self, ModuleFamily::QsfpPlus | ModuleFamily::Qsfp28)
    }

    /// Electrical lanes carried by one module.
    pub fn max_lanes(&self) -> usize {
        if self.is_qsfp() {
            4
        } else {
            1
        }
    }

    /// Identifier bytes a module of this family reports.
    pub fn identifiers(&self) -> &'static [u8] {
        match self {
            ModuleFamily::SfpPlus => &[identifier::SFP],
            ModuleFamily::QsfpPlus => &[identifier::QSFP, identifier::QSFP_PLUS],
            ModuleFamily::Qsfp28 => &[identifier::QSFP28],
        }
    }

    /// Block holding the identification (serial ID) data.
    pub fn identification_page(&self) -> u16 {
        if self.is_qsfp() {
            1
        } else {
            0
        }
    }

    /// QSFP lower page block, holding status, monitors and controls.
    pub fn lower_page(&self) -> Option<u16> {
        self.is_qsfp().then_some(0)
    }

    /// Block holding live diagnostic monitors.
    pub fn dom_page(&self) -> u16 {
        if self.is_qsfp() {
            0
        } else {
            2
        }
    }

    /// Optional upper pages read after identification, by page number.
    pub fn upper_pages(&self) -> &'static [u8] {
        if self.is_qsfp() {
            &[0x03]
        } else {
            &[]
        }
    }

    /// Block index of a QSFP upper page.
    pub fn upper_page_index(page: u8) -> u16 {
        u16::from(page) + 1
    }
}

impl fmt::Display for ModuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of module memory as read from hardware.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPage(Vec<u8>);

impl RawPage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fails with `Truncated` unless the page holds a full block.
    pub fn require_full(&self) -> Result<&[u8], ParseError> {
        if self.0.len() < PAGE_SIZE {
            return Err(ParseError::Truncated {
                expected: PAGE_SIZE,
                actual: self.0.len(),
            });
        }
        Ok(&self.0[..PAGE_SIZE])
    }

    /// Text-safe encoding, e.g. `"03040700 00000000 ..."`.
    pub fn encode(&self) -> String {
        encode_page(&self.0)
    }

    /// Inverse of [`RawPage::encode`].
    pub fn decode(text: &str) -> Result<Self, ParseError> {
        decode_page(text).map(Self)
    }
}

impl From<Vec<u8>> for RawPage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Encodes bytes as space-separated 4-byte hex groups.
pub fn encode_page(bytes: &[u8]) -> String {
    bytes
        .chunks(GROUP_BYTES)
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes the text produced by [`encode_page`].
///
/// Every group but the last must carry exactly 4 bytes.
pub fn decode_page(text: &str) -> Result<Vec<u8>, ParseError> {
    let groups: Vec<&str> = text.split(' ').filter(|g| !g.is_empty()).collect();
    let mut bytes = Vec::with_capacity(groups.len() * GROUP_BYTES);

    for (i, group) in groups.iter().enumerate() {
        let decoded =
            hex::decode(group).map_err(|e| ParseError::Encoding(format!("{}: {}", group, e)))?;
        let last = i + 1 == groups.len();
        if decoded.len() > GROUP_BYTES || (!last && decoded.len() != GROUP_BYTES) {
            return Err(ParseError::Encoding(format!(
                "group {} has {} bytes",
                i,
                decoded.len()
            )));
        }
        bytes.extend_from_slice(&decoded);
    }

    Ok(bytes)
}

/// Last-read raw pages for a port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPages {
    /// SFP A0h lower / QSFP upper page 00h.
    pub identification: Option<RawPage>,
    /// QSFP lower page.
    pub lower: Option<RawPage>,
    /// QSFP upper pages by page number; one slot for each family page.
    pub upper: BTreeMap<u8, Option<RawPage>>,
    /// SFP A2h lower.
    pub diagnostic: Option<RawPage>,
}

impl RawPages {
    /// Empty store with one unread slot per upper page of `family`.
    pub fn for_family(family: Option<ModuleFamily>) -> Self {
        let upper = family
            .map(|f| f.upper_pages().iter().map(|&p| (p, None)).collect())
            .unwrap_or_default();
        Self {
            upper,
            ..Self::default()
        }
    }

    /// Marks every page unread, keeping the upper page slots.
    pub fn clear(&mut self) {
        self.identification = None;
        self.lower = None;
        self.diagnostic = None;
        for slot in self.upper.values_mut() {
            *slot = None;
        }
    }

    pub fn upper_page(&self, page: u8) -> Option<&RawPage> {
        self.upper.get(&page).and_then(Option::as_ref)
    }

    /// Live page holding DOM monitors for `family`.
    pub fn dom_page(&self, family: ModuleFamily) -> Option<&RawPage> {
        if family.is_qsfp() {
            self.lower.as_ref()
        } else {
            self.diagnostic.as_ref()
        }
    }
}

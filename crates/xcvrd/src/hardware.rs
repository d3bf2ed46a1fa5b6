//! Module hardware access.
//!
//! Pages are addressed by 128-byte block index into the linear map the
//! kernel `optoe` driver exposes (see [`crate::pages`]).

use std::future::Future;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::HardwareError;
use crate::pages::{RawPage, PAGE_SIZE};

/// Access to pluggable module signals and memory.
#[async_trait]
pub trait ModuleHardware: Send {
    /// Module present signal.
    async fn read_presence(&mut self, bus: &str) -> Result<bool, HardwareError>;

    /// Reads one block. A short read returns a short page.
    async fn read_page(&mut self, bus: &str, page_index: u16) -> Result<RawPage, HardwareError>;

    /// Writes a single control byte.
    async fn write_byte(
        &mut self,
        bus: &str,
        page_index: u16,
        offset: u8,
        value: u8,
    ) -> Result<(), HardwareError>;
}

/// Runs a hardware access, failing with `Timeout` once `limit` elapses.
pub async fn bounded<T>(
    bus: &str,
    limit: Duration,
    access: impl Future<Output = Result<T, HardwareError>>,
) -> Result<T, HardwareError> {
    match tokio::time::timeout(limit, access).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::Timeout {
            bus: bus.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

const EEPROM_FILE: &str = "eeprom";
const PRESENT_FILE: &str = "present";

/// Module access through sysfs device directories.
///
/// A bus address names a device directory holding an `eeprom` file (the
/// linear page map) and a `present` file (`1` or `0`). Relative addresses
/// are resolved against the root.
#[derive(Debug, Clone)]
pub struct SysfsHardware {
    root: PathBuf,
}

impl Default for SysfsHardware {
    fn default() -> Self {
        Self::new("/sys/bus/i2c/devices")
    }
}

impl SysfsHardware {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_dir(&self, bus: &str) -> PathBuf {
        self.root.join(bus)
    }

    fn map_io(bus: &str, path: &Path, e: std::io::Error) -> HardwareError {
        if e.kind() == ErrorKind::NotFound {
            HardwareError::UnknownBus(bus.to_string())
        } else {
            HardwareError::io(bus, format!("{}: {}", path.display(), e))
        }
    }

    fn block_offset(page_index: u16) -> u64 {
        u64::from(page_index) * PAGE_SIZE as u64
    }
}

#[async_trait]
impl ModuleHardware for SysfsHardware {
    async fn read_presence(&mut self, bus: &str) -> Result<bool, HardwareError> {
        let path = self.device_dir(bus).join(PRESENT_FILE);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;

        match content.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(HardwareError::io(
                bus,
                format!("unexpected presence value {:?}", other),
            )),
        }
    }

    async fn read_page(&mut self, bus: &str, page_index: u16) -> Result<RawPage, HardwareError> {
        let path = self.device_dir(bus).join(EEPROM_FILE);
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;
        file.seek(SeekFrom::Start(Self::block_offset(page_index)))
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;

        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        file.take(PAGE_SIZE as u64)
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;

        Ok(RawPage::new(bytes))
    }

    async fn write_byte(
        &mut self,
        bus: &str,
        page_index: u16,
        offset: u8,
        value: u8,
    ) -> Result<(), HardwareError> {
        let path = self.device_dir(bus).join(EEPROM_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;
        file.seek(SeekFrom::Start(
            Self::block_offset(page_index) + u64::from(offset),
        ))
        .await
        .map_err(|e| Self::map_io(bus, &path, e))?;
        file.write_all(&[value])
            .await
            .map_err(|e| Self::map_io(bus, &path, e))?;
        file.flush().await.map_err(|e| Self::map_io(bus, &path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(root: &Path, name: &str, present: &str, eeprom: &[u8]) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PRESENT_FILE), present).unwrap();
        std::fs::write(dir.join(EEPROM_FILE), eeprom).unwrap();
    }

    #[tokio::test]
    async fn test_sysfs_presence_and_pages() {
        let root = tempfile::tempdir().unwrap();
        let mut eeprom = vec![0u8; 3 * PAGE_SIZE];
        eeprom[2 * PAGE_SIZE] = 0xAB;
        device(root.path(), "11-0050", "1\n", &eeprom);

        let mut hw = SysfsHardware::new(root.path());
        assert!(hw.read_presence("11-0050").await.unwrap());

        let page = hw.read_page("11-0050", 2).await.unwrap();
        assert_eq!(page.len(), PAGE_SIZE);
        assert_eq!(page.as_bytes()[0], 0xAB);

        hw.write_byte("11-0050", 2, 110, 0x40).await.unwrap();
        let page = hw.read_page("11-0050", 2).await.unwrap();
        assert_eq!(page.as_bytes()[110], 0x40);
    }

    #[tokio::test]
    async fn test_sysfs_short_read() {
        let root = tempfile::tempdir().unwrap();
        device(root.path(), "dev", "1", &[0u8; 200]);

        let mut hw = SysfsHardware::new(root.path());
        let page = hw.read_page("dev", 1).await.unwrap();
        assert_eq!(page.len(), 72);
    }

    #[tokio::test]
    async fn test_sysfs_absent_and_unknown() {
        let root = tempfile::tempdir().unwrap();
        device(root.path(), "dev", "0", &[]);

        let mut hw = SysfsHardware::new(root.path());
        assert!(!hw.read_presence("dev").await.unwrap());
        assert_eq!(
            hw.read_presence("missing").await.unwrap_err(),
            HardwareError::UnknownBus("missing".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: Result<(), HardwareError> = bounded("slow", Duration::from_millis(200), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result.unwrap_err(),
            HardwareError::Timeout {
                bus: "slow".to_string(),
                timeout_ms: 200
            }
        );
    }
}

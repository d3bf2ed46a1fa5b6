//! Module presence and retry state machine.
//!
//! ```text
//! Absent -> Detected -> Reading -> Ready
//!                         |  ^
//!                         v  |
//!                        Retry -> Absent (budget spent)
//! ```
//!
//! [`advance`] moves a port one step per tick. Presence loss from any state
//! returns it to `Absent` and clears everything the module contributed.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::attributes::Field;
use crate::config::XcvrdConfig;
use crate::dom::format_dom;
use crate::error::{HardwareError, ModuleError};
use crate::hardware::{bounded, ModuleHardware};
use crate::pages::{ModuleFamily, RawPage, RawPages, PAGE_SIZE};
use crate::parser::{parse_identification, qsfp_flat_memory, qsfp_power_mode, NormalizedAttributes};
use crate::port::PortRecord;

/// `dom_read_status` after a successful DOM read.
pub const DOM_READ_OK: &str = "ok";

/// QSFP lower page TX disable byte, one bit per lane.
const QSFP_TX_DISABLE: u8 = 86;
/// SFP A2h status/control byte, soft TX disable in bit 6.
const SFP_STATUS_CONTROL: u8 = 110;
const SFP_SOFT_TX_DISABLE: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Absent,
    Detected,
    Reading,
    Retry,
    Ready,
}

/// Timing and retry limits for module access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub read_timeout: Duration,
    pub retry_budget: u32,
    pub retry_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&XcvrdConfig::default())
    }
}

impl PollSettings {
    pub fn from_config(config: &XcvrdConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            retry_budget: config.poll.retry_budget,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// What a single step did to the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Presence could not be read; nothing changed
    Skipped,
    /// State after the step
    Advanced(ModuleState),
}

/// Result of a staged identification read, committed only as a whole.
struct StagedRead {
    pages: RawPages,
    identity: NormalizedAttributes,
    power_mode: Option<&'static str>,
}

async fn read_block<H: ModuleHardware + ?Sized>(
    hw: &mut H,
    bus: &str,
    page_index: u16,
    settings: &PollSettings,
) -> Result<RawPage, HardwareError> {
    bounded(bus, settings.read_timeout, hw.read_page(bus, page_index)).await
}

/// Reads and decodes every identification page of `family`.
async fn read_identification<H: ModuleHardware + ?Sized>(
    hw: &mut H,
    bus: &str,
    family: ModuleFamily,
    settings: &PollSettings,
) -> Result<StagedRead, ModuleError> {
    let mut pages = RawPages::for_family(Some(family));

    if let Some(lower) = family.lower_page() {
        pages.lower = Some(read_block(hw, bus, lower, settings).await?);
    }
    let id_page = read_block(hw, bus, family.identification_page(), settings).await?;
    pages.identification = Some(id_page.clone());

    let (paged, power_mode) = match &pages.lower {
        Some(lower) => (
            !qsfp_flat_memory(lower)?,
            Some(qsfp_power_mode(lower)?.as_str()),
        ),
        None => (false, None),
    };

    if paged {
        for &page in family.upper_pages() {
            let index = ModuleFamily::upper_page_index(page);
            match read_block(hw, bus, index, settings).await {
                Ok(raw) if raw.len() >= PAGE_SIZE => {
                    pages.upper.insert(page, Some(raw));
                }
                Ok(raw) => {
                    debug!(bus, page, len = raw.len(), "xcvrd: short upper page, skipped");
                }
                Err(e) => {
                    debug!(bus, page, error = %e, "xcvrd: upper page unavailable");
                }
            }
        }
    }

    let identity = parse_identification(&id_page, &pages.upper, family)?;
    Ok(StagedRead {
        pages,
        identity,
        power_mode,
    })
}

fn publish_pages(port: &mut PortRecord) {
    let set = &mut port.attributes;
    set.set_opt(Field::A0, port.raw.identification.as_ref().map(RawPage::encode));
    set.set_opt(Field::A0Lower, port.raw.lower.as_ref().map(RawPage::encode));
    set.set_opt(Field::A2, port.raw.diagnostic.as_ref().map(RawPage::encode));
    for (page, slot) in &port.raw.upper {
        set.set_opt(Field::A0Upper(*page), slot.as_ref().map(RawPage::encode));
    }
}

fn commit_identification(port: &mut PortRecord, staged: StagedRead) {
    let StagedRead {
        pages,
        identity,
        power_mode,
    } = staged;

    port.raw = pages;
    port.optical = identity.optical;
    port.a2_read_requested = identity.optical && identity.ddm_supported;
    port.retry_count = 0;
    port.retry_deadline = None;
    port.last_error = None;
    port.state = ModuleState::Ready;

    identity.apply_to(&mut port.attributes);
    port.attributes.set_opt(Field::PowerMode, power_mode);
    port.attributes.clear(Field::ModuleError);
    if !port.a2_read_requested {
        port.attributes.retain(|f| !f.is_dom() && *f != Field::DomReadStatus);
    }
    publish_pages(port);

    info!(
        port = %port.key(),
        connector = %identity.connector,
        vendor = %identity.vendor.name,
        "xcvrd: module ready"
    );
    port.identity = Some(identity);
}

fn record_identification_failure(
    port: &mut PortRecord,
    error: ModuleError,
    settings: &PollSettings,
    now: Instant,
) {
    port.retry_count += 1;
    port.last_error = Some(error.to_string());

    if port.retry_count >= settings.retry_budget {
        warn!(
            port = %port.key(),
            attempts = port.retry_count,
            error = %error,
            "xcvrd: giving up on module until it is reinserted"
        );
        port.forget_module();
        // Keep the attempt count visible in the dump
        port.retry_count = settings.retry_budget;
        port.insertion_failed = true;
        port.state = ModuleState::Absent;
        port.attributes.set(Field::ModuleError, error.kind());
    } else {
        warn!(
            port = %port.key(),
            attempt = port.retry_count,
            error = %error,
            "xcvrd: module read failed, will retry"
        );
        port.state = ModuleState::Retry;
        port.retry_deadline = Some(now + settings.retry_backoff);
    }
}

async fn identify<H: ModuleHardware + ?Sized>(
    port: &mut PortRecord,
    hw: &mut H,
    settings: &PollSettings,
    now: Instant,
) {
    port.state = ModuleState::Reading;

    let result = match port.family() {
        Ok(family) => {
            let bus = port.bus_address().to_string();
            read_identification(hw, &bus, family, settings).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(staged) => commit_identification(port, staged),
        Err(e) => record_identification_failure(port, e, settings, now),
    }
}

/// Re-reads live monitors; failures only touch `dom_read_status`.
async fn refresh_dom<H: ModuleHardware + ?Sized>(
    port: &mut PortRecord,
    hw: &mut H,
    family: ModuleFamily,
    settings: &PollSettings,
) {
    if !port.a2_read_requested {
        return;
    }

    let bus = port.bus_address().to_string();
    let result = async {
        let page = read_block(hw, &bus, family.dom_page(), settings).await?;
        let reading = format_dom(&page, family)?;
        let power_mode = if family.is_qsfp() {
            Some(qsfp_power_mode(&page)?.as_str())
        } else {
            None
        };
        Ok::<_, ModuleError>((page, reading, power_mode))
    }
    .await;

    let (page, reading, power_mode) = match result {
        Ok(read) => read,
        Err(e) => {
            if port.attributes.set(Field::DomReadStatus, e.kind()) {
                warn!(port = %port.key(), error = %e, "xcvrd: DOM read failed");
            }
            return;
        }
    };

    if family.is_qsfp() {
        port.raw.lower = Some(page);
        port.attributes.set_opt(Field::PowerMode, power_mode);
    } else {
        port.raw.diagnostic = Some(page);
    }

    let set = &mut port.attributes;
    set.set(Field::DomReadStatus, DOM_READ_OK);
    set.set(Field::Temperature, &reading.temperature);
    set.set(Field::Voltage, &reading.voltage);
    set.set(Field::TempAlarm, reading.temp_alarm);
    set.set(Field::VoltageAlarm, reading.voltage_alarm);
    if let Some(lane) = reading.lanes.first() {
        set.set(Field::TxBias, &lane.tx_bias);
        set.set(Field::TxPower, &lane.tx_power);
        set.set(Field::RxPower, &lane.rx_power);
    }
    set.set(Field::TxBiasAlarm, reading.any_lane(|l| l.tx_bias_alarm));
    set.set(Field::TxPowerAlarm, reading.any_lane(|l| l.tx_power_alarm));
    set.set(Field::RxPowerAlarm, reading.any_lane(|l| l.rx_power_alarm));
    publish_pages(port);

    port.last_dom = Some(reading);
}

/// Writes the TX disable mask once per change while the module is optical.
async fn apply_tx_disable<H: ModuleHardware + ?Sized>(
    port: &mut PortRecord,
    hw: &mut H,
    family: ModuleFamily,
    settings: &PollSettings,
) {
    if !port.optical {
        return;
    }
    let mask = port.admin.tx_disable_mask(family.max_lanes());
    if port.applied_tx_disable == Some(mask) {
        return;
    }

    let (page_index, offset, value) = if family.is_qsfp() {
        (family.dom_page(), QSFP_TX_DISABLE, mask & 0x0F)
    } else {
        let current = port
            .raw
            .diagnostic
            .as_ref()
            .and_then(|p| p.as_bytes().get(usize::from(SFP_STATUS_CONTROL)).copied())
            .unwrap_or(0);
        let base = current & !SFP_SOFT_TX_DISABLE;
        let value = if mask & 0x01 != 0 {
            base | SFP_SOFT_TX_DISABLE
        } else {
            base
        };
        (family.dom_page(), SFP_STATUS_CONTROL, value)
    };

    let bus = port.bus_address().to_string();
    match bounded(
        &bus,
        settings.read_timeout,
        hw.write_byte(&bus, page_index, offset, value),
    )
    .await
    {
        Ok(()) => {
            info!(port = %port.key(), mask, "xcvrd: applied TX disable");
            port.applied_tx_disable = Some(mask);
        }
        Err(e) => {
            warn!(port = %port.key(), error = %e, "xcvrd: TX disable write failed, will retry");
        }
    }
}

async fn poll_ready<H: ModuleHardware + ?Sized>(
    port: &mut PortRecord,
    hw: &mut H,
    settings: &PollSettings,
) {
    if port.state != ModuleState::Ready {
        return;
    }
    if let Ok(family) = port.family() {
        refresh_dom(port, hw, family, settings).await;
        apply_tx_disable(port, hw, family, settings).await;
    }
}

/// Advances `port` one step.
pub async fn advance<H: ModuleHardware + ?Sized>(
    port: &mut PortRecord,
    hw: &mut H,
    settings: &PollSettings,
    now: Instant,
) -> StepOutcome {
    let bus = port.bus_address().to_string();
    let present = match bounded(&bus, settings.read_timeout, hw.read_presence(&bus)).await {
        Ok(present) => present,
        Err(e) => {
            warn!(port = %port.key(), error = %e, "xcvrd: presence read failed");
            port.last_error = Some(e.to_string());
            return StepOutcome::Skipped;
        }
    };

    if !present {
        if port.present || port.state != ModuleState::Absent {
            info!(port = %port.key(), "xcvrd: module removed");
            port.mark_removed();
        }
        return StepOutcome::Advanced(port.state);
    }

    match port.state {
        ModuleState::Absent => {
            if !port.insertion_failed {
                info!(port = %port.key(), "xcvrd: module detected");
                port.present = true;
                port.state = ModuleState::Detected;
            }
        }
        ModuleState::Detected | ModuleState::Reading => {
            identify(port, hw, settings, now).await;
            poll_ready(port, hw, settings).await;
        }
        ModuleState::Retry => {
            if port.retry_deadline.map_or(true, |deadline| now >= deadline) {
                identify(port, hw, settings, now).await;
                poll_ready(port, hw, settings).await;
            }
        }
        ModuleState::Ready => poll_ready(port, hw, settings).await,
    }

    StepOutcome::Advanced(port.state)
}

//! Synchronization driver.
//!
//! Walks every port once per tick: admin settings in, one state machine
//! step, lane fan-out, then at most one database write per dirty row. A row
//! stays dirty until the database confirms the write, so failures coalesce
//! into a single retry carrying the latest values.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::attributes::AttributeSet;
use crate::db::StateDatabase;
use crate::error::{Result, XcvrdError};
use crate::hardware::ModuleHardware;
use crate::inventory::{PortDescriptor, PortKey};
use crate::module_fsm::{advance, PollSettings, StepOutcome};
use crate::port::PortRecord;
use crate::registry::PortRegistry;

/// Requests served by the run loop between ticks.
#[derive(Debug)]
pub enum DriverCommand {
    /// Apply a new inventory
    Reload(Vec<PortDescriptor>),
    /// Render one port, or every port when `key` is `None`
    Dump {
        key: Option<PortKey>,
        reply: oneshot::Sender<Result<String>>,
    },
    Shutdown,
}

/// Database traffic of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub writes: usize,
    pub clears: usize,
    pub failed_writes: usize,
    /// Ports whose presence could not be read
    pub skipped: usize,
}

pub struct SyncDriver<H, D> {
    hardware: H,
    database: D,
    registry: PortRegistry,
    settings: PollSettings,
    interval: Duration,
}

impl<H: ModuleHardware, D: StateDatabase> SyncDriver<H, D> {
    pub fn new(
        hardware: H,
        database: D,
        registry: PortRegistry,
        settings: PollSettings,
        interval: Duration,
    ) -> Self {
        Self {
            hardware,
            database,
            registry,
            settings,
            interval,
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut D {
        &mut self.database
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PortRegistry {
        &mut self.registry
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now()).await
    }

    /// Runs one tick as of `now`.
    pub async fn tick_at(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        self.registry.release_reclaimed();
        let retired: Vec<String> = self.registry.retired().cloned().collect();
        for id in retired {
            match self.database.clear_record(&id).await {
                Ok(()) => {
                    self.registry.confirm_retired(&id);
                    report.clears += 1;
                }
                Err(e) => {
                    report.failed_writes += 1;
                    warn!(row = %id, error = %e, "xcvrd: clearing retired row failed, will retry");
                }
            }
        }

        for port in self.registry.iter_mut() {
            match self.database.read_admin_config(port.external_id()).await {
                Ok(config) => port.admin = config.unwrap_or_default(),
                Err(e) => {
                    debug!(port = %port.key(), error = %e, "xcvrd: admin config unavailable, keeping previous");
                }
            }

            if advance(port, &mut self.hardware, &self.settings, now).await == StepOutcome::Skipped {
                report.skipped += 1;
            }
            port.fan_out_lanes();
            flush_port(&mut self.database, port, &mut report).await;
        }

        debug!(
            writes = report.writes,
            clears = report.clears,
            failed = report.failed_writes,
            skipped = report.skipped,
            "xcvrd: tick complete"
        );
        report
    }

    fn handle_reload(&mut self, inventory: Vec<PortDescriptor>) {
        match self.registry.reload(&inventory) {
            Ok(summary) => info!(
                added = summary.added,
                retired = summary.retired,
                total = summary.total,
                "xcvrd: inventory reloaded"
            ),
            Err(e) => error!(error = %e, "xcvrd: inventory reload rejected, keeping current ports"),
        }
    }

    fn render_dump(&self, key: Option<PortKey>) -> Result<String> {
        match key {
            Some(key) => self
                .registry
                .dump(&key)?
                .ok_or_else(|| XcvrdError::UnknownPort(key.to_string())),
            None => self.registry.dump_all(),
        }
    }

    /// Ticks every interval and serves commands until `Shutdown` or until
    /// every sender is gone. Returns the driver for inspection.
    pub async fn run(mut self, mut commands: mpsc::Receiver<DriverCommand>) -> Self {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            ports = self.registry.len(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "xcvrd: driver started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                command = commands.recv() => match command {
                    Some(DriverCommand::Reload(inventory)) => self.handle_reload(inventory),
                    Some(DriverCommand::Dump { key, reply }) => {
                        if reply.send(self.render_dump(key)).is_err() {
                            debug!("xcvrd: dump requester went away");
                        }
                    }
                    Some(DriverCommand::Shutdown) | None => {
                        info!("xcvrd: driver stopping");
                        break;
                    }
                },
            }
        }

        self
    }
}

/// Writes one row if dirty: a clear when empty, else the full row.
async fn flush_row<D: StateDatabase + ?Sized>(
    database: &mut D,
    id: &str,
    set: &mut AttributeSet,
    report: &mut TickReport,
) {
    if !set.is_dirty() {
        return;
    }

    let result = if set.is_empty() {
        database.clear_record(id).await.map(|()| true)
    } else {
        database
            .write_record(id, &set.info_field_values(), &set.dom_field_values())
            .await
            .map(|()| false)
    };

    match result {
        Ok(cleared) => {
            set.mark_clean();
            if cleared {
                report.clears += 1;
            } else {
                report.writes += 1;
            }
        }
        Err(e) => {
            report.failed_writes += 1;
            warn!(row = %id, error = %e, "xcvrd: database write failed, will retry");
        }
    }
}

async fn flush_port<D: StateDatabase + ?Sized>(
    database: &mut D,
    port: &mut PortRecord,
    report: &mut TickReport,
) {
    for id in std::mem::take(&mut port.pending_lane_clears) {
        match database.clear_record(&id).await {
            Ok(()) => report.clears += 1,
            Err(e) => {
                report.failed_writes += 1;
                warn!(row = %id, error = %e, "xcvrd: clearing lane row failed, will retry");
                port.pending_lane_clears.push(id);
            }
        }
    }

    let id = port.external_id().to_string();
    flush_row(database, &id, &mut port.attributes, report).await;
    for lane in &mut port.lanes {
        flush_row(database, &lane.id, &mut lane.attributes, report).await;
    }
}

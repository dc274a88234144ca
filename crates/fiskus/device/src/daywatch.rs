//! Scheduled fiscal day management.
//!
//! Devices must open their fiscal day shortly after midnight and close
//! it before the next one starts. [`Daywatch`] sweeps all registered
//! devices on a timer, renews stale sessions and applies the action
//! the current wall clock calls for. A failure on one device never
//! stops the sweep for the others.

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tracing::{error, info};

use fiskus_types::FiscalDayStatus;

use crate::error::DeviceResult;
use crate::registry::DeviceRegistry;

/// Automation windows for fiscal day management.
#[derive(Clone, Debug)]
pub struct DaywatchConfig {
    /// Minutes after midnight during which closed days are opened.
    pub open_window_minutes: u32,
    /// Minutes before midnight during which open days are closed.
    pub close_window_minutes: u32,
}

impl Default for DaywatchConfig {
    fn default() -> Self {
        Self {
            open_window_minutes: 30,
            close_window_minutes: 30,
        }
    }
}

/// Action a sweep should take for one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DayAction {
    Open,
    Close,
}

/// Decide what, if anything, the clock calls for on a device.
///
/// A closed day is opened within the configured window after midnight.
/// An open day is closed within the window before midnight, and at
/// midnight exactly as the final catch-up.
pub fn planned_action(
    now: DateTime<Utc>,
    day_status: FiscalDayStatus,
    config: &DaywatchConfig,
) -> Option<DayAction> {
    let minute_of_day = now.hour() * 60 + now.minute();
    match day_status {
        FiscalDayStatus::Closed if minute_of_day < config.open_window_minutes => {
            Some(DayAction::Open)
        }
        FiscalDayStatus::Opened
            if minute_of_day >= 24 * 60 - config.close_window_minutes || minute_of_day == 0 =>
        {
            Some(DayAction::Close)
        }
        _ => None,
    }
}

/// Outcome counters for one sweep.
#[derive(Clone, Copy, Debug, Default)]
pub struct SweepReport {
    pub devices: usize,
    pub opened: usize,
    pub closed: usize,
    pub sessions_renewed: usize,
    pub statuses_checked: usize,
    pub failures: usize,
}

/// Sweeps registered devices and keeps their fiscal days on schedule.
pub struct Daywatch {
    registry: Arc<DeviceRegistry>,
    config: DaywatchConfig,
}

impl Daywatch {
    pub fn new(registry: Arc<DeviceRegistry>, config: DaywatchConfig) -> Self {
        Self { registry, config }
    }

    /// Run one sweep over all registered devices.
    pub async fn sweep(&self, now: DateTime<Utc>) -> DeviceResult<SweepReport> {
        let devices = self.registry.list().await?;
        let mut report = SweepReport {
            devices: devices.len(),
            ..SweepReport::default()
        };

        for device in devices {
            if device.session_expired(now) {
                match self.registry.ensure_session(&device.id).await {
                    Ok(_) => report.sessions_renewed += 1,
                    Err(e) => {
                        error!(device = %device.id, error = %e, "session renewal failed");
                        report.failures += 1;
                        continue;
                    }
                }
            }

            match planned_action(now, device.day_status, &self.config) {
                Some(DayAction::Open) => match self.registry.open_day(&device.id).await {
                    Ok(opened) => {
                        info!(
                            device = %device.id,
                            fiscal_day_no = opened.fiscal_day_no,
                            "daywatch opened fiscal day"
                        );
                        report.opened += 1;
                    }
                    Err(e) => {
                        error!(device = %device.id, error = %e, "scheduled day open failed");
                        report.failures += 1;
                    }
                },
                Some(DayAction::Close) => match self.registry.close_day(&device.id).await {
                    Ok(closed) => {
                        info!(
                            device = %device.id,
                            fiscal_day_no = closed.fiscal_day_no,
                            "daywatch closed fiscal day"
                        );
                        report.closed += 1;
                    }
                    Err(e) => {
                        error!(device = %device.id, error = %e, "scheduled day close failed");
                        report.failures += 1;
                    }
                },
                None => {}
            }

            match self.registry.check_status(&device.id).await {
                Ok(_) => report.statuses_checked += 1,
                Err(e) => {
                    error!(device = %device.id, error = %e, "status check failed");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}

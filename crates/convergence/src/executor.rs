//! Execution engine - runs unit sequences on hosts and fans out across the fleet
//!
//! Within a host, units run strictly in sequence order because later
//! preconditions read flags left by earlier units. Across hosts, each run
//! is independent: its own channel, its own flag map. A host that cannot
//! be reached, or whose channel dies, never affects the others.

use crate::context::{CancelToken, Channel, Connector, NoProgress, ProgressCallback, RunContext};
use crate::error::{ChannelError, Error, Result};
use crate::model::MachineModel;
use crate::planner::HostPlan;
use crate::types::{
    AuditResult, ConfigResult, ExecuteOptions, FleetReport, HostReport, Interruption, RunMode,
    UnitOutcome, UnitRecord,
};
use crate::unit::Unit;
use chrono::Utc;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Runs the per-host protocol for one or many hosts
pub struct Orchestrator<'a> {
    connector: &'a dyn Connector,
    options: ExecuteOptions,
    cancel: CancelToken,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Orchestrator<'a> {
    pub fn new(connector: &'a dyn Connector, options: ExecuteOptions) -> Self {
        Self {
            connector,
            options,
            cancel: CancelToken::new(),
            progress: &NoProgress,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Share a cancellation token with the caller
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Connect to one host and run its plan
    pub fn run_host(&self, machine: &MachineModel, plan: &HostPlan, mode: RunMode) -> HostReport {
        let host = machine.label();
        let labels = plan.labels();
        self.progress.on_host_start(host, labels.len());

        let report = if self.cancel.is_cancelled() {
            HostReport::not_run(host, mode, &labels, Interruption::Cancelled)
        } else {
            match self.connector.connect(machine) {
                Ok(mut channel) => execute_units(
                    host,
                    plan.units(),
                    channel.as_mut(),
                    mode,
                    self.options.unit_timeout,
                    &self.cancel,
                    self.progress,
                ),
                Err(e) => {
                    warn!("{host}: unreachable: {e}");
                    HostReport::not_run(host, mode, &labels, Interruption::Unreachable(e.to_string()))
                }
            }
        };

        info!("{host}: {mode} finished with status {}", report.status);
        self.progress.on_host_complete(&report);
        report
    }

    /// Run every host concurrently, with at most `jobs` in flight
    ///
    /// The report is keyed by host label and only returned once every
    /// host has reached a terminal state.
    pub fn run_fleet(&self, hosts: &[(&MachineModel, HostPlan)], mode: RunMode) -> Result<FleetReport> {
        let started_at = Utc::now();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let reports: Vec<HostReport> = pool.install(|| {
            hosts
                .par_iter()
                .map(|(machine, plan)| self.run_host_isolated(machine, plan, mode))
                .collect()
        });

        Ok(FleetReport {
            mode,
            started_at,
            finished_at: Utc::now(),
            hosts: reports.into_iter().map(|r| (r.host.clone(), r)).collect(),
        })
    }

    /// A panicking channel or profile must not take the other hosts down
    fn run_host_isolated(&self, machine: &MachineModel, plan: &HostPlan, mode: RunMode) -> HostReport {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_host(machine, plan, mode))) {
            Ok(report) => report,
            Err(_) => {
                warn!("{}: host run panicked", machine.label());
                let report = HostReport::not_run(
                    machine.label(),
                    mode,
                    &plan.labels(),
                    Interruption::Unreachable("internal error: host run panicked".to_string()),
                );
                self.progress.on_host_complete(&report);
                report
            }
        }
    }
}

/// Run `units` in order over an open channel
///
/// Cancellation is checked between units, never inside one. Once the
/// channel reports closure, every remaining unit is marked NOT_RUN.
pub fn execute_units(
    host: &str,
    units: &[Unit],
    channel: &mut dyn Channel,
    mode: RunMode,
    timeout: Duration,
    cancel: &CancelToken,
    progress: &dyn ProgressCallback,
) -> HostReport {
    let mut ctx = RunContext::new(channel, timeout, units);
    let mut records = Vec::with_capacity(units.len());
    let mut interruption = None;

    for unit in units {
        if cancel.is_cancelled() {
            interruption = Some(Interruption::Cancelled);
            break;
        }

        match step(unit, &mut ctx, mode) {
            Ok(record) => {
                debug!("{host}: {} -> {}", record.label, record.outcome);
                ctx.flags
                    .set_passed(unit.label(), record.outcome.counts_as_passed());
                progress.on_unit_complete(host, &record);
                records.push(record);
            }
            Err(e) => {
                warn!("{host}: channel lost at {}: {e}", unit.label());
                interruption = Some(Interruption::Unreachable(e.to_string()));
                break;
            }
        }
    }

    for unit in &units[records.len()..] {
        records.push(UnitRecord::new(unit.label(), UnitOutcome::NotRun));
    }

    HostReport::finish(host, mode, records, interruption)
}

/// Visit one unit: precondition, audit, then config or preview on FAIL
///
/// Returns an error only when the channel is dead.
fn step(unit: &Unit, ctx: &mut RunContext<'_>, mode: RunMode) -> std::result::Result<UnitRecord, ChannelError> {
    let label = unit.label();
    let unit_error = |e: ChannelError| {
        UnitRecord::new(label, UnitOutcome::Error)
            .with_message(format!("{}: {e}", unit.failure_message()))
    };

    let audit = match unit.audit(ctx) {
        Ok(result) => result,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => return Ok(unit_error(e)),
    };

    let record = match audit {
        AuditResult::Pass => UnitRecord::new(label, UnitOutcome::Pass),
        AuditResult::Skipped { reason } => {
            UnitRecord::new(label, UnitOutcome::Skipped).with_message(reason)
        }
        AuditResult::Error { message } => UnitRecord::new(label, UnitOutcome::Error)
            .with_message(format!("{}: {message}", unit.failure_message())),
        AuditResult::Fail { observed } => match mode {
            RunMode::Audit => {
                let record = UnitRecord::new(label, UnitOutcome::Fail);
                match observed {
                    Some(found) => record.with_message(format!("found '{found}'")),
                    None => record.with_message("action pending"),
                }
            }
            RunMode::DryRun => match unit.dry_run(ctx) {
                Ok(preview) => UnitRecord::new(label, UnitOutcome::Previewed)
                    .with_message(format!("{}\n{preview}", unit.failure_message())),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => unit_error(e),
            },
            RunMode::Config => match unit.config(ctx) {
                Ok(ConfigResult::Applied) => UnitRecord::new(label, UnitOutcome::Applied),
                Ok(ConfigResult::Skipped { reason }) => {
                    UnitRecord::new(label, UnitOutcome::Fail).with_message(reason)
                }
                Ok(ConfigResult::Error { message }) => {
                    UnitRecord::new(label, UnitOutcome::Error).with_message(message)
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => unit_error(e),
            },
        },
    };

    Ok(record)
}

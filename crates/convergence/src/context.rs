//! Run context and provider traits
//!
//! These traits keep the crate independent of any particular transport
//! or UI: a [`Connector`] opens one [`Channel`] per host, and a
//! [`ProgressCallback`] observes the run.

use crate::error::ChannelError;
use crate::model::MachineModel;
use crate::types::{CommandOutput, HostReport, UnitRecord};
use crate::unit::{Precondition, Unit};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A command session on one host
///
/// Implementations must report a dead session as
/// [`ChannelError::Closed`] and a command that merely did not return in
/// time as [`ChannelError::TimedOut`].
pub trait Channel: Send {
    /// Run shell text and wait for it to finish
    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ChannelError>;
}

/// Opens channels to machines
pub trait Connector: Send + Sync {
    /// Establish a channel, or fail with the reason the host is unreachable
    fn connect(&self, machine: &MachineModel) -> Result<Box<dyn Channel>, ChannelError>;
}

/// Progress callback for host runs
///
/// Called concurrently from worker threads during fleet runs.
pub trait ProgressCallback: Send + Sync {
    /// Called when a host's run begins
    fn on_host_start(&self, host: &str, units: usize);

    /// Called after each unit reaches a terminal state
    fn on_unit_complete(&self, host: &str, record: &UnitRecord);

    /// Called when a host's run reaches a terminal state
    fn on_host_complete(&self, report: &HostReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_host_start(&self, _host: &str, _units: usize) {}
    fn on_unit_complete(&self, _host: &str, _record: &UnitRecord) {}
    fn on_host_complete(&self, _report: &HostReport) {}
}

/// Cooperative cancellation shared by every host of a fleet run
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; in-flight hosts stop at the next unit boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Host-local flag state for one run
///
/// Holds each unit's pass flag and each parent's unchanged flag. Unchanged
/// flags start true and are only ever cleared.
#[derive(Debug, Clone, Default)]
pub struct Flags {
    passed: HashMap<String, bool>,
    unchanged: HashMap<String, bool>,
}

impl Flags {
    /// Fresh flags for a sequence, with every parent marked unchanged
    pub fn for_units(units: &[Unit]) -> Self {
        let mut flags = Self::default();
        for parent in units.iter().filter_map(Unit::parent) {
            flags.unchanged.insert(parent.to_string(), true);
        }
        flags
    }

    pub fn set_passed(&mut self, label: &str, passed: bool) {
        self.passed.insert(label.to_string(), passed);
    }

    /// Pass flag of a unit; units outside the run count as passed
    pub fn passed(&self, label: &str) -> bool {
        self.passed.get(label).copied().unwrap_or(true)
    }

    /// Monotonic: once false, stays false for the rest of the run
    pub fn clear_unchanged(&mut self, parent: &str) {
        self.unchanged.insert(parent.to_string(), false);
    }

    pub fn is_unchanged(&self, parent: &str) -> bool {
        self.unchanged.get(parent).copied().unwrap_or(true)
    }

    /// Evaluate a precondition against the current flag state
    pub fn evaluate(&self, precondition: &Precondition) -> bool {
        match precondition {
            Precondition::Proceed => true,
            Precondition::Passed(label) => self.passed(label),
            Precondition::Unchanged(parent) => self.is_unchanged(parent),
            Precondition::Changed(parent) => !self.is_unchanged(parent),
        }
    }
}

/// Context passed to unit operations
pub struct RunContext<'a> {
    /// Channel to the host being converged
    pub channel: &'a mut dyn Channel,
    /// Per-command timeout
    pub timeout: Duration,
    /// Flag state, the source of truth for preconditions
    pub flags: Flags,
}

impl<'a> RunContext<'a> {
    /// Create a context with flags primed for `units`
    pub fn new(channel: &'a mut dyn Channel, timeout: Duration, units: &[Unit]) -> Self {
        Self {
            channel,
            timeout,
            flags: Flags::for_units(units),
        }
    }

    /// Run shell text over the channel
    pub fn run(&mut self, command: &str) -> Result<CommandOutput, ChannelError> {
        self.channel.run(command, self.timeout)
    }
}

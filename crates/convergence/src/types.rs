//! Core types for unit convergence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Output;
use std::time::Duration;

/// Which path a run takes after an audit FAIL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Check only
    Audit,
    /// Show what config would do
    DryRun,
    /// Converge
    Config,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audit => "audit",
            Self::DryRun => "dry-run",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of auditing a single unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// State matches policy
    Pass,
    /// Precondition was false, audit not executed
    Skipped { reason: String },
    /// State differs from policy
    Fail { observed: Option<String> },
    /// The probe or script could not run
    Error { message: String },
}

impl AuditResult {
    /// PASS and SKIPPED both leave downstream units unblocked
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped { .. })
    }
}

/// Result of running a unit's config path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigResult {
    /// Config script exited cleanly
    Applied,
    /// Unit has nothing to apply
    Skipped { reason: String },
    /// Config script failed
    Error { message: String },
}

/// Final outcome of one unit in a host report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Pass,
    Skipped,
    Fail,
    Applied,
    Previewed,
    Error,
    NotRun,
}

impl UnitOutcome {
    /// Value of the unit's own flag for later preconditions
    pub fn counts_as_passed(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped | Self::Applied)
    }

    /// Unit matched policy without any action
    pub fn is_compliant(&self) -> bool {
        matches!(self, Self::Pass | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Skipped => "SKIPPED",
            Self::Fail => "FAIL",
            Self::Applied => "APPLIED",
            Self::Previewed => "PREVIEWED",
            Self::Error => "ERROR",
            Self::NotRun => "NOT_RUN",
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a host report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub label: String,
    pub outcome: UnitOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UnitRecord {
    pub fn new(label: &str, outcome: UnitOutcome) -> Self {
        Self {
            label: label.to_string(),
            outcome,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Terminal status of one host's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Every unit passed or was skipped
    Ok,
    /// Reachable, but some unit needed convergence or errored
    Degraded,
    /// Channel could not be established or died mid-sequence
    Unreachable,
    /// Stopped by cooperative cancellation
    Cancelled,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Degraded => "DEGRADED",
            Self::Unreachable => "UNREACHABLE",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of unit outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub applied: usize,
    pub previewed: usize,
    pub errors: usize,
    pub not_run: usize,
}

impl RunSummary {
    /// Units that were found out of policy
    pub fn needed_convergence(&self) -> usize {
        self.failed + self.applied + self.previewed
    }

    /// Total number of units accounted for
    pub fn total(&self) -> usize {
        self.passed
            + self.skipped
            + self.failed
            + self.applied
            + self.previewed
            + self.errors
            + self.not_run
    }

    pub fn add_outcome(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Pass => self.passed += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Fail => self.failed += 1,
            UnitOutcome::Applied => self.applied += 1,
            UnitOutcome::Previewed => self.previewed += 1,
            UnitOutcome::Error => self.errors += 1,
            UnitOutcome::NotRun => self.not_run += 1,
        }
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &RunSummary) {
        self.passed += other.passed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.applied += other.applied;
        self.previewed += other.previewed;
        self.errors += other.errors;
        self.not_run += other.not_run;
    }
}

/// Why a host run stopped before the end of its sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interruption {
    /// Channel could not be opened or died
    Unreachable(String),
    /// Cancellation was requested
    Cancelled,
}

/// Ordered record of every unit's outcome for one machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    pub mode: RunMode,
    pub status: HostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub units: Vec<UnitRecord>,
}

impl HostReport {
    /// Build a report and derive its terminal status
    pub fn finish(
        host: &str,
        mode: RunMode,
        units: Vec<UnitRecord>,
        interruption: Option<Interruption>,
    ) -> Self {
        let (status, message) = match interruption {
            Some(Interruption::Unreachable(reason)) => (HostStatus::Unreachable, Some(reason)),
            Some(Interruption::Cancelled) => (
                HostStatus::Cancelled,
                Some("cancelled before completion".to_string()),
            ),
            None if units.iter().all(|u| u.outcome.is_compliant()) => (HostStatus::Ok, None),
            None => (HostStatus::Degraded, None),
        };

        Self {
            host: host.to_string(),
            mode,
            status,
            message,
            units,
        }
    }

    /// Report for a host on which nothing ran
    pub fn not_run(host: &str, mode: RunMode, labels: &[&str], interruption: Interruption) -> Self {
        let units = labels
            .iter()
            .map(|label| UnitRecord::new(label, UnitOutcome::NotRun))
            .collect();
        Self::finish(host, mode, units, Some(interruption))
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for unit in &self.units {
            summary.add_outcome(unit.outcome);
        }
        summary
    }

    /// Find a unit's record by label
    pub fn unit(&self, label: &str) -> Option<&UnitRecord> {
        self.units.iter().find(|u| u.label == label)
    }
}

/// Aggregated result of a fleet-wide run, keyed by host label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts: BTreeMap<String, HostReport>,
}

impl FleetReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in self.hosts.values() {
            summary.merge(&report.summary());
        }
        summary
    }

    /// Number of hosts with the given status
    pub fn count(&self, status: HostStatus) -> usize {
        self.hosts.values().filter(|r| r.status == status).count()
    }

    /// Every host is fully compliant
    pub fn is_ok(&self) -> bool {
        self.hosts.values().all(|r| r.status == HostStatus::Ok)
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of hosts run concurrently
    pub jobs: usize,
    /// Upper bound for each command sent over a channel
    pub unit_timeout: Duration,
    /// Only run units whose label contains this substring
    pub only: Option<String>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            unit_timeout: Duration::from_secs(60),
            only: None,
        }
    }
}

/// Output from a command run over a channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str, outcome: UnitOutcome) -> UnitRecord {
        UnitRecord::new(label, outcome)
    }

    #[test]
    fn test_status_ok_when_compliant() {
        let report = HostReport::finish(
            "web1",
            RunMode::Audit,
            vec![
                record("a", UnitOutcome::Pass),
                record("b", UnitOutcome::Skipped),
            ],
            None,
        );
        assert_eq!(report.status, HostStatus::Ok);
        assert!(report.message.is_none());
    }

    #[test]
    fn test_status_degraded_after_convergence() {
        let report = HostReport::finish(
            "web1",
            RunMode::Config,
            vec![
                record("a", UnitOutcome::Pass),
                record("b", UnitOutcome::Applied),
            ],
            None,
        );
        assert_eq!(report.status, HostStatus::Degraded);
        assert_eq!(report.summary().needed_convergence(), 1);
    }

    #[test]
    fn test_not_run_report() {
        let report = HostReport::not_run(
            "db1",
            RunMode::Audit,
            &["a", "b"],
            Interruption::Unreachable("connection refused".into()),
        );
        assert_eq!(report.status, HostStatus::Unreachable);
        assert_eq!(report.summary().not_run, 2);
        assert_eq!(report.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_summary_merge() {
        let mut a = RunSummary {
            passed: 2,
            errors: 1,
            ..Default::default()
        };
        let b = RunSummary {
            passed: 1,
            applied: 3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.passed, 3);
        assert_eq!(a.applied, 3);
        assert_eq!(a.total(), 7);
    }

    #[test]
    fn test_outcome_flags() {
        assert!(UnitOutcome::Applied.counts_as_passed());
        assert!(UnitOutcome::Skipped.counts_as_passed());
        assert!(!UnitOutcome::Previewed.counts_as_passed());
        assert!(!UnitOutcome::Error.counts_as_passed());
        assert!(!UnitOutcome::Applied.is_compliant());
    }

    #[test]
    fn test_report_serializes_snake_case() {
        let report = HostReport::finish(
            "web1",
            RunMode::DryRun,
            vec![record("a", UnitOutcome::NotRun)],
            Some(Interruption::Cancelled),
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"mode\":\"dry_run\""));
        assert!(json.contains("\"status\":\"cancelled\""));
        assert!(json.contains("\"outcome\":\"not_run\""));
    }
}

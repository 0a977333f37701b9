//! Progress display for host runs

use convergence::{HostReport, HostStatus, ProgressCallback, UnitRecord};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// One bar across the fleet; the message follows the latest unit
pub struct FleetProgress {
    bar: ProgressBar,
}

impl FleetProgress {
    pub fn new(hosts: usize, visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(hosts as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} hosts ({pos}/{len}) [{bar:30.green/dim}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for FleetProgress {
    fn on_host_start(&self, host: &str, units: usize) {
        self.bar.set_message(format!("{host}: {units} units"));
    }

    fn on_unit_complete(&self, host: &str, record: &UnitRecord) {
        self.bar
            .set_message(format!("{host}: {} {}", record.label, record.outcome));
    }

    fn on_host_complete(&self, report: &HostReport) {
        if report.status == HostStatus::Unreachable {
            self.bar.println(format!(
                "  ✗ {} unreachable: {}",
                report.host,
                report.message.as_deref().unwrap_or("unknown error")
            ));
        }
        self.bar.inc(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence::{RunMode, UnitOutcome};

    #[test]
    fn test_hidden_progress_counts_hosts() {
        let progress = FleetProgress::new(2, false);
        progress.on_host_start("web1", 1);
        progress.on_unit_complete("web1", &UnitRecord::new("a", UnitOutcome::Pass));
        progress.on_host_complete(&HostReport::finish(
            "web1",
            RunMode::Audit,
            vec![UnitRecord::new("a", UnitOutcome::Pass)],
            None,
        ));
        assert_eq!(progress.bar.position(), 1);
        progress.finish();
    }
}

//! Report rendering - box-drawn host reports and the fleet summary

use colored::{ColoredString, Colorize};
use convergence::{FleetReport, HostReport, HostStatus, RunMode, RunSummary, UnitOutcome};
use std::process::ExitCode;

use crate::ui;

fn symbol(outcome: UnitOutcome) -> ColoredString {
    match outcome {
        UnitOutcome::Pass => "✓".green(),
        UnitOutcome::Skipped => "⊘".dimmed(),
        UnitOutcome::Fail => "✗".yellow(),
        UnitOutcome::Applied => "+".cyan(),
        UnitOutcome::Previewed => "~".yellow(),
        UnitOutcome::Error => "✗".red(),
        UnitOutcome::NotRun => "·".dimmed(),
    }
}

fn status_label(status: HostStatus) -> ColoredString {
    match status {
        HostStatus::Ok => status.as_str().green().bold(),
        HostStatus::Degraded => status.as_str().yellow().bold(),
        HostStatus::Unreachable => status.as_str().red().bold(),
        HostStatus::Cancelled => status.as_str().dimmed().bold(),
    }
}

/// Display one host's report
pub fn display_host(report: &HostReport, verbose: bool) {
    println!();
    println!(
        "┌─ {} ({}) {}",
        report.host.bold(),
        report.mode,
        status_label(report.status)
    );
    if let Some(message) = &report.message {
        println!("│ {}", message.dimmed());
    }
    println!("│");

    for unit in &report.units {
        let hide = unit.outcome == UnitOutcome::NotRun
            || (!verbose && unit.outcome.is_compliant());
        if hide {
            continue;
        }
        println!("│   {} {:<36} {}", symbol(unit.outcome), unit.label, unit.outcome.as_str().dimmed());
        if let Some(message) = &unit.message {
            for line in message.lines() {
                println!("│       {}", line.dimmed());
            }
        }
    }

    let summary = report.summary();
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ {}", summary_line(&summary));
    println!("└─────────────────────────────────────────────────────┘");
}

/// Display every host followed by the fleet totals
pub fn display_fleet(report: &FleetReport, verbose: bool) {
    for host in report.hosts.values() {
        display_host(host, verbose);
    }

    let elapsed = (report.finished_at - report.started_at).num_milliseconds();
    ui::header(&format!("Fleet {} ({} hosts)", report.mode, report.hosts.len()));
    let started = report.started_at.with_timezone(&chrono::Local);
    ui::kv("started", &started.format("%Y-%m-%d %H:%M:%S").to_string());
    for status in [
        HostStatus::Ok,
        HostStatus::Degraded,
        HostStatus::Unreachable,
        HostStatus::Cancelled,
    ] {
        let count = report.count(status);
        if count > 0 {
            ui::kv(status.as_str(), &count.to_string());
        }
    }
    ui::kv("units", &summary_line(&report.summary()));
    ui::kv("elapsed", &ui::format_elapsed(elapsed));

    println!();
    if report.is_ok() {
        ui::success("Every host matches policy");
    } else if report.count(HostStatus::Unreachable) > 0 {
        ui::warn("Some hosts could not be reached");
    } else if report.mode == RunMode::Config && exit_status(report.hosts.values()) == 0 {
        ui::success("Every host converged");
    } else {
        ui::warn("Some hosts are out of policy");
    }
}

fn summary_line(summary: &RunSummary) -> String {
    let mut parts = vec![format!("{} passed", summary.passed)];
    let counts = [
        (summary.skipped, "skipped"),
        (summary.failed, "failed"),
        (summary.applied, "applied"),
        (summary.previewed, "previewed"),
        (summary.errors, "errors"),
        (summary.not_run, "not run"),
    ];
    for (count, name) in counts {
        if count > 0 {
            parts.push(format!("{count} {name}"));
        }
    }
    parts.join(", ")
}

/// 0 when nothing is left to do, 1 when units are out of policy or
/// errored, 2 when a host could not be reached
pub fn exit_status<'a>(reports: impl IntoIterator<Item = &'a HostReport>) -> u8 {
    let mut code = 0;
    for report in reports {
        match report.status {
            HostStatus::Unreachable => return 2,
            HostStatus::Cancelled => code = 1,
            HostStatus::Ok | HostStatus::Degraded => {
                let summary = report.summary();
                if summary.failed + summary.previewed + summary.errors + summary.not_run > 0 {
                    code = 1;
                }
            }
        }
    }
    code
}

pub fn exit_code<'a>(reports: impl IntoIterator<Item = &'a HostReport>) -> ExitCode {
    ExitCode::from(exit_status(reports))
}

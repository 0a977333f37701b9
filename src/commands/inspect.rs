//! Offline commands: units, script, validate

use anyhow::Result;
use colored::Colorize;
use convergence::{AuditStrategy, NetworkModel, RunMode, Unit, render_script};
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::ExitCode;

use crate::Context;
use crate::{topology, ui};

fn strategy_name(unit: &Unit) -> &'static str {
    match unit.audit_strategy() {
        Some(AuditStrategy::ExactValue { .. }) => "exact",
        Some(AuditStrategy::ExitCode { .. }) => "exit",
        None => "action",
    }
}

/// List the compiled unit sequence of a host
pub fn units(ctx: &Context, host: &str) -> Result<ExitCode> {
    let network = topology::load(&ctx.settings.topology)?;
    let units = network.compile_units(host)?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(ExitCode::SUCCESS);
    }

    ui::header(&format!("{host}: {} units", units.len()));
    for (i, unit) in units.iter().enumerate() {
        let mut notes = Vec::new();
        if unit.precondition().flag().is_some() {
            notes.push(format!("when {}", unit.precondition()));
        }
        if let Some(parent) = unit.parent() {
            notes.push(format!("child of {parent}"));
        }
        println!(
            "  {:>3}  {:<36} {:<7} {}",
            i + 1,
            unit.label(),
            strategy_name(unit).cyan(),
            notes.join(", ").dimmed()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// Print a host's units as one shell script
pub fn script(ctx: &Context, host: &str, mode: RunMode) -> Result<ExitCode> {
    let network = topology::load(&ctx.settings.topology)?;
    let units = network.compile_units(host)?;
    print!("{}", render_script(host, &units, mode));
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    machines: usize,
    hosts: BTreeMap<String, usize>,
    unmanaged: Vec<String>,
}

fn check(network: &NetworkModel) -> Result<ValidationReport> {
    let hosts = network
        .compile_all()?
        .into_iter()
        .map(|(machine, plan)| (machine.label().to_string(), plan.len()))
        .collect();
    let unmanaged = network
        .machines()
        .filter(|m| !m.is_managed())
        .map(|m| m.label().to_string())
        .collect();

    Ok(ValidationReport {
        machines: network.len(),
        hosts,
        unmanaged,
    })
}

/// Load and compile everything without connecting anywhere
pub fn validate(ctx: &Context) -> Result<ExitCode> {
    let network = topology::load(&ctx.settings.topology)?;
    let report = check(&network)?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ExitCode::SUCCESS);
    }

    ui::header("Topology");
    ui::kv("file", &ctx.settings.topology.display().to_string());
    ui::kv("machines", &report.machines.to_string());
    for (host, count) in &report.hosts {
        ui::kv(host, &format!("{count} units"));
    }
    if !report.unmanaged.is_empty() {
        ui::dim(&format!("unmanaged: {}", report.unmanaged.join(", ")));
    }
    if !ctx.quiet {
        println!();
        ui::success("Topology is valid");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence::{MachineKind, MachineModel, StaticProfile, templates};

    #[test]
    fn test_check_counts_units() {
        let mut web = MachineModel::new("web1", MachineKind::Server);
        web.attach(StaticProfile::new(
            "base",
            vec![templates::install_package("curl_installed", "curl").unwrap()],
        ))
        .unwrap();
        let switch = MachineModel::new("switch", MachineKind::InternalOnlyDevice);
        let network = NetworkModel::from_machines([web, switch]).unwrap();

        let report = check(&network).unwrap();
        assert_eq!(report.machines, 2);
        assert_eq!(report.hosts.get("web1"), Some(&1));
        assert_eq!(report.unmanaged, vec!["switch".to_string()]);
    }

    #[test]
    fn test_strategy_name() {
        let unit = templates::restart_on_change("r", "nginx", "nginx_config").unwrap();
        assert_eq!(strategy_name(&unit), "action");
    }
}

//! audit / dry-run / config, on one host or the whole fleet

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use convergence::{CancelToken, ExecuteOptions, NetworkModel, Orchestrator, RunMode};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use crate::Context;
use crate::channel::ShellConnector;
use crate::cli::RunArgs;
use crate::progress::FleetProgress;
use crate::{report, topology, ui};

pub fn run(ctx: &Context, mode: RunMode, args: &RunArgs) -> Result<ExitCode> {
    let network = topology::load(&ctx.settings.topology)?;

    // Construction errors abort here, before any host is contacted
    let hosts = match &args.host {
        Some(host) => {
            network.plan(host)?;
            1
        }
        None => network.compile_all()?.len(),
    };

    if hosts == 0 {
        ui::warn("No managed machines in topology");
        return Ok(ExitCode::SUCCESS);
    }

    if mode == RunMode::Config && !args.yes && !confirm_config(args.host.as_deref(), hosts)? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExitCode::from(1));
    }

    if let Some(only) = &args.only
        && !ctx.quiet
        && !ctx.json
    {
        ui::info(&format!("Only running units matching '{only}'"));
    }

    let connector = ShellConnector::new(ctx.settings.ssh.clone(), ctx.settings.local);
    let options = ExecuteOptions {
        jobs: ctx.settings.jobs,
        unit_timeout: ctx.settings.unit_timeout,
        only: args.only.clone(),
    };
    let cancel = CancelToken::new();
    if let Some(secs) = args.deadline {
        arm_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    let progress = FleetProgress::new(hosts, !ctx.quiet && !ctx.json);
    let orchestrator = Orchestrator::new(&connector, options)
        .with_cancel(cancel)
        .with_progress(&progress);

    let result = execute(&network, &orchestrator, mode, args.host.as_deref(), ctx);
    progress.finish();
    result
}

fn execute(
    network: &NetworkModel,
    orchestrator: &Orchestrator<'_>,
    mode: RunMode,
    host: Option<&str>,
    ctx: &Context,
) -> Result<ExitCode> {
    let verbose = ctx.verbose > 0;
    match host {
        Some(host) => {
            let report = network.run(host, orchestrator, mode)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report::display_host(&report, verbose);
            }
            Ok(report::exit_code([&report]))
        }
        None => {
            let report = network.run_all(orchestrator, mode)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report::display_fleet(&report, verbose);
            }
            Ok(report::exit_code(report.hosts.values()))
        }
    }
}

/// Cancel the run once `after` has elapsed; in-flight units finish first
fn arm_deadline(cancel: CancelToken, after: Duration) {
    thread::spawn(move || {
        thread::sleep(after);
        log::warn!("Deadline of {}s reached, cancelling", after.as_secs());
        cancel.cancel();
    });
}

/// Confirm with user
fn confirm_config(host: Option<&str>, hosts: usize) -> Result<bool> {
    use dialoguer::Confirm;

    let prompt = match host {
        Some(host) => format!("Apply configuration to {host}?"),
        None => format!("Apply configuration to {hosts} hosts?"),
    };

    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("Confirmation needs a terminal; pass --yes to skip it")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, SshConfig};
    use std::fs;

    fn context(topology: std::path::PathBuf) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            json: true,
            settings: Settings {
                topology,
                jobs: 2,
                unit_timeout: Duration::from_secs(10),
                ssh: SshConfig::default(),
                local: true,
            },
        }
    }

    #[test]
    fn test_local_audit_of_custom_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        fs::write(
            &path,
            r#"
[[machines]]
label = "local"
type = "server"

[[machines.profiles]]
kind = "units"

[[machines.profiles.units]]
label = "shell_works"
test = "true"

[[machines.profiles.units]]
label = "echo_matches"
probe = "echo hello"
expected = "hello"
"#,
        )
        .unwrap();

        let ctx = context(path);
        let code = run(&ctx, RunMode::Audit, &RunArgs::default()).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }

    #[test]
    fn test_local_config_converges_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("managed.txt");
        let path = dir.path().join("topology.toml");
        fs::write(
            &path,
            format!(
                r#"
[[machines]]
label = "local"
type = "server"

[[machines.profiles]]
kind = "files"

[[machines.profiles.files]]
path = "{}"
contents = "managed by fleetward"
"#,
                target.display()
            ),
        )
        .unwrap();

        let ctx = context(path);
        let args = RunArgs {
            yes: true,
            ..Default::default()
        };
        assert_eq!(run(&ctx, RunMode::Config, &args).unwrap(), ExitCode::SUCCESS);
        assert_eq!(fs::read_to_string(&target).unwrap().trim(), "managed by fleetward");

        // second pass finds nothing to do
        assert_eq!(run(&ctx, RunMode::Audit, &args).unwrap(), ExitCode::SUCCESS);
    }

    #[test]
    fn test_unknown_host_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.toml");
        fs::write(&path, "machines = []").unwrap();

        let ctx = context(path);
        let args = RunArgs {
            host: Some("ghost".to_string()),
            ..Default::default()
        };
        assert!(run(&ctx, RunMode::Audit, &args).is_err());
    }
}

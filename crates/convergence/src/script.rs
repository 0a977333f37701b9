//! Render a host's unit sequence as a single POSIX shell script
//!
//! The rendered script reproduces the per-unit protocol with shell
//! variables: `<label>=1|0` for each unit's pass flag and
//! `<parent>_unchanged=1|0` for each parent. It is meant for shipping to
//! a host that is run as a whole, or for review. The orchestrator does
//! not use it; its flag map is the source of truth during a run.

use crate::types::RunMode;
use crate::unit::{AuditStrategy, Precondition, Unit};
use std::collections::BTreeSet;

/// Turn a label into a valid shell variable name
pub fn shell_var(name: &str) -> String {
    let mut var: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if var.is_empty() || var.starts_with(|c: char| c.is_ascii_digit()) {
        var.insert(0, '_');
    }
    var
}

/// Shell variable tracking whether a parent is still unchanged
pub fn unchanged_var(parent: &str) -> String {
    format!("{}_unchanged", shell_var(parent))
}

/// Holds a child unit's exit code while its parent's unchanged flag is cleared
pub(crate) const RC_VAR: &str = "fw_rc";

fn output_var(var: &str) -> String {
    format!("{var}_out")
}

fn status_var(var: &str) -> String {
    format!("{var}_rc")
}

/// Every shell variable a unit labelled `label` writes in a rendered script
pub(crate) fn unit_vars(label: &str) -> Vec<String> {
    let var = shell_var(label);
    let out = output_var(&var);
    let rc = status_var(&var);
    vec![var, out, rc]
}

/// Single-quote a string for the shell
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

fn condition(precondition: &Precondition) -> String {
    match precondition {
        Precondition::Proceed => "true".to_string(),
        Precondition::Passed(label) => format!("[ \"${{{}:-1}}\" = 1 ]", shell_var(label)),
        Precondition::Unchanged(parent) => {
            format!("[ \"${{{}:-1}}\" = 1 ]", unchanged_var(parent))
        }
        Precondition::Changed(parent) => format!("[ \"${{{}:-1}}\" = 0 ]", unchanged_var(parent)),
    }
}

fn indent(text: &str, depth: usize) -> String {
    let pad = "    ".repeat(depth);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sets `var` to 1 (pass), 0 (fail) or 2 (probe could not run)
fn render_audit(unit: &Unit, var: &str) -> String {
    match unit.audit_strategy() {
        None => format!("{var}=0"),
        Some(AuditStrategy::ExactValue { probe, expected }) => {
            let out = output_var(var);
            let rc = status_var(var);
            format!(
                "{out}=$(\n{}\n)\n{rc}=$?\n\
                 {out}=\"${{{out}#\"${{{out}%%[![:space:]]*}}\"}}\"\n\
                 {out}=\"${{{out}%\"${{{out}##*[![:space:]]}}\"}}\"\n\
                 if [ \"${rc}\" -eq 126 ] || [ \"${rc}\" -eq 127 ]; then {var}=2\n\
                 elif [ \"${out}\" = {} ]; then {var}=1; else {var}=0; fi",
                indent(probe, 1),
                shell_quote(expected.trim())
            )
        }
        Some(AuditStrategy::ExitCode { script }) => format!(
            "if (\n{}\n) >/dev/null 2>&1; then {var}=1; else {var}=0; fi",
            indent(script, 1)
        ),
    }
}

fn render_change(unit: &Unit, var: &str, mode: RunMode) -> String {
    let label = shell_quote(unit.label());
    let clear = unit
        .parent()
        .map(|p| format!("\n{}=0", unchanged_var(p)))
        .unwrap_or_default();

    match mode {
        RunMode::Audit => format!("echo \"FAIL \"{label}"),
        RunMode::DryRun => {
            let preview = if unit.dry_run_fragment().is_empty() {
                format!("echo {}", shell_quote(&format!("would run: {}", unit.config_fragment())))
            } else {
                unit.dry_run_fragment().to_string()
            };
            format!("echo \"PREVIEW \"{label}\n{preview}{clear}")
        }
        RunMode::Config if unit.config_fragment().is_empty() => {
            format!("echo \"FAIL \"{label}\" (no config script)\"")
        }
        RunMode::Config => {
            let rc = status_var(var);
            format!(
                "{}\n{rc}=$?{clear}\nif [ \"${rc}\" -eq 0 ]; then {var}=1; echo \"APPLIED \"{label}; else echo \"ERROR \"{label}; fi",
                unit.config_fragment()
            )
        }
    }
}

/// Render `units` as one script for `mode`
pub fn render_script(host: &str, units: &[Unit], mode: RunMode) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    out.push_str(&format!("# fleetward {mode} script for {host}\n"));

    let parents: BTreeSet<&str> = units.iter().filter_map(Unit::parent).collect();
    if !parents.is_empty() {
        out.push('\n');
        for parent in parents {
            out.push_str(&format!("{}=1\n", unchanged_var(parent)));
        }
    }

    for unit in units {
        let var = shell_var(unit.label());
        let label = shell_quote(unit.label());

        let probe_error = match unit.audit_strategy() {
            Some(AuditStrategy::ExactValue { .. }) => format!(
                "\nelif [ \"${var}\" = 2 ]; then\n    {var}=0\n    echo \"ERROR \"{label}\" (probe could not run)\""
            ),
            _ => String::new(),
        };
        let mut body = render_audit(unit, &var);
        body.push_str(&format!(
            "\nif [ \"${var}\" = 1 ]; then\n    echo \"PASS \"{label}{probe_error}\nelse\n{}\nfi",
            indent(&render_change(unit, &var, mode), 1)
        ));

        out.push_str(&format!(
            "\n# {}\nif {}; then\n{}\nelse\n    echo \"SKIPPED \"{label}\n    {var}=1\nfi\n",
            unit.label(),
            condition(unit.precondition()),
            indent(&body, 1)
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_var() {
        assert_eq!(shell_var("nginx_installed"), "nginx_installed");
        assert_eq!(shell_var("php-fpm.service"), "php_fpm_service");
        assert_eq!(shell_var("9p_mounted"), "_9p_mounted");
        assert_eq!(unchanged_var("nginx-config"), "nginx_config_unchanged");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_render_config_script() {
        let units = vec![
            Unit::exact_value("nginx_installed", "dpkg-query -W -f='${Status}' nginx")
                .expected("install ok installed")
                .config("apt-get install --assume-yes nginx")
                .build()
                .unwrap(),
            Unit::exit_code("nginx_conf", "test -f /etc/nginx/nginx.conf")
                .requires("nginx_installed")
                .config("touch /etc/nginx/nginx.conf")
                .child_of("nginx_config")
                .build()
                .unwrap(),
            Unit::action("nginx_restarted")
                .precondition(Precondition::Changed("nginx_config".into()))
                .config("systemctl restart nginx")
                .build()
                .unwrap(),
        ];

        let script = render_script("web1", &units, RunMode::Config);
        assert!(script.starts_with("#!/bin/sh\n# fleetward config script for web1\n"));
        assert!(script.contains("nginx_config_unchanged=1\n"));
        assert!(script.contains("if [ \"$nginx_installed_out\" = 'install ok installed' ]"));
        assert!(script.contains("if [ \"${nginx_installed:-1}\" = 1 ]; then"));
        assert!(script.contains("if [ \"${nginx_config_unchanged:-1}\" = 0 ]; then"));
        assert!(script.contains("        nginx_config_unchanged=0"));
        assert!(script.contains("apt-get install --assume-yes nginx"));
    }

    fn run_sh(script: &str) -> String {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .output()
            .unwrap();
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    #[test]
    fn test_exact_value_trims_like_the_engine() {
        let units = vec![
            Unit::exact_value("padded", "printf '  ok\\n\\n'")
                .expected("ok")
                .build()
                .unwrap(),
            Unit::exact_value("blank", "printf ' \\t '")
                .expected("")
                .build()
                .unwrap(),
            Unit::exact_value("other", "echo nope")
                .expected("ok")
                .build()
                .unwrap(),
        ];
        let out = run_sh(&render_script("web1", &units, RunMode::Audit));
        assert_eq!(out.lines().collect::<Vec<_>>(), vec!["PASS padded", "PASS blank", "FAIL other"]);
    }

    #[test]
    fn test_probe_that_cannot_run_is_an_error() {
        let units = vec![
            Unit::exact_value("tool_version", "fleetward-no-such-tool --version")
                .expected("1.0")
                .config("echo installing")
                .build()
                .unwrap(),
            Unit::exit_code("gated", "true")
                .requires("tool_version")
                .build()
                .unwrap(),
        ];
        let out = run_sh(&render_script("web1", &units, RunMode::Config));
        assert_eq!(
            out.lines().collect::<Vec<_>>(),
            vec!["ERROR tool_version (probe could not run)", "SKIPPED gated"]
        );
    }

    #[test]
    fn test_render_audit_script_never_contains_config() {
        let units = vec![
            Unit::exit_code("sshd_enabled", "systemctl is-enabled --quiet ssh")
                .config("systemctl enable ssh")
                .build()
                .unwrap(),
        ];
        let script = render_script("web1", &units, RunMode::Audit);
        assert!(!script.contains("systemctl enable ssh"));
        assert!(script.contains("echo \"FAIL \"'sshd_enabled'"));
    }
}

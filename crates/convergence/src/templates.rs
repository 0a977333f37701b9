//! Canned unit templates
//!
//! Reusable definitions for the common package/service/file patterns.
//! These are factory functions over [`Unit`], not subtypes: each one only
//! chooses an audit strategy and scripts. Targets Debian-family hosts
//! (dpkg, apt, systemd).

use crate::error::UnitError;
use crate::script::shell_quote;
use crate::unit::{Precondition, Unit};

/// Package is installed
pub fn install_package(label: &str, package: &str) -> Result<Unit, UnitError> {
    let quoted = shell_quote(package);
    Unit::exact_value(
        label,
        &format!("dpkg-query --show --showformat='${{Status}}' {quoted} 2>/dev/null"),
    )
    .expected("install ok installed")
    .config(&format!(
        "export DEBIAN_FRONTEND=noninteractive\napt-get update && apt-get install --assume-yes {quoted}"
    ))
    .dry_run(&format!("apt-get install --simulate {quoted}"))
    .message(&format!("Couldn't install {package}"))
    .build()
}

/// Service is enabled at boot; gated on the unit that installs it
pub fn enabled_service(label: &str, service: &str, installed: &str) -> Result<Unit, UnitError> {
    let quoted = shell_quote(service);
    Unit::exit_code(label, &format!("systemctl is-enabled --quiet {quoted}"))
        .requires(installed)
        .config(&format!("systemctl enable {quoted}"))
        .dry_run(&echo(&format!("would enable {service}")))
        .message(&format!("Couldn't enable {service} at boot"))
        .build()
}

/// Service is active and running; a FAIL restarts it
pub fn running_service(label: &str, service: &str, enabled: &str) -> Result<Unit, UnitError> {
    let quoted = shell_quote(service);
    Unit::exact_value(
        label,
        &format!(
            "echo \"$(systemctl show --property=ActiveState --value {quoted})($(systemctl show --property=SubState --value {quoted}))\""
        ),
    )
    .expected("active(running)")
    .requires(enabled)
    .config(&format!("systemctl restart {quoted}"))
    .dry_run(&echo(&format!("would restart {service}")))
    .message(&format!("{service} is not running"))
    .build()
}

/// File has exactly `contents`; optionally a child of `parent`
pub fn file_contents(
    label: &str,
    path: &str,
    contents: &str,
    parent: Option<&str>,
) -> Result<Unit, UnitError> {
    let quoted_path = shell_quote(path);
    let mut builder = Unit::exact_value(label, &format!("cat {quoted_path} 2>/dev/null"))
        .expected(contents.trim())
        .config(&format!(
            "mkdir -p \"$(dirname {quoted_path})\"\nprintf '%s\\n' {} > {quoted_path}",
            shell_quote(contents.trim())
        ))
        .dry_run(&format!(
            "{}\ndiff {quoted_path} - <<'FLEETWARD_EOF' || true\n{}\nFLEETWARD_EOF",
            echo(&format!("would write {path}")),
            contents.trim()
        ))
        .message(&format!("Couldn't write {path}"));
    if let Some(parent) = parent {
        builder = builder.child_of(parent);
    }
    builder.build()
}

/// Directory exists
pub fn directory_exists(label: &str, path: &str) -> Result<Unit, UnitError> {
    let quoted = shell_quote(path);
    Unit::exit_code(label, &format!("[ -d {quoted} ]"))
        .config(&format!("mkdir -p {quoted}"))
        .dry_run(&echo(&format!("would create {path}")))
        .message(&format!("Couldn't create {path}"))
        .build()
}

/// Restart a service once any child of `parent` has changed something
pub fn restart_on_change(label: &str, service: &str, parent: &str) -> Result<Unit, UnitError> {
    Unit::action(label)
        .precondition(Precondition::Changed(parent.to_string()))
        .config(&format!("systemctl restart {}", shell_quote(service)))
        .dry_run(&echo(&format!("would restart {service}")))
        .message(&format!("Couldn't restart {service} after configuration change"))
        .build()
}

fn echo(text: &str) -> String {
    format!("echo {}", shell_quote(text))
}

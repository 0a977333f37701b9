//! Units of convergence
//!
//! A [`Unit`] is a named, idempotent check-and-fix definition. Its audit
//! strategy decides whether the host already matches policy; only a FAIL
//! lets its config or dry-run script run. A unit with a parent link is a
//! child unit: whenever its config or dry-run path runs it clears the
//! parent's unchanged flag, both in the run context and in the shell text
//! it emits.
//!
//! Behavioral differences between units are data, not subtypes. Build
//! units with [`Unit::exact_value`], [`Unit::exit_code`] or
//! [`Unit::action`], or use the canned templates in [`crate::templates`].

use crate::context::RunContext;
use crate::error::{ChannelError, UnitError};
use crate::script::{RC_VAR, unchanged_var};
use crate::types::{AuditResult, CommandOutput, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gate deciding whether a unit's audit runs at all
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// Always run
    #[default]
    Proceed,
    /// Run if the named earlier unit passed, was skipped, or was applied
    Passed(String),
    /// Run while no child of the parent has converged
    Unchanged(String),
    /// Run once some child of the parent has converged or would converge
    Changed(String),
}

impl Precondition {
    /// Label or parent this precondition reads, if any
    pub fn flag(&self) -> Option<&str> {
        match self {
            Self::Proceed => None,
            Self::Passed(name) | Self::Unchanged(name) | Self::Changed(name) => Some(name),
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proceed => f.write_str("proceed"),
            Self::Passed(label) => write!(f, "{label} passed"),
            Self::Unchanged(parent) => write!(f, "{parent} unchanged"),
            Self::Changed(parent) => write!(f, "{parent} changed"),
        }
    }
}

/// How a unit decides PASS or FAIL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStrategy {
    /// Trimmed probe output must equal `expected`
    ExactValue { probe: String, expected: String },
    /// Script must exit 0
    ExitCode { script: String },
}

/// One idempotent state-check-and-fix definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    label: String,
    precondition: Precondition,
    audit: Option<AuditStrategy>,
    config: String,
    dry_run: String,
    failure_message: String,
    parent: Option<String>,
}

impl Unit {
    /// Start a unit audited by comparing probe output with an expected value
    pub fn exact_value(label: &str, probe: &str) -> UnitBuilder {
        UnitBuilder::new(
            label,
            Test::ExactValue {
                probe: probe.to_string(),
                expected: None,
            },
        )
    }

    /// Start a unit audited by a script's exit code
    pub fn exit_code(label: &str, script: &str) -> UnitBuilder {
        UnitBuilder::new(
            label,
            Test::ExitCode {
                script: script.to_string(),
            },
        )
    }

    /// Start a proceed-only action unit with no audit
    pub fn action(label: &str) -> UnitBuilder {
        UnitBuilder::new(label, Test::None)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn precondition(&self) -> &Precondition {
        &self.precondition
    }

    pub fn audit_strategy(&self) -> Option<&AuditStrategy> {
        self.audit.as_ref()
    }

    pub fn failure_message(&self) -> &str {
        &self.failure_message
    }

    /// Parent whose unchanged flag this unit clears, if it is a child unit
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Proceed-only units have no audit and always take the FAIL path
    pub fn is_action(&self) -> bool {
        self.audit.is_none()
    }

    /// Raw config fragment as authored
    pub fn config_fragment(&self) -> &str {
        &self.config
    }

    /// Raw dry-run fragment as authored
    pub fn dry_run_fragment(&self) -> &str {
        &self.dry_run
    }

    /// Config text as sent to the host, including the parent flag clear
    pub fn config_script(&self) -> String {
        self.emit(&self.config)
    }

    /// Dry-run text as sent to the host, including the parent flag clear
    pub fn dry_run_script(&self) -> String {
        self.emit(&self.dry_run)
    }

    fn emit(&self, script: &str) -> String {
        match &self.parent {
            None => script.to_string(),
            Some(parent) => format!(
                "{script}\n{RC_VAR}=$?\n{}=0\nexit ${RC_VAR}",
                unchanged_var(parent)
            ),
        }
    }

    fn has_change_path(&self) -> bool {
        !self.config.is_empty() || !self.dry_run.is_empty()
    }

    /// Check whether the host already matches policy
    ///
    /// A false precondition skips the audit entirely. Only a dead channel
    /// is returned as an error; everything else is an [`AuditResult`].
    pub fn audit(&self, ctx: &mut RunContext<'_>) -> Result<AuditResult, ChannelError> {
        if !ctx.flags.evaluate(&self.precondition) {
            return Ok(AuditResult::Skipped {
                reason: format!("precondition not met: {}", self.precondition),
            });
        }

        match &self.audit {
            None => Ok(AuditResult::Fail { observed: None }),
            Some(AuditStrategy::ExactValue { probe, expected }) => {
                let output = ctx.run(probe)?;
                // 126/127: the shell could not execute the probe at all
                if matches!(output.exit_code, 126 | 127) {
                    return Ok(AuditResult::Error {
                        message: format!("probe could not run: {}", output.stderr_str().trim()),
                    });
                }
                let observed = output.stdout_str().trim().to_string();
                if observed == expected.trim() {
                    Ok(AuditResult::Pass)
                } else {
                    Ok(AuditResult::Fail {
                        observed: Some(observed),
                    })
                }
            }
            Some(AuditStrategy::ExitCode { script }) => {
                let output = ctx.run(script)?;
                if output.success() {
                    Ok(AuditResult::Pass)
                } else {
                    Ok(AuditResult::Fail {
                        observed: Some(format!("exit code {}", output.exit_code)),
                    })
                }
            }
        }
    }

    /// Describe what config would do without doing it
    ///
    /// Only meaningful after a FAIL audit.
    pub fn dry_run(&self, ctx: &mut RunContext<'_>) -> Result<String, ChannelError> {
        if !self.has_change_path() {
            return Ok("nothing to apply".to_string());
        }
        if let Some(parent) = &self.parent {
            ctx.flags.clear_unchanged(parent);
        }
        if self.dry_run.is_empty() {
            return Ok(format!("would run: {}", self.config.trim()));
        }

        let output = ctx.run(&self.dry_run_script())?;
        let mut report = output.stdout_str().trim().to_string();
        if !output.success() {
            let stderr = output.stderr_str();
            if !report.is_empty() {
                report.push('\n');
            }
            report.push_str(&format!(
                "preview exited with {}: {}",
                output.exit_code,
                stderr.trim()
            ));
        }
        Ok(report)
    }

    /// Converge the host; only called after a FAIL audit
    pub fn config(&self, ctx: &mut RunContext<'_>) -> Result<ConfigResult, ChannelError> {
        if self.config.is_empty() {
            return Ok(ConfigResult::Skipped {
                reason: "no config script".to_string(),
            });
        }
        if let Some(parent) = &self.parent {
            ctx.flags.clear_unchanged(parent);
        }

        let output = ctx.run(&self.config_script())?;
        if output.success() {
            Ok(ConfigResult::Applied)
        } else {
            Ok(ConfigResult::Error {
                message: self.describe_failure(&output),
            })
        }
    }

    fn describe_failure(&self, output: &CommandOutput) -> String {
        let stderr = output.stderr_str();
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("{} (exit code {})", self.failure_message, output.exit_code)
        } else {
            format!(
                "{} (exit code {}): {}",
                self.failure_message, output.exit_code, stderr
            )
        }
    }
}

#[derive(Debug, Clone)]
enum Test {
    ExactValue {
        probe: String,
        expected: Option<String>,
    },
    ExitCode {
        script: String,
    },
    None,
}

/// Builder for [`Unit`]; validation happens in [`UnitBuilder::build`]
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    label: String,
    test: Test,
    precondition: Precondition,
    config: String,
    dry_run: String,
    failure_message: Option<String>,
    parent: Option<String>,
}

impl UnitBuilder {
    fn new(label: &str, test: Test) -> Self {
        Self {
            label: label.trim().to_string(),
            test,
            precondition: Precondition::Proceed,
            config: String::new(),
            dry_run: String::new(),
            failure_message: None,
            parent: None,
        }
    }

    /// Expected value for an exact-value test
    pub fn expected(mut self, value: &str) -> Self {
        if let Test::ExactValue { expected, .. } = &mut self.test {
            *expected = Some(value.to_string());
        }
        self
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    /// Gate on an earlier unit having passed
    pub fn requires(self, label: &str) -> Self {
        self.precondition(Precondition::Passed(label.to_string()))
    }

    pub fn config(mut self, script: &str) -> Self {
        self.config = script.trim().to_string();
        self
    }

    pub fn dry_run(mut self, script: &str) -> Self {
        self.dry_run = script.trim().to_string();
        self
    }

    pub fn message(mut self, message: &str) -> Self {
        self.failure_message = Some(message.to_string());
        self
    }

    /// Make this a child unit reporting to `parent`
    pub fn child_of(mut self, parent: &str) -> Self {
        self.parent = Some(parent.trim().to_string());
        self
    }

    pub fn build(self) -> Result<Unit, UnitError> {
        let label = self.label;
        if label.is_empty() {
            return Err(UnitError::EmptyLabel);
        }
        let malformed = |reason: &str| UnitError::Malformed {
            label: label.clone(),
            reason: reason.to_string(),
        };

        let audit = match self.test {
            Test::ExactValue { probe, expected } => {
                if probe.trim().is_empty() {
                    return Err(malformed("exact-value test has an empty probe"));
                }
                let Some(expected) = expected else {
                    return Err(UnitError::MissingExpected { label });
                };
                Some(AuditStrategy::ExactValue { probe, expected })
            }
            Test::ExitCode { script } => {
                if script.trim().is_empty() {
                    return Err(malformed("exit-code test has an empty script"));
                }
                Some(AuditStrategy::ExitCode { script })
            }
            Test::None => {
                if self.config.is_empty() && self.dry_run.is_empty() {
                    return Err(malformed("action unit has neither config nor dry-run script"));
                }
                None
            }
        };

        if self.precondition.flag() == Some(label.as_str()) {
            return Err(malformed("unit is gated on itself"));
        }
        if let Some(flag) = self.precondition.flag()
            && flag.trim().is_empty()
        {
            return Err(malformed("precondition names an empty flag"));
        }
        if self.parent.as_deref() == Some("") {
            return Err(malformed("parent label is empty"));
        }

        let failure_message = self
            .failure_message
            .unwrap_or_else(|| format!("{label} is not in the desired state"));

        Ok(Unit {
            label,
            precondition: self.precondition,
            audit,
            config: self.config,
            dry_run: self.dry_run,
            failure_message,
            parent: self.parent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedChannel;
    use std::time::Duration;

    fn ctx_for<'a>(channel: &'a mut ScriptedChannel, units: &[Unit]) -> RunContext<'a> {
        RunContext::new(channel, Duration::from_secs(5), units)
    }

    fn nginx_running() -> Unit {
        Unit::exact_value("nginx_running", "systemctl is-active nginx")
            .expected("active(running)")
            .config("systemctl restart nginx")
            .message("nginx is not running")
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_label_rejected() {
        let err = Unit::exit_code("  ", "true").build().unwrap_err();
        assert_eq!(err, UnitError::EmptyLabel);
    }

    #[test]
    fn test_exact_value_requires_expected() {
        let err = Unit::exact_value("hostname", "hostname")
            .config("hostnamectl set-hostname web1")
            .build()
            .unwrap_err();
        assert!(matches!(err, UnitError::MissingExpected { .. }));
    }

    #[test]
    fn test_empty_expected_is_allowed() {
        let unit = Unit::exact_value("no_stray_users", "awk -F: '$3 == 0 && $1 != \"root\"' /etc/passwd")
            .expected("")
            .build()
            .unwrap();
        assert!(!unit.is_action());
    }

    #[test]
    fn test_action_unit_needs_a_script() {
        let err = Unit::action("restart").build().unwrap_err();
        assert!(matches!(err, UnitError::Malformed { .. }));
    }

    #[test]
    fn test_self_gated_unit_rejected() {
        let err = Unit::exit_code("a", "true").requires("a").build().unwrap_err();
        assert!(matches!(err, UnitError::Malformed { .. }));
    }

    #[test]
    fn test_exact_value_pass_and_fail() {
        let unit = nginx_running();

        let mut channel = ScriptedChannel::new().respond("systemctl is-active nginx", "active(running)\n", 0);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert_eq!(unit.audit(&mut ctx).unwrap(), AuditResult::Pass);

        let mut channel = ScriptedChannel::new().respond("systemctl is-active nginx", "inactive(dead)\n", 3);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert_eq!(
            unit.audit(&mut ctx).unwrap(),
            AuditResult::Fail {
                observed: Some("inactive(dead)".into())
            }
        );
    }

    #[test]
    fn test_exact_value_probe_not_found_is_error() {
        let unit = nginx_running();
        let mut channel = ScriptedChannel::new().respond_err("systemctl is-active nginx", "sh: systemctl: not found", 127);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert!(matches!(unit.audit(&mut ctx).unwrap(), AuditResult::Error { .. }));
    }

    #[test]
    fn test_exit_code_strategy() {
        let unit = Unit::exit_code("sshd_enabled", "systemctl is-enabled --quiet ssh")
            .config("systemctl enable ssh")
            .build()
            .unwrap();

        let mut channel = ScriptedChannel::new().respond("systemctl is-enabled --quiet ssh", "", 0);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert_eq!(unit.audit(&mut ctx).unwrap(), AuditResult::Pass);

        let mut channel = ScriptedChannel::new().respond("systemctl is-enabled --quiet ssh", "", 1);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert!(matches!(unit.audit(&mut ctx).unwrap(), AuditResult::Fail { .. }));
    }

    #[test]
    fn test_false_precondition_skips_audit() {
        let unit = Unit::exit_code("nginx_enabled", "systemctl is-enabled --quiet nginx")
            .requires("nginx_installed")
            .config("systemctl enable nginx")
            .build()
            .unwrap();

        let mut channel = ScriptedChannel::new();
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        ctx.flags.set_passed("nginx_installed", false);

        let result = unit.audit(&mut ctx).unwrap();
        assert!(matches!(result, AuditResult::Skipped { .. }));
        assert!(result.is_pass());
        assert!(channel.commands().is_empty());
    }

    #[test]
    fn test_child_config_emits_flag_clear() {
        let unit = Unit::exit_code("nginx_conf", "test -f /etc/nginx/nginx.conf")
            .config("cp /tmp/nginx.conf /etc/nginx/nginx.conf")
            .child_of("nginx_config")
            .build()
            .unwrap();

        let script = unit.config_script();
        assert!(script.starts_with("cp /tmp/nginx.conf /etc/nginx/nginx.conf\n"));
        assert!(script.contains("nginx_config_unchanged=0"));
        assert!(script.ends_with("exit $fw_rc"));
    }

    #[test]
    fn test_child_config_clears_flag_in_context() {
        let unit = Unit::exit_code("nginx_conf", "test -f /etc/nginx/nginx.conf")
            .config("cp /tmp/nginx.conf /etc/nginx/nginx.conf")
            .child_of("nginx_config")
            .build()
            .unwrap();

        let mut channel = ScriptedChannel::new().default_exit(0);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert!(ctx.flags.is_unchanged("nginx_config"));
        assert_eq!(unit.config(&mut ctx).unwrap(), ConfigResult::Applied);
        assert!(!ctx.flags.is_unchanged("nginx_config"));
    }

    #[test]
    fn test_config_failure_carries_message() {
        let unit = nginx_running();
        let mut channel = ScriptedChannel::new().respond_err("systemctl restart nginx", "unit not found", 5);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        match unit.config(&mut ctx).unwrap() {
            ConfigResult::Error { message } => {
                assert!(message.starts_with("nginx is not running"));
                assert!(message.contains("unit not found"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_config_without_script_is_skipped() {
        let unit = Unit::exit_code("kernel_hardened", "sysctl -n kernel.kptr_restrict | grep -q 2")
            .build()
            .unwrap();
        let mut channel = ScriptedChannel::new();
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        assert!(matches!(unit.config(&mut ctx).unwrap(), ConfigResult::Skipped { .. }));
        assert!(channel.commands().is_empty());
    }

    #[test]
    fn test_dry_run_without_script_does_not_execute() {
        let unit = nginx_running();
        let mut channel = ScriptedChannel::new();
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        let report = unit.dry_run(&mut ctx).unwrap();
        assert_eq!(report, "would run: systemctl restart nginx");
        assert!(channel.commands().is_empty());
    }

    #[test]
    fn test_dead_channel_propagates() {
        let unit = nginx_running();
        let mut channel = ScriptedChannel::new().closed_after(0);
        let mut ctx = ctx_for(&mut channel, std::slice::from_ref(&unit));
        let err = unit.audit(&mut ctx).unwrap_err();
        assert!(err.is_fatal());
    }
}

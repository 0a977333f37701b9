use convergence::script::shell_quote;
use convergence::{MachineModel, Profile, ProfileError, Unit};
use serde::{Deserialize, Serialize};

/// Hostname and the matching /etc/hosts entry; needs a domain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostnameProfile {
    /// Extra names appended to the hosts entry
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Profile for HostnameProfile {
    fn name(&self) -> &str {
        "hostname"
    }

    fn build_units(&self, machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        let label = machine.label();
        let fqdn = machine.fqdn().ok_or_else(|| {
            ProfileError::Invalid(format!("machine '{label}' has no domain"))
        })?;

        let hostname = Unit::exact_value("hostname_set", "hostname")
            .expected(label)
            .config(&format!("hostnamectl set-hostname {}", shell_quote(label)))
            .dry_run(&format!("echo \"would rename $(hostname) to {label}\""))
            .message(&format!("Couldn't set hostname to {label}"))
            .build()?;

        let mut names = vec![fqdn.clone(), label.to_string()];
        names.extend(self.aliases.iter().cloned());
        let line = format!("127.0.1.1 {}", names.join(" "));

        let hosts = Unit::exit_code(
            "hosts_entry",
            &format!("grep -qxF {} /etc/hosts", shell_quote(&line)),
        )
        .requires("hostname_set")
        .config(&format!(
            "sed -i '/^127\\.0\\.1\\.1[[:space:]]/d' /etc/hosts\necho {} >> /etc/hosts",
            shell_quote(&line)
        ))
        .dry_run(&format!("echo {}", shell_quote(&format!("would write: {line}"))))
        .message(&format!("Couldn't map {fqdn} in /etc/hosts"))
        .build()?;

        Ok(vec![hostname, hosts])
    }
}

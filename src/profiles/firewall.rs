use convergence::script::shell_quote;
use convergence::{MachineModel, Profile, ProfileError, Unit, templates};
use serde::{Deserialize, Serialize};

/// ufw rules derived from the machine's listen ports and egress list
///
/// Reads the accumulators when units are built, so it sees ports that
/// profiles attached after it contributed. Egress entries are
/// `address:port`, where address is an IP, a CIDR range or `any`.
/// Listing any egress switches outgoing traffic to default deny.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallProfile {
    /// Always allowed inbound so enabling the firewall cannot lock us out
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for FirewallProfile {
    fn default() -> Self {
        Self {
            ssh_port: default_ssh_port(),
        }
    }
}

const INSTALLED: &str = "ufw_installed";

fn rule_unit(label: &str, rule: &str) -> Result<Unit, ProfileError> {
    Ok(Unit::exit_code(
        label,
        &format!("ufw show added | grep -qxF {}", shell_quote(&format!("ufw {rule}"))),
    )
    .requires(INSTALLED)
    .config(&format!("ufw {rule}"))
    .dry_run(&format!("echo {}", shell_quote(&format!("would add: ufw {rule}"))))
    .message(&format!("Couldn't add firewall rule '{rule}'"))
    .build()?)
}

fn default_policy(direction: &str, policy: &str) -> Result<Unit, ProfileError> {
    Ok(Unit::exact_value(
        &format!("ufw_default_{direction}"),
        &format!("ufw status verbose | sed -n 's/^Default:.* \\([a-z]*\\) ({direction}).*/\\1/p'"),
    )
    .expected(policy)
    .requires(INSTALLED)
    .config(&format!("ufw default {policy} {direction}"))
    .message(&format!("Couldn't set default {direction} policy to {policy}"))
    .build()?)
}

fn parse_egress(entry: &str) -> Result<(&str, u16), ProfileError> {
    let invalid = || ProfileError::Invalid(format!("egress entry '{entry}' is not address:port"));
    let (address, port) = entry.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if address.is_empty() {
        return Err(invalid());
    }
    Ok((address, port))
}

impl Profile for FirewallProfile {
    fn name(&self) -> &str {
        "firewall"
    }

    fn build_units(&self, machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        let mut units = vec![templates::install_package(INSTALLED, "ufw")?];

        units.push(default_policy("incoming", "deny")?);

        for port in machine.listen_ports() {
            units.push(rule_unit(
                &format!("ufw_allow_{port}"),
                &format!("allow {port}/tcp"),
            )?);
        }

        if !machine.egress().is_empty() {
            for (i, entry) in machine.egress().iter().enumerate() {
                let (address, port) = parse_egress(entry)?;
                units.push(rule_unit(
                    &format!("ufw_egress_{i}"),
                    &format!("allow out to {address} port {port} proto tcp"),
                )?);
            }
            units.push(default_policy("outgoing", "deny")?);
        }

        units.push(
            Unit::exact_value("ufw_enabled", "ufw status | head -n 1")
                .expected("Status: active")
                .requires(INSTALLED)
                .config("ufw --force enable")
                .dry_run("echo 'would enable ufw'")
                .message("Couldn't enable the firewall")
                .build()?,
        );

        Ok(units)
    }

    fn listen_ports(&self) -> Vec<u16> {
        vec![self.ssh_port]
    }
}

//! Topology loader: TOML or JSON file to a validated network model
//!
//! ```toml
//! domain = "example.org"
//!
//! [[machines]]
//! label = "hv1"
//! type = "hypervisor"
//! disks = [{ label = "vg0", size_mb = 512000 }]
//!
//! [[machines]]
//! label = "web1"
//! type = "virtual_machine"
//! hypervisor = "hv1"
//! address = "10.0.0.11"
//!
//! [[machines.profiles]]
//! kind = "service"
//! name = "nginx"
//! ports = [80, 443]
//! ```

use anyhow::{Context, Result, bail};
use convergence::{Disk, MachineKind, MachineModel, NetworkModel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::profiles::ProfileSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyFile {
    /// Default domain for machines that set none
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub machines: Vec<MachineSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineType {
    Dedicated,
    Server,
    Hypervisor,
    VirtualMachine,
    ExternalOnlyDevice,
    InternalOnlyDevice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSpec {
    pub label: String,
    #[serde(rename = "type")]
    pub machine_type: MachineType,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub listen_ports: Vec<u16>,
    #[serde(default)]
    pub egress: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Virtual machines only
    #[serde(default)]
    pub hypervisor: Option<String>,
    /// Hypervisors only
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub profiles: Vec<ProfileSpec>,
}

impl TopologyFile {
    /// Parse by extension: `.json` is JSON, anything else TOML
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read topology: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON topology: {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Invalid TOML topology: {}", path.display()))
        }
    }

    /// Validate cross-machine references and build the model
    pub fn into_network(self) -> Result<NetworkModel> {
        let types: HashMap<&str, MachineType> = self
            .machines
            .iter()
            .map(|m| (m.label.as_str(), m.machine_type))
            .collect();

        let mut guests: HashMap<String, Vec<String>> = HashMap::new();
        for machine in &self.machines {
            validate_shape(machine)?;
            if let Some(hv) = &machine.hypervisor {
                match types.get(hv.as_str()) {
                    Some(MachineType::Hypervisor) => {
                        guests.entry(hv.clone()).or_default().push(machine.label.clone());
                    }
                    Some(_) => bail!(
                        "Machine '{}' runs on '{hv}', which is not a hypervisor",
                        machine.label
                    ),
                    None => bail!("Machine '{}' runs on unknown hypervisor '{hv}'", machine.label),
                }
            }
        }

        let mut network = NetworkModel::new();
        for spec in self.machines {
            let label = spec.label.clone();
            let kind = match spec.machine_type {
                MachineType::Dedicated => MachineKind::Dedicated,
                MachineType::Server => MachineKind::Server,
                MachineType::Hypervisor => MachineKind::Hypervisor {
                    disks: spec.disks,
                    guests: guests.remove(&label).unwrap_or_default(),
                },
                MachineType::VirtualMachine => MachineKind::VirtualMachine {
                    hypervisor: spec.hypervisor.unwrap_or_default(),
                },
                MachineType::ExternalOnlyDevice => MachineKind::ExternalOnlyDevice,
                MachineType::InternalOnlyDevice => MachineKind::InternalOnlyDevice,
            };

            let mut machine = MachineModel::new(&label, kind);
            if let Some(address) = &spec.address {
                machine = machine.with_address(address);
            }
            if let Some(domain) = spec.domain.as_ref().or(self.domain.as_ref()) {
                machine = machine.with_domain(domain);
            }
            for (key, value) in &spec.attributes {
                machine = machine.with_attribute(key, value);
            }
            for port in spec.listen_ports {
                machine.add_listen_port(port);
            }
            for destination in &spec.egress {
                machine.add_egress(destination);
            }
            for profile in spec.profiles {
                machine
                    .attach_boxed(profile.into_profile())
                    .with_context(|| format!("Invalid machine '{label}'"))?;
            }

            network.insert(machine)?;
        }

        log::debug!("Loaded {} machines", network.len());
        Ok(network)
    }
}

fn validate_shape(machine: &MachineSpec) -> Result<()> {
    if machine.label.trim().is_empty() {
        bail!("Machine label must not be empty");
    }
    match machine.machine_type {
        MachineType::VirtualMachine if machine.hypervisor.is_none() => {
            bail!("Virtual machine '{}' needs a hypervisor", machine.label)
        }
        MachineType::VirtualMachine => {}
        _ if machine.hypervisor.is_some() => {
            bail!("Only virtual machines have a hypervisor ('{}')", machine.label)
        }
        _ => {}
    }
    if !machine.disks.is_empty() && machine.machine_type != MachineType::Hypervisor {
        bail!("Only hypervisors have disks ('{}')", machine.label);
    }
    Ok(())
}

/// Load and validate a topology file
pub fn load(path: &Path) -> Result<NetworkModel> {
    TopologyFile::load(path)?.into_network()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TOPOLOGY: &str = r#"
domain = "example.org"

[[machines]]
label = "hv1"
type = "hypervisor"
disks = [{ label = "vg0", size_mb = 512000 }]

[[machines]]
label = "web1"
type = "virtual_machine"
hypervisor = "hv1"
address = "10.0.0.11"

[[machines.profiles]]
kind = "packages"
packages = ["curl"]

[[machines.profiles]]
kind = "service"
name = "nginx"
ports = [80, 443]

[[machines]]
label = "printer"
type = "internal_only_device"
"#;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let network = load(&write(&dir, "topology.toml", TOPOLOGY)).unwrap();
        assert_eq!(network.len(), 3);

        let hv = network.get_machine("hv1").unwrap();
        match hv.kind() {
            MachineKind::Hypervisor { disks, guests } => {
                assert_eq!(disks.len(), 1);
                assert_eq!(guests, &vec!["web1".to_string()]);
            }
            other => panic!("unexpected kind {other}"),
        }

        let web = network.get_machine("web1").unwrap();
        assert_eq!(web.address(), "10.0.0.11");
        assert_eq!(web.fqdn().as_deref(), Some("web1.example.org"));
        assert!(web.listen_ports().contains(&443));
        assert_eq!(network.compile_units("web1").unwrap().len(), 4);

        let managed: Vec<&str> = network.managed_hosts().map(MachineModel::label).collect();
        assert_eq!(managed, vec!["hv1", "web1"]);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "topology.json",
            r#"{"machines": [{"label": "db1", "type": "dedicated", "attributes": {"role": "db"}}]}"#,
        );
        let network = load(&path).unwrap();
        assert_eq!(network.get_machine("db1").unwrap().attribute("role"), Some("db"));
    }

    #[test]
    fn test_vm_on_non_hypervisor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "topology.toml",
            r#"
[[machines]]
label = "box"
type = "server"

[[machines]]
label = "vm"
type = "virtual_machine"
hypervisor = "box"
"#,
        );
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("not a hypervisor"));
    }

    #[test]
    fn test_duplicate_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "topology.toml",
            r#"
[[machines]]
label = "web1"
type = "server"

[[machines]]
label = "web1"
type = "dedicated"
"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_device_with_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "topology.toml",
            r#"
[[machines]]
label = "router"
type = "external_only_device"

[[machines.profiles]]
kind = "packages"
packages = ["curl"]
"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_unknown_profile_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "topology.toml",
            r#"
[[machines]]
label = "web1"
type = "server"

[[machines.profiles]]
kind = "mystery"
"#,
        );
        assert!(load(&path).is_err());
    }
}

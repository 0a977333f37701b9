use convergence::script::shell_var;
use convergence::{MachineModel, Profile, ProfileError, Unit, templates};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::files::FileSpec;

/// A systemd service: install, configure, enable, keep running
///
/// Config files are children of `<name>_config`; the service restarts
/// once at the end if any of them changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceProfile {
    pub name: String,
    /// Package providing the service, when it differs from the name
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

impl ServiceProfile {
    fn prefix(&self) -> String {
        shell_var(&self.name)
    }

    /// Parent the config files report to
    pub fn config_parent(&self) -> String {
        format!("{}_config", self.prefix())
    }
}

impl Profile for ServiceProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::Invalid("service name is empty".to_string()));
        }

        let prefix = self.prefix();
        let installed = format!("{prefix}_installed");
        let enabled = format!("{prefix}_enabled");
        let parent = self.config_parent();
        let package = self.package.as_deref().unwrap_or(&self.name);

        let mut units = vec![templates::install_package(&installed, package)?];

        for file in &self.files {
            let file_name = Path::new(&file.path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = format!("{prefix}_conf_{}", shell_var(&file_name));
            units.extend(file.units(&label, Some(&parent))?);
        }

        units.push(templates::enabled_service(&enabled, &self.name, &installed)?);
        units.push(templates::running_service(
            &format!("{prefix}_running"),
            &self.name,
            &enabled,
        )?);

        if !self.files.is_empty() {
            units.push(templates::restart_on_change(
                &format!("{prefix}_restarted"),
                &self.name,
                &parent,
            )?);
        }

        Ok(units)
    }

    fn listen_ports(&self) -> Vec<u16> {
        self.ports.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence::{HostPlan, MachineKind, Precondition};

    fn nginx() -> ServiceProfile {
        ServiceProfile {
            name: "nginx".to_string(),
            package: None,
            ports: vec![80, 443],
            files: vec![FileSpec {
                path: "/etc/nginx/conf.d/site.conf".to_string(),
                contents: "server { listen 80; }".to_string(),
                mode: None,
            }],
        }
    }

    #[test]
    fn test_service_sequence() {
        let machine = MachineModel::new("web1", MachineKind::Server);
        let units = nginx().build_units(&machine).unwrap();
        let labels: Vec<&str> = units.iter().map(Unit::label).collect();
        assert_eq!(
            labels,
            vec![
                "nginx_installed",
                "nginx_conf_site_conf",
                "nginx_enabled",
                "nginx_running",
                "nginx_restarted",
            ]
        );
        assert_eq!(units[1].parent(), Some("nginx_config"));
        assert_eq!(
            units[4].precondition(),
            &Precondition::Changed("nginx_config".to_string())
        );
    }

    #[test]
    fn test_no_files_no_restart_unit() {
        let mut profile = nginx();
        profile.files.clear();
        profile.package = Some("nginx-light".to_string());

        let machine = MachineModel::new("web1", MachineKind::Server);
        let units = profile.build_units(&machine).unwrap();
        assert_eq!(units.len(), 3);
        assert!(units[0].config_fragment().contains("nginx-light"));
    }

    #[test]
    fn test_attaching_adds_ports_and_compiles() {
        let mut machine = MachineModel::new("web1", MachineKind::Server);
        machine.attach(nginx()).unwrap();
        assert!(machine.listen_ports().contains(&443));
        assert_eq!(HostPlan::compile(&machine).unwrap().len(), 5);
    }

    #[test]
    fn test_same_service_twice_is_a_duplicate() {
        let mut machine = MachineModel::new("web1", MachineKind::Server);
        machine.attach(nginx()).unwrap();
        machine.attach(nginx()).unwrap();
        assert!(matches!(
            HostPlan::compile(&machine),
            Err(convergence::Error::DuplicateUnit { .. })
        ));
    }
}

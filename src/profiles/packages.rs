use convergence::script::shell_var;
use convergence::{MachineModel, Profile, ProfileError, Unit, templates};
use serde::{Deserialize, Serialize};

/// Plain package installs, one unit per package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesProfile {
    pub packages: Vec<String>,
}

impl Profile for PackagesProfile {
    fn name(&self) -> &str {
        "packages"
    }

    fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        self.packages
            .iter()
            .map(|package| {
                if package.trim().is_empty() {
                    return Err(ProfileError::Invalid("empty package name".to_string()));
                }
                Ok(templates::install_package(
                    &format!("{}_installed", shell_var(package)),
                    package,
                )?)
            })
            .collect()
    }
}

use convergence::{MachineModel, Precondition, Profile, ProfileError, Unit};
use serde::{Deserialize, Serialize};

/// A unit written out in the topology file
///
/// `probe` plus `expected` gives an exact-value test, `test` an exit-code
/// test, and neither an action unit. At most one of `requires`,
/// `when_unchanged` and `when_changed` may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    pub label: String,
    #[serde(default)]
    pub probe: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub dry_run: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub requires: Option<String>,
    #[serde(default)]
    pub when_unchanged: Option<String>,
    #[serde(default)]
    pub when_changed: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

impl UnitSpec {
    fn precondition(&self) -> Result<Precondition, ProfileError> {
        let set: Vec<Precondition> = [
            self.requires.clone().map(Precondition::Passed),
            self.when_unchanged.clone().map(Precondition::Unchanged),
            self.when_changed.clone().map(Precondition::Changed),
        ]
        .into_iter()
        .flatten()
        .collect();

        match set.len() {
            0 => Ok(Precondition::Proceed),
            1 => Ok(set.into_iter().next().unwrap_or_default()),
            _ => Err(ProfileError::Invalid(format!(
                "unit '{}' sets more than one precondition",
                self.label
            ))),
        }
    }

    pub fn to_unit(&self) -> Result<Unit, ProfileError> {
        let mut builder = match (&self.probe, &self.test) {
            (Some(_), Some(_)) => {
                return Err(ProfileError::Invalid(format!(
                    "unit '{}' sets both probe and test",
                    self.label
                )));
            }
            (Some(probe), None) => {
                let builder = Unit::exact_value(&self.label, probe);
                match &self.expected {
                    Some(expected) => builder.expected(expected),
                    None => builder,
                }
            }
            (None, Some(test)) => Unit::exit_code(&self.label, test),
            (None, None) => Unit::action(&self.label),
        };

        builder = builder.precondition(self.precondition()?);
        if let Some(config) = &self.config {
            builder = builder.config(config);
        }
        if let Some(dry_run) = &self.dry_run {
            builder = builder.dry_run(dry_run);
        }
        if let Some(message) = &self.message {
            builder = builder.message(message);
        }
        if let Some(parent) = &self.parent {
            builder = builder.child_of(parent);
        }
        Ok(builder.build()?)
    }
}

/// Units spelled out inline, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProfile {
    #[serde(default = "default_name")]
    pub name: String,
    pub units: Vec<UnitSpec>,
}

fn default_name() -> String {
    "units".to_string()
}

impl Profile for CustomProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        self.units.iter().map(UnitSpec::to_unit).collect()
    }
}

//! Host planner - compiles a machine's profiles into one unit sequence

use crate::error::{Error, Result};
use crate::model::MachineModel;
use crate::script::{RC_VAR, unchanged_var, unit_vars};
use crate::unit::{Precondition, Unit};
use std::collections::{HashMap, HashSet};

/// The ordered units one host runs
#[derive(Debug, Clone)]
pub struct HostPlan {
    units: Vec<Unit>,
}

/// Shell variables claimed so far in a host's rendered script, by owner
#[derive(Debug)]
struct ShellNames<'a> {
    host: &'a str,
    owners: HashMap<String, String>,
}

impl<'a> ShellNames<'a> {
    fn new(host: &'a str) -> Self {
        let mut owners = HashMap::new();
        owners.insert(RC_VAR.to_string(), "child exit status".to_string());
        Self { host, owners }
    }

    fn claim(&mut self, name: String, owner: &str) -> Result<()> {
        match self.owners.get(&name) {
            Some(other) if other != owner => Err(Error::ShellNameClash {
                host: self.host.to_string(),
                name,
                first: other.clone(),
                second: owner.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.owners.insert(name, owner.to_string());
                Ok(())
            }
        }
    }

    fn claim_unit(&mut self, unit: &Unit) -> Result<()> {
        for name in unit_vars(unit.label()) {
            self.claim(name, unit.label())?;
        }
        if let Some(parent) = unit.parent() {
            self.claim(unchanged_var(parent), &format!("parent {parent}"))?;
        }
        Ok(())
    }
}

impl HostPlan {
    /// Compile every attached profile, in attachment order
    ///
    /// Unit labels must be unique across the whole host, and every
    /// precondition must name a unit or parent defined earlier in the
    /// sequence. Labels and parents must also map to distinct shell
    /// variables so the rendered script keeps every flag apart.
    pub fn compile(machine: &MachineModel) -> Result<Self> {
        let host = machine.label();
        let mut units = Vec::new();
        let mut labels: HashSet<String> = HashSet::new();
        let mut parents: HashSet<String> = HashSet::new();
        let mut shell_names = ShellNames::new(host);

        for profile in machine.profiles() {
            let built = profile
                .build_units(machine)
                .map_err(|source| Error::Profile {
                    host: host.to_string(),
                    profile: profile.name().to_string(),
                    source,
                })?;

            for unit in built {
                let known = match unit.precondition() {
                    Precondition::Proceed => true,
                    Precondition::Passed(label) => labels.contains(label),
                    Precondition::Unchanged(parent) | Precondition::Changed(parent) => {
                        parents.contains(parent)
                    }
                };
                if !known {
                    return Err(Error::UnknownPrecondition {
                        host: host.to_string(),
                        unit: unit.label().to_string(),
                        flag: unit.precondition().flag().unwrap_or_default().to_string(),
                    });
                }

                if !labels.insert(unit.label().to_string()) {
                    return Err(Error::DuplicateUnit {
                        host: host.to_string(),
                        label: unit.label().to_string(),
                    });
                }
                shell_names.claim_unit(&unit)?;
                if let Some(parent) = unit.parent() {
                    parents.insert(parent.to_string());
                }
                units.push(unit);
            }
        }

        log::debug!("compiled {} units for {}", units.len(), host);
        Ok(Self { units })
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn into_units(self) -> Vec<Unit> {
        self.units
    }

    pub fn labels(&self) -> Vec<&str> {
        self.units.iter().map(Unit::label).collect()
    }

    /// Filter plan to only include units matching a predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&Unit) -> bool,
    {
        Self {
            units: self.units.into_iter().filter(|u| predicate(u)).collect(),
        }
    }

    /// Keep units whose label contains `target`
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => self.filter(|u| u.label().contains(t)),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

//! Network model - the aggregate of every machine in the topology
//!
//! Entry point for compiling and running units, either on one host by
//! label or on every managed host at once.

use crate::error::{Error, Result};
use crate::executor::Orchestrator;
use crate::model::MachineModel;
use crate::planner::HostPlan;
use crate::types::{FleetReport, HostReport, RunMode};
use crate::unit::Unit;
use std::collections::BTreeMap;

/// All machines, keyed by unique label
#[derive(Debug, Default)]
pub struct NetworkModel {
    machines: BTreeMap<String, MachineModel>,
}

impl NetworkModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model, rejecting duplicate labels
    pub fn from_machines(machines: impl IntoIterator<Item = MachineModel>) -> Result<Self> {
        let mut model = Self::new();
        for machine in machines {
            model.insert(machine)?;
        }
        Ok(model)
    }

    pub fn insert(&mut self, machine: MachineModel) -> Result<()> {
        if self.machines.contains_key(machine.label()) {
            return Err(Error::DuplicateMachine(machine.label().to_string()));
        }
        self.machines.insert(machine.label().to_string(), machine);
        Ok(())
    }

    pub fn get_machine(&self, label: &str) -> Result<&MachineModel> {
        self.machines
            .get(label)
            .ok_or_else(|| Error::MachineNotFound(label.to_string()))
    }

    /// Every machine, devices included, in label order
    pub fn machines(&self) -> impl Iterator<Item = &MachineModel> {
        self.machines.values()
    }

    /// Machines that fleet runs operate on
    pub fn managed_hosts(&self) -> impl Iterator<Item = &MachineModel> {
        self.machines.values().filter(|m| m.is_managed())
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Ordered units of one machine, with construction checks applied
    pub fn compile_units(&self, label: &str) -> Result<Vec<Unit>> {
        Ok(self.plan(label)?.into_units())
    }

    pub fn plan(&self, label: &str) -> Result<HostPlan> {
        let machine = self.get_machine(label)?;
        if !machine.is_managed() {
            return Err(Error::Unmanaged(label.to_string()));
        }
        HostPlan::compile(machine)
    }

    /// Compile every managed host; the first failure aborts before anything runs
    pub fn compile_all(&self) -> Result<Vec<(&MachineModel, HostPlan)>> {
        self.managed_hosts()
            .map(|machine| Ok((machine, HostPlan::compile(machine)?)))
            .collect()
    }

    pub fn audit(&self, label: &str, orchestrator: &Orchestrator<'_>) -> Result<HostReport> {
        self.run(label, orchestrator, RunMode::Audit)
    }

    pub fn dry_run(&self, label: &str, orchestrator: &Orchestrator<'_>) -> Result<HostReport> {
        self.run(label, orchestrator, RunMode::DryRun)
    }

    pub fn config(&self, label: &str, orchestrator: &Orchestrator<'_>) -> Result<HostReport> {
        self.run(label, orchestrator, RunMode::Config)
    }

    pub fn audit_all(&self, orchestrator: &Orchestrator<'_>) -> Result<FleetReport> {
        self.run_all(orchestrator, RunMode::Audit)
    }

    pub fn dry_run_all(&self, orchestrator: &Orchestrator<'_>) -> Result<FleetReport> {
        self.run_all(orchestrator, RunMode::DryRun)
    }

    pub fn config_all(&self, orchestrator: &Orchestrator<'_>) -> Result<FleetReport> {
        self.run_all(orchestrator, RunMode::Config)
    }

    /// Single-host run; construction errors surface before connecting
    pub fn run(&self, label: &str, orchestrator: &Orchestrator<'_>, mode: RunMode) -> Result<HostReport> {
        let machine = self.get_machine(label)?;
        let plan = self
            .plan(label)?
            .filter_by_target(orchestrator.options().only.as_deref());
        Ok(orchestrator.run_host(machine, &plan, mode))
    }

    pub fn run_all(&self, orchestrator: &Orchestrator<'_>, mode: RunMode) -> Result<FleetReport> {
        let only = orchestrator.options().only.as_deref();
        let hosts: Vec<(&MachineModel, HostPlan)> = self
            .compile_all()?
            .into_iter()
            .map(|(machine, plan)| (machine, plan.filter_by_target(only)))
            .collect();
        log::info!("{mode} on {} hosts", hosts.len());
        orchestrator.run_fleet(&hosts, mode)
    }
}

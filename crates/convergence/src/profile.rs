//! Profile trait: from a machine's role to its ordered units
//!
//! A profile is a capability with a single job, [`Profile::build_units`].
//! Concrete profiles are independent types registered on a machine when
//! the topology is built; the engine never reorders what they return.

use crate::error::ProfileError;
use crate::model::MachineModel;
use crate::unit::Unit;
use std::fmt;

/// Produces the unit sequence for one role on one machine
///
/// # Example
///
/// ```ignore
/// use convergence::{MachineModel, Profile, ProfileError, Unit, templates};
///
/// #[derive(Debug)]
/// struct Nginx;
///
/// impl Profile for Nginx {
///     fn name(&self) -> &str { "nginx" }
///
///     fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
///         Ok(vec![
///             templates::install_package("nginx_installed", "nginx")?,
///             templates::enabled_service("nginx_enabled", "nginx", "nginx_installed")?,
///             templates::running_service("nginx_running", "nginx", "nginx_enabled")?,
///         ])
///     }
///
///     fn listen_ports(&self) -> Vec<u16> { vec![80, 443] }
/// }
/// ```
pub trait Profile: Send + Sync + fmt::Debug {
    /// Identifier used in reports and errors
    fn name(&self) -> &str;

    /// Build the ordered units for `machine`
    ///
    /// Fails if the machine lacks data the profile needs.
    fn build_units(&self, machine: &MachineModel) -> Result<Vec<Unit>, ProfileError>;

    /// Inbound ports this role needs; appended to the machine when attached
    fn listen_ports(&self) -> Vec<u16> {
        Vec::new()
    }

    /// Outbound destinations this role needs; appended to the machine when attached
    fn egress(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A boxed profile for type-erased storage
pub type BoxedProfile = Box<dyn Profile>;

/// Profile with a fixed list of units, independent of the machine
#[derive(Debug, Clone)]
pub struct StaticProfile {
    name: String,
    units: Vec<Unit>,
    listen_ports: Vec<u16>,
    egress: Vec<String>,
}

impl StaticProfile {
    pub fn new(name: &str, units: Vec<Unit>) -> Self {
        Self {
            name: name.to_string(),
            units,
            listen_ports: Vec::new(),
            egress: Vec::new(),
        }
    }

    pub fn with_listen_ports(mut self, ports: &[u16]) -> Self {
        self.listen_ports.extend_from_slice(ports);
        self
    }

    pub fn with_egress(mut self, destinations: &[&str]) -> Self {
        self.egress
            .extend(destinations.iter().map(|d| (*d).to_string()));
        self
    }
}

impl Profile for StaticProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        Ok(self.units.clone())
    }

    fn listen_ports(&self) -> Vec<u16> {
        self.listen_ports.clone()
    }

    fn egress(&self) -> Vec<String> {
        self.egress.clone()
    }
}

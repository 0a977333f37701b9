//! # Convergence
//!
//! A framework for converging hosts to declared policy.
//!
//! ## Core Concepts
//!
//! - **Unit**: One idempotent check-and-fix definition (audit, config, dry-run)
//! - **Child unit**: A unit that reports any change to a parent's unchanged flag
//! - **Profile**: Produces the ordered units for one role on one machine
//! - **MachineModel**: A topology node carrying attached profiles
//! - **NetworkModel**: Every machine, and the entry point for runs
//! - **Orchestrator**: Runs unit sequences over channels, one host or the whole fleet
//!
//! ## Example
//!
//! ```ignore
//! use convergence::{
//!     ExecuteOptions, MachineKind, MachineModel, NetworkModel, Orchestrator,
//!     StaticProfile, templates,
//! };
//!
//! let mut web1 = MachineModel::new("web1", MachineKind::Server);
//! web1.attach(StaticProfile::new("nginx", vec![
//!     templates::install_package("nginx_installed", "nginx")?,
//!     templates::enabled_service("nginx_enabled", "nginx", "nginx_installed")?,
//! ]))?;
//!
//! let network = NetworkModel::from_machines([web1])?;
//! let orchestrator = Orchestrator::new(&my_connector, ExecuteOptions::default());
//! let report = network.audit_all(&orchestrator)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Connector`]: Opens a [`Channel`] to a machine
//! - [`ProgressCallback`]: Receives progress updates
//!
//! Transport and presentation live outside this crate.

pub mod context;
pub mod error;
pub mod executor;
pub mod model;
pub mod network;
pub mod planner;
pub mod profile;
pub mod script;
pub mod templates;
pub mod types;
pub mod unit;

#[cfg(test)]
mod testutil;

// Re-export main types at crate root
pub use context::{CancelToken, Channel, Connector, Flags, NoProgress, ProgressCallback, RunContext};
pub use error::{ChannelError, Error, ProfileError, Result, UnitError};
pub use executor::{Orchestrator, execute_units};
pub use model::{Disk, MachineKind, MachineModel};
pub use network::NetworkModel;
pub use planner::HostPlan;
pub use profile::{BoxedProfile, Profile, StaticProfile};
pub use script::render_script;
pub use types::{
    AuditResult, CommandOutput, ConfigResult, ExecuteOptions, FleetReport, HostReport, HostStatus,
    Interruption, RunMode, RunSummary, UnitOutcome, UnitRecord,
};
pub use unit::{AuditStrategy, Precondition, Unit, UnitBuilder};

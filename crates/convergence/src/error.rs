//! Error types for the convergence crate.
//!
//! Errors fall into three tiers that are contained at different levels:
//! construction errors abort before anything runs, channel errors are
//! contained at the host, and everything a unit reports about itself is
//! data in the host report rather than an error.

use std::time::Duration;
use thiserror::Error;

/// A malformed unit definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    /// Unit label is empty or only whitespace
    #[error("unit label must not be empty")]
    EmptyLabel,

    /// Exact-value test declared without an expected value
    #[error("unit '{label}' uses an exact-value test but has no expected value")]
    MissingExpected { label: String },

    /// Any other structural problem with the definition
    #[error("unit '{label}' is malformed: {reason}")]
    Malformed { label: String, reason: String },
}

/// Errors raised by a profile while building units for a machine.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The machine model lacks data the profile requires
    #[error("missing required attribute '{0}'")]
    MissingAttribute(String),

    /// Profile configuration is inconsistent
    #[error("{0}")]
    Invalid(String),

    /// A unit built by the profile is malformed
    #[error(transparent)]
    Unit(#[from] UnitError),
}

/// Failures of a remote command channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel itself is gone (connection refused, broken pipe, session died)
    #[error("channel closed: {0}")]
    Closed(String),

    /// The command did not return within the per-unit timeout
    #[error("command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    /// The command could not be started but the channel is still usable
    #[error("command could not be run: {0}")]
    Failed(String),
}

impl ChannelError {
    /// Whether the host's run has to stop because the channel is dead.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Errors from building or querying the network model.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed unit definition
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// Two units on one host share a label
    #[error("duplicate unit label '{label}' on host '{host}'")]
    DuplicateUnit { host: String, label: String },

    /// Two machines share a label
    #[error("duplicate machine label '{0}'")]
    DuplicateMachine(String),

    /// A precondition names a flag that is unknown at that point in the sequence
    #[error("unit '{unit}' on host '{host}' is gated on '{flag}', which no earlier unit defines")]
    UnknownPrecondition {
        host: String,
        unit: String,
        flag: String,
    },

    /// Two labels or parents would share one variable in the rendered script
    #[error("'{first}' and '{second}' on host '{host}' both map to shell variable '{name}'")]
    ShellNameClash {
        host: String,
        name: String,
        first: String,
        second: String,
    },

    /// A profile could not build its units
    #[error("profile '{profile}' failed on host '{host}': {source}")]
    Profile {
        host: String,
        profile: String,
        #[source]
        source: ProfileError,
    },

    /// Profiles cannot be attached to devices
    #[error("machine '{0}' is a device and cannot carry profiles")]
    Unmanaged(String),

    /// No machine with this label
    #[error("machine not found: {0}")]
    MachineNotFound(String),

    /// Worker pool for fleet runs could not be created
    #[error("failed to create worker pool: {0}")]
    ThreadPool(String),
}

impl Error {
    /// Whether this error stems from topology or profile authoring.
    pub fn is_construction(&self) -> bool {
        !matches!(self, Self::MachineNotFound(_) | Self::ThreadPool(_))
    }
}

/// Result type for convergence operations
pub type Result<T> = std::result::Result<T, Error>;

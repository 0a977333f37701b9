//! Machine models: topology nodes and their attached profiles

use crate::error::{Error, ProfileError, Result};
use crate::profile::{BoxedProfile, Profile};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A disk owned by a hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub label: String,
    pub size_mb: u64,
    #[serde(default)]
    pub path: Option<String>,
}

/// Closed set of machine types with their type-specific attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineKind {
    Dedicated,
    Server,
    Hypervisor { disks: Vec<Disk>, guests: Vec<String> },
    VirtualMachine { hypervisor: String },
    ExternalOnlyDevice,
    InternalOnlyDevice,
}

impl MachineKind {
    /// Devices are modelled for the network but never converged
    pub fn is_managed(&self) -> bool {
        !matches!(self, Self::ExternalOnlyDevice | Self::InternalOnlyDevice)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dedicated => "dedicated",
            Self::Server => "server",
            Self::Hypervisor { .. } => "hypervisor",
            Self::VirtualMachine { .. } => "virtual_machine",
            Self::ExternalOnlyDevice => "external_only_device",
            Self::InternalOnlyDevice => "internal_only_device",
        }
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the network topology
///
/// The shape is fixed at construction. Listen ports and egress
/// destinations are accumulators: attaching a profile may append to
/// them, nothing removes from them.
#[derive(Debug)]
pub struct MachineModel {
    label: String,
    kind: MachineKind,
    address: Option<String>,
    domain: Option<String>,
    attributes: BTreeMap<String, String>,
    listen_ports: BTreeSet<u16>,
    egress: BTreeSet<String>,
    profiles: Vec<BoxedProfile>,
}

impl MachineModel {
    pub fn new(label: &str, kind: MachineKind) -> Self {
        Self {
            label: label.to_string(),
            kind,
            address: None,
            domain: None,
            attributes: BTreeMap::new(),
            listen_ports: BTreeSet::new(),
            egress: BTreeSet::new(),
            profiles: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &MachineKind {
        &self.kind
    }

    pub fn is_managed(&self) -> bool {
        self.kind.is_managed()
    }

    /// Address used to reach the machine, falling back to its label
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.label)
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Fully qualified name, if a domain is configured
    pub fn fqdn(&self) -> Option<String> {
        self.domain.as_ref().map(|d| format!("{}.{}", self.label, d))
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute a profile cannot do without
    pub fn require_attribute(&self, key: &str) -> std::result::Result<&str, ProfileError> {
        self.attribute(key)
            .ok_or_else(|| ProfileError::MissingAttribute(key.to_string()))
    }

    pub fn listen_ports(&self) -> &BTreeSet<u16> {
        &self.listen_ports
    }

    pub fn egress(&self) -> &BTreeSet<String> {
        &self.egress
    }

    pub fn profiles(&self) -> &[BoxedProfile] {
        &self.profiles
    }

    pub fn add_listen_port(&mut self, port: u16) {
        self.listen_ports.insert(port);
    }

    pub fn add_egress(&mut self, destination: &str) {
        self.egress.insert(destination.to_string());
    }

    /// Attach a profile, appending its ports and egress to the accumulators
    pub fn attach(&mut self, profile: impl Profile + 'static) -> Result<()> {
        self.attach_boxed(Box::new(profile))
    }

    pub fn attach_boxed(&mut self, profile: BoxedProfile) -> Result<()> {
        if !self.is_managed() {
            return Err(Error::Unmanaged(self.label.clone()));
        }
        for port in profile.listen_ports() {
            self.add_listen_port(port);
        }
        for destination in profile.egress() {
            self.add_egress(&destination);
        }
        self.profiles.push(profile);
        Ok(())
    }
}

//! Generic profiles available to topology files
//!
//! Each profile struct is also its own serde spec: a `[[machines.profiles]]`
//! table names the profile with `kind` and carries its fields.

mod custom;
mod files;
mod firewall;
mod hostname;
mod packages;
mod service;

pub use custom::CustomProfile;
pub use files::FilesProfile;
pub use firewall::FirewallProfile;
pub use hostname::HostnameProfile;
pub use packages::PackagesProfile;
pub use service::ServiceProfile;

use convergence::BoxedProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProfileSpec {
    Packages(PackagesProfile),
    Service(ServiceProfile),
    Files(FilesProfile),
    Hostname(HostnameProfile),
    Firewall(FirewallProfile),
    Units(CustomProfile),
}

impl ProfileSpec {
    pub fn into_profile(self) -> BoxedProfile {
        match self {
            Self::Packages(p) => Box::new(p),
            Self::Service(p) => Box::new(p),
            Self::Files(p) => Box::new(p),
            Self::Hostname(p) => Box::new(p),
            Self::Firewall(p) => Box::new(p),
            Self::Units(p) => Box::new(p),
        }
    }
}

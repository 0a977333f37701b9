use convergence::script::{shell_quote, shell_var};
use convergence::{MachineModel, Profile, ProfileError, Unit, templates};
use serde::{Deserialize, Serialize};

/// A managed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    pub contents: String,
    /// Octal permissions, e.g. "644"
    #[serde(default)]
    pub mode: Option<String>,
}

impl FileSpec {
    /// Content unit plus an optional mode unit gated on it
    pub fn units(&self, label: &str, parent: Option<&str>) -> Result<Vec<Unit>, ProfileError> {
        if !self.path.starts_with('/') {
            return Err(ProfileError::Invalid(format!(
                "file path must be absolute: {}",
                self.path
            )));
        }

        let mut units = vec![templates::file_contents(
            label,
            &self.path,
            &self.contents,
            parent,
        )?];

        if let Some(mode) = &self.mode {
            if mode.is_empty() || !mode.chars().all(|c| ('0'..='7').contains(&c)) {
                return Err(ProfileError::Invalid(format!(
                    "mode for {} is not octal: {mode}",
                    self.path
                )));
            }
            let quoted = shell_quote(&self.path);
            // stat prints the mode without leading zeros
            let expected = match mode.trim_start_matches('0') {
                "" => "0",
                trimmed => trimmed,
            };
            let mut mode_unit = Unit::exact_value(
                &format!("{label}_mode"),
                &format!("stat -c %a {quoted}"),
            )
            .expected(expected)
            .requires(label)
            .config(&format!("chmod {mode} {quoted}"))
            .message(&format!("Couldn't set mode {mode} on {}", self.path));
            if let Some(parent) = parent {
                mode_unit = mode_unit.child_of(parent);
            }
            units.push(mode_unit.build()?);
        }

        Ok(units)
    }
}

/// Directories and files, optionally reporting changes to a parent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilesProfile {
    #[serde(default)]
    pub directories: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    /// Parent whose unchanged flag any file change clears
    #[serde(default)]
    pub parent: Option<String>,
}

impl Profile for FilesProfile {
    fn name(&self) -> &str {
        "files"
    }

    fn build_units(&self, _machine: &MachineModel) -> Result<Vec<Unit>, ProfileError> {
        let mut units = Vec::new();

        for dir in &self.directories {
            units.push(templates::directory_exists(
                &format!("dir{}", shell_var(dir)),
                dir,
            )?);
        }

        for file in &self.files {
            let label = format!("file{}", shell_var(&file.path));
            units.extend(file.units(&label, self.parent.as_deref())?);
        }

        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergence::{MachineKind, Precondition};

    fn machine() -> MachineModel {
        MachineModel::new("web1", MachineKind::Server)
    }

    #[test]
    fn test_labels_follow_paths() {
        let profile = FilesProfile {
            directories: vec!["/srv/www".to_string()],
            files: vec![FileSpec {
                path: "/etc/motd".to_string(),
                contents: "welcome\n".to_string(),
                mode: Some("0644".to_string()),
            }],
            parent: Some("motd_config".to_string()),
        };

        let units = profile.build_units(&machine()).unwrap();
        let labels: Vec<&str> = units.iter().map(Unit::label).collect();
        assert_eq!(labels, vec!["dir_srv_www", "file_etc_motd", "file_etc_motd_mode"]);

        assert_eq!(units[1].parent(), Some("motd_config"));
        assert_eq!(
            units[2].precondition(),
            &Precondition::Passed("file_etc_motd".to_string())
        );
    }

    #[test]
    fn test_relative_path_rejected() {
        let profile = FilesProfile {
            files: vec![FileSpec {
                path: "etc/motd".to_string(),
                contents: String::new(),
                mode: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            profile.build_units(&machine()),
            Err(ProfileError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_mode_rejected() {
        let profile = FilesProfile {
            files: vec![FileSpec {
                path: "/etc/motd".to_string(),
                contents: String::new(),
                mode: Some("rw-r--r--".to_string()),
            }],
            ..Default::default()
        };
        assert!(profile.build_units(&machine()).is_err());
    }
}

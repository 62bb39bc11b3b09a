// Platform Descriptor
// Immutable identity and capability attributes of one execution target

use serde::Serialize;

use std::collections::BTreeMap;
use std::fmt;

/// Attribute holding the operating-system family (`linux`, `darwin`, `windows`)
pub const FAMILY_ATTRIBUTE: &str = "family";

/// Attribute holding the runner label the platform was derived from
pub const OS_ATTRIBUTE: &str = "os";

/// Attribute holding the runner's OS display name (`Linux`, `macOS`, `Windows`)
pub const RUNNER_OS_ATTRIBUTE: &str = "runner.os";

/// Operating-system family of a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    Linux,
    Darwin,
    Windows,
}

impl PlatformFamily {
    /// Classify a runner label such as `ubuntu-latest` or `macos-14`.
    pub fn from_runner_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        if label.starts_with("ubuntu") || label.starts_with("linux") || label.starts_with("debian")
        {
            Some(Self::Linux)
        } else if label.starts_with("macos") || label.starts_with("darwin") || label == "osx" {
            Some(Self::Darwin)
        } else if label.starts_with("windows") || label == "win" {
            Some(Self::Windows)
        } else {
            None
        }
    }

    /// Family of the host this process runs on
    pub fn host() -> Option<Self> {
        if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else if cfg!(target_os = "macos") {
            Some(Self::Darwin)
        } else if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else {
            None
        }
    }

    /// Value stored under the `family` attribute
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Windows => "windows",
        }
    }

    /// Value stored under the `runner.os` attribute
    pub fn runner_os(&self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::Darwin => "macOS",
            Self::Windows => "Windows",
        }
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution target of a matrix.
///
/// Descriptors are built before the plan and never mutated afterwards; the
/// plan hands them out behind an `Arc` so every variant reads the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformDescriptor {
    /// Identifier, unique within one matrix
    pub id: String,
    /// Attribute name to value (e.g. `family` -> `linux`)
    pub attributes: BTreeMap<String, String>,
}

impl PlatformDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Descriptor for a runner label, with `os`, `family` and `runner.os` filled in
    /// when the label is recognised.
    pub fn for_runner(label: impl Into<String>) -> Self {
        let label = label.into();
        let descriptor = Self::new(label.clone()).with_attribute(OS_ATTRIBUTE, label.clone());
        match PlatformFamily::from_runner_label(&label) {
            Some(family) => descriptor.with_family(family),
            None => descriptor,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_family(self, family: PlatformFamily) -> Self {
        self.with_attribute(FAMILY_ATTRIBUTE, family.as_str())
            .with_attribute(RUNNER_OS_ATTRIBUTE, family.runner_os())
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn family(&self) -> Option<PlatformFamily> {
        match self.attribute(FAMILY_ATTRIBUTE)? {
            "linux" => Some(PlatformFamily::Linux),
            "darwin" => Some(PlatformFamily::Darwin),
            "windows" => Some(PlatformFamily::Windows),
            _ => None,
        }
    }

    /// Environment variables describing this platform to the commands it runs.
    ///
    /// `MATRIX_PLATFORM_ID` plus one `MATRIX_<NAME>` entry per attribute.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![("MATRIX_PLATFORM_ID".to_string(), self.id.clone())];
        for (name, value) in &self.attributes {
            let key: String = name
                .chars()
                .map(|c| match c {
                    '.' | '-' | ' ' => '_',
                    c => c.to_ascii_uppercase(),
                })
                .collect();
            vars.push((format!("MATRIX_{}", key), value.clone()));
        }
        vars
    }
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

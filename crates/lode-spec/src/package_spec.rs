use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    Runtime,
    Development,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub requirement: String,
    pub kind: DependencyKind,
}

impl Dependency {
    pub fn runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: ">= 0".to_string(),
            kind: DependencyKind::Runtime,
        }
    }

    pub fn development(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: ">= 0".to_string(),
            kind: DependencyKind::Development,
        }
    }

    #[must_use]
    pub fn is_runtime(&self) -> bool {
        self.kind == DependencyKind::Runtime
    }
}

/// A resolved package: exact version plus its dependency edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub executables: Vec<String>,
    #[serde(default = "default_bindir")]
    pub bindir: String,
    /// Native build command, run in the package directory after install.
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub post_install_message: Option<String>,
    /// Hex sha256 of the registry tarball.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Manifest file this spec was read from, when discovered on disk.
    #[serde(skip)]
    pub loaded_from: Option<PathBuf>,
}

fn default_bindir() -> String {
    "bin".to_string()
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
            executables: Vec::new(),
            bindir: default_bindir(),
            build: None,
            post_install_message: None,
            checksum: None,
            loaded_from: None,
        }
    }

    #[must_use]
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|dep| dep.is_runtime())
    }

    /// Directory holding the manifest, i.e. the package root on disk.
    #[must_use]
    pub fn manifest_dir(&self) -> Option<PathBuf> {
        self.loaded_from
            .as_ref()
            .and_then(|path| path.parent().map(PathBuf::from))
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}

use std::fs;
use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::index::SpecIndex;
use crate::package_spec::{Dependency, DependencyKind, PackageSpec};

/// On-disk `*.lodespec` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub executables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(
        default,
        rename = "postInstallMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_install_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Manifest {
    #[must_use]
    pub fn into_spec(self) -> PackageSpec {
        let mut spec = PackageSpec::new(self.name, self.version);
        let deps = self
            .dependencies
            .into_iter()
            .map(|dep| (dep, DependencyKind::Runtime));
        let dev_deps = self
            .dev_dependencies
            .into_iter()
            .map(|dep| (dep, DependencyKind::Development));
        spec.dependencies = deps
            .chain(dev_deps)
            .map(|((name, requirement), kind)| Dependency {
                name,
                requirement,
                kind,
            })
            .collect();
        spec.executables = self.executables;
        if let Some(bindir) = self.bindir {
            spec.bindir = bindir;
        }
        spec.build = self.build;
        spec.post_install_message = self.post_install_message;
        spec.checksum = self.checksum;
        spec
    }

    #[must_use]
    pub fn from_spec(spec: &PackageSpec) -> Self {
        let pick = |kind| {
            spec.dependencies
                .iter()
                .filter(|dep| dep.kind == kind)
                .map(|dep| (dep.name.clone(), dep.requirement.clone()))
                .collect()
        };
        Self {
            name: spec.name.clone(),
            version: spec.version.clone(),
            dependencies: pick(DependencyKind::Runtime),
            dev_dependencies: pick(DependencyKind::Development),
            executables: spec.executables.clone(),
            bindir: Some(spec.bindir.clone()),
            build: spec.build.clone(),
            post_install_message: spec.post_install_message.clone(),
            checksum: spec.checksum.clone(),
        }
    }
}

pub fn read_manifest(path: &Path) -> anyhow::Result<PackageSpec> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    let parsed: Manifest = serde_json::from_str(&content)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    let mut spec = parsed.into_spec();
    spec.loaded_from = Some(path.to_path_buf());
    Ok(spec)
}

pub fn write_manifest(path: &Path, spec: &PackageSpec) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(&Manifest::from_spec(spec))?;
    fs::write(path, content)?;
    Ok(())
}

/// Expands `{a,b}` groups; `{,*,*/*}.x` yields `.x`, `*.x`, `*/*.x`.
#[must_use]
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

/// Loads every manifest under `root` matching `pattern`.
pub fn discover_specs(root: &Path, pattern: &str) -> anyhow::Result<SpecIndex> {
    let mut index = SpecIndex::new();
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());

    for alternative in expand_braces(pattern) {
        let full = format!("{escaped_root}/{alternative}");
        let paths = glob::glob(&full).with_context(|| format!("invalid glob {pattern}"))?;
        for path in paths {
            let path = path?;
            if path.is_file() {
                index.insert(read_manifest(&path)?);
            }
        }
    }

    Ok(index)
}

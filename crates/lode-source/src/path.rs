use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use lode_constants::{DEFAULT_GLOB, LOCK_PATH};
use lode_error::{LodeError, Result};
use lode_lock::LockStanza;
use lode_spec::{PackageSpec, SpecIndex, discover_specs};
use lode_vcs::Permissions;

use crate::native::run_build;
use crate::paths::is_within;
use crate::{InstallOptions, PackageSource, SourceContext};

/// Packages used in place from a directory on disk.
pub struct PathSource {
    path: PathBuf,
    expanded_path: PathBuf,
    glob: String,
    name: Option<String>,
    version: Option<String>,
    specs: OnceLock<SpecIndex>,
    installed: Mutex<HashSet<String>>,
    permissions: Permissions,
    context: SourceContext,
}

impl PathSource {
    pub fn new(path: impl Into<PathBuf>, glob: Option<String>, context: &SourceContext) -> Self {
        let path = path.into();
        let expanded_path = if path.is_absolute() {
            path.clone()
        } else {
            context.project_root.join(&path)
        };
        Self {
            path,
            expanded_path,
            glob: glob.unwrap_or_else(|| DEFAULT_GLOB.to_string()),
            name: None,
            version: None,
            specs: OnceLock::new(),
            installed: Mutex::new(HashSet::new()),
            permissions: Permissions::default(),
            context: context.clone(),
        }
    }

    #[must_use]
    pub fn with_name_version(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.version = Some(version.into());
        self
    }

    pub fn from_lock(stanza: &LockStanza, context: &SourceContext) -> Result<Self> {
        Ok(Self::new(
            stanza.require("remote")?,
            stanza.get("glob").map(str::to_string),
            context,
        ))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn expanded_path(&self) -> &Path {
        &self.expanded_path
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.expanded_path.exists() {
            Ok(())
        } else {
            Err(LodeError::Source(format!(
                "The path `{}` does not exist.",
                self.expanded_path.display()
            )))
        }
    }
}

impl PackageSource for PathSource {
    fn specs(&self) -> Result<SpecIndex> {
        if let Some(index) = self.specs.get() {
            return Ok(index.clone());
        }
        self.ensure_exists()?;

        let mut index = discover_specs(&self.expanded_path, &self.glob)?;
        if index.is_empty() {
            if let (Some(name), Some(version)) = (&self.name, &self.version) {
                index.insert(PackageSpec::new(name.clone(), version.clone()));
            }
        }
        Ok(self.specs.get_or_init(|| index).clone())
    }

    fn install(&self, spec: &PackageSpec, options: &InstallOptions<'_>) -> Result<()> {
        if self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&spec.full_name())
        {
            return Ok(());
        }

        self.ensure_exists()?;
        self.context
            .ui
            .info(&format!("Using {} {} from {self}", spec.name, spec.version));
        let dir = self.spec_path(spec)?;
        run_build(spec, &dir, options.build_flags, self.context.ui.as_ref())?;

        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.full_name());
        Ok(())
    }

    fn cache(&self, spec: &PackageSpec, cache_root: &Path) -> Result<()> {
        let source_dir = self.spec_path(spec)?;
        if is_within(&source_dir, cache_root) {
            return Ok(());
        }

        let target = cache_root.join(spec.full_name());
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::create_dir_all(&target)?;
        fs_extra::dir::copy(
            &source_dir,
            &target,
            &fs_extra::dir::CopyOptions::new()
                .overwrite(true)
                .content_only(true),
        )
        .map_err(|e| LodeError::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    fn to_lock(&self) -> Result<Option<LockStanza>> {
        let mut stanza =
            LockStanza::new(LOCK_PATH).option("remote", self.path.to_string_lossy().to_string());
        if self.glob != DEFAULT_GLOB {
            stanza = stanza.option("glob", self.glob.clone());
        }
        Ok(Some(stanza))
    }

    fn spec_path(&self, spec: &PackageSpec) -> Result<PathBuf> {
        let found = self
            .specs()?
            .get(&spec.name, &spec.version)
            .and_then(PackageSpec::manifest_dir);
        Ok(found.unwrap_or_else(|| self.expanded_path.clone()))
    }

    fn permissions(&self) -> Permissions {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }
}

impl PartialEq for PathSource {
    fn eq(&self, other: &Self) -> bool {
        self.expanded_path == other.expanded_path
            && self.name == other.name
            && self.version == other.version
    }
}

impl Eq for PathSource {}

impl Hash for PathSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expanded_path.hash(state);
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source at `{}`", self.path.display())
    }
}

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use lode_constants::{BIN_NAME, VERSION};
use lode_error::Result;
use lode_lock::LockStanza;
use lode_spec::{PackageSpec, SpecIndex};
use lode_vcs::Permissions;

use crate::{InstallOptions, PackageSource};

/// The running installer itself, offered as an already-installed package so
/// manifests can depend on it.
#[derive(Debug, Default)]
pub struct MetadataSource {
    permissions: Permissions,
}

impl MetadataSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageSource for MetadataSource {
    fn specs(&self) -> Result<SpecIndex> {
        let mut index = SpecIndex::new();
        index.insert(PackageSpec::new(BIN_NAME, VERSION));
        Ok(index)
    }

    fn install(&self, _spec: &PackageSpec, _options: &InstallOptions<'_>) -> Result<()> {
        Ok(())
    }

    fn cache(&self, _spec: &PackageSpec, _cache_root: &Path) -> Result<()> {
        Ok(())
    }

    fn to_lock(&self) -> Result<Option<LockStanza>> {
        Ok(None)
    }

    fn spec_path(&self, _spec: &PackageSpec) -> Result<PathBuf> {
        Ok(std::env::current_exe()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default())
    }

    fn permissions(&self) -> Permissions {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }
}

impl PartialEq for MetadataSource {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for MetadataSource {}

impl Hash for MetadataSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        BIN_NAME.hash(state);
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the local {BIN_NAME} installation")
    }
}

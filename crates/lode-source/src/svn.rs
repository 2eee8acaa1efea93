use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use lode_constants::{DEFAULT_GLOB, LOCK_SVN, SVN_CACHE_DIR, VCS_INSTALL_DIR};
use lode_error::{LodeError, Result};
use lode_lock::LockStanza;
use lode_spec::{PackageSpec, SpecIndex, discover_specs};
use lode_vcs::{Permissions, SvnProxy};

use crate::native::run_build;
use crate::paths::{base_name, cache_dir_for, is_within};
use crate::{InstallOptions, PackageSource, SourceContext};

pub struct SvnSource {
    uri: String,
    glob: String,
    name: Option<String>,
    version: Option<String>,
    proxy: SvnProxy,
    install_path: OnceLock<PathBuf>,
    specs: OnceLock<SpecIndex>,
    copied: Mutex<bool>,
    installed: Mutex<HashSet<String>>,
    permissions: Permissions,
    context: SourceContext,
}

impl SvnSource {
    pub fn new(
        uri: impl Into<String>,
        revision: Option<String>,
        glob: Option<String>,
        context: &SourceContext,
    ) -> Self {
        let uri = uri.into();
        let proxy = SvnProxy::new(
            cache_dir_for(&context.root, SVN_CACHE_DIR, &uri),
            uri.clone(),
            revision,
            Arc::clone(&context.ui),
        );
        Self {
            uri,
            glob: glob.unwrap_or_else(|| DEFAULT_GLOB.to_string()),
            name: None,
            version: None,
            proxy,
            install_path: OnceLock::new(),
            specs: OnceLock::new(),
            copied: Mutex::new(false),
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
            Some(stanza.require("revision")?.to_string()),
            stanza.get("glob").map(str::to_string),
            context,
        ))
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn revision(&self) -> Result<String> {
        self.proxy.revision()
    }

    pub fn install_path(&self) -> Result<PathBuf> {
        if let Some(path) = self.install_path.get() {
            return Ok(path.clone());
        }
        let revision = self.proxy.revision()?;
        let path = self
            .context
            .root
            .join(VCS_INSTALL_DIR)
            .join(format!("{}-r{revision}", base_name(&self.uri)));
        Ok(self.install_path.get_or_init(|| path).clone())
    }

    pub fn unlock(&mut self) {
        self.proxy.unlock();
        self.install_path = OnceLock::new();
        self.specs = OnceLock::new();
        *self.copied.get_mut().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn ensure_copied(&self) -> Result<PathBuf> {
        let mut copied = self.copied.lock().unwrap_or_else(PoisonError::into_inner);
        if !*copied {
            self.proxy.checkout()?;
            let install_path = self.install_path()?;
            self.proxy.copy_to(&install_path)?;
            *copied = true;
        }
        self.install_path()
    }
}

impl PackageSource for SvnSource {
    fn specs(&self) -> Result<SpecIndex> {
        if let Some(index) = self.specs.get() {
            return Ok(index.clone());
        }
        let install_path = match self.install_path() {
            Ok(path) if path.exists() => path,
            _ => self.ensure_copied()?,
        };
        let mut index = discover_specs(&install_path, &self.glob)?;
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

        self.ensure_copied()?;
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

    fn cache(&self, _spec: &PackageSpec, cache_root: &Path) -> Result<()> {
        if is_within(&self.proxy.path, cache_root) {
            return Ok(());
        }
        let revision = self.proxy.revision()?;
        let target = cache_root.join(format!("{}-r{revision}", base_name(&self.uri)));
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::create_dir_all(&target)?;
        fs_extra::dir::copy(
            &self.proxy.path,
            &target,
            &fs_extra::dir::CopyOptions::new()
                .overwrite(true)
                .content_only(true),
        )
        .map_err(|e| LodeError::Io(std::io::Error::other(e)))?;
        Ok(())
    }

    fn to_lock(&self) -> Result<Option<LockStanza>> {
        Ok(Some(
            LockStanza::new(LOCK_SVN)
                .option("remote", self.uri.clone())
                .option("revision", self.proxy.revision()?)
                .option("glob", self.glob.clone()),
        ))
    }

    fn spec_path(&self, spec: &PackageSpec) -> Result<PathBuf> {
        let found = self
            .specs()?
            .get(&spec.name, &spec.version)
            .and_then(PackageSpec::manifest_dir);
        match found {
            Some(dir) => Ok(dir),
            None => self.install_path(),
        }
    }

    fn permissions(&self) -> Permissions {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
        self.proxy.set_permissions(permissions);
    }
}

impl PartialEq for SvnSource {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.name == other.name && self.version == other.version
    }
}

impl Eq for SvnSource {}

impl Hash for SvnSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
        self.name.hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for SvnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proxy.pinned_revision() {
            Some(revision) => write!(f, "{} (at r{revision})", self.uri),
            None => write!(f, "{}", self.uri),
        }
    }
}

impl fmt::Debug for SvnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SvnSource")
            .field("uri", &self.uri)
            .field("glob", &self.glob)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Source;
    use crate::test_support::context;

    #[test]
    fn test_svn_stanza_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let source = SvnSource::new(
            "svn://example.com/repo/trunk",
            Some("1207".to_string()),
            None,
            &context,
        );

        let spec = PackageSpec::new("legacy", "1.0.0");
        let text = source.to_lock_stanza(&[&spec]).unwrap();
        assert_eq!(
            text,
            "SVN\n  remote: svn://example.com/repo/trunk\n  revision: 1207\n  \
             glob: {,*,*/*}.lodespec\n  specs:\n    legacy (1.0.0)\n"
        );

        let lock = lode_lock::Lockfile::parse(&text).unwrap();
        let Source::Svn(parsed) = Source::from_lock(&lock.stanzas[0], &context).unwrap() else {
            panic!("expected an svn source");
        };
        assert_eq!(parsed, source);
        assert_eq!(parsed.revision().unwrap(), "1207");
        assert!(
            parsed
                .install_path()
                .unwrap()
                .ends_with("gems/trunk-r1207")
        );
    }

    #[test]
    fn test_svn_without_permissions_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let source = SvnSource::new("svn://example.invalid/repo", None, None, &context(dir.path()))
            .with_name_version("legacy", "1.0.0");
        let err = source.specs().unwrap_err();
        assert!(matches!(err, LodeError::NetworkDisabled(_)));
    }
}

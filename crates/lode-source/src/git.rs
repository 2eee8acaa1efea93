use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use lode_constants::{DEFAULT_GLOB, GIT_CACHE_DIR, LOCK_GIT, VCS_INSTALL_DIR};
use lode_error::{LodeError, Result};
use lode_lock::LockStanza;
use lode_spec::{PackageSpec, SpecIndex, discover_specs};
use lode_vcs::{GitProxy, Permissions};

use crate::native::run_build;
use crate::paths::{base_name, cache_dir_for, is_within, short_revision};
use crate::{InstallOptions, PackageSource, SourceContext};

/// Declared options of a git origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOptions {
    pub uri: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
    pub reference: Option<String>,
    pub revision: Option<String>,
    pub submodules: bool,
    pub glob: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl GitOptions {
    /// The ref git resolves: explicit ref, then branch, then tag.
    #[must_use]
    pub fn effective_ref(&self) -> String {
        self.reference
            .clone()
            .or_else(|| self.branch.clone())
            .or_else(|| self.tag.clone())
            .unwrap_or_else(|| "HEAD".to_string())
    }
}

pub struct GitSource {
    options: GitOptions,
    /// Spec names a lockfile pinned to this origin.
    locked_names: Vec<String>,
    reference: String,
    glob: String,
    proxy: GitProxy,
    install_path: OnceLock<PathBuf>,
    specs: OnceLock<SpecIndex>,
    copied: Mutex<bool>,
    installed: Mutex<HashSet<String>>,
    permissions: Permissions,
    context: SourceContext,
}

impl GitSource {
    pub fn new(options: GitOptions, context: &SourceContext) -> Self {
        let reference = options.effective_ref();
        let glob = options
            .glob
            .clone()
            .unwrap_or_else(|| DEFAULT_GLOB.to_string());

        let proxy = GitProxy::new(
            Self::initial_cache_path(&options, context),
            options.uri.clone(),
            reference.clone(),
            options.revision.clone(),
            std::sync::Arc::clone(&context.ui),
        )
        .with_branch(options.branch.clone())
        .with_name(options.name.clone().unwrap_or_else(|| base_name(&options.uri)));

        Self {
            options,
            locked_names: Vec::new(),
            reference,
            glob,
            proxy,
            install_path: OnceLock::new(),
            specs: OnceLock::new(),
            copied: Mutex::new(false),
            installed: Mutex::new(HashSet::new()),
            permissions: Permissions::default(),
            context: context.clone(),
        }
    }

    /// A pinned revision already copied into the package cache is used as
    /// the bare cache, so frozen installs need no network.
    fn initial_cache_path(options: &GitOptions, context: &SourceContext) -> PathBuf {
        if let Some(revision) = &options.revision {
            let app_cache = context.package_cache.join(format!(
                "{}-{}",
                base_name(&options.uri),
                short_revision(revision)
            ));
            if app_cache.join("HEAD").exists() {
                return app_cache;
            }
        }
        cache_dir_for(&context.root, GIT_CACHE_DIR, &options.uri)
    }

    pub fn from_lock(stanza: &LockStanza, context: &SourceContext) -> Result<Self> {
        let owned = |key: &str| stanza.get(key).map(str::to_string);
        let options = GitOptions {
            uri: stanza.require("remote")?.to_string(),
            branch: owned("branch"),
            tag: owned("tag"),
            reference: owned("ref"),
            revision: Some(stanza.require("revision")?.to_string()),
            submodules: stanza.get("submodules") == Some("true"),
            glob: owned("glob"),
            name: None,
            version: None,
        };
        let mut source = Self::new(options, context);
        source.locked_names = stanza.specs.iter().map(|(name, _)| name.clone()).collect();
        Ok(source)
    }

    #[must_use]
    pub const fn options(&self) -> &GitOptions {
        &self.options
    }

    /// Names a local override may be configured under: the declared name,
    /// then every spec the lockfile pinned here.
    pub fn override_names(&self) -> impl Iterator<Item = &str> {
        self.options
            .name
            .as_deref()
            .into_iter()
            .chain(self.locked_names.iter().map(String::as_str))
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.options.uri
    }

    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    #[must_use]
    pub fn glob(&self) -> &str {
        &self.glob
    }

    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.proxy.path
    }

    pub fn revision(&self) -> Result<String> {
        self.proxy.revision()
    }

    /// `<root>/gems/<basename>-<revision[..12]>`, or the override directory.
    pub fn install_path(&self) -> Result<PathBuf> {
        if self.proxy.is_local() {
            return Ok(self.proxy.path.clone());
        }
        if let Some(path) = self.install_path.get() {
            return Ok(path.clone());
        }
        let revision = self.proxy.revision()?;
        let path = self.context.root.join(VCS_INSTALL_DIR).join(format!(
            "{}-{}",
            base_name(&self.options.uri),
            short_revision(&revision)
        ));
        Ok(self.install_path.get_or_init(|| path).clone())
    }

    /// Redirects this source to a user working copy. Returns whether the
    /// revision differs from the one the lockfile pinned.
    pub fn local_override(&mut self, path: &Path) -> Result<bool> {
        let locked = self.options.revision.clone();
        let changed = self.proxy.local_override(path, locked.as_deref())?;
        self.install_path = OnceLock::new();
        self.specs = OnceLock::new();
        *self.copied.get_mut().unwrap_or_else(PoisonError::into_inner) = false;
        Ok(changed)
    }

    /// Drops the pinned revision so the next install resolves the ref again.
    pub fn unlock(&mut self) {
        self.options.revision = None;
        self.proxy.unlock();
        self.install_path = OnceLock::new();
        self.specs = OnceLock::new();
        *self.copied.get_mut().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// Fetches into the bare cache and checks out the pinned revision once.
    fn ensure_copied(&self) -> Result<PathBuf> {
        let mut copied = self.copied.lock().unwrap_or_else(PoisonError::into_inner);
        if self.proxy.is_local() {
            *copied = true;
            return self.install_path();
        }
        if !*copied {
            self.proxy.checkout()?;
            let install_path = self.install_path()?;
            self.proxy.copy_to(&install_path, self.options.submodules)?;
            *copied = true;
        }
        self.install_path()
    }

    fn load_specs(&self) -> Result<SpecIndex> {
        let install_path = if self.proxy.is_local() {
            self.proxy.path.clone()
        } else {
            match self.install_path() {
                Ok(path) if path.exists() => path,
                _ => self.ensure_copied()?,
            }
        };

        let mut index = discover_specs(&install_path, &self.glob)?;
        if index.is_empty() {
            if let (Some(name), Some(version)) = (&self.options.name, &self.options.version) {
                index.insert(PackageSpec::new(name.clone(), version.clone()));
            }
        }
        Ok(index)
    }
}

impl PackageSource for GitSource {
    fn specs(&self) -> Result<SpecIndex> {
        if let Some(index) = self.specs.get() {
            return Ok(index.clone());
        }
        let index = self.load_specs()?;
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
        let target = cache_root.join(format!(
            "{}-{}",
            base_name(&self.options.uri),
            short_revision(&revision)
        ));
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
        self.context
            .ui
            .debug(&format!("Cached {self} in {}", target.display()));
        Ok(())
    }

    fn to_lock(&self) -> Result<Option<LockStanza>> {
        let mut stanza = LockStanza::new(LOCK_GIT)
            .option("remote", self.options.uri.clone())
            .option("revision", self.proxy.revision()?);
        if let Some(reference) = &self.options.reference {
            stanza = stanza.option("ref", reference.clone());
        }
        if let Some(branch) = &self.options.branch {
            stanza = stanza.option("branch", branch.clone());
        }
        if let Some(tag) = &self.options.tag {
            stanza = stanza.option("tag", tag.clone());
        }
        if self.options.submodules {
            stanza = stanza.option("submodules", "true");
        }
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

impl PartialEq for GitSource {
    fn eq(&self, other: &Self) -> bool {
        self.options.uri == other.options.uri
            && self.reference == other.reference
            && self.options.name == other.options.name
            && self.options.version == other.options.version
    }
}

impl Eq for GitSource {}

impl Hash for GitSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.options.uri.hash(state);
        self.reference.hash(state);
        self.options.name.hash(state);
        self.options.version.hash(state);
    }
}

impl fmt::Display for GitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proxy.pinned_revision() {
            Some(revision) if revision != self.reference => write!(
                f,
                "{} (at {}@{})",
                self.options.uri,
                self.reference,
                &revision.chars().take(7).collect::<String>()
            ),
            _ => write!(f, "{} (at {})", self.options.uri, self.reference),
        }
    }
}

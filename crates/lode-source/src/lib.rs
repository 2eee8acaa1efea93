//! Package origins: registries, git and svn repositories, local paths, and
//! the installer's own metadata.

pub mod git;
pub mod metadata;
pub mod native;
pub mod path;
pub mod paths;
pub mod registry;
pub mod svn;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lode_constants::{LOCK_GIT, LOCK_PATH, LOCK_REGISTRY, LOCK_SVN, PACKAGE_CACHE_DIR};
use lode_error::{LodeError, Result};
use lode_lock::LockStanza;
use lode_logger::Ui;
use lode_spec::{PackageSpec, SpecIndex};
pub use lode_vcs::Permissions;

pub use git::{GitOptions, GitSource};
pub use metadata::MetadataSource;
pub use path::PathSource;
pub use registry::RegistrySource;
pub use svn::SvnSource;

/// Directories and diagnostics shared by every source.
#[derive(Clone)]
pub struct SourceContext {
    /// Install root holding VCS caches and installed packages.
    pub root: PathBuf,
    /// Offline package cache for reproducible installs.
    pub package_cache: PathBuf,
    /// Base for relative path sources.
    pub project_root: PathBuf,
    pub ui: Arc<dyn Ui>,
}

impl SourceContext {
    pub fn new(root: impl Into<PathBuf>, project_root: impl Into<PathBuf>, ui: Arc<dyn Ui>) -> Self {
        let project_root = project_root.into();
        Self {
            root: root.into(),
            package_cache: project_root.join(PACKAGE_CACHE_DIR),
            project_root,
            ui,
        }
    }

    #[must_use]
    pub fn with_package_cache(mut self, package_cache: impl Into<PathBuf>) -> Self {
        self.package_cache = package_cache.into();
        self
    }
}

impl fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceContext")
            .field("root", &self.root)
            .field("package_cache", &self.package_cache)
            .field("project_root", &self.project_root)
            .finish_non_exhaustive()
    }
}

/// Per-call install settings handed down by the package installer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions<'a> {
    pub build_flags: Option<&'a [String]>,
}

/// Operations every origin supports.
pub trait PackageSource: fmt::Display + Send + Sync {
    /// Specs available from this origin, discovered once.
    fn specs(&self) -> Result<SpecIndex>;

    /// Materializes `spec`. Repeated calls for the same spec are no-ops.
    fn install(&self, spec: &PackageSpec, options: &InstallOptions<'_>) -> Result<()>;

    /// Copies installed content for `spec` into `cache_root`.
    fn cache(&self, spec: &PackageSpec, cache_root: &Path) -> Result<()>;

    /// Lockfile block without its spec list; `None` for origins never locked.
    fn to_lock(&self) -> Result<Option<LockStanza>>;

    /// Directory holding the installed content of `spec`.
    fn spec_path(&self, spec: &PackageSpec) -> Result<PathBuf>;

    fn permissions(&self) -> Permissions;

    fn set_permissions(&mut self, permissions: Permissions);

    /// Allows network access (and the cache).
    fn remote(&mut self) {
        self.set_permissions(Permissions::remote());
    }

    /// Allows only the local cache.
    fn cached(&mut self) {
        let mut permissions = self.permissions();
        permissions.cached = true;
        self.set_permissions(permissions);
    }

    fn to_lock_stanza(&self, specs: &[&PackageSpec]) -> Result<String> {
        Ok(self
            .to_lock()?
            .map(|mut stanza| {
                for spec in specs {
                    stanza.add_spec(&spec.name, &spec.version);
                }
                stanza.to_string()
            })
            .unwrap_or_default())
    }
}

#[derive(PartialEq, Eq, Hash)]
pub enum Source {
    Registry(RegistrySource),
    Git(GitSource),
    Svn(SvnSource),
    Path(PathSource),
    Metadata(MetadataSource),
}

impl Source {
    #[must_use]
    pub fn adapter(&self) -> &dyn PackageSource {
        match self {
            Self::Registry(source) => source,
            Self::Git(source) => source,
            Self::Svn(source) => source,
            Self::Path(source) => source,
            Self::Metadata(source) => source,
        }
    }

    pub fn adapter_mut(&mut self) -> &mut dyn PackageSource {
        match self {
            Self::Registry(source) => source,
            Self::Git(source) => source,
            Self::Svn(source) => source,
            Self::Path(source) => source,
            Self::Metadata(source) => source,
        }
    }

    pub fn specs(&self) -> Result<SpecIndex> {
        self.adapter().specs()
    }

    pub fn install(&self, spec: &PackageSpec, options: &InstallOptions<'_>) -> Result<()> {
        self.adapter().install(spec, options)
    }

    pub fn cache(&self, spec: &PackageSpec, cache_root: &Path) -> Result<()> {
        self.adapter().cache(spec, cache_root)
    }

    pub fn spec_path(&self, spec: &PackageSpec) -> Result<PathBuf> {
        self.adapter().spec_path(spec)
    }

    pub fn to_lock_stanza(&self, specs: &[&PackageSpec]) -> Result<String> {
        self.adapter().to_lock_stanza(specs)
    }

    pub fn remote(&mut self) {
        self.adapter_mut().remote();
    }

    pub fn cached(&mut self) {
        self.adapter_mut().cached();
    }

    #[must_use]
    pub fn permissions(&self) -> Permissions {
        self.adapter().permissions()
    }

    /// Rebuilds a source from its lockfile block.
    pub fn from_lock(stanza: &LockStanza, context: &SourceContext) -> Result<Self> {
        match stanza.kind.as_str() {
            LOCK_GIT => Ok(Self::Git(GitSource::from_lock(stanza, context)?)),
            LOCK_SVN => Ok(Self::Svn(SvnSource::from_lock(stanza, context)?)),
            LOCK_PATH => Ok(Self::Path(PathSource::from_lock(stanza, context)?)),
            LOCK_REGISTRY => Ok(Self::Registry(RegistrySource::from_lock(stanza, context)?)),
            other => Err(LodeError::Lockfile(format!(
                "unknown source section `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.adapter(), f)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({self})")
    }
}

/// A spec paired with the origin it installs from.
#[derive(Debug, Clone)]
pub struct ResolvedSpec {
    pub spec: PackageSpec,
    pub source: Arc<Source>,
}

impl ResolvedSpec {
    #[must_use]
    pub const fn new(spec: PackageSpec, source: Arc<Source>) -> Self {
        Self { spec, source }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use lode_logger::SilentUi;

    pub fn context(dir: &Path) -> SourceContext {
        SourceContext::new(dir.join("root"), dir.join("project"), Arc::new(SilentUi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(source: &Source) -> u64 {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        hasher.finish()
    }

    fn git(context: &SourceContext, reference: &str) -> Source {
        Source::Git(GitSource::new(
            GitOptions {
                uri: "https://example.com/org/rack.git".to_string(),
                branch: Some(reference.to_string()),
                name: Some("rack".to_string()),
                version: Some("2.0.0".to_string()),
                ..GitOptions::default()
            },
            context,
        ))
    }

    #[test]
    fn test_identical_git_declarations_are_equal() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_support::context(dir.path());
        let a = git(&context, "main");
        let mut b = git(&context, "main");
        b.remote();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_changing_ref_breaks_equality() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_support::context(dir.path());
        assert_ne!(git(&context, "main"), git(&context, "stable"));
    }

    #[test]
    fn test_different_variants_are_not_equal() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_support::context(dir.path());
        let path = Source::Path(PathSource::new("rack", None, &context));
        assert_ne!(git(&context, "main"), path);
    }

    #[test]
    fn test_permission_setters() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_support::context(dir.path());
        let mut source = git(&context, "main");
        assert!(!source.permissions().allowed());

        source.cached();
        assert_eq!(source.permissions(), Permissions::cached());

        source.remote();
        assert_eq!(source.permissions(), Permissions::remote());
    }

    #[test]
    fn test_unknown_lock_section() {
        let dir = tempfile::tempdir().unwrap();
        let context = test_support::context(dir.path());
        let err = Source::from_lock(&LockStanza::new("HG"), &context).unwrap_err();
        assert!(err.to_string().contains("HG"));
    }

    #[test]
    fn test_metadata_emits_no_stanza() {
        let source = Source::Metadata(MetadataSource::new());
        let spec = PackageSpec::new("lode", lode_constants::VERSION);
        assert_eq!(source.to_lock_stanza(&[&spec]).unwrap(), "");
    }
}

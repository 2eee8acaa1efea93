//! Concurrent package installer: schedules resolved specs across a worker
//! pool and fetches them from registry, git, svn and path sources.

pub use lode_core::{
    InstallConfig, InstallSummary, InstallationState, PackageInstaller, ParallelInstaller,
    SpecInstaller, WorkerPool, install, install_with_logger, lock_for, locked_sources,
};
pub use lode_error::{LodeError, Result};
pub use lode_lock::{LockStanza, Lockfile};
pub use lode_logger::{LogLevel, Logger, RecordingUi, SilentUi, Ui};
pub use lode_source::{
    GitOptions, GitSource, InstallOptions, MetadataSource, PackageSource, PathSource,
    Permissions, RegistrySource, ResolvedSpec, Source, SourceContext, SvnSource,
};
pub use lode_spec::{Dependency, DependencyKind, PackageSpec, SpecIndex};
pub use lode_vcs::{GitProxy, SvnProxy};

pub mod config;
pub mod installer;
pub mod lockfile;
pub mod pool;
pub mod scheduler;

use std::sync::Arc;

use lode_error::Result;
use lode_logger::Ui;
use lode_source::ResolvedSpec;

pub use config::InstallConfig;
pub use installer::{PackageInstaller, SpecInstaller};
pub use lockfile::{lock_for, locked_sources};
pub use pool::WorkerPool;
pub use scheduler::{InstallSummary, InstallationState, ParallelInstaller};

/// Installs a resolved set with the package installer, using the worker
/// count `config` allows.
pub fn install(
    config: InstallConfig,
    specs: Vec<ResolvedSpec>,
    ui: &Arc<dyn Ui>,
) -> Result<InstallSummary> {
    let concurrency = config.concurrency();
    let installer = PackageInstaller::new(config, Arc::clone(ui));
    ParallelInstaller::new(Arc::new(installer), Arc::clone(ui)).run(specs, concurrency)
}

/// Like [`install`], reporting through the terminal logger built from
/// `config`. Prints the elapsed time when every spec is installed.
pub fn install_with_logger(
    config: InstallConfig,
    specs: Vec<ResolvedSpec>,
) -> Result<InstallSummary> {
    let logger = Arc::new(config.logger());
    let ui: Arc<dyn Ui> = Arc::clone(&logger) as Arc<dyn Ui>;
    match install(config, specs, &ui) {
        Ok(summary) => {
            logger.finish(&format!("Installed {} packages", summary.installed.len()));
            Ok(summary)
        }
        Err(err) => {
            logger.error(&err.to_string());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_source::{PathSource, Source};
    use lode_spec::PackageSpec;
    use std::fs;

    #[test]
    fn test_install_with_logger_runs_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let package = dir.path().join("tool");
        fs::create_dir_all(&package).unwrap();
        fs::write(
            package.join("tool.lodespec"),
            r#"{"name":"tool","version":"1.0.0"}"#,
        )
        .unwrap();

        let mut config = InstallConfig::default();
        config.root = dir.path().join("root");
        config.jobs = 2;
        let context = config.source_context(dir.path(), Arc::new(lode_logger::SilentUi));
        let source = Arc::new(Source::Path(PathSource::new("tool", None, &context)));
        let specs = vec![ResolvedSpec::new(PackageSpec::new("tool", "1.0.0"), source)];

        let summary = install_with_logger(config, specs).unwrap();
        assert_eq!(summary.installed, vec!["tool-1.0.0"]);
    }
}

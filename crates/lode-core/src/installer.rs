use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use lode_error::{LodeError, Result};
use lode_logger::Ui;
use lode_source::{InstallOptions, ResolvedSpec};

use crate::config::InstallConfig;

/// Installs one resolved spec and returns its post-install message.
pub trait SpecInstaller: Send + Sync {
    fn install_from_spec(&self, resolved: &ResolvedSpec) -> Result<String>;
}

pub struct PackageInstaller {
    config: InstallConfig,
    /// Serializes installs that need custom native build flags.
    build_lock: Mutex<()>,
    ui: Arc<dyn Ui>,
}

impl PackageInstaller {
    pub fn new(config: InstallConfig, ui: Arc<dyn Ui>) -> Self {
        Self {
            config,
            build_lock: Mutex::new(()),
            ui,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &InstallConfig {
        &self.config
    }

    fn install_source(&self, resolved: &ResolvedSpec) -> Result<()> {
        let spec = &resolved.spec;
        match self.config.build_flags_for(&spec.name) {
            Some(flags) => {
                let _guard = self
                    .build_lock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                self.ui.debug(&format!(
                    "Using build flags for {}: {}",
                    spec.name,
                    flags.join(" ")
                ));
                resolved.source.install(
                    spec,
                    &InstallOptions {
                        build_flags: Some(flags),
                    },
                )
            }
            None => resolved.source.install(spec, &InstallOptions::default()),
        }
    }

    fn generate_shims(&self, resolved: &ResolvedSpec) -> Result<()> {
        let spec = &resolved.spec;
        let Some(bin_dir) = &self.config.bin_dir else {
            return Ok(());
        };
        if spec.executables.is_empty() {
            return Ok(());
        }

        let package_dir = resolved.source.spec_path(spec)?;
        fs::create_dir_all(bin_dir)?;
        for executable in &spec.executables {
            let shim = shim_path(bin_dir, executable);
            if shim.exists() && !self.config.standalone && !self.config.force {
                self.ui
                    .debug(&format!("Skipping existing shim {}", shim.display()));
                continue;
            }
            let target = package_dir.join(&spec.bindir).join(executable);
            write_shim(&shim, &target)?;
            self.ui.debug(&format!(
                "Wrote shim {} -> {}",
                shim.display(),
                target.display()
            ));
        }
        Ok(())
    }
}

fn shim_path(bin_dir: &Path, executable: &str) -> std::path::PathBuf {
    if cfg!(windows) {
        bin_dir.join(format!("{executable}.cmd"))
    } else {
        bin_dir.join(executable)
    }
}

#[cfg(unix)]
fn write_shim(shim: &Path, target: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(
        shim,
        format!("#!/bin/sh\nexec \"{}\" \"$@\"\n", target.display()),
    )?;
    fs::set_permissions(shim, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_shim(shim: &Path, target: &Path) -> Result<()> {
    fs::write(shim, format!("@\"{}\" %*\r\n", target.display()))?;
    Ok(())
}

/// Maps a raw failure onto what the user should see for `resolved`.
pub(crate) fn classify(resolved: &ResolvedSpec, err: LodeError) -> LodeError {
    if err.is_disk_exhaustion() {
        return LodeError::DiskSpace(resolved.spec.to_string());
    }
    match err {
        LodeError::Integrity(_) | LodeError::Install { .. } | LodeError::DiskSpace(_) => err,
        cause => LodeError::Install {
            name: resolved.spec.name.clone(),
            version: resolved.spec.version.clone(),
            origin: resolved.source.to_string(),
            cause: Box::new(cause),
        },
    }
}

impl SpecInstaller for PackageInstaller {
    fn install_from_spec(&self, resolved: &ResolvedSpec) -> Result<String> {
        self.ui
            .debug(&format!("Installing {} from {}", resolved.spec, resolved.source));
        self.install_source(resolved)
            .and_then(|()| self.generate_shims(resolved))
            .map_err(|err| classify(resolved, err))?;
        Ok(resolved.spec.post_install_message.clone().unwrap_or_default())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use lode_logger::SilentUi;
    use lode_source::{PathSource, Source, SourceContext};
    use lode_spec::PackageSpec;
    use std::path::PathBuf;

    fn package(project: &Path, manifest: &str) -> PathBuf {
        let dir = project.join("tool");
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("tool.lodespec"), manifest).unwrap();
        dir
    }

    fn resolved(context: &SourceContext) -> ResolvedSpec {
        let source = PathSource::new("tool", None, context);
        let spec = lode_source::PackageSource::specs(&source)
            .unwrap()
            .iter()
            .next()
            .unwrap()
            .clone();
        ResolvedSpec::new(spec, Arc::new(Source::Path(source)))
    }

    fn setup(manifest: &str) -> (tempfile::TempDir, InstallConfig, SourceContext) {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        package(&project, manifest);
        let mut config = InstallConfig::default();
        config.root = dir.path().join("root");
        config.package_cache = project.join("vendor/cache");
        config.bin_dir = Some(dir.path().join("bin"));
        let context = config.source_context(&project, Arc::new(SilentUi));
        (dir, config, context)
    }

    #[test]
    fn test_returns_post_install_message() {
        let (_dir, config, context) = setup(
            r#"{"name":"tool","version":"1.0.0","postInstallMessage":"Thanks for installing"}"#,
        );
        let installer = PackageInstaller::new(config, Arc::new(SilentUi));
        let message = installer.install_from_spec(&resolved(&context)).unwrap();
        assert_eq!(message, "Thanks for installing");
    }

    #[test]
    fn test_disk_exhaustion_is_reported_as_disk_space() {
        let (_dir, config, context) = setup(
            r#"{"name":"tool","version":"1.0.0",
                "build":"echo 'write error: No space left on device' >&2; exit 1"}"#,
        );
        let installer = PackageInstaller::new(config, Arc::new(SilentUi));
        let err = installer.install_from_spec(&resolved(&context)).unwrap_err();
        assert!(matches!(err, LodeError::DiskSpace(_)));
        assert!(err.to_string().contains("not enough space"));
    }

    #[test]
    fn test_other_failures_are_wrapped_with_origin() {
        let (_dir, config, context) =
            setup(r#"{"name":"tool","version":"1.0.0","build":"exit 3"}"#);
        let installer = PackageInstaller::new(config, Arc::new(SilentUi));
        let err = installer.install_from_spec(&resolved(&context)).unwrap_err();
        let LodeError::Install { name, version, .. } = &err else {
            panic!("expected an install error, got {err:?}");
        };
        assert_eq!((name.as_str(), version.as_str()), ("tool", "1.0.0"));
        assert!(err.to_string().contains("installs on its own"));
    }

    #[test]
    fn test_integrity_errors_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let context = lode_source::SourceContext::new(
            dir.path(),
            dir.path(),
            Arc::new(SilentUi),
        );
        let resolved = ResolvedSpec::new(
            PackageSpec::new("ledger", "2.7.1"),
            Arc::new(Source::Path(PathSource::new("ledger", None, &context))),
        );
        let err = classify(&resolved, LodeError::Integrity("bad digest".to_string()));
        assert!(matches!(err, LodeError::Integrity(_)));
    }

    #[test]
    fn test_build_flags_reach_build() {
        let (dir, mut config, context) = setup(
            r#"{"name":"tool","version":"1.0.0","build":"echo \"$LODE_BUILD_FLAGS\" > flags.txt"}"#,
        );
        config
            .build_flags
            .insert("tool".to_string(), vec!["--fast".to_string()]);
        let installer = PackageInstaller::new(config, Arc::new(SilentUi));
        installer.install_from_spec(&resolved(&context)).unwrap();

        let flags = fs::read_to_string(dir.path().join("project/tool/flags.txt")).unwrap();
        assert_eq!(flags.trim(), "--fast");
    }

    #[test]
    fn test_shims_respect_existing_files() {
        let manifest = r#"{"name":"tool","version":"1.0.0","executables":["tool"]}"#;
        let (dir, config, context) = setup(manifest);
        let shim = dir.path().join("bin/tool");

        PackageInstaller::new(config.clone(), Arc::new(SilentUi))
            .install_from_spec(&resolved(&context))
            .unwrap();
        let written = fs::read_to_string(&shim).unwrap();
        assert!(written.starts_with("#!/bin/sh"));
        assert!(written.contains("project/tool/bin/tool"));

        fs::write(&shim, "custom").unwrap();
        PackageInstaller::new(config.clone(), Arc::new(SilentUi))
            .install_from_spec(&resolved(&context))
            .unwrap();
        assert_eq!(fs::read_to_string(&shim).unwrap(), "custom");

        let mut forced = config;
        forced.force = true;
        PackageInstaller::new(forced, Arc::new(SilentUi))
            .install_from_spec(&resolved(&context))
            .unwrap();
        assert!(fs::read_to_string(&shim).unwrap().starts_with("#!/bin/sh"));
    }

    #[test]
    fn test_flagged_builds_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        let log = dir.path().join("builds.log");
        let build = format!(
            "echo start >> '{0}'; sleep 0.2; echo end >> '{0}'",
            log.display()
        );
        for name in ["alpha", "beta"] {
            let package = project.join(name);
            fs::create_dir_all(&package).unwrap();
            let manifest =
                format!(r#"{{"name":"{name}","version":"1.0.0","build":"{build}"}}"#);
            fs::write(package.join(format!("{name}.lodespec")), manifest).unwrap();
        }

        let mut config = InstallConfig::default();
        config.root = dir.path().join("root");
        for name in ["alpha", "beta"] {
            config
                .build_flags
                .insert(name.to_string(), vec!["--with-system-libs".to_string()]);
        }
        let context = config.source_context(&project, Arc::new(SilentUi));
        let specs = ["alpha", "beta"]
            .into_iter()
            .map(|name| {
                let source = PathSource::new(name, None, &context);
                let spec = lode_source::PackageSource::specs(&source)
                    .unwrap()
                    .get(name, "1.0.0")
                    .unwrap()
                    .clone();
                ResolvedSpec::new(spec, Arc::new(Source::Path(source)))
            })
            .collect();

        let installer = Arc::new(PackageInstaller::new(config, Arc::new(SilentUi)));
        crate::ParallelInstaller::new(installer, Arc::new(SilentUi))
            .run(specs, 2)
            .unwrap();

        let lines: Vec<String> = fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, ["start", "end", "start", "end"]);
    }
}

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lode_constants::{
    BUILD_FLAGS_ENV_PREFIX, LOCAL_OVERRIDE_ENV_PREFIX, PACKAGE_CACHE_DIR, ROOT_DIR_NAME,
};
use lode_error::Result;
use lode_logger::{Logger, Ui};
use lode_source::{Source, SourceContext};

/// Everything an install run needs, passed explicitly instead of read from
/// process globals.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Install root for VCS caches and installed packages.
    pub root: PathBuf,
    pub package_cache: PathBuf,
    pub jobs: usize,
    /// Native build flags keyed by package name.
    pub build_flags: HashMap<String, Vec<String>>,
    /// Working copies used instead of the managed git cache, keyed by package name.
    pub local_overrides: HashMap<String, PathBuf>,
    pub bin_dir: Option<PathBuf>,
    /// Always rewrite shims.
    pub standalone: bool,
    /// Overwrite shims that already exist.
    pub force: bool,
    /// Offline: sources may only use what is already cached.
    pub frozen: bool,
    pub debug: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(env::temp_dir);
        let project = env::current_dir().unwrap_or_default();
        Self {
            root: home.join(ROOT_DIR_NAME),
            package_cache: project.join(PACKAGE_CACHE_DIR),
            jobs: num_cpus::get(),
            build_flags: HashMap::new(),
            local_overrides: HashMap::new(),
            bin_dir: None,
            standalone: false,
            force: false,
            frozen: false,
            debug: false,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `LODE_BUILD_FLAGS_SQLITE_DRIVER` names package `nokogiri`.
fn package_key(suffix: &str) -> String {
    suffix.to_ascii_lowercase()
}

impl InstallConfig {
    /// Defaults overlaid with `LODE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "LODE_ROOT" => config.root = PathBuf::from(value),
                "LODE_CACHE" => config.package_cache = PathBuf::from(value),
                "LODE_JOBS" => {
                    if let Ok(jobs) = value.trim().parse::<usize>() {
                        config.jobs = jobs;
                    }
                }
                "LODE_BIN" => config.bin_dir = Some(PathBuf::from(value)),
                "LODE_FROZEN" => config.frozen = truthy(value),
                "LODE_DEBUG" => config.debug = truthy(value),
                _ => {
                    if let Some(name) = key.strip_prefix(BUILD_FLAGS_ENV_PREFIX) {
                        config.build_flags.insert(
                            package_key(name),
                            value.split_whitespace().map(str::to_string).collect(),
                        );
                    } else if let Some(name) = key.strip_prefix(LOCAL_OVERRIDE_ENV_PREFIX) {
                        config
                            .local_overrides
                            .insert(package_key(name), PathBuf::from(value));
                    }
                }
            }
        }
        config
    }

    /// Worker count for the scheduler: one job is left for the coordinator.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.jobs.saturating_sub(1).max(1)
    }

    /// Flags for `name`; env-derived keys spell dashes as underscores.
    #[must_use]
    pub fn build_flags_for(&self, name: &str) -> Option<&[String]> {
        self.build_flags
            .get(name)
            .or_else(|| self.build_flags.get(&name.replace('-', "_")))
            .map(Vec::as_slice)
    }

    /// Terminal logger for this run; debug lines show when `debug` is set.
    #[must_use]
    pub fn logger(&self) -> Logger {
        Logger::new(false, self.debug)
    }

    #[must_use]
    pub fn source_context(&self, project_root: &Path, ui: Arc<dyn Ui>) -> SourceContext {
        SourceContext::new(&self.root, project_root, ui).with_package_cache(&self.package_cache)
    }

    /// Opens the permission gates this run allows and applies a local
    /// override when one is configured. Returns whether the override moved
    /// the source off its locked revision.
    pub fn prepare(&self, source: &mut Source) -> Result<bool> {
        if self.frozen {
            source.cached();
        } else {
            source.remote();
        }

        let Source::Git(git) = source else {
            return Ok(false);
        };
        let Some(path) = git
            .override_names()
            .find_map(|name| self.local_overrides.get(name))
            .cloned()
        else {
            return Ok(false);
        };
        git.local_override(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_logger::SilentUi;
    use lode_source::{PathSource, Permissions};

    #[test]
    fn test_concurrency_leaves_one_job_for_coordinator() {
        let mut config = InstallConfig::default();
        config.jobs = 8;
        assert_eq!(config.concurrency(), 7);
        config.jobs = 1;
        assert_eq!(config.concurrency(), 1);
        config.jobs = 0;
        assert_eq!(config.concurrency(), 1);
    }

    #[test]
    fn test_from_vars() {
        let config = InstallConfig::from_vars([
            ("LODE_ROOT", "/opt/lode"),
            ("LODE_JOBS", "3"),
            ("LODE_FROZEN", "true"),
            ("LODE_BIN", "/usr/local/bin"),
            ("LODE_BUILD_FLAGS_SQLITE_DRIVER", "--use-system-libraries  --enable-static"),
            ("LODE_LOCAL_ROUTER", "/src/router"),
            ("PATH", "/usr/bin"),
        ]);

        assert_eq!(config.root, PathBuf::from("/opt/lode"));
        assert_eq!(config.jobs, 3);
        assert!(config.frozen);
        assert!(!config.debug);
        assert_eq!(config.bin_dir, Some(PathBuf::from("/usr/local/bin")));
        assert_eq!(
            config.build_flags_for("sqlite-driver").unwrap(),
            ["--use-system-libraries", "--enable-static"]
        );
        assert_eq!(config.local_overrides["router"], PathBuf::from("/src/router"));
    }

    #[test]
    fn test_debug_reaches_logger() {
        let config = InstallConfig::from_vars([("LODE_DEBUG", "1")]);
        assert!(config.debug);
        assert!(config.logger().debug_enabled());
        assert!(!InstallConfig::default().logger().debug_enabled());
    }

    #[test]
    fn test_invalid_jobs_keeps_default() {
        let config = InstallConfig::from_vars([("LODE_JOBS", "many")]);
        assert_eq!(config.jobs, num_cpus::get());
    }

    #[test]
    fn test_build_flags_match_dashed_names() {
        let config = InstallConfig::from_vars([("LODE_BUILD_FLAGS_MYSQL_CLIENT", "-O2")]);
        assert!(config.build_flags_for("mysql-client").is_some());
        assert!(config.build_flags_for("mysql").is_none());
    }

    #[test]
    fn test_prepare_sets_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = InstallConfig::default();
        let context = config.source_context(dir.path(), Arc::new(SilentUi));

        let mut source = Source::Path(PathSource::new("pkg", None, &context));
        assert!(!config.prepare(&mut source).unwrap());
        assert_eq!(source.permissions(), Permissions::remote());

        config.frozen = true;
        let mut frozen = Source::Path(PathSource::new("pkg", None, &context));
        config.prepare(&mut frozen).unwrap();
        assert_eq!(frozen.permissions(), Permissions::cached());
    }

    fn git(dir: &Path, args: &[&str]) -> Option<String> {
        let output = std::process::Command::new("git")
            .args(["-c", "user.email=dev@example.com", "-c", "user.name=dev"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .output()
            .ok()?;
        assert!(output.status.success(), "git {args:?} failed");
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    #[test]
    fn test_prepare_applies_override_to_locked_source() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("widget");
        std::fs::create_dir_all(&local).unwrap();
        if git(&local, &["init", "--quiet"]).is_none() {
            return;
        }
        git(&local, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(
            local.join("widget.lodespec"),
            r#"{"name":"widget","version":"0.3.0"}"#,
        )
        .unwrap();
        git(&local, &["add", "."]);
        git(&local, &["commit", "--quiet", "-m", "init"]);
        let locked = git(&local, &["rev-parse", "HEAD"]).unwrap();
        git(&local, &["commit", "--quiet", "--allow-empty", "-m", "next"]);

        let mut config = InstallConfig::default();
        config.root = dir.path().join("root");
        config
            .local_overrides
            .insert("widget".to_string(), local.clone());
        let context = config.source_context(dir.path(), Arc::new(SilentUi));

        let mut stanza = lode_lock::LockStanza::new("GIT")
            .option("remote", "https://example.com/org/widget.git")
            .option("revision", locked)
            .option("branch", "main");
        stanza.add_spec("widget", "0.3.0");
        let mut source = Source::from_lock(&stanza, &context).unwrap();

        assert!(config.prepare(&mut source).unwrap());
        let Source::Git(git_source) = &source else {
            panic!("expected a git source");
        };
        assert_eq!(git_source.install_path().unwrap(), local);
    }
}

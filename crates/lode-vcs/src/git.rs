//! Bare-cache git checkouts pinned to exact revisions.
//!
//! A proxy moves through three states: nothing on disk, a bare clone at
//! `path`, and working copies created from that clone by [`GitProxy::copy_to`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use lode_error::{LodeError, Result};
use lode_logger::Ui;

use crate::Permissions;
use crate::command::{run, succeeds};

pub struct GitProxy {
    pub path: PathBuf,
    pub uri: String,
    pub reference: String,
    pub branch: Option<String>,
    name: String,
    revision: OnceLock<String>,
    permissions: Permissions,
    local: bool,
    ui: Arc<dyn Ui>,
}

impl GitProxy {
    pub fn new(
        path: PathBuf,
        uri: impl Into<String>,
        reference: impl Into<String>,
        revision: Option<String>,
        ui: Arc<dyn Ui>,
    ) -> Self {
        let uri = uri.into();
        let revision_cell = OnceLock::new();
        if let Some(revision) = revision {
            let _ = revision_cell.set(revision);
        }
        Self {
            path,
            name: uri.clone(),
            uri,
            reference: reference.into(),
            branch: None,
            revision: revision_cell,
            permissions: Permissions::default(),
            local: false,
            ui,
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    /// Name used in override error messages.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub const fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    #[must_use]
    pub const fn allowed(&self) -> bool {
        self.permissions.allowed()
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.local
    }

    /// The pinned revision if one is already known, without touching git.
    #[must_use]
    pub fn pinned_revision(&self) -> Option<&str> {
        self.revision.get().map(String::as_str)
    }

    fn git(&self, args: &[&str], dir: &Path) -> Result<String> {
        run("git", args, Some(dir), self.ui.as_ref())
    }

    fn ensure_allowed(&self) -> Result<()> {
        if self.allowed() {
            Ok(())
        } else {
            Err(LodeError::NetworkDisabled(format!("The git source {}", self.uri)))
        }
    }

    fn ensure_remote(&self) -> Result<()> {
        if self.permissions.remote {
            Ok(())
        } else {
            Err(LodeError::NetworkDisabled(format!(
                "The git source {} at {}",
                self.uri, self.reference
            )))
        }
    }

    /// Populates or refreshes the bare cache.
    pub fn checkout(&self) -> Result<()> {
        self.ensure_allowed()?;
        if self.local {
            return Ok(());
        }

        if !self.path.exists() {
            self.ensure_remote()?;
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.ui.info(&format!("Fetching {}", self.uri));
            let target = self.path.to_string_lossy();
            run(
                "git",
                &[
                    "clone",
                    "--bare",
                    "--no-hardlinks",
                    "--quiet",
                    "--",
                    &self.uri,
                    &target,
                ],
                None,
                self.ui.as_ref(),
            )?;
            return Ok(());
        }

        if let Some(revision) = self.revision.get() {
            if self.has_revision(revision) {
                self.ui
                    .debug(&format!("{} already has {revision}", self.path.display()));
                return Ok(());
            }
        }

        self.ensure_remote()?;
        self.ui.info(&format!("Fetching {}", self.uri));
        self.git(
            &[
                "fetch",
                "--force",
                "--quiet",
                "--tags",
                "--",
                &self.uri,
                "refs/heads/*:refs/heads/*",
            ],
            &self.path,
        )?;
        Ok(())
    }

    /// True iff the cache already holds `revision` as a commit.
    #[must_use]
    pub fn has_revision(&self, revision: &str) -> bool {
        self.path.exists()
            && succeeds(
                "git",
                &["cat-file", "-e", &format!("{revision}^{{commit}}")],
                Some(&self.path),
                self.ui.as_ref(),
            )
    }

    /// Pinned revision, or `reference` resolved once against the cache.
    pub fn revision(&self) -> Result<String> {
        if let Some(revision) = self.revision.get() {
            return Ok(revision.clone());
        }

        self.ensure_allowed()?;
        if !self.path.exists() {
            return Err(LodeError::NetworkDisabled(format!(
                "The git source {}",
                self.uri
            )));
        }

        let resolved = self
            .git(
                &[
                    "rev-parse",
                    "--verify",
                    &format!("{}^{{commit}}", self.reference),
                ],
                &self.path,
            )
            .map_err(|e| {
                LodeError::Source(format!(
                    "Revision {} does not exist in the repository {}. Maybe you misspelled \
                     it?\n{e}",
                    self.reference, self.uri
                ))
            })?;
        let _ = self.revision.set(resolved);
        Ok(self.revision.get().cloned().unwrap_or_default())
    }

    /// Forgets a memoized revision so the next access re-resolves `reference`.
    pub fn unlock(&mut self) {
        self.revision = OnceLock::new();
    }

    /// Creates or updates a working copy at `destination` pinned to
    /// [`Self::revision`].
    pub fn copy_to(&self, destination: &Path, submodules: bool) -> Result<()> {
        self.ensure_allowed()?;
        let revision = self.revision()?;
        let source = self.path.to_string_lossy().to_string();

        if !destination.join(".git").exists() {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            let target = destination.to_string_lossy();
            run(
                "git",
                &["clone", "--no-checkout", "--quiet", "--", &source, &target],
                None,
                self.ui.as_ref(),
            )?;
        }

        self.git(
            &[
                "fetch",
                "--force",
                "--quiet",
                "--tags",
                "--",
                &source,
                "+refs/heads/*:refs/remotes/origin/*",
            ],
            destination,
        )?;
        self.git(&["reset", "--hard", "--quiet", &revision], destination)?;

        if submodules {
            self.git(
                &["submodule", "update", "--init", "--recursive", "--quiet"],
                destination,
            )?;
        }

        let head = self.git(&["rev-parse", "HEAD"], destination)?;
        if head != revision {
            return Err(LodeError::Source(format!(
                "Checkout of {} at {} ended on {head} instead of {revision}",
                self.uri,
                destination.display()
            )));
        }
        Ok(())
    }

    /// Points this proxy at a user working copy.
    ///
    /// `locked_revision` is the revision the lockfile currently pins. Returns
    /// whether the effective revision differs from it.
    pub fn local_override(&mut self, path: &Path, locked_revision: Option<&str>) -> Result<bool> {
        let display = path.display().to_string();
        let Some(branch) = self.branch.clone() else {
            return Err(LodeError::MissingBranch {
                name: self.name.clone(),
                path: display,
            });
        };

        if !path.exists() {
            return Err(LodeError::Source(format!(
                "Cannot use local override for {} because {display} does not exist",
                self.name
            )));
        }

        let current_branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"], path)?;
        if current_branch != branch {
            return Err(LodeError::BranchMismatch {
                name: self.name.clone(),
                expected: branch,
                actual: current_branch,
                path: display,
            });
        }

        let current = self.git(&["rev-parse", "--verify", "HEAD"], path)?;

        if let Some(locked) = locked_revision {
            if locked != current && !self.contains_ancestor(path, locked, &current) {
                return Err(LodeError::OverrideDiverged {
                    name: self.name.clone(),
                    revision: locked.to_string(),
                    branch,
                    path: display,
                });
            }
        }

        let changed = locked_revision != Some(current.as_str());
        self.ui.debug(&format!(
            "Using local override for {} at {display} ({current})",
            self.name
        ));
        self.path = path.to_path_buf();
        self.revision = OnceLock::new();
        let _ = self.revision.set(current);
        self.local = true;
        Ok(changed)
    }

    fn contains_ancestor(&self, repo: &Path, ancestor: &str, head: &str) -> bool {
        let ui = self.ui.as_ref();
        succeeds(
            "git",
            &["cat-file", "-e", &format!("{ancestor}^{{commit}}")],
            Some(repo),
            ui,
        ) && succeeds(
            "git",
            &["merge-base", "--is-ancestor", ancestor, head],
            Some(repo),
            ui,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lode_logger::SilentUi;
    use std::process::Command;

    pub fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    pub fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args([
                "-c",
                "user.email=dev@example.com",
                "-c",
                "user.name=dev",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn commit(dir: &Path, file: &str, body: &str) -> String {
        fs::write(dir.join(file), body).unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", file]);
        git(dir, &["rev-parse", "HEAD"])
    }

    /// Repository on branch `main` with two commits.
    pub fn origin_repo(dir: &Path) -> (String, String) {
        fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--quiet"]);
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        let first = commit(dir, "a.txt", "one");
        let second = commit(dir, "b.txt", "two");
        (first, second)
    }

    fn proxy(cache: &Path, origin: &Path, revision: Option<String>) -> GitProxy {
        GitProxy::new(
            cache.to_path_buf(),
            origin.to_string_lossy(),
            "main",
            revision,
            Arc::new(SilentUi),
        )
        .with_branch(Some("main".to_string()))
        .with_name("demo")
        .with_permissions(Permissions::remote())
    }

    #[test]
    fn test_copy_to_pins_exact_revision() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let (first, _second) = origin_repo(&origin);

        let proxy = proxy(&tmp.path().join("cache"), &origin, Some(first.clone()));
        proxy.checkout().unwrap();

        let dest = tmp.path().join("install");
        proxy.copy_to(&dest, false).unwrap();
        assert_eq!(git(&dest, &["rev-parse", "HEAD"]), first);
        assert!(dest.join("a.txt").exists());
        assert!(!dest.join("b.txt").exists());
    }

    #[test]
    fn test_revision_resolves_reference_once() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let (_first, second) = origin_repo(&origin);

        let proxy = proxy(&tmp.path().join("cache"), &origin, None);
        assert!(proxy.pinned_revision().is_none());
        proxy.checkout().unwrap();
        assert_eq!(proxy.revision().unwrap(), second);

        // a new upstream commit does not move the memoized revision
        commit(&origin, "c.txt", "three");
        assert_eq!(proxy.revision().unwrap(), second);
    }

    #[test]
    fn test_cached_revision_skips_network() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let (first, _) = origin_repo(&origin);
        let cache = tmp.path().join("cache");
        proxy(&cache, &origin, None).checkout().unwrap();

        let offline = proxy(&cache, &origin, Some(first)).with_permissions(Permissions::cached());
        assert!(offline.checkout().is_ok());

        let missing = "0".repeat(40);
        assert!(!offline.has_revision(&missing));
        let needs_fetch =
            proxy(&cache, &origin, Some(missing)).with_permissions(Permissions::cached());
        let err = needs_fetch.checkout().unwrap_err();
        assert!(matches!(err, LodeError::NetworkDisabled(_)));
    }

    #[test]
    fn test_checkout_fetches_new_commits() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        origin_repo(&origin);
        let cache = tmp.path().join("cache");
        proxy(&cache, &origin, None).checkout().unwrap();

        let third = commit(&origin, "c.txt", "three");
        let pinned = proxy(&cache, &origin, Some(third.clone()));
        assert!(!pinned.has_revision(&third));
        pinned.checkout().unwrap();
        assert!(pinned.has_revision(&third));
    }

    #[test]
    fn test_disallowed_proxy_fails_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let proxy = GitProxy::new(
            tmp.path().join("cache"),
            "https://example.invalid/repo.git",
            "main",
            None,
            Arc::new(SilentUi),
        );
        let err = proxy.checkout().unwrap_err();
        assert!(err.to_string().contains("lode install"));
        assert!(proxy.revision().is_err());
        assert!(!tmp.path().join("cache").exists());
    }

    #[test]
    fn test_local_override_requires_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut proxy = proxy(&tmp.path().join("cache"), tmp.path(), None).with_branch(None);
        let err = proxy.local_override(tmp.path(), None).unwrap_err();
        assert!(matches!(err, LodeError::MissingBranch { .. }));
    }

    #[test]
    fn test_local_override_branch_mismatch() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        origin_repo(&local);
        git(&local, &["checkout", "--quiet", "-b", "feature"]);

        let mut proxy = proxy(&tmp.path().join("cache"), &local, None);
        let err = proxy.local_override(&local, None).unwrap_err();
        match err {
            LodeError::BranchMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "main");
                assert_eq!(actual, "feature");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_local_override_rejects_diverged_history() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        origin_repo(&local);
        git(&local, &["checkout", "--quiet", "-b", "side"]);
        let side = commit(&local, "side.txt", "side");
        git(&local, &["checkout", "--quiet", "main"]);

        let mut proxy = proxy(&tmp.path().join("cache"), &local, None);
        let err = proxy.local_override(&local, Some(&side)).unwrap_err();
        assert!(matches!(err, LodeError::OverrideDiverged { .. }));
        assert!(!proxy.is_local());
    }

    #[test]
    fn test_local_override_reports_revision_change() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        let (first, second) = origin_repo(&local);

        let mut proxy = proxy(&tmp.path().join("cache"), &local, Some(first.clone()));
        assert!(proxy.local_override(&local, Some(&first)).unwrap());
        assert_eq!(proxy.revision().unwrap(), second);
        assert_eq!(proxy.path, local);
        assert!(proxy.is_local());

        let mut unchanged = self::proxy(&tmp.path().join("cache"), &local, None);
        assert!(!unchanged.local_override(&local, Some(&second)).unwrap());

        // working copies come from the override, not the managed cache
        let dest = tmp.path().join("install");
        proxy.copy_to(&dest, false).unwrap();
        assert_eq!(git(&dest, &["rev-parse", "HEAD"]), second);
    }
}

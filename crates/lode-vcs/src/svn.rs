//! Subversion analog of [`crate::GitProxy`]: numeric revisions, no branches.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use lode_error::{LodeError, Result};
use lode_logger::Ui;

use crate::Permissions;
use crate::command::run;

pub struct SvnProxy {
    pub path: PathBuf,
    pub uri: String,
    revision: OnceLock<String>,
    permissions: Permissions,
    ui: Arc<dyn Ui>,
}

impl SvnProxy {
    pub fn new(
        path: PathBuf,
        uri: impl Into<String>,
        revision: Option<String>,
        ui: Arc<dyn Ui>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(revision) = revision {
            let _ = cell.set(revision);
        }
        Self {
            path,
            uri: uri.into(),
            revision: cell,
            permissions: Permissions::default(),
            ui,
        }
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
    pub fn pinned_revision(&self) -> Option<&str> {
        self.revision.get().map(String::as_str)
    }

    fn svn(&self, args: &[&str], dir: Option<&Path>) -> Result<String> {
        run("svn", args, dir, self.ui.as_ref())
    }

    fn ensure_allowed(&self) -> Result<()> {
        if self.allowed() {
            Ok(())
        } else {
            Err(LodeError::NetworkDisabled(format!("The svn source {}", self.uri)))
        }
    }

    fn ensure_remote(&self) -> Result<()> {
        if self.permissions.remote {
            Ok(())
        } else {
            Err(LodeError::NetworkDisabled(format!(
                "The svn source {}",
                self.uri
            )))
        }
    }

    fn working_copy_revision(&self, dir: &Path) -> Result<String> {
        self.svn(&["info", "--show-item", "revision"], Some(dir))
    }

    /// True iff the cached working copy sits at `revision`.
    #[must_use]
    pub fn has_revision(&self, revision: &str) -> bool {
        self.path.exists()
            && self
                .working_copy_revision(&self.path)
                .is_ok_and(|current| current == revision)
    }

    pub fn checkout(&self) -> Result<()> {
        self.ensure_allowed()?;

        if !self.path.exists() {
            self.ensure_remote()?;
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.ui.info(&format!("Fetching {}", self.uri));
            let target = self.path.to_string_lossy().to_string();
            let mut args = vec!["checkout", "--quiet"];
            if let Some(revision) = self.revision.get() {
                args.extend(["--revision", revision.as_str()]);
            }
            args.extend([self.uri.as_str(), target.as_str()]);
            self.svn(&args, None)?;
            return Ok(());
        }

        if let Some(revision) = self.revision.get() {
            if self.has_revision(revision) {
                return Ok(());
            }
        }

        self.ensure_remote()?;
        self.ui.info(&format!("Updating {}", self.uri));
        let mut args = vec!["update", "--quiet"];
        if let Some(revision) = self.revision.get() {
            args.extend(["--revision", revision.as_str()]);
        }
        self.svn(&args, Some(&self.path))?;
        Ok(())
    }

    pub fn revision(&self) -> Result<String> {
        if let Some(revision) = self.revision.get() {
            return Ok(revision.clone());
        }

        self.ensure_allowed()?;
        if !self.path.exists() {
            return Err(LodeError::NetworkDisabled(format!(
                "The svn source {}",
                self.uri
            )));
        }

        let resolved = self.working_copy_revision(&self.path)?;
        let _ = self.revision.set(resolved);
        Ok(self.revision.get().cloned().unwrap_or_default())
    }

    pub fn unlock(&mut self) {
        self.revision = OnceLock::new();
    }

    /// Copies the cached working copy to `destination` and moves it to the
    /// pinned revision.
    pub fn copy_to(&self, destination: &Path) -> Result<()> {
        self.ensure_allowed()?;
        let revision = self.revision()?;

        if !destination.join(".svn").exists() {
            fs::create_dir_all(destination)?;
            fs_extra::dir::copy(
                &self.path,
                destination,
                &fs_extra::dir::CopyOptions::new()
                    .overwrite(true)
                    .content_only(true),
            )
            .map_err(|e| LodeError::Io(std::io::Error::other(e)))?;
        }

        if self.working_copy_revision(destination)? != revision {
            self.svn(
                &["update", "--quiet", "--revision", &revision],
                Some(destination),
            )?;
        }

        let current = self.working_copy_revision(destination)?;
        if current != revision {
            return Err(LodeError::Source(format!(
                "Checkout of {} at {} ended on r{current} instead of r{revision}",
                self.uri,
                destination.display()
            )));
        }
        Ok(())
    }
}

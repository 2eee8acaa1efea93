use std::fmt;
use std::io;

use lode_constants::{BIN_NAME, NO_SPACE_MESSAGE};

#[derive(Debug)]
pub enum LodeError {
    /// A VCS or build subprocess exited unsuccessfully.
    Command {
        command: String,
        output: String,
    },
    NetworkDisabled(String),
    MissingBranch {
        name: String,
        path: String,
    },
    BranchMismatch {
        name: String,
        expected: String,
        actual: String,
        path: String,
    },
    OverrideDiverged {
        name: String,
        revision: String,
        branch: String,
        path: String,
    },
    Source(String),
    Install {
        name: String,
        version: String,
        origin: String,
        cause: Box<LodeError>,
    },
    Integrity(String),
    DiskSpace(String),
    Dependency(String),
    Manifest(String),
    Lockfile(String),
    Network(String),
    Io(io::Error),
}

impl LodeError {
    pub fn command(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            output: output.into(),
        }
    }

    /// True for the VCS and override failures grouped as source errors.
    #[must_use]
    pub const fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Command { .. }
                | Self::NetworkDisabled(_)
                | Self::MissingBranch { .. }
                | Self::BranchMismatch { .. }
                | Self::OverrideDiverged { .. }
                | Self::Source(_)
        )
    }

    #[must_use]
    pub fn is_disk_exhaustion(&self) -> bool {
        match self {
            Self::DiskSpace(_) => true,
            Self::Io(err) => is_no_space(err),
            Self::Command { output, .. } => output.contains(NO_SPACE_MESSAGE),
            Self::Install { cause, .. } => cause.is_disk_exhaustion(),
            _ => false,
        }
    }
}

fn is_no_space(err: &io::Error) -> bool {
    // ENOSPC on unix, ERROR_DISK_FULL on windows
    err.kind() == io::ErrorKind::StorageFull
        || matches!(err.raw_os_error(), Some(28) if cfg!(unix))
        || matches!(err.raw_os_error(), Some(112) if cfg!(windows))
}

impl fmt::Display for LodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command { command, output } => {
                if output.trim().is_empty() {
                    write!(f, "Command `{command}` failed")
                } else {
                    write!(f, "Command `{command}` failed:\n{}", output.trim_end())
                }
            }
            Self::NetworkDisabled(what) => {
                write!(
                    f,
                    "{what} is not yet checked out and network access is disabled. \
                     Run `{BIN_NAME} install` first."
                )
            }
            Self::MissingBranch { name, path } => {
                write!(
                    f,
                    "Cannot use local override for {name} at {path} because :branch is not \
                     specified for it"
                )
            }
            Self::BranchMismatch {
                name,
                expected,
                actual,
                path,
            } => {
                write!(
                    f,
                    "Local override for {name} at {path} is using branch {actual} but it \
                     should be using branch {expected}"
                )
            }
            Self::OverrideDiverged {
                name,
                revision,
                branch,
                path,
            } => {
                write!(
                    f,
                    "The lockfile pins {name} to revision {revision}, which does not exist in \
                     the local override at {path} on branch {branch}. Make sure the override \
                     is up to date, or unlock {name} to pick up its current revision"
                )
            }
            Self::Source(msg) => {
                write!(f, "Source error: {msg}")
            }
            Self::Install {
                name,
                version,
                origin,
                cause,
            } => {
                write!(
                    f,
                    "{cause}\n\nAn error occurred while installing {name} ({version}) from \
                     {origin}, and {BIN_NAME} cannot continue.\nMake sure that {name} \
                     ({version}) installs on its own from {origin} before installing again."
                )
            }
            Self::Integrity(msg) => {
                write!(f, "Integrity check failed: {msg}")
            }
            Self::DiskSpace(msg) => {
                write!(
                    f,
                    "There was not enough space left on the device to install: {msg}. \
                     Free up some space and try again."
                )
            }
            Self::Dependency(msg) => {
                write!(f, "Dependency error: {msg}")
            }
            Self::Manifest(msg) => {
                write!(f, "Manifest error: {msg}")
            }
            Self::Lockfile(msg) => {
                write!(f, "Lockfile error: {msg}")
            }
            Self::Network(msg) => {
                write!(f, "Network error: {msg}")
            }
            Self::Io(err) => {
                write!(f, "IO error: {err}")
            }
        }
    }
}

impl std::error::Error for LodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Install { cause, .. } => Some(cause.as_ref()),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for LodeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Manifest(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, LodeError>;

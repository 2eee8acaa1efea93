pub mod command;
pub mod git;
pub mod svn;

pub use git::GitProxy;
pub use svn::SvnProxy;

/// Network and cache gates a caller sets to enforce offline or frozen installs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions {
    pub remote: bool,
    pub cached: bool,
}

impl Permissions {
    #[must_use]
    pub const fn remote() -> Self {
        Self {
            remote: true,
            cached: true,
        }
    }

    #[must_use]
    pub const fn cached() -> Self {
        Self {
            remote: false,
            cached: true,
        }
    }

    #[must_use]
    pub const fn allowed(self) -> bool {
        self.remote || self.cached
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BIN_NAME: &str = "lode";
pub const USER_AGENT: &str = concat!("lode/", env!("CARGO_PKG_VERSION"));

pub const ROOT_DIR_NAME: &str = ".lode";
pub const PACKAGE_CACHE_DIR: &str = "vendor/cache";
pub const GIT_CACHE_DIR: &str = "cache/git";
pub const SVN_CACHE_DIR: &str = "cache/svn";
pub const REGISTRY_CACHE_DIR: &str = "cache/registry";
pub const VCS_INSTALL_DIR: &str = "gems";
pub const REGISTRY_INSTALL_DIR: &str = "packages";

pub const MANIFEST_EXTENSION: &str = "lodespec";
pub const DEFAULT_GLOB: &str = "{,*,*/*}.lodespec";
pub const REGISTRY_INDEX: &str = "index.json";
pub const REGISTRY_PACKAGES: &str = "packages";

/// Hex digits of the uri digest used in cache directory names.
pub const URI_HASH_LEN: usize = 16;
/// Characters of a revision kept in per-revision install directory names.
pub const SHORT_REVISION_LEN: usize = 12;

pub const LOCK_GIT: &str = "GIT";
pub const LOCK_PATH: &str = "PATH";
pub const LOCK_SVN: &str = "SVN";
pub const LOCK_REGISTRY: &str = "REGISTRY";
pub const LOCK_SECTIONS: &[&str] = &[LOCK_GIT, LOCK_PATH, LOCK_SVN, LOCK_REGISTRY];

pub const BUILD_FLAGS_ENV: &str = "LODE_BUILD_FLAGS";
pub const BUILD_FLAGS_ENV_PREFIX: &str = "LODE_BUILD_FLAGS_";
pub const LOCAL_OVERRIDE_ENV_PREFIX: &str = "LODE_LOCAL_";
pub const NO_SPACE_MESSAGE: &str = "No space left on device";

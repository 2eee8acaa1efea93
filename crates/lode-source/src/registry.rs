use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use lode_constants::{
    LOCK_REGISTRY, MANIFEST_EXTENSION, REGISTRY_CACHE_DIR, REGISTRY_INDEX, REGISTRY_INSTALL_DIR,
    REGISTRY_PACKAGES, USER_AGENT,
};
use lode_error::{LodeError, Result};
use lode_lock::LockStanza;
use lode_spec::{Manifest, PackageSpec, SpecIndex, discover_specs, write_manifest};
use lode_vcs::Permissions;
use sha2::{Digest, Sha256};

use crate::native::run_build;
use crate::paths::is_within;
use crate::{InstallOptions, PackageSource, SourceContext};

/// Packages published as tarballs on a package server.
pub struct RegistrySource {
    remote: String,
    client: OnceLock<reqwest::blocking::Client>,
    specs: OnceLock<SpecIndex>,
    installed: Mutex<HashSet<String>>,
    permissions: Permissions,
    context: SourceContext,
}

impl RegistrySource {
    pub fn new(remote: impl Into<String>, context: &SourceContext) -> Self {
        let remote: String = remote.into();
        Self {
            remote: remote.trim_end_matches('/').to_string(),
            client: OnceLock::new(),
            specs: OnceLock::new(),
            installed: Mutex::new(HashSet::new()),
            permissions: Permissions::default(),
            context: context.clone(),
        }
    }

    pub fn from_lock(stanza: &LockStanza, context: &SourceContext) -> Result<Self> {
        Ok(Self::new(stanza.require("remote")?, context))
    }

    #[must_use]
    pub fn remote_url(&self) -> &str {
        &self.remote
    }

    #[must_use]
    pub fn install_dir(&self, spec: &PackageSpec) -> PathBuf {
        self.context
            .root
            .join(REGISTRY_INSTALL_DIR)
            .join(spec.full_name())
    }

    fn client(&self) -> &reqwest::blocking::Client {
        self.client.get_or_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(45))
                .connect_timeout(Duration::from_secs(20))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| reqwest::blocking::Client::new())
        })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        self.context.ui.debug(&format!("GET {url}"));
        self.client()
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| {
                if e.is_timeout() {
                    LodeError::Network(format!("request timeout for {url}"))
                } else if e.is_connect() {
                    LodeError::Network(format!("connection failed for {url}: {e}"))
                } else {
                    LodeError::Network(format!("{url}: {e}"))
                }
            })
    }

    fn fetch_index(&self) -> Result<SpecIndex> {
        let url = format!("{}/{REGISTRY_INDEX}", self.remote);
        let manifests: Vec<Manifest> = self
            .get(&url)?
            .json()
            .map_err(|e| LodeError::Network(format!("invalid index at {url}: {e}")))?;
        Ok(manifests.into_iter().map(Manifest::into_spec).collect())
    }

    fn cached_specs(&self) -> Result<SpecIndex> {
        if !self.context.package_cache.is_dir() {
            return Ok(SpecIndex::new());
        }
        Ok(discover_specs(
            &self.context.package_cache,
            &format!("*.{MANIFEST_EXTENSION}"),
        )?)
    }

    fn tarball_name(spec: &PackageSpec) -> String {
        format!("{}.tgz", spec.full_name())
    }

    /// Local copies of the tarball, best first.
    fn local_tarballs(&self, spec: &PackageSpec) -> [PathBuf; 2] {
        let name = Self::tarball_name(spec);
        [
            self.context.package_cache.join(&name),
            self.context.root.join(REGISTRY_CACHE_DIR).join(&name),
        ]
    }

    fn fetch_tarball(&self, spec: &PackageSpec) -> Result<Vec<u8>> {
        if self.permissions.allowed() {
            if let Some(path) = self.local_tarballs(spec).into_iter().find(|p| p.is_file()) {
                self.context
                    .ui
                    .debug(&format!("Using cached tarball {}", path.display()));
                return Ok(fs::read(path)?);
            }
        }

        if !self.permissions.remote {
            return Err(LodeError::NetworkDisabled(format!("{spec} from {self}")));
        }

        let url = format!(
            "{}/{REGISTRY_PACKAGES}/{}-{}.tgz",
            self.remote,
            urlencoding::encode(&spec.name),
            urlencoding::encode(&spec.version)
        );
        self.context.ui.info(&format!("Fetching {spec}"));
        let bytes = self
            .get(&url)?
            .bytes()
            .map_err(|e| LodeError::Network(format!("failed to read {url}: {e}")))?;

        self.store_download(spec, &bytes)?;
        Ok(bytes.to_vec())
    }

    /// Keeps a downloaded tarball under the root, once it matches the spec's
    /// checksum.
    fn store_download(&self, spec: &PackageSpec, bytes: &[u8]) -> Result<()> {
        verify_checksum(spec, bytes)?;
        let persisted = self
            .context
            .root
            .join(REGISTRY_CACHE_DIR)
            .join(Self::tarball_name(spec));
        if let Some(parent) = persisted.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&persisted, bytes)?;
        Ok(())
    }

    fn unpack(tarball: &[u8], destination: &Path) -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let decoder = flate2::read::GzDecoder::new(tarball);
        tar::Archive::new(decoder).unpack(temp_dir.path())?;

        let entries = fs::read_dir(temp_dir.path())?.collect::<io::Result<Vec<_>>>()?;
        // tarballs usually wrap everything in a single top-level directory
        let extracted = match entries.as_slice() {
            [only] if only.path().is_dir() => only.path(),
            _ => temp_dir.path().to_path_buf(),
        };

        if destination.exists() {
            fs::remove_dir_all(destination)?;
        }
        fs::create_dir_all(destination)?;
        fs_extra::dir::copy(
            &extracted,
            destination,
            &fs_extra::dir::CopyOptions::new()
                .overwrite(true)
                .content_only(true),
        )
        .map_err(|e| LodeError::Io(io::Error::other(e)))?;
        Ok(())
    }
}

fn verify_checksum(spec: &PackageSpec, tarball: &[u8]) -> Result<()> {
    let Some(expected) = spec.checksum.as_deref() else {
        return Ok(());
    };
    let actual = format!("{:x}", Sha256::digest(tarball));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(LodeError::Integrity(format!(
            "{spec} has checksum {actual}, expected {expected}"
        )))
    }
}

fn manifest_file(spec: &PackageSpec) -> String {
    format!("{}.{MANIFEST_EXTENSION}", spec.full_name())
}

impl PackageSource for RegistrySource {
    fn specs(&self) -> Result<SpecIndex> {
        if let Some(index) = self.specs.get() {
            return Ok(index.clone());
        }
        if !self.permissions.allowed() {
            return Err(LodeError::NetworkDisabled(self.to_string()));
        }

        let mut index = self.cached_specs()?;
        if self.permissions.remote {
            index.merge(self.fetch_index()?);
        }
        Ok(self.specs.get_or_init(|| index).clone())
    }

    fn install(&self, spec: &PackageSpec, options: &InstallOptions<'_>) -> Result<()> {
        if self
            .installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&spec.full_name())
        {
            return Ok(());
        }

        let install_dir = self.install_dir(spec);
        let manifest_path = install_dir.join(manifest_file(spec));
        if manifest_path.is_file() {
            self.context.ui.info(&format!("Using {spec}"));
        } else {
            let tarball = self.fetch_tarball(spec)?;
            verify_checksum(spec, &tarball)?;
            self.context.ui.info(&format!("Installing {spec}"));
            Self::unpack(&tarball, &install_dir)?;
            // the manifest marks a finished install, so a failed build leaves none
            if let Err(err) =
                run_build(spec, &install_dir, options.build_flags, self.context.ui.as_ref())
            {
                if let Err(cleanup) = fs::remove_dir_all(&install_dir) {
                    self.context.ui.debug(&format!(
                        "Could not remove {}: {cleanup}",
                        install_dir.display()
                    ));
                }
                return Err(err);
            }
            write_manifest(&manifest_path, spec)?;
        }

        self.installed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.full_name());
        Ok(())
    }

    fn cache(&self, spec: &PackageSpec, cache_root: &Path) -> Result<()> {
        let Some(tarball) = self
            .local_tarballs(spec)
            .into_iter()
            .find(|p| p.is_file())
        else {
            return Err(LodeError::Source(format!(
                "no downloaded tarball for {spec} to cache"
            )));
        };
        if is_within(&tarball, cache_root) {
            return Ok(());
        }

        fs::create_dir_all(cache_root)?;
        fs::copy(&tarball, cache_root.join(Self::tarball_name(spec)))?;
        write_manifest(&cache_root.join(manifest_file(spec)), spec)?;
        Ok(())
    }

    fn to_lock(&self) -> Result<Option<LockStanza>> {
        Ok(Some(
            LockStanza::new(LOCK_REGISTRY).option("remote", self.remote.clone()),
        ))
    }

    fn spec_path(&self, spec: &PackageSpec) -> Result<PathBuf> {
        Ok(self.install_dir(spec))
    }

    fn permissions(&self) -> Permissions {
        self.permissions
    }

    fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }
}

impl PartialEq for RegistrySource {
    fn eq(&self, other: &Self) -> bool {
        self.remote == other.remote
    }
}

impl Eq for RegistrySource {}

impl Hash for RegistrySource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.remote.hash(state);
    }
}

impl fmt::Display for RegistrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.remote)
    }
}

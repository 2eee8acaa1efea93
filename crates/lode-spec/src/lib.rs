pub mod index;
pub mod manifest;
pub mod package_spec;

pub use index::SpecIndex;
pub use manifest::{Manifest, discover_specs, expand_braces, read_manifest, write_manifest};
pub use package_spec::{Dependency, DependencyKind, PackageSpec};

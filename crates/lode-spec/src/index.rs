use std::collections::BTreeMap;

use crate::package_spec::PackageSpec;

/// Specs available from one source, keyed by (name, version).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecIndex {
    specs: BTreeMap<(String, String), PackageSpec>,
}

impl SpecIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts of the same name and version replace earlier ones.
    pub fn insert(&mut self, spec: PackageSpec) {
        self.specs
            .insert((spec.name.clone(), spec.version.clone()), spec);
    }

    #[must_use]
    pub fn get(&self, name: &str, version: &str) -> Option<&PackageSpec> {
        self.specs.get(&(name.to_string(), version.to_string()))
    }

    pub fn search<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PackageSpec> + 'a {
        self.specs.values().filter(move |spec| spec.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageSpec> {
        self.specs.values()
    }

    pub fn merge(&mut self, other: Self) {
        self.specs.extend(other.specs);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FromIterator<PackageSpec> for SpecIndex {
    fn from_iter<T: IntoIterator<Item = PackageSpec>>(iter: T) -> Self {
        let mut index = Self::new();
        for spec in iter {
            index.insert(spec);
        }
        index
    }
}

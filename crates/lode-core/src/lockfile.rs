use std::sync::Arc;

use lode_error::Result;
use lode_lock::Lockfile;
use lode_source::{ResolvedSpec, Source, SourceContext};
use lode_spec::PackageSpec;

/// Lockfile for an installed set: one stanza per distinct source, in the
/// order sources first appear. Sources that are never locked are skipped.
pub fn lock_for(specs: &[ResolvedSpec]) -> Result<Lockfile> {
    let mut groups: Vec<(&Arc<Source>, Vec<&PackageSpec>)> = Vec::new();
    for resolved in specs {
        match groups
            .iter_mut()
            .find(|(source, _)| **source == resolved.source)
        {
            Some((_, members)) => members.push(&resolved.spec),
            None => groups.push((&resolved.source, vec![&resolved.spec])),
        }
    }

    let mut lockfile = Lockfile::default();
    for (source, members) in groups {
        if let Some(mut stanza) = source.adapter().to_lock()? {
            for spec in members {
                stanza.add_spec(&spec.name, &spec.version);
            }
            lockfile.stanzas.push(stanza);
        }
    }
    Ok(lockfile)
}

/// Rebuilds every source recorded in `lockfile` with the specs locked to it.
pub fn locked_sources(
    lockfile: &Lockfile,
    context: &SourceContext,
) -> Result<Vec<(Source, Vec<(String, String)>)>> {
    lockfile
        .stanzas
        .iter()
        .map(|stanza| Ok((Source::from_lock(stanza, context)?, stanza.specs.clone())))
        .collect()
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lode_error::{LodeError, Result};
use lode_logger::Ui;
use lode_source::ResolvedSpec;

use crate::installer::{SpecInstaller, classify};
use crate::pool::WorkerPool;

/// Per-spec bookkeeping, owned by the coordinating thread.
#[derive(Debug, Clone, Default)]
pub struct InstallationState {
    pub installed: bool,
    pub enqueued: bool,
    pub post_install_message: String,
}

impl InstallationState {
    #[must_use]
    pub fn has_post_install_message(&self) -> bool {
        !self.post_install_message.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct InstallSummary {
    /// `name-version` in completion order.
    pub installed: Vec<String>,
    /// `(name, message)` for every spec that left one.
    pub post_install_messages: Vec<(String, String)>,
}

struct Entry {
    resolved: ResolvedSpec,
    state: InstallationState,
}

impl Entry {
    fn is_ready(&self, pending: &HashSet<String>) -> bool {
        let spec = &self.resolved.spec;
        spec.runtime_dependencies()
            .all(|dep| dep.name == spec.name || !pending.contains(&dep.name))
    }
}

/// Drives a [`SpecInstaller`] over a resolved set, running every spec whose
/// runtime dependencies are installed in parallel.
pub struct ParallelInstaller {
    installer: Arc<dyn SpecInstaller>,
    ui: Arc<dyn Ui>,
}

type Outcome = Result<String>;

impl ParallelInstaller {
    pub fn new(installer: Arc<dyn SpecInstaller>, ui: Arc<dyn Ui>) -> Self {
        Self { installer, ui }
    }

    pub fn run(&self, specs: Vec<ResolvedSpec>, concurrency: usize) -> Result<InstallSummary> {
        let mut summary = InstallSummary::default();
        if specs.is_empty() {
            return Ok(summary);
        }

        let mut entries: Vec<Entry> = specs
            .into_iter()
            .map(|resolved| Entry {
                resolved,
                state: InstallationState::default(),
            })
            .collect();
        entries.sort_by(|a, b| {
            (&a.resolved.spec.name, &a.resolved.spec.version)
                .cmp(&(&b.resolved.spec.name, &b.resolved.spec.version))
        });

        let installer = Arc::clone(&self.installer);
        let mut pool = WorkerPool::new(concurrency.max(1), move |resolved: ResolvedSpec| {
            installer.install_from_spec(&resolved)
        })?;
        self.ui.debug(&format!(
            "Installing {} specs with {} workers",
            entries.len(),
            pool.size()
        ));

        let result = self.drive(&mut pool, &mut entries, &mut summary);
        pool.stop();
        result?;

        for entry in &entries {
            if entry.state.has_post_install_message() {
                let name = entry.resolved.spec.name.clone();
                self.ui.info(&format!(
                    "Post-install message from {name}:\n{}",
                    entry.state.post_install_message
                ));
                summary
                    .post_install_messages
                    .push((name, entry.state.post_install_message.clone()));
            }
        }
        Ok(summary)
    }

    fn drive(
        &self,
        pool: &mut WorkerPool<ResolvedSpec, Outcome>,
        entries: &mut [Entry],
        summary: &mut InstallSummary,
    ) -> Result<()> {
        let mut in_flight: HashMap<usize, usize> = HashMap::new();
        let mut remaining = entries.len();

        while remaining > 0 {
            let pending: HashSet<String> = entries
                .iter()
                .filter(|entry| !entry.state.installed)
                .map(|entry| entry.resolved.spec.name.clone())
                .collect();

            for (index, entry) in entries.iter_mut().enumerate() {
                if entry.state.enqueued || !entry.is_ready(&pending) {
                    continue;
                }
                let job = pool.enq(entry.resolved.clone())?;
                entry.state.enqueued = true;
                in_flight.insert(job, index);
                self.ui
                    .debug(&format!("Enqueued {}", entry.resolved.spec));
            }

            if in_flight.is_empty() {
                let mut stuck: Vec<String> = entries
                    .iter()
                    .filter(|entry| !entry.state.installed)
                    .map(|entry| entry.resolved.spec.to_string())
                    .collect();
                stuck.sort();
                return Err(LodeError::Dependency(format!(
                    "cannot install {}: their dependencies never become installed",
                    stuck.join(", ")
                )));
            }

            let (job, outcome) = pool.deq()?;
            let Some(entry) = in_flight
                .remove(&job)
                .and_then(|index| entries.get_mut(index))
            else {
                return Err(LodeError::Dependency(format!(
                    "completion for unknown job {job}"
                )));
            };

            match outcome {
                Ok(Ok(message)) => {
                    entry.state.installed = true;
                    entry.state.post_install_message = message;
                    summary.installed.push(entry.resolved.spec.full_name());
                    remaining -= 1;
                }
                Ok(Err(err)) => return Err(classify(&entry.resolved, err)),
                Err(panic) => {
                    return Err(classify(
                        &entry.resolved,
                        LodeError::Io(std::io::Error::other(panic)),
                    ));
                }
            }
        }
        Ok(())
    }
}

use std::fmt;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use lode_constants::LOCK_SECTIONS;
use lode_error::{LodeError, Result};

/// One per-origin block of the lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockStanza {
    pub kind: String,
    pub options: IndexMap<String, String>,
    pub specs: Vec<(String, String)>,
}

impl LockStanza {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn option(mut self, key: &str, value: impl Into<String>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            LodeError::Lockfile(format!("{} section is missing `{key}`", self.kind))
        })
    }

    pub fn add_spec(&mut self, name: impl Into<String>, version: impl Into<String>) {
        self.specs.push((name.into(), version.into()));
    }
}

impl fmt::Display for LockStanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        for (key, value) in &self.options {
            writeln!(f, "  {key}: {value}")?;
        }
        writeln!(f, "  specs:")?;
        let mut specs = self.specs.clone();
        specs.sort();
        for (name, version) in specs {
            writeln!(f, "    {name} ({version})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    pub stanzas: Vec<LockStanza>,
}

impl Lockfile {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut stanzas = Vec::new();
        let mut current: Option<LockStanza> = None;
        let mut in_specs = false;

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let indent = line.len() - line.trim_start().len();
            let body = line.trim();

            if indent == 0 {
                stanzas.extend(current.take());
                in_specs = false;
                if LOCK_SECTIONS.contains(&body) {
                    current = Some(LockStanza::new(body));
                }
                continue;
            }

            let Some(stanza) = current.as_mut() else {
                continue;
            };

            match indent {
                2 if body == "specs:" => in_specs = true,
                2 => {
                    let (key, value) = body.split_once(": ").ok_or_else(|| {
                        LodeError::Lockfile(format!(
                            "line {}: expected `key: value`, found `{body}`",
                            number + 1
                        ))
                    })?;
                    in_specs = false;
                    stanza.options.insert(key.to_string(), value.to_string());
                }
                4 if in_specs => {
                    let (name, version) = parse_spec_line(body).ok_or_else(|| {
                        LodeError::Lockfile(format!(
                            "line {}: expected `name (version)`, found `{body}`",
                            number + 1
                        ))
                    })?;
                    stanza.add_spec(name, version);
                }
                // dependency lines of a spec
                _ => {}
            }
        }

        stanzas.extend(current);
        Ok(Self { stanzas })
    }

    #[must_use]
    pub fn find(&self, kind: &str, remote: &str) -> Option<&LockStanza> {
        self.stanzas
            .iter()
            .find(|s| s.kind == kind && s.get("remote") == Some(remote))
    }

    /// Stanza that lists `name` among its specs.
    #[must_use]
    pub fn stanza_for(&self, name: &str) -> Option<&LockStanza> {
        self.stanzas
            .iter()
            .find(|s| s.specs.iter().any(|(spec, _)| spec == name))
    }
}

impl fmt::Display for Lockfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stanza) in self.stanzas.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{stanza}")?;
        }
        Ok(())
    }
}

fn parse_spec_line(body: &str) -> Option<(&str, &str)> {
    let (name, rest) = body.split_once(" (")?;
    let version = rest.strip_suffix(')')?;
    Some((name, version))
}

//! Explicit record of cache generations and which of them are current.
//!
//! Whether a generation survives activation is decided from this record,
//! not from comparing generation names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Static,
    Dynamic,
}

impl GenerationKind {
    pub fn label(&self) -> &'static str {
        match self {
            GenerationKind::Static => "static",
            GenerationKind::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub name: String,
    pub kind: GenerationKind,
    pub version: String,
    pub current: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationManifest {
    #[serde(default)]
    pub generations: Vec<GenerationRecord>,
}

impl GenerationManifest {
    /// Record a generation for `version`. Registering an existing name is a
    /// no-op, so a reinstall of the same version keeps its creation time.
    pub fn register(&mut self, name: &str, kind: GenerationKind, version: &str) {
        if self.get(name).is_some() {
            return;
        }
        self.generations.push(GenerationRecord {
            name: name.to_string(),
            kind,
            version: version.to_string(),
            current: false,
            created_at: Utc::now(),
        });
    }

    /// Mark the generations of `version` current and every other one not.
    /// Returns the names that became current.
    pub fn promote(&mut self, version: &str) -> Vec<String> {
        let mut promoted = Vec::new();
        for record in &mut self.generations {
            record.current = record.version == version;
            if record.current {
                promoted.push(record.name.clone());
            }
        }
        promoted
    }

    pub fn get(&self, name: &str) -> Option<&GenerationRecord> {
        self.generations.iter().find(|r| r.name == name)
    }

    /// Unknown names are not current.
    pub fn is_current(&self, name: &str) -> bool {
        self.get(name).map(|r| r.current).unwrap_or(false)
    }

    pub fn current(&self, kind: GenerationKind) -> Option<&GenerationRecord> {
        self.generations
            .iter()
            .find(|r| r.current && r.kind == kind)
    }

    pub fn forget(&mut self, name: &str) {
        self.generations.retain(|r| r.name != name);
    }

    /// Names that may be deleted at activation: prefix-matching and not current.
    pub fn stale<'a>(&self, prefix: &str, names: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| name.starts_with(prefix) && !self.is_current(name))
            .cloned()
            .collect()
    }
}

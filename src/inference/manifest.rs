use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Index to label mapping of the model's output vector. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassManifest {
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct Postprocessing {
    class_names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Bare(Vec<String>),
    Flat { class_names: Vec<String> },
    Nested { postprocessing: Postprocessing },
}

impl ClassManifest {
    pub fn new(labels: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!labels.is_empty(), "class manifest is empty");
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            anyhow::ensure!(!label.trim().is_empty(), "class manifest has a blank label");
            anyhow::ensure!(seen.insert(label.as_str()), "duplicate class label `{}`", label);
        }
        Ok(Self { labels })
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: ManifestFile = serde_json::from_str(raw)
            .context("manifest must be a list, {class_names} or {postprocessing:{class_names}}")?;
        let labels = match file {
            ManifestFile::Bare(labels) => labels,
            ManifestFile::Flat { class_names } => class_names,
            ManifestFile::Nested { postprocessing } => postprocessing.class_names,
        };
        Self::new(labels)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read class manifest {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parse class manifest {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false for a manifest built through `new`.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }
}

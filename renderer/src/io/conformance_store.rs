//! Conformance test registry persisted as `conformance_tests.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::ConformanceRegistry;

pub const REGISTRY_FILE_NAME: &str = "conformance_tests.json";

#[derive(Debug, Clone)]
pub struct ConformanceStore {
    folder: PathBuf,
}

impl ConformanceStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path(&self) -> PathBuf {
        self.folder.join(REGISTRY_FILE_NAME)
    }

    /// Absolute folder of one registry entry.
    pub fn tests_folder(&self, folder_name: &str) -> PathBuf {
        self.folder.join(folder_name)
    }

    /// Read the registry; a missing file is an empty registry.
    pub fn load(&self) -> Result<ConformanceRegistry> {
        let path = self.path();
        if !path.exists() {
            debug!(path = %path.display(), "no conformance registry yet");
            return Ok(ConformanceRegistry::new());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read conformance registry {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse conformance registry {}", path.display()))
    }

    /// Atomically write the registry (temp file + rename).
    pub fn save(&self, registry: &ConformanceRegistry) -> Result<()> {
        let path = self.path();
        debug!(path = %path.display(), entries = registry.len(), "writing conformance registry");
        let mut buf =
            serde_json::to_string_pretty(registry).context("serialize conformance registry")?;
        buf.push('\n');
        fs::create_dir_all(&self.folder)
            .with_context(|| format!("create directory {}", self.folder.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp registry {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace registry {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ConformanceTestEntry;

    #[test]
    fn missing_file_is_empty_registry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ConformanceStore::new(temp.path().join("conformance"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn save_writes_pretty_json_with_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = ConformanceStore::new(temp.path());
        let mut registry = ConformanceRegistry::new();
        registry.insert(
            "1".parse().expect("frid"),
            ConformanceTestEntry {
                folder_name: "print_hello".to_string(),
                functional_requirement: "Print hello.".to_string(),
                acceptance_tests: Some(vec!["prints once".to_string()]),
                test_summary: None,
            },
        );
        store.save(&registry).expect("save");

        let text = fs::read_to_string(store.path()).expect("read");
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\n  \"1\": {"));
        assert_eq!(store.load().expect("load"), registry);
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}

//! Specification outline loaded from JSON.
//!
//! The outline lists the module's shared sections and a nested tree of
//! functional requirements. FRIDs are assigned depth-first: the second child of
//! the second top-level requirement is `2.2`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::frid::Frid;
use crate::core::types::Specifications;

/// Source of per-FRID specification slices and document order.
pub trait SpecificationProvider {
    fn module_name(&self) -> &str;
    fn first_frid(&self) -> Option<Frid>;
    fn next_frid(&self, frid: &Frid) -> Option<Frid>;
    fn previous_frid(&self, frid: &Frid) -> Option<Frid>;
    fn contains(&self, frid: &Frid) -> bool;
    fn specifications(&self, frid: &Frid) -> Result<Specifications>;
    /// Resource name to content for the resources linked from `frid`.
    fn linked_resources(&self, frid: &Frid) -> Result<BTreeMap<String, String>>;
}

#[derive(Debug, Deserialize)]
struct Outline {
    module_name: String,
    #[serde(default)]
    definitions: Vec<String>,
    #[serde(default)]
    non_functional_requirements: Vec<String>,
    #[serde(default)]
    test_requirements: Vec<String>,
    #[serde(default)]
    functional_requirements: Vec<RequirementNode>,
}

#[derive(Debug, Deserialize)]
struct RequirementNode {
    text: String,
    #[serde(default)]
    acceptance_tests: Vec<String>,
    #[serde(default)]
    linked_resources: Vec<String>,
    #[serde(default)]
    children: Vec<RequirementNode>,
}

#[derive(Debug, Clone)]
struct Requirement {
    frid: Frid,
    text: String,
    acceptance_tests: Vec<String>,
    linked_resources: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SpecTree {
    module_name: String,
    base_dir: PathBuf,
    definitions: Vec<String>,
    non_functional_requirements: Vec<String>,
    test_requirements: Vec<String>,
    /// Depth-first document order.
    requirements: Vec<Requirement>,
}

impl SpecTree {
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read specification {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let tree = Self::parse(&contents, base_dir)
            .with_context(|| format!("parse specification {}", path.display()))?;
        debug!(
            module = %tree.module_name,
            requirements = tree.requirements.len(),
            "specification loaded"
        );
        Ok(tree)
    }

    pub fn parse(json: &str, base_dir: PathBuf) -> Result<Self> {
        let outline: Outline = serde_json::from_str(json)?;
        if outline.module_name.trim().is_empty() {
            return Err(anyhow!("module_name must not be empty"));
        }
        let mut requirements = Vec::new();
        flatten(&outline.functional_requirements, &[], &mut requirements)?;
        Ok(Self {
            module_name: outline.module_name,
            base_dir,
            definitions: outline.definitions,
            non_functional_requirements: outline.non_functional_requirements,
            test_requirements: outline.test_requirements,
            requirements,
        })
    }

    pub fn frids(&self) -> impl Iterator<Item = &Frid> {
        self.requirements.iter().map(|r| &r.frid)
    }

    fn position(&self, frid: &Frid) -> Option<usize> {
        self.requirements.iter().position(|r| &r.frid == frid)
    }

    fn require_position(&self, frid: &Frid) -> Result<usize> {
        self.position(frid)
            .ok_or_else(|| anyhow!("functional requirement {frid} does not exist"))
    }
}

fn flatten(nodes: &[RequirementNode], prefix: &[u32], out: &mut Vec<Requirement>) -> Result<()> {
    for (idx, node) in nodes.iter().enumerate() {
        let mut parts = prefix.to_vec();
        parts.push(u32::try_from(idx + 1).context("too many functional requirements")?);
        if node.text.trim().is_empty() {
            return Err(anyhow!(
                "functional requirement {} has no text",
                Frid::from_parts(parts.clone())?
            ));
        }
        out.push(Requirement {
            frid: Frid::from_parts(parts.clone())?,
            text: node.text.clone(),
            acceptance_tests: node.acceptance_tests.clone(),
            linked_resources: node.linked_resources.clone(),
        });
        flatten(&node.children, &parts, out)?;
    }
    Ok(())
}

impl SpecificationProvider for SpecTree {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    fn first_frid(&self) -> Option<Frid> {
        self.requirements.first().map(|r| r.frid.clone())
    }

    fn next_frid(&self, frid: &Frid) -> Option<Frid> {
        let idx = self.position(frid)?;
        self.requirements.get(idx + 1).map(|r| r.frid.clone())
    }

    fn previous_frid(&self, frid: &Frid) -> Option<Frid> {
        let idx = self.position(frid)?;
        idx.checked_sub(1)
            .and_then(|prev| self.requirements.get(prev))
            .map(|r| r.frid.clone())
    }

    fn contains(&self, frid: &Frid) -> bool {
        self.position(frid).is_some()
    }

    fn specifications(&self, frid: &Frid) -> Result<Specifications> {
        let idx = self.require_position(frid)?;
        let current = &self.requirements[idx];
        Ok(Specifications {
            definitions: self.definitions.clone(),
            non_functional_requirements: self.non_functional_requirements.clone(),
            test_requirements: self.test_requirements.clone(),
            functional_requirements: self.requirements[..=idx]
                .iter()
                .map(|r| r.text.clone())
                .collect(),
            acceptance_tests: (!current.acceptance_tests.is_empty())
                .then(|| current.acceptance_tests.clone()),
        })
    }

    fn linked_resources(&self, frid: &Frid) -> Result<BTreeMap<String, String>> {
        let idx = self.require_position(frid)?;
        let mut resources = BTreeMap::new();
        for name in &self.requirements[idx].linked_resources {
            let path = self.base_dir.join(name);
            let content = fs::read_to_string(&path)
                .with_context(|| format!("read linked resource {}", path.display()))?;
            resources.insert(name.clone(), content);
        }
        Ok(resources)
    }
}

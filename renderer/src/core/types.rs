//! Per-phase records owned by the render context.
//!
//! These types hold the mutable state of one functional requirement, one
//! unit-test sub-loop and one conformance-test sub-loop. They are plain data
//! and serialize into the snapshots published with every state update.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::frid::Frid;

/// File name to new content; `None` deletes the file.
pub type FileChanges = BTreeMap<String, Option<String>>;

/// Specification slice relevant to one functional requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specifications {
    #[serde(default)]
    pub definitions: Vec<String>,
    #[serde(default)]
    pub non_functional_requirements: Vec<String>,
    #[serde(default)]
    pub test_requirements: Vec<String>,
    /// Previously implemented requirements followed by the current one.
    #[serde(default)]
    pub functional_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_tests: Option<Vec<String>>,
}

impl Specifications {
    /// Text of the requirement this slice was built for.
    pub fn current_requirement(&self) -> &str {
        self.functional_requirements
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn acceptance_tests(&self) -> &[String] {
        self.acceptance_tests.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FridContext {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: BTreeMap<String, String>,
    pub render_attempts: u32,
    /// Build-folder-relative paths touched since this FRID started.
    pub changed_files: BTreeSet<String>,
    pub refactoring_iteration: u32,
}

impl FridContext {
    pub fn new(
        frid: Frid,
        specifications: Specifications,
        linked_resources: BTreeMap<String, String>,
    ) -> Self {
        Self {
            frid,
            specifications,
            linked_resources,
            render_attempts: 0,
            changed_files: BTreeSet::new(),
            refactoring_iteration: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestsRunningContext {
    pub fix_attempts: u32,
    pub changed_files: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceTestSummary {
    pub test: String,
    pub summary: String,
}

/// Registry entry describing the conformance tests of one FRID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceTestEntry {
    /// Sub-folder of the conformance tests folder.
    pub folder_name: String,
    pub functional_requirement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_tests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_summary: Option<Vec<ConformanceTestSummary>>,
}

pub type ConformanceRegistry = BTreeMap<Frid, ConformanceTestEntry>;

/// Last failing conformance run, kept to decide when memory is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceIssue {
    pub frid: Frid,
    pub issue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConformanceTestsRunningContext {
    pub current_testing_frid: Option<Frid>,
    pub current_testing_frid_specifications: Option<Specifications>,
    /// 0 is the conformance block itself, n is the n-th acceptance test.
    pub phase_index: usize,
    pub registry: ConformanceRegistry,
    pub fix_attempts: u32,
    pub render_attempts: u32,
    pub regenerating: bool,
    pub should_prepare_testing_environment: bool,
    pub implementation_plan: Option<String>,
    pub previous_issue: Option<ConformanceIssue>,
}

impl ConformanceTestsRunningContext {
    pub fn new(registry: ConformanceRegistry) -> Self {
        Self {
            registry,
            should_prepare_testing_environment: true,
            ..Self::default()
        }
    }

    pub fn current_entry(&self) -> Option<&ConformanceTestEntry> {
        self.current_testing_frid
            .as_ref()
            .and_then(|frid| self.registry.get(frid))
    }
}

/// Latest script log files, for observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptExecutionHistory {
    pub latest_unit_tests_log: Option<String>,
    pub latest_conformance_tests_log: Option<String>,
    pub latest_testing_environment_log: Option<String>,
    /// Set when the latest step produced a new log.
    pub updated: bool,
}

/// Fold the files touched by a sub-loop into the FRID's set.
///
/// Paths that still exist are added; paths that were deleted since are removed.
pub fn reconcile_changed_files(
    outer: &mut BTreeSet<String>,
    touched: &BTreeSet<String>,
    exists: impl Fn(&str) -> bool,
) {
    for path in touched {
        if exists(path) {
            outer.insert(path.clone());
        } else {
            outer.remove(path);
        }
    }
}

/// Shorten an issue to at most `max_chars` characters, keeping head and tail.
pub fn truncate_issue(issue: &str, max_chars: usize) -> String {
    let total = issue.chars().count();
    if total <= max_chars {
        return issue.to_string();
    }
    let dropped = total - max_chars;
    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let head: String = issue.chars().take(head_len).collect();
    let tail: String = issue.chars().skip(total - tail_len).collect();
    format!("{head}\n... [{dropped} characters truncated] ...\n{tail}")
}

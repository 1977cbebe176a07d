//! Generation service contract: one typed request/response pair per operation.
//!
//! File maps sent to the service are `name -> content`; file maps received are
//! [`FileChanges`], where `None` deletes the file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::error::ServiceError;
use crate::core::frid::Frid;
use crate::core::types::{ConformanceRegistry, ConformanceTestSummary, FileChanges, Specifications};

pub type FileContents = BTreeMap<String, String>;

/// Attached to every request so a replayed render issues identical calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestMeta {
    pub render_id: String,
    pub call_index: u64,
    pub unittest_batch_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionalRequirementRequest {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixUnitTestsRequest {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
    pub unit_tests_issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefactorRequest {
    pub frid: Frid,
    /// Files changed since the FRID started; only these are candidates.
    pub files_to_check: Vec<String>,
    pub existing_files: FileContents,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderNameRequest {
    pub frid: Frid,
    pub functional_requirement: String,
    pub existing_folder_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceTestsRequest {
    pub frid: Frid,
    pub testing_frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
    pub conformance_tests_folder_name: String,
    pub conformance_tests: ConformanceRegistry,
    pub acceptance_tests: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RenderedConformanceTests {
    pub files: FileChanges,
    #[serde(default)]
    pub implementation_plan: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceTestRequest {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
    pub conformance_tests_files: FileContents,
    pub acceptance_test: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixConformanceTestRequest {
    pub frid: Frid,
    pub testing_frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
    /// Implementation diff since the previous FRID's checkpoint.
    pub code_diff: BTreeMap<String, String>,
    pub conformance_tests_files: FileContents,
    pub acceptance_tests: Vec<String>,
    pub conformance_tests_issue: String,
    pub fix_attempt: u32,
    pub conformance_tests_folder_name: String,
    pub implementation_plan: Option<String>,
    pub memory_files: FileContents,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConformanceTestFix {
    /// True when only the test files were changed.
    pub conformance_tests_fixed: bool,
    pub files: FileChanges,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceMemoryRequest {
    pub frid: Frid,
    pub testing_frid: Frid,
    pub linked_resources: FileContents,
    pub existing_files: FileContents,
    pub memory_files: FileContents,
    pub conformance_tests_files: FileContents,
    pub acceptance_tests: Vec<String>,
    pub conformance_tests_issue: String,
    pub previous_conformance_tests_issue: String,
    pub conformance_tests_folder_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeRequest {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    pub conformance_tests_files: FileContents,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmbiguityRequest {
    pub frid: Frid,
    pub specifications: Specifications,
    pub linked_resources: FileContents,
    /// Implementation as of the previous FRID.
    pub previous_files: FileContents,
    pub implementation_code_diff: BTreeMap<String, String>,
    pub fixed_implementation_code_diff: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AmbiguityAnalysis {
    pub cause: String,
    pub guidance: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrStatusRequest {
    pub frid: Frid,
}

/// Remote code generation. Implementations retry transient failures themselves.
pub trait GenerationService {
    fn render_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FunctionalRequirementRequest,
    ) -> Result<FileChanges, ServiceError>;

    fn fix_unit_tests(
        &self,
        meta: &RequestMeta,
        request: &FixUnitTestsRequest,
    ) -> Result<FileChanges, ServiceError>;

    fn refactor(
        &self,
        meta: &RequestMeta,
        request: &RefactorRequest,
    ) -> Result<FileChanges, ServiceError>;

    fn generate_folder_name(
        &self,
        meta: &RequestMeta,
        request: &FolderNameRequest,
    ) -> Result<String, ServiceError>;

    fn render_conformance_tests(
        &self,
        meta: &RequestMeta,
        request: &ConformanceTestsRequest,
    ) -> Result<RenderedConformanceTests, ServiceError>;

    fn render_acceptance_test(
        &self,
        meta: &RequestMeta,
        request: &AcceptanceTestRequest,
    ) -> Result<FileChanges, ServiceError>;

    fn fix_conformance_test(
        &self,
        meta: &RequestMeta,
        request: &FixConformanceTestRequest,
    ) -> Result<ConformanceTestFix, ServiceError>;

    fn create_conformance_test_memory(
        &self,
        meta: &RequestMeta,
        request: &ConformanceMemoryRequest,
    ) -> Result<FileChanges, ServiceError>;

    fn summarize_conformance_tests(
        &self,
        meta: &RequestMeta,
        request: &SummarizeRequest,
    ) -> Result<Vec<ConformanceTestSummary>, ServiceError>;

    fn analyze_ambiguity(
        &self,
        meta: &RequestMeta,
        request: &AmbiguityRequest,
    ) -> Result<Option<AmbiguityAnalysis>, ServiceError>;

    fn finish_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FrStatusRequest,
    ) -> Result<(), ServiceError>;

    fn fail_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FrStatusRequest,
    ) -> Result<(), ServiceError>;
}

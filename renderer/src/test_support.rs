//! Test-only fixtures: temporary workspaces and scripted collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tempfile::TempDir;

use crate::context::{Collaborators, RenderContext};
use crate::core::error::ServiceError;
use crate::core::frid::FridRange;
use crate::core::types::{ConformanceTestSummary, FileChanges};
use crate::events::{EventSink, RenderEvent};
use crate::io::config::RenderConfig;
use crate::io::run_state::RunState;
use crate::io::scripts::{ScriptOutput, ScriptRequest, ScriptRunner};
use crate::io::service::{
    AcceptanceTestRequest, AmbiguityAnalysis, AmbiguityRequest, ConformanceMemoryRequest,
    ConformanceTestFix, ConformanceTestsRequest, FixConformanceTestRequest, FixUnitTestsRequest,
    FolderNameRequest, FrStatusRequest, FunctionalRequirementRequest, GenerationService,
    RefactorRequest, RenderedConformanceTests, RequestMeta, SummarizeRequest,
};
use crate::io::spec_tree::SpecTree;

/// Two requirements; the second carries two acceptance tests.
pub const CONFORMANCE_SPEC: &str = r#"{
  "module_name": "greeter",
  "definitions": ["A greeting is a line of text printed to stdout."],
  "functional_requirements": [
    {"text": "Print a greeting."},
    {
      "text": "Greet the user by name.",
      "acceptance_tests": ["Greets Alice", "Greets Bob"]
    }
  ]
}"#;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Temporary folder with a config pointing every render folder inside it.
pub struct TestWorkspace {
    dir: TempDir,
    config: RenderConfig,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let config = RenderConfig {
            build_folder: root.join("build"),
            conformance_tests_folder: root.join("conformance_tests"),
            logs_folder: root.join("logs"),
            ..RenderConfig::default()
        };
        Ok(Self { dir, config })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    pub fn with_unit_tests_script(mut self) -> Self {
        self.config.unittests_script = Some(self.dir.path().join("run_unittests.sh"));
        self
    }

    pub fn with_conformance_tests_script(mut self) -> Self {
        self.config.conformance_tests_script =
            Some(self.dir.path().join("run_conformance_tests.sh"));
        self
    }

    pub fn context(
        &self,
        spec: SpecTree,
        service: &ScriptedService,
        scripts: &ScriptedScriptRunner,
    ) -> RenderContext {
        self.context_with(spec, service, scripts, RunState::new(None), None)
    }

    pub fn context_with(
        &self,
        spec: SpecTree,
        service: &ScriptedService,
        scripts: &ScriptedScriptRunner,
        run_state: RunState,
        range: Option<FridRange>,
    ) -> RenderContext {
        RenderContext::new(
            self.config.clone(),
            collaborators(spec, service, scripts),
            run_state,
            range,
        )
    }
}

pub fn collaborators(
    spec: SpecTree,
    service: &ScriptedService,
    scripts: &ScriptedScriptRunner,
) -> Collaborators {
    Collaborators {
        spec: Box::new(spec),
        service: Box::new(service.clone()),
        scripts: Box::new(scripts.clone()),
    }
}

pub fn spec_tree(json: &str) -> Result<SpecTree> {
    SpecTree::parse(json, PathBuf::new())
}

/// Outline of top-level requirements without acceptance tests.
pub fn flat_spec(requirements: &[&str]) -> Result<SpecTree> {
    let functional_requirements: Vec<serde_json::Value> = requirements
        .iter()
        .map(|text| serde_json::json!({ "text": text }))
        .collect();
    let outline = serde_json::json!({
        "module_name": "hello_module",
        "definitions": [],
        "functional_requirements": functional_requirements,
    });
    spec_tree(&outline.to_string())
}

type Reply<T> = VecDeque<Result<T, ServiceError>>;

#[derive(Default)]
struct ServiceScript {
    render: Reply<FileChanges>,
    fix_unit_tests: Reply<FileChanges>,
    refactor: Reply<FileChanges>,
    folder_names: VecDeque<String>,
    conformance: Reply<RenderedConformanceTests>,
    acceptance: Reply<FileChanges>,
    conformance_fix: Reply<ConformanceTestFix>,
    summaries: VecDeque<Vec<ConformanceTestSummary>>,
    ambiguity: VecDeque<Option<AmbiguityAnalysis>>,
    status_failures: VecDeque<ServiceError>,

    calls: Vec<String>,
    metas: Vec<RequestMeta>,
    unit_test_issues: Vec<String>,
    refactor_requests: Vec<Vec<String>>,
    memory_requests: usize,
}

impl ServiceScript {
    fn record(&mut self, call: &str, meta: &RequestMeta) {
        self.calls.push(call.to_string());
        self.metas.push(meta.clone());
    }
}

/// Generation service answering from queued replies.
///
/// An empty queue answers with an empty change set, so a test only scripts
/// the calls it cares about.
#[derive(Clone, Default)]
pub struct ScriptedService {
    script: Arc<Mutex<ServiceScript>>,
}

impl ScriptedService {
    pub fn files(files: &[(&str, &str)]) -> FileChanges {
        files
            .iter()
            .map(|(name, content)| (name.to_string(), Some(content.to_string())))
            .collect()
    }

    pub fn push_render(&self, reply: Result<FileChanges, ServiceError>) {
        lock(&self.script).render.push_back(reply);
    }

    pub fn push_fix_unit_tests(&self, reply: Result<FileChanges, ServiceError>) {
        lock(&self.script).fix_unit_tests.push_back(reply);
    }

    pub fn push_refactor(&self, reply: Result<FileChanges, ServiceError>) {
        lock(&self.script).refactor.push_back(reply);
    }

    pub fn push_folder_name(&self, name: &str) {
        lock(&self.script).folder_names.push_back(name.to_string());
    }

    pub fn push_conformance(&self, reply: Result<RenderedConformanceTests, ServiceError>) {
        lock(&self.script).conformance.push_back(reply);
    }

    pub fn push_acceptance(&self, reply: Result<FileChanges, ServiceError>) {
        lock(&self.script).acceptance.push_back(reply);
    }

    pub fn push_conformance_fix(&self, reply: Result<ConformanceTestFix, ServiceError>) {
        lock(&self.script).conformance_fix.push_back(reply);
    }

    pub fn push_summary(&self, summary: Vec<ConformanceTestSummary>) {
        lock(&self.script).summaries.push_back(summary);
    }

    pub fn push_ambiguity(&self, analysis: Option<AmbiguityAnalysis>) {
        lock(&self.script).ambiguity.push_back(analysis);
    }

    /// Fail the next finish/fail notification.
    pub fn fail_next_status(&self, err: ServiceError) {
        lock(&self.script).status_failures.push_back(err);
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }

    pub fn metas(&self) -> Vec<RequestMeta> {
        lock(&self.script).metas.clone()
    }

    pub fn unit_test_issues(&self) -> Vec<String> {
        lock(&self.script).unit_test_issues.clone()
    }

    /// `files_to_check` of every refactor request.
    pub fn refactor_requests(&self) -> Vec<Vec<String>> {
        lock(&self.script).refactor_requests.clone()
    }

    pub fn memory_requests(&self) -> usize {
        lock(&self.script).memory_requests
    }

    fn next_changes(
        &self,
        call: &str,
        meta: &RequestMeta,
        pick: impl FnOnce(&mut ServiceScript) -> &mut Reply<FileChanges>,
    ) -> Result<FileChanges, ServiceError> {
        let mut script = lock(&self.script);
        script.record(call, meta);
        pick(&mut *script)
            .pop_front()
            .unwrap_or_else(|| Ok(FileChanges::new()))
    }

    fn status(&self, call: &str, meta: &RequestMeta) -> Result<(), ServiceError> {
        let mut script = lock(&self.script);
        script.record(call, meta);
        match script.status_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl GenerationService for ScriptedService {
    fn render_functional_requirement(
        &self,
        meta: &RequestMeta,
        _request: &FunctionalRequirementRequest,
    ) -> Result<FileChanges, ServiceError> {
        self.next_changes("render_functional_requirement", meta, |s| &mut s.render)
    }

    fn fix_unit_tests(
        &self,
        meta: &RequestMeta,
        request: &FixUnitTestsRequest,
    ) -> Result<FileChanges, ServiceError> {
        lock(&self.script)
            .unit_test_issues
            .push(request.unit_tests_issue.clone());
        self.next_changes("fix_unit_tests", meta, |s| &mut s.fix_unit_tests)
    }

    fn refactor(
        &self,
        meta: &RequestMeta,
        request: &RefactorRequest,
    ) -> Result<FileChanges, ServiceError> {
        lock(&self.script)
            .refactor_requests
            .push(request.files_to_check.clone());
        self.next_changes("refactor", meta, |s| &mut s.refactor)
    }

    fn generate_folder_name(
        &self,
        meta: &RequestMeta,
        request: &FolderNameRequest,
    ) -> Result<String, ServiceError> {
        let mut script = lock(&self.script);
        script.record("generate_folder_name", meta);
        Ok(script
            .folder_names
            .pop_front()
            .unwrap_or_else(|| format!("frid_{}", request.frid.to_string().replace('.', "_"))))
    }

    fn render_conformance_tests(
        &self,
        meta: &RequestMeta,
        _request: &ConformanceTestsRequest,
    ) -> Result<RenderedConformanceTests, ServiceError> {
        let mut script = lock(&self.script);
        script.record("render_conformance_tests", meta);
        script.conformance.pop_front().unwrap_or_else(|| {
            Ok(RenderedConformanceTests {
                files: FileChanges::new(),
                implementation_plan: None,
            })
        })
    }

    fn render_acceptance_test(
        &self,
        meta: &RequestMeta,
        _request: &AcceptanceTestRequest,
    ) -> Result<FileChanges, ServiceError> {
        self.next_changes("render_acceptance_test", meta, |s| &mut s.acceptance)
    }

    fn fix_conformance_test(
        &self,
        meta: &RequestMeta,
        _request: &FixConformanceTestRequest,
    ) -> Result<ConformanceTestFix, ServiceError> {
        let mut script = lock(&self.script);
        script.record("fix_conformance_test", meta);
        script.conformance_fix.pop_front().unwrap_or_else(|| {
            Ok(ConformanceTestFix {
                conformance_tests_fixed: true,
                files: FileChanges::new(),
            })
        })
    }

    fn create_conformance_test_memory(
        &self,
        meta: &RequestMeta,
        _request: &ConformanceMemoryRequest,
    ) -> Result<FileChanges, ServiceError> {
        let mut script = lock(&self.script);
        script.record("create_conformance_test_memory", meta);
        script.memory_requests += 1;
        Ok(FileChanges::new())
    }

    fn summarize_conformance_tests(
        &self,
        meta: &RequestMeta,
        _request: &SummarizeRequest,
    ) -> Result<Vec<ConformanceTestSummary>, ServiceError> {
        let mut script = lock(&self.script);
        script.record("summarize_conformance_tests", meta);
        Ok(script.summaries.pop_front().unwrap_or_default())
    }

    fn analyze_ambiguity(
        &self,
        meta: &RequestMeta,
        _request: &AmbiguityRequest,
    ) -> Result<Option<AmbiguityAnalysis>, ServiceError> {
        let mut script = lock(&self.script);
        script.record("analyze_ambiguity", meta);
        Ok(script.ambiguity.pop_front().flatten())
    }

    fn finish_functional_requirement(
        &self,
        meta: &RequestMeta,
        _request: &FrStatusRequest,
    ) -> Result<(), ServiceError> {
        self.status("finish_functional_requirement", meta)
    }

    fn fail_functional_requirement(
        &self,
        meta: &RequestMeta,
        _request: &FrStatusRequest,
    ) -> Result<(), ServiceError> {
        self.status("fail_functional_requirement", meta)
    }
}

#[derive(Default)]
struct RunnerScript {
    outputs: HashMap<PathBuf, VecDeque<ScriptOutput>>,
    failing_args: Vec<(PathBuf, String, ScriptOutput)>,
    requests: Vec<ScriptRequest>,
}

/// Script runner answering from queued outputs per script path.
///
/// Scripts without queued output exit 0 with empty output.
#[derive(Clone, Default)]
pub struct ScriptedScriptRunner {
    script: Arc<Mutex<RunnerScript>>,
}

impl ScriptedScriptRunner {
    pub fn push(&self, script: &Path, exit_code: i32, output: &str) {
        self.push_times(script, exit_code, output, 1);
    }

    pub fn push_times(&self, script: &Path, exit_code: i32, output: &str, times: usize) {
        let mut runner = lock(&self.script);
        let queue = runner.outputs.entry(script.to_path_buf()).or_default();
        for _ in 0..times {
            queue.push_back(ScriptOutput {
                exit_code,
                output: output.to_string(),
                timed_out: false,
            });
        }
    }

    /// Fail every run of `script` whose last argument ends with `suffix`,
    /// ahead of any queued output.
    pub fn fail_when_last_arg_ends_with(
        &self,
        script: &Path,
        suffix: &str,
        exit_code: i32,
        output: &str,
    ) {
        lock(&self.script).failing_args.push((
            script.to_path_buf(),
            suffix.to_string(),
            ScriptOutput {
                exit_code,
                output: output.to_string(),
                timed_out: false,
            },
        ));
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        lock(&self.script).requests.clone()
    }

    pub fn runs_of(&self, script: &Path) -> usize {
        lock(&self.script)
            .requests
            .iter()
            .filter(|request| request.script == script)
            .count()
    }
}

impl ScriptRunner for ScriptedScriptRunner {
    fn run(&self, request: &ScriptRequest) -> Result<ScriptOutput> {
        let mut runner = lock(&self.script);
        runner.requests.push(request.clone());
        let last_arg = request.args.last().map(String::as_str).unwrap_or_default();
        let failing = runner.failing_args.iter().find(|(script, suffix, _)| {
            *script == request.script && last_arg.ends_with(suffix.as_str())
        });
        if let Some((_, _, output)) = failing {
            return Ok(output.clone());
        }
        let output = runner
            .outputs
            .get_mut(&request.script)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptOutput {
                exit_code: 0,
                output: String::new(),
                timed_out: false,
            });
        Ok(output)
    }
}

/// Event sink keeping every event in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RenderEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RenderEvent> {
        lock(&self.events).clone()
    }

    /// States of every `RenderStateUpdated` event, in order.
    pub fn states(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                RenderEvent::RenderStateUpdated { state, .. } => Some(state.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: RenderEvent) {
        lock(&self.events).push(event);
    }
}

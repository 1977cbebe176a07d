//! Session-wide render state and the entry/exit hooks of the state graph.
//!
//! One [`RenderContext`] lives for a whole render. It owns the collaborators,
//! the per-phase records and every retry counter. Hooks mutate counters and
//! answer with an override trigger when a budget runs out; they never drive
//! the machine themselves.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::error::{ErrorKind, RenderError};
use crate::core::frid::{Frid, FridRange};
use crate::core::graph::Hook;
use crate::core::machine::HookHost;
use crate::core::trigger::Trigger;
use crate::core::types::{
    ConformanceTestsRunningContext, FridContext, ScriptExecutionHistory, UnitTestsRunningContext,
    reconcile_changed_files,
};
use crate::events::RenderContextSnapshot;
use crate::io::config::RenderConfig;
use crate::io::conformance_store::ConformanceStore;
use crate::io::files;
use crate::io::git::{Checkpoint, CheckpointKind, Git};
use crate::io::run_state::RunState;
use crate::io::scripts::{ScriptOutput, ScriptRequest, ScriptRunner, write_script_log};
use crate::io::service::{FileContents, GenerationService, RequestMeta};
use crate::io::spec_tree::SpecificationProvider;

/// External systems the engine talks to.
pub struct Collaborators {
    pub spec: Box<dyn SpecificationProvider>,
    pub service: Box<dyn GenerationService>,
    pub scripts: Box<dyn ScriptRunner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    UnitTests,
    ConformanceTests,
    TestingEnvironment,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptKind::UnitTests => "unit_tests",
            ScriptKind::ConformanceTests => "conformance_tests",
            ScriptKind::TestingEnvironment => "testing_environment",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RenderContext {
    pub config: RenderConfig,
    pub spec: Box<dyn SpecificationProvider>,
    pub service: Box<dyn GenerationService>,
    pub scripts: Box<dyn ScriptRunner>,
    pub run_state: RunState,
    pub render_range: Option<FridRange>,
    pub build_repo: Git,
    pub conformance_repo: Git,
    pub conformance_store: ConformanceStore,
    /// Set when resuming; consumed by the first FRID cursor advance.
    pub starting_frid: Option<Frid>,

    pub frid_context: Option<FridContext>,
    pub unit_tests_context: Option<UnitTestsRunningContext>,
    pub conformance_context: Option<ConformanceTestsRunningContext>,
    pub script_history: ScriptExecutionHistory,
    /// Unit-test sub-loops exhausted after a conformance fix, for the current FRID.
    pub failed_unit_tests_during_conformance: u32,

    pending_error: Option<RenderError>,
    script_log_seq: u32,
}

impl RenderContext {
    pub fn new(
        config: RenderConfig,
        collaborators: Collaborators,
        run_state: RunState,
        render_range: Option<FridRange>,
    ) -> Self {
        let build_repo = Git::new(&config.build_folder);
        let conformance_repo = Git::new(&config.conformance_tests_folder);
        let conformance_store = ConformanceStore::new(&config.conformance_tests_folder);
        Self {
            config,
            spec: collaborators.spec,
            service: collaborators.service,
            scripts: collaborators.scripts,
            run_state,
            render_range,
            build_repo,
            conformance_repo,
            conformance_store,
            starting_frid: None,
            frid_context: None,
            unit_tests_context: None,
            conformance_context: None,
            script_history: ScriptExecutionHistory::default(),
            failed_unit_tests_during_conformance: 0,
            pending_error: None,
            script_log_seq: 0,
        }
    }

    pub fn snapshot(&self) -> RenderContextSnapshot {
        RenderContextSnapshot {
            module_name: self.spec.module_name().to_string(),
            frid_context: self.frid_context.clone(),
            unit_tests_context: self.unit_tests_context.clone(),
            conformance_context: self.conformance_context.clone(),
            script_history: self.script_history.clone(),
        }
    }

    pub fn frid(&self) -> Result<&FridContext> {
        self.frid_context
            .as_ref()
            .ok_or_else(|| anyhow!("no functional requirement is being implemented"))
    }

    pub fn frid_mut(&mut self) -> Result<&mut FridContext> {
        require(&mut self.frid_context, "functional requirement")
    }

    pub fn unit_tests_mut(&mut self) -> Result<&mut UnitTestsRunningContext> {
        require(&mut self.unit_tests_context, "unit tests")
    }

    pub fn conformance(&self) -> Result<&ConformanceTestsRunningContext> {
        self.conformance_context
            .as_ref()
            .ok_or_else(|| anyhow!("conformance testing is not in progress"))
    }

    pub fn conformance_mut(&mut self) -> Result<&mut ConformanceTestsRunningContext> {
        require(&mut self.conformance_context, "conformance tests")
    }

    pub fn next_request_meta(&mut self) -> RequestMeta {
        self.run_state.next_request_meta()
    }

    /// Store a fatal error for `ExitWithError` and ask for the failure transition.
    pub fn fail(&mut self, err: RenderError) -> Option<Trigger> {
        debug!(kind = ?err.kind, message = %err.message, "render failure recorded");
        self.pending_error = Some(err);
        Some(Trigger::HandleError)
    }

    pub fn set_pending_error(&mut self, err: RenderError) {
        self.pending_error = Some(err);
    }

    pub fn take_pending_error(&mut self) -> Option<RenderError> {
        self.pending_error.take()
    }

    pub fn is_unrecoverable(&self, exit_code: i32) -> bool {
        self.config.unrecoverable_exit_codes.contains(&exit_code)
    }

    pub fn checkpoint(&self, kind: CheckpointKind, summary: String, frid: Option<Frid>) -> Checkpoint {
        Checkpoint {
            kind,
            summary,
            frid,
            render_id: self.run_state.render_id().to_string(),
        }
    }

    /// Every text file of the build folder.
    pub fn build_files(&self) -> Result<FileContents> {
        files::read_all_text_files(&self.config.build_folder)
    }

    /// Files of the conformance tests currently under validation.
    pub fn current_conformance_test_files(&self) -> Result<FileContents> {
        let folder = self.current_conformance_tests_folder()?;
        files::read_all_text_files(&self.conformance_store.tests_folder(&folder))
    }

    /// Registry folder name of the FRID whose conformance tests are under validation.
    pub fn current_conformance_tests_folder(&self) -> Result<String> {
        let conformance = self.conformance()?;
        conformance
            .current_entry()
            .map(|entry| entry.folder_name.clone())
            .ok_or_else(|| {
                anyhow!(
                    "no conformance tests registered for functional requirement {}",
                    display_frid(conformance.current_testing_frid.as_ref())
                )
            })
    }

    /// Build checkpoint the given FRID started from: the previous FRID's
    /// finished checkpoint, else the base checkpoint.
    pub fn previous_checkpoint(&self, frid: &Frid) -> Result<Option<String>> {
        if let Some(previous) = self.spec.previous_frid(frid)
            && let Some(rev) = self
                .build_repo
                .find_checkpoint(Some(&previous), Some(CheckpointKind::Finished))?
        {
            return Ok(Some(rev));
        }
        self.build_repo.find_checkpoint(None, Some(CheckpointKind::Base))
    }

    /// Run a test or setup script and keep its log.
    pub fn run_script(
        &mut self,
        kind: ScriptKind,
        script: &Path,
        args: Vec<String>,
    ) -> Result<ScriptOutput> {
        let request = ScriptRequest {
            script: script.to_path_buf(),
            args,
            timeout: self.config.script_timeout(),
        };
        let output = self
            .scripts
            .run(&request)
            .with_context(|| format!("run {kind} script {}", script.display()))?;

        self.script_log_seq += 1;
        let dir = self.config.logs_folder.join(self.run_state.render_id());
        let name = format!("{:04}-{kind}", self.script_log_seq);
        let log = write_script_log(&dir, &name, &output)?.display().to_string();
        match kind {
            ScriptKind::UnitTests => self.script_history.latest_unit_tests_log = Some(log),
            ScriptKind::ConformanceTests => {
                self.script_history.latest_conformance_tests_log = Some(log);
            }
            ScriptKind::TestingEnvironment => {
                self.script_history.latest_testing_environment_log = Some(log);
            }
        }
        self.script_history.updated = true;
        Ok(output)
    }

    fn in_render_range(&self, frid: &Frid) -> bool {
        self.render_range
            .as_ref()
            .is_none_or(|range| range.contains_end(frid))
    }

    fn start_implementing_frid(&mut self) -> Result<Option<Trigger>> {
        let next = match (self.starting_frid.take(), &self.frid_context) {
            (Some(start), _) => Some(start),
            (None, None) => self.spec.first_frid(),
            (None, Some(current)) => self.spec.next_frid(&current.frid),
        };
        let frid = match next {
            Some(frid) if self.in_render_range(&frid) => frid,
            _ => {
                info!("all functional requirements rendered");
                return Ok(Some(Trigger::PrepareFinalOutput));
            }
        };

        let specifications = self.spec.specifications(&frid)?;
        let linked_resources = self.spec.linked_resources(&frid)?;
        info!(frid = %frid, "implementing functional requirement");
        self.frid_context = Some(FridContext::new(frid, specifications, linked_resources));
        Ok(None)
    }

    fn check_frid_iteration_limit(&mut self) -> Result<Option<Trigger>> {
        let max = self.config.limits.max_frid_render_attempts;
        let ctx = self.frid_mut()?;
        ctx.render_attempts += 1;
        let (frid, attempts) = (ctx.frid.clone(), ctx.render_attempts);

        if attempts > max {
            let message = format!(
                "Unittests could not be fixed after rendering the functional requirement {frid} for the {max} times."
            );
            return Ok(self.fail(RenderError::limit_exceeded(message).with_frid(frid)));
        }
        if attempts > 1 {
            info!(frid = %frid, attempt = attempts, "rendering the functional requirement from scratch");
        }
        Ok(None)
    }

    fn start_unit_tests(&mut self) {
        self.unit_tests_context = Some(UnitTestsRunningContext::default());
        self.run_state.start_unittest_batch();
    }

    /// Validation after an implementation change restarts at the first FRID.
    fn rewind_conformance_validation(&mut self) -> Result<()> {
        let first = self
            .spec
            .first_frid()
            .ok_or_else(|| anyhow!("specification has no functional requirements"))?;
        self.point_conformance_at(first)
    }

    fn finish_unit_tests(&mut self) -> Result<()> {
        let Some(unit) = self.unit_tests_context.take() else {
            return Ok(());
        };
        let build_folder = self.config.build_folder.clone();
        let ctx = self.frid_mut()?;
        reconcile_changed_files(&mut ctx.changed_files, &unit.changed_files, |path| {
            build_folder.join(path).is_file()
        });
        Ok(())
    }

    /// Count one more failed run; true once the fix budget is spent.
    fn unit_fix_budget_spent(&mut self) -> Result<bool> {
        let max = self.config.limits.max_unit_test_fix_attempts;
        let unit = self.unit_tests_mut()?;
        unit.fix_attempts += 1;
        Ok(unit.fix_attempts > max)
    }

    fn start_fixing_unit_tests(&mut self) -> Result<Option<Trigger>> {
        if !self.unit_fix_budget_spent()? {
            return Ok(None);
        }
        warn!(frid = %self.frid()?.frid, "unit tests could not be fixed");
        Ok(Some(Trigger::RestartFridProcessing))
    }

    fn start_fixing_unit_tests_in_refactoring(&mut self) -> Result<Option<Trigger>> {
        if !self.unit_fix_budget_spent()? {
            return Ok(None);
        }
        warn!("refactored code broke the unit tests; dropping this refactoring iteration");
        self.build_repo.revert_uncommitted()?;
        self.unit_tests_mut()?.changed_files.clear();
        let build_folder = self.config.build_folder.clone();
        self.frid_mut()?
            .changed_files
            .retain(|path| build_folder.join(path).is_file());
        Ok(Some(Trigger::StartNewRefactoringIteration))
    }

    fn start_fixing_unit_tests_in_conformance(&mut self) -> Result<Option<Trigger>> {
        if !self.unit_fix_budget_spent()? {
            return Ok(None);
        }
        let max = self.config.limits.max_failed_unit_tests_during_conformance;
        self.failed_unit_tests_during_conformance += 1;
        let frid = self.frid()?.frid.clone();

        if self.failed_unit_tests_during_conformance >= max {
            let message = format!(
                "Failed to adjust unit tests after implementation code was updated while fixing conformance tests for functional requirement {frid} for the {max} times."
            );
            return Ok(self.fail(RenderError::limit_exceeded(message).with_frid(frid)));
        }
        info!(
            frid = %frid,
            "unit tests broke while fixing conformance tests; rendering the functional requirement from scratch"
        );
        Ok(Some(Trigger::RestartFridProcessing))
    }

    fn start_refactoring_code(&mut self) -> Result<Option<Trigger>> {
        let max = self.config.limits.max_refactoring_iterations;
        let ctx = self.frid_mut()?;
        if ctx.refactoring_iteration == 0 {
            info!(frid = %ctx.frid, "refactoring the generated code");
        }
        ctx.refactoring_iteration += 1;
        if ctx.refactoring_iteration >= max {
            debug!(frid = %ctx.frid, max, "refactoring iteration limit reached");
            return Ok(Some(Trigger::ProceedFridProcessing));
        }
        Ok(None)
    }

    fn start_conformance_tests_processing(&mut self) -> Result<Option<Trigger>> {
        if !self.config.renders_conformance_tests() {
            debug!("no conformance tests script configured; skipping conformance tests");
            return Ok(Some(Trigger::ProceedFridProcessing));
        }
        info!("implementing conformance tests");
        let registry = self.conformance_store.load()?;
        self.conformance_context = Some(ConformanceTestsRunningContext::new(registry));
        Ok(None)
    }

    fn start_conformance_tests_for_frid(&mut self) -> Result<Option<Trigger>> {
        let implementing = self.frid()?.frid.clone();
        let acceptance_tests = self.frid()?.specifications.acceptance_tests().to_vec();
        let conformance = require(&mut self.conformance_context, "conformance tests")?;

        if conformance.regenerating {
            let testing = conformance
                .current_testing_frid
                .clone()
                .ok_or_else(|| anyhow!("no conformance tests to recreate"))?;
            info!(frid = %testing, "recreating conformance tests");
            if let Some(entry) = conformance.registry.remove(&testing) {
                files::delete_dir(&self.conformance_store.tests_folder(&entry.folder_name))?;
            }
            conformance.render_attempts += 1;
            conformance.fix_attempts = 0;
            conformance.regenerating = false;
            conformance.phase_index = 0;
            conformance.implementation_plan = None;
            return Ok(None);
        }

        if conformance.current_testing_frid.as_ref() == Some(&implementing) {
            if conformance.phase_index >= acceptance_tests.len() {
                return Ok(Some(Trigger::MarkAllConformanceTestsPassed));
            }
            if conformance.phase_index == 0 {
                conformance.implementation_plan = None;
            }
            conformance.phase_index += 1;
            let phase = conformance.phase_index;
            let entry = conformance.registry.get_mut(&implementing).ok_or_else(|| {
                anyhow!("no conformance tests registered for functional requirement {implementing}")
            })?;
            entry.acceptance_tests = Some(acceptance_tests[..phase].to_vec());
            debug!(frid = %implementing, phase, "next acceptance test");
            return Ok(None);
        }

        let next = match &conformance.current_testing_frid {
            None => self.spec.first_frid(),
            Some(current) => self.spec.next_frid(current),
        }
        .ok_or_else(|| anyhow!("no functional requirement left to validate conformance tests for"))?;
        self.point_conformance_at(next)?;

        if self.conformance()?.current_entry().is_some() {
            return Ok(Some(Trigger::MarkConformanceTestsReady));
        }
        Ok(None)
    }

    /// Make `frid` the FRID under validation. The implementing FRID resumes at
    /// the acceptance tests it already has; any other FRID starts at phase 0.
    fn point_conformance_at(&mut self, frid: Frid) -> Result<()> {
        let specifications = self.spec.specifications(&frid)?;
        let implementing = self.frid()?.frid.clone();
        let conformance = require(&mut self.conformance_context, "conformance tests")?;
        conformance.phase_index = if frid == implementing {
            conformance
                .registry
                .get(&frid)
                .and_then(|entry| entry.acceptance_tests.as_ref())
                .map_or(0, Vec::len)
        } else {
            0
        };
        debug!(frid = %frid, phase = conformance.phase_index, "validating conformance tests");
        conformance.current_testing_frid_specifications = Some(specifications);
        conformance.current_testing_frid = Some(frid);
        Ok(())
    }

    fn start_testing_environment_preparation(&mut self) -> Result<Option<Trigger>> {
        let requested = self.conformance()?.should_prepare_testing_environment;
        if self.config.prepare_environment_script.is_none() || !requested {
            return Ok(Some(Trigger::MarkTestingEnvironmentPrepared));
        }
        Ok(None)
    }

    fn start_fixing_conformance_tests(&mut self) -> Result<Option<Trigger>> {
        let limits = self.config.limits;
        let conformance = self.conformance_mut()?;
        conformance.fix_attempts += 1;
        if conformance.fix_attempts < limits.max_conformance_fix_attempts {
            return Ok(None);
        }
        if conformance.render_attempts < limits.max_conformance_regenerations {
            conformance.regenerating = true;
            return Ok(Some(Trigger::MarkRegenerationOfConformanceTests));
        }

        let frid = self.frid()?.frid.clone();
        let message = format!(
            "We've already tried to fix the issue by recreating the conformance tests but tests still fail. Please fix the issues manually. FRID: {frid}, Render ID: {}",
            self.run_state.render_id()
        );
        Ok(self.fail(RenderError::new(ErrorKind::LimitExceeded, message).with_frid(frid)))
    }
}

impl HookHost for RenderContext {
    fn run_hook(&mut self, hook: Hook) -> Result<Option<Trigger>> {
        match hook {
            Hook::StartImplementingFrid => self.start_implementing_frid(),
            Hook::FinishImplementingFrid => {
                self.failed_unit_tests_during_conformance = 0;
                Ok(None)
            }
            Hook::CheckFridIterationLimit => self.check_frid_iteration_limit(),
            Hook::StartUnitTestsProcessing => {
                self.start_unit_tests();
                Ok(None)
            }
            Hook::StartUnitTestsProcessingInConformance => {
                self.start_unit_tests();
                self.rewind_conformance_validation()?;
                Ok(None)
            }
            Hook::FinishUnitTestsProcessing => {
                self.finish_unit_tests()?;
                Ok(None)
            }
            Hook::StartFixingUnitTests => self.start_fixing_unit_tests(),
            Hook::StartFixingUnitTestsInRefactoring => self.start_fixing_unit_tests_in_refactoring(),
            Hook::StartFixingUnitTestsInConformance => self.start_fixing_unit_tests_in_conformance(),
            Hook::StartRefactoringCode => self.start_refactoring_code(),
            Hook::StartConformanceTestsProcessing => self.start_conformance_tests_processing(),
            Hook::FinishConformanceTestsProcessing => {
                self.conformance_context = None;
                Ok(None)
            }
            Hook::StartConformanceTestsForFrid => self.start_conformance_tests_for_frid(),
            Hook::StartTestingEnvironmentPreparation => self.start_testing_environment_preparation(),
            Hook::StartFixingConformanceTests => self.start_fixing_conformance_tests(),
            Hook::FinishFixingConformanceTests => {
                let attempt = self.conformance()?.fix_attempts + 1;
                debug!(attempt, "running conformance tests again");
                Ok(None)
            }
        }
    }
}

fn require<'a, T>(record: &'a mut Option<T>, what: &str) -> Result<&'a mut T> {
    record
        .as_mut()
        .ok_or_else(|| anyhow!("{what} context is not initialised"))
}

pub fn display_frid(frid: Option<&Frid>) -> String {
    frid.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

/// Path argument passed to scripts.
pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

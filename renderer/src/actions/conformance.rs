//! Actions of the conformance testing cycle.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use super::implementation::record_build_changes;
use super::{Action, ActionResult, Payload, conformance_tests_issue};
use crate::context::{RenderContext, ScriptKind, path_arg};
use crate::core::error::RenderError;
use crate::core::frid::Frid;
use crate::core::outcome::Outcome;
use crate::core::types::{
    ConformanceIssue, ConformanceTestEntry, Specifications, truncate_issue,
};
use crate::io::files;
use crate::io::service::{
    AcceptanceTestRequest, ConformanceMemoryRequest, ConformanceTestsRequest,
    FixConformanceTestRequest, FolderNameRequest,
};

/// Folder holding memory files recorded across fix cycles.
pub const MEMORY_FOLDER: &str = ".memory";

/// FRID under validation together with its specification slice.
fn testing_target(ctx: &RenderContext) -> Result<(Frid, Specifications)> {
    let conformance = ctx.conformance()?;
    let frid = conformance
        .current_testing_frid
        .clone()
        .ok_or_else(|| anyhow!("no functional requirement selected for conformance testing"))?;
    let specifications = conformance
        .current_testing_frid_specifications
        .clone()
        .ok_or_else(|| anyhow!("specifications of functional requirement {frid} not loaded"))?;
    Ok((frid, specifications))
}

fn memory_folder(ctx: &RenderContext) -> PathBuf {
    ctx.conformance_store.folder().join(MEMORY_FOLDER)
}

pub struct RenderConformanceTests;

impl RenderConformanceTests {
    fn register_folder(ctx: &mut RenderContext, frid: &Frid, specs: &Specifications) -> Result<String> {
        let conformance = ctx.conformance()?;
        if let Some(entry) = conformance.registry.get(frid) {
            return Ok(entry.folder_name.clone());
        }
        let mut existing: Vec<String> = conformance
            .registry
            .values()
            .map(|entry| entry.folder_name.clone())
            .collect();
        existing.extend(files::list_subfolders(ctx.conformance_store.folder())?);
        existing.sort();
        existing.dedup();

        let request = FolderNameRequest {
            frid: frid.clone(),
            functional_requirement: specs.current_requirement().to_string(),
            existing_folder_names: existing,
        };
        let meta = ctx.next_request_meta();
        let folder_name = ctx
            .service
            .generate_folder_name(&meta, &request)
            .with_context(|| format!("name conformance tests folder of {frid}"))?;
        debug!(frid = %frid, folder = %folder_name, "conformance tests folder named");

        ctx.conformance_mut()?.registry.insert(
            frid.clone(),
            ConformanceTestEntry {
                folder_name: folder_name.clone(),
                functional_requirement: specs.current_requirement().to_string(),
                acceptance_tests: None,
                test_summary: None,
            },
        );
        Ok(folder_name)
    }

    fn render_block(ctx: &mut RenderContext, frid: Frid, specs: Specifications) -> Result<()> {
        let folder_name = Self::register_folder(ctx, &frid, &specs)?;
        info!(frid = %frid, folder = %folder_name, "rendering conformance tests");
        let request = ConformanceTestsRequest {
            frid: ctx.frid()?.frid.clone(),
            testing_frid: frid.clone(),
            linked_resources: ctx.spec.linked_resources(&frid)?,
            existing_files: ctx.build_files()?,
            conformance_tests_folder_name: folder_name.clone(),
            conformance_tests: ctx.conformance()?.registry.clone(),
            acceptance_tests: Vec::new(),
            specifications: specs,
        };
        let meta = ctx.next_request_meta();
        let rendered = ctx
            .service
            .render_conformance_tests(&meta, &request)
            .with_context(|| format!("render conformance tests of {frid}"))?;

        let tests_folder = ctx.conformance_store.tests_folder(&folder_name);
        files::apply_file_changes(&tests_folder, &rendered.files)?;
        ctx.conformance_mut()?.implementation_plan = rendered.implementation_plan;
        Ok(())
    }

    fn render_acceptance_test(
        ctx: &mut RenderContext,
        frid: Frid,
        specs: Specifications,
        phase: usize,
    ) -> Result<()> {
        let acceptance_test = specs
            .acceptance_tests()
            .get(phase - 1)
            .cloned()
            .ok_or_else(|| anyhow!("functional requirement {frid} has no acceptance test {phase}"))?;
        info!(frid = %frid, acceptance_test = phase, "rendering acceptance test");
        let folder_name = ctx.current_conformance_tests_folder()?;
        let request = AcceptanceTestRequest {
            frid: frid.clone(),
            linked_resources: ctx.spec.linked_resources(&frid)?,
            existing_files: ctx.build_files()?,
            conformance_tests_files: ctx.current_conformance_test_files()?,
            acceptance_test,
            specifications: specs,
        };
        let meta = ctx.next_request_meta();
        let changes = ctx
            .service
            .render_acceptance_test(&meta, &request)
            .with_context(|| format!("render acceptance test {phase} of {frid}"))?;
        files::apply_file_changes(&ctx.conformance_store.tests_folder(&folder_name), &changes)?;
        Ok(())
    }
}

impl Action for RenderConformanceTests {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let (frid, specs) = testing_target(ctx)?;
        match ctx.conformance()?.phase_index {
            0 => Self::render_block(ctx, frid, specs)?,
            phase => Self::render_acceptance_test(ctx, frid, specs, phase)?,
        }
        Ok(ActionResult::new(Outcome::ConformanceTestRendered))
    }
}

pub struct PrepareTestingEnvironment;

impl Action for PrepareTestingEnvironment {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let Some(script) = ctx.config.prepare_environment_script.clone() else {
            return Ok(ActionResult::new(Outcome::TestingEnvironmentPrepared));
        };
        info!("preparing testing environment");
        let args = vec![path_arg(&ctx.config.build_folder)];
        let output = ctx.run_script(ScriptKind::TestingEnvironment, &script, args)?;
        if !output.success() {
            let err = RenderError::environment(format!(
                "Testing environment preparation script failed with exit code {}.",
                output.exit_code
            ))
            .with_exit_code(output.exit_code)
            .with_script(script.display().to_string());
            return Ok(ActionResult::failed(
                Outcome::TestingEnvironmentPreparationFailed,
                err,
            ));
        }
        ctx.conformance_mut()?.should_prepare_testing_environment = false;
        Ok(ActionResult::new(Outcome::TestingEnvironmentPrepared))
    }
}

pub struct RunConformanceTests;

impl RunConformanceTests {
    /// Ask the service to condense what the last fix attempt taught it.
    fn record_memory(ctx: &mut RenderContext, previous: &ConformanceIssue, issue: &str) -> Result<()> {
        let (testing, _) = testing_target(ctx)?;
        let folder_name = ctx.current_conformance_tests_folder()?;
        let memory = memory_folder(ctx);
        let max_issue = ctx.config.limits.max_issue_length;
        let acceptance_tests = ctx
            .conformance()?
            .current_entry()
            .and_then(|entry| entry.acceptance_tests.clone())
            .unwrap_or_default();
        let request = ConformanceMemoryRequest {
            frid: ctx.frid()?.frid.clone(),
            testing_frid: testing.clone(),
            linked_resources: ctx.spec.linked_resources(&testing)?,
            existing_files: ctx.build_files()?,
            memory_files: files::read_all_text_files(&memory)?,
            conformance_tests_files: ctx.current_conformance_test_files()?,
            acceptance_tests,
            conformance_tests_issue: truncate_issue(issue, max_issue),
            previous_conformance_tests_issue: truncate_issue(&previous.issue, max_issue),
            conformance_tests_folder_name: folder_name,
        };
        let meta = ctx.next_request_meta();
        let changes = ctx.service.create_conformance_test_memory(&meta, &request)?;
        let touched = files::apply_file_changes(&memory, &changes)?;
        debug!(files = touched.len(), "conformance test memory updated");
        Ok(())
    }

    fn remember(ctx: &mut RenderContext, previous: Option<&ConformanceIssue>, issue: &str) {
        let Some(previous) = previous else {
            return;
        };
        if let Err(err) = Self::record_memory(ctx, previous, issue) {
            warn!(error = %format!("{err:#}"), "could not record conformance test memory");
        }
    }
}

impl Action for RunConformanceTests {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let script = ctx
            .config
            .conformance_tests_script
            .clone()
            .ok_or_else(|| anyhow!("no conformance tests script configured"))?;
        let (testing, _) = testing_target(ctx)?;
        let folder_name = ctx.current_conformance_tests_folder()?;
        let args = vec![
            path_arg(&ctx.config.build_folder),
            path_arg(&ctx.conformance_store.tests_folder(&folder_name)),
        ];
        info!(frid = %testing, folder = %folder_name, "running conformance tests");
        let output = ctx.run_script(ScriptKind::ConformanceTests, &script, args)?;
        let previous = ctx.conformance()?.previous_issue.clone();

        if output.success() {
            info!(frid = %testing, "conformance tests passed");
            let fixed_here = previous.filter(|issue| issue.frid == testing);
            Self::remember(ctx, fixed_here.as_ref(), "");
            ctx.conformance_mut()?.previous_issue = None;
            return Ok(ActionResult::new(Outcome::ConformanceTestsPassed));
        }
        if ctx.is_unrecoverable(output.exit_code) {
            let err = RenderError::environment(
                "Conformance tests script failed due to problems in the environment setup. Please check your environment or update the script.",
            )
            .with_exit_code(output.exit_code)
            .with_script(script.display().to_string());
            return Ok(ActionResult::failed(
                Outcome::ConformanceTestsUnrecoverableError,
                err,
            ));
        }

        info!(frid = %testing, exit_code = output.exit_code, "conformance tests failed");
        Self::remember(ctx, previous.as_ref(), &output.output);
        ctx.conformance_mut()?.previous_issue = Some(ConformanceIssue {
            frid: testing,
            issue: output.output.clone(),
        });
        Ok(ActionResult::with_payload(
            Outcome::ConformanceTestsFailed,
            Payload::ConformanceTestsIssue(output.output),
        ))
    }
}

pub struct FixConformanceTest;

impl Action for FixConformanceTest {
    fn execute(&self, ctx: &mut RenderContext, payload: Option<Payload>) -> Result<ActionResult> {
        let issue = conformance_tests_issue(payload)?;
        let (testing, specs) = testing_target(ctx)?;
        let implementing = ctx.frid()?.frid.clone();
        let folder_name = ctx.current_conformance_tests_folder()?;

        let code_diff = match ctx.previous_checkpoint(&implementing)? {
            Some(rev) => ctx.build_repo.diff(&rev, None)?,
            None => Default::default(),
        };
        let conformance = ctx.conformance()?;
        let fix_attempt = conformance.fix_attempts;
        let acceptance_tests = conformance
            .current_entry()
            .and_then(|entry| entry.acceptance_tests.clone())
            .unwrap_or_default();
        let implementation_plan = conformance.implementation_plan.clone();
        let request = FixConformanceTestRequest {
            frid: implementing.clone(),
            testing_frid: testing.clone(),
            linked_resources: ctx.spec.linked_resources(&testing)?,
            existing_files: ctx.build_files()?,
            code_diff,
            conformance_tests_files: ctx.current_conformance_test_files()?,
            acceptance_tests,
            conformance_tests_issue: truncate_issue(&issue, ctx.config.limits.max_issue_length),
            fix_attempt,
            conformance_tests_folder_name: folder_name.clone(),
            implementation_plan,
            memory_files: files::read_all_text_files(&memory_folder(ctx))?,
            specifications: specs,
        };
        info!(frid = %testing, attempt = fix_attempt, "fixing conformance tests");

        let meta = ctx.next_request_meta();
        let fix = ctx
            .service
            .fix_conformance_test(&meta, &request)
            .with_context(|| format!("fix conformance tests of {testing}"))?;

        if fix.conformance_tests_fixed {
            files::apply_file_changes(&ctx.conformance_store.tests_folder(&folder_name), &fix.files)?;
            return Ok(ActionResult::new(Outcome::ImplementationCodeNotUpdated));
        }

        if fix.files.is_empty() {
            debug!(frid = %testing, "fix left both tests and implementation unchanged");
            return Ok(ActionResult::new(Outcome::ImplementationCodeNotUpdated));
        }
        info!(frid = %implementing, "implementation code changed to satisfy conformance tests");
        let touched = files::apply_file_changes(&ctx.config.build_folder, &fix.files)?;
        record_build_changes(ctx, &touched)?;
        ctx.conformance_mut()?.should_prepare_testing_environment = true;
        Ok(ActionResult::new(Outcome::ImplementationCodeUpdated))
    }
}

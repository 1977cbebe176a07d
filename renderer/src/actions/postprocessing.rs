//! Actions run once a functional requirement passed every conformance test.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use super::{Action, ActionResult, Payload};
use crate::context::RenderContext;
use crate::core::frid::Frid;
use crate::core::outcome::Outcome;
use crate::io::files;
use crate::io::git::CheckpointKind;
use crate::io::service::{AmbiguityRequest, FrStatusRequest, SummarizeRequest};

pub struct SummarizeConformanceTests;

impl Action for SummarizeConformanceTests {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid_ctx = ctx.frid()?;
        let frid = frid_ctx.frid.clone();
        let Some(entry) = ctx.conformance()?.registry.get(&frid) else {
            debug!(frid = %frid, "no conformance tests to summarize");
            return Ok(ActionResult::new(Outcome::ConformanceTestsSummarized));
        };
        let tests_folder = ctx.conformance_store.tests_folder(&entry.folder_name);
        let request = SummarizeRequest {
            frid: frid.clone(),
            specifications: frid_ctx.specifications.clone(),
            linked_resources: frid_ctx.linked_resources.clone(),
            conformance_tests_files: files::read_all_text_files(&tests_folder)?,
        };

        let meta = ctx.next_request_meta();
        let summary = ctx
            .service
            .summarize_conformance_tests(&meta, &request)
            .with_context(|| format!("summarize conformance tests of {frid}"))?;
        debug!(frid = %frid, tests = summary.len(), "conformance tests summarized");
        if let Some(entry) = ctx.conformance_mut()?.registry.get_mut(&frid) {
            entry.test_summary = Some(summary);
        }
        Ok(ActionResult::new(Outcome::ConformanceTestsSummarized))
    }
}

pub struct CommitConformanceTestsChanges;

impl Action for CommitConformanceTestsChanges {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid = ctx.frid()?.frid.clone();
        ctx.conformance_store.save(&ctx.conformance()?.registry)?;
        let tests = ctx.checkpoint(
            CheckpointKind::ConformanceTests,
            format!("Conformance tests for functional requirement {frid}"),
            Some(frid.clone()),
        );
        ctx.conformance_repo.commit_checkpoint(&tests)?;

        if !ctx.build_repo.is_dirty()? {
            return Ok(ActionResult::new(
                Outcome::ConformanceTestsCommittedImplementationNotUpdated,
            ));
        }
        let fixed = ctx.checkpoint(
            CheckpointKind::ConformanceFixed,
            format!("Fixed implementation of functional requirement {frid} to pass conformance tests"),
            Some(frid),
        );
        ctx.build_repo.commit_checkpoint(&fixed)?;
        Ok(ActionResult::new(
            Outcome::ConformanceTestsCommittedImplementationUpdated,
        ))
    }
}

pub struct AnalyzeSpecificationAmbiguity;

impl AnalyzeSpecificationAmbiguity {
    fn analyze(ctx: &mut RenderContext, frid: &Frid) -> Result<()> {
        let repo = &ctx.build_repo;
        let previous = ctx
            .previous_checkpoint(frid)?
            .ok_or_else(|| anyhow!("no checkpoint before functional requirement {frid}"))?;
        let implemented = match repo.find_checkpoint(Some(frid), Some(CheckpointKind::Refactored))? {
            Some(rev) => rev,
            None => repo
                .find_checkpoint(Some(frid), Some(CheckpointKind::Implemented))?
                .ok_or_else(|| anyhow!("functional requirement {frid} has no implementation checkpoint"))?,
        };
        let fixed = repo
            .find_checkpoint(Some(frid), Some(CheckpointKind::ConformanceFixed))?
            .ok_or_else(|| anyhow!("functional requirement {frid} has no conformance fix checkpoint"))?;

        let frid_ctx = ctx.frid()?;
        let request = AmbiguityRequest {
            frid: frid.clone(),
            specifications: frid_ctx.specifications.clone(),
            linked_resources: frid_ctx.linked_resources.clone(),
            previous_files: repo.files_at(&previous)?,
            implementation_code_diff: repo.diff(&previous, Some(&implemented))?,
            fixed_implementation_code_diff: repo.diff(&implemented, Some(&fixed))?,
        };
        let meta = ctx.next_request_meta();
        match ctx.service.analyze_ambiguity(&meta, &request)? {
            Some(analysis) => warn!(
                frid = %frid,
                cause = %analysis.cause,
                guidance = %analysis.guidance,
                "specification may be ambiguous"
            ),
            None => debug!(frid = %frid, "no specification ambiguity found"),
        }
        Ok(())
    }
}

impl Action for AnalyzeSpecificationAmbiguity {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid = ctx.frid()?.frid.clone();
        if let Err(err) = Self::analyze(ctx, &frid) {
            warn!(frid = %frid, error = %format!("{err:#}"), "ambiguity analysis skipped");
        }
        Ok(ActionResult::new(Outcome::ConformanceTestsPostanalyzed))
    }
}

pub struct FinishFunctionalRequirement;

impl Action for FinishFunctionalRequirement {
    fn execute(&self, ctx: &mut RenderContext, _payload: Option<Payload>) -> Result<ActionResult> {
        let frid = ctx.frid()?.frid.clone();
        let checkpoint = ctx.checkpoint(
            CheckpointKind::Finished,
            format!("Finished functional requirement {frid}"),
            Some(frid.clone()),
        );
        ctx.build_repo.commit_checkpoint(&checkpoint)?;

        let meta = ctx.next_request_meta();
        ctx.service
            .finish_functional_requirement(&meta, &FrStatusRequest { frid: frid.clone() })
            .with_context(|| format!("report functional requirement {frid} as finished"))?;
        info!(frid = %frid, "functional requirement fully implemented");
        Ok(ActionResult::new(Outcome::FunctionalRequirementFinished))
    }
}

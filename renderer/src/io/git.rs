//! Git adapter for the build and conformance-test repositories.
//!
//! Every phase boundary is a commit whose message carries trailer lines
//! identifying the checkpoint, so a later run can find "the last good
//! checkpoint for FRID X" with `rev-list --grep`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::frid::Frid;

const CHECKPOINT_TRAILER: &str = "Render-Checkpoint";
const FRID_TRAILER: &str = "Render-Frid";
const RENDER_ID_TRAILER: &str = "Render-Id";

const FALLBACK_USER_NAME: &str = "renderer";
const FALLBACK_USER_EMAIL: &str = "renderer@localhost";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Seeded base folder or cloned prerequisite.
    Base,
    Implemented,
    Refactored,
    ConformanceFixed,
    ConformanceTests,
    /// FRID fully implemented; resume point for the next FRID.
    Finished,
}

impl CheckpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointKind::Base => "base",
            CheckpointKind::Implemented => "implemented",
            CheckpointKind::Refactored => "refactored",
            CheckpointKind::ConformanceFixed => "conformance_fixed",
            CheckpointKind::ConformanceTests => "conformance_tests",
            CheckpointKind::Finished => "finished",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub kind: CheckpointKind,
    pub summary: String,
    pub frid: Option<Frid>,
    pub render_id: String,
}

impl Checkpoint {
    fn message(&self) -> String {
        let mut msg = format!("{}\n\n", self.summary.trim());
        msg.push_str(&format!("{CHECKPOINT_TRAILER}: {}\n", self.kind));
        if let Some(frid) = &self.frid {
            msg.push_str(&format!("{FRID_TRAILER}: {frid}\n"));
        }
        msg.push_str(&format!("{RENDER_ID_TRAILER}: {}\n", self.render_id));
        msg
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Create `workdir` if needed and initialize an empty repository in it.
    #[instrument(skip_all, fields(workdir = %workdir.as_ref().display()))]
    pub fn init_repo(workdir: impl AsRef<Path>) -> Result<Self> {
        let workdir = workdir.as_ref();
        fs::create_dir_all(workdir)
            .with_context(|| format!("create repository folder {}", workdir.display()))?;
        let git = Self::new(workdir);
        git.run_checked(&["init", "--quiet"])?;
        git.ensure_identity()?;
        info!("initialized repository");
        Ok(git)
    }

    /// Clone `src` into `dest`, which must not exist yet.
    #[instrument(skip_all, fields(src = %src.display(), dest = %dest.display()))]
    pub fn clone_into(src: &Path, dest: &Path) -> Result<Self> {
        let parent = dest
            .parent()
            .with_context(|| format!("clone target missing parent {}", dest.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let src_arg = src.to_string_lossy();
        let dest_arg = dest.to_string_lossy();
        Self::new(parent).run_checked(&["clone", "--quiet", &src_arg, &dest_arg])?;
        let git = Self::new(dest);
        git.ensure_identity()?;
        Ok(git)
    }

    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Stage everything and commit, even when nothing changed. Returns the new HEAD.
    #[instrument(skip_all, fields(kind = %checkpoint.kind, frid = ?checkpoint.frid))]
    pub fn commit_checkpoint(&self, checkpoint: &Checkpoint) -> Result<String> {
        self.run_checked(&["add", "-A"])?;
        let message = checkpoint.message();
        self.run_checked(&["commit", "--quiet", "--allow-empty", "-m", &message])?;
        let sha = self.head_sha()?;
        debug!(%sha, "checkpoint committed");
        Ok(sha)
    }

    /// Most recent commit reachable from HEAD matching the given trailers.
    pub fn find_checkpoint(
        &self,
        frid: Option<&Frid>,
        kind: Option<CheckpointKind>,
    ) -> Result<Option<String>> {
        let mut args = vec![
            "rev-list".to_string(),
            "HEAD".to_string(),
            "-n".to_string(),
            "1".to_string(),
            "-E".to_string(),
            "--all-match".to_string(),
        ];
        if let Some(frid) = frid {
            args.push(format!("--grep={}", trailer_pattern(FRID_TRAILER, &frid.to_string())));
        }
        if let Some(kind) = kind {
            args.push(format!("--grep={}", trailer_pattern(CHECKPOINT_TRAILER, kind.as_str())));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs)?;
        if !output.status.success() {
            // Empty repository: no HEAD yet.
            debug!("no commits to search");
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }

    /// Reset the worktree to `rev`, dropping untracked and ignored files.
    #[instrument(skip_all, fields(rev))]
    pub fn revert_to(&self, rev: &str) -> Result<()> {
        info!(rev, "reverting repository");
        self.run_checked(&["reset", "--quiet", "--hard", rev])?;
        self.run_checked(&["clean", "-xdfq"])?;
        Ok(())
    }

    /// Drop every change made since the last commit.
    pub fn revert_uncommitted(&self) -> Result<()> {
        if !self.is_dirty()? {
            return Ok(());
        }
        warn!(workdir = %self.workdir.display(), "discarding uncommitted changes");
        self.run_checked(&["reset", "--quiet", "--hard", "HEAD"])?;
        self.run_checked(&["clean", "-dfq"])?;
        Ok(())
    }

    /// Unified diff per changed file between `from` and `to` (the worktree when absent).
    pub fn diff(&self, from: &str, to: Option<&str>) -> Result<BTreeMap<String, String>> {
        if to.is_none() {
            // Untracked files only show up in a worktree diff once intended for add.
            self.run_checked(&["add", "--intent-to-add", "--all"])?;
        }
        let mut range = vec![from];
        if let Some(to) = to {
            range.push(to);
        }

        let mut names_args = vec!["diff", "--name-only"];
        names_args.extend(&range);
        let names = self.run_capture(&names_args)?;

        let mut diffs = BTreeMap::new();
        for name in names.lines().filter(|l| !l.trim().is_empty()) {
            let mut args = vec!["diff", "--no-color", "--no-ext-diff"];
            args.extend(&range);
            args.push("--");
            args.push(name);
            diffs.insert(name.to_string(), self.run_capture(&args)?);
        }
        Ok(diffs)
    }

    /// Text files and their contents as of `rev`.
    pub fn files_at(&self, rev: &str) -> Result<BTreeMap<String, String>> {
        let names = self.run_capture(&["ls-tree", "-r", "--name-only", rev])?;
        let mut files = BTreeMap::new();
        for name in names.lines().filter(|l| !l.trim().is_empty()) {
            let spec = format!("{rev}:{name}");
            let output = self.run_checked(&["show", &spec])?;
            match String::from_utf8(output.stdout) {
                Ok(text) => {
                    files.insert(name.to_string(), text);
                }
                Err(_) => debug!(file = name, "skipping non-text file"),
            }
        }
        Ok(files)
    }

    fn ensure_identity(&self) -> Result<()> {
        for (key, fallback) in [
            ("user.name", FALLBACK_USER_NAME),
            ("user.email", FALLBACK_USER_EMAIL),
        ] {
            let configured = self.run(&["config", key])?.status.success();
            if !configured {
                debug!(key, "setting local git identity");
                self.run_checked(&["config", key, fallback])?;
            }
        }
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn trailer_pattern(trailer: &str, value: &str) -> String {
    format!("^{trailer}: {}$", regex::escape(value))
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

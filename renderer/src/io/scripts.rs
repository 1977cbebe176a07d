//! Script runner adapter for caller-supplied test and setup scripts.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::io::process::run_captured;

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;
/// Exit code reported for a script that ran past its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub script: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub exit_code: i32,
    pub output: String,
    pub timed_out: bool,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait ScriptRunner {
    fn run(&self, request: &ScriptRequest) -> Result<ScriptOutput>;
}

/// Runs scripts as child processes.
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    pub output_limit_bytes: usize,
}

impl Default for ProcessScriptRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl ScriptRunner for ProcessScriptRunner {
    #[instrument(skip_all, fields(script = %request.script.display()))]
    fn run(&self, request: &ScriptRequest) -> Result<ScriptOutput> {
        let script = resolve_script_path(&request.script)?;
        let mut cmd = Command::new(&script);
        cmd.args(&request.args);
        let captured = run_captured(cmd, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("run script {}", script.display()))?;

        let mut output = captured.combined();
        let exit_code = if captured.timed_out {
            output.push_str(&format!(
                "\n[script timed out after {} seconds]\n",
                request.timeout.as_secs()
            ));
            TIMEOUT_EXIT_CODE
        } else {
            // Killed by a signal.
            captured.exit_code.unwrap_or(-1)
        };
        info!(exit_code, timed_out = captured.timed_out, "script finished");
        Ok(ScriptOutput {
            exit_code,
            output,
            timed_out: captured.timed_out,
        })
    }
}

/// Bare relative names (`run_tests.sh`) resolve against the working directory, not `PATH`.
pub fn resolve_script_path(script: &Path) -> Result<PathBuf> {
    if script.is_absolute() || script.components().count() > 1 {
        return Ok(script.to_path_buf());
    }
    let cwd = std::env::current_dir().context("resolve current directory")?;
    Ok(cwd.join(script))
}

/// Write one script run's output under `dir`, returning the log path.
pub fn write_script_log(dir: &Path, name: &str, output: &ScriptOutput) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create script log dir {}", dir.display()))?;
    let path = dir.join(format!("{name}.log"));
    let mut buf = format!("=== exit code: {} ===\n", output.exit_code);
    buf.push_str(&output.output);
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    fs::write(&path, buf).with_context(|| format!("write script log {}", path.display()))?;
    Ok(path)
}

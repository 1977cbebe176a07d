//! Render configuration loaded from `render.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "render.toml";

/// Render configuration (TOML).
///
/// Every field has a default so a missing file or a partial file is valid.
/// Command-line flags override values read from the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    /// Working folder holding the generated implementation.
    pub build_folder: PathBuf,
    /// Folder copied into a fresh build folder and committed as the base checkpoint.
    pub base_folder: Option<PathBuf>,
    /// Build output is copied here when the render completes.
    pub build_dest: Option<PathBuf>,
    /// Repository of an already rendered module to start from.
    pub prerequisite_build_folder: Option<PathBuf>,

    pub conformance_tests_folder: PathBuf,
    pub conformance_tests_dest: Option<PathBuf>,

    /// Script logs are written under `<logs_folder>/<render id>/`.
    pub logs_folder: PathBuf,

    pub unittests_script: Option<PathBuf>,
    pub conformance_tests_script: Option<PathBuf>,
    pub prepare_environment_script: Option<PathBuf>,

    pub script_timeout_secs: u64,
    pub script_output_limit_bytes: usize,
    /// Script exit codes meaning "the environment is broken"; never retried.
    pub unrecoverable_exit_codes: Vec<i32>,

    pub limits: RenderLimits,
    pub service: ServiceConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            build_folder: PathBuf::from("build"),
            base_folder: None,
            build_dest: None,
            prerequisite_build_folder: None,
            conformance_tests_folder: PathBuf::from("conformance_tests"),
            conformance_tests_dest: None,
            logs_folder: PathBuf::from(".render_logs"),
            unittests_script: None,
            conformance_tests_script: None,
            prepare_environment_script: None,
            script_timeout_secs: 120,
            script_output_limit_bytes: 1_000_000,
            unrecoverable_exit_codes: vec![69],
            limits: RenderLimits::default(),
            service: ServiceConfig::default(),
        }
    }
}

/// Retry budgets of the render loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderLimits {
    pub max_unit_test_fix_attempts: u32,
    pub max_frid_render_attempts: u32,
    pub max_conformance_regenerations: u32,
    pub max_refactoring_iterations: u32,
    pub max_conformance_fix_attempts: u32,
    /// Unit-test failures after a conformance fix tolerated per FRID.
    pub max_failed_unit_tests_during_conformance: u32,
    /// Longer issue texts are truncated before they are sent for fixing.
    pub max_issue_length: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_unit_test_fix_attempts: 20,
            max_frid_render_attempts: 2,
            max_conformance_regenerations: 1,
            max_refactoring_iterations: 5,
            max_conformance_fix_attempts: 20,
            max_failed_unit_tests_during_conformance: 2,
            max_issue_length: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: "https://api.codeplain.ai".to_string(),
            api_key: None,
            request_timeout_secs: 600,
            retry_attempts: 4,
            retry_base_delay_ms: 1_000,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.build_folder.as_os_str().is_empty() {
            return Err(anyhow!("build_folder must not be empty"));
        }
        if self.conformance_tests_folder.as_os_str().is_empty() {
            return Err(anyhow!("conformance_tests_folder must not be empty"));
        }
        if self.build_folder == self.conformance_tests_folder {
            return Err(anyhow!(
                "build_folder and conformance_tests_folder must differ"
            ));
        }
        if self.script_timeout_secs == 0 {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        if self.script_output_limit_bytes == 0 {
            return Err(anyhow!("script_output_limit_bytes must be > 0"));
        }
        if self.unrecoverable_exit_codes.contains(&0) {
            return Err(anyhow!("unrecoverable_exit_codes must not contain 0"));
        }
        if self.limits.max_frid_render_attempts == 0 {
            return Err(anyhow!("limits.max_frid_render_attempts must be > 0"));
        }
        if self.service.url.trim().is_empty() {
            return Err(anyhow!("service.url must not be empty"));
        }
        if self.service.retry_attempts == 0 {
            return Err(anyhow!("service.retry_attempts must be > 0"));
        }
        if self.prepare_environment_script.is_some() && self.conformance_tests_script.is_none() {
            return Err(anyhow!(
                "prepare_environment_script requires conformance_tests_script"
            ));
        }
        Ok(())
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn renders_conformance_tests(&self) -> bool {
        self.conformance_tests_script.is_some()
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RenderConfig::default()`. Validation runs
/// after command-line overrides are applied, not here.
pub fn load_config(path: &Path) -> Result<RenderConfig> {
    if !path.exists() {
        return Ok(RenderConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RenderConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

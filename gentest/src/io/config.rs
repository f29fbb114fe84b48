//! Experiment configuration stored in `gentest.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gentest.toml";

/// Experiment configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// match a Maven project with the conventional `src/main` / `src/test` layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Repository the experiment runs in (the build tool's working directory).
    pub project_root: PathBuf,

    /// Name used in run folder names. Empty means the project root's directory name.
    pub project_name: String,

    /// Branch holding the clean baseline every candidate starts from.
    pub baseline_branch: String,

    /// How per-candidate branches are (re)created.
    pub branch_policy: BranchPolicy,

    /// Number of full passes over all candidates.
    pub runs: u32,

    /// Directory receiving one timestamped folder per run. Must lie outside the project.
    pub runs_root: PathBuf,

    /// Mark run folders with `_smallset` (e.g. when running a subset list).
    pub small_set: bool,

    /// Newline-delimited unit paths. When unset, pair discovery is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_list: Option<PathBuf>,

    /// Commit message for each candidate branch.
    pub commit_message: String,

    /// Pause after a `timeout` or `empty` outcome, in seconds.
    pub cooldown_secs: u64,

    /// Default timeout for version-control and repair commands, in seconds.
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub layout: LayoutConfig,
    pub stabilize: StabilizeConfig,
    pub generator: GeneratorConfig,
    pub post_process: PostProcessConfig,
    pub import_repair: ImportRepairConfig,
    pub build: BuildConfig,
}

/// Branch (re)creation policy for candidate branches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BranchPolicy {
    /// `git branch -f <key>` at the baseline: a stale branch from a previous run is overwritten.
    ForceReuse,
    /// Delete any existing `<key>` branch, then `git checkout -b <key>`.
    Fresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Root of functional units, relative to the project root.
    pub source_dir: PathBuf,
    /// Root of test units, relative to the project root.
    pub test_dir: PathBuf,
    /// Unit file extension (without dot), matched case-insensitively.
    pub extension: String,
    /// Token used by the naming conventions (`FooTest`, `TestFoo`, `FooTests`).
    pub test_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StabilizeConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    /// Require a non-empty buffer to end with `closing_marker` before it counts as stable.
    pub require_closing_marker: bool,
    pub closing_marker: char,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Generator command; `{unit}` and `{output}` are substituted (absolute paths).
    pub command: Vec<String>,
    /// Redirect the generator's stdout into the artifact file.
    pub capture_stdout: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PostProcessConfig {
    /// Regex selecting the package/namespace declaration line.
    pub declaration_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportRepairConfig {
    pub enabled: bool,
    /// Repair command; `{path}` is the artifact path relative to the project root.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build/test command; `{test_name}`, `{test_stem}`, `{unit_name}` and `{path}` are substituted.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src/main"),
            test_dir: PathBuf::from("src/test"),
            extension: "java".to_string(),
            test_token: "Test".to_string(),
        }
    }
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            timeout_ms: 5 * 60 * 1_000,
            require_closing_marker: true,
            closing_marker: '}',
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["generate-tests".to_string(), "{unit}".to_string()],
            capture_stdout: true,
        }
    }
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            declaration_pattern: r"^\s*package\s".to_string(),
        }
    }
}

impl Default for ImportRepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec![
                "google-java-format".to_string(),
                "--fix-imports-only".to_string(),
                "--replace".to_string(),
                "{path}".to_string(),
            ],
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "mvn".to_string(),
                "test".to_string(),
                "-Dtest={test_stem}".to_string(),
            ],
            timeout_secs: 30 * 60,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            project_name: String::new(),
            baseline_branch: "baseline".to_string(),
            branch_policy: BranchPolicy::ForceReuse,
            runs: 1,
            runs_root: PathBuf::from("../gentest-runs"),
            small_set: false,
            input_list: None,
            commit_message: "generated tests".to_string(),
            cooldown_secs: 30,
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            layout: LayoutConfig::default(),
            stabilize: StabilizeConfig::default(),
            generator: GeneratorConfig::default(),
            post_process: PostProcessConfig::default(),
            import_repair: ImportRepairConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runs == 0 {
            return Err(anyhow!("runs must be > 0"));
        }
        if self.baseline_branch.trim().is_empty() {
            return Err(anyhow!("baseline_branch must be non-empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.stabilize.poll_interval_ms == 0 {
            return Err(anyhow!("stabilize.poll_interval_ms must be > 0"));
        }
        if self.stabilize.timeout_ms == 0 {
            return Err(anyhow!("stabilize.timeout_ms must be > 0"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.layout.extension.trim().is_empty() {
            return Err(anyhow!("layout.extension must be non-empty"));
        }
        ensure_command("generator.command", &self.generator.command)?;
        ensure_command("build.command", &self.build.command)?;
        if self.import_repair.enabled {
            ensure_command("import_repair.command", &self.import_repair.command)?;
        }
        self.declaration_regex()?;

        let project = std::path::absolute(&self.project_root)
            .with_context(|| format!("resolve {}", self.project_root.display()))?;
        let runs = std::path::absolute(&self.runs_root)
            .with_context(|| format!("resolve {}", self.runs_root.display()))?;
        if normalize(&runs).starts_with(normalize(&project)) {
            return Err(anyhow!(
                "runs_root {} must be outside project_root {}",
                self.runs_root.display(),
                self.project_root.display()
            ));
        }
        Ok(())
    }

    /// Compiled `post_process.declaration_pattern`.
    pub fn declaration_regex(&self) -> Result<Regex> {
        Regex::new(&self.post_process.declaration_pattern).with_context(|| {
            format!(
                "invalid post_process.declaration_pattern '{}'",
                self.post_process.declaration_pattern
            )
        })
    }

    /// Configured project name, or the project root's directory name.
    pub fn project_name(&self) -> String {
        if !self.project_name.trim().is_empty() {
            return self.project_name.clone();
        }
        std::path::absolute(&self.project_root)
            .ok()
            .map(|path| normalize(&path))
            .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.stabilize.poll_interval_ms)
    }

    pub fn stabilize_timeout(&self) -> Duration {
        Duration::from_millis(self.stabilize.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build.timeout_secs)
    }
}

fn ensure_command(label: &str, command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{label} must be a non-empty array"));
    }
    Ok(())
}

/// Drop `.` components and fold `..` lexically (no filesystem access).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ExperimentConfig::default()`.
pub fn load_config(path: &Path) -> Result<ExperimentConfig> {
    if !path.exists() {
        let cfg = ExperimentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExperimentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExperimentConfig) -> Result<()> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

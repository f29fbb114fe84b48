//! Per-candidate state machine (the run orchestrator).
//!
//! Candidates are processed strictly one after another against a single
//! working tree:
//!
//! ```text
//! Reset -> Branching -> Generating -> Stabilizing
//!       -> {timeout | empty}                        -> Committing -> Done
//!       -> Relocating -> ImportRepair -> Executing -> Committing -> Done
//! ```
//!
//! Every iteration starts with a forced checkout of the baseline, so a
//! candidate that failed midway cannot leak into the next one. A failure of
//! that checkout is the only error that aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::naming::{assign_keys, test_stem};
use crate::core::relocate::relocate_or_keep;
use crate::core::template::render_command;
use crate::core::types::{CandidateRecord, CandidateUnit, Outcome, Stage};
use crate::error::{BaselineRestoreError, MissingUnitNameError};
use crate::io::config::{BranchPolicy, ExperimentConfig};
use crate::io::git::Git;
use crate::io::log_sink::LogSink;
use crate::io::process::{CommandRunner, CommandSpec, ExitPolicy, run_logged};
use crate::io::report::{RunContext, build_report_body, error_report_body};
use crate::io::surface::GenerationSurface;
use crate::stabilize::{Clock, StabilizeOptions, await_stable};

/// Drives candidates through the pipeline.
///
/// Collaborators are public so tests can inspect them after a run.
pub struct Orchestrator<S, R, C> {
    pub config: ExperimentConfig,
    pub surface: S,
    pub runner: R,
    pub clock: C,
    declaration: Regex,
    /// Artifact of the candidate processed last, cleaned by the next reset.
    in_flight: Option<PathBuf>,
}

/// Where a candidate got to, kept outside the fallible body so failures can
/// be attributed.
#[derive(Debug)]
struct Progress {
    stage: Stage,
    key: Option<String>,
    exit_code: Option<i32>,
}

impl Progress {
    fn new() -> Self {
        Self {
            stage: Stage::Reset,
            key: None,
            exit_code: None,
        }
    }

    fn enter(&mut self, stage: Stage, log: &dyn LogSink) -> Result<()> {
        debug!(%stage, "entering stage");
        self.stage = stage;
        log.append(&format!("stage: {stage}"))
    }
}

impl<S, R, C> Orchestrator<S, R, C>
where
    S: GenerationSurface,
    R: CommandRunner,
    C: Clock,
{
    pub fn new(config: ExperimentConfig, surface: S, runner: R, clock: C) -> Result<Self> {
        let declaration = config.declaration_regex()?;
        Ok(Self {
            config,
            surface,
            runner,
            clock,
            declaration,
            in_flight: None,
        })
    }

    /// Process every candidate once, writing reports into `ctx`.
    ///
    /// Candidate failures become `error` records; only a failed baseline
    /// restore is returned as an error.
    #[instrument(skip_all, fields(run_index = ctx.run_index, candidates = candidates.len()))]
    pub fn run_candidates(
        &mut self,
        candidates: &[CandidateUnit],
        ctx: &RunContext,
        log: &dyn LogSink,
    ) -> Result<Vec<CandidateRecord>> {
        let mut records = Vec::with_capacity(candidates.len());
        let total = candidates.len();
        let keys = assign_keys(
            candidates
                .iter()
                .map(|c| (c.unit_path.as_path(), c.test_path.as_path())),
            &self.config.layout.test_token,
        );

        for (index, (candidate, key)) in candidates.iter().zip(keys).enumerate() {
            log.append(&format!("candidate {}/{total}: {candidate}", index + 1))?;
            self.reset_to_baseline(log)?;
            self.in_flight = Some(candidate.test_path.clone());

            let mut progress = Progress::new();
            let attempt = self.process_candidate(candidate, key, ctx, log, &mut progress);
            let (outcome, error) = match attempt {
                Ok(outcome) => (outcome, None),
                Err(err) => {
                    warn!(candidate = %candidate, stage = %progress.stage, err = %err, "candidate failed");
                    log.append(&format!(
                        "error: {candidate} during {}: {err:#}",
                        progress.stage
                    ))?;
                    if let Some(key) = &progress.key
                        && let Err(report_err) = ctx.write_report(key, &error_report_body(&err))
                    {
                        log.append(&format!("error: write report for {key}: {report_err:#}"))?;
                    }
                    (Outcome::Error, Some(format!("{err:#}")))
                }
            };

            info!(candidate = %candidate, %outcome, "candidate finished");
            log.append(&format!(
                "outcome: {} {outcome}",
                progress.key.as_deref().unwrap_or("<unnamed>")
            ))?;
            records.push(CandidateRecord {
                unit: candidate.unit_path.display().to_string(),
                test: candidate.test_path.display().to_string(),
                key: progress.key,
                outcome,
                stage: progress.stage,
                exit_code: progress.exit_code,
                error,
            });

            if outcome.needs_cooldown() {
                let cooldown = self.config.cooldown();
                log.append(&format!("cooldown: {}s", cooldown.as_secs()))?;
                self.clock.sleep(cooldown);
            }
        }

        self.reset_to_baseline(log)?;
        Ok(records)
    }

    /// Force the working tree back to the baseline branch and drop untracked
    /// leftovers of an interrupted candidate, both from the test directory and
    /// at the last candidate's artifact path when that lies elsewhere.
    pub fn reset_to_baseline(&mut self, log: &dyn LogSink) -> Result<()> {
        let baseline = &self.config.baseline_branch;
        let test_dir = &self.config.layout.test_dir;
        let leftover = self
            .in_flight
            .take()
            .filter(|path| path.file_name().is_some() && !path.starts_with(test_dir));
        let git = Git::new(&self.config.project_root, &self.runner, log);
        git.checkout_force(baseline)
            .and_then(|()| git.clean_untracked(test_dir))
            .and_then(|()| match &leftover {
                Some(path) => git.clean_untracked(path),
                None => Ok(()),
            })
            .map_err(|source| {
                BaselineRestoreError {
                    baseline: baseline.clone(),
                    source,
                }
                .into()
            })
    }

    fn process_candidate(
        &mut self,
        candidate: &CandidateUnit,
        key: Result<String, MissingUnitNameError>,
        ctx: &RunContext,
        log: &dyn LogSink,
        progress: &mut Progress,
    ) -> Result<Outcome> {
        let cfg = &self.config;
        let key = key?;
        progress.key = Some(key.clone());
        let unit_name = candidate.unit_name()?;
        let test_name = candidate.test_name()?;
        let root = cfg.project_root.as_path();
        let git = Git::new(root, &self.runner, log);

        progress.enter(Stage::Branching, log)?;
        match cfg.branch_policy {
            BranchPolicy::ForceReuse => {
                git.force_branch(&key)?;
                git.checkout_branch(&key)?;
            }
            BranchPolicy::Fresh => {
                if git.branch_exists(&key)? {
                    git.delete_branch(&key)?;
                }
                git.checkout_new_branch(&key)?;
            }
        }
        remove_stale_artifact(root, &candidate.test_path, log)?;

        progress.enter(Stage::Generating, log)?;
        self.surface.open(&candidate.unit_path)?;
        self.surface.trigger(&candidate.test_path)?;

        progress.enter(Stage::Stabilizing, log)?;
        let opts = StabilizeOptions {
            interval: cfg.poll_interval(),
            timeout: cfg.stabilize_timeout(),
            closing_marker: cfg
                .stabilize
                .require_closing_marker
                .then_some(cfg.stabilize.closing_marker),
        };
        let stable = await_stable(&self.surface, &self.clock, &opts)?;
        log.append(&format!(
            "stabilized: length {} timed_out {}",
            stable.final_length, stable.timed_out
        ))?;

        let early = if stable.timed_out {
            Some(Outcome::Timeout)
        } else if stable.final_length == 0 {
            Some(Outcome::Empty)
        } else {
            None
        };
        if let Some(outcome) = early {
            self.surface.save()?;
            write_report_once(ctx, &key, outcome.sentinel(), log)?;
            progress.enter(Stage::Committing, log)?;
            commit_and_return(&git, cfg)?;
            progress.enter(Stage::Done, log)?;
            return Ok(outcome);
        }

        progress.enter(Stage::Relocating, log)?;
        self.surface.save()?;
        let declaration = &self.declaration;
        self.surface
            .edit(&|text: &str| relocate_or_keep(text, |line| declaration.is_match(line)))?;
        self.surface.save()?;

        let path = candidate.test_path.to_string_lossy();
        if cfg.import_repair.enabled {
            progress.enter(Stage::ImportRepair, log)?;
            let argv = render_command(&cfg.import_repair.command, &[("path", path.as_ref())]);
            let spec = CommandSpec::new(argv, root).with_timeout(cfg.command_timeout());
            run_logged(&self.runner, log, &spec, ExitPolicy::Fatal)?;
        }

        progress.enter(Stage::Executing, log)?;
        let argv = render_command(
            &cfg.build.command,
            &[
                ("test_name", test_name.as_str()),
                ("test_stem", test_stem(&test_name)),
                ("unit_name", unit_name.as_str()),
                ("path", path.as_ref()),
            ],
        );
        let spec = CommandSpec::new(argv, root).with_timeout(cfg.build_timeout());
        let result = run_logged(&self.runner, log, &spec, ExitPolicy::Tolerate)?;
        progress.exit_code = result.exit_code;
        write_report_once(ctx, &key, &build_report_body(&result), log)?;

        progress.enter(Stage::Committing, log)?;
        commit_and_return(&git, cfg)?;
        progress.enter(Stage::Done, log)?;
        Ok(Outcome::Success)
    }
}

fn remove_stale_artifact(root: &Path, test_path: &Path, log: &dyn LogSink) -> Result<()> {
    let artifact = root.join(test_path);
    if artifact.is_file() {
        fs::remove_file(&artifact)
            .with_context(|| format!("remove stale artifact {}", artifact.display()))?;
        log.append(&format!("removed stale artifact {}", test_path.display()))?;
    }
    Ok(())
}

fn write_report_once(
    ctx: &RunContext,
    key: &str,
    body: &str,
    log: &dyn LogSink,
) -> Result<()> {
    if !ctx.write_report(key, body)? {
        warn!(key, "report already exists");
        log.append(&format!("warning: report for {key} already exists, kept the first"))?;
    }
    Ok(())
}

fn commit_and_return<R: CommandRunner + ?Sized>(
    git: &Git<'_, R>,
    cfg: &ExperimentConfig,
) -> Result<()> {
    git.add_all()?;
    git.commit_staged(&cfg.commit_message)?;
    git.checkout_branch(&cfg.baseline_branch)?;
    Ok(())
}

//! Outer loop: repeat the candidate pipeline for the configured number of runs.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::candidates::{candidates_from_list, parse_input_list};
use crate::core::types::CandidateUnit;
use crate::io::config::ExperimentConfig;
use crate::io::discovery::discover;
use crate::io::git::Git;
use crate::io::log_sink::{FileLogSink, LogSink};
use crate::io::process::CommandRunner;
use crate::io::report::{RunContext, RunMeta};
use crate::io::surface::GenerationSurface;
use crate::pipeline::Orchestrator;
use crate::stabilize::Clock;

/// Candidates from `input_list` when given, otherwise from pair discovery.
pub fn load_candidates(
    cfg: &ExperimentConfig,
    input_list: Option<&Path>,
) -> Result<Vec<CandidateUnit>> {
    match input_list {
        Some(path) => {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            let units = parse_input_list(&contents);
            Ok(candidates_from_list(
                &units,
                &cfg.layout.source_dir,
                &cfg.layout.test_dir,
                &cfg.layout.test_token,
            ))
        }
        None => discover(&cfg.project_root, &cfg.layout),
    }
}

/// Run every configured run over `candidates`, returning each run's metadata.
///
/// Each run gets its own folder and log. A failed baseline restore ends the
/// experiment; the error is logged to that run's log before returning.
#[instrument(skip_all, fields(runs = orch.config.runs, candidates = candidates.len()))]
pub fn run_experiment<S, R, C>(
    orch: &mut Orchestrator<S, R, C>,
    candidates: &[CandidateUnit],
) -> Result<Vec<RunMeta>>
where
    S: GenerationSurface,
    R: CommandRunner,
    C: Clock,
{
    let project = orch.config.project_name();
    let mut metas = Vec::new();

    for run_index in 1..=orch.config.runs {
        let mut ctx = RunContext::create(
            &orch.config.runs_root,
            &project,
            orch.config.small_set,
            run_index,
        )?;
        let log = FileLogSink::open(&ctx.log_path())?;
        info!(run_index, run_folder = %ctx.run_folder.display(), "run started");
        log.append(&format!(
            "run {run_index}/{} started: {} candidates, project {project}",
            orch.config.runs,
            candidates.len()
        ))?;

        let records = match orch.run_candidates(candidates, &ctx, &log) {
            Ok(records) => records,
            Err(err) => {
                log.append(&format!("fatal: {err:#}"))?;
                log.close()?;
                return Err(err);
            }
        };

        let git = Git::new(&orch.config.project_root, &orch.runner, &log);
        match git.git_dir().and_then(|dir| ctx.archive_vcs(&dir)) {
            Ok(archived) => log.append(&format!("archived vcs to {}", archived.display()))?,
            Err(err) => {
                warn!(err = %err, "vcs archive failed");
                log.append(&format!("error: archive vcs: {err:#}"))?;
            }
        }

        let meta = ctx.finalize(&records)?;
        log.append(&format!(
            "run {run_index} finished: {} timeout, {} empty, {} success, {} error",
            meta.timeout, meta.empty, meta.success, meta.error
        ))?;
        log.close()?;
        metas.push(meta);
    }
    Ok(metas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn input_list_overrides_discovery() {
        let repo = TestRepo::new().expect("repo");
        let list = repo
            .write_file(
                "units.txt",
                "src/main/java/org/A.java\r\nsrc/main/java/org/B.java\n\n",
            )
            .expect("list");
        let cfg = ExperimentConfig {
            project_root: repo.path().to_path_buf(),
            ..ExperimentConfig::default()
        };

        let candidates = load_candidates(&cfg, Some(list.as_path())).expect("candidates");
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[1].test_path,
            Path::new("src/test/java/org/BTest.java")
        );
    }

    #[test]
    fn discovery_is_used_without_list() {
        let repo = TestRepo::new().expect("repo");
        repo.write_file("src/main/java/A.java", "class A {}\n")
            .expect("unit");
        repo.write_file("src/test/java/TestA.java", "class TestA {}\n")
            .expect("test");
        let cfg = ExperimentConfig {
            project_root: repo.path().to_path_buf(),
            ..ExperimentConfig::default()
        };
        let candidates = load_candidates(&cfg, None).expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].test_path, Path::new("src/test/java/TestA.java"));
    }
}

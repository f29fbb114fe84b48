//! Test-generation experiment harness.
//!
//! Drives an external test generator over every (unit, test) pair of a
//! project, one git branch per unit, and records per-candidate reports in
//! timestamped run folders.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use gentest::core::candidates::render_input_list;
use gentest::error::BaselineRestoreError;
use gentest::exit_codes;
use gentest::experiment::{load_candidates, run_experiment};
use gentest::io::config::{DEFAULT_CONFIG_FILE, ExperimentConfig, load_config, write_config};
use gentest::io::discovery::discover;
use gentest::io::process::SystemRunner;
use gentest::io::surface::CommandSurface;
use gentest::logging;
use gentest::pipeline::Orchestrator;
use gentest::stabilize::SystemClock;
use gentest::summary::{aggregate, render};

#[derive(Parser)]
#[command(
    name = "gentest",
    version,
    about = "Experiment harness for external test generators"
)]
struct Cli {
    /// Path to the experiment config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List (unit, test) pairs found in the project layout.
    Discover {
        /// Also write the unit paths as an input list.
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Run the experiment.
    Run {
        /// Override the configured number of runs.
        #[arg(long)]
        runs: Option<u32>,
        /// Newline-delimited unit paths (overrides `input_list` and discovery).
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Aggregate outcomes across finished run folders.
    Report {
        /// Runs root (defaults to the configured `runs_root`).
        runs_root: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{err:#}");
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<BaselineRestoreError>().is_some() {
        exit_codes::BASELINE_RESTORE_FAILED
    } else {
        exit_codes::INVALID
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Discover { write } => cmd_discover(&cli.config, write.as_deref()),
        Command::Run { runs, input } => cmd_run(&cli.config, runs, input),
        Command::Report { runs_root } => cmd_report(&cli.config, runs_root),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &ExperimentConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn cmd_discover(config_path: &Path, write: Option<&Path>) -> Result<()> {
    let cfg = load_config(config_path)?;
    let candidates = discover(&cfg.project_root, &cfg.layout)?;
    for candidate in &candidates {
        println!(
            "{}\t{}",
            candidate.unit_path.display(),
            candidate.test_path.display()
        );
    }
    if let Some(path) = write {
        let mut units: Vec<PathBuf> = candidates.iter().map(|c| c.unit_path.clone()).collect();
        units.dedup();
        fs::write(path, render_input_list(&units))
            .with_context(|| format!("write {}", path.display()))?;
        eprintln!("wrote {} units to {}", units.len(), path.display());
    }
    Ok(())
}

fn cmd_run(config_path: &Path, runs: Option<u32>, input: Option<PathBuf>) -> Result<()> {
    let mut cfg = load_config(config_path)?;
    if let Some(runs) = runs {
        cfg.runs = runs;
    }
    if input.is_some() {
        cfg.input_list = input;
    }
    cfg.validate()?;

    let candidates = load_candidates(&cfg, cfg.input_list.as_deref())?;
    if candidates.is_empty() {
        bail!("no candidates to process");
    }
    debug!(candidates = candidates.len(), runs = cfg.runs, "starting experiment");

    let surface = CommandSurface::new(
        &cfg.project_root,
        cfg.generator.command.clone(),
        cfg.generator.capture_stdout,
    );
    let runner = SystemRunner::new(cfg.command_timeout(), cfg.output_limit_bytes);
    let mut orch = Orchestrator::new(cfg, surface, runner, SystemClock)?;

    for meta in run_experiment(&mut orch, &candidates)? {
        println!(
            "run: index={} timeout={} empty={} success={} error={} duration_secs={:.1}",
            meta.run_index, meta.timeout, meta.empty, meta.success, meta.error, meta.duration_secs
        );
    }
    Ok(())
}

fn cmd_report(config_path: &Path, runs_root: Option<PathBuf>) -> Result<()> {
    let runs_root = match runs_root {
        Some(root) => root,
        None => load_config(config_path)?.runs_root,
    };
    let (summary, warnings) = aggregate(&runs_root)?;
    print!("{}", render(&summary));
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

//! Pipeline-level tests driving real git repositories with scripted generation.
//!
//! The generation surface and clock are scripted; git, import repair and the
//! build tool run as real processes so branch isolation is exercised for real.

use std::fs;
use std::path::Path;
use std::time::Duration;

use gentest::core::types::{CandidateUnit, Outcome, Stage};
use gentest::experiment::run_experiment;
use gentest::io::config::ExperimentConfig;
use gentest::io::report::{META_FILE, RunContext, read_meta};
use gentest::pipeline::Orchestrator;
use gentest::test_support::{FakeClock, MemoryLogSink, RecordingRunner, ScriptedSurface, TestRepo};

const GENERATED: &str = "import org.junit.Test;\npackage org.demo;\n\npublic class FooTest {\n}\n";

fn setup_repo(units: &[&str]) -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    for unit in units {
        repo.write_file(
            &format!("src/main/java/org/demo/{unit}.java"),
            &format!("package org.demo;\n\npublic class {unit} {{}}\n"),
        )
        .expect("unit");
    }
    repo.commit_all("units").expect("commit units");
    repo
}

fn candidate(unit: &str) -> CandidateUnit {
    CandidateUnit::new(
        format!("src/main/java/org/demo/{unit}.java"),
        format!("src/test/java/org/demo/{unit}Test.java"),
    )
}

fn config(repo: &TestRepo, runs_root: &Path) -> ExperimentConfig {
    let mut cfg = ExperimentConfig {
        project_root: repo.path().to_path_buf(),
        project_name: "demo".to_string(),
        runs_root: runs_root.to_path_buf(),
        cooldown_secs: 5,
        ..ExperimentConfig::default()
    };
    cfg.stabilize.poll_interval_ms = 10;
    cfg.stabilize.timeout_ms = 100;
    cfg.import_repair.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "test -f \"$0\"".to_string(),
        "{path}".to_string(),
    ];
    cfg.build.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo running {test_name}; echo warn >&2; exit 1".to_string(),
    ];
    cfg
}

fn build_calls(runner: &RecordingRunner) -> Vec<String> {
    runner
        .calls_starting_with(&["sh", "-c"])
        .into_iter()
        .filter_map(|argv| argv.get(2).cloned())
        .filter(|script| script.starts_with("echo running"))
        .collect()
}

/// Scenario: one unit, generation settles with a closing brace, build fails its tests.
///
/// Expected: branch `Foo.java` holds the artifact with the package line first,
/// the build ran with `FooTest.java`, the non-zero exit is a `success` outcome
/// with output captured in the report, and the tree is back on baseline.
#[test]
fn end_to_end_success_with_failing_tests() {
    let repo = setup_repo(&["Foo"]);
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let surface = ScriptedSurface::in_dir(repo.path()).script("Foo.java", &[GENERATED]);
    let mut orch = Orchestrator::new(
        config(&repo, runs.path()),
        surface,
        RecordingRunner::new(),
        FakeClock::new(),
    )
    .expect("orchestrator");

    let records = orch
        .run_candidates(&[candidate("Foo")], &ctx, &log)
        .expect("run");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Success);
    assert_eq!(records[0].stage, Stage::Done);
    assert_eq!(records[0].exit_code, Some(1));
    assert_eq!(records[0].key.as_deref(), Some("Foo.java"));

    let committed = repo
        .show_file("Foo.java", "src/test/java/org/demo/FooTest.java")
        .expect("artifact on branch");
    assert_eq!(
        committed.lines().next(),
        Some("package org.demo;"),
        "package line relocated to the top"
    );
    assert!(committed.contains("import org.junit.Test;"));

    assert_eq!(
        build_calls(&orch.runner),
        vec!["echo running FooTest.java; echo warn >&2; exit 1".to_string()]
    );
    let report = fs::read_to_string(ctx.report_path("Foo.java")).expect("report");
    assert_eq!(
        report,
        "exit_code: 1\n=== stdout ===\nrunning FooTest.java\n=== stderr ===\nwarn\n"
    );

    assert_eq!(repo.current_branch().expect("branch"), "baseline");
    assert!(
        !repo
            .path()
            .join("src/test/java/org/demo/FooTest.java")
            .exists()
    );
    assert!(orch.clock.sleeps().iter().all(|d| *d < Duration::from_secs(5)));
}

/// Scenario: generation settles at length zero.
///
/// Expected: sentinel `empty` report, no relocation edit, no build for that
/// unit, cooldown before the next candidate, which still succeeds.
#[test]
fn empty_generation_skips_build_and_cools_down() {
    let repo = setup_repo(&["Foo", "Bar"]);
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let surface = ScriptedSurface::in_dir(repo.path())
        .script("Foo.java", &[""])
        .script("Bar.java", &[GENERATED]);
    let mut orch = Orchestrator::new(
        config(&repo, runs.path()),
        surface,
        RecordingRunner::new(),
        FakeClock::new(),
    )
    .expect("orchestrator");

    let records = orch
        .run_candidates(&[candidate("Foo"), candidate("Bar")], &ctx, &log)
        .expect("run");

    assert_eq!(records[0].outcome, Outcome::Empty);
    assert_eq!(records[1].outcome, Outcome::Success);
    assert_eq!(
        fs::read_to_string(ctx.report_path("Foo.java")).expect("report"),
        "empty"
    );
    assert_eq!(
        build_calls(&orch.runner),
        vec!["echo running BarTest.java; echo warn >&2; exit 1".to_string()]
    );

    let events = orch.surface.events();
    let bar_open = events
        .iter()
        .position(|e| e.starts_with("open ") && e.ends_with("Bar.java"))
        .expect("bar opened");
    assert!(!events[..bar_open].iter().any(|e| e == "edit"));

    let cooldowns: Vec<Duration> = orch
        .clock
        .sleeps()
        .into_iter()
        .filter(|d| *d == Duration::from_secs(5))
        .collect();
    assert_eq!(cooldowns.len(), 1);
    let cooldown_line = log
        .lines()
        .iter()
        .position(|l| l == "cooldown: 5s")
        .expect("cooldown logged");
    let bar_line = log
        .lines()
        .iter()
        .position(|l| l.starts_with("candidate 2/2"))
        .expect("second candidate logged");
    assert!(cooldown_line < bar_line);
}

/// Scenario: the import-repair command fails for the first unit.
///
/// Expected: `error` outcome stamped into the report, the run continues, and
/// the second unit is processed from a clean baseline.
#[test]
fn fatal_command_failure_is_contained_to_its_candidate() {
    let repo = setup_repo(&["Foo", "Bar"]);
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let mut cfg = config(&repo, runs.path());
    cfg.import_repair.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "case \"$0\" in *FooTest*) echo cannot parse >&2; exit 3;; esac".to_string(),
        "{path}".to_string(),
    ];
    let surface = ScriptedSurface::in_dir(repo.path())
        .script("Foo.java", &[GENERATED])
        .script("Bar.java", &[GENERATED]);
    let mut orch = Orchestrator::new(cfg, surface, RecordingRunner::new(), FakeClock::new())
        .expect("orchestrator");

    let records = orch
        .run_candidates(&[candidate("Foo"), candidate("Bar")], &ctx, &log)
        .expect("run continues");

    assert_eq!(records[0].outcome, Outcome::Error);
    assert_eq!(records[0].stage, Stage::ImportRepair);
    assert_eq!(records[0].exit_code, None);
    assert_eq!(records[1].outcome, Outcome::Success);

    let report = fs::read_to_string(ctx.report_path("Foo.java")).expect("error report");
    assert!(report.starts_with("error\n"));
    assert!(report.contains("exit code Some(3)"));
    assert!(log.lines().iter().any(|l| l == "stderr| cannot parse"));

    // Bar's branch must not contain Foo's half-processed artifact.
    let bar_files = repo.files_in_commit("Bar.java").expect("bar commit");
    assert_eq!(bar_files, vec!["src/test/java/org/demo/BarTest.java".to_string()]);
    assert_eq!(repo.current_branch().expect("branch"), "baseline");
}

/// Scenario: listed units outside the source dir, so their tests sit next to
/// them; import repair fails for the first one after its artifact was saved.
///
/// Expected: the untracked `lib/FooTest.java` is cleaned by the next reset and
/// never lands in Bar's commit.
#[test]
fn failed_artifact_outside_test_dir_does_not_leak() {
    let repo = TestRepo::new().expect("repo");
    for unit in ["Foo", "Bar"] {
        repo.write_file(&format!("lib/{unit}.java"), &format!("class {unit} {{}}\n"))
            .expect("unit");
    }
    repo.commit_all("units").expect("commit units");
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let mut cfg = config(&repo, runs.path());
    cfg.import_repair.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "case \"$0\" in *FooTest*) exit 3;; esac".to_string(),
        "{path}".to_string(),
    ];
    let surface = ScriptedSurface::in_dir(repo.path())
        .script("Foo.java", &[GENERATED])
        .script("Bar.java", &[GENERATED]);
    let mut orch = Orchestrator::new(cfg, surface, RecordingRunner::new(), FakeClock::new())
        .expect("orchestrator");

    let candidates = [
        CandidateUnit::new("lib/Foo.java", "lib/FooTest.java"),
        CandidateUnit::new("lib/Bar.java", "lib/BarTest.java"),
    ];
    let records = orch.run_candidates(&candidates, &ctx, &log).expect("run");

    assert_eq!(records[0].outcome, Outcome::Error);
    assert_eq!(records[1].outcome, Outcome::Success);
    let bar_files = repo.files_in_commit("Bar.java").expect("bar commit");
    assert_eq!(bar_files, vec!["lib/BarTest.java".to_string()]);
    assert!(!repo.path().join("lib/FooTest.java").exists());
    assert_eq!(repo.current_branch().expect("branch"), "baseline");
}

/// Scenario: two units share a file name in different packages.
///
/// Expected: each gets its own branch and report; neither is overwritten.
#[test]
fn same_named_units_keep_separate_branches_and_reports() {
    let repo = TestRepo::new().expect("repo");
    for pkg in ["a", "b"] {
        repo.write_file(
            &format!("src/main/java/{pkg}/Node.java"),
            &format!("package {pkg};\n\nclass Node {{}}\n"),
        )
        .expect("unit");
    }
    repo.commit_all("units").expect("commit units");
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let mut cfg = config(&repo, runs.path());
    cfg.build.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo built \"$0\"".to_string(),
        "{path}".to_string(),
    ];
    let surface = ScriptedSurface::in_dir(repo.path()).script("Node.java", &[GENERATED]);
    let mut orch = Orchestrator::new(cfg, surface, RecordingRunner::new(), FakeClock::new())
        .expect("orchestrator");

    let candidates = [
        CandidateUnit::new("src/main/java/a/Node.java", "src/test/java/a/NodeTest.java"),
        CandidateUnit::new("src/main/java/b/Node.java", "src/test/java/b/NodeTest.java"),
    ];
    let records = orch.run_candidates(&candidates, &ctx, &log).expect("run");

    let keys: Vec<Option<&str>> = records.iter().map(|r| r.key.as_deref()).collect();
    assert_eq!(
        keys,
        vec![Some("Node.java"), Some("Node.java__src.main.java.b")]
    );
    assert!(records.iter().all(|r| r.outcome == Outcome::Success));

    let first = fs::read_to_string(ctx.report_path("Node.java")).expect("first report");
    assert!(first.contains("built src/test/java/a/NodeTest.java"));
    let second =
        fs::read_to_string(ctx.report_path("Node.java__src.main.java.b")).expect("second report");
    assert!(second.contains("built src/test/java/b/NodeTest.java"));

    assert_eq!(
        repo.files_in_commit("Node.java").expect("first branch"),
        vec!["src/test/java/a/NodeTest.java".to_string()]
    );
    assert_eq!(
        repo.files_in_commit("Node.java__src.main.java.b")
            .expect("second branch"),
        vec!["src/test/java/b/NodeTest.java".to_string()]
    );
}

/// Scenario: a mix of success, timeout, empty and error candidates.
///
/// Expected: the forced baseline checkout happens once per iteration plus
/// once at the end (N+1), and the plain return-to-baseline at most once per
/// iteration.
#[test]
fn baseline_is_restored_once_per_iteration_plus_final() {
    let repo = setup_repo(&["Ok", "Slow", "Blank", "Lost"]);
    let runs = tempfile::tempdir().expect("runs");
    let ctx = RunContext::create(runs.path(), "demo", false, 1).expect("ctx");
    let log = MemoryLogSink::default();
    let growing: Vec<String> = (1..=40).map(|n| format!("{}}}", "x".repeat(n))).collect();
    let growing: Vec<&str> = growing.iter().map(String::as_str).collect();
    let surface = ScriptedSurface::in_dir(repo.path())
        .script("Ok.java", &[GENERATED])
        .script("Slow.java", &growing)
        .script("Blank.java", &[""])
        .script_no_buffer("Lost.java");
    let mut orch = Orchestrator::new(
        config(&repo, runs.path()),
        surface,
        RecordingRunner::new(),
        FakeClock::new(),
    )
    .expect("orchestrator");

    let candidates = [
        candidate("Ok"),
        candidate("Slow"),
        candidate("Blank"),
        candidate("Lost"),
    ];
    let records = orch.run_candidates(&candidates, &ctx, &log).expect("run");

    let outcomes: Vec<Outcome> = records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Success,
            Outcome::Timeout,
            Outcome::Empty,
            Outcome::Error
        ]
    );
    assert_eq!(
        records[3].error.as_deref(),
        Some("no active editor"),
        "missing buffer surfaces as an error"
    );
    assert_eq!(
        fs::read_to_string(ctx.report_path("Lost.java")).expect("report"),
        "error\nno active editor\n"
    );

    let lines = log.lines();
    let forced = lines
        .iter()
        .filter(|l| l.starts_with("exec: git checkout -f baseline "))
        .count();
    let plain = lines
        .iter()
        .filter(|l| l.starts_with("exec: git checkout baseline "))
        .count();
    assert_eq!(forced, candidates.len() + 1);
    assert_eq!(plain, 3);
    assert_eq!(repo.current_branch().expect("branch"), "baseline");
}

/// Scenario: two runs through `run_experiment`.
///
/// Expected: one timestamped folder per run with the log, metadata, reports
/// and an archived copy of the repository metadata.
#[test]
fn experiment_writes_one_folder_per_run() {
    let repo = setup_repo(&["Foo"]);
    let runs = tempfile::tempdir().expect("runs");
    let mut cfg = config(&repo, runs.path());
    cfg.runs = 2;
    cfg.small_set = true;
    let surface = ScriptedSurface::in_dir(repo.path()).script("Foo.java", &[GENERATED]);
    let mut orch = Orchestrator::new(cfg, surface, RecordingRunner::new(), FakeClock::new())
        .expect("orchestrator");

    let metas = run_experiment(&mut orch, &[candidate("Foo")]).expect("experiment");
    assert_eq!(metas.len(), 2);
    assert_eq!(metas[0].run_index, 1);
    assert_eq!(metas[1].run_index, 2);

    let mut folders: Vec<_> = fs::read_dir(runs.path())
        .expect("read runs")
        .map(|e| e.expect("entry").path())
        .collect();
    folders.sort();
    assert_eq!(folders.len(), 2);
    for folder in &folders {
        let name = folder.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.ends_with("_demo_smallset"), "unexpected folder {name}");
        assert!(folder.join("reports/Foo.java.report.txt").is_file());
        assert!(folder.join("git/HEAD").is_file());

        let meta = read_meta(&folder.join(META_FILE)).expect("meta");
        assert_eq!(meta.success, 1);
        assert_eq!(meta.records[0].outcome, Outcome::Success);

        let log = fs::read_to_string(folder.join("experiment.log")).expect("log");
        let first = log.lines().next().expect("first line");
        let (stamp, rest) = first.split_once(' ').expect("timestamp");
        assert!(stamp.ends_with('Z'));
        assert!(rest.starts_with("run "));
        assert!(log.contains("stdout| running FooTest.java"));
    }
}

#![cfg(unix)]

mod common;

use std::fs;
use std::time::{Duration, Instant};

use common::*;
use playbook_engine::prelude::*;
use playbook_engine::{Cause, ConfigurationError, Scheduler};

const APPEND_INSTANCE: &str = "echo \"$PLAYBOOK_INSTANCE\" >> \"$LOG_FILE\"";

fn log_options(dir: &std::path::Path) -> RunOptions {
    let mut options = RunOptions::default();
    options.variables.insert(
        "log_file".into(),
        Value::from(dir.join("run.log").display().to_string()),
    );
    options
}

fn read_log(dir: &std::path::Path) -> Vec<String> {
    fs::read_to_string(dir.join("run.log"))
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

fn load(content: &str) -> Playbook {
    PlaybookLoader::new().load_str(content, "test.yaml").unwrap()
}

#[test]
fn test_graph_schedule_waves() {
    let playbook = load(graph_playbook());
    let schedule = Scheduler::schedule(&playbook).unwrap();

    assert_eq!(schedule.len(), 3);
    assert_eq!(schedule.waves[0].job_ids(), vec!["A", "B", "E"]);
    assert_eq!(schedule.waves[0].len(), 8);
    assert_eq!(schedule.waves[1].job_ids(), vec!["C"]);
    assert_eq!(schedule.waves[2].job_ids(), vec!["D"]);
}

#[tokio::test]
async fn test_staged_run_in_wave_order() {
    let dir = create_test_dir();
    for id in ["0001", "0002", "0003", "0004"] {
        write_script(dir.path(), id, APPEND_INSTANCE);
    }

    let engine = Engine::new(engine_config(dir.path()));
    let result = engine
        .run(&load(staged_playbook()), &log_options(dir.path()))
        .await
        .unwrap();

    assert!(result.overall_success);
    assert_eq!(result.total(), 5);
    assert_eq!(result.completed_count, 5);

    let log = read_log(dir.path());
    assert_eq!(log.len(), 5);
    assert_eq!(log[0], "0001");
    assert_eq!(log[4], "0004");
    assert!(log[1..4].contains(&"0002[os=linux]".to_string()));
    assert!(log[1..4].contains(&"0002[os=mac]".to_string()));
}

#[tokio::test]
async fn test_inputs_reach_script_and_output_is_captured() {
    let dir = create_test_dir();
    write_script(
        dir.path(),
        "0002",
        "echo \"$CHANNEL $OS\"\necho \"$PLAYBOOK_INPUTS\" > \"$PLAYBOOK_OUTPUT_DIR/inputs.json\"",
    );
    let playbook = load(
        r#"
variables:
  channel: stable
stages:
  - jobs:
      - id: "0002"
        matrix:
          os: [linux]
"#,
    );

    let result = Engine::new(engine_config(dir.path()))
        .run(&playbook, &RunOptions::default())
        .await
        .unwrap();

    let record = &result.records[0];
    assert_eq!(record.exit_code, Some(0));
    let output = record.output_ref.as_ref().unwrap();
    let stdout = fs::read_to_string(output.join("stdout.log")).unwrap();
    assert_eq!(stdout.trim(), "stable linux");

    let inputs: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("inputs.json")).unwrap()).unwrap();
    assert_eq!(inputs["channel"], "stable");
    assert_eq!(inputs["os"], "linux");
}

#[tokio::test]
async fn test_percent_criteria_tolerates_failure() {
    let dir = create_test_dir();
    for id in ["0001", "0002", "0004"] {
        write_script(dir.path(), id, "exit 0");
    }
    write_script(dir.path(), "0003", "exit 1");

    let playbook = load(staged_playbook());
    let result = Engine::new(engine_config(dir.path()))
        .run(&playbook, &RunOptions::default())
        .await
        .unwrap();

    // 4 of 5 with a 50% threshold
    assert_eq!(result.failed_count, 1);
    assert_eq!(result.completed_count, 4);
    assert!(result.overall_success);

    let report = Report::render(&result, &playbook.success_criteria);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].instance, "0003");
    assert_eq!(report.failures[0].exit_code, Some(1));
}

#[tokio::test]
async fn test_fail_fast_skips_dependents() {
    let dir = create_test_dir();
    for id in ["B", "C", "D", "E"] {
        write_script(dir.path(), id, APPEND_INSTANCE);
    }
    write_script(dir.path(), "A", "exit 2");

    let mut options = log_options(dir.path());
    options.fail_fast = Some(true);
    let result = Engine::new(engine_config(dir.path()))
        .run(&load(graph_playbook()), &options)
        .await
        .unwrap();

    assert!(!result.overall_success);
    assert_eq!(result.skipped_count, 2);
    let log = read_log(dir.path());
    assert!(!log.contains(&"C".to_string()));
    assert!(!log.contains(&"D".to_string()));
    assert!(log.contains(&"B".to_string()));
}

#[tokio::test]
async fn test_timeout_kills_instance() {
    let dir = create_test_dir();
    write_script(dir.path(), "slow", "sleep 10");
    write_script(dir.path(), "fast", "exit 0");

    let mut config = engine_config(dir.path());
    config.timeout = Some(1);
    let playbook = Playbook::from_job_ids(
        "timeouts",
        &["slow".to_string(), "fast".to_string()],
        SuccessCriteria::default(),
    )
    .unwrap();

    let started = Instant::now();
    let result = Engine::new(config)
        .run(&playbook, &RunOptions::default())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(8));
    let slow = result
        .records
        .iter()
        .find(|r| r.instance.job_id() == "slow")
        .unwrap();
    assert_eq!(slow.status, Status::Failed);
    assert_eq!(slow.cause, Some(Cause::Timeout));
    assert_eq!(result.completed_count, 1);
    assert!(!result.overall_success);
}

#[tokio::test]
async fn test_missing_script_aborts_before_execution() {
    let dir = create_test_dir();
    write_script(dir.path(), "0001", APPEND_INSTANCE);
    let playbook = Playbook::from_job_ids(
        "missing",
        &["0001".to_string(), "9999".to_string()],
        SuccessCriteria::default(),
    )
    .unwrap();

    let err = Engine::new(engine_config(dir.path()))
        .run(&playbook, &log_options(dir.path()))
        .await
        .unwrap_err();

    match err {
        EngineError::Configuration(ConfigurationError::MissingScript { job, .. }) => {
            assert_eq!(job, "9999");
        }
        other => panic!("expected missing script, got {:?}", other),
    }
    assert!(read_log(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_script_fails_lenient_playbook() {
    let dir = create_test_dir();
    for id in ["0001", "0002", "0004"] {
        write_script(dir.path(), id, "exit 0");
    }

    // 50% criteria would tolerate one failed job, but not a missing script
    let playbook = load(staged_playbook());
    let engine = Engine::new(engine_config(dir.path()));
    assert!(matches!(
        engine.plan(&playbook, &RunOptions::default()),
        Err(EngineError::Configuration(ConfigurationError::MissingScript { job, .. })) if job == "0003"
    ));
    assert!(engine.run(&playbook, &RunOptions::default()).await.is_err());
}

#[tokio::test]
async fn test_cached_rerun_replays_artifacts() {
    let dir = create_test_dir();
    write_script(
        dir.path(),
        "0001",
        "echo run >> \"$LOG_FILE\"\necho report > \"$PLAYBOOK_OUTPUT_DIR/report.txt\"",
    );
    let playbook =
        Playbook::from_job_ids("cached", &["0001".to_string()], SuccessCriteria::default())
            .unwrap();
    let engine = Engine::new(engine_config(dir.path()));
    let mut options = log_options(dir.path());
    options.use_cache = true;

    let first = engine.run(&playbook, &options).await.unwrap();
    let second = engine.run(&playbook, &options).await.unwrap();

    assert!(first.overall_success && second.overall_success);
    assert!(second.cache_hit);
    assert_eq!(read_log(dir.path()).len(), 1);

    let artifact = second.records[0].output_ref.as_ref().unwrap();
    assert!(artifact.starts_with(dir.path().join("cache")));
    assert_eq!(
        fs::read_to_string(artifact.join("report.txt")).unwrap().trim(),
        "report"
    );
    assert_eq!(engine.cache().entries().len(), 1);
}

#[tokio::test]
async fn test_corrupt_cache_entry_reruns() {
    let dir = create_test_dir();
    write_script(dir.path(), "0001", "echo run >> \"$LOG_FILE\"");
    let playbook =
        Playbook::from_job_ids("cached", &["0001".to_string()], SuccessCriteria::default())
            .unwrap();
    let engine = Engine::new(engine_config(dir.path()));
    let mut options = log_options(dir.path());
    options.use_cache = true;

    let first = engine.run(&playbook, &options).await.unwrap();
    let fingerprint = first.fingerprint.clone().unwrap();
    fs::write(
        dir.path().join("cache").join("results").join(format!("{}.json", fingerprint)),
        "[{\"broken\": true}]",
    )
    .unwrap();

    let second = engine.run(&playbook, &options).await.unwrap();
    assert!(!second.cache_hit);
    assert!(second.overall_success);
    assert_eq!(read_log(dir.path()).len(), 2);
}

#[tokio::test]
async fn test_cached_replay_still_reports_allowed_failure() {
    let dir = create_test_dir();
    write_script(dir.path(), "ok", "echo ok >> \"$LOG_FILE\"");
    write_script(dir.path(), "bad", "echo bad >> \"$LOG_FILE\"\nexit 1");
    let criteria = SuccessCriteria {
        allowed_failures: vec!["bad".into()],
        ..SuccessCriteria::default()
    };
    let playbook =
        Playbook::from_job_ids("flaky", &["ok".to_string(), "bad".to_string()], criteria).unwrap();
    let engine = Engine::new(engine_config(dir.path()));
    let mut options = log_options(dir.path());
    options.use_cache = true;

    let first = engine.run(&playbook, &options).await.unwrap();
    let replay = engine.run(&playbook, &options).await.unwrap();

    assert!(first.overall_success);
    assert!(replay.overall_success);
    assert!(replay.cache_hit);
    assert_eq!(read_log(dir.path()).len(), 2);

    assert_eq!(replay.failed_count, first.failed_count);
    assert_eq!(replay.completed_count, 1);
    let report = Report::render(&replay, &playbook.success_criteria);
    assert_eq!(report.totals.cached, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].job, "bad");
    assert_eq!(report.failures[0].exit_code, Some(1));
    assert!(report.failures[0].allowed);
}

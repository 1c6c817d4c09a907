mod common;

use common::*;
use playbook_engine::prelude::*;
use playbook_engine::{ConfigurationError, SchedulingError, SchemaVersion};

#[test]
fn test_load_empty_directory() {
    let dir = create_test_dir();
    let playbooks = PlaybookLoader::new().load_directory(dir.path()).unwrap();
    assert!(playbooks.is_empty());
}

#[test]
fn test_load_directory_sorted_and_skips_engine_config() {
    let dir = create_test_dir();
    write_playbook(dir.path(), "b.yaml", graph_playbook());
    write_playbook(dir.path(), "a.yml", staged_playbook());
    write_engine_config(dir.path(), "max_concurrency: 2\n");
    write_playbook(dir.path(), "notes.txt", "not a playbook");

    let playbooks = PlaybookLoader::new().load_directory(dir.path()).unwrap();

    let names: Vec<_> = playbooks.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["nightly", "graph"]);
}

#[test]
fn test_legacy_playbook_pads_numeric_ids() {
    let dir = create_test_dir();
    let path = write_playbook(dir.path(), "legacy.yaml", "scripts: [1, 2, \"0003\"]\n");

    let playbook = PlaybookLoader::new().load_file(&path).unwrap();

    assert_eq!(playbook.schema, SchemaVersion::V1);
    assert_eq!(playbook.name, "legacy");
    let ids: Vec<_> = playbook.jobs().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["0001", "0002", "0003"]);
}

#[test]
fn test_staged_playbook() {
    let dir = create_test_dir();
    let path = write_playbook(dir.path(), "nightly.yaml", staged_playbook());

    let playbook = PlaybookLoader::new().load_file(&path).unwrap();

    assert_eq!(playbook.schema, SchemaVersion::V2);
    assert_eq!(playbook.description.as_deref(), Some("Nightly regression"));
    assert_eq!(playbook.stages.len(), 3);
    assert_eq!(playbook.stages[1].name, "test");
    assert_eq!(playbook.variables["channel"], Value::from("stable"));
    assert!(playbook.job("0002").unwrap().has_matrix());
}

#[test]
fn test_playbook_criteria_override_global_defaults() {
    let dir = create_test_dir();
    let path = write_playbook(dir.path(), "nightly.yaml", staged_playbook());
    let defaults = SuccessCriteria {
        minimum_success_count: 3,
        allowed_failures: vec!["0004".into()],
        ..SuccessCriteria::default()
    };

    let playbook = PlaybookLoader::with_defaults(defaults)
        .load_file(&path)
        .unwrap();

    let criteria = &playbook.success_criteria;
    assert!(!criteria.require_all_success);
    assert_eq!(criteria.minimum_success_percent, 50.0);
    assert_eq!(criteria.minimum_success_count, 3);
    assert_eq!(criteria.allowed_failures, vec!["0004"]);
}

#[test]
fn test_graph_playbook_grouped_by_depth() {
    let playbook = PlaybookLoader::new()
        .load_str(graph_playbook(), "graph.yaml")
        .unwrap();

    assert_eq!(playbook.schema, SchemaVersion::V3);
    let stages: Vec<Vec<&str>> = playbook
        .stages
        .iter()
        .map(|s| s.jobs.iter().map(|j| j.id.as_str()).collect())
        .collect();
    assert_eq!(stages, vec![vec!["A", "B", "E"], vec!["C"], vec!["D"]]);
    assert_eq!(playbook.job("D").unwrap().depends_on, vec!["C"]);
}

#[test]
fn test_json_playbook() {
    let dir = create_test_dir();
    let path = write_playbook(
        dir.path(),
        "api.json",
        r#"{"name": "api", "stages": [{"jobs": ["0001", {"id": "0002", "dependsOn": ["0001"]}]}]}"#,
    );

    let playbook = PlaybookLoader::new().load_file(&path).unwrap();
    assert_eq!(playbook.job_count(), 2);
    assert_eq!(playbook.stages[0].name, "stage-1");
}

#[test]
fn test_resolve_by_name() {
    let dir = create_test_dir();
    write_playbook(dir.path(), "nightly.yaml", staged_playbook());

    let loader = PlaybookLoader::new();
    let playbook = loader.resolve("nightly", dir.path()).unwrap();
    assert_eq!(playbook.name, "nightly");

    assert!(matches!(
        loader.resolve("missing", dir.path()),
        Err(EngineError::Configuration(ConfigurationError::PlaybookNotFound(_)))
    ));
}

#[test]
fn test_duplicate_job_rejected() {
    let result = PlaybookLoader::new().load_str(
        "stages:\n  - jobs: [\"0001\"]\n  - jobs: [\"0001\"]\n",
        "dup.yaml",
    );
    assert!(matches!(
        result,
        Err(EngineError::Configuration(ConfigurationError::DuplicateJob(id))) if id == "0001"
    ));
}

#[test]
fn test_missing_dependency_rejected() {
    let result = PlaybookLoader::new().load_str(
        "jobs:\n  deploy:\n    needs: build\n",
        "missing.yaml",
    );
    match result {
        Err(EngineError::Configuration(ConfigurationError::MissingDependency { job, dependency })) => {
            assert_eq!(job, "deploy");
            assert_eq!(dependency, "build");
        }
        other => panic!("expected missing dependency, got {:?}", other),
    }
}

#[test]
fn test_empty_matrix_dimension_rejected() {
    let result = PlaybookLoader::new().load_str(
        "stages:\n  - jobs:\n      - id: \"0001\"\n        matrix:\n          os: []\n",
        "empty.yaml",
    );
    assert!(matches!(
        result,
        Err(EngineError::Configuration(ConfigurationError::EmptyMatrixDimension { .. }))
    ));
}

#[test]
fn test_cycle_rejected_with_path() {
    let err = PlaybookLoader::new()
        .load_str(cyclic_playbook(), "cyclic.yaml")
        .unwrap_err();

    match &err {
        EngineError::Scheduling(SchedulingError::Cycle { path }) => {
            assert_eq!(path, &vec!["A", "C", "B", "A"]);
        }
        other => panic!("expected cycle, got {:?}", other),
    }
    assert!(err.to_string().contains("A -> C -> B -> A"));
}

#[test]
fn test_unrecognized_document() {
    let result = PlaybookLoader::new().load_str("name: nothing\n", "odd.yaml");
    assert!(matches!(
        result,
        Err(EngineError::Configuration(ConfigurationError::UnrecognizedFormat(_)))
    ));
}

#[test]
fn test_engine_config_load() {
    let dir = create_test_dir();
    let path = write_engine_config(
        dir.path(),
        r#"
max_concurrency: 8
fail_fast: true
timeout: 30
success_criteria:
  requireAllSuccess: false
variables:
  channel: beta
"#,
    );

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.max_concurrency, 8);
    assert!(config.fail_fast);
    assert_eq!(config.timeout, Some(30));
    assert!(!config.success_criteria.require_all_success);
    assert_eq!(config.variables["channel"], Value::from("beta"));
    assert_eq!(config.cache_dir, std::path::PathBuf::from(".playbook-cache"));
}

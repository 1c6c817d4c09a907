#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use playbook_engine::EngineConfig;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_playbook(dir: &Path, filename: &str, content: &str) -> PathBuf {
    let path = dir.join(filename);
    fs::write(&path, content).expect("Failed to write playbook file");
    path
}

pub fn write_engine_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("engine.yaml");
    fs::write(&path, content).expect("Failed to write engine.yaml");
    path
}

/// Write an executable shell script into `dir/scripts`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let scripts = dir.join("scripts");
    fs::create_dir_all(&scripts).expect("Failed to create scripts dir");
    let path = scripts.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}

/// Config rooted entirely inside `dir`
pub fn engine_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        scripts_dir: dir.join("scripts"),
        playbooks_dir: dir.join("playbooks"),
        cache_dir: dir.join("cache"),
        output_dir: dir.join("out"),
        ..EngineConfig::default()
    }
}

pub fn legacy_playbook(ids: &[&str]) -> String {
    let ids = ids
        .iter()
        .map(|id| format!("\"{}\"", id))
        .collect::<Vec<_>>()
        .join(", ");
    format!("name: legacy\nscripts: [{}]\n", ids)
}

pub fn staged_playbook() -> &'static str {
    r#"
name: nightly
description: Nightly regression
variables:
  channel: stable
successCriteria:
  requireAllSuccess: false
  minimumSuccessPercent: 50
stages:
  - name: setup
    jobs: ["0001"]
  - name: test
    jobs:
      - id: "0002"
        matrix:
          os: [linux, mac]
      - "0003"
  - name: teardown
    jobs: ["0004"]
"#
}

/// A,B independent; C needs both; D needs C; E matrixed and independent
pub fn graph_playbook() -> &'static str {
    r#"
name: graph
jobs:
  A: {}
  B: {}
  C:
    needs: [A, B]
  D:
    needs: C
  E:
    strategy:
      matrix:
        d1: [a, b]
        d2: [x, y, z]
"#
}

pub fn cyclic_playbook() -> &'static str {
    r#"
name: cyclic
stages:
  - jobs:
      - id: A
        depends_on: [C]
      - id: B
        depends_on: [A]
      - id: C
        depends_on: [B]
"#
}

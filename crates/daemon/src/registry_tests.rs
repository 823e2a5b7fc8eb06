// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use pa_core::LogRecord;
use tempfile::tempdir;

fn registry(projects_dir: &Path, max_projects: usize) -> ProjectRegistry {
    let execution = ExecutionConfig { max_projects, ..ExecutionConfig::default() };
    ProjectRegistry::new(projects_dir.to_path_buf(), &execution)
}

/// Temp workspace with a data dir and a separate dir of project roots.
fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let temp = tempdir().unwrap();
    let projects_dir = temp.path().join("data").join("projects");
    let roots = temp.path().join("roots");
    std::fs::create_dir_all(&roots).unwrap();
    (temp, projects_dir, roots)
}

fn make_root(roots: &Path, name: &str) -> String {
    let root = roots.join(name);
    std::fs::create_dir_all(&root).unwrap();
    root.display().to_string()
}

#[test]
fn create_registers_and_persists() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let root = make_root(&roots, "p1");

    let project = registry.create(&root).unwrap();

    assert_eq!(project.state(), ProjectState::Idle);
    assert_eq!(project.session_id(), "");
    assert!(project.dir().join("metadata.json").exists());
    assert!(project.dir().join("logs").exists());
    assert_eq!(registry.count(), 1);
}

#[test]
fn create_rejects_nested_path() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let root = make_root(&roots, "p1");
    let nested = make_root(&roots, "p1/sub");

    registry.create(&root).unwrap();
    let err = registry.create(&nested).unwrap_err();
    assert!(matches!(err, ServerError::ProjectNesting(_)));
}

#[test]
fn create_rejects_duplicate_path() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let root = make_root(&roots, "p1");

    registry.create(&root).unwrap();
    let err = registry.create(&root).unwrap_err();
    assert!(matches!(err, ServerError::ProjectNesting(_)));
}

#[test]
fn create_enforces_project_ceiling() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 2);

    registry.create(&make_root(&roots, "a")).unwrap();
    registry.create(&make_root(&roots, "b")).unwrap();
    let err = registry.create(&make_root(&roots, "c")).unwrap_err();
    assert!(matches!(err, ServerError::ProjectLimit(2)));
}

#[test]
fn create_then_delete_restores_prior_state() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let root = make_root(&roots, "p1");

    let before: Vec<_> = registry.list().into_iter().map(|s| s.path).collect();
    let project = registry.create(&root).unwrap();
    registry.delete(&project.id).unwrap();

    let after: Vec<_> = registry.list().into_iter().map(|s| s.path).collect();
    assert_eq!(before, after);
    assert!(!project.dir().exists());

    // The path is registerable again.
    registry.create(&root).unwrap();
}

#[test]
fn delete_refused_while_executing() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let project = registry.create(&make_root(&roots, "p1")).unwrap();

    project.begin_execution().unwrap();
    let err = registry.delete(&project.id).unwrap_err();
    assert!(matches!(err, ServerError::ProcessActive));

    // After the execution completes the same delete succeeds.
    project.transition(ProjectState::Idle, None).unwrap();
    registry.delete(&project.id).unwrap();
}

#[test]
fn delete_unknown_project_is_not_found() {
    let (_temp, projects_dir, _roots) = setup();
    let registry = registry(&projects_dir, 10);

    let err = registry.delete(&ProjectId::from_string("prj-ghost")).unwrap_err();
    assert!(matches!(err, ServerError::ProjectNotFound(_)));
}

#[test]
fn begin_execution_serializes() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let project = registry.create(&make_root(&roots, "p1")).unwrap();

    project.begin_execution().unwrap();
    let err = project.begin_execution().unwrap_err();
    assert!(matches!(err, ServerError::ProcessActive));
}

#[test]
fn begin_execution_allowed_from_error_state() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let project = registry.create(&make_root(&roots, "p1")).unwrap();

    project.begin_execution().unwrap();
    project.transition(ProjectState::Error, Some("agent died".into())).unwrap();
    assert_eq!(project.snapshot().error_details.as_deref(), Some("agent died"));

    let snap = project.begin_execution().unwrap();
    assert_eq!(snap.state, ProjectState::Executing);
    assert_eq!(snap.error_details, None);
}

#[test]
fn illegal_transition_is_rejected() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let project = registry.create(&make_root(&roots, "p1")).unwrap();

    // IDLE -> ERROR is not a legal edge.
    let err = project.transition(ProjectState::Error, None).unwrap_err();
    assert!(matches!(err, ServerError::Internal(_)));
    assert_eq!(project.state(), ProjectState::Idle);
}

#[test]
fn update_session_persists_across_recovery() {
    let (_temp, projects_dir, roots) = setup();
    let root = make_root(&roots, "p1");

    let id = {
        let registry = registry(&projects_dir, 10);
        let project = registry.create(&root).unwrap();
        registry.update_session(&project.id, "sess-42".to_string()).unwrap();
        project.log.append(&LogRecord::prompt("hello")).unwrap();
        project.id.clone()
    };

    let fresh = registry(&projects_dir, 10);
    fresh.recover().unwrap();

    let project = fresh.get(&id).unwrap();
    assert_eq!(project.session_id(), "sess-42");
    assert_eq!(project.state(), ProjectState::Idle);
    assert_eq!(project.log.since(0, None).unwrap().len(), 1);
}

#[test]
fn recovery_skips_corrupt_metadata() {
    let (_temp, projects_dir, roots) = setup();
    {
        let registry = registry(&projects_dir, 10);
        registry.create(&make_root(&roots, "good")).unwrap();
    }
    let bad_dir = projects_dir.join("prj-corrupt");
    std::fs::create_dir_all(&bad_dir).unwrap();
    std::fs::write(bad_dir.join("metadata.json"), b"{ nope").unwrap();

    let fresh = registry(&projects_dir, 10);
    let loaded = fresh.recover().unwrap();
    assert_eq!(loaded, 1);
    assert_eq!(fresh.count(), 1);
}

#[test]
fn list_survives_restart() {
    let (_temp, projects_dir, roots) = setup();
    let before = {
        let registry = registry(&projects_dir, 10);
        registry.create(&make_root(&roots, "a")).unwrap();
        registry.create(&make_root(&roots, "b")).unwrap();
        registry.list()
    };

    let fresh = registry(&projects_dir, 10);
    fresh.recover().unwrap();
    let after = fresh.list();

    let before_paths: Vec<_> = before.iter().map(|s| s.path.clone()).collect();
    let after_paths: Vec<_> = after.iter().map(|s| s.path.clone()).collect();
    assert_eq!(before_paths, after_paths);
}

#[test]
fn get_by_path_finds_project() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let root = make_root(&roots, "p1");
    let created = registry.create(&root).unwrap();

    let found = registry.get_by_path(Path::new(&root)).unwrap();
    assert_eq!(found.id, created.id);
}

#[test]
fn reset_session_clears_token_and_error() {
    let (_temp, projects_dir, roots) = setup();
    let registry = registry(&projects_dir, 10);
    let project = registry.create(&make_root(&roots, "p1")).unwrap();

    registry.update_session(&project.id, "sess-1".to_string()).unwrap();
    project.begin_execution().unwrap();
    project.transition(ProjectState::Error, Some("boom".into())).unwrap();

    let snap = registry.reset_session(&project.id).unwrap();
    assert_eq!(snap.session_id, "");
    assert_eq!(snap.state, ProjectState::Idle);
    assert_eq!(snap.error_details, None);
}

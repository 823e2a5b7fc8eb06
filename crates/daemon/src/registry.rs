// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project registry: the single process-wide map of live projects.
//!
//! All mutating operations take the registry write lock; reads return
//! deep-copied snapshots so callers never alias live state. Each project
//! carries its own mutex for state mutation, acquired strictly after the
//! registry lock (never the other way around).

use crate::config::ExecutionConfig;
use pa_core::{clock, ProjectId, ProjectMeta, ProjectSnapshot, ProjectState, ServerError};
use pa_storage::{load_metadata, write_metadata, LogConfig, MessageLog};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Subdirectory of a project dir holding its message log.
const LOGS_DIR: &str = "logs";

/// Mutable part of a project, guarded by the per-project mutex.
#[derive(Debug, Clone)]
struct Dynamic {
    state: ProjectState,
    session_id: String,
    last_active_ms: u64,
    error_details: Option<String>,
}

/// A live project: immutable identity plus mutex-guarded dynamic state
/// and the owned message log.
#[derive(Debug)]
pub struct Project {
    pub id: ProjectId,
    pub path: PathBuf,
    pub created_at_ms: u64,
    pub log: MessageLog,
    dir: PathBuf,
    dynamic: Mutex<Dynamic>,
}

impl Project {
    fn new(id: ProjectId, path: PathBuf, dir: PathBuf, log: MessageLog) -> Self {
        let now = clock::now_ms();
        Self {
            id,
            path,
            created_at_ms: now,
            log,
            dir,
            dynamic: Mutex::new(Dynamic {
                state: ProjectState::Idle,
                session_id: String::new(),
                last_active_ms: now,
                error_details: None,
            }),
        }
    }

    /// Reconstruct from persisted metadata. State is always IDLE after a
    /// restart, whatever was recorded before a crash.
    fn from_meta(meta: ProjectMeta, dir: PathBuf, log: MessageLog) -> Self {
        Self {
            id: meta.id,
            path: meta.path,
            created_at_ms: meta.created_at_ms,
            log,
            dir,
            dynamic: Mutex::new(Dynamic {
                state: ProjectState::Idle,
                session_id: meta.session_id,
                last_active_ms: meta.last_active_ms,
                error_details: None,
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> ProjectState {
        self.dynamic.lock().state
    }

    pub fn session_id(&self) -> String {
        self.dynamic.lock().session_id.clone()
    }

    /// Deep-copied view for wire payloads and listings.
    pub fn snapshot(&self) -> ProjectSnapshot {
        let dynamic = self.dynamic.lock();
        self.snapshot_locked(&dynamic)
    }

    fn snapshot_locked(&self, dynamic: &Dynamic) -> ProjectSnapshot {
        ProjectSnapshot {
            id: self.id.clone(),
            path: self.path.clone(),
            state: dynamic.state,
            session_id: dynamic.session_id.clone(),
            created_at_ms: self.created_at_ms,
            last_active_ms: dynamic.last_active_ms,
            error_details: dynamic.error_details.clone(),
        }
    }

    fn meta(&self) -> ProjectMeta {
        let dynamic = self.dynamic.lock();
        ProjectMeta {
            id: self.id.clone(),
            path: self.path.clone(),
            session_id: dynamic.session_id.clone(),
            created_at_ms: self.created_at_ms,
            last_active_ms: dynamic.last_active_ms,
        }
    }

    /// Atomically check IDLE/ERROR and move to EXECUTING.
    ///
    /// This check-and-set is the per-project execution serializer.
    pub(crate) fn begin_execution(&self) -> Result<ProjectSnapshot, ServerError> {
        let mut dynamic = self.dynamic.lock();
        if dynamic.state == ProjectState::Executing {
            return Err(ServerError::ProcessActive);
        }
        dynamic.state = ProjectState::Executing;
        dynamic.error_details = None;
        dynamic.last_active_ms = clock::now_ms();
        Ok(self.snapshot_locked(&dynamic))
    }

    /// Apply a state transition, enforcing machine legality.
    ///
    /// An illegal transition is an internal invariant violation: logged,
    /// state left untouched.
    pub(crate) fn transition(
        &self,
        next: ProjectState,
        error_details: Option<String>,
    ) -> Result<ProjectSnapshot, ServerError> {
        let mut dynamic = self.dynamic.lock();
        if !dynamic.state.can_transition_to(next) {
            warn!(
                project = %self.id,
                from = %dynamic.state,
                to = %next,
                "illegal state transition attempted"
            );
            return Err(ServerError::Internal(format!(
                "illegal transition {} -> {}",
                dynamic.state, next
            )));
        }
        dynamic.state = next;
        dynamic.error_details = error_details;
        dynamic.last_active_ms = clock::now_ms();
        Ok(self.snapshot_locked(&dynamic))
    }

    fn set_session_id(&self, session_id: String) {
        let mut dynamic = self.dynamic.lock();
        dynamic.session_id = session_id;
        dynamic.last_active_ms = clock::now_ms();
    }
}

/// The registry of live projects.
pub struct ProjectRegistry {
    projects_dir: PathBuf,
    max_projects: usize,
    log_config: LogConfig,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<ProjectId, Arc<Project>>,
    by_path: HashMap<PathBuf, ProjectId>,
}

impl ProjectRegistry {
    pub fn new(projects_dir: PathBuf, execution: &ExecutionConfig) -> Self {
        Self {
            projects_dir,
            max_projects: execution.max_projects,
            log_config: LogConfig {
                max_size_bytes: execution.max_log_size,
                max_records: execution.max_messages_per_log,
            },
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Load persisted projects from `<data_dir>/projects/*/metadata.json`.
    ///
    /// Corrupt or unreadable entries are skipped with a log line; they
    /// never prevent startup.
    pub fn recover(&self) -> Result<usize, ServerError> {
        std::fs::create_dir_all(&self.projects_dir)?;

        let mut loaded = 0usize;
        for entry in std::fs::read_dir(&self.projects_dir)? {
            let entry = entry?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }

            let meta = match load_metadata(&dir) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping project with unreadable metadata");
                    continue;
                }
            };
            let log = match MessageLog::open(dir.join(LOGS_DIR), self.log_config) {
                Ok(log) => log,
                Err(e) => {
                    warn!(project = %meta.id, error = %e, "skipping project with unopenable log");
                    continue;
                }
            };

            let project = Arc::new(Project::from_meta(meta, dir, log));
            let mut inner = self.inner.write();
            inner.by_path.insert(project.path.clone(), project.id.clone());
            inner.by_id.insert(project.id.clone(), project);
            loaded += 1;
        }

        info!(projects = loaded, "registry recovered");
        Ok(loaded)
    }

    /// Register a new project rooted at `raw_path`.
    pub fn create(&self, raw_path: &str) -> Result<Arc<Project>, ServerError> {
        let mut inner = self.inner.write();

        if inner.by_id.len() >= self.max_projects {
            return Err(ServerError::ProjectLimit(self.max_projects));
        }

        let registered: Vec<PathBuf> = inner.by_path.keys().cloned().collect();
        let path = pa_core::validate_project_path(raw_path, &registered)?;

        let id = ProjectId::generate();
        let dir = self.projects_dir.join(id.as_str());
        let log = MessageLog::open(dir.join(LOGS_DIR), self.log_config)
            .map_err(|e| ServerError::Internal(format!("failed to open log: {e}")))?;

        let project = Arc::new(Project::new(id, path, dir, log));
        if let Err(e) = write_metadata(project.dir(), &project.meta()) {
            let _ = std::fs::remove_dir_all(project.dir());
            return Err(ServerError::Internal(format!("failed to persist metadata: {e}")));
        }

        inner.by_path.insert(project.path.clone(), project.id.clone());
        inner.by_id.insert(project.id.clone(), Arc::clone(&project));
        Ok(project)
    }

    /// Remove a project. Refused while an execution is running.
    pub fn delete(&self, id: &ProjectId) -> Result<(), ServerError> {
        let project = {
            let mut inner = self.inner.write();
            let project = inner
                .by_id
                .get(id)
                .ok_or_else(|| ServerError::ProjectNotFound(id.to_string()))?;
            if project.state() == ProjectState::Executing {
                return Err(ServerError::ProcessActive);
            }
            let project = inner.by_id.remove(id).ok_or_else(|| {
                ServerError::ProjectNotFound(id.to_string())
            })?;
            inner.by_path.remove(&project.path);
            project
        };

        // The log closes when the last Arc drops; directory removal works
        // regardless of open handles on POSIX.
        std::fs::remove_dir_all(project.dir())
            .map_err(|e| ServerError::Internal(format!("failed to remove project dir: {e}")))?;
        info!(project = %id, path = %project.path.display(), "project deleted");
        Ok(())
    }

    pub fn get(&self, id: &ProjectId) -> Result<Arc<Project>, ServerError> {
        self.inner
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::ProjectNotFound(id.to_string()))
    }

    // NOTE(compat): path-keyed lookup half of the index; exercised in tests
    #[allow(dead_code)]
    pub fn get_by_path(&self, path: &Path) -> Result<Arc<Project>, ServerError> {
        let inner = self.inner.read();
        let id = inner
            .by_path
            .get(path)
            .ok_or_else(|| ServerError::ProjectNotFound(path.display().to_string()))?;
        inner
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::ProjectNotFound(id.to_string()))
    }

    /// Snapshot of every live project, ordered by creation time.
    pub fn list(&self) -> Vec<ProjectSnapshot> {
        let mut snapshots: Vec<ProjectSnapshot> =
            self.inner.read().by_id.values().map(|p| p.snapshot()).collect();
        snapshots.sort_by_key(|s| (s.created_at_ms, s.id.to_string()));
        snapshots
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Record the agent-reported session id and persist metadata.
    pub fn update_session(
        &self,
        id: &ProjectId,
        session_id: String,
    ) -> Result<ProjectSnapshot, ServerError> {
        let project = self.get(id)?;
        project.set_session_id(session_id);
        self.persist(&project)?;
        Ok(project.snapshot())
    }

    /// `agent_new_session`: clear the continuation token and, from ERROR,
    /// reset to IDLE.
    pub fn reset_session(&self, id: &ProjectId) -> Result<ProjectSnapshot, ServerError> {
        let project = self.get(id)?;
        project.set_session_id(String::new());
        if project.state() == ProjectState::Error {
            project.transition(ProjectState::Idle, None)?;
        }
        self.persist(&project)?;
        Ok(project.snapshot())
    }

    /// Write the project's metadata file (temp file + rename).
    pub fn persist(&self, project: &Project) -> Result<(), ServerError> {
        write_metadata(project.dir(), &project.meta())
            .map_err(|e| ServerError::Internal(format!("failed to persist metadata: {e}")))
    }

    /// Persist without failing the caller; used on non-critical paths.
    pub fn persist_quiet(&self, project: &Project) {
        if let Err(e) = self.persist(project) {
            warn!(project = %project.id, error = %e, "metadata persist failed");
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

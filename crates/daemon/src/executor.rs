// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-project serialized execution of the agent subprocess.
//!
//! One execution: spawn `<binary> -p <prompt> [-c <session_id>]` in its
//! own process group with the project path as working directory, stream
//! stdout as newline-delimited JSON (log + broadcast each object), and
//! enforce the command timeout. The child is reaped on every termination
//! path; stdout arriving after the termination decision is dropped so
//! nothing is broadcast after the terminal state event.

use crate::broadcast::Broadcaster;
use crate::registry::{Project, ProjectRegistry};
use pa_core::{ClientId, LogRecord, ProjectId, ProjectState, ServerError};
use pa_wire::{ErrorBody, ErrorCode, Outbound};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lines of stderr retained for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Executor settings, fixed at startup.
pub(crate) struct ExecutorConfig {
    pub binary: PathBuf,
    pub timeout: Duration,
    /// Grace window between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
}

/// Runs agent subprocesses; at most one per project at any instant.
pub(crate) struct Executor {
    config: ExecutorConfig,
    registry: Arc<ProjectRegistry>,
    broadcaster: Arc<Broadcaster>,
    /// Kill tokens for in-flight executions, keyed by project.
    running: Mutex<HashMap<ProjectId, CancellationToken>>,
    shutdown: CancellationToken,
}

/// How an execution ended.
enum Outcome {
    Completed { session_id: Option<String> },
    TimedOut,
    Killed { reason: &'static str },
    Failed { details: String },
}

/// Why the stream loop stopped.
enum StreamEnd {
    Eof,
    Timeout,
    Killed { reason: &'static str },
    ReadFailed(String),
}

impl Executor {
    pub fn new(
        config: ExecutorConfig,
        registry: Arc<ProjectRegistry>,
        broadcaster: Arc<Broadcaster>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            broadcaster,
            running: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Start an execution for `project`.
    ///
    /// Fails with `ProcessActive` when one is already running. The prompt
    /// record is appended to the log before the subprocess is spawned; an
    /// append failure aborts the execution before any broadcast.
    pub fn execute(
        self: &Arc<Self>,
        project: Arc<Project>,
        prompt: String,
        requester: ClientId,
    ) -> Result<(), ServerError> {
        let snapshot = project.begin_execution()?;

        if let Err(e) = project.log.append(&LogRecord::prompt(&prompt)) {
            let _ = project.transition(ProjectState::Idle, None);
            return Err(ServerError::Internal(format!("failed to record prompt: {e}")));
        }
        self.registry.persist_quiet(&project);

        self.broadcaster.send_execution_event(
            &project.id,
            &requester,
            &Outbound::project_state(&snapshot),
        );

        let kill = CancellationToken::new();
        self.running.lock().insert(project.id.clone(), kill.clone());

        info!(project = %project.id, "execution started");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(project, prompt, requester, kill).await;
        });
        Ok(())
    }

    /// Cancel the running execution for a project.
    pub fn kill(&self, project_id: &ProjectId) -> Result<(), ServerError> {
        match self.running.lock().get(project_id) {
            Some(token) => {
                info!(project = %project_id, "execution kill requested");
                token.cancel();
                Ok(())
            }
            None => Err(ServerError::InvalidMessage(
                "no active execution for project".to_string(),
            )),
        }
    }

    pub fn active_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Shutdown drain: wait up to `window` for in-flight executions, then
    /// cancel the rest and wait for their process groups to be reaped.
    pub async fn drain(&self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        while self.active_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.active_count() > 0 {
            info!(active = self.active_count(), "drain window elapsed, killing executions");
            let tokens: Vec<CancellationToken> =
                self.running.lock().values().cloned().collect();
            for token in tokens {
                token.cancel();
            }
            // Termination takes at most the grace window plus reaping.
            let hard_deadline =
                tokio::time::Instant::now() + self.config.kill_grace + Duration::from_secs(2);
            while self.active_count() > 0 && tokio::time::Instant::now() < hard_deadline {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    /// Drive one execution to its terminal state and emit the closing
    /// events. Runs as its own task.
    async fn run(
        &self,
        project: Arc<Project>,
        prompt: String,
        requester: ClientId,
        kill: CancellationToken,
    ) {
        let outcome = self.run_child(&project, &prompt, &kill).await;
        self.running.lock().remove(&project.id);

        match outcome {
            Outcome::Completed { session_id } => {
                if let Some(session_id) = session_id {
                    if let Err(e) = self.registry.update_session(&project.id, session_id) {
                        warn!(project = %project.id, error = %e, "session update failed");
                    }
                }
                self.finish(&project, &requester, ProjectState::Idle, None, None);
                info!(project = %project.id, "execution completed");
            }
            Outcome::TimedOut => {
                let secs = self.config.timeout.as_secs();
                let error = ErrorBody::new(
                    ErrorCode::ExecutionTimeout,
                    format!("execution timed out after {secs}s"),
                );
                self.finish(&project, &requester, ProjectState::Idle, None, Some(error));
                warn!(project = %project.id, timeout_secs = secs, "execution timed out");
            }
            Outcome::Killed { reason } => {
                let error = ErrorBody::new(ErrorCode::ExecutionFailed, reason);
                self.finish(&project, &requester, ProjectState::Idle, None, Some(error));
                info!(project = %project.id, reason, "execution cancelled");
            }
            Outcome::Failed { details } => {
                let error = ErrorBody::new(ErrorCode::ExecutionFailed, details.clone());
                self.finish(
                    &project,
                    &requester,
                    ProjectState::Error,
                    Some(details.clone()),
                    Some(error),
                );
                warn!(project = %project.id, details, "execution failed");
            }
        }
    }

    /// Emit the error event (if any) followed by the terminal state
    /// event, in that order, then persist metadata.
    fn finish(
        &self,
        project: &Arc<Project>,
        requester: &ClientId,
        state: ProjectState,
        error_details: Option<String>,
        error: Option<ErrorBody>,
    ) {
        if let Some(body) = error {
            let msg = Outbound::error_body(body, Some(&project.id));
            self.broadcaster.send_execution_event(&project.id, requester, &msg);
        }

        match project.transition(state, error_details) {
            Ok(snapshot) => {
                self.registry.persist_quiet(project);
                self.broadcaster.send_execution_event(
                    &project.id,
                    requester,
                    &Outbound::project_state(&snapshot),
                );
            }
            Err(e) => warn!(project = %project.id, error = %e, "terminal transition failed"),
        }
    }

    /// Spawn the child and stream stdout until EOF, timeout, kill, or a
    /// read failure, then reap it.
    async fn run_child(
        &self,
        project: &Arc<Project>,
        prompt: &str,
        kill: &CancellationToken,
    ) -> Outcome {
        let session_id = project.session_id();

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-p").arg(prompt);
        if !session_id.is_empty() {
            cmd.arg("-c").arg(&session_id);
        }
        cmd.current_dir(&project.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so signals reach the whole tree.
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Outcome::Failed {
                    details: format!(
                        "failed to spawn {}: {e}",
                        self.config.binary.display()
                    ),
                }
            }
        };
        let pid = child.id();

        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail: Vec<String> = Vec::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line = %line, "agent stderr");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
                tail.join("\n")
            })
        });

        let deadline = tokio::time::Instant::now() + self.config.timeout;
        let (ended, new_session) = match child.stdout.take() {
            Some(stdout) => self.stream_stdout(project, stdout, deadline, kill).await,
            None => (StreamEnd::ReadFailed("stdout unavailable".to_string()), None),
        };

        match ended {
            StreamEnd::Eof => {
                // Pipe closed; the child should exit promptly. The overall
                // deadline still bounds the wait.
                match tokio::time::timeout_at(deadline, child.wait()).await {
                    Ok(Ok(status)) if status.success() => {
                        Outcome::Completed { session_id: new_session }
                    }
                    Ok(Ok(status)) => {
                        // Bounded wait: a grandchild holding the stderr
                        // pipe open must not stall the terminal events.
                        let stderr = match stderr_tail {
                            Some(task) => tokio::time::timeout(Duration::from_secs(2), task)
                                .await
                                .ok()
                                .and_then(|r| r.ok())
                                .unwrap_or_default(),
                            None => String::new(),
                        };
                        let mut details = format!("agent exited with {status}");
                        if !stderr.is_empty() {
                            details.push_str(": ");
                            details.push_str(&stderr);
                        }
                        Outcome::Failed { details }
                    }
                    Ok(Err(e)) => Outcome::Failed { details: format!("wait failed: {e}") },
                    Err(_) => {
                        self.terminate(&mut child, pid).await;
                        Outcome::TimedOut
                    }
                }
            }
            StreamEnd::Timeout => {
                self.terminate(&mut child, pid).await;
                Outcome::TimedOut
            }
            StreamEnd::Killed { reason } => {
                self.terminate(&mut child, pid).await;
                Outcome::Killed { reason }
            }
            StreamEnd::ReadFailed(details) => {
                self.terminate(&mut child, pid).await;
                Outcome::Failed { details }
            }
        }
    }

    /// Stream stdout lines until something ends the execution.
    ///
    /// Returns the reason and the last agent-reported session id seen.
    /// Dropping the reader here closes our end of the pipe, so any output
    /// after the decision is discarded rather than broadcast late.
    async fn stream_stdout(
        &self,
        project: &Arc<Project>,
        stdout: tokio::process::ChildStdout,
        deadline: tokio::time::Instant,
        kill: &CancellationToken,
    ) -> (StreamEnd, Option<String>) {
        let mut lines = BufReader::new(stdout).lines();
        let mut new_session: Option<String> = None;

        let ended = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(&line) {
                            Ok(value) => {
                                if let Some(sid) =
                                    value.get("session_id").and_then(|v| v.as_str())
                                {
                                    if !sid.is_empty() {
                                        new_session = Some(sid.to_string());
                                    }
                                }
                                if let Err(e) =
                                    project.log.append(&LogRecord::agent_message(value.clone()))
                                {
                                    warn!(project = %project.id, error = %e, "agent message log append failed");
                                }
                                self.broadcaster.send_to_project(
                                    &project.id,
                                    &Outbound::agent_message(&project.id, value),
                                );
                            }
                            Err(e) => {
                                warn!(project = %project.id, error = %e, "malformed agent output line");
                            }
                        }
                    }
                    Ok(None) => break StreamEnd::Eof,
                    Err(e) => break StreamEnd::ReadFailed(format!("stdout read failed: {e}")),
                },
                _ = tokio::time::sleep_until(deadline) => break StreamEnd::Timeout,
                _ = kill.cancelled() => break StreamEnd::Killed { reason: "execution cancelled by client" },
                _ = self.shutdown.cancelled() => break StreamEnd::Killed { reason: "server shutting down" },
            }
        };

        (ended, new_session)
    }

    /// SIGTERM the process group, wait out the grace window, then SIGKILL
    /// and reap.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM);

        match tokio::time::timeout(self.config.kill_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                if pid.is_none() {
                    let _ = child.kill().await;
                }
                let _ = child.wait().await;
            }
        }
    }
}

/// Signal an entire process group; no-op if the child already exited.
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) {
    if let Some(pid) = pid {
        let _ = nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pid as i32), signal);
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

//! Session controller.
//!
//! Sequences init, plan, apply and state refresh against one workdir. At most
//! one external command runs at a time; a request made while an operation is
//! in flight is rejected with [`TfPilotError::Busy`]. Progress is published as
//! [`SessionSnapshot`]s on a watch channel and raw tool output on a broadcast
//! channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};
use tokio::sync::{broadcast, watch, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::commands::ToolCommands;
use super::context::SessionContext;
use crate::changeset::{digest_bytes, ChangeSet, ChangeSetParser};
use crate::error::{Result, TfPilotError};
use crate::runner::{
    CancelHandle, CommandRunner, CompletedRun, Invocation, OutputLine, RunHandle, StreamKind,
};
use crate::state::{ResourceIndex, StateIndexer};

/// Capacity of the output broadcast channel.
const OUTPUT_BROADCAST_CAPACITY: usize = 1024;

/// Which output lines of an invocation reach output subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forward {
    All,
    /// Stdout is a structured document consumed by a parser.
    StderrOnly,
}

/// What the controller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Ready for the next operation.
    Idle,
    /// Running `init`.
    Initializing,
    /// Running `plan` and reading the structured plan.
    Planning,
    /// Running `apply`.
    Applying,
    /// Reading recorded state.
    Refreshing,
    /// The last operation failed. Accepts new operations like `Idle`.
    Failed,
}

/// Result of an operation that may be cancelled by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran to completion.
    Completed(T),
    /// The operator cancelled the running command.
    Cancelled,
}

/// Point-in-time view of the session for presentation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Current status.
    pub status: SessionStatus,
    /// Session workdir.
    pub workdir: PathBuf,
    /// Selected variable files.
    pub var_files: Vec<PathBuf>,
    /// Change set of the last successful plan.
    pub change_set: Option<Arc<ChangeSet>>,
    /// Whether that change set has been applied.
    pub consumed: bool,
    /// Last state index.
    pub index: Option<Arc<ResourceIndex>>,
    /// Message of the error that moved the session to `Failed`.
    pub last_error: Option<String>,
    /// When this snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

/// Drives the provisioning tool for one workdir.
pub struct SessionController<R: CommandRunner> {
    runner: R,
    commands: ToolCommands,
    parser: ChangeSetParser,
    indexer: StateIndexer,
    context: Mutex<SessionContext>,
    active: std::sync::Mutex<Option<CancelHandle>>,
    snapshots: watch::Sender<SessionSnapshot>,
    output: broadcast::Sender<OutputLine>,
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The completed value, if any.
    #[must_use]
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }
}

impl SessionStatus {
    /// Returns true while an operation is running.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        !matches!(self, Self::Idle | Self::Failed)
    }
}

impl SessionSnapshot {
    fn capture(context: &SessionContext, status: SessionStatus, last_error: Option<String>) -> Self {
        Self {
            status,
            workdir: context.workdir.clone(),
            var_files: context.var_files.clone(),
            change_set: context.last_change_set.clone(),
            consumed: context.last_change_set_consumed,
            index: context.last_index.clone(),
            last_error,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if an apply would currently be accepted, ignoring the
    /// on-disk artifact check.
    #[must_use]
    pub fn can_apply(&self) -> bool {
        self.change_set.is_some() && !self.consumed && !self.status.is_busy()
    }
}

impl<R: CommandRunner> SessionController<R> {
    /// Creates a controller over `context`.
    pub fn new(runner: R, commands: ToolCommands, context: SessionContext) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::capture(
            &context,
            SessionStatus::Idle,
            None,
        ));
        let (output, _) = broadcast::channel(OUTPUT_BROADCAST_CAPACITY);
        Self {
            runner,
            commands,
            parser: ChangeSetParser::new(),
            indexer: StateIndexer::new(),
            context: Mutex::new(context),
            active: std::sync::Mutex::new(None),
            snapshots,
            output,
        }
    }

    /// Subscribes to session snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Subscribes to output lines of the running command.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<OutputLine> {
        self.output.subscribe()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.snapshots.borrow().status
    }

    /// Runs `init` in the workdir.
    ///
    /// # Errors
    ///
    /// Returns [`TfPilotError::Busy`] if another operation is running,
    /// [`TfPilotError::Spawn`] if the tool cannot be started and
    /// [`TfPilotError::ProcessExit`] if it exits non-zero.
    pub async fn initialize(&self) -> Result<Outcome<CompletedRun>> {
        let context = self.acquire("initialize")?;
        info!("Initializing {}", context.workdir.display());
        self.publish(&context, SessionStatus::Initializing, None);

        let invocation = self.commands.init(&context.workdir);
        let result = self.run_checked(invocation, Forward::All).await;
        self.finish(&context, "initialize", result)
    }

    /// Plans with the given variable files and replaces the current change set.
    ///
    /// The previous change set and variable file selection are kept if any
    /// step fails or the plan is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TfPilotError::Busy`], [`TfPilotError::Spawn`],
    /// [`TfPilotError::ProcessExit`] or [`TfPilotError::Parse`] if the
    /// structured plan cannot be read.
    pub async fn plan(&self, var_files: Vec<PathBuf>) -> Result<Outcome<Arc<ChangeSet>>> {
        let mut context = self.acquire("plan")?;
        info!(
            "Planning {} with {} variable files",
            context.workdir.display(),
            var_files.len()
        );
        self.publish(&context, SessionStatus::Planning, None);

        let result = self.run_plan(&mut context, var_files).await;
        self.finish(&context, "plan", result)
    }

    /// Applies the saved plan artifact.
    ///
    /// # Errors
    ///
    /// Returns [`TfPilotError::StalePlan`] without running anything if there
    /// is no plan, it was already applied, or the artifact changed since it
    /// was reviewed. Otherwise the same errors as [`Self::initialize`].
    pub async fn apply(&self) -> Result<Outcome<CompletedRun>> {
        let mut context = self.acquire("apply")?;
        self.ensure_fresh(&context).await?;

        info!("Applying plan in {}", context.workdir.display());
        self.publish(&context, SessionStatus::Applying, None);

        let invocation = self.commands.apply(&context.workdir);
        let result = match self.start(&invocation).await {
            Ok(handle) => {
                context.last_change_set_consumed = true;
                self.publish(&context, SessionStatus::Applying, None);
                let run = self.drain(handle, Forward::All).await;
                Self::check_run(&invocation, run)
            }
            Err(e) => Err(e),
        };
        self.finish(&context, "apply", result)
    }

    /// Reads recorded state and replaces the current index.
    ///
    /// # Errors
    ///
    /// Returns [`TfPilotError::Busy`], [`TfPilotError::Spawn`],
    /// [`TfPilotError::ProcessExit`] or [`TfPilotError::Parse`].
    pub async fn refresh_state(&self) -> Result<Outcome<Arc<ResourceIndex>>> {
        let mut context = self.acquire("refresh_state")?;
        info!("Reading state of {}", context.workdir.display());
        self.publish(&context, SessionStatus::Refreshing, None);

        let result = self.run_refresh(&mut context).await;
        self.finish(&context, "refresh_state", result)
    }

    /// Cancels the running command. Returns false if none is running.
    pub fn cancel(&self) -> bool {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match active {
            Some(handle) => {
                info!("Cancellation requested");
                handle.cancel();
                true
            }
            None => {
                debug!("Cancel requested with no command running");
                false
            }
        }
    }

    async fn run_plan(
        &self,
        context: &mut SessionContext,
        var_files: Vec<PathBuf>,
    ) -> Result<Outcome<Arc<ChangeSet>>> {
        let plan = self.commands.plan(&context.workdir, &var_files);
        if self.run_checked(plan, Forward::All).await?.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let show = self.commands.show_plan(&context.workdir);
        let Outcome::Completed(shown) = self.run_checked(show, Forward::StderrOnly).await? else {
            return Ok(Outcome::Cancelled);
        };

        let change_set = Arc::new(self.parser.parse(&shown.stdout_text())?);
        let artifact = tokio::fs::read(self.commands.artifact_path(&context.workdir)).await?;

        context.var_files = var_files;
        context.artifact_digest = Some(digest_bytes(&artifact));
        context.last_change_set = Some(Arc::clone(&change_set));
        context.last_change_set_consumed = false;

        info!("{} (signature {})", change_set.summary, change_set.signature);
        Ok(Outcome::Completed(change_set))
    }

    async fn run_refresh(
        &self,
        context: &mut SessionContext,
    ) -> Result<Outcome<Arc<ResourceIndex>>> {
        let show = self.commands.show_state(&context.workdir);
        let Outcome::Completed(shown) = self.run_checked(show, Forward::StderrOnly).await? else {
            return Ok(Outcome::Cancelled);
        };

        let index = Arc::new(self.indexer.index(&shown.stdout_text())?);
        context.last_index = Some(Arc::clone(&index));

        info!("State holds {} resources", index.len());
        Ok(Outcome::Completed(index))
    }

    /// Rejects an apply whose plan is missing, consumed or changed on disk.
    async fn ensure_fresh(&self, context: &SessionContext) -> Result<()> {
        if let Some(reason) = context.stale_reason() {
            warn!("Apply refused: {reason}");
            return Err(TfPilotError::stale_plan(reason));
        }

        let path = self.commands.artifact_path(&context.workdir);
        let current = match tokio::fs::read(&path).await {
            Ok(bytes) => digest_bytes(&bytes),
            Err(e) => {
                let reason = format!("plan artifact {} is unreadable: {e}", path.display());
                warn!("Apply refused: {reason}");
                return Err(TfPilotError::stale_plan(reason));
            }
        };

        if context.artifact_digest.as_deref() != Some(current.as_str()) {
            let reason = format!(
                "plan artifact {} changed since it was reviewed; run plan again",
                path.display()
            );
            warn!("Apply refused: {reason}");
            return Err(TfPilotError::stale_plan(reason));
        }
        Ok(())
    }

    fn acquire(&self, operation: &str) -> Result<MutexGuard<'_, SessionContext>> {
        self.context.try_lock().map_err(|_| {
            warn!("Rejected {operation}: another operation is running");
            TfPilotError::Busy {
                operation: operation.to_string(),
            }
        })
    }

    /// Runs one invocation to completion and maps a non-zero exit to an error.
    async fn run_checked(
        &self,
        invocation: Invocation,
        forward: Forward,
    ) -> Result<Outcome<CompletedRun>> {
        let handle = self.start(&invocation).await?;
        let run = self.drain(handle, forward).await;
        Self::check_run(&invocation, run)
    }

    async fn start(&self, invocation: &Invocation) -> Result<RunHandle> {
        info!("Running: {}", invocation.command_line());
        let handle = self.runner.run(invocation).await?;
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.canceller());
        Ok(handle)
    }

    async fn drain(&self, handle: RunHandle, forward: Forward) -> CompletedRun {
        let output = self.output.clone();
        let run = handle
            .collect(move |line| {
                if forward == Forward::All || line.stream == StreamKind::Stderr {
                    // No subscribers is fine.
                    let _ = output.send(line.clone());
                }
            })
            .await;
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
        run
    }

    fn check_run(invocation: &Invocation, run: CompletedRun) -> Result<Outcome<CompletedRun>> {
        if run.was_cancelled() {
            info!("{} cancelled", invocation.command_line());
            return Ok(Outcome::Cancelled);
        }
        if !run.succeeded() {
            warn!(
                "{} exited with {:?}",
                invocation.command_line(),
                run.exit_code()
            );
            return Err(TfPilotError::process_exit(
                invocation.command_line(),
                run.exit_code(),
                &run.stderr,
            ));
        }
        debug!(
            "{} succeeded ({} stdout lines)",
            invocation.command_line(),
            run.stdout.len()
        );
        Ok(Outcome::Completed(run))
    }

    /// Publishes the resting status for an operation result.
    fn finish<T>(
        &self,
        context: &SessionContext,
        operation: &str,
        result: Result<Outcome<T>>,
    ) -> Result<Outcome<T>> {
        match &result {
            Ok(Outcome::Completed(_)) => {
                info!("{operation} completed");
                self.publish(context, SessionStatus::Idle, None);
            }
            Ok(Outcome::Cancelled) => {
                info!("{operation} cancelled");
                self.publish(context, SessionStatus::Idle, None);
            }
            Err(e) => {
                error!("{operation} failed: {e}");
                self.publish(context, SessionStatus::Failed, Some(e.to_string()));
            }
        }
        result
    }

    fn publish(&self, context: &SessionContext, status: SessionStatus, last_error: Option<String>) {
        self.snapshots
            .send_replace(SessionSnapshot::capture(context, status, last_error));
    }
}

impl<R: CommandRunner> std::fmt::Debug for SessionController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("commands", &self.commands)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunEvent, RunOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Scripted response to one invocation.
    #[derive(Debug, Clone)]
    struct Step {
        stdout: Vec<String>,
        stderr: Vec<String>,
        outcome: RunOutcome,
        artifact: Option<Vec<u8>>,
        wait_for_cancel: bool,
        spawn_error: bool,
    }

    impl Step {
        fn ok() -> Self {
            Self {
                stdout: Vec::new(),
                stderr: Vec::new(),
                outcome: RunOutcome::Exited { code: Some(0) },
                artifact: None,
                wait_for_cancel: false,
                spawn_error: false,
            }
        }

        fn stdout(mut self, text: &str) -> Self {
            self.stdout = text.lines().map(str::to_string).collect();
            self
        }

        fn stderr(mut self, text: &str) -> Self {
            self.stderr = text.lines().map(str::to_string).collect();
            self
        }

        fn exit(mut self, code: i32, stderr: &str) -> Self {
            self.outcome = RunOutcome::Exited { code: Some(code) };
            self.stderr = vec![stderr.to_string()];
            self
        }

        fn writes_artifact(mut self, bytes: &[u8]) -> Self {
            self.artifact = Some(bytes.to_vec());
            self
        }

        fn hangs(mut self) -> Self {
            self.wait_for_cancel = true;
            self
        }

        fn spawn_fails(mut self) -> Self {
            self.spawn_error = true;
            self
        }
    }

    #[derive(Debug, Default)]
    struct ScriptedRunner {
        steps: std::sync::Mutex<VecDeque<Step>>,
        calls: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self {
                steps: std::sync::Mutex::new(steps.into_iter().collect()),
                calls: std::sync::Mutex::default(),
            }
        }

        fn subcommands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|args| args.first().cloned().unwrap_or_default())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, invocation: &Invocation) -> Result<RunHandle> {
            self.calls.lock().unwrap().push(invocation.args.clone());
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected invocation");

            if step.spawn_error {
                return Err(TfPilotError::Spawn {
                    program: invocation.program.clone(),
                    reason: "executable not found on the search path".into(),
                });
            }
            if let Some(bytes) = &step.artifact {
                let out = invocation
                    .args
                    .iter()
                    .find_map(|a| a.strip_prefix("-out="))
                    .expect("plan without -out");
                std::fs::write(invocation.workdir.join(out), bytes).unwrap();
            }

            let (tx, rx) = mpsc::channel(16);
            let (cancel, mut cancelled) = CancelHandle::channel();
            tokio::spawn(async move {
                for text in step.stdout {
                    let line = OutputLine { stream: StreamKind::Stdout, text };
                    let _ = tx.send(RunEvent::Output(line)).await;
                }
                for text in step.stderr {
                    let line = OutputLine { stream: StreamKind::Stderr, text };
                    let _ = tx.send(RunEvent::Output(line)).await;
                }
                let outcome = if step.wait_for_cancel {
                    let _ = cancelled.wait_for(|c| *c).await;
                    RunOutcome::Cancelled
                } else {
                    step.outcome
                };
                let _ = tx.send(RunEvent::Finished(outcome)).await;
            });
            Ok(RunHandle::new(
                invocation.id,
                invocation.command_line(),
                rx,
                cancel,
            ))
        }
    }

    fn plan_json() -> String {
        json!({
            "format_version": "1.2",
            "resource_changes": [
                {
                    "address": "aws_s3_bucket.logs",
                    "mode": "managed",
                    "type": "aws_s3_bucket",
                    "name": "logs",
                    "change": {"actions": ["create"], "before": null, "after": {"bucket": "logs"}}
                },
                {
                    "address": "module.net.aws_vpc.main",
                    "mode": "managed",
                    "type": "aws_vpc",
                    "name": "main",
                    "change": {
                        "actions": ["update"],
                        "before": {"cidr_block": "10.0.0.0/16"},
                        "after": {"cidr_block": "10.1.0.0/16"}
                    }
                }
            ]
        })
        .to_string()
    }

    fn state_json() -> String {
        json!({"values": {"root_module": {"resources": [
            {"address": "aws_s3_bucket.logs", "type": "aws_s3_bucket", "name": "logs", "values": {}}
        ]}}})
        .to_string()
    }

    fn plan_steps() -> [Step; 2] {
        [
            Step::ok().writes_artifact(b"artifact-1"),
            Step::ok().stdout(&plan_json()),
        ]
    }

    fn controller(dir: &TempDir, steps: Vec<Step>) -> SessionController<ScriptedRunner> {
        SessionController::new(
            ScriptedRunner::new(steps),
            ToolCommands::new("terraform", "tfplan.out"),
            SessionContext::new(dir.path()),
        )
    }

    #[tokio::test]
    async fn test_apply_without_plan_is_stale() {
        let dir = TempDir::new().unwrap();
        let session = controller(&dir, vec![]);

        let err = session.apply().await.unwrap_err();
        assert!(matches!(err, TfPilotError::StalePlan { .. }));
        assert!(err.is_operator_error());
        assert!(session.runner.subcommands().is_empty());
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_plan_then_apply_once() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().stdout("Apply complete!"));
        let session = controller(&dir, steps);

        let change_set = session
            .plan(vec![])
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(change_set.summary.create, 1);
        assert_eq!(change_set.summary.update, 1);
        assert!(session.snapshot().can_apply());

        let run = session.apply().await.unwrap().completed().unwrap();
        assert_eq!(run.stdout, vec!["Apply complete!"]);
        assert!(session.snapshot().consumed);

        let err = session.apply().await.unwrap_err();
        assert!(matches!(err, TfPilotError::StalePlan { .. }));
        assert_eq!(session.runner.subcommands(), vec!["plan", "show", "apply"]);
    }

    #[tokio::test]
    async fn test_failed_apply_still_consumes_plan() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().exit(1, "Error: partial apply"));
        let session = controller(&dir, steps);

        session.plan(vec![]).await.unwrap();
        let err = session.apply().await.unwrap_err();
        assert!(err.to_string().contains("partial apply"));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(snapshot.consumed);
        assert!(matches!(
            session.apply().await.unwrap_err(),
            TfPilotError::StalePlan { .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_spawn_failure_keeps_plan() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().spawn_fails());
        steps.push(Step::ok());
        let session = controller(&dir, steps);

        session.plan(vec![]).await.unwrap();
        let err = session.apply().await.unwrap_err();
        assert!(matches!(err, TfPilotError::Spawn { .. }));
        assert!(!session.snapshot().consumed);

        assert!(session.apply().await.unwrap().completed().is_some());
    }

    #[tokio::test]
    async fn test_modified_artifact_is_stale() {
        let dir = TempDir::new().unwrap();
        let session = controller(&dir, plan_steps().to_vec());

        session.plan(vec![]).await.unwrap();
        std::fs::write(dir.path().join("tfplan.out"), b"tampered").unwrap();

        let err = session.apply().await.unwrap_err();
        assert!(err.to_string().contains("changed since it was reviewed"));
        assert_eq!(session.runner.subcommands(), vec!["plan", "show"]);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_plan() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().writes_artifact(b"artifact-2"));
        steps.push(Step::ok().stdout("{\"resource_changes\": 7}"));
        let session = controller(&dir, steps);

        let first = session.plan(vec![]).await.unwrap().completed().unwrap();
        let err = session.plan(vec![]).await.unwrap_err();
        assert!(matches!(err, TfPilotError::Parse(_)));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert!(snapshot.last_error.is_some());
        let kept = snapshot.change_set.unwrap();
        assert_eq!(kept.signature, first.signature);

        // The artifact on disk now belongs to the failed plan.
        assert!(matches!(
            session.apply().await.unwrap_err(),
            TfPilotError::StalePlan { .. }
        ));
    }

    #[tokio::test]
    async fn test_init_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let session = controller(&dir, vec![Step::ok().exit(1, "Error: Failed to query provider")]);

        let err = session.initialize().await.unwrap_err();
        match &err {
            TfPilotError::ProcessExit { code, stderr, .. } => {
                assert_eq!(*code, Some(1));
                assert!(stderr.contains("Failed to query provider"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.status(), SessionStatus::Failed);
        assert!(session.snapshot().change_set.is_none());
    }

    #[tokio::test]
    async fn test_plan_passes_var_files() {
        let dir = TempDir::new().unwrap();
        let session = controller(&dir, plan_steps().to_vec());

        session
            .plan(vec![PathBuf::from("prod.tfvars")])
            .await
            .unwrap();
        let calls = session.runner.calls.lock().unwrap().clone();
        assert!(calls[0].contains(&"-var-file=prod.tfvars".to_string()));
        assert_eq!(session.snapshot().var_files, vec![PathBuf::from("prod.tfvars")]);
    }

    #[tokio::test]
    async fn test_busy_and_cancel() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(controller(&dir, vec![Step::ok().hangs()]));
        let mut snapshots = session.subscribe();

        let running = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.initialize().await })
        };
        snapshots
            .wait_for(|s| s.status == SessionStatus::Initializing)
            .await
            .unwrap();

        let err = session.refresh_state().await.unwrap_err();
        assert!(matches!(err, TfPilotError::Busy { .. }));

        // The handle is registered right after the status change.
        let mut cancelled = false;
        for _ in 0..50 {
            if session.cancel() {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cancelled);

        let outcome = running.await.unwrap().unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn test_refresh_state_forwards_only_stderr() {
        let dir = TempDir::new().unwrap();
        let session = controller(
            &dir,
            vec![Step::ok().stdout(&state_json()).stderr("Warning: provider deprecated")],
        );
        let mut output = session.subscribe_output();

        let index = session.refresh_state().await.unwrap().completed().unwrap();
        assert_eq!(index.len(), 1);
        assert!(session.snapshot().index.is_some());

        let line = output.try_recv().unwrap();
        assert_eq!(line.stream, StreamKind::Stderr);
        assert_eq!(line.text, "Warning: provider deprecated");
        assert!(output.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_plan_output_stream_skips_plan_document() {
        let dir = TempDir::new().unwrap();
        let session = controller(
            &dir,
            vec![
                Step::ok()
                    .stdout("Plan: 1 to add, 1 to change, 0 to destroy.")
                    .writes_artifact(b"artifact-1"),
                Step::ok().stdout(&plan_json()),
            ],
        );
        let mut output = session.subscribe_output();

        session.plan(vec![]).await.unwrap();

        let mut lines = Vec::new();
        while let Ok(line) = output.try_recv() {
            lines.push(line.text);
        }
        assert_eq!(lines, vec!["Plan: 1 to add, 1 to change, 0 to destroy."]);
    }

    #[tokio::test]
    async fn test_plan_spawn_failure_keeps_session_state() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().spawn_fails());
        steps.push(Step::ok());
        let session = controller(&dir, steps);

        let first = session
            .plan(vec![PathBuf::from("dev.tfvars")])
            .await
            .unwrap()
            .completed()
            .unwrap();
        let err = session
            .plan(vec![PathBuf::from("prod.tfvars")])
            .await
            .unwrap_err();
        assert!(matches!(err, TfPilotError::Spawn { .. }));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert_eq!(snapshot.var_files, vec![PathBuf::from("dev.tfvars")]);
        assert_eq!(snapshot.change_set.unwrap().signature, first.signature);
        assert!(!snapshot.consumed);

        // The reviewed artifact is untouched, so it can still be applied.
        assert!(session.apply().await.unwrap().completed().is_some());
    }

    #[tokio::test]
    async fn test_first_plan_spawn_failure_leaves_no_selection() {
        let dir = TempDir::new().unwrap();
        let session = controller(&dir, vec![Step::ok().spawn_fails()]);

        let err = session
            .plan(vec![PathBuf::from("prod.tfvars")])
            .await
            .unwrap_err();
        assert!(matches!(err, TfPilotError::Spawn { .. }));

        let snapshot = session.snapshot();
        assert!(snapshot.var_files.is_empty());
        assert!(snapshot.change_set.is_none());
    }

    #[tokio::test]
    async fn test_plan_exit_failure_keeps_session_state() {
        let dir = TempDir::new().unwrap();
        let mut steps = plan_steps().to_vec();
        steps.push(Step::ok().exit(1, "Error: Invalid value for variable"));
        steps.push(Step::ok());
        let session = controller(&dir, steps);

        let first = session
            .plan(vec![PathBuf::from("dev.tfvars")])
            .await
            .unwrap()
            .completed()
            .unwrap();
        let err = session
            .plan(vec![PathBuf::from("broken.tfvars")])
            .await
            .unwrap_err();
        assert!(matches!(err, TfPilotError::ProcessExit { code: Some(1), .. }));
        assert!(err.to_string().contains("Invalid value for variable"));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.var_files, vec![PathBuf::from("dev.tfvars")]);
        assert_eq!(snapshot.change_set.unwrap().signature, first.signature);
        assert!(!snapshot.consumed);
        assert_eq!(session.runner.subcommands(), vec!["plan", "show", "plan"]);

        assert!(session.apply().await.unwrap().completed().is_some());
    }

    #[tokio::test]
    async fn test_failed_status_accepts_new_operations() {
        let dir = TempDir::new().unwrap();
        let session = controller(
            &dir,
            vec![Step::ok().exit(2, "boom"), Step::ok().stdout("Terraform initialized")],
        );

        assert!(session.initialize().await.is_err());
        assert_eq!(session.status(), SessionStatus::Failed);

        assert!(session.initialize().await.is_ok());
        let snapshot = session.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(snapshot.last_error.is_none());
    }
}

//! Subprocess runner with streamed output and cooperative cancellation.
//!
//! Each invocation is supervised by a set of tokio tasks: one reader per
//! output stream feeding a bounded channel, and a supervisor that waits for
//! either process exit or a cancellation request. The supervisor emits the
//! terminal record only after both readers have finished, so it is always the
//! last event of the stream.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, TfPilotError};

use super::types::{CompletedRun, Invocation, OutputLine, RunEvent, RunOutcome, StreamKind};

/// Default time between the termination signal and the force kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default capacity of the event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How long readers may keep draining pipes once the child is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can start external commands.
///
/// The session controller only talks to this trait, so tests can substitute a
/// scripted implementation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Starts the invocation and returns a handle to its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`TfPilotError::Spawn`] if the process cannot be started.
    async fn run(&self, invocation: &Invocation) -> Result<RunHandle>;
}

/// Requests cancellation of a running invocation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Consumer side of one invocation.
#[derive(Debug)]
pub struct RunHandle {
    /// Invocation identifier.
    id: Uuid,
    /// Rendered command line.
    command_line: String,
    /// Event stream.
    events: mpsc::Receiver<RunEvent>,
    /// Cancellation trigger.
    cancel: CancelHandle,
    /// Whether the terminal record has been seen.
    finished: bool,
}

/// Runner backed by real OS processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace_period: Duration,
    channel_capacity: usize,
}

impl CancelHandle {
    /// Creates a trigger and the receiver a supervisor should watch.
    #[must_use]
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl RunHandle {
    /// Wraps an event receiver.
    #[must_use]
    pub const fn new(
        id: Uuid,
        command_line: String,
        events: mpsc::Receiver<RunEvent>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            id,
            command_line,
            events,
            cancel,
            finished: false,
        }
    }

    /// Invocation identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Rendered command line.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns a handle that cancels this invocation.
    #[must_use]
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Receives the next event, or `None` after the terminal record.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        if matches!(event, Some(RunEvent::Finished(_)) | None) {
            self.finished = true;
        }
        event
    }

    /// Drains the stream, handing each line to `on_line` as it arrives.
    pub async fn collect<F>(mut self, mut on_line: F) -> CompletedRun
    where
        F: FnMut(&OutputLine) + Send,
    {
        let mut run = CompletedRun::default();
        while let Some(event) = self.next_event().await {
            match event {
                RunEvent::Output(line) => {
                    on_line(&line);
                    match line.stream {
                        StreamKind::Stdout => run.stdout.push(line.text),
                        StreamKind::Stderr => run.stderr.push(line.text),
                    }
                }
                RunEvent::Finished(outcome) => {
                    run.outcome = Some(outcome);
                }
            }
        }
        if run.outcome.is_none() {
            warn!(id = %self.id, "event stream closed without a terminal record");
        }
        run
    }
}

impl ProcessRunner {
    /// Creates a runner with default grace period and channel capacity.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Sets the time allowed between the termination signal and the force kill.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Sets the capacity of the event channel.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Returns the configured grace period.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    fn spawn_child(invocation: &Invocation) -> Result<Child> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.workdir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            let reason = match e.kind() {
                std::io::ErrorKind::NotFound => {
                    String::from("executable not found on the search path")
                }
                std::io::ErrorKind::PermissionDenied => String::from("permission denied"),
                _ => e.to_string(),
            };
            TfPilotError::Spawn {
                program: invocation.program.clone(),
                reason,
            }
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<RunHandle> {
        let workdir_ok = tokio::fs::metadata(&invocation.workdir)
            .await
            .is_ok_and(|m| m.is_dir());
        if !workdir_ok {
            return Err(TfPilotError::Spawn {
                program: invocation.program.clone(),
                reason: format!(
                    "working directory {} does not exist",
                    invocation.workdir.display()
                ),
            });
        }

        let mut child = Self::spawn_child(invocation)?;
        info!(
            id = %invocation.id,
            pid = ?child.id(),
            "Started: {}",
            invocation.command_line()
        );

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (cancel, cancel_rx) = CancelHandle::channel();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tx.clone()));
        }

        tokio::spawn(supervise(
            child,
            cancel_rx,
            readers,
            tx,
            self.grace_period,
            invocation.id,
        ));

        Ok(RunHandle::new(
            invocation.id,
            invocation.command_line(),
            rx,
            cancel,
        ))
    }
}

/// What woke the supervisor up.
enum Wake {
    Exited(std::io::Result<ExitStatus>),
    CancelRequested,
}

async fn supervise(
    mut child: Child,
    mut cancel_rx: watch::Receiver<bool>,
    readers: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<RunEvent>,
    grace_period: Duration,
    id: Uuid,
) {
    // A dropped trigger means nobody is listening anymore; treat it as a cancel.
    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        () = cancel_requested(&mut cancel_rx) => Wake::CancelRequested,
    };

    let outcome = match wake {
        Wake::Exited(Ok(status)) => {
            debug!(%id, code = ?status.code(), "process exited");
            RunOutcome::Exited {
                code: status.code(),
            }
        }
        Wake::Exited(Err(e)) => {
            warn!(%id, "failed to wait for process: {e}");
            RunOutcome::Exited { code: None }
        }
        Wake::CancelRequested => {
            info!(%id, "Cancellation requested, terminating process");
            terminate(&mut child, grace_period, id).await;
            RunOutcome::Cancelled
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            debug!(%id, "output reader still blocked after exit, aborting");
            reader.abort();
        }
    }

    if tx.send(RunEvent::Finished(outcome)).await.is_err() {
        debug!(%id, "event consumer went away before the terminal record");
    }
}

async fn cancel_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

/// Sends a termination signal, waits for the grace period, then force-kills.
async fn terminate(child: &mut Child, grace_period: Duration, id: Uuid) {
    if send_terminate(child) {
        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(%id, code = ?status.code(), "process stopped after termination signal");
                return;
            }
            Ok(Err(e)) => warn!(%id, "failed to wait for process: {e}"),
            Err(_) => warn!(
                %id,
                grace_secs = grace_period.as_secs_f64(),
                "process ignored termination signal, killing"
            ),
        }
    }

    if let Err(e) = child.kill().await {
        warn!(%id, "failed to kill process: {e}");
    }
}

/// Asks the child to stop with SIGTERM. Returns false if no signal could be
/// delivered.
#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, "failed to send SIGTERM: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
const fn send_terminate(_child: &Child) -> bool {
    false
}

fn spawn_reader<R>(reader: R, stream: StreamKind, tx: mpsc::Sender<RunEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = decode_line(&buf);
                    if tx
                        .send(RunEvent::Output(OutputLine { stream, text }))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!("read error on {stream}: {e}");
                    break;
                }
            }
        }
    })
}

fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(&[0x66, 0xff, 0x0a]), "f\u{fffd}");
    }

    #[test]
    fn test_cancel_handle() {
        let (handle, rx) = CancelHandle::channel();
        assert!(!handle.is_cancelled());
        handle.clone().cancel();
        assert!(handle.is_cancelled());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_missing_workdir_is_spawn_error() {
        let runner = ProcessRunner::new();
        let inv = Invocation::new("sh", "/definitely/not/a/dir");
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, TfPilotError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();
        let inv = Invocation::new("tfpilot-no-such-binary-here", dir.path());
        let err = runner.run(&inv).await.unwrap_err();
        match err {
            TfPilotError::Spawn { program, reason } => {
                assert_eq!(program, "tfpilot-no-such-binary-here");
                assert!(reason.contains("not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_output_then_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new();
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("echo one; echo two; echo oops 1>&2; exit 3");
        let mut handle = runner.run(&inv).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }

        assert_eq!(
            events.last(),
            Some(&RunEvent::Finished(RunOutcome::Exited { code: Some(3) }))
        );
        let stdout: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Output(line) if line.stream == StreamKind::Stdout => {
                    Some(line.text.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(stdout, vec!["one", "two"]);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Output(OutputLine { stream: StreamKind::Stderr, text }) if text == "oops"
        )));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, RunEvent::Finished(_)))
                .count(),
            1
        );
        assert!(handle.next_event().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_and_workdir_passed_to_child() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let runner = ProcessRunner::new();
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("echo \"$TFPILOT_TEST_VALUE\"; cat marker.txt")
            .envs([("TFPILOT_TEST_VALUE", "from-env")]);

        let run = runner.run(&inv).await.unwrap().collect(|_| {}).await;
        assert!(run.succeeded());
        assert_eq!(run.stdout, vec!["from-env", "here"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new().with_grace_period(Duration::from_secs(2));
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("echo started; exec sleep 30");
        let mut handle = runner.run(&inv).await.unwrap();

        let first = handle.next_event().await;
        assert!(matches!(first, Some(RunEvent::Output(ref l)) if l.text == "started"));

        let started = Instant::now();
        handle.canceller().cancel();
        let run = handle.collect(|_| {}).await;

        assert_eq!(run.outcome, Some(RunOutcome::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_delivers_sigterm_to_child() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new().with_grace_period(Duration::from_secs(5));
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("trap 'echo got-term; exit 0' TERM; echo ready; while true; do sleep 1; done");
        let mut handle = runner.run(&inv).await.unwrap();
        let _ = handle.next_event().await;

        handle.canceller().cancel();
        let run = handle.collect(|_| {}).await;

        assert!(run.was_cancelled());
        assert!(run.stdout.iter().any(|l| l == "got-term"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_force_kills_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new().with_grace_period(Duration::from_millis(200));
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("trap '' TERM; echo ready; while true; do sleep 1; done");
        let mut handle = runner.run(&inv).await.unwrap();
        let _ = handle.next_event().await;

        let started = Instant::now();
        handle.canceller().cancel();
        let run = handle.collect(|_| {}).await;

        assert!(run.was_cancelled());
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collect_forwards_lines() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new().with_channel_capacity(1);
        let inv = Invocation::new("sh", dir.path())
            .arg("-c")
            .arg("for i in 1 2 3 4 5; do echo line$i; done");

        let mut seen = Vec::new();
        let run = runner
            .run(&inv)
            .await
            .unwrap()
            .collect(|line| seen.push(line.text.clone()))
            .await;

        assert!(run.succeeded());
        assert_eq!(seen.len(), 5);
        assert_eq!(run.stdout_text(), "line1\nline2\nline3\nline4\nline5");
    }
}

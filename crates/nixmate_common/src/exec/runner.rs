//! Process supervision: spawn, stream, time out, terminate, roll back

use super::{
    CancelSignal, ExecutionLimits, ExecutionResult, ExecutionState, RollbackOutcome, RunOptions,
};
use crate::command::{profile_generation, Command, OperationKind, RollbackCommand};
use crate::config::Elevation;
use crate::error::{ErrorKind, NixmateError};
use crate::progress::{PhasePercentTable, ProgressEvent, ProgressEventKind, ProgressMonitor};
use crate::safety::SafetyValidator;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{geteuid, Pid};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long to keep reading after exit while a grandchild holds the pipes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

enum StreamMsg {
    Line(Stream, String),
    Overflow(Stream),
    Closed,
}

/// Why the monitor loop stopped
#[derive(Debug)]
enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Stuck,
    Overflow(Stream),
    Cancelled,
    WaitFailed(String),
}

struct ProcessRun {
    ending: Ending,
    pid: Option<u32>,
    stdout: String,
    stderr: String,
    monitor: ProgressMonitor,
    duration: Duration,
}

/// Runs validated commands. Holds no per-execution state.
#[derive(Debug, Clone)]
pub struct Executor {
    validator: Arc<SafetyValidator>,
    elevation: Elevation,
    phase_table: PhasePercentTable,
}

impl Executor {
    pub fn new(validator: Arc<SafetyValidator>) -> Self {
        Self {
            validator,
            elevation: Elevation::Sudo,
            phase_table: PhasePercentTable::default(),
        }
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_phase_table(mut self, table: PhasePercentTable) -> Self {
        self.phase_table = table;
        self
    }

    pub fn validator(&self) -> &SafetyValidator {
        &self.validator
    }

    /// Validate, run and, on failure or timeout, roll back one command.
    ///
    /// Returns `ValidationFailed` without spawning anything when the safety
    /// validator rejects the command.
    pub async fn execute(
        &self,
        command: &Command,
        limits: &ExecutionLimits,
        options: RunOptions,
    ) -> Result<ExecutionResult, NixmateError> {
        let execution_id = Uuid::new_v4().to_string();

        let verdict = self.validator.validate_command(command);
        if !verdict.is_safe {
            warn!(
                "Blocked {}: {}",
                command.text(),
                verdict.reason.as_deref().unwrap_or("unsafe")
            );
            return Err(NixmateError::ValidationFailed {
                reason: verdict.reason.unwrap_or_else(|| "unsafe command".to_string()),
                suggestion: verdict.suggestion,
            });
        }

        let (program, argv, elevated_with) = self.spawn_target(command);

        if options.dry_run {
            info!("Dry run: {}", command.text());
            let monitor = ProgressMonitor::new(&execution_id, self.phase_table.clone(), Instant::now());
            return Ok(ExecutionResult {
                execution_id,
                command_text: command.text(),
                elevated_with,
                state: ExecutionState::Completed,
                success: true,
                exit_code: None,
                pid: None,
                output: String::new(),
                stderr: String::new(),
                error_kind: None,
                error: None,
                duration_ms: 0,
                timeout_ms: limits.budget.as_millis() as u64,
                progress: monitor.snapshot(),
                rollback_performed: false,
                rollback: None,
                dry_run: true,
            });
        }

        let RunOptions {
            progress, cancel, ..
        } = options;

        // Generation the guarded profile points at before the run
        let generation_before = command
            .rollback
            .as_ref()
            .and_then(|rb| rb.profile.as_deref())
            .map(profile_generation);

        let run = self
            .run_process(&execution_id, &program, &argv, limits, &progress, cancel)
            .await?;
        let mut result = finish(execution_id, command, elevated_with, limits, run);

        let wants_rollback = result
            .error_kind
            .map(|k| k.attempts_rollback())
            .unwrap_or(false);
        if wants_rollback && command.operation != OperationKind::Rollback {
            if let Some(rollback) = &command.rollback {
                let unmoved = match (&rollback.profile, &generation_before) {
                    (Some(profile), Some(before)) => profile_generation(profile) == *before,
                    _ => false,
                };
                if unmoved {
                    info!(
                        "{} left its profile untouched, skipping {}",
                        command.text(),
                        rollback.text()
                    );
                } else {
                    let (outcome, performed) = self
                        .run_rollback(&result.execution_id, rollback, limits, &progress)
                        .await;
                    result.rollback_performed = performed;
                    result.rollback = Some(outcome);
                }
            }
        }

        Ok(result)
    }

    /// Program and argv actually spawned, with the elevation wrapper applied
    fn spawn_target(&self, command: &Command) -> (String, Vec<String>, Option<String>) {
        if command.requires_elevation && !geteuid().is_root() {
            if let Some(wrapper) = self.elevation.program() {
                let mut argv = Vec::with_capacity(command.argv.len() + 2);
                argv.push("-n".to_string());
                argv.push(command.program.clone());
                argv.extend(command.argv.iter().cloned());
                return (wrapper.to_string(), argv, Some(wrapper.to_string()));
            }
        }
        (command.program.clone(), command.argv.clone(), None)
    }

    async fn run_rollback(
        &self,
        execution_id: &str,
        rollback: &RollbackCommand,
        limits: &ExecutionLimits,
        progress: &Option<mpsc::Sender<ProgressEvent>>,
    ) -> (RollbackOutcome, bool) {
        let command = rollback.to_command();
        let command_text = command.text();

        // Rollbacks pass the same gate as everything else
        let verdict = self.validator.validate_command(&command);
        if !verdict.is_safe {
            let reason = verdict.reason.unwrap_or_else(|| "unsafe command".to_string());
            warn!("Rollback {} blocked: {}", command_text, reason);
            return (
                RollbackOutcome {
                    command_text,
                    description: rollback.description.clone(),
                    success: false,
                    output: format!("blocked: {}", reason),
                },
                false,
            );
        }

        warn!("Rolling back: {}", command_text);
        emit(
            progress,
            ProgressEvent {
                execution_id: execution_id.to_string(),
                kind: ProgressEventKind::RollingBack,
                phase: crate::progress::Phase::Starting,
                percent: None,
                message: rollback.description.clone(),
                elapsed_ms: 0,
            },
        );

        let mut rb_limits = limits.clone();
        rb_limits.budget = limits.rollback_budget;
        rb_limits.inactivity = limits.inactivity.min(limits.rollback_budget / 4);

        let (program, argv, _) = self.spawn_target(&command);
        let rollback_id = format!("{}-rollback", execution_id);
        match self
            .run_process(&rollback_id, &program, &argv, &rb_limits, progress, None)
            .await
        {
            Ok(run) => {
                let success = matches!(run.ending, Ending::Exited(status) if status.success());
                if success {
                    info!("Rollback succeeded: {}", command_text);
                } else {
                    warn!("Rollback failed: {} ({:?})", command_text, run.ending);
                }
                let output = join_output(&run.stdout, &run.stderr);
                (
                    RollbackOutcome {
                        command_text,
                        description: rollback.description.clone(),
                        success,
                        output,
                    },
                    true,
                )
            }
            Err(e) => {
                warn!("Rollback could not start: {}", e);
                (
                    RollbackOutcome {
                        command_text,
                        description: rollback.description.clone(),
                        success: false,
                        output: e.to_string(),
                    },
                    false,
                )
            }
        }
    }

    async fn run_process(
        &self,
        execution_id: &str,
        program: &str,
        argv: &[String],
        limits: &ExecutionLimits,
        progress: &Option<mpsc::Sender<ProgressEvent>>,
        mut cancel: Option<CancelSignal>,
    ) -> Result<ProcessRun, NixmateError> {
        let mut child = tokio::process::Command::new(program)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| NixmateError::ExecutionFailed {
                exit_code: None,
                message: format!("failed to start {}: {}", program, e),
            })?;

        let pid = child.id();
        let started = Instant::now();
        info!("Spawned {} (pid {:?}, budget {}ms)", program, pid, limits.budget.as_millis());

        let mut monitor = ProgressMonitor::new(execution_id, self.phase_table.clone(), started);
        let (tx, mut rx) = mpsc::channel::<StreamMsg>(256);
        let mut open_streams = 0u8;
        if let Some(out) = child.stdout.take() {
            spawn_reader(Stream::Stdout, out, limits.max_buffer_bytes, tx.clone());
            open_streams += 1;
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(Stream::Stderr, err, limits.max_buffer_bytes, tx.clone());
            open_streams += 1;
        }
        drop(tx);

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut deadline = started + limits.budget;
        let mut exit_status: Option<ExitStatus> = None;
        let mut drain_until: Option<Instant> = None;
        let mut ticker = tokio::time::interval(limits.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ending = loop {
            if let Some(status) = exit_status {
                if open_streams == 0 {
                    break Ending::Exited(status);
                }
            }

            tokio::select! {
                msg = rx.recv(), if open_streams > 0 => match msg {
                    Some(StreamMsg::Line(stream, line)) => {
                        let buf = match stream {
                            Stream::Stdout => &mut stdout,
                            Stream::Stderr => &mut stderr,
                        };
                        buf.push_str(&line);
                        buf.push('\n');
                        if let Some(event) = monitor.observe(&line, Instant::now()) {
                            debug!("[{}] {} {:?}", event.phase, event.message, event.percent);
                            emit(progress, event);
                        }
                    }
                    Some(StreamMsg::Overflow(stream)) => {
                        warn!("{} exceeded {} bytes, terminating {}", stream.as_str(), limits.max_buffer_bytes, program);
                        if exit_status.is_none() {
                            terminate(&mut child, pid, limits.term_grace).await;
                        }
                        break Ending::Overflow(stream);
                    }
                    Some(StreamMsg::Closed) => open_streams = open_streams.saturating_sub(1),
                    None => open_streams = 0,
                },
                status = child.wait(), if exit_status.is_none() => match status {
                    Ok(status) => {
                        exit_status = Some(status);
                        drain_until = Some(Instant::now() + DRAIN_TIMEOUT);
                    }
                    Err(e) => break Ending::WaitFailed(e.to_string()),
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if let Some(status) = exit_status {
                        if drain_until.map(|d| now >= d).unwrap_or(false) {
                            break Ending::Exited(status);
                        }
                        continue;
                    }

                    if monitor.since_activity(now) >= limits.inactivity {
                        if let Some(event) = monitor.mark_stuck(now) {
                            warn!("{} made no progress for {}s", program, monitor.since_activity(now).as_secs());
                            emit(progress, event);
                            if limits.kill_when_stuck {
                                terminate(&mut child, pid, limits.term_grace).await;
                                break Ending::Stuck;
                            }
                        }
                    }

                    if now >= deadline {
                        if monitor.progressed_within(limits.grace, now) {
                            deadline = now + limits.extension;
                            let event = monitor.grant_extension(limits.extension, now);
                            info!("{} still progressing, ceiling extended", program);
                            emit(progress, event);
                        } else {
                            warn!("{} timed out after {}ms", program, monitor.elapsed(now).as_millis());
                            terminate(&mut child, pid, limits.term_grace).await;
                            break Ending::TimedOut;
                        }
                    }
                },
                _ = cancel_requested(cancel.as_mut()) => {
                    info!("Execution {} cancelled", execution_id);
                    break Ending::Cancelled;
                },
            }
        };

        let now = Instant::now();
        if matches!(ending, Ending::Exited(status) if status.success()) {
            let event = monitor.complete(now);
            emit(progress, event);
        }

        Ok(ProcessRun {
            ending,
            pid,
            stdout,
            stderr,
            duration: now.saturating_duration_since(started),
            monitor,
        })
    }
}

fn finish(
    execution_id: String,
    command: &Command,
    elevated_with: Option<String>,
    limits: &ExecutionLimits,
    run: ProcessRun,
) -> ExecutionResult {
    let (state, exit_code, error_kind, error) = match &run.ending {
        Ending::Exited(status) if status.success() => {
            (ExecutionState::Completed, status.code(), None, None)
        }
        Ending::Exited(status) => (
            ExecutionState::Failed,
            status.code(),
            Some(ErrorKind::ExecutionFailed),
            Some(describe_status(status)),
        ),
        Ending::TimedOut => (
            ExecutionState::TimedOut,
            None,
            Some(ErrorKind::Timeout),
            Some(format!("exceeded the {}ms budget", limits.budget.as_millis())),
        ),
        Ending::Stuck => (
            ExecutionState::TimedOut,
            None,
            Some(ErrorKind::Timeout),
            Some(format!(
                "no progress for {}s",
                limits.inactivity.as_secs()
            )),
        ),
        Ending::Overflow(stream) => (
            ExecutionState::Failed,
            None,
            Some(ErrorKind::ExecutionFailed),
            Some(format!(
                "{} exceeded {} bytes",
                stream.as_str(),
                limits.max_buffer_bytes
            )),
        ),
        Ending::Cancelled => (
            ExecutionState::Cancelled,
            None,
            Some(ErrorKind::Cancelled),
            Some("cancelled".to_string()),
        ),
        Ending::WaitFailed(e) => (
            ExecutionState::Failed,
            None,
            Some(ErrorKind::ExecutionFailed),
            Some(format!("could not wait for process: {}", e)),
        ),
    };

    info!(
        "{} -> {} in {}ms",
        command.text(),
        state.as_str(),
        run.duration.as_millis()
    );

    ExecutionResult {
        execution_id,
        command_text: command.text(),
        elevated_with,
        state,
        success: state == ExecutionState::Completed,
        exit_code,
        pid: run.pid,
        output: run.stdout,
        stderr: run.stderr,
        error_kind,
        error,
        duration_ms: run.duration.as_millis() as u64,
        timeout_ms: limits.budget.as_millis() as u64,
        progress: run.monitor.snapshot(),
        rollback_performed: false,
        rollback: None,
        dry_run: false,
    }
}

fn describe_status(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(sig)) => format!("killed by signal {}", sig),
        (None, None) => "exited abnormally".to_string(),
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr),
    }
}

fn emit(progress: &Option<mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = progress {
        // A slow consumer loses events rather than stalling the monitor
        let _ = tx.try_send(event);
    }
}

async fn cancel_requested(signal: Option<&mut CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

fn spawn_reader<R>(stream: Stream, reader: R, limit: usize, tx: mpsc::Sender<StreamMsg>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut total = 0usize;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let remaining = limit.saturating_sub(total) as u64;
            match (&mut reader).take(remaining + 1).read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total > limit {
                        let _ = tx.send(StreamMsg::Overflow(stream)).await;
                        return;
                    }
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(StreamMsg::Line(stream, line)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!("{} read error: {}", stream.as_str(), e);
                    break;
                }
            }
        }
        let _ = tx.send(StreamMsg::Closed).await;
    });
}

/// SIGTERM the process group, then SIGKILL after `grace`. Safe to repeat.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    if let Some(pid) = pid {
        signal_group(pid, Signal::SIGTERM);
    }
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGKILL);
        }
        let _ = child.kill().await;
    }
}

/// Ask a process (and its group) to stop. For callers that cancelled an
/// execution and need the process gone. Returns false if it no longer exists.
pub fn terminate_pid(pid: u32) -> bool {
    signal_group(pid, Signal::SIGTERM)
}

fn signal_group(pid: u32, signal: Signal) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Spawned with process_group(0): the group id equals the pid
    match kill(Pid::from_raw(-raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            debug!("group signal {:?} to {} failed ({}), signalling process", signal, pid, e);
            kill(Pid::from_raw(raw), signal).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::progress::Phase;
    use crate::safety::ProgramPolicy;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        write!(file, "{}", body).unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn executor_for(programs: &[&str]) -> Executor {
        let mut validator = SafetyValidator::new();
        for p in programs {
            validator.allow_program(*p, ProgramPolicy::any());
        }
        Executor::new(Arc::new(validator)).with_elevation(Elevation::None)
    }

    fn limits(budget_ms: u64) -> ExecutionLimits {
        let mut l = ExecutionLimits::new(Duration::from_millis(budget_ms), &ExecutionConfig::default());
        l.tick = Duration::from_millis(20);
        l.grace = Duration::from_millis(300);
        l.extension = Duration::from_millis(300);
        l.term_grace = Duration::from_millis(200);
        l.rollback_budget = Duration::from_secs(5);
        l
    }

    fn command(program: &str) -> Command {
        Command::new(program, vec![], "Run test script", OperationKind::Other)
    }

    #[tokio::test]
    async fn test_success_reaches_complete() {
        let dir = TempDir::new().unwrap();
        let p = script(&dir, "ok.sh", "echo \"copying 2 paths\"\necho done\n");
        let exec = executor_for(&[&p]);
        let (tx, mut rx) = mpsc::channel(32);
        let result = exec
            .execute(&command(&p), &limits(5000), RunOptions::default().with_progress(tx))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.contains("done"));
        assert_eq!(result.progress.phase, Phase::Complete);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&ProgressEventKind::Progress));
        assert_eq!(kinds.last(), Some(&ProgressEventKind::Finished));
    }

    #[tokio::test]
    async fn test_blocked_command_is_not_spawned() {
        let exec = executor_for(&[]);
        let err = exec
            .execute(&command("/bin/true"), &limits(5000), RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[tokio::test]
    async fn test_failure_runs_rollback() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("rolled-back");
        let fail = script(&dir, "fail.sh", "echo boom >&2\nexit 3\n");
        let undo = script(&dir, "undo.sh", &format!("touch {}\n", marker.display()));
        let exec = executor_for(&[&fail, &undo]);

        let cmd = command(&fail).with_rollback(Some(RollbackCommand::new(&undo, &[], "Undo")));
        let result = exec
            .execute(&cmd, &limits(5000), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.stderr.contains("boom"));
        assert!(result.rollback_performed);
        assert!(result.rollback.as_ref().unwrap().success);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_blocked_rollback_is_not_run() {
        let dir = TempDir::new().unwrap();
        let fail = script(&dir, "fail.sh", "exit 1\n");
        let exec = executor_for(&[&fail]);

        let cmd = command(&fail).with_rollback(Some(RollbackCommand::new("rm", &["-rf", "/"], "Nope")));
        let result = exec
            .execute(&cmd, &limits(5000), RunOptions::default())
            .await
            .unwrap();
        assert!(!result.rollback_performed);
        let outcome = result.rollback.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.starts_with("blocked"));
    }

    #[tokio::test]
    async fn test_timeout_without_progress() {
        let dir = TempDir::new().unwrap();
        let p = script(&dir, "hang.sh", "sleep 5\n");
        let exec = executor_for(&[&p]);
        let result = exec
            .execute(&command(&p), &limits(300), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert!(result.duration_ms < 3000);
        assert!(matches!(
            result.to_error(),
            Some(NixmateError::Timeout { progressing: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_progress_extends_ceiling() {
        let dir = TempDir::new().unwrap();
        let p = script(
            &dir,
            "build.sh",
            "i=1\nwhile [ $i -le 12 ]; do echo \"[$i/12 built]\"; sleep 0.1; i=$((i+1)); done\n",
        );
        let exec = executor_for(&[&p]);
        let result = exec
            .execute(&command(&p), &limits(400), RunOptions::default())
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert!(result.progress.extensions_granted > 0);
    }

    #[tokio::test]
    async fn test_buffer_overflow_fails_fast() {
        let dir = TempDir::new().unwrap();
        let p = script(&dir, "spam.sh", "while true; do echo xxxxxxxxxxxxxxxxxxxxxxxx; done\n");
        let exec = executor_for(&[&p]);
        let mut l = limits(10_000);
        l.max_buffer_bytes = 4096;
        let result = exec.execute(&command(&p), &l, RunOptions::default()).await.unwrap();
        assert_eq!(result.state, ExecutionState::Failed);
        assert!(result.error.unwrap().contains("exceeded 4096 bytes"));
        assert!(result.output.len() <= 4096);
    }

    #[tokio::test]
    async fn test_cancel_marks_state() {
        let dir = TempDir::new().unwrap();
        let p = script(&dir, "slow.sh", "sleep 5\n");
        let exec = executor_for(&[&p]);
        let (handle, signal) = super::super::cancel_pair();
        handle.cancel();
        let result = exec
            .execute(&command(&p), &limits(10_000), RunOptions::default().with_cancel(signal))
            .await
            .unwrap();
        assert_eq!(result.state, ExecutionState::Cancelled);
        assert!(!result.rollback_performed);
        if let Some(pid) = result.pid {
            terminate_pid(pid);
        }
    }

    #[tokio::test]
    async fn test_dry_run_does_not_spawn() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let p = script(&dir, "touch.sh", &format!("touch {}\n", marker.display()));
        let exec = executor_for(&[&p]);
        let result = exec
            .execute(&command(&p), &limits(5000), RunOptions::default().dry_run(true))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.dry_run);
        assert!(!marker.exists());
    }

    #[test]
    fn test_elevation_wrapping() {
        let exec = Executor::new(Arc::new(SafetyValidator::new())).with_elevation(Elevation::Doas);
        let cmd = Command::new(
            "systemctl",
            vec!["restart".to_string(), "nginx".to_string()],
            "Restart nginx",
            OperationKind::ServiceControl,
        )
        .elevated();
        let (program, argv, wrapper) = exec.spawn_target(&cmd);
        if geteuid().is_root() {
            assert_eq!(program, "systemctl");
            assert!(wrapper.is_none());
        } else {
            assert_eq!(program, "doas");
            assert_eq!(argv, vec!["-n", "systemctl", "restart", "nginx"]);
            assert_eq!(wrapper.as_deref(), Some("doas"));
        }
    }
}

//! Timeout estimation, progress monitoring and supervised execution
//!
//! Process tests drive small generated shell scripts registered with the
//! validator, with limits scaled down from minutes to milliseconds.

use nixmate_common::audit::{AuditEntryType, AuditLog, AuditResult};
use nixmate_common::command::{Command, CommandBuilder, OperationKind, RollbackCommand};
use nixmate_common::config::{Elevation, ExecutionConfig, NetworkSpeed, Preferences};
use nixmate_common::exec::{
    cancel_pair, explain, terminate_pid, ExecutionLimits, ExecutionState, Executor, RunOptions,
};
use nixmate_common::progress::{Phase, PhasePercentTable, ProgressEventKind, ProgressMonitor};
use nixmate_common::safety::{ProgramPolicy, SafetyValidator};
use nixmate_common::system::SystemSnapshot;
use nixmate_common::{Intent, IntentAction, QueryScope};
use nixmate_common::timeout::{estimate, TimeoutOptions, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

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

fn run(program: &str) -> Command {
    Command::new(program, vec![], "Run test script", OperationKind::Other)
}

// ============================================================================
// Timeout estimator
// ============================================================================

#[test]
fn estimate_is_deterministic_and_bounded() {
    let commands = vec![
        Command::of("nix-env", &["-iA", "nixpkgs.hello"], "Install hello", OperationKind::Install)
            .with_target("hello"),
        Command::of("nix-env", &["-iA", "nixpkgs.texlive-full"], "Install texlive", OperationKind::Install)
            .with_target("texlive-full"),
        Command::of("nix-env", &["-iA", "nixpkgs.foo-git"], "Install foo", OperationKind::Install)
            .with_target("foo-git"),
        Command::of("nixos-rebuild", &["switch", "--upgrade"], "Update", OperationKind::UpdateSystem),
        Command::of("systemctl", &["status", "sshd"], "Status", OperationKind::ServiceStatus),
        Command::of("nix-collect-garbage", &["-d"], "GC", OperationKind::GarbageCollect),
    ];

    let mut patient = Preferences::default();
    patient.patient_mode = true;
    patient.network_speed = NetworkSpeed::VerySlow;
    patient.timeout_multiplier = 50.0;

    let mut hasty = Preferences::default();
    hasty.network_speed = NetworkSpeed::Fast;
    hasty.timeout_multiplier = 0.01;

    let loaded_cold = SystemSnapshot {
        load_avg: 64.0,
        cpu_count: 4,
        has_local_cache: false,
        first_run: true,
    };

    for command in &commands {
        for prefs in [&Preferences::default(), &patient, &hasty] {
            for snapshot in [&SystemSnapshot::default(), &loaded_cold] {
                for dry_run in [false, true] {
                    let options = TimeoutOptions::new(prefs).with_dry_run(dry_run);
                    let a = estimate(command, options, snapshot);
                    let b = estimate(command, options, snapshot);
                    assert_eq!(a, b, "estimate must be deterministic");
                    assert!(
                        (MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&a.final_ms),
                        "{} -> {}ms",
                        command.text(),
                        a.final_ms
                    );
                    if dry_run {
                        assert!(a.final_ms <= 30_000);
                    }
                }
            }
        }
    }
}

#[test]
fn estimate_orders_sizes_and_conditions() {
    let prefs = Preferences::default();
    let idle = SystemSnapshot::default();
    let install = |pkg: &str| {
        let attr = format!("nixpkgs.{}", pkg);
        Command::of("nix-env", &["-iA", attr.as_str()], "Install", OperationKind::Install)
            .with_target(pkg)
    };

    let small = estimate(&install("hello"), TimeoutOptions::new(&prefs), &idle);
    let huge = estimate(&install("texlive-full"), TimeoutOptions::new(&prefs), &idle);
    assert!(huge.final_ms > small.final_ms);

    let cold = SystemSnapshot {
        has_local_cache: false,
        ..SystemSnapshot::default()
    };
    let cold_plan = estimate(&install("hello"), TimeoutOptions::new(&prefs), &cold);
    assert!(cold_plan.final_ms >= small.final_ms);
}

// ============================================================================
// Progress monitor
// ============================================================================

#[test]
fn phase_never_regresses_over_a_noisy_transcript() {
    let transcript = [
        "evaluating file '/etc/nixos/configuration.nix'",
        "these 3 paths will be fetched (12.0 MiB download, 40 MiB unpacked):",
        "copying path '/nix/store/aaa111-zlib-1.3' from 'https://cache.nixos.org'...",
        "[1/4 built]",
        "evaluating file '/etc/nixos/configuration.nix'",
        "downloading 'https://cache.nixos.org/nar/x.nar.xz'... 10%",
        "[3/4 built]",
        "[2/4 built]",
        "copying path '/nix/store/aaa111-zlib-1.3' from 'https://cache.nixos.org'...",
        "installing 'hello-2.12'",
        "building '/nix/store/bbb222-hello-2.12.drv'...",
        "unrelated chatter",
    ];

    let start = Instant::now();
    let mut monitor = ProgressMonitor::new("exec-1", PhasePercentTable::default(), start);
    let mut last_phase = Phase::Starting;
    let mut last_percent = 0u8;

    for (i, line) in transcript.iter().enumerate() {
        let now = start + Duration::from_millis(100 * i as u64);
        if let Some(event) = monitor.observe(line, now) {
            assert!(event.phase >= last_phase, "{} regressed to {:?}", line, event.phase);
            last_phase = event.phase;
        }
        let percent = monitor.percent().unwrap_or(0);
        assert!(percent >= last_percent, "percent regressed at {}", line);
        last_percent = percent;
        assert!(monitor.phase() >= last_phase);
    }
    assert_eq!(monitor.phase(), Phase::Installing);
}

#[test]
fn scenario_d_virtual_clock() {
    // Progress every 30s for 20 minutes against a 10 minute budget: the
    // last minute always shows progress, so each ceiling check extends.
    let start = Instant::now();
    let budget = Duration::from_secs(600);
    let grace = Duration::from_secs(60);
    let mut monitor = ProgressMonitor::new("slow-build", PhasePercentTable::default(), start);
    let mut ceiling = budget;
    let mut killed = false;

    for step in 1..=40u64 {
        let now = start + Duration::from_secs(30 * step);
        monitor.observe(&format!("[{}/40 built]", step), now);
        if now.duration_since(start) >= ceiling {
            if monitor.progressed_within(grace, now) {
                ceiling += grace;
            } else {
                killed = true;
                break;
            }
        }
    }
    assert!(!killed, "a steadily progressing build is never killed");
    assert!(!monitor.is_stuck());

    // Silence for 6 minutes against a 5 minute inactivity window
    let start = Instant::now();
    let inactivity = Duration::from_secs(300);
    let mut quiet = ProgressMonitor::new("quiet", PhasePercentTable::default(), start);
    let six_minutes = start + Duration::from_secs(360);
    assert!(quiet.since_activity(six_minutes) > inactivity);
    let event = quiet.mark_stuck(six_minutes).expect("first flag emits an event");
    assert_eq!(event.kind, ProgressEventKind::Stuck);
    assert!(quiet.is_stuck());
    assert!(!quiet.progressed_within(Duration::from_secs(60), six_minutes));
}

// ============================================================================
// Supervised processes
// ============================================================================

#[tokio::test]
async fn scenario_d_progressing_process_outlives_budget() {
    let dir = TempDir::new().unwrap();
    let p = script(
        &dir,
        "build.sh",
        "i=1\nwhile [ $i -le 10 ]; do echo \"[$i/10 built]\"; sleep 0.1; i=$((i+1)); done\n",
    );
    let exec = executor_for(&[&p]);
    let (tx, mut rx) = mpsc::channel(256);
    let result = exec
        .execute(&run(&p), &limits(300), RunOptions::default().with_progress(tx))
        .await
        .unwrap();

    assert_eq!(result.state, ExecutionState::Completed, "{:?}", result.error);
    assert!(result.duration_ms >= 300);
    assert!(result.progress.extensions_granted > 0);

    let mut last = Phase::Starting;
    while let Ok(event) = rx.try_recv() {
        assert!(event.phase >= last);
        last = event.phase;
    }
    assert_eq!(last, Phase::Complete);
}

#[tokio::test]
async fn scenario_d_silent_process_is_flagged_stuck() {
    let dir = TempDir::new().unwrap();
    // budget 2000ms -> inactivity window 500ms
    let p = script(&dir, "quiet.sh", "sleep 1\necho done\n");
    let exec = executor_for(&[&p]);
    let (tx, mut rx) = mpsc::channel(64);
    let result = exec
        .execute(&run(&p), &limits(2000), RunOptions::default().with_progress(tx))
        .await
        .unwrap();

    // A warning, not a kill
    assert_eq!(result.state, ExecutionState::Completed);
    assert!(result.progress.stuck);
    let mut saw_stuck = false;
    while let Ok(event) = rx.try_recv() {
        saw_stuck |= event.kind == ProgressEventKind::Stuck;
    }
    assert!(saw_stuck);
}

#[tokio::test]
async fn stuck_process_killed_when_configured() {
    let dir = TempDir::new().unwrap();
    let p = script(&dir, "hang.sh", "sleep 5\n");
    let exec = executor_for(&[&p]);
    let mut l = limits(2000);
    l.kill_when_stuck = true;
    let result = exec.execute(&run(&p), &l, RunOptions::default()).await.unwrap();
    assert!(!result.success);
    assert!(result.duration_ms < 2000);
}

#[tokio::test]
async fn timeout_rolls_back() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("undone");
    let hang = script(&dir, "hang.sh", "sleep 5\n");
    let undo = script(&dir, "undo.sh", &format!("touch {}\n", marker.display()));
    let exec = executor_for(&[&hang, &undo]);

    let cmd = run(&hang).with_rollback(Some(RollbackCommand::new(&undo, &[], "Undo")));
    let result = exec.execute(&cmd, &limits(300), RunOptions::default()).await.unwrap();
    assert_eq!(result.state, ExecutionState::TimedOut);
    assert!(result.rollback_performed);
    assert!(marker.exists());
}

#[tokio::test]
async fn failed_install_removes_nothing() {
    let dir = TempDir::new().unwrap();
    let calls = dir.path().join("calls");
    let nix_env = script(
        &dir,
        "nix-env",
        &format!(
            "printf '%s\\n' \"$*\" >> {}\ncase \"$1\" in -iA) exit 1;; esac\nexit 0\n",
            calls.display()
        ),
    );
    let exec = executor_for(&[&nix_env]);

    let intent = Intent::new(
        IntentAction::Install {
            package: Some("firefox".to_string()),
        },
        0.95,
        "install firefox",
    );
    let mut cmd = CommandBuilder::new().build(&intent).unwrap();
    cmd.program = nix_env.clone();

    let result = exec.execute(&cmd, &limits(5000), RunOptions::default()).await.unwrap();
    assert_eq!(result.state, ExecutionState::Failed);
    assert!(!result.rollback_performed);
    assert!(result.rollback.is_none());
    assert_eq!(std::fs::read_to_string(&calls).unwrap(), "-iA nixpkgs.firefox\n");
}

#[tokio::test]
async fn missing_package_is_an_answer_not_a_failure() {
    let dir = TempDir::new().unwrap();
    // Like the real tool: a name selector that matches nothing exits 1
    let nix_env = script(
        &dir,
        "nix-env",
        "if [ \"$2\" = \"--installed\" ]; then\n  echo firefox-120.0.1\n  exit 0\nfi\n\
         echo \"error: selector '$2' matches no derivations\" >&2\nexit 1\n",
    );
    let exec = executor_for(&[&nix_env]);

    for (package, expected) in [
        ("git", "git is not installed."),
        ("firefox", "firefox is installed (firefox-120.0.1)."),
    ] {
        let intent = Intent::new(
            IntentAction::Query {
                package: Some(package.to_string()),
                scope: QueryScope::InstalledCheck,
            },
            0.95,
            "is it installed",
        );
        let mut cmd = CommandBuilder::new().build(&intent).unwrap();
        cmd.program = nix_env.clone();

        let result = exec.execute(&cmd, &limits(5000), RunOptions::default()).await.unwrap();
        assert_eq!(result.state, ExecutionState::Completed, "{}", package);
        assert!(result.success);
        assert_eq!(explain(&cmd, &result), expected);
    }
}

#[tokio::test]
async fn generation_undo_only_when_profile_moved() {
    let dir = TempDir::new().unwrap();
    let gen1 = dir.path().join("system-1-link");
    let gen2 = dir.path().join("system-2-link");
    std::fs::create_dir(&gen1).unwrap();
    std::fs::create_dir(&gen2).unwrap();
    let profile = dir.path().join("system");
    std::os::unix::fs::symlink(&gen1, &profile).unwrap();

    let marker = dir.path().join("undone");
    let undo = script(&dir, "undo.sh", &format!("touch {}\n", marker.display()));
    let early_fail = script(&dir, "early.sh", "echo 'error: build failed' >&2\nexit 1\n");
    let late_fail = script(
        &dir,
        "late.sh",
        &format!("ln -sfn {} {}\nexit 1\n", gen2.display(), profile.display()),
    );
    let exec = executor_for(&[&undo, &early_fail, &late_fail]);
    let undo_cmd = RollbackCommand::new(&undo, &[], "Switch back").when_profile_moves(&profile);

    // Failed before switching: the current generation is still the good one
    let cmd = run(&early_fail).with_rollback(Some(undo_cmd.clone()));
    let result = exec.execute(&cmd, &limits(5000), RunOptions::default()).await.unwrap();
    assert_eq!(result.state, ExecutionState::Failed);
    assert!(!result.rollback_performed);
    assert!(!marker.exists());

    // Failed after switching: undo the switch
    let cmd = run(&late_fail).with_rollback(Some(undo_cmd));
    let result = exec.execute(&cmd, &limits(5000), RunOptions::default()).await.unwrap();
    assert_eq!(result.state, ExecutionState::Failed);
    assert!(result.rollback_performed);
    assert!(marker.exists());
}

#[tokio::test]
async fn cancel_does_not_roll_back() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("undone");
    let hang = script(&dir, "hang.sh", "sleep 3\n");
    let undo = script(&dir, "undo.sh", &format!("touch {}\n", marker.display()));
    let exec = executor_for(&[&hang, &undo]);
    let (handle, signal) = cancel_pair();

    let cmd = run(&hang).with_rollback(Some(RollbackCommand::new(&undo, &[], "Undo")));
    let task = tokio::spawn(async move {
        exec.execute(&cmd, &limits(5000), RunOptions::default().with_cancel(signal))
            .await
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.cancel();
    let result = task.await.unwrap().unwrap();

    assert_eq!(result.state, ExecutionState::Cancelled);
    assert!(!result.rollback_performed);
    assert!(!marker.exists());

    // Cancellation only stops monitoring; the caller kills explicitly
    if let Some(pid) = result.pid {
        terminate_pid(pid);
    }
}

#[tokio::test]
async fn executions_are_audited() {
    let dir = TempDir::new().unwrap();
    let fail = script(&dir, "fail.sh", "exit 2\n");
    let undo = script(&dir, "undo.sh", "exit 0\n");
    let exec = executor_for(&[&fail, &undo]);
    let audit = AuditLog::new(dir.path().join("audit.jsonl"));

    let cmd = run(&fail).with_rollback(Some(RollbackCommand::new(&undo, &[], "Undo")));
    let result = exec.execute(&cmd, &limits(5000), RunOptions::default()).await.unwrap();
    audit.execution("session-1", &result);

    let entries = audit.recent(10);
    assert!(entries
        .iter()
        .any(|e| e.entry_type == AuditEntryType::Execution && e.result == AuditResult::Failure));
    assert!(entries.iter().any(|e| e.entry_type == AuditEntryType::Rollback));
    assert!(entries
        .iter()
        .all(|e| e.session_id.as_deref() == Some("session-1")));
}

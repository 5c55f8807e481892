//! Progress Monitor - infers phase and percent from process output
//!
//! Lines are scanned against an ordered table of labeled patterns. A match
//! resets the inactivity clock and may advance the phase. The reported phase
//! only moves forward: a stale or duplicated line can never regress it.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Output lines kept per execution
pub const MAX_HISTORY: usize = 200;

// ============================================================================
// Phases
// ============================================================================

/// Execution phase, in the order a typical Nix operation moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Evaluating,
    Querying,
    Fetching,
    Downloading,
    Copying,
    Building,
    Installing,
    Updating,
    Cleaning,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Evaluating => "evaluating",
            Phase::Querying => "querying",
            Phase::Fetching => "fetching",
            Phase::Downloading => "downloading",
            Phase::Copying => "copying",
            Phase::Building => "building",
            Phase::Installing => "installing",
            Phase::Updating => "updating",
            Phase::Cleaning => "cleaning",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default percent shown on entering each phase.
///
/// A display heuristic only; nothing in the engine depends on these values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasePercentTable {
    pub starting: u8,
    pub evaluating: u8,
    pub querying: u8,
    pub fetching: u8,
    pub downloading: u8,
    pub copying: u8,
    pub building: u8,
    pub installing: u8,
    pub updating: u8,
    pub cleaning: u8,
    pub complete: u8,
}

impl Default for PhasePercentTable {
    fn default() -> Self {
        Self {
            starting: 0,
            evaluating: 5,
            querying: 10,
            fetching: 15,
            downloading: 20,
            copying: 35,
            building: 50,
            installing: 80,
            updating: 85,
            cleaning: 90,
            complete: 100,
        }
    }
}

impl PhasePercentTable {
    pub fn percent_for(&self, phase: Phase) -> u8 {
        let value = match phase {
            Phase::Starting => self.starting,
            Phase::Evaluating => self.evaluating,
            Phase::Querying => self.querying,
            Phase::Fetching => self.fetching,
            Phase::Downloading => self.downloading,
            Phase::Copying => self.copying,
            Phase::Building => self.building,
            Phase::Installing => self.installing,
            Phase::Updating => self.updating,
            Phase::Cleaning => self.cleaning,
            Phase::Complete => self.complete,
        };
        value.min(100)
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// How a pattern turns its captures into a percent and message
#[derive(Debug, Clone, Copy)]
enum Extract {
    /// Capture 1 is a percentage
    Percent,
    /// Captures 1 and 2 are done/total; interpolate within the phase
    Fraction,
    /// Capture 1 names the subject of the message
    Subject(&'static str),
    /// Fixed message
    Message(&'static str),
}

struct ProgressPattern {
    label: &'static str,
    phase: Phase,
    regex: Regex,
    extract: Extract,
}

static PATTERNS: Lazy<Vec<ProgressPattern>> = Lazy::new(|| {
    let table: &[(&'static str, Phase, &'static str, Extract)] = &[
        (
            "download_percent",
            Phase::Downloading,
            r"(?i)download\w*\b.*?(\d{1,3}(?:\.\d+)?)\s*%",
            Extract::Percent,
        ),
        (
            "build_count",
            Phase::Building,
            r"\[(\d+)/(\d+)(?:\s+built)?",
            Extract::Fraction,
        ),
        (
            "freed_space",
            Phase::Complete,
            r"(?i)\d+ store paths deleted, ([\d.]+ \w+) freed",
            Extract::Subject("Freed"),
        ),
        (
            "gc_deleting",
            Phase::Cleaning,
            r"(?i)^(?:deleting|removing) (?:garbage|old generations|unused links|'?/nix/store)",
            Extract::Message("Deleting unused store paths"),
        ),
        (
            "fetch_plan",
            Phase::Fetching,
            r"(?i)^these (\d+) paths will be fetched",
            Extract::Subject("Paths to fetch:"),
        ),
        (
            "build_plan",
            Phase::Building,
            r"(?i)^these (\d+) derivations will be built",
            Extract::Subject("Derivations to build:"),
        ),
        (
            "substitute",
            Phase::Downloading,
            r"(?i)^copying path '/nix/store/[a-z0-9]+-([^']+)' from 'https?://",
            Extract::Subject("Downloading"),
        ),
        (
            "download_url",
            Phase::Downloading,
            r"(?i)^downloading '(?:https?://)?([^'/]+)",
            Extract::Subject("Downloading from"),
        ),
        (
            "copy_count",
            Phase::Copying,
            r"(?i)^copying (\d+) paths?",
            Extract::Subject("Copying paths:"),
        ),
        (
            "build_derivation",
            Phase::Building,
            r"(?i)^building '/nix/store/[a-z0-9]+-([^']+?)(?:\.drv)?'",
            Extract::Subject("Building"),
        ),
        (
            "install_target",
            Phase::Installing,
            r"(?i)^(?:installing|uninstalling|replacing old) '([^']+)'",
            Extract::Subject("Applying"),
        ),
        (
            "system_switch",
            Phase::Updating,
            r"(?i)^(?:building the system configuration|activating the configuration|updating GRUB|setting up /etc|unpacking channels|upgrading)",
            Extract::Message("Updating the system"),
        ),
        (
            "querying",
            Phase::Querying,
            r"(?i)^(?:querying|searching)",
            Extract::Message("Querying packages"),
        ),
        (
            "evaluating",
            Phase::Evaluating,
            r"(?i)^(?:evaluating|warning: evaluating|these \d+ paths will be)",
            Extract::Message("Evaluating"),
        ),
    ];

    table
        .iter()
        .filter_map(|(label, phase, pattern, extract)| {
            Regex::new(pattern).ok().map(|regex| ProgressPattern {
                label: *label,
                phase: *phase,
                regex,
                extract: *extract,
            })
        })
        .collect()
});

/// One recognised line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMatch {
    pub label: String,
    pub phase: Phase,
    pub percent: Option<u8>,
    pub message: String,
}

/// Match a single output line against the pattern table
pub fn classify_line(line: &str, table: &PhasePercentTable) -> Option<LineMatch> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    PATTERNS.iter().find_map(|p| {
        let caps = p.regex.captures(line)?;
        let (percent, message) = extract(p, &caps, table);
        Some(LineMatch {
            label: p.label.to_string(),
            phase: p.phase,
            percent,
            message,
        })
    })
}

fn extract(p: &ProgressPattern, caps: &Captures, table: &PhasePercentTable) -> (Option<u8>, String) {
    let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
    match p.extract {
        Extract::Percent => {
            let pct = group(1)
                .parse::<f64>()
                .ok()
                .map(|v| within(table, Phase::Downloading, Phase::Copying, v.clamp(0.0, 100.0) / 100.0));
            (pct, format!("Downloading ({}%)", group(1)))
        }
        Extract::Fraction => {
            let done = group(1).parse::<u32>().unwrap_or(0);
            let total = group(2).parse::<u32>().unwrap_or(0);
            let pct = if total > 0 {
                let ratio = (done.min(total) as f64) / total as f64;
                Some(within(table, Phase::Building, Phase::Installing, ratio))
            } else {
                None
            };
            (pct, format!("Building {}/{}", done, total))
        }
        Extract::Subject(prefix) => (None, format!("{} {}", prefix, group(1))),
        Extract::Message(msg) => (None, msg.to_string()),
    }
}

/// Overall percent for `ratio` of the way from `from`'s start to `to`'s start
fn within(table: &PhasePercentTable, from: Phase, to: Phase, ratio: f64) -> u8 {
    let start = table.percent_for(from) as f64;
    let end = table.percent_for(to) as f64;
    (start + (end - start).max(0.0) * ratio).round() as u8
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// Phase, percent or message changed
    Progress,
    /// No recognised progress within the inactivity window
    Stuck,
    /// Hard ceiling extended because progress is still being made
    Extended,
    /// Compensating command started
    RollingBack,
    Finished,
}

/// Streamed to callers while a command runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub execution_id: String,
    pub kind: ProgressEventKind,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Final monitor state carried by an execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub stuck: bool,
    pub extensions_granted: u32,
    /// Recognised progress lines
    pub progress_lines: u64,
}

// ============================================================================
// Monitor
// ============================================================================

/// Per-execution progress state. Lives only as long as one execution.
#[derive(Debug)]
pub struct ProgressMonitor {
    execution_id: String,
    table: PhasePercentTable,
    started: Instant,
    last_activity: Instant,
    phase: Phase,
    percent: Option<u8>,
    last_message: Option<String>,
    history: VecDeque<String>,
    progress_lines: u64,
    stuck: bool,
    extensions: u32,
}

impl ProgressMonitor {
    pub fn new(execution_id: impl Into<String>, table: PhasePercentTable, now: Instant) -> Self {
        Self {
            execution_id: execution_id.into(),
            table,
            started: now,
            last_activity: now,
            phase: Phase::Starting,
            percent: None,
            last_message: None,
            history: VecDeque::new(),
            progress_lines: 0,
            stuck: false,
            extensions: 0,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn since_activity(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Recognised progress within `window` of `now`
    pub fn progressed_within(&self, window: Duration, now: Instant) -> bool {
        self.progress_lines > 0 && self.since_activity(now) <= window
    }

    /// Feed one output line. Returns an event when the line was recognised.
    pub fn observe(&mut self, line: &str, now: Instant) -> Option<ProgressEvent> {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());

        let matched = classify_line(line, &self.table)?;
        self.last_activity = now;
        self.progress_lines += 1;
        self.stuck = false;

        if matched.phase > self.phase {
            self.phase = matched.phase;
        }
        // Percent from a phase we already left is stale
        let candidate = if matched.phase >= self.phase {
            matched
                .percent
                .unwrap_or_else(|| self.table.percent_for(self.phase))
        } else {
            self.table.percent_for(self.phase)
        };
        self.percent = Some(self.percent.map_or(candidate, |p| p.max(candidate)));
        self.last_message = Some(matched.message.clone());

        Some(self.event(ProgressEventKind::Progress, matched.message, now))
    }

    /// Flag the execution as possibly stuck. Returns an event the first time.
    pub fn mark_stuck(&mut self, now: Instant) -> Option<ProgressEvent> {
        if self.stuck {
            return None;
        }
        self.stuck = true;
        let secs = self.since_activity(now).as_secs();
        Some(self.event(
            ProgressEventKind::Stuck,
            format!("No progress for {}s, the command may be stuck", secs),
            now,
        ))
    }

    pub fn grant_extension(&mut self, extra: Duration, now: Instant) -> ProgressEvent {
        self.extensions += 1;
        self.event(
            ProgressEventKind::Extended,
            format!("Still making progress, allowing {}s more", extra.as_secs()),
            now,
        )
    }

    /// Successful exit: jump to Complete
    pub fn complete(&mut self, now: Instant) -> ProgressEvent {
        self.phase = Phase::Complete;
        self.percent = Some(self.table.percent_for(Phase::Complete));
        self.event(ProgressEventKind::Finished, "Done".to_string(), now)
    }

    pub fn event(&self, kind: ProgressEventKind, message: String, now: Instant) -> ProgressEvent {
        ProgressEvent {
            execution_id: self.execution_id.clone(),
            kind,
            phase: self.phase,
            percent: self.percent,
            message,
            elapsed_ms: self.elapsed(now).as_millis() as u64,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase,
            percent: self.percent,
            last_message: self.last_message.clone(),
            stuck: self.stuck,
            extensions_granted: self.extensions,
            progress_lines: self.progress_lines,
        }
    }
}

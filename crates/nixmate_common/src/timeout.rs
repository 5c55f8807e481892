//! Timeout Estimator - execution budget for a command
//!
//! base (by operation, or by package size for installs) x modifiers,
//! capped for dry runs and clamped to [5s, 2h]. A pure function of
//! (command, options, snapshot): identical inputs give identical plans.

use crate::command::{Command, OperationKind};
use crate::config::Preferences;
use crate::system::SystemSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_TIMEOUT_MS: u64 = 5_000;
pub const MAX_TIMEOUT_MS: u64 = 2 * 60 * 60 * 1000;
pub const DRY_RUN_CAP_MS: u64 = 30_000;

const SECOND: u64 = 1000;
const MINUTE: u64 = 60 * SECOND;

// ============================================================================
// Package size buckets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    Instant,
    Small,
    Medium,
    Large,
    Huge,
    Unknown,
}

impl SizeBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeBucket::Instant => "instant",
            SizeBucket::Small => "small",
            SizeBucket::Medium => "medium",
            SizeBucket::Large => "large",
            SizeBucket::Huge => "huge",
            SizeBucket::Unknown => "unknown",
        }
    }

    pub fn base_ms(&self) -> u64 {
        match self {
            SizeBucket::Instant => 15 * SECOND,
            SizeBucket::Small => MINUTE,
            SizeBucket::Medium => 3 * MINUTE,
            SizeBucket::Large => 10 * MINUTE,
            SizeBucket::Huge => 30 * MINUTE,
            SizeBucket::Unknown => 5 * MINUTE,
        }
    }
}

/// Curated sizes for commonly installed packages
const PACKAGE_SIZES: &[(&str, SizeBucket)] = &[
    ("hello", SizeBucket::Instant),
    ("cowsay", SizeBucket::Instant),
    ("jq", SizeBucket::Instant),
    ("tree", SizeBucket::Instant),
    ("ripgrep", SizeBucket::Small),
    ("fd", SizeBucket::Small),
    ("bat", SizeBucket::Small),
    ("htop", SizeBucket::Small),
    ("btop", SizeBucket::Small),
    ("curl", SizeBucket::Small),
    ("wget", SizeBucket::Small),
    ("git", SizeBucket::Small),
    ("vim", SizeBucket::Small),
    ("neovim", SizeBucket::Small),
    ("tmux", SizeBucket::Small),
    ("nginx", SizeBucket::Small),
    ("openssh", SizeBucket::Small),
    ("emacs", SizeBucket::Medium),
    ("docker", SizeBucket::Medium),
    ("postgresql", SizeBucket::Medium),
    ("mariadb", SizeBucket::Medium),
    ("python3", SizeBucket::Medium),
    ("nodejs", SizeBucket::Medium),
    ("go", SizeBucket::Medium),
    ("vlc", SizeBucket::Medium),
    ("mpv", SizeBucket::Medium),
    ("firefox", SizeBucket::Large),
    ("thunderbird", SizeBucket::Large),
    ("vscode", SizeBucket::Large),
    ("gimp", SizeBucket::Large),
    ("inkscape", SizeBucket::Large),
    ("steam", SizeBucket::Large),
    ("rustc", SizeBucket::Large),
    ("gcc", SizeBucket::Large),
    ("qemu", SizeBucket::Large),
    ("chromium", SizeBucket::Huge),
    ("libreoffice", SizeBucket::Huge),
    ("blender", SizeBucket::Huge),
    ("virtualbox", SizeBucket::Huge),
    ("android-studio", SizeBucket::Huge),
];

/// Name fragments checked in order when a package is not in the table
const SIZE_HINTS: &[(HintMatch, &str, SizeBucket)] = &[
    (HintMatch::Contains, "texlive", SizeBucket::Huge),
    (HintMatch::Prefix, "linux_", SizeBucket::Huge),
    (HintMatch::Suffix, "-full", SizeBucket::Large),
    (HintMatch::Suffix, "-unwrapped", SizeBucket::Large),
    (HintMatch::Prefix, "haskellpackages.", SizeBucket::Medium),
    (HintMatch::Suffix, "-bin", SizeBucket::Medium),
    (HintMatch::Prefix, "python3packages.", SizeBucket::Small),
    (HintMatch::Prefix, "perlpackages.", SizeBucket::Small),
    (HintMatch::Suffix, "-utils", SizeBucket::Small),
    (HintMatch::Suffix, "-tools", SizeBucket::Small),
    (HintMatch::Prefix, "lib", SizeBucket::Small),
];

/// Names that usually mean nothing is cached upstream
const SOURCE_BUILD_HINTS: &[&str] = &["-git", "-unstable", "-src", "-from-source"];

#[derive(Debug, Clone, Copy)]
enum HintMatch {
    Prefix,
    Suffix,
    Contains,
}

/// Size bucket for a package name or attribute path
pub fn size_bucket(package: &str) -> SizeBucket {
    let name = package
        .trim()
        .trim_start_matches("nixpkgs.")
        .to_lowercase();

    if let Some((_, bucket)) = PACKAGE_SIZES.iter().find(|(p, _)| *p == name) {
        return *bucket;
    }

    SIZE_HINTS
        .iter()
        .find(|(how, fragment, _)| match how {
            HintMatch::Prefix => name.starts_with(fragment),
            HintMatch::Suffix => name.ends_with(fragment),
            HintMatch::Contains => name.contains(fragment),
        })
        .map(|(_, _, bucket)| *bucket)
        .unwrap_or(SizeBucket::Unknown)
}

/// Package name suggests a local build from source
pub fn suspect_source_build(package: &str) -> bool {
    let name = package.to_lowercase();
    SOURCE_BUILD_HINTS.iter().any(|hint| name.ends_with(hint))
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    NetworkSpeed,
    SystemLoad,
    ColdCache,
    SourceBuild,
    PatientMode,
    UserMultiplier,
}

impl ModifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModifierKind::NetworkSpeed => "network speed",
            ModifierKind::SystemLoad => "system load",
            ModifierKind::ColdCache => "no local cache",
            ModifierKind::SourceBuild => "source build",
            ModifierKind::PatientMode => "patient mode",
            ModifierKind::UserMultiplier => "user multiplier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub kind: ModifierKind,
    pub factor: f64,
}

/// Where the base came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseSource {
    Operation,
    PackageSize,
    CustomTimeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPlan {
    pub base_ms: u64,
    pub base_source: BaseSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bucket: Option<SizeBucket>,
    /// Factors that differ from 1.0, in application order
    pub modifiers: Vec<Modifier>,
    /// Always within [MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]
    pub final_ms: u64,
    #[serde(default)]
    pub dry_run_capped: bool,
}

impl TimeoutPlan {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.final_ms)
    }

    /// Product of all modifiers
    pub fn multiplier(&self) -> f64 {
        self.modifiers.iter().map(|m| m.factor).product()
    }
}

/// Read-only inputs besides the command and snapshot
#[derive(Debug, Clone, Copy)]
pub struct TimeoutOptions<'a> {
    pub preferences: &'a Preferences,
    pub dry_run: bool,
}

impl<'a> TimeoutOptions<'a> {
    pub fn new(preferences: &'a Preferences) -> Self {
        Self {
            preferences,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

// ============================================================================
// Estimation
// ============================================================================

/// Base budget for an operation that is not sized by package
fn operation_base_ms(operation: OperationKind) -> u64 {
    match operation {
        OperationKind::Install => SizeBucket::Unknown.base_ms(),
        OperationKind::Remove => MINUTE,
        OperationKind::UpdateSystem => 30 * MINUTE,
        OperationKind::UpdateChannels => 5 * MINUTE,
        OperationKind::UpgradeUserPackages => 30 * MINUTE,
        OperationKind::Search => MINUTE,
        OperationKind::ListInstalled | OperationKind::InstalledCheck => 15 * SECOND,
        OperationKind::ServiceControl => 30 * SECOND,
        OperationKind::ServiceStatus | OperationKind::ServiceList => 10 * SECOND,
        OperationKind::GarbageCollect => 10 * MINUTE,
        OperationKind::Optimise => 30 * MINUTE,
        OperationKind::ListGenerations => 15 * SECOND,
        OperationKind::RollbackGeneration => 10 * MINUTE,
        OperationKind::Logs | OperationKind::Diagnose => 15 * SECOND,
        OperationKind::ShowOption => 30 * SECOND,
        OperationKind::Rollback => 5 * MINUTE,
        OperationKind::Other => MINUTE,
    }
}

/// Operations whose duration is dominated by downloads
fn is_download_heavy(operation: OperationKind) -> bool {
    matches!(
        operation,
        OperationKind::Install
            | OperationKind::UpdateSystem
            | OperationKind::UpdateChannels
            | OperationKind::UpgradeUserPackages
            | OperationKind::Search
    )
}

pub fn estimate(
    command: &Command,
    options: TimeoutOptions<'_>,
    snapshot: &SystemSnapshot,
) -> TimeoutPlan {
    let prefs = options.preferences;
    let package = command.target.as_deref();

    let custom = package
        .and_then(|p| prefs.custom_timeouts.get(p))
        .map(|secs| secs.saturating_mul(SECOND));

    let (base_ms, base_source, size) = match (custom, command.operation, package) {
        (Some(ms), _, _) => (ms, BaseSource::CustomTimeout, None),
        (None, OperationKind::Install, Some(p)) => {
            let bucket = size_bucket(p);
            (bucket.base_ms(), BaseSource::PackageSize, Some(bucket))
        }
        (None, op, _) => (operation_base_ms(op), BaseSource::Operation, None),
    };

    let mut modifiers = Vec::new();
    let mut push = |kind: ModifierKind, factor: f64| {
        if (factor - 1.0).abs() > f64::EPSILON {
            modifiers.push(Modifier { kind, factor });
        }
    };

    if is_download_heavy(command.operation) {
        push(ModifierKind::NetworkSpeed, prefs.network_speed.multiplier());
        if snapshot.is_cold() {
            push(ModifierKind::ColdCache, 2.0);
        }
    }
    if snapshot.is_under_load() {
        push(ModifierKind::SystemLoad, 1.5);
    }
    if command.operation == OperationKind::Install && package.map(suspect_source_build).unwrap_or(false) {
        push(ModifierKind::SourceBuild, 3.0);
    }
    if prefs.patient_mode {
        push(ModifierKind::PatientMode, 2.0);
    }
    if prefs.timeout_multiplier.is_finite() && prefs.timeout_multiplier > 0.0 {
        push(ModifierKind::UserMultiplier, prefs.timeout_multiplier);
    }

    let factor: f64 = modifiers.iter().map(|m| m.factor).product();
    let mut raw = base_ms as f64 * factor;

    let dry_run_capped = options.dry_run && raw > DRY_RUN_CAP_MS as f64;
    if options.dry_run {
        raw = raw.min(DRY_RUN_CAP_MS as f64);
    }

    let final_ms = (raw.round() as u64).clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);

    TimeoutPlan {
        base_ms,
        base_source,
        size_bucket: size,
        modifiers,
        final_ms,
        dry_run_capped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkSpeed;

    fn install(package: &str) -> Command {
        let attr = format!("nixpkgs.{}", package);
        Command::new(
            "nix-env",
            vec!["-iA".to_string(), attr],
            format!("Install {}", package),
            OperationKind::Install,
        )
        .with_target(package)
    }

    fn plan(command: &Command, prefs: &Preferences, snapshot: &SystemSnapshot) -> TimeoutPlan {
        estimate(command, TimeoutOptions::new(prefs), snapshot)
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(size_bucket("hello"), SizeBucket::Instant);
        assert_eq!(size_bucket("nixpkgs.firefox"), SizeBucket::Large);
        assert_eq!(size_bucket("texlive.combined.scheme-full"), SizeBucket::Huge);
        assert_eq!(size_bucket("discord-bin"), SizeBucket::Medium);
        assert_eq!(size_bucket("python3Packages.requests"), SizeBucket::Small);
        assert_eq!(size_bucket("some-obscure-thing"), SizeBucket::Unknown);
    }

    #[test]
    fn test_install_uses_package_size() {
        let prefs = Preferences::default();
        let p = plan(&install("firefox"), &prefs, &SystemSnapshot::default());
        assert_eq!(p.base_source, BaseSource::PackageSize);
        assert_eq!(p.base_ms, 10 * MINUTE);
        assert_eq!(p.final_ms, 10 * MINUTE);
        assert!(p.modifiers.is_empty());
    }

    #[test]
    fn test_modifiers_multiply() {
        let prefs = Preferences {
            patient_mode: true,
            network_speed: NetworkSpeed::Slow,
            ..Default::default()
        };
        let snapshot = SystemSnapshot {
            load_avg: 8.0,
            cpu_count: 4,
            has_local_cache: false,
            first_run: false,
        };
        let p = plan(&install("ripgrep"), &prefs, &snapshot);
        // 60s x 2 (slow) x 2 (cold) x 1.5 (load) x 2 (patient)
        assert_eq!(p.final_ms, 720 * SECOND);
        assert!((p.multiplier() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_network_only_affects_downloads() {
        let prefs = Preferences {
            network_speed: NetworkSpeed::VerySlow,
            ..Default::default()
        };
        let logs = Command::new("journalctl", vec![], "logs", OperationKind::Logs);
        let p = plan(&logs, &prefs, &SystemSnapshot::default());
        assert_eq!(p.final_ms, 15 * SECOND);
    }

    #[test]
    fn test_source_build_triples() {
        let prefs = Preferences::default();
        let p = plan(&install("hyprland-git"), &prefs, &SystemSnapshot::default());
        assert!(p.modifiers.iter().any(|m| m.kind == ModifierKind::SourceBuild));
        assert_eq!(p.final_ms, 15 * MINUTE);
    }

    #[test]
    fn test_custom_timeout_overrides_table() {
        let mut prefs = Preferences::default();
        prefs.custom_timeouts.insert("chromium".to_string(), 120);
        let p = plan(&install("chromium"), &prefs, &SystemSnapshot::default());
        assert_eq!(p.base_source, BaseSource::CustomTimeout);
        assert_eq!(p.final_ms, 120 * SECOND);
    }

    #[test]
    fn test_dry_run_caps() {
        let prefs = Preferences::default();
        let cmd = install("libreoffice");
        let p = estimate(
            &cmd,
            TimeoutOptions::new(&prefs).with_dry_run(true),
            &SystemSnapshot::default(),
        );
        assert_eq!(p.final_ms, DRY_RUN_CAP_MS);
        assert!(p.dry_run_capped);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let tiny = Preferences {
            timeout_multiplier: 0.01,
            ..Default::default()
        };
        let status = Command::new("systemctl", vec![], "status", OperationKind::ServiceStatus);
        assert_eq!(plan(&status, &tiny, &SystemSnapshot::default()).final_ms, MIN_TIMEOUT_MS);

        let huge = Preferences {
            patient_mode: true,
            network_speed: NetworkSpeed::VerySlow,
            timeout_multiplier: 10.0,
            ..Default::default()
        };
        let update = Command::new("nixos-rebuild", vec![], "update", OperationKind::UpdateSystem);
        assert_eq!(plan(&update, &huge, &SystemSnapshot::default()).final_ms, MAX_TIMEOUT_MS);
    }

    #[test]
    fn test_deterministic_and_bounded_across_inputs() {
        let speeds = [
            NetworkSpeed::Fast,
            NetworkSpeed::Normal,
            NetworkSpeed::Slow,
            NetworkSpeed::VerySlow,
        ];
        let packages = ["hello", "firefox", "chromium", "unknown-pkg", "foo-git"];
        for speed in speeds {
            for patient in [false, true] {
                for package in packages {
                    let prefs = Preferences {
                        patient_mode: patient,
                        network_speed: speed,
                        ..Default::default()
                    };
                    let snapshot = SystemSnapshot {
                        load_avg: 16.0,
                        cpu_count: 2,
                        has_local_cache: false,
                        first_run: true,
                    };
                    let cmd = install(package);
                    let a = plan(&cmd, &prefs, &snapshot);
                    let b = plan(&cmd, &prefs, &snapshot);
                    assert_eq!(a, b);
                    assert!((MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&a.final_ms));
                }
            }
        }
    }
}

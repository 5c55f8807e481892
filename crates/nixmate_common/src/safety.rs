//! Safety Validator - the gate every command passes immediately before spawn
//!
//! Pure function of (program, argv). Verdicts are never cached: the
//! execution engine asks again for every spawn, rollbacks included.
//!
//! Checks, in order:
//! 1. dangerous patterns (root deletes, disk formatting, fork bombs, ...)
//! 2. exact-program allow-list
//! 3. per-program allowed operations and flags
//! 4. argv hygiene: no shell metacharacters, substitution or traversal

use crate::command::Command;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Verdict
// ============================================================================

/// Outcome of validation. Reason and suggestion are shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Which check rejected the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl SafetyVerdict {
    pub fn allow() -> Self {
        Self {
            is_safe: true,
            reason: None,
            suggestion: None,
            rule: None,
        }
    }

    pub fn block(rule: impl Into<String>, reason: impl Into<String>, suggestion: Option<String>) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason.into()),
            suggestion,
            rule: Some(rule.into()),
        }
    }
}

// ============================================================================
// Dangerous patterns
// ============================================================================

/// A pattern that is never allowed, whatever produced the command
#[derive(Debug)]
pub struct DangerousPattern {
    pub name: &'static str,
    pub reason: &'static str,
    pub suggestion: &'static str,
    regex: Regex,
}

static DANGEROUS_PATTERNS: Lazy<Vec<DangerousPattern>> = Lazy::new(|| {
    let table: &[(&'static str, &'static str, &'static str, &'static str)] = &[
        (
            "recursive_root_delete",
            r"\brm\b.*\s(?:-[A-Za-z]*[rR][A-Za-z]*|--recursive)\b.*\s(?:/\*?|~/?|\$HOME)(?:\s|$)",
            "recursive delete of the root or home directory",
            "Remove specific packages instead, e.g. \"remove firefox\".",
        ),
        (
            "no_preserve_root",
            r"--no-preserve-root",
            "root protection override",
            "This is never needed for package management.",
        ),
        (
            "disk_format",
            r"\b(?:mkfs(?:\.[a-z0-9]+)?|mke2fs|wipefs|fdisk|sfdisk|gdisk|parted|shred)\b",
            "disk formatting or wiping",
            "Partitioning and formatting must be done by hand.",
        ),
        (
            "fork_bomb",
            r":\s*\(\s*\)\s*\{.*:\s*\|\s*:.*\}",
            "fork bomb",
            "This would exhaust system resources.",
        ),
        (
            "permission_wipe",
            r"\bch(?:mod|own|grp)\b.*\s(?:/|/etc|/usr|/bin|/boot|/nix|/var|/home)/?(?:\s|$)|\bchmod\s+(?:-\S+\s+)*0*000\b|\bchmod\s+(?:-\S+\s+)*-[A-Za-z]*R[A-Za-z]*\s+777\b",
            "permission or ownership change on system directories",
            "Permissions on system paths are managed by NixOS.",
        ),
        (
            "raw_device_write",
            r"\bdd\b.*\bof=|/dev/(?:sd[a-z]|nvme\d|hd[a-z]|vd[a-z]|xvd[a-z]|mmcblk\d|disk/)",
            "raw block device access",
            "Writing to devices directly can destroy data.",
        ),
        (
            "attack_tool",
            r"\b(?:nmap|masscan|hydra|john|hashcat|aircrack-ng|sqlmap|msfconsole|msfvenom|metasploit|nikto|ettercap|hping3|slowloris)\b",
            "network attack or password cracking tool",
            "Security tooling is out of scope for this assistant.",
        ),
        (
            "credential_access",
            r"/etc/(?:shadow|gshadow|sudoers|passwd)\b|\.ssh/(?:id_|authorized_keys)|\.gnupg\b|\.aws/credentials|\.netrc\b|\.kube/config|\.docker/config\.json",
            "access to credential files",
            "Credential files are never read or modified.",
        ),
    ];

    table
        .iter()
        .filter_map(|(name, pattern, reason, suggestion)| {
            Regex::new(pattern).ok().map(|regex| DangerousPattern {
                name: *name,
                reason: *reason,
                suggestion: *suggestion,
                regex,
            })
        })
        .collect()
});

/// First dangerous pattern found in free text or a rendered command line
pub fn dangerous_match(text: &str) -> Option<&'static DangerousPattern> {
    let patterns: &'static [DangerousPattern] = DANGEROUS_PATTERNS.as_slice();
    patterns.iter().find(|p| p.regex.is_match(text))
}

// ============================================================================
// Allow-list
// ============================================================================

/// How a program names its operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStyle {
    /// First argument is a verb: `systemctl restart`, `nixos-rebuild switch`
    Subcommand,
    /// First argument is an operation flag: `nix-env -iA`, `nix-store --optimise`
    Flag,
    /// No operation; only the flags are checked: `journalctl -u x`, `df -h`
    FlagsOnly,
}

/// What one allow-listed program may be asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramPolicy {
    pub style: OperationStyle,
    pub operations: Vec<String>,
    pub flags: Vec<String>,
    /// Running with no arguments is allowed
    pub allow_bare: bool,
    /// Any flag passes step 3 (steps 1 and 4 still apply)
    pub any_flag: bool,
}

impl ProgramPolicy {
    pub fn new(style: OperationStyle, operations: &[&str], flags: &[&str]) -> Self {
        Self {
            style,
            operations: operations.iter().map(|s| s.to_string()).collect(),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            allow_bare: false,
            any_flag: false,
        }
    }

    pub fn bare(mut self) -> Self {
        self.allow_bare = true;
        self
    }

    /// Policy that accepts any arguments that pass the hygiene check
    pub fn any() -> Self {
        Self {
            style: OperationStyle::FlagsOnly,
            operations: Vec::new(),
            flags: Vec::new(),
            allow_bare: true,
            any_flag: true,
        }
    }

    fn flag_allowed(&self, flag: &str) -> bool {
        if self.any_flag {
            return true;
        }
        let key = flag.split('=').next().unwrap_or(flag);
        self.flags.iter().any(|f| f == key) || self.operations.iter().any(|o| o == key)
    }
}

fn builtin_policies() -> BTreeMap<String, ProgramPolicy> {
    use OperationStyle::*;
    let mut policies = BTreeMap::new();
    let mut add = |name: &str, policy: ProgramPolicy| {
        policies.insert(name.to_string(), policy);
    };

    add(
        "nix-env",
        ProgramPolicy::new(
            Flag,
            &["-iA", "-i", "-e", "-u", "-q", "-qa", "-qaP", "--rollback", "--list-generations"],
            &["--attr", "-A", "--installed", "--available", "--description", "--dry-run"],
        ),
    );
    add(
        "nixos-rebuild",
        ProgramPolicy::new(
            Subcommand,
            &["switch", "boot", "test", "build", "dry-build", "dry-activate"],
            &["--upgrade", "--rollback", "--show-trace"],
        ),
    );
    add(
        "nix-channel",
        ProgramPolicy::new(Flag, &["--update", "--rollback", "--list"], &[]),
    );
    add(
        "nix-collect-garbage",
        ProgramPolicy::new(Flag, &["-d", "--delete-old", "--delete-older-than"], &["--dry-run"]).bare(),
    );
    add(
        "nix-store",
        ProgramPolicy::new(Flag, &["--optimise", "--verify", "--gc"], &["--check-contents", "--print-dead"]),
    );
    add(
        "systemctl",
        ProgramPolicy::new(
            Subcommand,
            &[
                "start", "stop", "restart", "reload", "enable", "disable", "status",
                "list-units", "is-active", "is-enabled", "is-failed",
            ],
            &["--no-pager", "--type", "--failed", "--all", "--state", "--user", "--now"],
        ),
    );
    add(
        "journalctl",
        ProgramPolicy::new(
            FlagsOnly,
            &[],
            &["-u", "-n", "-p", "-b", "-e", "-k", "--no-pager", "--since", "--until", "--unit", "--lines", "--priority"],
        )
        .bare(),
    );
    add("nixos-option", ProgramPolicy::new(FlagsOnly, &[], &[]));
    add("ip", ProgramPolicy::new(Subcommand, &["addr", "address", "route", "link"], &[]));
    add("df", ProgramPolicy::new(FlagsOnly, &[], &["-h", "-i", "-T"]).bare());
    add("free", ProgramPolicy::new(FlagsOnly, &[], &["-h", "-m", "-g"]).bare());
    add("pactl", ProgramPolicy::new(Subcommand, &["info", "list"], &[]));
    policies
}

// ============================================================================
// Validator
// ============================================================================

/// Characters that never appear in a safe argument
const FORBIDDEN_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\n', '\r', '\0', '*', '?', '\'', '"', '\\', '{',
    '}', '!',
];

static POSITIONAL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+@:/=,-]*$").ok());
static FLAG: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^--?[A-Za-z0-9][A-Za-z0-9-]*(?:=[A-Za-z0-9._:/,@+-]+)?$").ok());

/// Stateless gate. Holding one is cheap; it never records verdicts.
#[derive(Debug, Clone)]
pub struct SafetyValidator {
    policies: BTreeMap<String, ProgramPolicy>,
}

impl Default for SafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyValidator {
    pub fn new() -> Self {
        Self {
            policies: builtin_policies(),
        }
    }

    /// Register an extra program (exact name or absolute path)
    pub fn allow_program(&mut self, program: impl Into<String>, policy: ProgramPolicy) {
        self.policies.insert(program.into(), policy);
    }

    pub fn allowed_programs(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn validate_command(&self, command: &Command) -> SafetyVerdict {
        self.validate(&command.program, &command.argv)
    }

    pub fn validate(&self, program: &str, argv: &[String]) -> SafetyVerdict {
        // 1. Dangerous patterns over the whole command line
        let mut line = program.to_string();
        for arg in argv {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(pattern) = dangerous_match(&line) {
            return SafetyVerdict::block(
                pattern.name,
                format!("command looks like a {}", pattern.reason),
                Some(pattern.suggestion.to_string()),
            );
        }

        // 2. Exact program allow-list
        let Some(policy) = self.policies.get(program) else {
            return SafetyVerdict::block(
                "program_not_allowed",
                format!("'{}' is not an allowed program", program),
                Some(format!(
                    "Describe what you want in plain words; allowed programs are: {}.",
                    self.policies
                        .keys()
                        .filter(|k| !k.starts_with('/'))
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            );
        };

        // 3. Operation and flags
        let verdict = self.check_operation(program, policy, argv);
        if !verdict.is_safe {
            return verdict;
        }

        // 4. Argument hygiene, whoever built the argv
        check_hygiene(argv).unwrap_or(verdict)
    }

    fn check_operation(&self, program: &str, policy: &ProgramPolicy, argv: &[String]) -> SafetyVerdict {
        if argv.is_empty() {
            return if policy.allow_bare {
                SafetyVerdict::allow()
            } else {
                SafetyVerdict::block(
                    "operation_not_allowed",
                    format!("'{}' needs an operation", program),
                    Some(allowed_list(program, policy)),
                )
            };
        }

        let rest = match policy.style {
            OperationStyle::Subcommand | OperationStyle::Flag if !policy.any_flag => {
                let op = argv[0].as_str();
                if !policy.operations.iter().any(|o| o == op) {
                    return SafetyVerdict::block(
                        "operation_not_allowed",
                        format!("'{} {}' is not an allowed operation", program, op),
                        Some(allowed_list(program, policy)),
                    );
                }
                &argv[1..]
            }
            _ => argv,
        };

        for arg in rest.iter().filter(|a| a.starts_with('-')) {
            if !policy.flag_allowed(arg) {
                return SafetyVerdict::block(
                    "flag_not_allowed",
                    format!("flag '{}' is not allowed for {}", arg, program),
                    Some(allowed_list(program, policy)),
                );
            }
        }

        SafetyVerdict::allow()
    }
}

fn allowed_list(program: &str, policy: &ProgramPolicy) -> String {
    let mut allowed: Vec<&str> = policy.operations.iter().map(String::as_str).collect();
    allowed.extend(policy.flags.iter().map(String::as_str));
    if allowed.is_empty() {
        format!("{} takes no options here.", program)
    } else {
        format!("Allowed for {}: {}.", program, allowed.join(", "))
    }
}

fn check_hygiene(argv: &[String]) -> Option<SafetyVerdict> {
    for arg in argv {
        if let Some(c) = arg.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
            return Some(SafetyVerdict::block(
                "shell_metacharacter",
                format!("argument '{}' contains the shell character {:?}", arg.escape_debug(), c),
                Some("Arguments must be plain names.".to_string()),
            ));
        }
        if arg.split('/').any(|seg| seg == "..") || arg.starts_with('~') {
            return Some(SafetyVerdict::block(
                "path_traversal",
                format!("argument '{}' traverses directories", arg),
                Some("Arguments must be plain names.".to_string()),
            ));
        }

        let pattern = if arg.starts_with('-') { &*FLAG } else { &*POSITIONAL };
        let well_formed = pattern.as_ref().map_or(false, |re| re.is_match(arg));
        if !well_formed {
            return Some(SafetyVerdict::block(
                "malformed_argument",
                format!("argument '{}' is not a plain name or flag", arg),
                Some("Arguments must be plain names.".to_string()),
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(line: &str) -> SafetyVerdict {
        let mut parts = line.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let argv: Vec<String> = parts.map(String::from).collect();
        SafetyValidator::new().validate(program, &argv)
    }

    #[test]
    fn test_allows_builder_output() {
        for line in [
            "nix-env -iA nixpkgs.firefox",
            "nix-env -e firefox",
            "nix-env -qaP ripgrep",
            "nix-env -q",
            "nix-env --list-generations",
            "nixos-rebuild switch --upgrade",
            "nixos-rebuild switch --rollback",
            "nix-channel --update",
            "nix-collect-garbage -d",
            "nix-collect-garbage --delete-older-than 30d",
            "nix-store --optimise",
            "systemctl restart nginx",
            "systemctl status nginx --no-pager",
            "systemctl list-units --type=service --no-pager",
            "systemctl list-units --failed --no-pager",
            "journalctl -u nginx -n 50 --no-pager",
            "journalctl -p err -b --no-pager",
            "nixos-option networking.firewall.enable",
            "ip addr show",
            "df -h",
            "free -h",
        ] {
            let verdict = check(line);
            assert!(verdict.is_safe, "{} rejected: {:?}", line, verdict.reason);
        }
    }

    #[test]
    fn test_denies_dangerous() {
        for (line, rule) in [
            ("rm -rf /", "recursive_root_delete"),
            ("rm -r -f /*", "recursive_root_delete"),
            ("mkfs.ext4 /dev/sda1", "disk_format"),
            ("dd if=/dev/zero of=/dev/sda", "raw_device_write"),
            ("chmod -R 777 /", "permission_wipe"),
            ("nmap -sS 10.0.0.1", "attack_tool"),
            ("cat /etc/shadow", "credential_access"),
            ("nix-env -iA nixpkgs.john", "attack_tool"),
        ] {
            let verdict = check(line);
            assert!(!verdict.is_safe, "{} allowed", line);
            assert_eq!(verdict.rule.as_deref(), Some(rule), "{}", line);
            assert!(verdict.reason.is_some());
            assert!(verdict.suggestion.is_some());
        }
    }

    #[test]
    fn test_program_not_in_allow_list() {
        let verdict = check("curl http://example.com");
        assert_eq!(verdict.rule.as_deref(), Some("program_not_allowed"));
        // A path to an allowed program is still a different program
        assert!(!check("/usr/bin/nix-env -q").is_safe);
        assert!(!check("sudo nix-env -q").is_safe);
    }

    #[test]
    fn test_operation_not_allowed() {
        let verdict = check("systemctl mask nginx");
        assert_eq!(verdict.rule.as_deref(), Some("operation_not_allowed"));
        let verdict = check("nix-env --set-flag priority 5 firefox");
        assert_eq!(verdict.rule.as_deref(), Some("operation_not_allowed"));
        let verdict = check("systemctl restart nginx --force");
        assert_eq!(verdict.rule.as_deref(), Some("flag_not_allowed"));
        assert!(!check("nixos-rebuild").is_safe);
    }

    #[test]
    fn test_argv_hygiene_regardless_of_origin() {
        let validator = SafetyValidator::new();
        let argv = vec!["-iA".to_string(), "nixpkgs.firefox;reboot".to_string()];
        let verdict = validator.validate("nix-env", &argv);
        assert_eq!(verdict.rule.as_deref(), Some("shell_metacharacter"));

        let argv = vec!["-e".to_string(), "$(id)".to_string()];
        assert!(!validator.validate("nix-env", &argv).is_safe);

        let argv = vec!["status".to_string(), "../../bin/sh".to_string()];
        assert_eq!(
            validator.validate("systemctl", &argv).rule.as_deref(),
            Some("path_traversal")
        );
    }

    #[test]
    fn test_registered_program() {
        let mut validator = SafetyValidator::new();
        validator.allow_program("/tmp/nixmate-test/build.sh", ProgramPolicy::any());
        assert!(validator.validate("/tmp/nixmate-test/build.sh", &[]).is_safe);
        let argv = vec!["--fast".to_string(), "30".to_string()];
        assert!(validator.validate("/tmp/nixmate-test/build.sh", &argv).is_safe);
        let argv = vec!["a|b".to_string()];
        assert!(!validator.validate("/tmp/nixmate-test/build.sh", &argv).is_safe);
    }

    #[test]
    fn test_dangerous_match_on_text() {
        assert!(dangerous_match("rm -rf /").is_some());
        assert!(dangerous_match("install firefox").is_none());
        assert!(dangerous_match("remove the chromium browser").is_none());
    }
}

//! Entity Catalog
//!
//! Static phrase tables mapping free text to canonical identifiers:
//! nixpkgs attribute names, systemd units, NixOS option paths and problem
//! categories. The catalog is read-only and shared by every session.

use crate::types::ProblemCategory;
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Tables
// ============================================================================

/// (canonical attribute, phrases that name it)
const PACKAGES: &[(&str, &[&str])] = &[
    ("firefox", &["firefox", "mozilla firefox", "firefox browser"]),
    ("chromium", &["chromium", "chrome", "google chrome"]),
    ("brave", &["brave", "brave browser"]),
    ("vscode", &["vscode", "vs code", "visual studio code"]),
    ("neovim", &["neovim", "nvim"]),
    ("vim", &["vim"]),
    ("emacs", &["emacs"]),
    ("git", &["git"]),
    ("htop", &["htop"]),
    ("btop", &["btop"]),
    ("vlc", &["vlc", "vlc player"]),
    ("mpv", &["mpv"]),
    ("libreoffice", &["libreoffice", "libre office", "office suite"]),
    ("gimp", &["gimp"]),
    ("inkscape", &["inkscape"]),
    ("blender", &["blender"]),
    ("kdenlive", &["kdenlive"]),
    ("audacity", &["audacity"]),
    ("obs-studio", &["obs", "obs studio"]),
    ("thunderbird", &["thunderbird"]),
    ("evolution", &["evolution"]),
    ("spotify", &["spotify"]),
    ("rhythmbox", &["rhythmbox"]),
    ("discord", &["discord"]),
    ("slack", &["slack"]),
    ("zoom-us", &["zoom"]),
    ("telegram-desktop", &["telegram"]),
    ("signal-desktop", &["signal"]),
    ("steam", &["steam"]),
    ("keepassxc", &["keepassxc", "keepass"]),
    ("alacritty", &["alacritty"]),
    ("kitty", &["kitty"]),
    ("tmux", &["tmux"]),
    ("zsh", &["zsh"]),
    ("fish", &["fish", "fish shell"]),
    ("curl", &["curl"]),
    ("wget", &["wget"]),
    ("tree", &["tree"]),
    ("jq", &["jq"]),
    ("ripgrep", &["ripgrep"]),
    ("fd", &["fd"]),
    ("python3", &["python", "python3"]),
    ("nodejs", &["node", "nodejs", "node.js"]),
    ("gcc", &["gcc"]),
    ("rustup", &["rustup", "rust"]),
    ("go", &["golang"]),
    ("ghc", &["ghc", "haskell"]),
    ("texlive.combined.scheme-full", &["texlive", "latex"]),
    ("docker", &["docker"]),
    ("nginx", &["nginx"]),
    ("postgresql", &["postgresql", "postgres"]),
    ("redis", &["redis"]),
    ("openssh", &["openssh"]),
];

/// Generic phrases that name a category of packages
const GENERIC_PACKAGES: &[(&str, &[&str])] = &[
    ("browser", &["firefox", "chromium", "brave"]),
    ("text editor", &["vim", "neovim", "vscode"]),
    ("editor", &["vim", "neovim", "vscode"]),
    ("video player", &["vlc", "mpv"]),
    ("media player", &["vlc", "mpv"]),
    ("music player", &["spotify", "rhythmbox"]),
    ("terminal", &["alacritty", "kitty"]),
    ("email client", &["thunderbird", "evolution"]),
    ("mail client", &["thunderbird", "evolution"]),
    ("chat app", &["discord", "slack", "signal-desktop"]),
];

/// (systemd unit, phrases that name it)
const SERVICES: &[(&str, &[&str])] = &[
    ("nginx", &["nginx", "web server"]),
    ("httpd", &["apache", "httpd"]),
    ("sshd", &["ssh", "sshd", "openssh", "ssh server"]),
    ("docker", &["docker"]),
    ("postgresql", &["postgresql", "postgres", "database"]),
    ("mysql", &["mysql", "mariadb"]),
    ("redis", &["redis"]),
    ("NetworkManager", &["networkmanager", "network manager"]),
    ("bluetooth", &["bluetooth"]),
    ("cups", &["cups", "printing", "printer"]),
    ("pipewire", &["pipewire", "sound server"]),
    ("firewall", &["firewall"]),
    ("tailscaled", &["tailscale", "tailscaled"]),
    ("display-manager", &["display manager", "login screen"]),
    ("syncthing", &["syncthing"]),
];

/// (setting phrase, NixOS option path)
const SETTINGS: &[(&[&str], &str)] = &[
    (&["firewall"], "networking.firewall.enable"),
    (&["ssh", "openssh"], "services.openssh.enable"),
    (&["bluetooth"], "hardware.bluetooth.enable"),
    (
        &["automatic updates", "auto updates", "auto upgrade", "automatic upgrades"],
        "system.autoUpgrade.enable",
    ),
    (&["printing"], "services.printing.enable"),
    (&["sound", "audio"], "services.pipewire.enable"),
    (&["timezone", "time zone"], "time.timeZone"),
    (&["hostname", "host name"], "networking.hostName"),
    (
        &["garbage collection", "automatic garbage collection", "auto gc"],
        "nix.gc.automatic",
    ),
    (&["flakes", "experimental features"], "nix.settings.experimental-features"),
    (&["docker"], "virtualisation.docker.enable"),
];

const PROBLEMS: &[(&[&str], ProblemCategory)] = &[
    (
        &["wifi", "wi-fi", "internet", "network", "networking", "connection", "ethernet", "dns"],
        ProblemCategory::Network,
    ),
    (
        &["sound", "audio", "speakers", "headphones", "microphone", "mic"],
        ProblemCategory::Audio,
    ),
    (&["disk", "storage", "drive", "space", "disk space"], ProblemCategory::Disk),
    (&["memory", "ram", "swap"], ProblemCategory::Memory),
    (&["boot", "startup", "booting"], ProblemCategory::Boot),
    (&["services", "service", "daemons"], ProblemCategory::Services),
];

const PRONOUNS: &[&str] = &["it", "that", "this", "them", "those", "that one", "this one", "same"];

// ============================================================================
// Catalog
// ============================================================================

/// How a package phrase resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one canonical identifier
    Exact(String),
    /// A generic phrase naming several candidates
    Candidates { phrase: String, options: Vec<String> },
    /// Not in the catalog; the normalised text passes through as-is
    Unresolved(String),
}

impl Resolution {
    pub fn exact(&self) -> Option<&str> {
        match self {
            Resolution::Exact(v) => Some(v),
            _ => None,
        }
    }

    /// Single value to use, whether catalogued or passed through
    pub fn single(&self) -> Option<&str> {
        match self {
            Resolution::Exact(v) | Resolution::Unresolved(v) => Some(v),
            Resolution::Candidates { .. } => None,
        }
    }
}

/// Read-only phrase tables
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    packages: HashMap<String, String>,
    generic: HashMap<String, Vec<String>>,
    services: HashMap<String, String>,
    service_units: BTreeSet<String>,
    settings: HashMap<String, String>,
    problems: HashMap<String, ProblemCategory>,
}

impl Default for EntityCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EntityCatalog {
    /// Catalog built from the compiled-in tables
    pub fn builtin() -> Self {
        let mut packages = HashMap::new();
        for (attr, phrases) in PACKAGES {
            for phrase in *phrases {
                packages.insert(phrase.to_string(), attr.to_string());
            }
        }

        let generic = GENERIC_PACKAGES
            .iter()
            .map(|(phrase, options)| {
                (
                    phrase.to_string(),
                    options.iter().map(|o| o.to_string()).collect(),
                )
            })
            .collect();

        let mut services = HashMap::new();
        let mut service_units = BTreeSet::new();
        for (unit, phrases) in SERVICES {
            service_units.insert(unit.to_string());
            for phrase in *phrases {
                services.insert(phrase.to_string(), unit.to_string());
            }
        }

        let mut settings = HashMap::new();
        for (phrases, option) in SETTINGS {
            for phrase in *phrases {
                settings.insert(phrase.to_string(), option.to_string());
            }
        }

        let mut problems = HashMap::new();
        for (phrases, category) in PROBLEMS {
            for phrase in *phrases {
                problems.insert(phrase.to_string(), *category);
            }
        }

        Self {
            packages,
            generic,
            services,
            service_units,
            settings,
            problems,
        }
    }

    /// Resolve a package phrase ("the web browser", "VS Code", "ripgrep")
    pub fn resolve_package(&self, phrase: &str) -> Resolution {
        let key = strip_determiners(phrase);
        if let Some(attr) = self.packages.get(&key) {
            return Resolution::Exact(attr.clone());
        }
        if let Some(options) = self.generic.get(&key) {
            return Resolution::Candidates {
                phrase: key,
                options: options.clone(),
            };
        }
        if let Some(stem) = key.strip_suffix('s') {
            if let Some(options) = self.generic.get(stem) {
                return Resolution::Candidates {
                    phrase: stem.to_string(),
                    options: options.clone(),
                };
            }
        }
        Resolution::Unresolved(pass_through(&key))
    }

    /// Resolve a service phrase to a systemd unit name
    pub fn resolve_service(&self, phrase: &str) -> Resolution {
        let key = strip_determiners(phrase);
        let key = key
            .strip_suffix(".service")
            .map(str::to_string)
            .unwrap_or(key);
        match self.services.get(&key) {
            Some(unit) => Resolution::Exact(unit.clone()),
            None => Resolution::Unresolved(pass_through(&key)),
        }
    }

    /// NixOS option path for a setting phrase
    pub fn resolve_setting(&self, phrase: &str) -> Option<&str> {
        let key = strip_determiners(phrase);
        self.settings.get(&key).map(String::as_str)
    }

    /// Problem category named by a phrase ("my wifi", "sound")
    pub fn problem_category(&self, phrase: &str) -> Option<ProblemCategory> {
        let key = strip_determiners(phrase);
        if let Some(category) = self.problems.get(&key) {
            return Some(*category);
        }
        // "wifi connection", "disk space usage": first word that names a category
        key.split_whitespace()
            .find_map(|word| self.problems.get(word).copied())
    }

    /// Is this canonical name a known systemd unit?
    pub fn is_known_service(&self, name: &str) -> bool {
        self.service_units.contains(name) || self.services.contains_key(name)
    }

    /// Is this phrase a catalogued package (not a generic one)?
    pub fn is_known_package(&self, phrase: &str) -> bool {
        self.packages.contains_key(&strip_determiners(phrase))
    }

    /// Service unit for a package name, when the package ships one
    pub fn service_for_package(&self, package: &str) -> Option<&str> {
        self.services.get(package).map(String::as_str)
    }

    /// Words the typo corrector may correct towards
    pub fn vocabulary(&self) -> BTreeSet<String> {
        let mut words = BTreeSet::new();
        let phrases = self
            .packages
            .keys()
            .chain(self.generic.keys())
            .chain(self.services.keys())
            .chain(self.settings.keys())
            .chain(self.problems.keys());
        for phrase in phrases {
            for word in phrase.split_whitespace() {
                words.insert(word.to_lowercase());
            }
        }
        words
    }
}

/// Is the phrase a pronoun standing in for an earlier target?
pub fn is_pronoun(phrase: &str) -> bool {
    let key = strip_determiners(phrase);
    PRONOUNS.contains(&key.as_str())
}

/// Lowercase, drop leading articles/possessives and trailing filler
fn strip_determiners(phrase: &str) -> String {
    let lowered = phrase.trim().to_lowercase();
    let mut words: Vec<&str> = lowered.split_whitespace().collect();
    while let Some(first) = words.first() {
        if matches!(*first, "the" | "a" | "an" | "my" | "some" | "our" | "your") {
            words.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = words.last() {
        if matches!(*last, "please" | "package" | "app" | "application" | "program") && words.len() > 1 {
            words.pop();
        } else {
            break;
        }
    }
    words.join(" ")
}

/// Normalised identifier for an uncatalogued name
fn pass_through(key: &str) -> String {
    key.split_whitespace().collect::<Vec<_>>().join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_exact_package() {
        let catalog = EntityCatalog::builtin();
        assert_eq!(
            catalog.resolve_package("Visual Studio Code"),
            Resolution::Exact("vscode".to_string())
        );
        assert_eq!(
            catalog.resolve_package("the firefox"),
            Resolution::Exact("firefox".to_string())
        );
    }

    #[test]
    fn test_generic_phrase_yields_candidates() {
        let catalog = EntityCatalog::builtin();
        match catalog.resolve_package("a browser") {
            Resolution::Candidates { phrase, options } => {
                assert_eq!(phrase, "browser");
                assert!(options.contains(&"firefox".to_string()));
                assert!(options.len() >= 2);
            }
            other => panic!("expected candidates, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_passes_through_normalised() {
        let catalog = EntityCatalog::builtin();
        assert_eq!(
            catalog.resolve_package("Super Tux Kart"),
            Resolution::Unresolved("super-tux-kart".to_string())
        );
    }

    #[test]
    fn test_service_resolution() {
        let catalog = EntityCatalog::builtin();
        assert_eq!(
            catalog.resolve_service("the ssh server"),
            Resolution::Exact("sshd".to_string())
        );
        assert_eq!(
            catalog.resolve_service("nginx.service"),
            Resolution::Exact("nginx".to_string())
        );
        assert!(catalog.is_known_service("nginx"));
    }

    #[test]
    fn test_problem_category() {
        let catalog = EntityCatalog::builtin();
        assert_eq!(catalog.problem_category("my wifi"), Some(ProblemCategory::Network));
        assert_eq!(
            catalog.problem_category("disk space usage"),
            Some(ProblemCategory::Disk)
        );
        assert_eq!(catalog.problem_category("spreadsheet"), None);
    }

    #[test]
    fn test_pronouns() {
        assert!(is_pronoun("it"));
        assert!(is_pronoun("that"));
        assert!(!is_pronoun("nginx"));
    }

    #[test]
    fn test_vocabulary_contains_names() {
        let vocab = EntityCatalog::builtin().vocabulary();
        assert!(vocab.contains("firefox"));
        assert!(vocab.contains("nginx"));
        assert!(vocab.contains("browser"));
    }
}

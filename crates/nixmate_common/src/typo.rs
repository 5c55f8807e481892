//! Typo Corrector & Normalization
//!
//! Normalises case, punctuation and contractions, applies exact phrase
//! substitutions, then corrects each word to its nearest vocabulary entry by
//! Levenshtein distance. A correction is accepted only when the distance is
//! at most 2 and strictly smaller than every other candidate; ties keep the
//! original word. Words of four letters or fewer are held to distance 1.
//! Cost is O(words x vocabulary).

use crate::catalog::EntityCatalog;
use std::collections::HashSet;

/// Verbs and nouns the recognizer's rules are written against
const COMMAND_WORDS: &[&str] = &[
    "install", "uninstall", "remove", "delete", "erase", "update", "upgrade", "search", "find",
    "look", "start", "stop", "restart", "reload", "enable", "disable", "status", "check", "show",
    "list", "view", "display", "logs", "log", "journal", "errors", "error", "clean", "cleanup",
    "garbage", "collect", "collection", "optimise", "optimize", "generations", "generation",
    "rollback", "roll", "back", "undo", "service", "services", "package", "packages", "installed",
    "system", "channels", "channel", "everything", "configure", "setting", "settings", "option",
    "config", "configuration", "fix", "troubleshoot", "diagnose", "debug", "repair", "broken",
    "working", "running", "slow", "full", "again", "retry", "repeat", "download", "information",
    "active", "store", "nixos", "space", "days", "describe", "browser", "please", "give",
    "want", "going", "tell", "about", "wrong",
];

/// Largest accepted edit distance
const MAX_DISTANCE: usize = 2;

/// Words up to this length accept a single edit only; at distance 2 ordinary
/// words land on commands ("info" on "undo", "skip" on "stop")
const SHORT_WORD_LEN: usize = 4;

/// Common words that are never corrected
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "my", "me", "i", "you", "your", "can", "could", "would", "will", "should",
    "to", "for", "of", "on", "in", "is", "it", "that", "this", "what", "how", "why", "when",
    "where", "which", "who", "and", "or", "with", "from", "some", "all", "any", "do", "does",
    "did", "not", "am", "are", "was", "be", "been", "have", "has", "had", "get", "got", "need",
    "like", "just", "now", "new", "one", "up", "down", "out", "off", "over", "then", "there",
    "them", "those", "these", "they", "we", "our", "us", "no", "yes", "ok", "okay", "thanks",
    "thank", "hello", "hi", "hey", "cannot", "keeps", "time", "more", "same", "way", "let",
    "set", "put", "make", "add", "run", "turn", "switch", "used", "using", "use", "into",
    "very", "really", "much", "many", "than", "older", "isn", "doesn", "won", "didn",
];

/// Exact phrase substitutions applied before word correction
const PHRASE_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("pls", "please"),
    ("plz", "please"),
    ("gimme", "give me"),
    ("wanna", "want to"),
    ("gonna", "going to"),
    ("u", "you"),
    ("ur", "your"),
    ("get rid of", "remove"),
    ("web browser", "browser"),
    ("internet browser", "browser"),
    ("clean up", "cleanup"),
    ("garbage collection", "garbage collect"),
];

const CONTRACTIONS: &[(&str, &str)] = &[
    ("what's", "what is"),
    ("where's", "where is"),
    ("it's", "it is"),
    ("that's", "that is"),
    ("isn't", "is not"),
    ("aren't", "are not"),
    ("doesn't", "does not"),
    ("don't", "do not"),
    ("didn't", "did not"),
    ("won't", "will not"),
    ("can't", "cannot"),
    ("couldn't", "could not"),
    ("i'm", "i am"),
    ("i'd", "i would"),
    ("i've", "i have"),
    ("let's", "let us"),
];

/// Classic edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Lowercase, expand contractions, drop punctuation, collapse whitespace.
///
/// Characters that occur inside package names (`-`, `.`, `_`, `+`, `@`)
/// are kept when they sit between word characters.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");

    let mut expanded = Vec::new();
    for word in lowered.split_whitespace() {
        match CONTRACTIONS.iter().find(|(from, _)| *from == word) {
            Some((_, to)) => expanded.push(to.to_string()),
            None => expanded.push(word.to_string()),
        }
    }

    let mut words = Vec::new();
    for word in expanded.join(" ").split_whitespace() {
        let cleaned = clean_word(word);
        if !cleaned.is_empty() {
            words.push(cleaned);
        }
    }
    words.join(" ")
}

fn clean_word(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len());
    for (i, c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            out.push(*c);
        } else if matches!(c, '-' | '.' | '_' | '+' | '@') {
            let inner = i > 0
                && i + 1 < chars.len()
                && chars[i - 1].is_alphanumeric()
                && chars[i + 1].is_alphanumeric();
            if inner {
                out.push(*c);
            }
        }
    }
    out
}

/// Nearest-match corrector over a finite vocabulary
#[derive(Debug, Clone)]
pub struct TypoCorrector {
    vocabulary: Vec<String>,
    known: HashSet<String>,
    stopwords: HashSet<&'static str>,
}

impl TypoCorrector {
    /// Vocabulary = command words + catalog names
    pub fn new(catalog: &EntityCatalog) -> Self {
        let mut known: HashSet<String> = catalog.vocabulary().into_iter().collect();
        known.extend(COMMAND_WORDS.iter().map(|w| w.to_string()));
        let mut vocabulary: Vec<String> = known.iter().cloned().collect();
        vocabulary.sort();

        Self {
            vocabulary,
            known,
            stopwords: STOPWORDS.iter().copied().collect(),
        }
    }

    /// Normalise and correct a request
    pub fn correct(&self, text: &str) -> String {
        let normalized = substitute_phrases(&normalize(text));
        let corrected: Vec<String> = normalized
            .split_whitespace()
            .map(|word| self.correct_word(word))
            .collect();
        substitute_phrases(&corrected.join(" "))
    }

    /// Correct a single normalised word, or return it unchanged
    pub fn correct_word(&self, word: &str) -> String {
        if !self.is_candidate(word) {
            return word.to_string();
        }

        let max_distance = if word.chars().count() <= SHORT_WORD_LEN { 1 } else { MAX_DISTANCE };
        let mut best: Option<(&str, usize)> = None;
        let mut tied = false;

        for entry in &self.vocabulary {
            let len_gap = entry.chars().count().abs_diff(word.chars().count());
            if len_gap > max_distance {
                continue;
            }
            let distance = levenshtein(word, entry);
            if distance > max_distance {
                continue;
            }
            match best {
                Some((_, d)) if distance < d => {
                    best = Some((entry, distance));
                    tied = false;
                }
                Some((_, d)) if distance == d => tied = true,
                Some(_) => {}
                None => best = Some((entry, distance)),
            }
        }

        match best {
            Some((entry, _)) if !tied => entry.to_string(),
            _ => word.to_string(),
        }
    }

    fn is_candidate(&self, word: &str) -> bool {
        word.chars().count() >= 4
            && word.chars().all(|c| c.is_ascii_alphabetic())
            && !self.known.contains(word)
            && !self.stopwords.contains(word)
    }
}

fn substitute_phrases(text: &str) -> String {
    let mut padded = format!(" {} ", text);
    for (from, to) in PHRASE_SUBSTITUTIONS {
        let needle = format!(" {} ", from);
        let replacement = format!(" {} ", to);
        while padded.contains(&needle) {
            padded = padded.replace(&needle, &replacement);
        }
    }
    padded.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corrector() -> TypoCorrector {
        TypoCorrector::new(&EntityCatalog::builtin())
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("instal", "install"), 1);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_correct_install_firefox() {
        assert_eq!(corrector().correct("instal firefox"), "install firefox");
        assert_eq!(corrector().correct("install firefx"), "install firefox");
    }

    #[test]
    fn test_correction_is_idempotent() {
        let c = corrector();
        for input in [
            "instal firefox",
            "pls restrat ngnix",
            "get rid of the web browser",
            "what's wrong with my wfii",
            "clean up the sytem",
        ] {
            let once = c.correct(input);
            let twice = c.correct(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_normalize_contractions_and_punctuation() {
        assert_eq!(normalize("What's NGINX?"), "what is nginx");
        assert_eq!(normalize("Install obs-studio, please!"), "install obs-studio please");
        assert_eq!(normalize("isn't it working"), "is not it working");
    }

    #[test]
    fn test_ties_keep_original() {
        // one edit from both "log" and "logs"
        assert_eq!(corrector().correct_word("logz"), "logz");
    }

    #[test]
    fn test_short_and_stop_words_untouched() {
        let c = corrector();
        assert_eq!(c.correct_word("it"), "it");
        assert_eq!(c.correct_word("what"), "what");
        assert_eq!(c.correct_word("vim9"), "vim9");
    }

    #[test]
    fn test_short_words_take_one_edit() {
        let c = corrector();
        for word in ["info", "read", "skip", "size", "node"] {
            assert_eq!(c.correct_word(word), word);
        }
        assert_eq!(c.correct_word("htpo"), "htpo");
        assert_eq!(c.correct_word("ngnx"), "nginx");
        // five letters and up take two
        assert_eq!(c.correct_word("restrat"), "restart");
    }

    #[test]
    fn test_phrase_substitution() {
        assert_eq!(corrector().correct("get rid of vlc"), "remove vlc");
        assert_eq!(corrector().correct("pls install git"), "please install git");
    }
}

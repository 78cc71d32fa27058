//! Ordered, extensible text-pattern catalogues.
//!
//! Completion, error, rate-limit, and dangerous-command detection all run the
//! same way: an ordered list of matchers, each contributing at most one match.
//! Decision logic only sees the matches, so catalogues can grow without touching
//! it.

use regex::Regex;

/// A single named pattern over free-form text.
pub trait Matcher {
    fn name(&self) -> &str;
    /// Return the first matching span, if any.
    fn find<'a>(&self, text: &'a str) -> Option<&'a str>;
}

/// [`Matcher`] backed by a compiled regular expression.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    name: String,
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }
}

impl Matcher for RegexMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

/// A match produced by a catalogue: which matcher fired and on what text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub matcher: String,
    pub text: String,
}

/// Ordered list of matchers.
#[derive(Default)]
pub struct PatternCatalogue {
    matchers: Vec<Box<dyn Matcher + Send + Sync>>,
}

impl std::fmt::Debug for PatternCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.matchers.iter().map(|m| m.name()))
            .finish()
    }
}

impl PatternCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a matcher; it runs after every matcher already present.
    pub fn push(&mut self, matcher: impl Matcher + Send + Sync + 'static) -> &mut Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// First match of every matcher that fires, in catalogue order.
    pub fn matches(&self, text: &str) -> Vec<PatternMatch> {
        self.matchers
            .iter()
            .filter_map(|matcher| {
                matcher.find(text).map(|found| PatternMatch {
                    matcher: matcher.name().to_string(),
                    text: found.to_string(),
                })
            })
            .collect()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matchers.iter().any(|matcher| matcher.find(text).is_some())
    }

    /// Build a catalogue from `(name, pattern)` pairs known to compile.
    fn from_static(entries: &[(&str, &str)]) -> Self {
        let mut catalogue = Self::new();
        for (name, pattern) in entries {
            let matcher = RegexMatcher::new(*name, pattern)
                .unwrap_or_else(|err| panic!("built-in pattern {name} must compile: {err}"));
            catalogue.push(matcher);
        }
        catalogue
    }
}

/// Explicit machine-readable termination marker emitted by agents.
pub const EXIT_SIGNAL_PATTERN: &str = r"(?i)EXIT_SIGNAL:\s*true";

/// Completion phrases counted by the exit gate.
pub fn completion_catalogue() -> PatternCatalogue {
    PatternCatalogue::from_static(&[
        ("task_complete", r"(?i)task\s+(is\s+)?complete"),
        ("implementation_finished", r"(?i)implementation\s+(is\s+)?finished"),
        ("all_done", r"(?i)all\s+done"),
        ("successfully_completed", r"(?i)successfully\s+(completed|merged)"),
        ("pr_merged", r"(?i)pr\s+(has\s+been\s+)?merged"),
        ("no_more_work", r"(?i)no\s+(more|further)\s+(work|changes|tasks)"),
        ("ready_for", r"(?i)ready\s+for\s+(review|merge|deployment)"),
        ("epic_complete", r"(?i)epic\s+(is\s+)?complete"),
        ("phase_complete", r"(?i)phase\s+(is\s+)?complete"),
        // Case-sensitive on purpose: "done" in prose is not a token.
        ("done_token", r"\bDONE\b"),
    ])
}

/// Error markers whose matches form the repeated-error signature.
pub fn error_catalogue() -> PatternCatalogue {
    PatternCatalogue::from_static(&[
        ("error", r"(?i)error:"),
        ("failed", r"(?i)failed:"),
        ("exception", r"(?i)exception:"),
        ("cannot", r"(?i)cannot\s+\w+"),
        ("unable_to", r"(?i)unable\s+to\s+\w+"),
        ("not_found", r"(?i)not\s+found"),
        ("permission_denied", r"(?i)permission\s+denied"),
        ("fatal", r"(?i)fatal:"),
    ])
}

/// Phrasings upstream APIs use to report rate limiting.
pub fn rate_limit_catalogue() -> PatternCatalogue {
    PatternCatalogue::from_static(&[
        ("rate_limit", r"(?i)rate limit"),
        ("too_many_requests", r"(?i)too many requests"),
        ("quota_exceeded", r"(?i)quota exceeded"),
        ("http_429", r"429"),
        ("usage_limit", r"(?i)usage limit"),
        ("plan_limit", r"(?i)plan limit"),
    ])
}

/// Shell commands refused outright, named by what they would do.
pub fn dangerous_command_catalogue() -> PatternCatalogue {
    PatternCatalogue::from_static(&[
        ("Deleting from root directory", r"(?i)rm\s+-rf\s+/"),
        ("Fork bomb detected", r"(?i):\(\)\{"),
        ("Filesystem formatting", r"(?i)mkfs\."),
        ("Direct disk write", r"(?i)dd\s+if=.*of=/dev/"),
        ("Direct disk write", r"(?i)>\s*/dev/sd[a-z]"),
        ("Piping remote script to bash", r"(?i)curl.*\|\s*bash"),
        ("Piping remote script to shell", r"(?i)wget.*\|\s*sh"),
    ])
}

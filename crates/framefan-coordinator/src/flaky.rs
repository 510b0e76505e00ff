//! Flaky-failure classification.
//!
//! A failure is retried only if it matches a known-transient signature.
//! Everything else is fatal.

use std::path::Path;

use framefan_models::{ErrorSource, WorkerError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CoordinatorError, CoordinatorResult};

/// A transient-failure signature.
///
/// Matches when the error text contains every `all_of` needle and none of
/// the `none_of` needles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlakyRule {
    #[serde(default)]
    pub name: String,
    pub all_of: Vec<String>,
    #[serde(default)]
    pub none_of: Vec<String>,
}

impl FlakyRule {
    fn new(name: &str, all_of: &[&str], none_of: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            all_of: all_of.iter().map(|s| s.to_string()).collect(),
            none_of: none_of.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        !self.all_of.is_empty()
            && self.all_of.iter().all(|needle| text.contains(needle.as_str()))
            && !self.none_of.iter().any(|needle| text.contains(needle.as_str()))
    }
}

/// The built-in signatures.
pub fn baseline_rules() -> Vec<FlakyRule> {
    vec![
        FlakyRule::new(
            "gcs-format-error",
            &["Format error", "storage.googleapis.com"],
            &[],
        ),
        FlakyRule::new(
            "gcs-audio-metadata",
            &["audio metadata", "storage.googleapis.com"],
            &[],
        ),
        FlakyRule::new("s3-internal-error", &["We encountered an internal error."], &[]),
        FlakyRule::new("zygote", &["FATAL:zygote_communication_linux.cc"], &[]),
        FlakyRule::new(
            "missing-libnss3",
            &["error while loading shared libraries: libnss3.so"],
            &[],
        ),
        FlakyRule::new("truncated-body", &["but the server sent no data"], &[]),
        FlakyRule::new("compositor-panicked", &["Compositor panicked"], &[]),
        FlakyRule::new("compositor-exited", &["Compositor exited"], &["SIGSEGV"]),
        FlakyRule::new(
            "browser-setup-timeout",
            &["Timed out while setting up the headless browser"],
            &[],
        ),
        FlakyRule::new(
            "browser-connect",
            &["while trying to connect to the browser"],
            &[],
        ),
        FlakyRule::new(
            "s3-socket-timeout",
            &["RequestTimeout: Your socket connection to the server"],
            &[],
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct FailureClassifier {
    rules: Vec<FlakyRule>,
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self {
            rules: baseline_rules(),
        }
    }
}

impl FailureClassifier {
    /// The baseline plus `extra`. Baseline rules are always kept.
    pub fn with_rules(extra: impl IntoIterator<Item = FlakyRule>) -> Self {
        let mut classifier = Self::default();
        classifier.rules.extend(extra);
        classifier
    }

    /// The baseline plus the rules in a JSON array file.
    pub fn from_file(path: impl AsRef<Path>) -> CoordinatorResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoordinatorError::config_error(format!(
                "cannot read flaky rules {}: {}",
                path.display(),
                e
            ))
        })?;
        let extra: Vec<FlakyRule> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), rules = extra.len(), "Loaded extra flaky-error rules");
        Ok(Self::with_rules(extra))
    }

    pub fn rules(&self) -> &[FlakyRule] {
        &self.rules
    }

    /// Whether a failure is transient and worth retrying.
    pub fn is_flaky(&self, error: &WorkerError) -> bool {
        self.matching_rule(error).is_some()
    }

    pub fn matching_rule(&self, error: &WorkerError) -> Option<&FlakyRule> {
        let text = format!("{}\n{}", error.message, error.stack);
        self.rules.iter().find(|rule| rule.matches(&text))
    }

    /// Which collaborator a worker failure most likely came from.
    pub fn source_of(error: &WorkerError) -> ErrorSource {
        let text = format!("{} {}", error.message, error.stack).to_lowercase();
        if text.contains("browser") || text.contains("chrome") || text.contains("zygote") {
            ErrorSource::Browser
        } else {
            ErrorSource::Renderer
        }
    }
}

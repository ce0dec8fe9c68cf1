//! Line classification
//!
//! [`LineClassifier::classify`] is a pure function of its input and the
//! shared [`PatternRegistry`]; the stdout and stderr readers can call it
//! concurrently without any locking.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::patterns::{PatternRegistry, DURATION, RESOURCE_ID, VERB};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("ANSI escape pattern compiles"));

// `module.net.aws_subnet.private["a"]: Something...`
static RESOURCE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:module\.[\w-]+(?:\[[^\]]*\])?\.)*(?:data\.)?[a-z][a-z0-9_]*\.[\w-]+(?:\[[^\]]*\])?: \S")
        .expect("resource shape pattern compiles")
});

/// Semantic category of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCategory {
    Noise,
    ResourceStart,
    ResourceProgress,
    ResourceComplete,
    ResourceError,
    SectionFooter,
    Plain,
}

impl LineCategory {
    /// Categories that carry a resource lifecycle event
    pub fn is_resource_event(self) -> bool {
        matches!(
            self,
            LineCategory::ResourceStart
                | LineCategory::ResourceProgress
                | LineCategory::ResourceComplete
                | LineCategory::ResourceError
        )
    }
}

/// A raw output line annotated with its category and extracted fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLine {
    /// The line exactly as the child wrote it (minus the newline)
    pub raw_text: String,
    /// `raw_text` with ANSI escape sequences removed; used for matching
    pub plain_text: String,
    pub category: LineCategory,
    pub resource_id: Option<String>,
    /// Every other named capture that participated in the match
    pub extra: BTreeMap<String, String>,
}

impl ClassifiedLine {
    /// A line that matched no rule
    pub fn plain(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let plain_text = strip_ansi(&raw_text).into_owned();
        Self {
            raw_text,
            plain_text,
            category: LineCategory::Plain,
            resource_id: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn get(&self, capture: &str) -> Option<&str> {
        self.extra.get(capture).map(String::as_str)
    }

    pub fn verb(&self) -> Option<&str> {
        self.get(VERB)
    }

    pub fn duration(&self) -> Option<&str> {
        self.get(DURATION)
    }

    /// Whether the raw text carries its own escape sequences
    pub fn has_ansi(&self) -> bool {
        self.raw_text.len() != self.plain_text.len()
    }
}

/// Classifies lines against a shared registry
#[derive(Debug, Clone)]
pub struct LineClassifier {
    registry: Arc<PatternRegistry>,
}

impl LineClassifier {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    pub fn terraform() -> Self {
        Self::new(Arc::new(PatternRegistry::terraform()))
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// Classify one line. No match yields [`LineCategory::Plain`].
    pub fn classify(&self, line: &str) -> ClassifiedLine {
        let plain_text = strip_ansi(line);

        let mut resource_id = None;
        let mut extra = BTreeMap::new();
        let category = match self.registry.first_match(&plain_text) {
            Some((rule, captures)) => {
                for name in rule.capture_names() {
                    let Some(value) = captures.name(name) else {
                        continue;
                    };
                    if name == RESOURCE_ID {
                        resource_id = Some(value.as_str().to_string());
                    } else {
                        extra.insert(name.clone(), value.as_str().to_string());
                    }
                }
                rule.category()
            }
            None => LineCategory::Plain,
        };

        ClassifiedLine {
            raw_text: line.to_string(),
            plain_text: plain_text.into_owned(),
            category,
            resource_id,
            extra,
        }
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::terraform()
    }
}

/// Remove ANSI CSI sequences (colors, cursor movement) from a line
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    if !line.contains('\x1b') {
        return Cow::Borrowed(line);
    }
    ANSI_ESCAPE.replace_all(line, "")
}

/// Heuristic: the line starts with a resource address followed by a message.
///
/// Used to spot resource lines in a shape no rule knows about.
pub fn looks_like_resource_line(plain_text: &str) -> bool {
    RESOURCE_SHAPE.is_match(plain_text)
}

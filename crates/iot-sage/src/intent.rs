//! Intent extraction from free-text questions.
//!
//! Parsing never fails: anything the parser does not recognize resolves to a
//! `lookup` over the default window with no location or metric filter.
//! When a question names several locations (or metrics), the mention that
//! appears first in the text wins; equal offsets go to the longer alias.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::config::{PipelineConfig, Vocabulary, VocabularyEntry};
use crate::types::{QueryIntent, SageResult, Task, TimeRange};

/// Task phrases in priority order; the first rule with any hit wins.
/// Each phrase is a regex fragment matched as whole words.
const TASK_RULES: &[(Task, &[&str])] = &[
    (
        Task::Anomaly,
        &[r"anomal\w*", "unusual", r"spik(?:e|es|ed|ing)", "outliers?", r"abnormal\w*"],
    ),
    (Task::Trend, &["trends?", "trending", r"over\s+time", "history", "historical"]),
    (
        Task::Recommend,
        &[r"should\s+i", r"recommend\w*", r"what\s+to\s+do", r"what\s+should"],
    ),
    (Task::Compare, &[r"compar\w*", "versus", "vs"]),
];

const DURATION_PATTERN: &str = r"(?i)\b(?:last|past|previous)\s+(?:(\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|twelve)\s+)?(minutes?|mins?|hours?|hrs?|days?|weeks?)\b";

struct AliasMatcher {
    canonical: String,
    pattern: Regex,
    alias_len: usize,
}

/// Turns raw query text into a [`QueryIntent`].
pub struct IntentParser {
    tasks: Vec<(Task, Regex)>,
    locations: Vec<AliasMatcher>,
    metric_types: Vec<AliasMatcher>,
    duration: Regex,
    default_window: Duration,
    max_lookback: Duration,
}

impl IntentParser {
    pub fn new(
        vocabulary: &Vocabulary,
        default_window: std::time::Duration,
        max_lookback: std::time::Duration,
    ) -> SageResult<Self> {
        Ok(Self {
            tasks: compile_task_rules()?,
            locations: compile_entries(&vocabulary.locations)?,
            metric_types: compile_entries(&vocabulary.metric_types)?,
            duration: Regex::new(DURATION_PATTERN)?,
            default_window: to_chrono(default_window),
            max_lookback: to_chrono(max_lookback),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> SageResult<Self> {
        Self::new(
            &config.vocabulary,
            config.default_window,
            config.max_lookback,
        )
    }

    /// Parse against the current wall clock.
    pub fn parse(&self, text: &str) -> QueryIntent {
        self.parse_at(text, Utc::now())
    }

    /// Parse with an explicit "now", so results are reproducible.
    pub fn parse_at(&self, text: &str, now: DateTime<Utc>) -> QueryIntent {
        let lowered = text.to_lowercase();

        let intent = QueryIntent {
            task: self.classify_task(&lowered),
            location: first_mention(&self.locations, &lowered),
            metric_type: first_mention(&self.metric_types, &lowered),
            time_range: TimeRange::ending_at(now, self.window_for(&lowered)),
            raw_text: text.to_string(),
        };

        tracing::debug!(
            task = %intent.task,
            location = ?intent.location,
            metric_type = ?intent.metric_type,
            "Parsed query intent"
        );
        intent
    }

    fn classify_task(&self, lowered: &str) -> Task {
        self.tasks
            .iter()
            .find(|(_, pattern)| pattern.is_match(lowered))
            .map(|(task, _)| *task)
            .unwrap_or(Task::Lookup)
    }

    fn window_for(&self, lowered: &str) -> Duration {
        let Some(caps) = self.duration.captures(lowered) else {
            return self.default_window;
        };

        let count = caps.get(1).map_or(Some(1), |m| parse_count(m.as_str()));
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("hour");

        let requested = match count {
            Some(n) if n > 0 => unit_duration(unit)
                .checked_mul(i32::try_from(n).unwrap_or(i32::MAX))
                .unwrap_or(self.max_lookback),
            _ => return self.default_window,
        };

        requested.min(self.max_lookback)
    }
}

fn compile_task_rules() -> SageResult<Vec<(Task, Regex)>> {
    TASK_RULES
        .iter()
        .map(|(task, phrases)| {
            let pattern = Regex::new(&format!(r"\b(?:{})\b", phrases.join("|")))?;
            Ok((*task, pattern))
        })
        .collect()
}

/// Whole-word pattern for an alias that also accepts its plural.
fn alias_pattern(alias: &str) -> String {
    let stem = alias.strip_suffix('y').filter(|_| !alias.ends_with("ey"));
    match stem {
        Some(stem) => format!(r"\b{}(?:y|ies)\b", regex::escape(stem)),
        None => format!(r"\b{}(?:e?s)?\b", regex::escape(alias)),
    }
}

fn compile_entries(entries: &[VocabularyEntry]) -> SageResult<Vec<AliasMatcher>> {
    let mut matchers = Vec::new();
    for entry in entries {
        let aliases = std::iter::once(&entry.canonical).chain(entry.aliases.iter());
        for alias in aliases {
            let alias = alias.trim().to_lowercase();
            if alias.is_empty() {
                continue;
            }
            matchers.push(AliasMatcher {
                canonical: entry.canonical.clone(),
                pattern: Regex::new(&alias_pattern(&alias))?,
                alias_len: alias.len(),
            });
        }
    }
    Ok(matchers)
}

fn first_mention(matchers: &[AliasMatcher], lowered: &str) -> Option<String> {
    matchers
        .iter()
        .filter_map(|m| {
            m.pattern
                .find(lowered)
                .map(|hit| (hit.start(), std::cmp::Reverse(m.alias_len), &m.canonical))
        })
        .min_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
        .map(|(_, _, canonical)| canonical.clone())
}

fn parse_count(word: &str) -> Option<u64> {
    match word {
        "a" | "an" | "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        "six" => Some(6),
        "seven" => Some(7),
        "eight" => Some(8),
        "nine" => Some(9),
        "ten" => Some(10),
        "twelve" => Some(12),
        // Counts too large for u64 saturate; the window is clamped later.
        digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            Some(digits.parse::<u64>().unwrap_or(u64::MAX))
        }
        _ => None,
    }
}

fn unit_duration(unit: &str) -> Duration {
    if unit.starts_with("min") {
        Duration::minutes(1)
    } else if unit.starts_with("day") {
        Duration::days(1)
    } else if unit.starts_with("week") {
        Duration::weeks(1)
    } else {
        Duration::hours(1)
    }
}

/// Convert a config duration, saturating instead of failing.
pub(crate) fn to_chrono(d: std::time::Duration) -> Duration {
    let secs = i64::try_from(d.as_secs()).unwrap_or(i64::MAX / 1000);
    Duration::seconds(secs.min(i64::MAX / 1000))
}

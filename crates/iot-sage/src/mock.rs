//! Deterministic templated answers built from prompt facts alone.

use crate::types::{unit_for, MetricBreakdown, PromptFacts, PromptSpec, Task, WindowSummary};

/// Differences smaller than this read as "steady" in trend answers.
const STEADY_DELTA: f64 = 0.5;

const TEMP_HIGH: f64 = 26.0;
const TEMP_LOW: f64 = 18.0;
const HUMIDITY_HIGH: f64 = 60.0;
const HUMIDITY_LOW: f64 = 30.0;

/// Model-free responder used when no local model is available.
///
/// The answer depends only on [`PromptFacts`] and whether the prompt
/// surfaced an anomaly block, never on wall-clock time or prompt wording.
#[derive(Debug, Clone, Default)]
pub struct MockResponder;

impl MockResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(&self, prompt: &PromptSpec) -> String {
        let facts = &prompt.facts;
        let mut answer = String::new();

        if facts.location_relaxed {
            if let Some(location) = &facts.location {
                answer.push_str(&format!(
                    "No readings were found for the {location}, so this covers all locations. "
                ));
            }
        }

        if facts.summary.is_empty() {
            answer.push_str(&format!(
                "There is insufficient data to answer: no {} readings were found {} in the requested window.",
                metric_label(facts),
                scope(facts)
            ));
            return answer;
        }

        let body = match facts.task {
            Task::Lookup => lookup(facts),
            Task::Trend => trend(facts),
            Task::Compare => compare(facts),
            Task::Anomaly => anomaly(facts),
            Task::Recommend => recommend(facts),
        };
        answer.push_str(&body);

        if facts.task != Task::Anomaly && prompt.anomaly_block.is_some() && facts.outlier_count > 0 {
            answer.push_str(&format!(
                " Note: {} unusual reading{} detected in this window.",
                facts.outlier_count,
                plural(facts.outlier_count)
            ));
        }
        answer
    }
}

fn scope(facts: &PromptFacts) -> String {
    match (&facts.location, facts.location_relaxed) {
        (Some(location), false) => format!("in the {location}"),
        _ => "across all locations".to_string(),
    }
}

fn metric_label(facts: &PromptFacts) -> &str {
    facts
        .metric_type
        .as_deref()
        .or(facts.window_metric.as_deref())
        .unwrap_or("sensor")
}

/// Per-metric views of the window: the breakdown when mixed, else the summary.
fn metric_views(facts: &PromptFacts) -> Vec<(String, WindowSummary)> {
    if facts.breakdown.is_empty() {
        vec![(metric_label(facts).to_string(), facts.summary)]
    } else {
        facts
            .breakdown
            .iter()
            .map(|MetricBreakdown { metric_type, summary }| (metric_type.clone(), *summary))
            .collect()
    }
}

fn value(v: f64, metric: &str) -> String {
    format!("{v:.1}{}", unit_for(metric))
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lookup(facts: &PromptFacts) -> String {
    let scope = scope(facts);
    if facts.breakdown.is_empty() {
        let m = metric_label(facts);
        let s = &facts.summary;
        return format!(
            "The latest {m} reading {scope} is {}. Over {} reading{} the average was {}, ranging from {} to {}.",
            value(s.latest, m),
            s.count,
            plural(s.count),
            value(s.mean, m),
            value(s.min, m),
            value(s.max, m)
        );
    }
    let parts: Vec<String> = metric_views(facts)
        .iter()
        .map(|(m, s)| format!("{m} {} (average {})", value(s.latest, m), value(s.mean, m)))
        .collect();
    format!("Latest readings {scope}: {}.", parts.join(", "))
}

fn trend(facts: &PromptFacts) -> String {
    let scope = scope(facts);
    let sentences: Vec<String> = metric_views(facts)
        .iter()
        .map(|(m, s)| {
            let delta = s.latest - s.first;
            let movement = if delta.abs() < STEADY_DELTA {
                format!("held steady around {}", value(s.mean, m))
            } else if delta > 0.0 {
                format!("rose from {} to {}", value(s.first, m), value(s.latest, m))
            } else {
                format!("fell from {} to {}", value(s.first, m), value(s.latest, m))
            };
            format!(
                "{} {scope} {movement} over {} reading{} (range {} to {}).",
                capitalize(m),
                s.count,
                plural(s.count),
                value(s.min, m),
                value(s.max, m)
            )
        })
        .collect();
    sentences.join(" ")
}

fn compare(facts: &PromptFacts) -> String {
    let scope = scope(facts);
    let sentences: Vec<String> = metric_views(facts)
        .iter()
        .map(|(m, s)| {
            format!(
                "Across {} reading{} {scope}, {m} ranged from {} to {} (spread {}) with an average of {}.",
                s.count,
                plural(s.count),
                value(s.min, m),
                value(s.max, m),
                value(s.max - s.min, m),
                value(s.mean, m)
            )
        })
        .collect();
    sentences.join(" ")
}

fn anomaly(facts: &PromptFacts) -> String {
    let scope = scope(facts);
    let Some(strongest) = &facts.strongest_outlier else {
        let m = metric_label(facts);
        if facts.baseline_stddev > 0.0 {
            return format!(
                "No unusual {m} readings {scope}: all values stayed within {} sigma of the baseline mean of {}.",
                facts.threshold_sigma,
                value(facts.baseline_mean, m)
            );
        }
        return format!(
            "No unusual {m} readings {scope} across {} reading{}.",
            facts.summary.count,
            plural(facts.summary.count)
        );
    };

    let m = strongest.sample.metric_type.as_str();
    format!(
        "Found {} unusual {m} reading{} {scope}. The largest was {} at {} ({:+.1} sigma from the baseline mean of {}).",
        facts.outlier_count,
        plural(facts.outlier_count),
        value(strongest.sample.value, m),
        strongest.sample.timestamp.format("%Y-%m-%d %H:%M UTC"),
        strongest.deviation_sigma,
        value(facts.baseline_mean, m)
    )
}

fn recommend(facts: &PromptFacts) -> String {
    let scope = scope(facts);
    let mut advice = Vec::new();
    let mut readings = Vec::new();

    for (m, s) in metric_views(facts) {
        let v = s.latest;
        readings.push(format!("{m} {}", value(v, &m)));
        match m.to_ascii_lowercase().as_str() {
            "temperature" if v > TEMP_HIGH => advice.push(format!(
                "it is warm at {}, so consider cooling or opening a window for ventilation",
                value(v, &m)
            )),
            "temperature" if v < TEMP_LOW => advice.push(format!(
                "it is cold at {}, so consider turning on the heating",
                value(v, &m)
            )),
            "humidity" if v > HUMIDITY_HIGH => advice.push(format!(
                "humidity is high at {}, so consider a dehumidifier or more ventilation",
                value(v, &m)
            )),
            "humidity" if v < HUMIDITY_LOW => advice.push(format!(
                "the air is dry at {}, so consider a humidifier",
                value(v, &m)
            )),
            _ => {}
        }
    }

    if advice.is_empty() {
        format!(
            "Conditions {scope} look comfortable ({}); no action is needed.",
            readings.join(", ")
        )
    } else {
        format!("{}: {}.", capitalize(&scope), advice.join("; "))
    }
}

//! Token-budgeted prompt assembly.
//!
//! The prompt is a pure function of the intent, the context window, and the
//! anomaly result. When it does not fit the budget, raw sample lines go first
//! (oldest first), then the anomaly block. The summary line pins the most
//! recent reading and the question is never touched.

use crate::config::PipelineConfig;
use crate::types::{
    render_sections, AnomalyResult, BaselineSource, ContextWindow, MetricSample, PromptFacts,
    PromptSpec, QueryIntent, Task, WindowSummary,
};

const SYSTEM_INSTRUCTION: &str = "You are an assistant for a home IoT sensor network. \
Answer only from the sensor data provided below. If the data is sparse or missing, \
say so plainly instead of guessing. Keep the answer to a few sentences.";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Conservative token estimate: characters divided by `chars_per_token`, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// One reading as a single prompt line.
pub fn format_sample(sample: &MetricSample) -> String {
    format!(
        "{} {} {} {:.2}{} ({})",
        sample.timestamp.format(TIMESTAMP_FORMAT),
        sample.location,
        sample.metric_type,
        sample.value,
        sample.display_unit(),
        sample.device_id
    )
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    prompt_samples: usize,
    chars_per_token: usize,
    severity_sigma: f64,
}

impl PromptBuilder {
    pub fn new(prompt_samples: usize, chars_per_token: usize, severity_sigma: f64) -> Self {
        Self {
            prompt_samples,
            chars_per_token: chars_per_token.max(1),
            severity_sigma,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.prompt_samples,
            config.chars_per_token,
            config.severity_sigma,
        )
    }

    /// Whether the anomaly digest belongs in the prompt for this task.
    pub fn surfaces_anomalies(&self, task: Task, anomalies: &AnomalyResult) -> bool {
        task == Task::Anomaly
            || (anomalies.has_outliers() && anomalies.max_severity() >= self.severity_sigma)
    }

    pub fn build(
        &self,
        intent: &QueryIntent,
        window: &ContextWindow,
        anomalies: &AnomalyResult,
        token_budget: usize,
    ) -> PromptSpec {
        let header = context_header(intent, window);
        let sample_lines: Vec<String> = window
            .recent(self.prompt_samples)
            .iter()
            .map(format_sample)
            .collect();
        let mut anomaly_block = self
            .surfaces_anomalies(intent.task, anomalies)
            .then(|| anomaly_digest(anomalies, self.prompt_samples));

        // Index of the oldest sample line still included.
        let mut skip = 0;
        let mut context_block = context_with_samples(&header, &sample_lines[skip..]);
        let mut estimated = self.estimate(&context_block, anomaly_block.as_deref(), &intent.raw_text);

        while estimated > token_budget && skip < sample_lines.len() {
            skip += 1;
            context_block = context_with_samples(&header, &sample_lines[skip..]);
            estimated = self.estimate(&context_block, anomaly_block.as_deref(), &intent.raw_text);
        }

        if estimated > token_budget && anomaly_block.is_some() {
            anomaly_block = None;
            estimated = self.estimate(&context_block, None, &intent.raw_text);
        }

        let over_budget = estimated > token_budget;
        if over_budget {
            tracing::warn!(
                estimated,
                token_budget,
                "Minimal prompt still exceeds the token budget"
            );
        } else if skip > 0 {
            tracing::debug!(
                dropped = skip,
                estimated,
                token_budget,
                "Truncated prompt samples"
            );
        }

        PromptSpec {
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            context_block,
            anomaly_block,
            question: intent.raw_text.clone(),
            token_budget,
            estimated_tokens: estimated,
            samples_included: sample_lines.len() - skip,
            samples_dropped: skip,
            over_budget,
            facts: facts_for(intent, window, anomalies),
        }
    }

    fn estimate(&self, context: &str, anomalies: Option<&str>, question: &str) -> usize {
        let rendered = render_sections(SYSTEM_INSTRUCTION, context, anomalies, question);
        estimate_tokens(&rendered, self.chars_per_token)
    }
}

fn facts_for(intent: &QueryIntent, window: &ContextWindow, anomalies: &AnomalyResult) -> PromptFacts {
    PromptFacts {
        task: intent.task,
        location: intent.location.clone(),
        metric_type: intent.metric_type.clone(),
        location_relaxed: window.location_relaxed,
        summary: window.summary,
        breakdown: window.breakdown.clone(),
        window_metric: window.single_metric().map(str::to_string),
        outlier_count: anomalies.outliers.len(),
        strongest_outlier: anomalies.strongest().cloned(),
        baseline_mean: anomalies.baseline_mean,
        baseline_stddev: anomalies.baseline_stddev,
        threshold_sigma: anomalies.threshold_sigma,
    }
}

fn context_header(intent: &QueryIntent, window: &ContextWindow) -> String {
    let range = window.time_range;
    let mut lines = vec![format!(
        "Window: {} to {}",
        range.start.format(TIMESTAMP_FORMAT),
        range.end.format(TIMESTAMP_FORMAT)
    )];

    let location = intent.location.as_deref().unwrap_or("all");
    let metric = intent.metric_type.as_deref().unwrap_or("all");
    if window.location_relaxed {
        lines.push(format!(
            "Filters: location={location} (no readings, showing all locations), metric={metric}"
        ));
    } else {
        lines.push(format!("Filters: location={location}, metric={metric}"));
    }

    let unit = window
        .single_metric()
        .map(crate::types::unit_for)
        .unwrap_or("");
    lines.push(summary_line("Summary", &window.summary, unit));
    for part in &window.breakdown {
        let label = format!("Summary[{}]", part.metric_type);
        lines.push(summary_line(&label, &part.summary, crate::types::unit_for(&part.metric_type)));
    }
    if let Some(latest) = window.latest() {
        lines.push(format!("Latest reading: {}", format_sample(latest)));
    }
    lines.join("\n")
}

fn summary_line(label: &str, summary: &WindowSummary, unit: &str) -> String {
    if summary.is_empty() {
        return format!("{label}: count=0 (no readings in this window)");
    }
    format!(
        "{label}: count={} min={:.2}{unit} max={:.2}{unit} mean={:.2}{unit} latest={:.2}{unit}",
        summary.count, summary.min, summary.max, summary.mean, summary.latest
    )
}

fn context_with_samples(header: &str, samples: &[String]) -> String {
    if samples.is_empty() {
        return header.to_string();
    }
    let mut block = String::from(header);
    block.push_str("\nRecent readings:");
    for line in samples {
        block.push_str("\n- ");
        block.push_str(line);
    }
    block
}

fn anomaly_digest(anomalies: &AnomalyResult, max_lines: usize) -> String {
    let metric = anomalies.metric_type.as_deref().unwrap_or("readings");
    let baseline = match anomalies.source {
        BaselineSource::None => {
            return format!("Not enough {metric} data to establish a baseline.");
        }
        BaselineSource::Preceding => "preceding period",
        BaselineSource::Split => "first half of the window",
    };

    let mut lines = vec![format!(
        "Baseline ({baseline}, {metric}): mean={:.2} stddev={:.2} over {} readings, threshold {} sigma",
        anomalies.baseline_mean,
        anomalies.baseline_stddev,
        anomalies.baseline_count,
        anomalies.threshold_sigma
    )];

    if anomalies.outliers.is_empty() {
        lines.push("No readings beyond the threshold.".to_string());
    } else {
        let shown = anomalies.outliers.len().min(max_lines.max(1));
        for outlier in &anomalies.outliers[..shown] {
            lines.push(format!(
                "- {} ({:+.1} sigma)",
                format_sample(&outlier.sample),
                outlier.deviation_sigma
            ));
        }
        if anomalies.outliers.len() > shown {
            lines.push(format!("... and {} more", anomalies.outliers.len() - shown));
        }
    }
    lines.join("\n")
}

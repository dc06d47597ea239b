use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabled::{Table, Tabled};

/// Tolerance used whenever a score is compared against a threshold.
pub const SCORE_EPSILON: f64 = 1e-9;

/// `score >= threshold`, forgiving float noise from weighted means.
pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    score + SCORE_EPSILON >= threshold
}

/// Clamp a raw score into `[0.0, 1.0]`. NaN becomes 0.0.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// One event recorded by the agent runtime during a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl SessionEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// True when the event type or its stringified payload mentions "error".
    pub fn is_error(&self) -> bool {
        if self.event_type.contains("error") {
            return true;
        }
        match &self.data {
            Value::Null => false,
            Value::String(s) => s.contains("error"),
            other => other.to_string().contains("error"),
        }
    }
}

/// A tool invocation made by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Everything an executor reports about one trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub success: bool,
    /// Whether the skill under test was activated during the session.
    #[serde(default)]
    pub skill_invoked: bool,
}

impl ExecutionResult {
    /// A successful execution carrying only output text.
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            ..Self::default()
        }
    }

    /// A failed execution. Graders still run against it.
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            error: Some(error.into()),
            duration_ms,
            success: false,
            ..Self::default()
        }
    }
}

/// Outcome of one grader on one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderResult {
    pub name: String,
    pub kind: String,
    pub score: f64,
    pub passed: bool,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    /// Set when the grader could not complete (timeout, judge failure, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl GraderResult {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        score: f64,
        passed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            score: clamp_unit(score),
            passed,
            message: message.into(),
            details: Value::Object(Default::default()),
            error: None,
            duration_ms: 0,
        }
    }

    /// Zero-score failed result for a grader that could not complete.
    pub fn failure(name: impl Into<String>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            name: name.into(),
            kind: kind.into(),
            score: 0.0,
            passed: false,
            message: reason.clone(),
            details: serde_json::json!({ "error": reason }),
            error: Some(reason),
            duration_ms: 0,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One input that fed a metric score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: String,
    pub weight: f64,
    pub score: Option<f64>,
    /// False when the input was excluded from the weighted mean.
    pub included: bool,
}

/// Outcome of one metric on one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub name: String,
    pub kind: String,
    /// `None` when the metric does not apply to this trial.
    pub score: Option<f64>,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakdown: Vec<Contribution>,
    #[serde(default)]
    pub details: Value,
}

impl MetricResult {
    pub fn scored(
        name: impl Into<String>,
        kind: impl Into<String>,
        score: f64,
        threshold: f64,
        message: impl Into<String>,
    ) -> Self {
        let score = clamp_unit(score);
        Self {
            name: name.into(),
            kind: kind.into(),
            score: Some(score),
            passed: meets_threshold(score, threshold),
            message: message.into(),
            breakdown: Vec::new(),
            details: Value::Object(Default::default()),
        }
    }

    /// Inapplicable metrics never gate a trial.
    pub fn not_applicable(name: impl Into<String>, kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            score: None,
            passed: true,
            message: reason.into(),
            breakdown: Vec::new(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_breakdown(mut self, breakdown: Vec<Contribution>) -> Self {
        self.breakdown = breakdown;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_applicable(&self) -> bool {
        self.score.is_some()
    }
}

/// Condensed view of an [`ExecutionResult`] kept on each trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tool_call_count: usize,
    pub event_count: usize,
    pub skill_invoked: bool,
    pub output: String,
}

impl From<&ExecutionResult> for ExecutionSummary {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            success: result.success,
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            tool_call_count: result.tool_calls.len(),
            event_count: result.events.len(),
            skill_invoked: result.skill_invoked,
            output: result.output.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: usize,
    pub execution: ExecutionSummary,
    pub graders: Vec<GraderResult>,
    pub metrics: Vec<MetricResult>,
    /// Filled in by the aggregator.
    #[serde(default)]
    pub passed: bool,
}

impl TrialResult {
    pub fn metric(&self, name: &str) -> Option<&MetricResult> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn grader(&self, name: &str) -> Option<&GraderResult> {
        self.graders.iter().find(|g| g.name == name)
    }
}

/// One metric folded across all trials of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub name: String,
    pub kind: String,
    pub score: Option<f64>,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pass_rate: Option<f64>,
    pub weight: f64,
    pub passed: bool,
    pub pass_rate: f64,
    pub std_dev: f64,
    /// 95% confidence interval of the mean trial score.
    #[serde(default)]
    pub ci_low: f64,
    #[serde(default)]
    pub ci_high: f64,
    pub flaky: bool,
    /// Root metrics are not referenced by any composite and decide the task verdict.
    pub root: bool,
    pub trial_scores: Vec<Option<f64>>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAggregate {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub weight: f64,
    pub trials: Vec<TrialResult>,
    pub metrics: Vec<MetricAggregate>,
    pub score: Option<f64>,
    #[serde(default)]
    pub ci_low: f64,
    #[serde(default)]
    pub ci_high: f64,
    pub pass_rate: f64,
    pub passed: bool,
    pub flaky: bool,
    pub message: String,
}

impl TaskAggregate {
    pub fn metric(&self, name: &str) -> Option<&MetricAggregate> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Trigger classification over a whole suite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub name: String,
    pub skill: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskAggregate>,
    pub overall_score: f64,
    pub passed: bool,
    pub total_tasks: usize,
    pub passed_tasks: usize,
    pub failed_tasks: usize,
    pub flaky_tasks: usize,
    pub total_trials: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_metrics: Option<TriggerMetrics>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct SummaryRow {
    task: String,
    passed: String,
    score: String,
    ci95: String,
    pass_rate: String,
    trials: usize,
    flaky: String,
    message: String,
}

impl EvalSummary {
    pub fn task(&self, task_id: &str) -> Option<&TaskAggregate> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn summary_table(&self) -> String {
        let rows: Vec<SummaryRow> = self.tasks.iter().map(|t| {
            SummaryRow {
                task: truncate(t.name.clone().unwrap_or_else(|| t.task_id.clone()), 40),
                passed: if t.passed { "✓" } else { "✗" }.to_string(),
                score: t.score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "-".to_string()),
                ci95: match t.score {
                    Some(_) => format!("[{:.3}, {:.3}]", t.ci_low, t.ci_high),
                    None => "-".to_string(),
                },
                pass_rate: format!("{:.0}%", t.pass_rate * 100.0),
                trials: t.trials.len(),
                flaky: if t.flaky { "yes" } else { "" }.to_string(),
                message: truncate(t.message.clone(), 64),
            }
        }).collect();

        let table_str = Table::new(rows).to_string();

        let summary_text = format!(
            "Tasks: {}  Passed: {}  Failed: {}  Flaky: {}  Trials: {}  Overall score: {:.3}  Verdict: {}",
            self.total_tasks,
            self.passed_tasks,
            self.failed_tasks,
            self.flaky_tasks,
            self.total_trials,
            self.overall_score,
            if self.passed { "PASS" } else { "FAIL" }
        );

        format!("{}\n\n{}\n", table_str, summary_text)
    }
}

fn truncate(s: String, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s;
    }
    let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_event_detection() {
        assert!(SessionEvent::new("session.error", json!({})).is_error());
        assert!(SessionEvent::new("tool.result", json!({"content": "fatal error: boom"})).is_error());
        assert!(SessionEvent::new("message", json!("an error happened")).is_error());
        assert!(!SessionEvent::new("message", json!({"content": "all good"})).is_error());
        assert!(!SessionEvent::new("message", Value::Null).is_error());
    }

    #[test]
    fn test_grader_result_score_is_clamped() {
        assert_eq!(GraderResult::new("g", "regex", 1.7, true, "").score, 1.0);
        assert_eq!(GraderResult::new("g", "regex", -0.2, false, "").score, 0.0);
        assert_eq!(GraderResult::new("g", "regex", f64::NAN, false, "").score, 0.0);
    }

    #[test]
    fn test_grader_failure_shape() {
        let r = GraderResult::failure("judge", "llm_comparison", "judge call timed out after 5s");
        assert_eq!(r.score, 0.0);
        assert!(!r.passed);
        assert!(r.is_error());
        assert!(r.message.contains("timed out"));
        assert_eq!(r.details["error"], json!("judge call timed out after 5s"));
    }

    #[test]
    fn test_metric_threshold_uses_epsilon() {
        let m = MetricResult::scored("m", "composite", 0.6 - 1e-12, 0.6, "");
        assert!(m.passed);
        let m = MetricResult::scored("m", "composite", 0.59, 0.6, "");
        assert!(!m.passed);
    }

    #[test]
    fn test_execution_result_deserializes_with_defaults() {
        let r: ExecutionResult = serde_json::from_value(json!({
            "output": "hi",
            "events": [{"type": "assistant.message", "data": {"content": "hi"}}],
            "success": true
        }))
        .unwrap();
        assert_eq!(r.events.len(), 1);
        assert!(r.tool_calls.is_empty());
        assert!(r.error.is_none());
        assert!(!r.skill_invoked);
    }
}

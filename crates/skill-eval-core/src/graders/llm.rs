use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skill_eval_types::{meets_threshold, GraderResult};

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::judge::{Judge, JudgeRequest};
use crate::task::Task;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LlmParams {
	rubric: String,
	#[serde(default)]
	reference: Option<String>,
	#[serde(default = "default_threshold")]
	threshold: f64,
	#[serde(default = "default_timeout_secs")]
	timeout_secs: f64,
}

fn default_threshold() -> f64 {
	0.7
}

fn default_timeout_secs() -> f64 {
	60.0
}

/// Scores the output with a judge model.
pub struct LlmComparisonGrader {
	name: String,
	judge: Arc<dyn Judge>,
	rubric: String,
	reference: Option<String>,
	threshold: f64,
	timeout: Duration,
}

impl LlmComparisonGrader {
	pub fn new(name: impl Into<String>, judge: Arc<dyn Judge>, rubric: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			judge,
			rubric: rubric.into(),
			reference: None,
			threshold: default_threshold(),
			timeout: Duration::from_secs_f64(default_timeout_secs()),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn from_config(config: &GraderConfig, judge: Option<Arc<dyn Judge>>) -> Result<Self, ConfigError> {
		let params: LlmParams = config.params()?;
		config.check_threshold(params.threshold)?;
		let judge = judge.ok_or_else(|| {
			ConfigError::invalid_grader(&config.name, "llm_comparison needs a judge; configure `judge` in the eval")
		})?;
		if !params.timeout_secs.is_finite() || params.timeout_secs <= 0.0 {
			return Err(ConfigError::invalid_grader(&config.name, "timeout_secs must be positive"));
		}
		Ok(Self {
			name: config.name.clone(),
			judge,
			rubric: params.rubric,
			reference: params.reference,
			threshold: params.threshold,
			timeout: Duration::from_secs_f64(params.timeout_secs),
		})
	}
}

#[async_trait]
impl Grader for LlmComparisonGrader {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> GraderKind {
		GraderKind::LlmComparison
	}

	async fn grade(&self, ctx: &GraderContext, task: &Task) -> Result<GraderResult> {
		let kind = GraderKind::LlmComparison.as_str();
		let request = JudgeRequest {
			task_id: task.id.clone(),
			prompt: task.prompt.clone(),
			output: ctx.output.clone(),
			rubric: self.rubric.clone(),
			reference: self.reference.clone(),
		};

		let verdict = match tokio::time::timeout(self.timeout, self.judge.judge(&request)).await {
			Ok(Ok(verdict)) => verdict,
			Ok(Err(err)) => {
				tracing::warn!(grader = %self.name, error = %err, "judge call failed");
				return Ok(GraderResult::failure(&self.name, kind, err.to_string()));
			}
			Err(_) => {
				return Ok(GraderResult::failure(
					&self.name,
					kind,
					format!("judge call timed out after {}s", self.timeout.as_secs_f64()),
				));
			}
		};

		let passed = verdict
			.passed
			.unwrap_or_else(|| meets_threshold(verdict.score, self.threshold));
		let message = if verdict.rationale.is_empty() {
			format!("judge score {:.2}", verdict.score)
		} else {
			verdict.rationale.clone()
		};
		Ok(GraderResult::new(&self.name, kind, verdict.score, passed, message).with_details(json!({
			"rubric": self.rubric,
			"judge_score": verdict.score,
			"judge_passed": verdict.passed,
			"rationale": verdict.rationale,
			"threshold": self.threshold,
		})))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::judge::{JudgeError, JudgeVerdict};
	use skill_eval_types::ExecutionResult;

	struct ScriptedJudge(std::result::Result<JudgeVerdict, String>, Duration);

	#[async_trait]
	impl Judge for ScriptedJudge {
		async fn judge(&self, _request: &JudgeRequest) -> std::result::Result<JudgeVerdict, JudgeError> {
			tokio::time::sleep(self.1).await;
			self.0.clone().map_err(JudgeError::Unparseable)
		}
	}

	fn verdict(score: f64, passed: Option<bool>) -> ScriptedJudge {
		ScriptedJudge(Ok(JudgeVerdict { score, passed, rationale: "ok".into() }), Duration::ZERO)
	}

	async fn grade(grader: LlmComparisonGrader) -> GraderResult {
		let task = Task::new("t", "explain");
		let ctx = GraderContext::new(&task, &ExecutionResult::completed("answer"));
		grader.grade(&ctx, &task).await.unwrap()
	}

	#[tokio::test]
	async fn test_threshold_applies_without_explicit_verdict() {
		let result = grade(LlmComparisonGrader::new("j", Arc::new(verdict(0.75, None)), "be clear")).await;
		assert!(result.passed);
		let result = grade(LlmComparisonGrader::new("j", Arc::new(verdict(0.65, None)), "be clear")).await;
		assert!(!result.passed);
		assert_eq!(result.score, 0.65);
	}

	#[tokio::test]
	async fn test_explicit_verdict_wins() {
		let result = grade(LlmComparisonGrader::new("j", Arc::new(verdict(0.9, Some(false))), "r")).await;
		assert!(!result.passed);
		assert!(!result.is_error());
	}

	#[tokio::test]
	async fn test_timeout_is_reported() {
		let slow = ScriptedJudge(Ok(JudgeVerdict { score: 1.0, passed: Some(true), rationale: String::new() }), Duration::from_secs(5));
		let grader = LlmComparisonGrader::new("j", Arc::new(slow), "r").with_timeout(Duration::from_millis(10));
		let result = grade(grader).await;
		assert_eq!(result.score, 0.0);
		assert!(!result.passed);
		assert!(result.message.contains("timed out"));
		assert!(result.is_error());
	}

	#[tokio::test]
	async fn test_judge_failure_is_distinct_from_no() {
		let broken = ScriptedJudge(Err("garbage".into()), Duration::ZERO);
		let result = grade(LlmComparisonGrader::new("j", Arc::new(broken), "r")).await;
		assert!(!result.passed);
		assert_eq!(result.details["error"], "unparseable judge verdict: garbage");
	}

	#[test]
	fn test_config_requires_judge() {
		let cfg = GraderConfig::new("llm_comparison", "j", json!({ "rubric": "r" }));
		assert!(LlmComparisonGrader::from_config(&cfg, None).is_err());
	}

	#[test]
	fn test_threshold_outside_unit_range_is_rejected() {
		let cfg = GraderConfig::new("llm_comparison", "j", json!({ "rubric": "r", "threshold": 7 }));
		let judge: Arc<dyn Judge> = Arc::new(verdict(1.0, None));
		let err = LlmComparisonGrader::from_config(&cfg, Some(judge)).err().unwrap();
		assert!(err.to_string().contains("outside [0, 1]"), "{err}");
	}
}

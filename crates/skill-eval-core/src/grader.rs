use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skill_eval_types::GraderResult;

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::task::Task;

#[async_trait]
pub trait Grader: Send + Sync {
	fn name(&self) -> &str;
	fn kind(&self) -> GraderKind;
	/// Score one trial. An `Err` is converted into a zero-score failed
	/// result by the caller, so graders only handle failures they want to
	/// describe more precisely.
	async fn grade(&self, ctx: &GraderContext, task: &Task) -> Result<GraderResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderKind {
	Regex,
	Script,
	ToolCalls,
	LlmComparison,
	HumanCalibration,
}

impl GraderKind {
	pub const ALL: [GraderKind; 5] = [
		GraderKind::Regex,
		GraderKind::Script,
		GraderKind::ToolCalls,
		GraderKind::LlmComparison,
		GraderKind::HumanCalibration,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			GraderKind::Regex => "regex",
			GraderKind::Script => "script",
			GraderKind::ToolCalls => "tool_calls",
			GraderKind::LlmComparison => "llm_comparison",
			GraderKind::HumanCalibration => "human_calibration",
		}
	}
}

impl fmt::Display for GraderKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A grader as declared in a task file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderConfig {
	#[serde(rename = "type", alias = "kind")]
	pub kind: String,
	pub name: String,
	#[serde(default = "default_weight")]
	pub weight: f64,
	/// Kind-specific parameters.
	#[serde(default)]
	pub config: Value,
}

fn default_weight() -> f64 {
	1.0
}

impl GraderConfig {
	pub fn new(kind: impl Into<String>, name: impl Into<String>, config: Value) -> Self {
		Self {
			kind: kind.into(),
			name: name.into(),
			weight: default_weight(),
			config,
		}
	}

	pub fn with_weight(mut self, weight: f64) -> Self {
		self.weight = weight;
		self
	}

	/// Decode the kind-specific parameters.
	pub fn params<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
		let raw = match &self.config {
			Value::Null => Value::Object(Default::default()),
			other => other.clone(),
		};
		serde_json::from_value(raw).map_err(|e| ConfigError::invalid_grader(&self.name, e))
	}

	/// A pass threshold must be a score, i.e. within [0, 1].
	pub fn check_threshold(&self, threshold: f64) -> Result<f64, ConfigError> {
		if !(0.0..=1.0).contains(&threshold) {
			return Err(ConfigError::invalid_grader(
				&self.name,
				format!("threshold {} is outside [0, 1]", threshold),
			));
		}
		Ok(threshold)
	}
}

/// Run a grader with a deadline. Errors and timeouts become failed results;
/// the returned result always carries the grader's name and elapsed time.
pub async fn run_grader(
	grader: Arc<dyn Grader>,
	ctx: &GraderContext,
	task: &Task,
	timeout: Duration,
) -> GraderResult {
	let start = Instant::now();
	let name = grader.name().to_string();
	let kind = grader.kind().as_str();

	let mut result = match tokio::time::timeout(timeout, grader.grade(ctx, task)).await {
		Ok(Ok(result)) => result,
		Ok(Err(err)) => {
			tracing::warn!(grader = %name, error = %err, "grader failed");
			GraderResult::failure(&name, kind, format!("grader error: {err:#}"))
		}
		Err(_) => {
			tracing::warn!(grader = %name, timeout_secs = timeout.as_secs_f64(), "grader timed out");
			GraderResult::failure(
				&name,
				kind,
				format!("grader timed out after {}s", timeout.as_secs_f64()),
			)
		}
	};
	result.name = name;
	if result.duration_ms == 0 {
		result.duration_ms = start.elapsed().as_millis() as u64;
	}
	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use skill_eval_types::ExecutionResult;

	struct Slow;

	#[async_trait]
	impl Grader for Slow {
		fn name(&self) -> &str {
			"slow"
		}

		fn kind(&self) -> GraderKind {
			GraderKind::LlmComparison
		}

		async fn grade(&self, _ctx: &GraderContext, _task: &Task) -> Result<GraderResult> {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok(GraderResult::new("slow", "llm_comparison", 1.0, true, "late"))
		}
	}

	struct Broken;

	#[async_trait]
	impl Grader for Broken {
		fn name(&self) -> &str {
			"broken"
		}

		fn kind(&self) -> GraderKind {
			GraderKind::Script
		}

		async fn grade(&self, _ctx: &GraderContext, _task: &Task) -> Result<GraderResult> {
			anyhow::bail!("interpreter exploded")
		}
	}

	fn fixture() -> (GraderContext, Task) {
		let task = Task::new("t", "p");
		let ctx = GraderContext::new(&task, &ExecutionResult::completed("out"));
		(ctx, task)
	}

	#[test]
	fn test_threshold_must_be_a_score() {
		let config = GraderConfig::new("regex", "r", Value::Null);
		assert_eq!(config.check_threshold(0.0).unwrap(), 0.0);
		assert_eq!(config.check_threshold(1.0).unwrap(), 1.0);
		for bad in [-0.1, 1.5, f64::NAN] {
			let err = config.check_threshold(bad).unwrap_err();
			assert!(err.to_string().contains("outside [0, 1]"), "{err}");
		}
	}

	#[tokio::test]
	async fn test_timeout_becomes_failed_result() {
		let (ctx, task) = fixture();
		let result = run_grader(Arc::new(Slow), &ctx, &task, Duration::from_millis(20)).await;
		assert_eq!(result.score, 0.0);
		assert!(!result.passed);
		assert!(result.message.contains("timed out"));
		assert!(result.is_error());
	}

	#[tokio::test]
	async fn test_error_becomes_failed_result() {
		let (ctx, task) = fixture();
		let result = run_grader(Arc::new(Broken), &ctx, &task, Duration::from_secs(1)).await;
		assert_eq!(result.name, "broken");
		assert_eq!(result.kind, "script");
		assert!(result.message.contains("interpreter exploded"));
		assert_eq!(result.details["error"], result.message);
	}

	#[test]
	fn test_kind_names_round_trip_through_serde() {
		for kind in GraderKind::ALL {
			let json = serde_json::to_value(kind).unwrap();
			assert_eq!(json, Value::String(kind.as_str().to_string()));
		}
	}

	#[test]
	fn test_params_report_grader_name() {
		#[derive(Debug, Deserialize)]
		#[allow(dead_code)]
		struct P {
			threshold: f64,
		}
		let cfg = GraderConfig::new("regex", "quality", serde_json::json!({ "threshold": "high" }));
		let err = cfg.params::<P>().unwrap_err();
		assert!(err.to_string().starts_with("grader 'quality':"));
	}
}

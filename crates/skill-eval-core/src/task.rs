use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::grader::GraderConfig;
use crate::metric::MetricConfig;

/// One scripted scenario the skill is evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default)]
	pub prompt: String,
	/// Extra inputs handed to the executor.
	#[serde(default)]
	pub context: Value,
	#[serde(default)]
	pub expected: Expected,
	#[serde(default)]
	pub graders: Vec<GraderConfig>,
	/// Appended to the eval-wide metrics for this task only.
	#[serde(default)]
	pub metrics: Vec<MetricConfig>,
	#[serde(default = "default_weight")]
	pub weight: f64,
}

fn default_weight() -> f64 {
	1.0
}

/// Expected behaviour of a task. Anything beyond the trigger label is kept
/// verbatim and exposed to assertions as `outcome`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expected {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub should_trigger: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confidence: Option<TriggerConfidence>,
	#[serde(flatten)]
	pub outcome: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConfidence {
	#[default]
	High,
	Medium,
}

impl TriggerConfidence {
	/// Weight of one labelled trigger case in suite-level trigger metrics.
	pub fn weight(self) -> f64 {
		match self {
			TriggerConfidence::High => 1.0,
			TriggerConfidence::Medium => 0.5,
		}
	}
}

impl Task {
	pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: None,
			prompt: prompt.into(),
			context: Value::Null,
			expected: Expected::default(),
			graders: Vec::new(),
			metrics: Vec::new(),
			weight: default_weight(),
		}
	}

	pub fn with_grader(mut self, grader: GraderConfig) -> Self {
		self.graders.push(grader);
		self
	}

	pub fn with_metric(mut self, metric: MetricConfig) -> Self {
		self.metrics.push(metric);
		self
	}

	pub fn with_should_trigger(mut self, should_trigger: bool) -> Self {
		self.expected.should_trigger = Some(should_trigger);
		self
	}

	pub fn with_outcome(mut self, key: impl Into<String>, value: Value) -> Self {
		self.expected.outcome.insert(key.into(), value);
		self
	}

	pub fn display_name(&self) -> &str {
		self.name.as_deref().unwrap_or(&self.id)
	}

	/// The outcome descriptor assertions see as `outcome`.
	pub fn outcome(&self) -> Value {
		Value::Object(self.expected.outcome.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_task_yaml_shape() {
		let yaml = r#"
id: explain-fib
name: Explain fibonacci
prompt: Explain this function
expected:
  should_trigger: true
  confidence: medium
  mentions: [recursion]
graders:
  - type: regex
    name: structure
    config:
      must_match: ["(?i)overview"]
"#;
		let task: Task = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(task.display_name(), "Explain fibonacci");
		assert_eq!(task.weight, 1.0);
		assert_eq!(task.expected.should_trigger, Some(true));
		assert_eq!(task.expected.confidence, Some(TriggerConfidence::Medium));
		assert_eq!(task.outcome(), serde_json::json!({ "mentions": ["recursion"] }));
		assert_eq!(task.graders[0].kind, "regex");
	}
}

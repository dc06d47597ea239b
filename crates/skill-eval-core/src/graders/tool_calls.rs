use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skill_eval_types::{meets_threshold, GraderResult, ToolCall};

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
	/// The calls are exactly the expected ones. Binary score.
	Exactly,
	/// Every expected call appears. Proportional score.
	#[default]
	AtLeast,
	/// None of the listed calls appear. Proportional score.
	NoneOf,
}

/// Expected tool call: a name plus an optional argument subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolMatcher {
	Name(String),
	Full {
		name: String,
		#[serde(default)]
		arguments: Option<Value>,
	},
}

impl ToolMatcher {
	fn name(&self) -> &str {
		match self {
			ToolMatcher::Name(name) | ToolMatcher::Full { name, .. } => name,
		}
	}

	fn matches(&self, call: &ToolCall) -> bool {
		if call.name != self.name() {
			return false;
		}
		match self {
			ToolMatcher::Full { arguments: Some(expected), .. } => {
				let actual = match &call.arguments {
					// Some runtimes record arguments as a JSON string.
					Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| call.arguments.clone()),
					other => other.clone(),
				};
				is_subset(expected, &actual)
			}
			_ => true,
		}
	}
}

/// Every key of an expected object is present in `actual` with a matching
/// value; arrays and scalars compare element-wise.
fn is_subset(expected: &Value, actual: &Value) -> bool {
	match (expected, actual) {
		(Value::Object(e), Value::Object(a)) => e
			.iter()
			.all(|(k, ev)| a.get(k).is_some_and(|av| is_subset(ev, av))),
		(Value::Array(e), Value::Array(a)) => e.len() == a.len() && e.iter().zip(a).all(|(ev, av)| is_subset(ev, av)),
		(Value::Number(e), Value::Number(a)) => e.as_f64() == a.as_f64(),
		(e, a) => e == a,
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolCallParams {
	#[serde(default)]
	mode: PatternMode,
	#[serde(default)]
	ordered: bool,
	#[serde(alias = "tools")]
	expected: Vec<ToolMatcher>,
	#[serde(default = "default_threshold")]
	threshold: f64,
}

fn default_threshold() -> f64 {
	1.0
}

/// Checks the recorded tool calls against an expected pattern.
pub struct ToolCallGrader {
	name: String,
	mode: PatternMode,
	ordered: bool,
	expected: Vec<ToolMatcher>,
	threshold: f64,
}

impl ToolCallGrader {
	pub fn new(name: impl Into<String>, mode: PatternMode, ordered: bool, expected: Vec<ToolMatcher>) -> Self {
		Self {
			name: name.into(),
			mode,
			ordered,
			expected,
			threshold: default_threshold(),
		}
	}

	pub fn from_config(config: &GraderConfig) -> Result<Self, ConfigError> {
		let params: ToolCallParams = config.params()?;
		config.check_threshold(params.threshold)?;
		if params.expected.iter().any(|m| m.name().is_empty()) {
			return Err(ConfigError::invalid_grader(&config.name, "expected tool names must not be empty"));
		}
		Ok(Self {
			name: config.name.clone(),
			mode: params.mode,
			ordered: params.ordered,
			expected: params.expected,
			threshold: params.threshold,
		})
	}

	/// Size of the largest one-to-one assignment of matchers to calls.
	fn max_assignment(&self, calls: &[ToolCall]) -> usize {
		fn augment(
			m: usize,
			edges: &[Vec<usize>],
			seen: &mut [bool],
			owner: &mut [Option<usize>],
		) -> bool {
			for &c in &edges[m] {
				if seen[c] {
					continue;
				}
				seen[c] = true;
				if owner[c].map_or(true, |other| augment(other, edges, seen, owner)) {
					owner[c] = Some(m);
					return true;
				}
			}
			false
		}

		let edges: Vec<Vec<usize>> = self
			.expected
			.iter()
			.map(|m| (0..calls.len()).filter(|&c| m.matches(&calls[c])).collect())
			.collect();
		let mut owner = vec![None; calls.len()];
		(0..self.expected.len())
			.filter(|&m| augment(m, &edges, &mut vec![false; calls.len()], &mut owner))
			.count()
	}

	/// Expected matchers found as a subsequence of the calls.
	fn in_order_matches(&self, calls: &[ToolCall]) -> usize {
		let mut next = 0;
		for call in calls {
			if next < self.expected.len() && self.expected[next].matches(call) {
				next += 1;
			}
		}
		next
	}

	fn score(&self, calls: &[ToolCall]) -> (f64, String) {
		let expected = self.expected.len();
		match self.mode {
			PatternMode::Exactly => {
				let ok = calls.len() == expected
					&& if self.ordered {
						self.expected.iter().zip(calls).all(|(m, c)| m.matches(c))
					} else {
						self.max_assignment(calls) == expected
					};
				let message = if ok {
					"tool calls matched exactly".to_string()
				} else {
					format!(
						"expected exactly {} call{} {}, got {}",
						expected,
						if expected == 1 { "" } else { "s" },
						names(self.expected.iter().map(ToolMatcher::name)),
						names(calls.iter().map(|c| c.name.as_str())),
					)
				};
				(if ok { 1.0 } else { 0.0 }, message)
			}
			PatternMode::AtLeast => {
				if expected == 0 {
					return (1.0, "no tool calls expected".to_string());
				}
				let found = if self.ordered { self.in_order_matches(calls) } else { self.max_assignment(calls) };
				let message = format!(
					"{} of {} expected tool calls found{}",
					found,
					expected,
					if self.ordered { " in order" } else { "" }
				);
				(found as f64 / expected as f64, message)
			}
			PatternMode::NoneOf => {
				if expected == 0 {
					return (1.0, "no forbidden tool calls configured".to_string());
				}
				let seen: Vec<&str> = self
					.expected
					.iter()
					.filter(|m| calls.iter().any(|c| m.matches(c)))
					.map(ToolMatcher::name)
					.collect();
				let message = if seen.is_empty() {
					"no forbidden tool calls made".to_string()
				} else {
					format!("forbidden tool calls made: {}", seen.join(", "))
				};
				((expected - seen.len()) as f64 / expected as f64, message)
			}
		}
	}
}

fn names<'a>(items: impl Iterator<Item = &'a str>) -> String {
	format!("[{}]", items.collect::<Vec<_>>().join(", "))
}

/// Name-level precision and recall of the calls against the expected list.
fn precision_recall(expected: &[ToolMatcher], calls: &[ToolCall]) -> (f64, f64, f64) {
	if expected.is_empty() && calls.is_empty() {
		return (1.0, 1.0, 1.0);
	}
	let mut wanted: HashMap<&str, usize> = HashMap::new();
	for m in expected {
		*wanted.entry(m.name()).or_default() += 1;
	}
	let mut got: HashMap<&str, usize> = HashMap::new();
	for c in calls {
		*got.entry(c.name.as_str()).or_default() += 1;
	}
	let hits: usize = wanted
		.iter()
		.map(|(name, n)| got.get(name).copied().unwrap_or(0).min(*n))
		.sum();
	let precision = if calls.is_empty() { 0.0 } else { hits as f64 / calls.len() as f64 };
	let recall = if expected.is_empty() { 0.0 } else { hits as f64 / expected.len() as f64 };
	let f1 = if precision + recall == 0.0 { 0.0 } else { 2.0 * precision * recall / (precision + recall) };
	(precision, recall, f1)
}

#[async_trait]
impl Grader for ToolCallGrader {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> GraderKind {
		GraderKind::ToolCalls
	}

	async fn grade(&self, ctx: &GraderContext, _task: &Task) -> Result<GraderResult> {
		let (score, message) = self.score(&ctx.tool_calls);
		let passed = meets_threshold(score, self.threshold);

		let mut details = json!({
			"mode": self.mode,
			"ordered": self.ordered,
			"expected": self.expected,
			"actual": ctx.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
		});
		if self.mode != PatternMode::NoneOf {
			let (precision, recall, f1) = precision_recall(&self.expected, &ctx.tool_calls);
			details["precision"] = json!(precision);
			details["recall"] = json!(recall);
			details["f1"] = json!(f1);
		}

		Ok(GraderResult::new(&self.name, GraderKind::ToolCalls.as_str(), score, passed, message).with_details(details))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use skill_eval_types::ExecutionResult;

	fn call(name: &str, args: Value) -> ToolCall {
		ToolCall::new(name, args)
	}

	async fn grade(grader: &ToolCallGrader, calls: Vec<ToolCall>) -> GraderResult {
		let task = Task::new("t", "p");
		let mut execution = ExecutionResult::completed("");
		execution.tool_calls = calls;
		grader.grade(&GraderContext::new(&task, &execution), &task).await.unwrap()
	}

	fn matcher(name: &str) -> ToolMatcher {
		ToolMatcher::Name(name.to_string())
	}

	#[tokio::test]
	async fn test_exactly_unordered_and_ordered() {
		let calls = vec![call("view", json!({})), call("bash", json!({}))];
		let unordered = ToolCallGrader::new("g", PatternMode::Exactly, false, vec![matcher("bash"), matcher("view")]);
		assert_eq!(grade(&unordered, calls.clone()).await.score, 1.0);

		let ordered = ToolCallGrader::new("g", PatternMode::Exactly, true, vec![matcher("bash"), matcher("view")]);
		let result = grade(&ordered, calls).await;
		assert_eq!(result.score, 0.0);
		assert!(!result.passed);
	}

	#[tokio::test]
	async fn test_at_least_is_proportional() {
		let grader = ToolCallGrader::new(
			"g",
			PatternMode::AtLeast,
			true,
			vec![matcher("view"), matcher("edit"), matcher("bash")],
		);
		let result = grade(&grader, vec![call("view", json!({})), call("bash", json!({})), call("edit", json!({}))]).await;
		assert!((result.score - 2.0 / 3.0).abs() < 1e-9);
		assert!(!result.passed);
		assert_eq!(result.message, "2 of 3 expected tool calls found in order");
	}

	#[tokio::test]
	async fn test_argument_subset_matching() {
		let grader = ToolCallGrader::from_config(&GraderConfig::new(
			"tool_calls",
			"runs_tests",
			json!({
				"mode": "at_least",
				"expected": [{ "name": "bash", "arguments": { "command": "cargo test" } }]
			}),
		))
		.unwrap();
		let hit = grade(&grader, vec![call("bash", json!({ "command": "cargo test", "timeout": 60 }))]).await;
		assert!(hit.passed);
		let encoded = grade(&grader, vec![call("bash", json!("{\"command\": \"cargo test\"}"))]).await;
		assert!(encoded.passed);
		let miss = grade(&grader, vec![call("bash", json!({ "command": "ls" }))]).await;
		assert_eq!(miss.score, 0.0);
	}

	#[tokio::test]
	async fn test_none_of() {
		let grader = ToolCallGrader::new("g", PatternMode::NoneOf, false, vec![matcher("rm"), matcher("curl")]);
		let result = grade(&grader, vec![call("curl", json!({})), call("view", json!({}))]).await;
		assert_eq!(result.score, 0.5);
		assert_eq!(result.message, "forbidden tool calls made: curl");
		assert!(grade(&grader, vec![]).await.passed);
	}

	#[tokio::test]
	async fn test_assignment_handles_overlapping_matchers() {
		// A greedy pass would give the first call to the generic matcher.
		let grader = ToolCallGrader::new(
			"g",
			PatternMode::AtLeast,
			false,
			vec![
				matcher("bash"),
				ToolMatcher::Full { name: "bash".into(), arguments: Some(json!({ "command": "ls" })) },
			],
		);
		let calls = vec![call("bash", json!({ "command": "ls" })), call("bash", json!({ "command": "pwd" }))];
		assert_eq!(grade(&grader, calls).await.score, 1.0);
	}

	#[test]
	fn test_matcher_shorthand_deserializes() {
		let matchers: Vec<ToolMatcher> = serde_json::from_value(json!(["bash", { "name": "view" }])).unwrap();
		assert_eq!(matchers[0], matcher("bash"));
		assert_eq!(matchers[1], ToolMatcher::Full { name: "view".into(), arguments: None });
	}

	#[test]
	fn test_threshold_outside_unit_range_is_rejected() {
		let cfg = GraderConfig::new("tool_calls", "t", json!({ "expected": ["bash"], "threshold": -0.5 }));
		assert!(ToolCallGrader::from_config(&cfg).is_err());
	}
}

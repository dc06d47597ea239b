use std::collections::BTreeMap;

use serde_json::json;
use skill_eval_types::{Contribution, GraderResult, MetricResult};

use crate::metric::{MetricConfig, MetricInput};

pub struct Params<'a> {
	pub weights: &'a BTreeMap<String, f64>,
	pub tolerate_partial: bool,
	pub max_tool_calls: Option<usize>,
	pub max_duration_ms: Option<u64>,
	pub efficiency_weight: f64,
}

/// Weighted mean over a subset of grader scores, optionally blended with an
/// efficiency component computed from the raw execution.
pub fn evaluate(config: &MetricConfig, params: &Params<'_>, input: &MetricInput<'_>) -> MetricResult {
	let kind = config.kind.as_str();
	let selection: Vec<(&str, f64)> = if params.weights.is_empty() {
		input
			.graders
			.iter()
			.map(|g| (g.name.as_str(), task_weight(input, &g.name)))
			.collect()
	} else {
		params.weights.iter().map(|(name, w)| (name.as_str(), *w)).collect()
	};

	let mut breakdown = Vec::with_capacity(selection.len() + 1);
	let mut excluded = Vec::new();
	for (name, weight) in selection {
		let result: Option<&GraderResult> = input.graders.iter().find(|g| g.name == name);
		let contribution = match result {
			None => {
				excluded.push(format!("{} (absent)", name));
				Contribution { source: name.to_string(), weight, score: None, included: false }
			}
			Some(g) if g.is_error() && params.tolerate_partial => {
				excluded.push(format!("{} (errored)", name));
				Contribution { source: name.to_string(), weight, score: Some(0.0), included: false }
			}
			Some(g) if g.is_error() => Contribution { source: name.to_string(), weight, score: Some(0.0), included: true },
			Some(g) => Contribution { source: name.to_string(), weight, score: Some(g.score), included: true },
		};
		breakdown.push(contribution);
	}

	let efficiency = efficiency(params, input);
	if let Some((score, _)) = &efficiency {
		breakdown.push(Contribution {
			source: "efficiency".to_string(),
			weight: params.efficiency_weight,
			score: Some(*score),
			included: true,
		});
	}

	let total: f64 = breakdown.iter().filter(|c| c.included).map(|c| c.weight).sum();
	if total <= 0.0 {
		return MetricResult::not_applicable(&config.name, kind, "no grader results to weigh").with_breakdown(breakdown);
	}
	let score = breakdown
		.iter()
		.filter(|c| c.included)
		.map(|c| c.weight * c.score.unwrap_or(0.0))
		.sum::<f64>()
		/ total;

	let message = if excluded.is_empty() {
		format!("weighted score {:.3}", score)
	} else {
		format!("weighted score {:.3}; excluded: {}", score, excluded.join(", "))
	};
	let constraints = efficiency.map(|(_, checks)| checks).unwrap_or_default();
	MetricResult::scored(&config.name, kind, score, config.threshold, message)
		.with_breakdown(breakdown)
		.with_details(json!({
			"tolerate_partial": params.tolerate_partial,
			"constraints": constraints,
		}))
}

fn task_weight(input: &MetricInput<'_>, grader: &str) -> f64 {
	input
		.task
		.graders
		.iter()
		.find(|g| g.name == grader)
		.map_or(1.0, |g| g.weight)
}

/// Fraction of configured execution constraints met, with one line per check.
fn efficiency(params: &Params<'_>, input: &MetricInput<'_>) -> Option<(f64, Vec<String>)> {
	let mut checks = Vec::new();
	let mut met = 0usize;
	if let Some(max) = params.max_tool_calls {
		let used = input.execution.tool_calls.len();
		let ok = used <= max;
		met += usize::from(ok);
		checks.push(format!("{} tool calls: {} (max {})", if ok { "✓" } else { "✗" }, used, max));
	}
	if let Some(max) = params.max_duration_ms {
		let took = input.execution.duration_ms;
		let ok = took <= max;
		met += usize::from(ok);
		checks.push(format!("{} duration: {}ms (max {}ms)", if ok { "✓" } else { "✗" }, took, max));
	}
	if checks.is_empty() {
		return None;
	}
	Some((met as f64 / checks.len() as f64, checks))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::grader::GraderConfig;
	use crate::task::Task;
	use skill_eval_types::{ExecutionResult, ToolCall};
	use std::collections::HashMap;

	fn params(weights: &BTreeMap<String, f64>, tolerate_partial: bool) -> Params<'_> {
		Params {
			weights,
			tolerate_partial,
			max_tool_calls: None,
			max_duration_ms: None,
			efficiency_weight: 1.0,
		}
	}

	fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
		pairs.iter().map(|(n, w)| (n.to_string(), *w)).collect()
	}

	fn graders() -> Vec<GraderResult> {
		vec![
			GraderResult::new("regex", "regex", 1.0, true, ""),
			GraderResult::new("script", "script", 0.5, false, ""),
			GraderResult::failure("judge", "llm_comparison", "judge call timed out after 60s"),
		]
	}

	fn run(task: &Task, execution: &ExecutionResult, params: &Params<'_>) -> MetricResult {
		let metrics = HashMap::new();
		let graders = graders();
		let input = MetricInput { task, execution, graders: &graders, metrics: &metrics };
		evaluate(&MetricConfig::behavior_quality("quality", &[]), params, &input)
	}

	#[test]
	fn test_errored_grader_counts_as_zero() {
		let w = weights(&[("regex", 1.0), ("judge", 1.0)]);
		let result = run(&Task::new("t", "p"), &ExecutionResult::completed(""), &params(&w, false));
		assert_eq!(result.score, Some(0.5));
		assert!(!result.passed);
	}

	#[test]
	fn test_tolerate_partial_excludes_errored_grader() {
		let w = weights(&[("regex", 1.0), ("judge", 1.0)]);
		let result = run(&Task::new("t", "p"), &ExecutionResult::completed(""), &params(&w, true));
		assert_eq!(result.score, Some(1.0));
		assert!(result.message.contains("judge (errored)"));
	}

	#[test]
	fn test_absent_grader_leaves_denominator() {
		let w = weights(&[("script", 3.0), ("not_run", 5.0)]);
		let result = run(&Task::new("t", "p"), &ExecutionResult::completed(""), &params(&w, false));
		assert_eq!(result.score, Some(0.5));
		assert!(!result.breakdown[0].included);
		assert_eq!(result.breakdown[0].source, "not_run");
	}

	#[test]
	fn test_empty_weights_use_task_grader_weights() {
		let task = Task::new("t", "p")
			.with_grader(GraderConfig::new("regex", "regex", json!({})).with_weight(3.0))
			.with_grader(GraderConfig::new("script", "script", json!({})).with_weight(1.0))
			.with_grader(GraderConfig::new("llm_comparison", "judge", json!({})).with_weight(0.0));
		let empty = BTreeMap::new();
		let result = run(&task, &ExecutionResult::completed(""), &params(&empty, false));
		assert!((result.score.unwrap() - 0.875).abs() < 1e-9);
	}

	#[test]
	fn test_efficiency_constraints() {
		let w = weights(&[("regex", 1.0)]);
		let mut p = params(&w, false);
		p.max_tool_calls = Some(1);
		p.max_duration_ms = Some(1000);
		let mut execution = ExecutionResult::completed("");
		execution.duration_ms = 200;
		execution.tool_calls = vec![ToolCall::new("a", json!({})), ToolCall::new("b", json!({}))];
		let result = run(&Task::new("t", "p"), &execution, &p);
		assert_eq!(result.score, Some(0.75));
		assert_eq!(result.details["constraints"][0], "✗ tool calls: 2 (max 1)");
	}
}

use serde_json::json;
use skill_eval_types::{Contribution, GraderResult, MetricResult};

use crate::metric::{CompletionMode, MetricConfig, MetricInput};

/// Terminal success flag combined with the primary graders' verdicts.
pub fn evaluate(
	config: &MetricConfig,
	primary_graders: &[String],
	mode: CompletionMode,
	input: &MetricInput<'_>,
) -> MetricResult {
	let kind = config.kind.as_str();
	let selected: Vec<&GraderResult> = if primary_graders.is_empty() {
		input.graders.iter().collect()
	} else {
		input
			.graders
			.iter()
			.filter(|g| primary_graders.iter().any(|p| p == &g.name))
			.collect()
	};
	let missing: Vec<&str> = primary_graders
		.iter()
		.filter(|p| !input.graders.iter().any(|g| &g.name == *p))
		.map(String::as_str)
		.collect();

	if !primary_graders.is_empty() && selected.is_empty() {
		return MetricResult::not_applicable(
			&config.name,
			kind,
			format!("none of the primary graders ran: {}", missing.join(", ")),
		)
		.with_details(json!({ "missing_graders": missing }));
	}

	let success = input.execution.success;
	let passed_count = selected.iter().filter(|g| g.passed).count();
	let score = match mode {
		CompletionMode::Binary => {
			if success && passed_count == selected.len() {
				1.0
			} else {
				0.0
			}
		}
		CompletionMode::Proportional if !success => 0.0,
		CompletionMode::Proportional if selected.is_empty() => 1.0,
		CompletionMode::Proportional => passed_count as f64 / selected.len() as f64,
	};

	let message = if !success {
		match &input.execution.error {
			Some(err) => format!("execution failed: {}", err),
			None => "execution did not succeed".to_string(),
		}
	} else {
		format!("{} of {} primary graders passed", passed_count, selected.len())
	};

	let breakdown = selected
		.iter()
		.map(|g| Contribution {
			source: g.name.clone(),
			weight: 1.0,
			score: Some(if g.passed { 1.0 } else { 0.0 }),
			included: true,
		})
		.collect();

	MetricResult::scored(&config.name, kind, score, config.threshold, message)
		.with_breakdown(breakdown)
		.with_details(json!({
			"success": success,
			"mode": mode,
			"missing_graders": missing,
		}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::metric::MetricKind;
	use crate::task::Task;
	use skill_eval_types::ExecutionResult;
	use std::collections::HashMap;

	fn graders() -> Vec<GraderResult> {
		vec![
			GraderResult::new("checks", "script", 1.0, true, ""),
			GraderResult::new("style", "regex", 0.3, false, ""),
		]
	}

	fn run(config: &MetricConfig, execution: &ExecutionResult, graders: &[GraderResult]) -> MetricResult {
		let task = Task::new("t", "p");
		let metrics = HashMap::new();
		let input = MetricInput { task: &task, execution, graders, metrics: &metrics };
		match &config.kind {
			MetricKind::TaskCompletion { primary_graders, mode } => evaluate(config, primary_graders, *mode, &input),
			_ => unreachable!(),
		}
	}

	fn config(primary: &[&str], mode: CompletionMode) -> MetricConfig {
		MetricConfig::new(
			"done",
			MetricKind::TaskCompletion {
				primary_graders: primary.iter().map(|s| s.to_string()).collect(),
				mode,
			},
		)
	}

	#[test]
	fn test_binary_requires_success_and_primary_graders() {
		let ok = ExecutionResult::completed("out");
		assert_eq!(run(&config(&["checks"], CompletionMode::Binary), &ok, &graders()).score, Some(1.0));
		assert_eq!(run(&config(&[], CompletionMode::Binary), &ok, &graders()).score, Some(0.0));

		let failed = ExecutionResult::failed("session crashed", 10);
		let result = run(&config(&["checks"], CompletionMode::Binary), &failed, &graders());
		assert_eq!(result.score, Some(0.0));
		assert_eq!(result.message, "execution failed: session crashed");
	}

	#[test]
	fn test_proportional_counts_passing_graders() {
		let ok = ExecutionResult::completed("out");
		let result = run(&config(&[], CompletionMode::Proportional), &ok, &graders());
		assert_eq!(result.score, Some(0.5));
		assert!(!result.passed);
		assert_eq!(result.breakdown.len(), 2);
	}

	#[test]
	fn test_missing_primary_graders_are_reported() {
		let ok = ExecutionResult::completed("out");
		let result = run(&config(&["checks", "ghost"], CompletionMode::Binary), &ok, &graders());
		assert_eq!(result.score, Some(1.0));
		assert_eq!(result.details["missing_graders"], json!(["ghost"]));
	}

	#[test]
	fn test_all_primary_graders_missing_is_not_applicable() {
		let ok = ExecutionResult::completed("out");
		let result = run(&config(&["ghost", "phantom"], CompletionMode::Binary), &ok, &graders());
		assert!(!result.is_applicable());
		assert_eq!(result.score, None);
		assert_eq!(result.details["missing_graders"], json!(["ghost", "phantom"]));

		let result = run(&config(&["ghost"], CompletionMode::Proportional), &ok, &[]);
		assert!(!result.is_applicable());
	}
}

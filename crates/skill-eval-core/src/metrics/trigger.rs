use serde::{Deserialize, Serialize};
use skill_eval_types::{MetricResult, TriggerMetrics};

use crate::metric::{MetricConfig, MetricInput};
use crate::task::TriggerConfidence;

/// One labelled trigger observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerSample {
	pub should_trigger: bool,
	pub did_trigger: bool,
	#[serde(default)]
	pub confidence: TriggerConfidence,
}

impl TriggerSample {
	pub fn correct(&self) -> bool {
		self.should_trigger == self.did_trigger
	}

	pub fn classification(&self) -> &'static str {
		match (self.should_trigger, self.did_trigger) {
			(true, true) => "true_positive",
			(false, true) => "false_positive",
			(false, false) => "true_negative",
			(true, false) => "false_negative",
		}
	}

	/// Recover the sample recorded on a trigger metric result.
	pub fn from_result(result: &MetricResult) -> Option<Self> {
		if result.kind != "trigger_accuracy" || !result.is_applicable() {
			return None;
		}
		serde_json::from_value(result.details.clone()).ok()
	}
}

/// Score 1.0 when the skill activated exactly when the task says it should.
/// Tasks without a `should_trigger` label are not applicable.
pub fn evaluate(config: &MetricConfig, input: &MetricInput<'_>) -> MetricResult {
	let kind = config.kind.as_str();
	let Some(should_trigger) = input.task.expected.should_trigger else {
		return MetricResult::not_applicable(&config.name, kind, "task has no should_trigger label");
	};
	let sample = TriggerSample {
		should_trigger,
		did_trigger: input.execution.skill_invoked,
		confidence: input.task.expected.confidence.unwrap_or_default(),
	};
	let score = if sample.correct() { 1.0 } else { 0.0 };
	let message = format!(
		"{} (expected trigger: {}, triggered: {})",
		sample.classification().replace('_', " "),
		sample.should_trigger,
		sample.did_trigger
	);

	let mut details = serde_json::to_value(sample).unwrap_or_default();
	if let Some(map) = details.as_object_mut() {
		map.insert("classification".to_string(), sample.classification().into());
	}
	MetricResult::scored(&config.name, kind, score, config.threshold, message).with_details(details)
}

/// Suite-level precision, recall, F1 and accuracy. Each sample is weighted
/// by its confidence; counts are raw.
pub fn summarize(samples: &[TriggerSample]) -> Option<TriggerMetrics> {
	if samples.is_empty() {
		return None;
	}
	let mut metrics = TriggerMetrics::default();
	let (mut tp, mut fp, mut tn, mut fn_) = (0.0, 0.0, 0.0, 0.0);
	for sample in samples {
		let w = sample.confidence.weight();
		match (sample.should_trigger, sample.did_trigger) {
			(true, true) => {
				tp += w;
				metrics.true_positives += 1;
			}
			(false, true) => {
				fp += w;
				metrics.false_positives += 1;
			}
			(false, false) => {
				tn += w;
				metrics.true_negatives += 1;
			}
			(true, false) => {
				fn_ += w;
				metrics.false_negatives += 1;
			}
		}
	}

	let precision = safe_divide(tp, tp + fp);
	let recall = safe_divide(tp, tp + fn_);
	let f1 = if precision + recall > 0.0 {
		2.0 * precision * recall / (precision + recall)
	} else {
		0.0
	};
	metrics.precision = round4(precision);
	metrics.recall = round4(recall);
	metrics.f1 = round4(f1);
	metrics.accuracy = round4(safe_divide(tp + tn, tp + fp + tn + fn_));
	Some(metrics)
}

fn safe_divide(num: f64, den: f64) -> f64 {
	if den == 0.0 {
		0.0
	} else {
		num / den
	}
}

fn round4(v: f64) -> f64 {
	(v * 10000.0).round() / 10000.0
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::task::Task;
	use skill_eval_types::ExecutionResult;
	use std::collections::HashMap;

	fn sample(should: bool, did: bool, confidence: TriggerConfidence) -> TriggerSample {
		TriggerSample {
			should_trigger: should,
			did_trigger: did,
			confidence,
		}
	}

	#[test]
	fn test_per_trial_classification() {
		let config = MetricConfig::trigger_accuracy("triggers");
		let metrics = HashMap::new();
		let task = Task::new("t", "p").with_should_trigger(false);
		let mut execution = ExecutionResult::completed("");
		execution.skill_invoked = true;
		let input = MetricInput { task: &task, execution: &execution, graders: &[], metrics: &metrics };

		let result = evaluate(&config, &input);
		assert_eq!(result.score, Some(0.0));
		assert_eq!(result.details["classification"], "false_positive");
		assert_eq!(TriggerSample::from_result(&result), Some(sample(false, true, TriggerConfidence::High)));

		let unlabelled = Task::new("u", "p");
		let input = MetricInput { task: &unlabelled, execution: &execution, graders: &[], metrics: &metrics };
		let result = evaluate(&config, &input);
		assert!(!result.is_applicable());
		assert!(result.passed);
		assert_eq!(TriggerSample::from_result(&result), None);
	}

	#[test]
	fn test_suite_metrics() {
		let high = TriggerConfidence::High;
		let samples = [
			sample(true, true, high),
			sample(true, true, high),
			sample(true, false, high),
			sample(false, false, high),
			sample(false, true, high),
		];
		let m = summarize(&samples).unwrap();
		assert_eq!((m.true_positives, m.false_positives, m.true_negatives, m.false_negatives), (2, 1, 1, 1));
		assert_eq!(m.precision, 0.6667);
		assert_eq!(m.recall, 0.6667);
		assert_eq!(m.f1, 0.6667);
		assert_eq!(m.accuracy, 0.6);
	}

	#[test]
	fn test_medium_confidence_counts_half() {
		let samples = [
			sample(true, true, TriggerConfidence::High),
			sample(false, true, TriggerConfidence::Medium),
		];
		let m = summarize(&samples).unwrap();
		assert_eq!(m.precision, 0.6667);
		assert_eq!(m.false_positives, 1);
		assert!(summarize(&[]).is_none());
	}
}

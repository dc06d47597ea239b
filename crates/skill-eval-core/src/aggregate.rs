use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skill_eval_types::{meets_threshold, EvalSummary, MetricAggregate, TaskAggregate, TrialResult};

use crate::metric::{MetricConfig, MetricSet};
use crate::metrics::trigger::{self, TriggerSample};
use crate::task::Task;

/// Suite-level pass policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationPolicy {
	/// Pass the suite when at least this fraction of tasks passed, instead
	/// of requiring every task to pass.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub partial_pass_threshold: Option<f64>,
}

pub fn mean(values: &[f64]) -> f64 {
	if values.is_empty() {
		return 0.0;
	}
	values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
	if values.is_empty() {
		return 0.0;
	}
	let m = mean(values);
	let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
	variance.sqrt()
}

/// 95% confidence interval of the mean under the normal approximation,
/// using the sample standard deviation. Collapses to the mean below two values.
pub fn confidence_interval_95(values: &[f64]) -> (f64, f64) {
	let m = mean(values);
	let n = values.len();
	if n < 2 {
		return (m, m);
	}
	let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1) as f64;
	let margin = 1.96 * variance.sqrt() / (n as f64).sqrt();
	(m - margin, m + margin)
}

/// Fold one metric across the trials of a task.
pub fn aggregate_metric(config: &MetricConfig, root: bool, trials: &[TrialResult]) -> MetricAggregate {
	let results: Vec<_> = trials.iter().map(|t| t.metric(&config.name)).collect();
	let trial_scores: Vec<Option<f64>> = results.iter().map(|r| r.and_then(|m| m.score)).collect();
	let applicable: Vec<_> = results.iter().flatten().filter(|m| m.is_applicable()).collect();
	let scores: Vec<f64> = applicable.iter().filter_map(|m| m.score).collect();
	let kind = config.kind.as_str().to_string();

	if scores.is_empty() {
		return MetricAggregate {
			name: config.name.clone(),
			kind,
			score: None,
			threshold: config.threshold,
			min_pass_rate: config.min_pass_rate,
			weight: config.weight,
			passed: true,
			pass_rate: 1.0,
			std_dev: 0.0,
			ci_low: 0.0,
			ci_high: 0.0,
			flaky: false,
			root,
			trial_scores,
			message: "not applicable in any trial".to_string(),
		};
	}

	let passed_trials = applicable.iter().filter(|m| m.passed).count();
	let pass_rate = passed_trials as f64 / applicable.len() as f64;
	let score = mean(&scores);
	let meets_rate = config.min_pass_rate.map_or(true, |rate| meets_threshold(pass_rate, rate));
	let passed = meets_threshold(score, config.threshold) && meets_rate;
	let flaky = passed_trials > 0 && passed_trials < applicable.len();
	let (ci_low, ci_high) = confidence_interval_95(&scores);

	let mut message = format!(
		"mean {:.3} over {} trial(s), threshold {:.2}, pass rate {:.0}%",
		score,
		scores.len(),
		config.threshold,
		pass_rate * 100.0
	);
	if !meets_rate {
		if let Some(rate) = config.min_pass_rate {
			message.push_str(&format!(" (below required {:.0}%)", rate * 100.0));
		}
	}

	MetricAggregate {
		name: config.name.clone(),
		kind,
		score: Some(score),
		threshold: config.threshold,
		min_pass_rate: config.min_pass_rate,
		weight: config.weight,
		passed,
		pass_rate,
		std_dev: std_dev(&scores),
		ci_low,
		ci_high,
		flaky,
		root,
		trial_scores,
		message,
	}
}

/// Fold all trials of a task. Trials are ordered by index first.
pub fn aggregate_task(task: &Task, metrics: &MetricSet, mut trials: Vec<TrialResult>) -> TaskAggregate {
	trials.sort_by_key(|t| t.trial);
	let aggregates: Vec<MetricAggregate> = metrics
		.configs()
		.iter()
		.map(|config| aggregate_metric(config, metrics.is_root(&config.name), &trials))
		.collect();

	let roots: Vec<&MetricAggregate> = aggregates.iter().filter(|m| m.root && m.score.is_some()).collect();
	if roots.is_empty() {
		return aggregate_by_graders(task, trials, aggregates);
	}

	for trial in &mut trials {
		trial.passed = roots
			.iter()
			.all(|root| trial.metric(&root.name).map_or(true, |m| m.passed));
	}
	let total_weight: f64 = roots.iter().map(|m| m.weight).sum();
	let score = if total_weight > 0.0 {
		roots.iter().map(|m| m.weight * m.score.unwrap_or(0.0)).sum::<f64>() / total_weight
	} else {
		mean(&roots.iter().filter_map(|m| m.score).collect::<Vec<_>>())
	};
	let (ci_low, ci_high) = confidence_interval_95(&root_trial_scores(&roots, &trials));
	let passed = roots.iter().all(|m| m.passed);
	let failing: Vec<&str> = roots.iter().filter(|m| !m.passed).map(|m| m.name.as_str()).collect();
	let flaky = aggregates.iter().any(|m| m.flaky);
	let message = if failing.is_empty() {
		format!("all {} root metric(s) passed", roots.len())
	} else {
		format!("failed metrics: {}", failing.join(", "))
	};

	TaskAggregate {
		task_id: task.id.clone(),
		name: task.name.clone(),
		weight: task.weight,
		pass_rate: trial_pass_rate(&trials),
		trials,
		metrics: aggregates,
		score: Some(score),
		ci_low,
		ci_high,
		passed,
		flaky,
		message,
	}
}

/// Per-trial task score: the weighted mean of the root metrics applicable in
/// that trial. Trials where none applied are skipped.
fn root_trial_scores(roots: &[&MetricAggregate], trials: &[TrialResult]) -> Vec<f64> {
	trials
		.iter()
		.filter_map(|trial| {
			let scored: Vec<(f64, f64)> = roots
				.iter()
				.filter_map(|root| {
					let m = trial.metric(&root.name)?;
					m.score.filter(|_| m.is_applicable()).map(|s| (root.weight, s))
				})
				.collect();
			if scored.is_empty() {
				return None;
			}
			let weight: f64 = scored.iter().map(|(w, _)| w).sum();
			Some(if weight > 0.0 {
				scored.iter().map(|(w, s)| w * s).sum::<f64>() / weight
			} else {
				mean(&scored.iter().map(|(_, s)| *s).collect::<Vec<_>>())
			})
		})
		.collect()
}

/// Verdict for a task with no applicable metric: mean grader score, and every
/// grader must pass in every trial.
fn aggregate_by_graders(task: &Task, mut trials: Vec<TrialResult>, aggregates: Vec<MetricAggregate>) -> TaskAggregate {
	let mut trial_scores = Vec::with_capacity(trials.len());
	for trial in &mut trials {
		if trial.graders.is_empty() {
			trial.passed = trial.execution.success;
			trial_scores.push(if trial.passed { 1.0 } else { 0.0 });
		} else {
			trial.passed = trial.graders.iter().all(|g| g.passed);
			trial_scores.push(mean(&trial.graders.iter().map(|g| g.score).collect::<Vec<_>>()));
		}
	}
	let passed_trials = trials.iter().filter(|t| t.passed).count();
	let passed = !trials.is_empty() && passed_trials == trials.len();
	let flaky = passed_trials > 0 && passed_trials < trials.len();
	let score = if trial_scores.is_empty() { None } else { Some(mean(&trial_scores)) };
	let (ci_low, ci_high) = confidence_interval_95(&trial_scores);
	let message = match score {
		Some(s) => format!("mean grader score {:.3}; {} of {} trial(s) passed every grader", s, passed_trials, trials.len()),
		None => "no trials ran".to_string(),
	};

	TaskAggregate {
		task_id: task.id.clone(),
		name: task.name.clone(),
		weight: task.weight,
		pass_rate: trial_pass_rate(&trials),
		trials,
		metrics: aggregates,
		score,
		ci_low,
		ci_high,
		passed,
		flaky,
		message,
	}
}

fn trial_pass_rate(trials: &[TrialResult]) -> f64 {
	if trials.is_empty() {
		return 0.0;
	}
	trials.iter().filter(|t| t.passed).count() as f64 / trials.len() as f64
}

/// Fold task aggregates into the run summary.
pub fn summarize(
	name: impl Into<String>,
	skill: impl Into<String>,
	started_at: DateTime<Utc>,
	tasks: Vec<TaskAggregate>,
	policy: &AggregationPolicy,
) -> EvalSummary {
	let total_tasks = tasks.len();
	let passed_tasks = tasks.iter().filter(|t| t.passed).count();
	let flaky_tasks = tasks.iter().filter(|t| t.flaky).count();
	let total_trials: usize = tasks.iter().map(|t| t.trials.len()).sum();

	let scored: Vec<(f64, f64)> = tasks.iter().filter_map(|t| t.score.map(|s| (s, t.weight))).collect();
	let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();
	let overall_score = if total_weight > 0.0 {
		scored.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight
	} else {
		mean(&scored.iter().map(|(s, _)| *s).collect::<Vec<_>>())
	};

	let passed = match policy.partial_pass_threshold {
		Some(threshold) if total_tasks > 0 => meets_threshold(passed_tasks as f64 / total_tasks as f64, threshold),
		Some(_) => false,
		None => passed_tasks == total_tasks,
	};

	let samples: Vec<TriggerSample> = tasks
		.iter()
		.flat_map(|t| t.trials.iter())
		.flat_map(|trial| trial.metrics.iter())
		.filter_map(TriggerSample::from_result)
		.collect();

	let mut message = format!("{}/{} tasks passed", passed_tasks, total_tasks);
	if flaky_tasks > 0 {
		message.push_str(&format!(", {} flaky", flaky_tasks));
	}
	if let Some(threshold) = policy.partial_pass_threshold {
		message.push_str(&format!(" (partial pass threshold {:.0}%)", threshold * 100.0));
	}

	EvalSummary {
		name: name.into(),
		skill: skill.into(),
		started_at,
		finished_at: Utc::now(),
		overall_score,
		passed,
		total_tasks,
		passed_tasks,
		failed_tasks: total_tasks - passed_tasks,
		flaky_tasks,
		total_trials,
		trigger_metrics: trigger::summarize(&samples),
		tasks,
		message,
	}
}

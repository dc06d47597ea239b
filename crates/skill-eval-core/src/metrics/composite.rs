use std::collections::{BTreeMap, HashMap};

use skill_eval_types::{Contribution, MetricResult};

use crate::metric::MetricConfig;

/// Weighted mean of other metric results. Inapplicable components drop out;
/// if all of them do, so does the composite.
pub fn evaluate(
	config: &MetricConfig,
	components: &BTreeMap<String, f64>,
	metrics: &HashMap<String, MetricResult>,
) -> MetricResult {
	let kind = config.kind.as_str();
	let breakdown: Vec<Contribution> = components
		.iter()
		.map(|(name, weight)| {
			let score = metrics.get(name).and_then(|m| m.score);
			Contribution {
				source: name.clone(),
				weight: *weight,
				score,
				included: score.is_some(),
			}
		})
		.collect();

	let total: f64 = breakdown.iter().filter(|c| c.included).map(|c| c.weight).sum();
	if total <= 0.0 {
		return MetricResult::not_applicable(&config.name, kind, "no applicable components").with_breakdown(breakdown);
	}
	let score = breakdown
		.iter()
		.filter_map(|c| c.score.map(|s| s * c.weight))
		.sum::<f64>()
		/ total;

	let parts: Vec<String> = breakdown
		.iter()
		.map(|c| match c.score {
			Some(s) => format!("{}={:.3}×{}", c.source, s, c.weight),
			None => format!("{}=n/a", c.source),
		})
		.collect();
	MetricResult::scored(&config.name, kind, score, config.threshold, parts.join(", ")).with_breakdown(breakdown)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn results(pairs: &[(&str, Option<f64>)]) -> HashMap<String, MetricResult> {
		pairs
			.iter()
			.map(|(name, score)| {
				let result = match score {
					Some(s) => MetricResult::scored(*name, "task_completion", *s, 0.6, ""),
					None => MetricResult::not_applicable(*name, "trigger_accuracy", "no label"),
				};
				(name.to_string(), result)
			})
			.collect()
	}

	fn components(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
		pairs.iter().map(|(n, w)| (n.to_string(), *w)).collect()
	}

	#[test]
	fn test_weighted_mean_excludes_inapplicable() {
		let config = MetricConfig::composite("overall", &[]);
		let metrics = results(&[("a", Some(1.0)), ("b", Some(0.4)), ("c", None)]);
		let result = evaluate(&config, &components(&[("a", 1.0), ("b", 3.0), ("c", 10.0)]), &metrics);
		assert!((result.score.unwrap() - 0.55).abs() < 1e-9);
		assert!(!result.passed);
		assert!(!result.breakdown[2].included);
	}

	#[test]
	fn test_weight_configurations_match_weighted_mean() {
		let metrics = results(&[("a", Some(0.2)), ("b", Some(0.9))]);
		let config = MetricConfig::composite("overall", &[]);
		for (wa, wb) in [(1.0, 1.0), (0.0, 2.0), (5.0, 0.5), (0.25, 0.75)] {
			let result = evaluate(&config, &components(&[("a", wa), ("b", wb)]), &metrics);
			let expected = (0.2 * wa + 0.9 * wb) / (wa + wb);
			assert!((result.score.unwrap() - expected).abs() < 1e-9);
		}
	}

	#[test]
	fn test_all_inapplicable_is_inapplicable() {
		let metrics = results(&[("c", None)]);
		let result = evaluate(&MetricConfig::composite("overall", &[]), &components(&[("c", 1.0)]), &metrics);
		assert_eq!(result.score, None);
		assert!(result.passed);
	}
}

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use skill_eval_types::{ExecutionResult, GraderResult, MetricResult};

use crate::error::ConfigError;
use crate::metrics::{behavior, completion, composite, trigger};
use crate::task::Task;

/// A metric as declared in `eval.yaml` or a task file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
	pub name: String,
	#[serde(default = "default_weight")]
	pub weight: f64,
	#[serde(default = "default_threshold")]
	pub threshold: f64,
	/// Fraction of trials that must pass on their own.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_pass_rate: Option<f64>,
	#[serde(flatten)]
	pub kind: MetricKind,
}

fn default_weight() -> f64 {
	1.0
}

fn default_threshold() -> f64 {
	0.6
}

fn default_efficiency_weight() -> f64 {
	1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricKind {
	TaskCompletion {
		/// Graders that must pass. Empty means every grader.
		#[serde(default)]
		primary_graders: Vec<String>,
		#[serde(default)]
		mode: CompletionMode,
	},
	TriggerAccuracy,
	BehaviorQuality {
		/// Grader name to weight. Empty means every grader at its task weight.
		#[serde(default)]
		weights: BTreeMap<String, f64>,
		/// Drop errored graders instead of scoring them 0.0.
		#[serde(default)]
		tolerate_partial: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		max_tool_calls: Option<usize>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		max_duration_ms: Option<u64>,
		#[serde(default = "default_efficiency_weight")]
		efficiency_weight: f64,
	},
	Composite {
		/// Metric name to weight.
		components: BTreeMap<String, f64>,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
	#[default]
	Binary,
	Proportional,
}

impl MetricKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			MetricKind::TaskCompletion { .. } => "task_completion",
			MetricKind::TriggerAccuracy => "trigger_accuracy",
			MetricKind::BehaviorQuality { .. } => "behavior_quality",
			MetricKind::Composite { .. } => "composite",
		}
	}
}

impl MetricConfig {
	pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
		Self {
			name: name.into(),
			weight: default_weight(),
			threshold: default_threshold(),
			min_pass_rate: None,
			kind,
		}
	}

	pub fn task_completion(name: impl Into<String>) -> Self {
		Self::new(
			name,
			MetricKind::TaskCompletion {
				primary_graders: Vec::new(),
				mode: CompletionMode::Binary,
			},
		)
	}

	pub fn trigger_accuracy(name: impl Into<String>) -> Self {
		Self::new(name, MetricKind::TriggerAccuracy)
	}

	pub fn behavior_quality(name: impl Into<String>, weights: &[(&str, f64)]) -> Self {
		Self::new(
			name,
			MetricKind::BehaviorQuality {
				weights: weights.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
				tolerate_partial: false,
				max_tool_calls: None,
				max_duration_ms: None,
				efficiency_weight: default_efficiency_weight(),
			},
		)
	}

	pub fn composite(name: impl Into<String>, components: &[(&str, f64)]) -> Self {
		Self::new(
			name,
			MetricKind::Composite {
				components: components.iter().map(|(n, w)| (n.to_string(), *w)).collect(),
			},
		)
	}

	pub fn with_threshold(mut self, threshold: f64) -> Self {
		self.threshold = threshold;
		self
	}

	pub fn with_weight(mut self, weight: f64) -> Self {
		self.weight = weight;
		self
	}

	pub fn with_min_pass_rate(mut self, rate: f64) -> Self {
		self.min_pass_rate = Some(rate);
		self
	}

	/// Metric names this metric reads.
	pub fn references(&self) -> impl Iterator<Item = &str> {
		let components = match &self.kind {
			MetricKind::Composite { components } => Some(components.keys().map(String::as_str)),
			_ => None,
		};
		components.into_iter().flatten()
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.name.trim().is_empty() {
			return Err(ConfigError::invalid_metric("<unnamed>", "name must not be empty"));
		}
		if !self.weight.is_finite() || self.weight < 0.0 {
			return Err(ConfigError::invalid_metric(&self.name, format!("weight {} must be finite and >= 0", self.weight)));
		}
		if !(0.0..=1.0).contains(&self.threshold) {
			return Err(ConfigError::invalid_metric(&self.name, format!("threshold {} is outside [0, 1]", self.threshold)));
		}
		if let Some(rate) = self.min_pass_rate {
			if !(0.0..=1.0).contains(&rate) {
				return Err(ConfigError::invalid_metric(&self.name, format!("min_pass_rate {} is outside [0, 1]", rate)));
			}
		}
		match &self.kind {
			MetricKind::BehaviorQuality { weights, efficiency_weight, .. } => {
				check_weights(&self.name, weights, true)?;
				if !efficiency_weight.is_finite() || *efficiency_weight < 0.0 {
					return Err(ConfigError::InvalidWeights {
						metric: self.name.clone(),
						reason: format!("efficiency_weight {} must be finite and >= 0", efficiency_weight),
					});
				}
			}
			MetricKind::Composite { components } => check_weights(&self.name, components, false)?,
			MetricKind::TaskCompletion { .. } | MetricKind::TriggerAccuracy => {}
		}
		Ok(())
	}
}

fn check_weights(metric: &str, weights: &BTreeMap<String, f64>, allow_empty: bool) -> Result<(), ConfigError> {
	let invalid = |reason: String| ConfigError::InvalidWeights {
		metric: metric.to_string(),
		reason,
	};
	if weights.is_empty() {
		return if allow_empty { Ok(()) } else { Err(invalid("no components declared".to_string())) };
	}
	for (name, weight) in weights {
		if !weight.is_finite() || *weight < 0.0 {
			return Err(invalid(format!("weight {} for '{}' must be finite and >= 0", weight, name)));
		}
	}
	if weights.values().sum::<f64>() <= 0.0 {
		return Err(invalid("weights must sum to a positive total".to_string()));
	}
	Ok(())
}

/// Everything a metric may read for one trial.
pub struct MetricInput<'a> {
	pub task: &'a Task,
	pub execution: &'a ExecutionResult,
	pub graders: &'a [GraderResult],
	/// Metrics already evaluated for this trial, keyed by name.
	pub metrics: &'a HashMap<String, MetricResult>,
}

/// A validated set of metrics in dependency order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSet {
	configs: Vec<MetricConfig>,
	/// Indices into `configs`, dependencies first.
	order: Vec<usize>,
	roots: HashSet<String>,
}

impl MetricSet {
	pub fn new(configs: Vec<MetricConfig>) -> Result<Self, ConfigError> {
		let mut index = HashMap::with_capacity(configs.len());
		for (i, config) in configs.iter().enumerate() {
			config.validate()?;
			if index.insert(config.name.clone(), i).is_some() {
				return Err(ConfigError::DuplicateMetric(config.name.clone()));
			}
		}
		for config in &configs {
			for reference in config.references() {
				if !index.contains_key(reference) {
					return Err(ConfigError::UnknownMetricReference {
						metric: config.name.clone(),
						reference: reference.to_string(),
					});
				}
			}
		}

		let order = topological_order(&configs, &index)?;
		let referenced: HashSet<&str> = configs.iter().flat_map(|c| c.references()).collect();
		let roots = configs
			.iter()
			.filter(|c| !referenced.contains(c.name.as_str()))
			.map(|c| c.name.clone())
			.collect();

		Ok(Self { configs, order, roots })
	}

	pub fn empty() -> Self {
		Self {
			configs: Vec::new(),
			order: Vec::new(),
			roots: HashSet::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.configs.is_empty()
	}

	/// Configs in declaration order.
	pub fn configs(&self) -> &[MetricConfig] {
		&self.configs
	}

	pub fn get(&self, name: &str) -> Option<&MetricConfig> {
		self.configs.iter().find(|c| c.name == name)
	}

	/// Root metrics are not read by any composite; they decide the task verdict.
	pub fn is_root(&self, name: &str) -> bool {
		self.roots.contains(name)
	}

	/// Score one trial. Results come back in declaration order.
	pub fn evaluate(&self, task: &Task, execution: &ExecutionResult, graders: &[GraderResult]) -> Vec<MetricResult> {
		let mut done: HashMap<String, MetricResult> = HashMap::with_capacity(self.configs.len());
		for &i in &self.order {
			let config = &self.configs[i];
			let input = MetricInput {
				task,
				execution,
				graders,
				metrics: &done,
			};
			let result = evaluate_one(config, &input);
			done.insert(config.name.clone(), result);
		}
		self.configs.iter().filter_map(|c| done.remove(&c.name)).collect()
	}
}

fn evaluate_one(config: &MetricConfig, input: &MetricInput<'_>) -> MetricResult {
	match &config.kind {
		MetricKind::TaskCompletion { primary_graders, mode } => completion::evaluate(config, primary_graders, *mode, input),
		MetricKind::TriggerAccuracy => trigger::evaluate(config, input),
		MetricKind::BehaviorQuality {
			weights,
			tolerate_partial,
			max_tool_calls,
			max_duration_ms,
			efficiency_weight,
		} => behavior::evaluate(
			config,
			&behavior::Params {
				weights,
				tolerate_partial: *tolerate_partial,
				max_tool_calls: *max_tool_calls,
				max_duration_ms: *max_duration_ms,
				efficiency_weight: *efficiency_weight,
			},
			input,
		),
		MetricKind::Composite { components } => composite::evaluate(config, components, input.metrics),
	}
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
	Unvisited,
	InProgress,
	Done,
}

fn topological_order(configs: &[MetricConfig], index: &HashMap<String, usize>) -> Result<Vec<usize>, ConfigError> {
	fn visit(
		i: usize,
		configs: &[MetricConfig],
		index: &HashMap<String, usize>,
		marks: &mut [Mark],
		path: &mut Vec<usize>,
		order: &mut Vec<usize>,
	) -> Result<(), ConfigError> {
		match marks[i] {
			Mark::Done => return Ok(()),
			Mark::InProgress => {
				let start = path.iter().position(|&p| p == i).unwrap_or(0);
				let mut cycle: Vec<String> = path[start..].iter().map(|&p| configs[p].name.clone()).collect();
				cycle.push(configs[i].name.clone());
				return Err(ConfigError::CyclicMetric { cycle });
			}
			Mark::Unvisited => {}
		}
		marks[i] = Mark::InProgress;
		path.push(i);
		for reference in configs[i].references() {
			if let Some(&dep) = index.get(reference) {
				visit(dep, configs, index, marks, path, order)?;
			}
		}
		path.pop();
		marks[i] = Mark::Done;
		order.push(i);
		Ok(())
	}

	let mut marks = vec![Mark::Unvisited; configs.len()];
	let mut order = Vec::with_capacity(configs.len());
	let mut path = Vec::new();
	for i in 0..configs.len() {
		visit(i, configs, index, &mut marks, &mut path, &mut order)?;
	}
	Ok(order)
}

#[cfg(test)]
mod tests {
	use super::*;
	use skill_eval_types::ExecutionResult;

	#[test]
	fn test_yaml_configs() {
		let yaml = r#"
- name: completion
  type: task_completion
  primary_graders: [checks]
  mode: proportional
- name: triggers
  type: trigger_accuracy
- name: quality
  type: behavior_quality
  weights: { checks: 2, judge: 1 }
  tolerate_partial: true
  max_tool_calls: 5
- name: overall
  type: composite
  threshold: 0.7
  components: { completion: 1, quality: 2 }
"#;
		let configs: Vec<MetricConfig> = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(configs[1].kind, MetricKind::TriggerAccuracy);
		assert_eq!(configs[3].threshold, 0.7);
		assert_eq!(configs[0].threshold, 0.6);
		let set = MetricSet::new(configs).unwrap();
		assert!(set.is_root("overall"));
		assert!(set.is_root("triggers"));
		assert!(!set.is_root("completion"));
	}

	#[test]
	fn test_unknown_metric_type_is_rejected() {
		let yaml = "- name: vibes\n  type: vibe_check\n";
		assert!(serde_yaml::from_str::<Vec<MetricConfig>>(yaml).is_err());
	}

	#[test]
	fn test_cycle_is_rejected_before_scoring() {
		let err = MetricSet::new(vec![
			MetricConfig::composite("a", &[("b", 1.0)]),
			MetricConfig::composite("b", &[("a", 1.0)]),
		])
		.unwrap_err();
		match err {
			ConfigError::CyclicMetric { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
			other => panic!("unexpected error: {other}"),
		}

		let err = MetricSet::new(vec![MetricConfig::composite("self", &[("self", 1.0)])]).unwrap_err();
		assert!(matches!(err, ConfigError::CyclicMetric { .. }));
	}

	#[test]
	fn test_reference_and_weight_errors() {
		let err = MetricSet::new(vec![MetricConfig::composite("c", &[("ghost", 1.0)])]).unwrap_err();
		assert!(matches!(err, ConfigError::UnknownMetricReference { .. }));

		let err = MetricSet::new(vec![
			MetricConfig::task_completion("done"),
			MetricConfig::composite("c", &[("done", 0.0)]),
		])
		.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidWeights { .. }));

		let err = MetricSet::new(vec![MetricConfig::behavior_quality("q", &[("g", -1.0)])]).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidWeights { .. }));

		let err = MetricSet::new(vec![MetricConfig::task_completion("x"), MetricConfig::trigger_accuracy("x")]).unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateMetric(_)));
	}

	#[test]
	fn test_composites_see_their_dependencies() {
		// Declared before its inputs; evaluation still runs inputs first.
		let set = MetricSet::new(vec![
			MetricConfig::composite("overall", &[("inner", 1.0)]),
			MetricConfig::composite("inner", &[("done", 1.0)]),
			MetricConfig::task_completion("done"),
		])
		.unwrap();
		let task = Task::new("t", "p");
		let results = set.evaluate(&task, &ExecutionResult::completed("ok"), &[]);
		let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
		assert_eq!(names, vec!["overall", "inner", "done"]);
		assert_eq!(results[0].score, Some(1.0));
	}
}

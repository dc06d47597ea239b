use thiserror::Error;

/// Problems in an eval definition. All of them are raised while building the
/// eval, before any trial executes.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("unknown grader kind '{kind}' (registered: {registered})")]
	UnknownGraderKind { kind: String, registered: String },

	#[error("grader '{grader}': {reason}")]
	InvalidGrader { grader: String, reason: String },

	#[error("grader '{grader}': invalid regex {pattern:?}: {source}")]
	InvalidRegex {
		grader: String,
		pattern: String,
		#[source]
		source: regex::Error,
	},

	#[error("duplicate grader name '{0}'")]
	DuplicateGrader(String),

	#[error("metric '{metric}': {reason}")]
	InvalidMetric { metric: String, reason: String },

	#[error("metric '{metric}': invalid weights: {reason}")]
	InvalidWeights { metric: String, reason: String },

	#[error("duplicate metric name '{0}'")]
	DuplicateMetric(String),

	#[error("metric '{metric}' references unknown metric '{reference}'")]
	UnknownMetricReference { metric: String, reference: String },

	#[error("cyclic composite metric reference: {}", cycle.join(" -> "))]
	CyclicMetric { cycle: Vec<String> },

	#[error("executor: {0}")]
	InvalidExecutor(String),

	#[error("task '{task}': {source}")]
	InTask {
		task: String,
		#[source]
		source: Box<ConfigError>,
	},
}

impl ConfigError {
	pub fn in_task(self, task: impl Into<String>) -> Self {
		ConfigError::InTask {
			task: task.into(),
			source: Box::new(self),
		}
	}

	pub fn invalid_grader(grader: impl Into<String>, reason: impl std::fmt::Display) -> Self {
		ConfigError::InvalidGrader {
			grader: grader.into(),
			reason: reason.to_string(),
		}
	}

	pub fn invalid_metric(metric: impl Into<String>, reason: impl std::fmt::Display) -> Self {
		ConfigError::InvalidMetric {
			metric: metric.into(),
			reason: reason.to_string(),
		}
	}
}

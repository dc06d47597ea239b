use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skill_eval_types::{meets_threshold, GraderResult};

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::expr::{self, AssertionOutcome};
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::task::Task;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptParams {
	#[serde(default)]
	assertions: Vec<String>,
	#[serde(default = "default_threshold")]
	threshold: f64,
}

fn default_threshold() -> f64 {
	1.0
}

/// Boolean assertions evaluated by the sandboxed expression language.
pub struct ScriptGrader {
	name: String,
	assertions: Vec<String>,
	threshold: f64,
}

impl ScriptGrader {
	pub fn new(name: impl Into<String>, assertions: Vec<String>) -> Self {
		Self {
			name: name.into(),
			assertions,
			threshold: default_threshold(),
		}
	}

	pub fn from_config(config: &GraderConfig) -> Result<Self, ConfigError> {
		let params: ScriptParams = config.params()?;
		config.check_threshold(params.threshold)?;
		for assertion in &params.assertions {
			// Still graded (as an error) at run time; surfaced early for authors.
			if let Err(err) = expr::check_syntax(assertion) {
				tracing::warn!(grader = %config.name, assertion = %assertion, error = %err, "assertion does not parse");
			}
		}
		Ok(Self {
			name: config.name.clone(),
			assertions: params.assertions,
			threshold: params.threshold,
		})
	}
}

#[async_trait]
impl Grader for ScriptGrader {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> GraderKind {
		GraderKind::Script
	}

	async fn grade(&self, ctx: &GraderContext, _task: &Task) -> Result<GraderResult> {
		let kind = GraderKind::Script.as_str();
		if self.assertions.is_empty() {
			return Ok(GraderResult::new(&self.name, kind, 1.0, true, "no assertions configured"));
		}

		let outcomes = expr::evaluate_all(&self.assertions, ctx);

		let mut passed = 0usize;
		let mut failures = Vec::new();
		let mut errors = Vec::new();
		for (assertion, outcome) in self.assertions.iter().zip(&outcomes) {
			match outcome {
				AssertionOutcome::Pass => passed += 1,
				AssertionOutcome::Fail => failures.push(format!("Failed: {}", assertion)),
				AssertionOutcome::Error(err) => {
					let text = outcome.to_wire();
					failures.push(format!("Failed: {}: {}", assertion, text));
					errors.push(json!({
						"assertion": assertion,
						"kind": err.kind(),
						"error": text,
					}));
				}
			}
		}

		let score = passed as f64 / self.assertions.len() as f64;
		let message = if failures.is_empty() {
			"All assertions passed".to_string()
		} else {
			failures.join("; ")
		};
		let results: Vec<String> = outcomes.iter().map(AssertionOutcome::to_wire).collect();

		Ok(
			GraderResult::new(&self.name, kind, score, meets_threshold(score, self.threshold), message).with_details(json!({
				"total_assertions": self.assertions.len(),
				"passed_assertions": passed,
				"failures": failures,
				"errors": errors,
				"results": results,
			})),
		)
	}
}

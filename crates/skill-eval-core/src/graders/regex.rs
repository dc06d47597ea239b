use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use skill_eval_types::{meets_threshold, GraderResult};

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::task::Task;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegexParams {
	#[serde(default)]
	checks: Vec<CheckParams>,
	#[serde(default)]
	must_match: Vec<String>,
	#[serde(default)]
	must_not_match: Vec<String>,
	#[serde(default = "default_threshold")]
	threshold: f64,
}

fn default_threshold() -> f64 {
	0.6
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckParams {
	#[serde(default)]
	name: Option<String>,
	#[serde(default = "default_check_weight")]
	weight: f64,
	#[serde(default)]
	pattern: Option<String>,
	#[serde(default)]
	negate: bool,
	#[serde(default)]
	patterns: Vec<String>,
	#[serde(default)]
	min_matches: Option<usize>,
	#[serde(default)]
	max_matches: Option<usize>,
	#[serde(default)]
	min_length: Option<usize>,
	#[serde(default)]
	max_length: Option<usize>,
}

fn default_check_weight() -> f64 {
	1.0
}

#[derive(Debug)]
enum Rule {
	Pattern { regex: Regex, negate: bool },
	Group { regexes: Vec<Regex>, min: usize, max: Option<usize> },
	Length { min: Option<usize>, max: Option<usize> },
}

#[derive(Debug)]
struct Check {
	name: String,
	weight: f64,
	rule: Rule,
}

/// Named regex and length checks against the output text.
pub struct RegexGrader {
	name: String,
	checks: Vec<Check>,
	threshold: f64,
}

fn compile(grader: &str, pattern: &str) -> Result<Regex, ConfigError> {
	Regex::new(pattern).map_err(|source| ConfigError::InvalidRegex {
		grader: grader.to_string(),
		pattern: pattern.to_string(),
		source,
	})
}

impl RegexGrader {
	pub fn from_config(config: &GraderConfig) -> Result<Self, ConfigError> {
		let params: RegexParams = config.params()?;
		config.check_threshold(params.threshold)?;
		let name = config.name.clone();
		let mut checks = Vec::new();

		for pattern in &params.must_match {
			checks.push(Check {
				name: format!("must_match {}", pattern),
				weight: 1.0,
				rule: Rule::Pattern { regex: compile(&name, pattern)?, negate: false },
			});
		}
		for pattern in &params.must_not_match {
			checks.push(Check {
				name: format!("must_not_match {}", pattern),
				weight: 1.0,
				rule: Rule::Pattern { regex: compile(&name, pattern)?, negate: true },
			});
		}

		for (i, check) in params.checks.into_iter().enumerate() {
			let check_name = check.name.clone().unwrap_or_else(|| format!("check_{}", i + 1));
			if !check.weight.is_finite() || check.weight < 0.0 {
				return Err(ConfigError::invalid_grader(
					&name,
					format!("check '{}' has invalid weight {}", check_name, check.weight),
				));
			}
			let has_pattern = check.pattern.is_some();
			let has_group = !check.patterns.is_empty();
			let has_length = check.min_length.is_some() || check.max_length.is_some();
			let rule = match (has_pattern, has_group, has_length) {
				(true, false, false) => Rule::Pattern {
					regex: compile(&name, check.pattern.as_deref().unwrap_or_default())?,
					negate: check.negate,
				},
				(false, true, false) => {
					let regexes = check
						.patterns
						.iter()
						.map(|p| compile(&name, p))
						.collect::<Result<Vec<_>, _>>()?;
					let min = check.min_matches.unwrap_or(if check.max_matches.is_some() { 0 } else { 1 });
					if min > regexes.len() {
						return Err(ConfigError::invalid_grader(
							&name,
							format!(
								"check '{}' requires {} matches but only has {} patterns",
								check_name,
								min,
								regexes.len()
							),
						));
					}
					Rule::Group { regexes, min, max: check.max_matches }
				}
				(false, false, true) => Rule::Length { min: check.min_length, max: check.max_length },
				_ => {
					return Err(ConfigError::invalid_grader(
						&name,
						format!(
							"check '{}' must set exactly one of pattern, patterns or min_length/max_length",
							check_name
						),
					))
				}
			};
			checks.push(Check { name: check_name, weight: check.weight, rule });
		}

		if !checks.is_empty() && checks.iter().map(|c| c.weight).sum::<f64>() <= 0.0 {
			return Err(ConfigError::invalid_grader(&name, "check weights must sum to a positive total"));
		}

		Ok(Self {
			name,
			checks,
			threshold: params.threshold,
		})
	}
}

impl Check {
	fn evaluate(&self, output: &str) -> (bool, String) {
		match &self.rule {
			Rule::Pattern { regex, negate: false } => {
				if regex.is_match(output) {
					(true, format!("✓ {}", self.name))
				} else {
					(false, format!("✗ {}: missing expected pattern: {}", self.name, regex.as_str()))
				}
			}
			Rule::Pattern { regex, negate: true } => {
				if regex.is_match(output) {
					(false, format!("✗ {}: found forbidden pattern: {}", self.name, regex.as_str()))
				} else {
					(true, format!("✓ {}", self.name))
				}
			}
			Rule::Group { regexes, min, max } => {
				let found = regexes.iter().filter(|r| r.is_match(output)).count();
				let ok = found >= *min && max.map_or(true, |max| found <= max);
				let bound = match max {
					Some(max) => format!("{}..={}", min, max),
					None => format!(">= {}", min),
				};
				let mark = if ok { "✓" } else { "✗" };
				(ok, format!("{} {}: {} of {} patterns matched (want {})", mark, self.name, found, regexes.len(), bound))
			}
			Rule::Length { min, max } => {
				let len = output.chars().count();
				let ok = min.map_or(true, |m| len >= m) && max.map_or(true, |m| len <= m);
				let mark = if ok { "✓" } else { "✗" };
				(ok, format!("{} {}: {} chars", mark, self.name, len))
			}
		}
	}
}

#[async_trait]
impl Grader for RegexGrader {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> GraderKind {
		GraderKind::Regex
	}

	async fn grade(&self, ctx: &GraderContext, _task: &Task) -> Result<GraderResult> {
		if self.checks.is_empty() {
			return Ok(GraderResult::new(&self.name, GraderKind::Regex.as_str(), 1.0, true, "no checks configured"));
		}

		let mut total = 0.0;
		let mut satisfied = 0.0;
		let mut lines = Vec::with_capacity(self.checks.len());
		let mut failures = Vec::new();
		for check in &self.checks {
			let (ok, line) = check.evaluate(&ctx.output);
			total += check.weight;
			if ok {
				satisfied += check.weight;
			} else {
				failures.push(check.name.clone());
			}
			lines.push(line);
		}

		let score = satisfied / total;
		let passed = meets_threshold(score, self.threshold);
		let message = if failures.is_empty() {
			"all checks passed".to_string()
		} else {
			format!("failed checks: {}", failures.join(", "))
		};

		Ok(GraderResult::new(&self.name, GraderKind::Regex.as_str(), score, passed, message).with_details(json!({
			"checks": lines,
			"failures": failures,
			"output_length": ctx.output.chars().count(),
			"threshold": self.threshold,
		})))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use skill_eval_types::ExecutionResult;

	const EXPLANATION: &str = "This function returns the sum. For example, add(1,2) returns 3. \
		Overview: it validates inputs, then adds them.";

	async fn grade_output(config: serde_json::Value, output: &str) -> GraderResult {
		let grader = RegexGrader::from_config(&GraderConfig::new("regex", "quality", config)).unwrap();
		let task = Task::new("explain", "explain add");
		let ctx = GraderContext::new(&task, &ExecutionResult::completed(output));
		grader.grade(&ctx, &task).await.unwrap()
	}

	#[tokio::test]
	async fn test_explanation_quality_checks() {
		let grader = RegexGrader::from_config(&GraderConfig::new(
			"regex",
			"explanation_quality",
			json!({
				"checks": [
					{ "name": "length", "min_length": 20 },
					{ "name": "sections", "patterns": ["(?i)overview|summary", "(?i)\\bthen\\b|finally", "(?i)key concept"], "min_matches": 2 },
					{ "name": "educational", "patterns": ["(?i)returns", "(?i)for example"], "min_matches": 2 },
					{ "name": "no_errors", "patterns": ["(?i)i don'?t know", "(?i)error occurred"], "max_matches": 0 }
				]
			}),
		))
		.unwrap();
		let task = Task::new("explain", "explain add");
		let ctx = GraderContext::new(&task, &ExecutionResult::completed(EXPLANATION));
		let result = grader.grade(&ctx, &task).await.unwrap();

		assert_eq!(result.score, 1.0);
		assert!(result.passed);
		assert_eq!(result.details["checks"][1], "✓ sections: 2 of 3 patterns matched (want >= 2)");

		let again = grader.grade(&ctx, &task).await.unwrap();
		assert_eq!(result, again);
	}

	#[tokio::test]
	async fn test_weighted_fraction_and_threshold() {
		let config = json!({
			"checks": [
				{ "name": "long", "min_length": 500, "weight": 3.0 },
				{ "name": "mentions_sum", "pattern": "sum" },
			]
		});
		let result = grade_output(config, EXPLANATION).await;
		assert!((result.score - 0.25).abs() < 1e-9);
		assert!(!result.passed);
		assert_eq!(result.details["failures"], json!(["long"]));
	}

	#[tokio::test]
	async fn test_must_match_shorthands() {
		let config = json!({ "must_match": ["returns"], "must_not_match": ["(?i)error"], "threshold": 1.0 });
		assert!(grade_output(config.clone(), EXPLANATION).await.passed);
		let result = grade_output(config, "An error occurred").await;
		assert_eq!(result.score, 0.0);
		assert!(result.details["checks"][1].as_str().unwrap().contains("found forbidden pattern"));
	}

	#[tokio::test]
	async fn test_negated_pattern() {
		let config = json!({ "checks": [{ "pattern": "TODO", "negate": true }] });
		assert!(grade_output(config.clone(), "all done").await.passed);
		assert!(!grade_output(config, "TODO: explain").await.passed);
	}

	#[test]
	fn test_invalid_regex_is_config_error() {
		let cfg = GraderConfig::new("regex", "bad", json!({ "must_match": ["(unclosed"] }));
		let err = RegexGrader::from_config(&cfg).err().unwrap();
		assert!(matches!(err, ConfigError::InvalidRegex { .. }));
	}

	#[test]
	fn test_ambiguous_check_is_rejected() {
		let cfg = GraderConfig::new("regex", "bad", json!({ "checks": [{ "pattern": "a", "min_length": 3 }] }));
		assert!(RegexGrader::from_config(&cfg).is_err());
		let cfg = GraderConfig::new("regex", "bad", json!({ "checks": [{ "patterns": ["a"], "min_matches": 2 }] }));
		assert!(RegexGrader::from_config(&cfg).is_err());
	}

	#[test]
	fn test_threshold_outside_unit_range_is_rejected() {
		let cfg = GraderConfig::new("regex", "bad", json!({ "must_match": ["a"], "threshold": 1.5 }));
		let err = RegexGrader::from_config(&cfg).err().unwrap();
		assert!(err.to_string().contains("threshold 1.5 is outside [0, 1]"), "{err}");
	}
}

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::graders::human::{HumanCalibrationGrader, HumanReviewer};
use crate::graders::llm::LlmComparisonGrader;
use crate::graders::regex::RegexGrader;
use crate::graders::script::ScriptGrader;
use crate::graders::tool_calls::ToolCallGrader;
use crate::judge::Judge;
use crate::task::Task;

pub type GraderConstructor = Arc<dyn Fn(&GraderConfig) -> Result<Arc<dyn Grader>, ConfigError> + Send + Sync>;

/// External collaborators the built-in graders may need.
#[derive(Clone, Default)]
pub struct GraderDeps {
	pub judge: Option<Arc<dyn Judge>>,
	pub reviewer: Option<Arc<dyn HumanReviewer>>,
}

/// Maps grader kinds to constructors. Built once before a run and shared
/// read-only afterwards.
#[derive(Clone, Default)]
pub struct GraderRegistry {
	constructors: BTreeMap<String, GraderConstructor>,
}

impl GraderRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry with every built-in grader kind.
	pub fn with_builtins(deps: GraderDeps) -> Self {
		let mut registry = Self::new();
		for kind in GraderKind::ALL {
			let deps = deps.clone();
			let constructor: GraderConstructor = match kind {
				GraderKind::Regex => Arc::new(|cfg: &GraderConfig| Ok(Arc::new(RegexGrader::from_config(cfg)?) as Arc<dyn Grader>)),
				GraderKind::Script => Arc::new(|cfg: &GraderConfig| Ok(Arc::new(ScriptGrader::from_config(cfg)?) as Arc<dyn Grader>)),
				GraderKind::ToolCalls => {
					Arc::new(|cfg: &GraderConfig| Ok(Arc::new(ToolCallGrader::from_config(cfg)?) as Arc<dyn Grader>))
				}
				GraderKind::LlmComparison => Arc::new(move |cfg: &GraderConfig| {
					Ok(Arc::new(LlmComparisonGrader::from_config(cfg, deps.judge.clone())?) as Arc<dyn Grader>)
				}),
				GraderKind::HumanCalibration => Arc::new(move |cfg: &GraderConfig| {
					Ok(Arc::new(HumanCalibrationGrader::from_config(cfg, deps.reviewer.clone())?) as Arc<dyn Grader>)
				}),
			};
			registry.constructors.insert(kind.as_str().to_string(), constructor);
		}
		registry
	}

	/// Add or replace the constructor for `kind`.
	pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
	where
		F: Fn(&GraderConfig) -> Result<Arc<dyn Grader>, ConfigError> + Send + Sync + 'static,
	{
		self.constructors.insert(kind.into(), Arc::new(constructor));
		self
	}

	pub fn kinds(&self) -> impl Iterator<Item = &str> {
		self.constructors.keys().map(String::as_str)
	}

	pub fn build(&self, config: &GraderConfig) -> Result<Arc<dyn Grader>, ConfigError> {
		let constructor = self.constructors.get(&config.kind).ok_or_else(|| ConfigError::UnknownGraderKind {
			kind: config.kind.clone(),
			registered: self.kinds().collect::<Vec<_>>().join(", "),
		})?;
		if !config.weight.is_finite() || config.weight < 0.0 {
			return Err(ConfigError::invalid_grader(
				&config.name,
				format!("weight {} must be a finite non-negative number", config.weight),
			));
		}
		constructor(config)
	}

	/// Build every grader a task declares. Errors name the task.
	pub fn build_all(&self, task: &Task) -> Result<Vec<Arc<dyn Grader>>, ConfigError> {
		let mut seen = HashSet::new();
		let mut graders = Vec::with_capacity(task.graders.len());
		for config in &task.graders {
			if !seen.insert(config.name.as_str()) {
				return Err(ConfigError::DuplicateGrader(config.name.clone()).in_task(&task.id));
			}
			let grader = self.build(config).map_err(|e| e.in_task(&task.id))?;
			tracing::debug!(task = %task.id, grader = %config.name, kind = %config.kind, "built grader");
			graders.push(grader);
		}
		Ok(graders)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_unknown_kind_names_task_and_kind() {
		let registry = GraderRegistry::with_builtins(GraderDeps::default());
		let task = Task::new("explain-fib", "p").with_grader(GraderConfig::new("telepathy", "mind", json!({})));
		let err = registry.build_all(&task).err().unwrap();
		let text = err.to_string();
		assert!(text.starts_with("task 'explain-fib': unknown grader kind 'telepathy'"));
		assert!(text.contains("human_calibration, llm_comparison, regex, script, tool_calls"));
	}

	#[test]
	fn test_builds_builtin_kinds() {
		let registry = GraderRegistry::with_builtins(GraderDeps::default());
		let task = Task::new("t", "p")
			.with_grader(GraderConfig::new("regex", "r", json!({ "must_match": ["x"] })))
			.with_grader(GraderConfig::new("script", "s", json!({ "assertions": ["True"] })))
			.with_grader(GraderConfig::new("tool_calls", "tc", json!({ "expected": ["bash"] })));
		let graders = registry.build_all(&task).unwrap();
		let kinds: Vec<_> = graders.iter().map(|g| g.kind()).collect();
		assert_eq!(kinds, vec![GraderKind::Regex, GraderKind::Script, GraderKind::ToolCalls]);
	}

	#[test]
	fn test_llm_grader_without_judge_fails_at_build() {
		let registry = GraderRegistry::with_builtins(GraderDeps::default());
		let cfg = GraderConfig::new("llm_comparison", "judge", json!({ "rubric": "clear" }));
		assert!(matches!(registry.build(&cfg), Err(ConfigError::InvalidGrader { .. })));
	}

	#[test]
	fn test_duplicate_grader_names_are_rejected() {
		let registry = GraderRegistry::with_builtins(GraderDeps::default());
		let task = Task::new("t", "p")
			.with_grader(GraderConfig::new("script", "same", json!({})))
			.with_grader(GraderConfig::new("script", "same", json!({})));
		assert!(registry.build_all(&task).is_err());
	}

	#[test]
	fn test_custom_kind_can_be_registered() {
		let mut registry = GraderRegistry::new();
		registry.register("always", |cfg: &GraderConfig| {
			Ok(Arc::new(ScriptGrader::new(cfg.name.clone(), vec!["True".into()])) as Arc<dyn Grader>)
		});
		let grader = registry.build(&GraderConfig::new("always", "ok", json!(null))).unwrap();
		assert_eq!(grader.name(), "ok");
	}
}

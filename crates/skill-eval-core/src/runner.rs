use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use skill_eval_types::{EvalSummary, ExecutionResult, ExecutionSummary, TaskAggregate, TrialResult};
use tracing::Instrument;

use crate::aggregate::{aggregate_task, summarize, AggregationPolicy};
use crate::context::GraderContext;
use crate::executor::Executor;
use crate::grader::{run_grader, Grader, GraderConfig};
use crate::graders::human::HumanReviewer;
use crate::judge::Judge;
use crate::metric::{MetricConfig, MetricKind, MetricSet};
use crate::registry::{GraderDeps, GraderRegistry};
use crate::task::Task;

pub struct EvalBuilder {
	name: String,
	skill: String,
	executor: Option<Arc<dyn Executor>>,
	tasks: Vec<Task>,
	graders: Vec<GraderConfig>,
	metrics: Vec<MetricConfig>,
	registry: Option<GraderRegistry>,
	deps: GraderDeps,
	aggregation: AggregationPolicy,
	trials: usize,
	concurrency: usize,
	execution_timeout: Duration,
	grader_timeout: Duration,
}

impl EvalBuilder {
	pub fn new(name: impl Into<String>, skill: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			skill: skill.into(),
			executor: None,
			tasks: Vec::new(),
			graders: Vec::new(),
			metrics: Vec::new(),
			registry: None,
			deps: GraderDeps::default(),
			aggregation: AggregationPolicy::default(),
			trials: 1,
			concurrency: 4,
			execution_timeout: Duration::from_secs(300),
			grader_timeout: Duration::from_secs(120),
		}
	}

	pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
		self.executor = Some(executor);
		self
	}

	pub fn tasks<I>(mut self, tasks: I) -> Self
	where
		I: IntoIterator<Item = Task>,
	{
		self.tasks = tasks.into_iter().collect();
		self
	}

	pub fn add_task(mut self, task: Task) -> Self {
		self.tasks.push(task);
		self
	}

	/// Graders appended to every task.
	pub fn graders<I>(mut self, graders: I) -> Self
	where
		I: IntoIterator<Item = GraderConfig>,
	{
		self.graders = graders.into_iter().collect();
		self
	}

	/// Metrics evaluated for every task, ahead of task-specific ones.
	pub fn metrics<I>(mut self, metrics: I) -> Self
	where
		I: IntoIterator<Item = MetricConfig>,
	{
		self.metrics = metrics.into_iter().collect();
		self
	}

	pub fn add_metric(mut self, metric: MetricConfig) -> Self {
		self.metrics.push(metric);
		self
	}

	/// Replace the built-in grader registry.
	pub fn registry(mut self, registry: GraderRegistry) -> Self {
		self.registry = Some(registry);
		self
	}

	pub fn judge(mut self, judge: Arc<dyn Judge>) -> Self {
		self.deps.judge = Some(judge);
		self
	}

	pub fn reviewer(mut self, reviewer: Arc<dyn HumanReviewer>) -> Self {
		self.deps.reviewer = Some(reviewer);
		self
	}

	pub fn aggregation(mut self, policy: AggregationPolicy) -> Self {
		self.aggregation = policy;
		self
	}

	pub fn trials(mut self, n: usize) -> Self {
		self.trials = n.max(1);
		self
	}

	pub fn concurrency(mut self, n: usize) -> Self {
		self.concurrency = n.max(1);
		self
	}

	pub fn execution_timeout(mut self, timeout: Duration) -> Self {
		self.execution_timeout = timeout;
		self
	}

	pub fn grader_timeout(mut self, timeout: Duration) -> Self {
		self.grader_timeout = timeout;
		self
	}

	/// Build every grader and validate every metric set. Nothing executes
	/// until this has succeeded.
	pub fn build(self) -> Result<Eval> {
		let executor = self.executor.ok_or_else(|| anyhow::anyhow!("executor must be set"))?;
		if self.tasks.is_empty() {
			anyhow::bail!("eval '{}' has no tasks", self.name);
		}
		if self.trials == 0 || self.concurrency == 0 {
			anyhow::bail!("trials and concurrency must be at least 1");
		}
		if let Some(threshold) = self.aggregation.partial_pass_threshold {
			if !(0.0..=1.0).contains(&threshold) {
				anyhow::bail!("partial_pass_threshold {} is outside [0, 1]", threshold);
			}
		}
		let registry = Arc::new(self.registry.unwrap_or_else(|| GraderRegistry::with_builtins(self.deps)));

		let mut tasks = Vec::with_capacity(self.tasks.len());
		for mut task in self.tasks {
			task.graders.extend(self.graders.iter().cloned());
			check_primary_graders(&task)?;
			let metrics = MetricSet::new(self.metrics.iter().cloned().chain(task.metrics.iter().cloned()).collect())
				.map_err(|e| e.in_task(&task.id))?;
			let graders = registry.build_all(&task)?;
			tracing::debug!(task = %task.id, graders = graders.len(), metrics = metrics.configs().len(), "prepared task");
			tasks.push(PreparedTask { task, graders, metrics });
		}

		Ok(Eval {
			name: self.name,
			skill: self.skill,
			executor,
			tasks,
			aggregation: self.aggregation,
			trials: self.trials,
			concurrency: self.concurrency,
			execution_timeout: self.execution_timeout,
			grader_timeout: self.grader_timeout,
		})
	}
}

/// Task-local completion metrics must name graders the task actually has.
fn check_primary_graders(task: &Task) -> Result<()> {
	for metric in &task.metrics {
		if let MetricKind::TaskCompletion { primary_graders, .. } = &metric.kind {
			if let Some(unknown) = primary_graders.iter().find(|p| !task.graders.iter().any(|g| &g.name == *p)) {
				anyhow::bail!(
					"task '{}': metric '{}' names unknown primary grader '{}'",
					task.id,
					metric.name,
					unknown
				);
			}
		}
	}
	Ok(())
}

struct PreparedTask {
	task: Task,
	graders: Vec<Arc<dyn Grader>>,
	metrics: MetricSet,
}

pub struct Eval {
	name: String,
	skill: String,
	executor: Arc<dyn Executor>,
	tasks: Vec<PreparedTask>,
	aggregation: AggregationPolicy,
	trials: usize,
	concurrency: usize,
	execution_timeout: Duration,
	grader_timeout: Duration,
}

impl Eval {
	pub fn builder(name: impl Into<String>, skill: impl Into<String>) -> EvalBuilder {
		EvalBuilder::new(name, skill)
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn task_ids(&self) -> Vec<&str> {
		self.tasks.iter().map(|t| t.task.id.as_str()).collect()
	}

	pub fn grader_count(&self) -> usize {
		self.tasks.iter().map(|t| t.graders.len()).sum()
	}

	pub fn trials(&self) -> usize {
		self.trials
	}

	/// Run every task in order; trials of one task run concurrently.
	pub async fn run(&self) -> Result<EvalSummary> {
		let started_at = Utc::now();
		tracing::info!(eval = %self.name, skill = %self.skill, tasks = self.tasks.len(), trials = self.trials, "starting eval");
		self.executor.setup().await.context("executor setup failed")?;

		let mut aggregates = Vec::with_capacity(self.tasks.len());
		for prepared in &self.tasks {
			let span = tracing::info_span!("task", task = %prepared.task.id);
			aggregates.push(self.run_task(prepared).instrument(span).await);
		}

		if let Err(err) = self.executor.teardown().await {
			tracing::warn!(error = %format!("{err:#}"), "executor teardown failed");
		}
		let summary = summarize(&self.name, &self.skill, started_at, aggregates, &self.aggregation);
		tracing::info!(
			passed = summary.passed,
			overall_score = summary.overall_score,
			passed_tasks = summary.passed_tasks,
			total_tasks = summary.total_tasks,
			"eval finished"
		);
		Ok(summary)
	}

	async fn run_task(&self, prepared: &PreparedTask) -> TaskAggregate {
		let trials: Vec<TrialResult> = stream::iter(0..self.trials)
			.map(|index| self.run_trial(prepared, index))
			.buffer_unordered(self.concurrency)
			.collect()
			.await;
		let aggregate = aggregate_task(&prepared.task, &prepared.metrics, trials);
		tracing::info!(passed = aggregate.passed, score = ?aggregate.score, flaky = aggregate.flaky, "task finished");
		aggregate
	}

	async fn run_trial(&self, prepared: &PreparedTask, index: usize) -> TrialResult {
		let task = &prepared.task;
		let execution = self.execute(task).instrument(tracing::debug_span!("trial", trial = index)).await;

		// Every grader sees the same context; metrics wait for all of them.
		let ctx = GraderContext::new(task, &execution);
		let graders = join_all(
			prepared
				.graders
				.iter()
				.map(|grader| run_grader(grader.clone(), &ctx, task, self.grader_timeout)),
		)
		.await;
		let metrics = prepared.metrics.evaluate(task, &execution, &graders);

		TrialResult {
			trial: index,
			execution: ExecutionSummary::from(&execution),
			graders,
			metrics,
			passed: false,
		}
	}

	async fn execute(&self, task: &Task) -> ExecutionResult {
		let start = Instant::now();
		let call = self.executor.execute(&task.prompt, &task.context, &self.skill);
		match tokio::time::timeout(self.execution_timeout, call).await {
			Ok(Ok(result)) => result,
			Ok(Err(err)) => {
				tracing::warn!(error = %format!("{err:#}"), "execution failed");
				ExecutionResult::failed(format!("{err:#}"), start.elapsed().as_millis() as u64)
			}
			Err(_) => {
				tracing::warn!(timeout_secs = self.execution_timeout.as_secs_f64(), "execution timed out");
				ExecutionResult::failed(
					format!("execution timed out after {}s", self.execution_timeout.as_secs_f64()),
					start.elapsed().as_millis() as u64,
				)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::executor::{from_async_fn, ExecutionRequest, MockExecutor};
	use crate::metric::CompletionMode;
	use crate::judge::{JudgeError, JudgeRequest, JudgeVerdict};
	use async_trait::async_trait;
	use serde_json::json;
	use skill_eval_types::ToolCall;

	const EXPLANATION: &str = "This function returns the sum. For example, add(1,2) returns 3. \
		Overview: it validates inputs, then adds them.";

	struct SlowJudge;

	#[async_trait]
	impl Judge for SlowJudge {
		async fn judge(&self, _request: &JudgeRequest) -> std::result::Result<JudgeVerdict, JudgeError> {
			tokio::time::sleep(Duration::from_secs(30)).await;
			Ok(JudgeVerdict { score: 1.0, passed: Some(true), rationale: String::new() })
		}
	}

	fn explain_task() -> Task {
		Task::new("explain-add", "Explain add()")
			.with_grader(GraderConfig::new(
				"regex",
				"structure",
				json!({ "checks": [
					{ "name": "length", "min_length": 20 },
					{ "name": "sections", "patterns": ["(?i)overview", "(?i)\\bthen\\b"], "min_matches": 2 }
				] }),
			))
			.with_grader(GraderConfig::new(
				"llm_comparison",
				"judge",
				json!({ "rubric": "explains clearly", "timeout_secs": 0.05 }),
			))
	}

	async fn run_with(tolerate_partial: bool) -> EvalSummary {
		let quality: MetricConfig = serde_json::from_value(json!({
			"name": "quality",
			"type": "behavior_quality",
			"weights": { "structure": 1.0, "judge": 1.0 },
			"tolerate_partial": tolerate_partial,
		}))
		.unwrap();
		Eval::builder("suite", "code-explainer")
			.executor(Arc::new(MockExecutor::always(ExecutionResult::completed(EXPLANATION))))
			.judge(Arc::new(SlowJudge))
			.add_task(explain_task())
			.add_metric(quality)
			.add_metric(MetricConfig::composite("overall", &[("quality", 1.0)]))
			.build()
			.unwrap()
			.run()
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_judge_timeout_propagates_zero_by_default() {
		let summary = run_with(false).await;
		let trial = &summary.tasks[0].trials[0];
		let judge = trial.grader("judge").unwrap();
		assert_eq!(judge.score, 0.0);
		assert!(!judge.passed);
		assert!(judge.message.contains("timed out"));
		assert_eq!(trial.grader("structure").unwrap().score, 1.0);
		assert_eq!(trial.metric("overall").unwrap().score, Some(0.5));
	}

	#[tokio::test]
	async fn test_judge_timeout_excluded_when_tolerated() {
		let summary = run_with(true).await;
		let trial = &summary.tasks[0].trials[0];
		assert_eq!(trial.metric("overall").unwrap().score, Some(1.0));
		assert!(summary.passed);
	}

	#[tokio::test]
	async fn test_trials_run_and_are_ordered() {
		let executor = MockExecutor::sequence(vec![
			ExecutionResult::completed("ok"),
			ExecutionResult::completed("ok"),
			ExecutionResult::failed("crashed", 5),
		]);
		let summary = Eval::builder("suite", "skill")
			.executor(Arc::new(executor))
			.add_task(Task::new("t", "p"))
			.add_metric(MetricConfig::task_completion("completion"))
			.trials(3)
			.concurrency(1)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let task = &summary.tasks[0];
		assert_eq!(task.trials.iter().map(|t| t.trial).collect::<Vec<_>>(), vec![0, 1, 2]);
		assert!((task.score.unwrap() - 2.0 / 3.0).abs() < 1e-9);
		assert!(task.passed);
		assert!(task.flaky);
		assert_eq!(summary.total_trials, 3);
		assert_eq!(task.trials[2].execution.error.as_deref(), Some("crashed"));
	}

	#[tokio::test]
	async fn test_executor_errors_and_timeouts_are_graded() {
		let executor = from_async_fn(|req: ExecutionRequest| async move {
			if req.prompt == "slow" {
				tokio::time::sleep(Duration::from_secs(30)).await;
			}
			Err::<ExecutionResult, _>(anyhow::anyhow!("session refused"))
		});
		let summary = Eval::builder("suite", "skill")
			.executor(executor)
			.add_task(Task::new("refused", "fast"))
			.add_task(Task::new("slow", "slow"))
			.add_metric(MetricConfig::task_completion("completion"))
			.execution_timeout(Duration::from_millis(50))
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();

		let refused = &summary.task("refused").unwrap().trials[0];
		assert_eq!(refused.execution.error.as_deref(), Some("session refused"));
		let slow = &summary.task("slow").unwrap().trials[0];
		assert!(slow.execution.error.as_deref().unwrap().contains("timed out"));
		assert!(!summary.passed);
		assert_eq!(summary.failed_tasks, 2);
	}

	#[tokio::test]
	async fn test_tool_call_grader_sees_execution() {
		let mut execution = ExecutionResult::completed("done");
		execution.tool_calls = vec![ToolCall::new("view", json!({ "path": "src/lib.rs" }))];
		let task = Task::new("t", "p").with_grader(GraderConfig::new(
			"tool_calls",
			"reads",
			json!({ "expected": [{ "name": "view", "arguments": { "path": "src/lib.rs" } }] }),
		));
		let summary = Eval::builder("suite", "skill")
			.executor(Arc::new(MockExecutor::always(execution)))
			.add_task(task)
			.build()
			.unwrap()
			.run()
			.await
			.unwrap();
		assert!(summary.passed);
		assert_eq!(summary.tasks[0].score, Some(1.0));
	}

	#[test]
	fn test_build_rejects_bad_configuration() {
		let executor: Arc<dyn Executor> = Arc::new(MockExecutor::always(ExecutionResult::completed("")));

		let err = Eval::builder("suite", "skill")
			.executor(executor.clone())
			.add_task(Task::new("t", "p").with_grader(GraderConfig::new("telepathy", "x", json!({}))))
			.build()
			.err()
			.unwrap();
		assert!(err.to_string().contains("unknown grader kind 'telepathy'"));

		let err = Eval::builder("suite", "skill")
			.executor(executor.clone())
			.add_task(Task::new("t", "p"))
			.add_metric(MetricConfig::composite("a", &[("b", 1.0)]))
			.add_metric(MetricConfig::composite("b", &[("a", 1.0)]))
			.build()
			.err()
			.unwrap();
		assert!(err.to_string().contains("cyclic composite metric reference"));

		assert!(Eval::builder("suite", "skill")
			.executor(executor.clone())
			.add_task(Task::new("t", "p"))
			.trials(0)
			.build()
			.is_err());

		let completion = MetricConfig::new(
			"done",
			MetricKind::TaskCompletion { primary_graders: vec!["checks".to_string()], mode: CompletionMode::Binary },
		);
		let err = Eval::builder("suite", "skill")
			.executor(executor.clone())
			.add_task(Task::new("t", "p").with_metric(completion.clone()))
			.build()
			.err()
			.unwrap();
		assert!(err.to_string().contains("unknown primary grader 'checks'"), "{err}");
		assert!(Eval::builder("suite", "skill")
			.executor(executor.clone())
			.add_task(Task::new("t", "p").with_metric(completion))
			.graders([GraderConfig::new("regex", "checks", json!({ "must_match": ["x"] }))])
			.build()
			.is_ok());

		assert!(Eval::builder("suite", "skill").executor(executor).build().is_err());
	}
}

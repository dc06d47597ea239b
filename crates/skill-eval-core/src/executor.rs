use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skill_eval_types::ExecutionResult;

use crate::error::ConfigError;

/// Runs one trial of a task against an agent session.
#[async_trait]
pub trait Executor: Send + Sync {
	/// Provision whatever the session needs. Called once before any trial.
	async fn setup(&self) -> Result<()> {
		Ok(())
	}

	/// An `Err` is recorded as a failed execution, not a run failure.
	async fn execute(&self, prompt: &str, context: &Value, skill_name: &str) -> Result<ExecutionResult>;

	/// Called once after every trial finished, even if some failed.
	async fn teardown(&self) -> Result<()> {
		Ok(())
	}
}

/// Owned copy of the arguments to [`Executor::execute`], handed to closures.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
	pub prompt: String,
	pub context: Value,
	pub skill_name: String,
}

/// Wrap an async closure as an `Executor`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Executor>
where
	F: Send + Sync + 'static + Fn(ExecutionRequest) -> Fut,
	Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
{
	struct ClosureExecutor<F, Fut>
	where
		F: Send + Sync + 'static + Fn(ExecutionRequest) -> Fut,
		Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
	{
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Executor for ClosureExecutor<F, Fut>
	where
		F: Send + Sync + 'static + Fn(ExecutionRequest) -> Fut,
		Fut: Future<Output = Result<ExecutionResult>> + Send + 'static,
	{
		async fn execute(&self, prompt: &str, context: &Value, skill_name: &str) -> Result<ExecutionResult> {
			(self.f)(ExecutionRequest {
				prompt: prompt.to_string(),
				context: context.clone(),
				skill_name: skill_name.to_string(),
			})
			.await
		}
	}

	Arc::new(ClosureExecutor { f })
}

/// One scripted reply of the mock executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockRule {
	/// Regex matched against the prompt. Absent matches everything.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prompt: Option<String>,
	/// Replies handed out in turn to successive matching trials.
	pub responses: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
	#[serde(default)]
	pub rules: Vec<MockRule>,
	/// Simulated session latency.
	#[serde(default)]
	pub delay_ms: u64,
}

struct CompiledRule {
	prompt: Option<Regex>,
	responses: Vec<ExecutionResult>,
	next: AtomicUsize,
}

/// Executor that replays scripted results. Prompts no rule matches get
/// `Mock response for: <prompt>`.
pub struct MockExecutor {
	rules: Vec<CompiledRule>,
	delay: Duration,
}

impl MockExecutor {
	pub fn new(config: MockConfig) -> Result<Self, ConfigError> {
		let mut rules = Vec::with_capacity(config.rules.len());
		for rule in config.rules {
			if rule.responses.is_empty() {
				return Err(ConfigError::InvalidExecutor("mock rule needs at least one response".to_string()));
			}
			let prompt = rule
				.prompt
				.as_deref()
				.map(|p| {
					Regex::new(p).map_err(|e| ConfigError::InvalidExecutor(format!("invalid prompt regex {p:?}: {e}")))
				})
				.transpose()?;
			rules.push(CompiledRule {
				prompt,
				responses: rule.responses,
				next: AtomicUsize::new(0),
			});
		}
		Ok(Self {
			rules,
			delay: Duration::from_millis(config.delay_ms),
		})
	}

	/// Always reply with `result`.
	pub fn always(result: ExecutionResult) -> Self {
		Self {
			rules: vec![CompiledRule {
				prompt: None,
				responses: vec![result],
				next: AtomicUsize::new(0),
			}],
			delay: Duration::ZERO,
		}
	}

	/// Reply with `results` in turn, wrapping around.
	pub fn sequence(results: Vec<ExecutionResult>) -> Self {
		if results.is_empty() {
			return Self { rules: Vec::new(), delay: Duration::ZERO };
		}
		Self {
			rules: vec![CompiledRule {
				prompt: None,
				responses: results,
				next: AtomicUsize::new(0),
			}],
			delay: Duration::ZERO,
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}
}

#[async_trait]
impl Executor for MockExecutor {
	async fn execute(&self, prompt: &str, _context: &Value, skill_name: &str) -> Result<ExecutionResult> {
		let start = Instant::now();
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		let rule = self
			.rules
			.iter()
			.find(|r| r.prompt.as_ref().map_or(true, |re| re.is_match(prompt)));
		let mut result = match rule {
			Some(rule) => {
				let i = rule.next.fetch_add(1, Ordering::Relaxed) % rule.responses.len();
				rule.responses[i].clone()
			}
			None => ExecutionResult::completed(format!("Mock response for: {}", prompt)),
		};
		if result.duration_ms == 0 {
			result.duration_ms = start.elapsed().as_millis() as u64;
		}
		tracing::debug!(skill = %skill_name, success = result.success, "mock execution finished");
		Ok(result)
	}
}

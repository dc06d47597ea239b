//! skill-eval-core: grading and metrics aggregation for agent skill evals.
//! Run tasks through an executor, grade each trial, fold grader results into
//! named metrics, then aggregate trials into task and suite verdicts.
//! See `examples/simple.rs` for a quickstart.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod expr;
pub mod grader;
pub mod judge;
pub mod metric;
pub mod registry;
pub mod runner;
pub mod task;
pub mod task_source;
pub mod testing;

pub mod graders {
	pub mod human;
	pub mod llm;
	pub mod regex;
	pub mod script;
	pub mod tool_calls;
}

pub mod metrics {
	pub mod behavior;
	pub mod completion;
	pub mod composite;
	pub mod trigger;
}

pub use aggregate::AggregationPolicy;
pub use config::{EvalConfig, ExecutorConfig, JudgeConfig};
pub use context::GraderContext;
pub use error::ConfigError;
pub use executor::{from_async_fn, ExecutionRequest, Executor, MockConfig, MockExecutor, MockRule};
pub use grader::{Grader, GraderConfig, GraderKind};
pub use graders::{
	human::{calibrate, CalibrationReport, ChannelReviewer, HumanCalibrationGrader, HumanLabel, HumanReviewer},
	llm::LlmComparisonGrader,
	regex::RegexGrader,
	script::ScriptGrader,
	tool_calls::ToolCallGrader,
};
pub use judge::{HttpJudge, Judge, JudgeError, JudgeRequest, JudgeVerdict};
pub use metric::{CompletionMode, MetricConfig, MetricKind, MetricSet};
pub use registry::{GraderDeps, GraderRegistry};
pub use runner::{Eval, EvalBuilder};
pub use task::{Expected, Task, TriggerConfidence};
pub use task_source::{TaskSource, VecTaskSource, YamlTaskSource};
pub use skill_eval_types::{
	EvalSummary, ExecutionResult, GraderResult, MetricAggregate, MetricResult, SessionEvent, TaskAggregate, ToolCall,
	TriggerMetrics, TrialResult,
};

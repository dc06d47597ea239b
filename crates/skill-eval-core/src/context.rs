use serde_json::Value;
use skill_eval_types::{ExecutionResult, SessionEvent, ToolCall};

use crate::task::Task;

/// Read-only view of one trial handed to every grader.
#[derive(Debug, Clone, PartialEq)]
pub struct GraderContext {
	pub task_id: String,
	pub output: String,
	pub outcome: Value,
	pub transcript: Vec<SessionEvent>,
	pub tool_calls: Vec<ToolCall>,
	/// Transcript events that mention an error.
	pub errors: Vec<SessionEvent>,
	pub duration_ms: u64,
	pub success: bool,
	pub execution_error: Option<String>,
	pub skill_invoked: bool,
}

impl GraderContext {
	pub fn new(task: &Task, execution: &ExecutionResult) -> Self {
		Self {
			task_id: task.id.clone(),
			output: execution.output.clone(),
			outcome: task.outcome(),
			transcript: execution.events.clone(),
			tool_calls: execution.tool_calls.clone(),
			errors: error_events(&execution.events),
			duration_ms: execution.duration_ms,
			success: execution.success,
			execution_error: execution.error.clone(),
			skill_invoked: execution.skill_invoked,
		}
	}

	/// Context for a bare assertion request with no task or executor behind it.
	pub fn from_parts(
		output: impl Into<String>,
		outcome: Value,
		transcript: Vec<SessionEvent>,
		tool_calls: Vec<ToolCall>,
		duration_ms: u64,
	) -> Self {
		Self {
			task_id: String::new(),
			output: output.into(),
			outcome,
			errors: error_events(&transcript),
			transcript,
			tool_calls,
			duration_ms,
			success: true,
			execution_error: None,
			skill_invoked: false,
		}
	}
}

fn error_events(events: &[SessionEvent]) -> Vec<SessionEvent> {
	events.iter().filter(|e| e.is_error()).cloned().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_errors_are_derived_from_transcript() {
		let mut execution = ExecutionResult::completed("ok");
		execution.events = vec![
			SessionEvent::new("assistant.message", json!({ "content": "all good" })),
			SessionEvent::new("session.error", Value::Null),
			SessionEvent::new("tool.result", json!({ "stderr": "fatal error: missing file" })),
		];
		let task = Task::new("t1", "do it").with_outcome("files", json!(["a.rs"]));
		let ctx = GraderContext::new(&task, &execution);

		assert_eq!(ctx.errors.len(), 2);
		assert_eq!(ctx.errors[0].event_type, "session.error");
		assert_eq!(ctx.outcome, json!({ "files": ["a.rs"] }));
		assert!(ctx.success);
	}
}

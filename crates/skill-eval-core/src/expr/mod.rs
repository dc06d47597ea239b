//! Sandboxed assertion language.
//!
//! Assertions are small Python-flavoured boolean expressions evaluated
//! against a fixed namespace built from one trial (`output`, `outcome`,
//! `transcript`, `tool_calls`, `errors`, `duration_ms`) plus a handful of
//! safe builtins and a `re` module. There is no assignment, no import and
//! no way to reach host state; each assertion gets a fresh namespace.

mod builtins;
mod interp;
mod lexer;
mod parser;
mod re;
mod value;

use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use skill_eval_types::{SessionEvent, ToolCall};
use thiserror::Error;

use crate::context::GraderContext;
use interp::Interpreter;
pub use value::Value;

/// Marker returned for an assertion that evaluated to a falsy value.
pub const FAIL_MARKER: &str = "fail";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
	#[error("{0}")]
	Syntax(String),
	#[error("name '{0}' is not defined")]
	Name(String),
	#[error("{0}")]
	Type(String),
	#[error("{0}")]
	Index(String),
	#[error("{0}")]
	Key(String),
	#[error("{0}")]
	Value(String),
	#[error("{0}")]
	ZeroDivision(String),
	#[error("{0}")]
	Attribute(String),
	#[error("{0}")]
	Overflow(String),
	#[error("{0}")]
	Regex(String),
	#[error("{0}")]
	Limit(String),
}

impl EvalError {
	/// Python exception class the error corresponds to.
	pub fn kind(&self) -> &'static str {
		match self {
			EvalError::Syntax(_) => "SyntaxError",
			EvalError::Name(_) => "NameError",
			EvalError::Type(_) => "TypeError",
			EvalError::Index(_) => "IndexError",
			EvalError::Key(_) => "KeyError",
			EvalError::Value(_) => "ValueError",
			EvalError::ZeroDivision(_) => "ZeroDivisionError",
			EvalError::Attribute(_) => "AttributeError",
			EvalError::Overflow(_) => "OverflowError",
			EvalError::Regex(_) => "re.error",
			EvalError::Limit(_) => "ResourceLimitError",
		}
	}
}

/// Three-way result of one assertion.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionOutcome {
	Pass,
	Fail,
	Error(EvalError),
}

impl AssertionOutcome {
	pub fn passed(&self) -> bool {
		matches!(self, AssertionOutcome::Pass)
	}

	/// `""`, `"fail"` or the error text.
	///
	/// An error whose text would be empty or collide with the fail marker is
	/// prefixed with its exception kind so it can never read as a pass or a
	/// plain failure.
	pub fn to_wire(&self) -> String {
		match self {
			AssertionOutcome::Pass => String::new(),
			AssertionOutcome::Fail => FAIL_MARKER.to_string(),
			AssertionOutcome::Error(e) => {
				let text = e.to_string();
				if text.is_empty() || text == FAIL_MARKER {
					format!("{}: {}", e.kind(), text)
				} else {
					text
				}
			}
		}
	}
}

/// Names visible to an assertion.
pub struct Namespace {
	names: HashMap<&'static str, Value>,
}

impl Namespace {
	pub fn from_context(ctx: &GraderContext) -> Self {
		use value::Builtin;

		let events = |events: &[SessionEvent]| {
			Value::list(events.iter().map(event_value).collect())
		};
		let tool_calls = Value::list(ctx.tool_calls.iter().map(tool_call_value).collect());
		let outcome = match &ctx.outcome {
			serde_json::Value::Null => Value::Dict(Rc::new(Vec::new())),
			other => Value::from_json(other),
		};

		let mut names: HashMap<&'static str, Value> = HashMap::new();
		names.insert("output", Value::str(&ctx.output));
		names.insert("outcome", outcome);
		names.insert("transcript", events(&ctx.transcript));
		names.insert("tool_calls", tool_calls);
		names.insert("errors", events(&ctx.errors));
		names.insert("duration_ms", Value::Int(ctx.duration_ms.min(i64::MAX as u64) as i64));
		names.insert("True", Value::Bool(true));
		names.insert("False", Value::Bool(false));
		names.insert("re", Value::ReModule);
		for b in [
			Builtin::Len,
			Builtin::Any,
			Builtin::All,
			Builtin::Str,
			Builtin::Int,
			Builtin::Float,
			Builtin::Bool,
			Builtin::List,
			Builtin::Dict,
		] {
			names.insert(b.name(), Value::Builtin(b));
		}
		Self { names }
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.names.get(name)
	}
}

fn event_value(event: &SessionEvent) -> Value {
	Value::from_json(&json!({ "type": event.event_type, "data": event.data }))
}

fn tool_call_value(call: &ToolCall) -> Value {
	Value::from_json(&json!({ "name": call.name, "arguments": call.arguments }))
}

/// Check that an assertion parses, without evaluating it.
pub fn check_syntax(assertion: &str) -> Result<(), EvalError> {
	parser::parse(assertion).map(|_| ())
}

fn evaluate_in(namespace: &Namespace, assertion: &str) -> AssertionOutcome {
	let result = parser::parse(assertion).and_then(|expr| Interpreter::new(namespace).eval(&expr));
	match result {
		Ok(v) if v.truthy() => AssertionOutcome::Pass,
		Ok(_) => AssertionOutcome::Fail,
		Err(e) => AssertionOutcome::Error(e),
	}
}

/// Evaluate a single assertion against a trial.
pub fn evaluate(assertion: &str, ctx: &GraderContext) -> AssertionOutcome {
	evaluate_in(&Namespace::from_context(ctx), assertion)
}

/// Evaluate every assertion, each in its own fresh namespace.
pub fn evaluate_all(assertions: &[String], ctx: &GraderContext) -> Vec<AssertionOutcome> {
	assertions.iter().map(|a| evaluate(a, ctx)).collect()
}

/// JSON accepted on stdin by `skill-eval assert`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionRequest {
	#[serde(default)]
	pub output: Option<String>,
	#[serde(default)]
	pub outcome: serde_json::Value,
	#[serde(default)]
	pub transcript: Vec<SessionEvent>,
	#[serde(default)]
	pub tool_calls: Vec<ToolCall>,
	#[serde(default)]
	pub duration_ms: u64,
	#[serde(default)]
	pub assertions: Vec<String>,
}

/// JSON written to stdout by `skill-eval assert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResponse {
	pub results: Vec<String>,
}

pub fn evaluate_request(request: &AssertionRequest) -> AssertionResponse {
	let ctx = GraderContext::from_parts(
		request.output.clone().unwrap_or_default(),
		request.outcome.clone(),
		request.transcript.clone(),
		request.tool_calls.clone(),
		request.duration_ms,
	);
	AssertionResponse {
		results: evaluate_all(&request.assertions, &ctx)
			.iter()
			.map(AssertionOutcome::to_wire)
			.collect(),
	}
}

use std::cmp::Ordering;
use std::fmt::Write as _;
use std::rc::Rc;

use regex::Regex;
use serde_json::Value as Json;

use super::EvalError;

/// Runtime value of the assertion language.
#[derive(Debug, Clone)]
pub enum Value {
	None,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Rc<str>),
	List(Rc<Vec<Value>>),
	Tuple(Rc<Vec<Value>>),
	Dict(Rc<Vec<(Value, Value)>>),
	Builtin(Builtin),
	ReModule,
	Pattern(Rc<Pattern>),
	Match(Rc<MatchValue>),
	Method(Rc<(Value, String)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
	Len,
	Any,
	All,
	Str,
	Int,
	Float,
	Bool,
	List,
	Dict,
}

impl Builtin {
	pub fn name(self) -> &'static str {
		match self {
			Builtin::Len => "len",
			Builtin::Any => "any",
			Builtin::All => "all",
			Builtin::Str => "str",
			Builtin::Int => "int",
			Builtin::Float => "float",
			Builtin::Bool => "bool",
			Builtin::List => "list",
			Builtin::Dict => "dict",
		}
	}
}

/// A compiled `re` pattern.
#[derive(Debug)]
pub struct Pattern {
	pub source: String,
	pub flags: i64,
	pub regex: Regex,
}

/// Result of a successful `re.search` / `re.match`.
#[derive(Debug)]
pub struct MatchValue {
	/// Group 0 is the whole match.
	pub groups: Vec<Option<String>>,
	/// Character offsets of each group.
	pub spans: Vec<Option<(usize, usize)>>,
	pub names: Vec<Option<String>>,
}

impl Value {
	pub fn str(s: impl AsRef<str>) -> Value {
		Value::Str(Rc::from(s.as_ref()))
	}

	pub fn list(items: Vec<Value>) -> Value {
		Value::List(Rc::new(items))
	}

	pub fn tuple(items: Vec<Value>) -> Value {
		Value::Tuple(Rc::new(items))
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			Value::None => "NoneType",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::Str(_) => "str",
			Value::List(_) => "list",
			Value::Tuple(_) => "tuple",
			Value::Dict(_) => "dict",
			Value::Builtin(_) => "builtin_function_or_method",
			Value::ReModule => "module",
			Value::Pattern(_) => "re.Pattern",
			Value::Match(_) => "re.Match",
			Value::Method(_) => "builtin_function_or_method",
		}
	}

	pub fn truthy(&self) -> bool {
		match self {
			Value::None => false,
			Value::Bool(b) => *b,
			Value::Int(i) => *i != 0,
			Value::Float(f) => *f != 0.0,
			Value::Str(s) => !s.is_empty(),
			Value::List(items) | Value::Tuple(items) => !items.is_empty(),
			Value::Dict(entries) => !entries.is_empty(),
			_ => true,
		}
	}

	/// Numeric view used by arithmetic; bools behave as ints.
	pub fn as_number(&self) -> Option<Number> {
		match self {
			Value::Bool(b) => Some(Number::Int(*b as i64)),
			Value::Int(i) => Some(Number::Int(*i)),
			Value::Float(f) => Some(Number::Float(*f)),
			_ => None,
		}
	}

	/// Integer view used by indexing and repetition.
	pub fn as_index(&self) -> Option<i64> {
		match self {
			Value::Bool(b) => Some(*b as i64),
			Value::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn from_json(json: &Json) -> Value {
		match json {
			Json::Null => Value::None,
			Json::Bool(b) => Value::Bool(*b),
			Json::Number(n) => match n.as_i64() {
				Some(i) => Value::Int(i),
				None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
			},
			Json::String(s) => Value::str(s),
			Json::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
			Json::Object(map) => Value::Dict(Rc::new(
				map.iter().map(|(k, v)| (Value::str(k), Value::from_json(v))).collect(),
			)),
		}
	}

	/// `str(x)`, or `None` once the text would pass `limit` bytes.
	pub fn display_bounded(&self, limit: usize) -> Option<String> {
		match self {
			Value::Str(s) => Some(s.to_string()),
			other => other.repr_bounded(limit),
		}
	}

	/// `repr(x)`
	pub fn repr(&self) -> String {
		let mut out = String::new();
		self.write_repr(&mut out, usize::MAX);
		out
	}

	/// `repr(x)`, or `None` once the text would pass `limit` bytes.
	pub fn repr_bounded(&self, limit: usize) -> Option<String> {
		let mut out = String::new();
		self.write_repr(&mut out, limit).then_some(out)
	}

	/// `repr(x)` cut to about `limit` bytes, for error messages.
	pub fn repr_short(&self, limit: usize) -> String {
		let mut out = String::new();
		if !self.write_repr(&mut out, limit) {
			let mut cut = limit.min(out.len());
			while !out.is_char_boundary(cut) {
				cut -= 1;
			}
			out.truncate(cut);
			out.push_str("...");
		}
		out
	}

	/// Append `repr(self)` to `out`. Returns false, leaving `out` partly
	/// written, as soon as it grows past `limit` bytes.
	fn write_repr(&self, out: &mut String, limit: usize) -> bool {
		match self {
			Value::None => out.push_str("None"),
			Value::Bool(true) => out.push_str("True"),
			Value::Bool(false) => out.push_str("False"),
			Value::Int(i) => {
				let _ = write!(out, "{}", i);
			}
			Value::Float(f) => out.push_str(&format_float(*f)),
			Value::Str(s) => {
				if out.len().saturating_add(s.len()) > limit {
					return false;
				}
				out.push_str(&repr_str(s));
			}
			Value::List(items) => {
				out.push('[');
				if !write_items(items, out, limit) {
					return false;
				}
				out.push(']');
			}
			Value::Tuple(items) if items.len() == 1 => {
				out.push('(');
				if !items[0].write_repr(out, limit) {
					return false;
				}
				out.push_str(",)");
			}
			Value::Tuple(items) => {
				out.push('(');
				if !write_items(items, out, limit) {
					return false;
				}
				out.push(')');
			}
			Value::Dict(entries) => {
				out.push('{');
				for (i, (k, v)) in entries.iter().enumerate() {
					if i > 0 {
						out.push_str(", ");
					}
					if !k.write_repr(out, limit) {
						return false;
					}
					out.push_str(": ");
					if !v.write_repr(out, limit) {
						return false;
					}
				}
				out.push('}');
			}
			Value::Builtin(b) => {
				let _ = write!(out, "<built-in function {}>", b.name());
			}
			Value::ReModule => out.push_str("<module 're'>"),
			Value::Pattern(p) => {
				if out.len().saturating_add(p.source.len()) > limit {
					return false;
				}
				let _ = write!(out, "re.compile({})", repr_str(&p.source));
			}
			Value::Match(m) => {
				let (start, end) = m.spans[0].unwrap_or((0, 0));
				let text = m.groups[0].clone().unwrap_or_default();
				if out.len().saturating_add(text.len()) > limit {
					return false;
				}
				let _ = write!(out, "<re.Match object; span=({}, {}), match={}>", start, end, repr_str(&text));
			}
			Value::Method(bound) => {
				let _ = write!(out, "<built-in method {} of {} object>", bound.1, bound.0.type_name());
			}
		}
		out.len() <= limit
	}

	pub fn dict_get(&self, key: &Value) -> Option<Value> {
		match self {
			Value::Dict(entries) => entries.iter().find(|(k, _)| py_eq(k, key)).map(|(_, v)| v.clone()),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy)]
pub enum Number {
	Int(i64),
	Float(f64),
}

impl Number {
	pub fn as_f64(self) -> f64 {
		match self {
			Number::Int(i) => i as f64,
			Number::Float(f) => f,
		}
	}
}

fn write_items(items: &[Value], out: &mut String, limit: usize) -> bool {
	for (i, item) in items.iter().enumerate() {
		if i > 0 {
			out.push_str(", ");
		}
		if !item.write_repr(out, limit) {
			return false;
		}
	}
	true
}

pub fn format_float(f: f64) -> String {
	if f.is_nan() {
		return "nan".to_string();
	}
	if f.is_infinite() {
		return if f > 0.0 { "inf" } else { "-inf" }.to_string();
	}
	if f == f.trunc() && f.abs() < 1e16 {
		format!("{:.1}", f)
	} else {
		format!("{}", f)
	}
}

pub fn repr_str(s: &str) -> String {
	let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
	let mut out = String::with_capacity(s.len() + 2);
	out.push(quote);
	for c in s.chars() {
		match c {
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\t' => out.push_str("\\t"),
			c if c == quote => {
				out.push('\\');
				out.push(c);
			}
			c if (c as u32) < 0x20 => {
				let _ = write!(out, "\\x{:02x}", c as u32);
			}
			c => out.push(c),
		}
	}
	out.push(quote);
	out
}

/// `a == b` with Python's cross-type numeric equality.
pub fn py_eq(a: &Value, b: &Value) -> bool {
	if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
		return match (x, y) {
			(Number::Int(x), Number::Int(y)) => x == y,
			(x, y) => x.as_f64() == y.as_f64(),
		};
	}
	match (a, b) {
		(Value::None, Value::None) => true,
		(Value::Str(x), Value::Str(y)) => x == y,
		(Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
			x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| py_eq(l, r))
		}
		(Value::Dict(x), Value::Dict(y)) => {
			x.len() == y.len()
				&& x.iter().all(|(k, v)| y.iter().any(|(k2, v2)| py_eq(k, k2) && py_eq(v, v2)))
		}
		(Value::Builtin(x), Value::Builtin(y)) => x == y,
		(Value::ReModule, Value::ReModule) => true,
		(Value::Pattern(x), Value::Pattern(y)) => x.source == y.source && x.flags == y.flags,
		(Value::Match(x), Value::Match(y)) => Rc::ptr_eq(x, y),
		_ => false,
	}
}

/// `a is b`. Only singletons and shared references are identical.
pub fn py_is(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::None, Value::None) => true,
		(Value::Bool(x), Value::Bool(y)) => x == y,
		(Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
		(Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
		(Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
		(Value::Builtin(x), Value::Builtin(y)) => x == y,
		(Value::ReModule, Value::ReModule) => true,
		_ => false,
	}
}

/// Ordering for `<`, `<=`, `>`, `>=`. `None` means unordered (NaN), which
/// makes every ordering comparison false.
pub fn py_cmp(a: &Value, b: &Value, op: &str) -> Result<Option<Ordering>, EvalError> {
	if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
		return Ok(match (x, y) {
			(Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
			(x, y) => x.as_f64().partial_cmp(&y.as_f64()),
		});
	}
	match (a, b) {
		(Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
		(Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
			for (l, r) in x.iter().zip(y.iter()) {
				if !py_eq(l, r) {
					return py_cmp(l, r, op);
				}
			}
			Ok(Some(x.len().cmp(&y.len())))
		}
		_ => Err(EvalError::Type(format!(
			"'{}' not supported between instances of '{}' and '{}'",
			op,
			a.type_name(),
			b.type_name()
		))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_repr_matches_python() {
		assert_eq!(Value::Float(1.0).repr(), "1.0");
		assert_eq!(Value::Float(0.25).repr(), "0.25");
		assert_eq!(Value::str("it's").repr(), "\"it's\"");
		assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
		assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
		let v = Value::from_json(&json!({"name": "bash", "ok": true, "n": null}));
		assert_eq!(v.repr(), "{'n': None, 'name': 'bash', 'ok': True}");
	}

	#[test]
	fn test_numeric_equality_crosses_types() {
		assert!(py_eq(&Value::Int(1), &Value::Float(1.0)));
		assert!(py_eq(&Value::Bool(true), &Value::Int(1)));
		assert!(!py_eq(&Value::str("1"), &Value::Int(1)));
		assert!(!py_eq(&Value::list(vec![]), &Value::tuple(vec![])));
	}

	#[test]
	fn test_ordering_type_error() {
		let err = py_cmp(&Value::str("a"), &Value::Int(1), "<").unwrap_err();
		assert_eq!(err.to_string(), "'<' not supported between instances of 'str' and 'int'");
	}
}

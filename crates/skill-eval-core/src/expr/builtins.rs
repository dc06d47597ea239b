use std::rc::Rc;

use super::interp::{check_hashable, check_len, ERROR_REPR_LIMIT, MAX_SEQUENCE_LEN};
use super::re::{self, Anchor};
use super::value::{py_eq, Builtin, MatchValue, Pattern, Value};
use super::EvalError;

/// Positional and keyword arguments bound against a parameter list.
struct Bound {
	slots: Vec<Option<Value>>,
}

impl Bound {
	fn take(&mut self, idx: usize) -> Option<Value> {
		self.slots.get_mut(idx).and_then(Option::take)
	}

	fn required(&mut self, idx: usize) -> Value {
		// bind() guarantees required slots are filled
		self.take(idx).unwrap_or(Value::None)
	}
}

fn bind(
	func: &str,
	positional: Vec<Value>,
	keywords: Vec<(String, Value)>,
	params: &[&str],
	required: usize,
) -> Result<Bound, EvalError> {
	if positional.len() > params.len() {
		return Err(EvalError::Type(format!(
			"{}() takes at most {} argument{} ({} given)",
			func,
			params.len(),
			if params.len() == 1 { "" } else { "s" },
			positional.len()
		)));
	}
	let mut slots: Vec<Option<Value>> = vec![None; params.len()];
	for (i, v) in positional.into_iter().enumerate() {
		slots[i] = Some(v);
	}
	for (name, v) in keywords {
		let Some(i) = params.iter().position(|p| *p == name) else {
			return Err(EvalError::Type(format!(
				"{}() got an unexpected keyword argument '{}'",
				func, name
			)));
		};
		if slots[i].is_some() {
			return Err(EvalError::Type(format!(
				"{}() got multiple values for argument '{}'",
				func, name
			)));
		}
		slots[i] = Some(v);
	}
	if let Some(missing) = (0..required).find(|i| slots[*i].is_none()) {
		return Err(EvalError::Type(format!(
			"{}() missing required argument: '{}'",
			func, params[missing]
		)));
	}
	Ok(Bound { slots })
}

fn expect_str(func: &str, v: &Value) -> Result<Rc<str>, EvalError> {
	match v {
		Value::Str(s) => Ok(s.clone()),
		other => Err(EvalError::Type(format!(
			"{}() argument must be str, not {}",
			func,
			other.type_name()
		))),
	}
}

fn expect_int(func: &str, v: Option<Value>, default: i64) -> Result<i64, EvalError> {
	match v {
		None => Ok(default),
		Some(v) => v.as_index().ok_or_else(|| {
			EvalError::Type(format!(
				"{}() argument must be int, not {}",
				func,
				v.type_name()
			))
		}),
	}
}

/// Elements produced by iterating `v` the way a Python `for` would.
pub fn iter_values(v: &Value) -> Result<Vec<Value>, EvalError> {
	match v {
		Value::List(items) | Value::Tuple(items) => Ok(items.as_ref().clone()),
		Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
		Value::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
		other => Err(EvalError::Type(format!(
			"'{}' object is not iterable",
			other.type_name()
		))),
	}
}

pub fn call_builtin(b: Builtin, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	let name = b.name();
	if b != Builtin::Dict && !keywords.is_empty() {
		return Err(EvalError::Type(format!("{}() takes no keyword arguments", name)));
	}
	let arity = |max: usize| -> Result<(), EvalError> {
		if args.len() > max {
			return Err(EvalError::Type(format!(
				"{}() takes at most {} argument{} ({} given)",
				name,
				max,
				if max == 1 { "" } else { "s" },
				args.len()
			)));
		}
		Ok(())
	};

	match b {
		Builtin::Len => {
			if args.len() != 1 {
				return Err(EvalError::Type(format!(
					"len() takes exactly one argument ({} given)",
					args.len()
				)));
			}
			let n = match &args[0] {
				Value::Str(s) => s.chars().count(),
				Value::List(items) | Value::Tuple(items) => items.len(),
				Value::Dict(entries) => entries.len(),
				other => {
					return Err(EvalError::Type(format!(
						"object of type '{}' has no len()",
						other.type_name()
					)))
				}
			};
			Ok(Value::Int(n as i64))
		}
		Builtin::Any | Builtin::All => {
			if args.len() != 1 {
				return Err(EvalError::Type(format!(
					"{}() takes exactly one argument ({} given)",
					name,
					args.len()
				)));
			}
			let items = iter_values(&args[0])?;
			Ok(Value::Bool(if b == Builtin::Any {
				items.iter().any(Value::truthy)
			} else {
				items.iter().all(Value::truthy)
			}))
		}
		Builtin::Str => {
			arity(1)?;
			match args.first() {
				None => Ok(Value::str("")),
				Some(v) => v
					.display_bounded(MAX_SEQUENCE_LEN)
					.map(Value::str)
					.ok_or_else(|| EvalError::Limit("MemoryError: string too large".to_string())),
			}
		}
		Builtin::Bool => {
			arity(1)?;
			Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
		}
		Builtin::Int => {
			arity(1)?;
			args.first().map_or(Ok(Value::Int(0)), to_int)
		}
		Builtin::Float => {
			arity(1)?;
			args.first().map_or(Ok(Value::Float(0.0)), to_float)
		}
		Builtin::List => {
			arity(1)?;
			match args.first() {
				None => Ok(Value::list(Vec::new())),
				Some(v) => Ok(Value::list(iter_values(v)?)),
			}
		}
		Builtin::Dict => {
			arity(1)?;
			let mut out: Vec<(Value, Value)> = match args.first() {
				None => Vec::new(),
				Some(Value::Dict(entries)) => entries.as_ref().clone(),
				Some(other) => {
					let mut out = Vec::new();
					for (i, item) in iter_values(other)?.into_iter().enumerate() {
						let pair = match &item {
							Value::List(p) | Value::Tuple(p) => p.clone(),
							_ => {
								return Err(EvalError::Type(format!(
									"cannot convert dictionary update sequence element #{} to a sequence",
									i
								)))
							}
						};
						if pair.len() != 2 {
							return Err(EvalError::Value(format!(
								"dictionary update sequence element #{} has length {}; 2 is required",
								i,
								pair.len()
							)));
						}
						check_hashable(&pair[0])?;
						upsert(&mut out, pair[0].clone(), pair[1].clone());
					}
					out
				}
			};
			for (k, v) in keywords {
				upsert(&mut out, Value::str(k), v);
			}
			Ok(Value::Dict(Rc::new(out)))
		}
	}
}

fn upsert(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
	match entries.iter_mut().find(|(k, _)| py_eq(k, &key)) {
		Some(slot) => slot.1 = value,
		None => entries.push((key, value)),
	}
}

fn to_int(v: &Value) -> Result<Value, EvalError> {
	match v {
		Value::Int(i) => Ok(Value::Int(*i)),
		Value::Bool(b) => Ok(Value::Int(*b as i64)),
		Value::Float(f) => {
			if f.is_nan() {
				return Err(EvalError::Value("cannot convert float NaN to integer".to_string()));
			}
			if f.is_infinite() {
				return Err(EvalError::Overflow("cannot convert float infinity to integer".to_string()));
			}
			let t = f.trunc();
			if t < i64::MIN as f64 || t >= i64::MAX as f64 {
				return Err(EvalError::Overflow("integer overflow".to_string()));
			}
			Ok(Value::Int(t as i64))
		}
		Value::Str(s) => {
			let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
			cleaned.parse::<i64>().map(Value::Int).map_err(|_| {
				EvalError::Value(format!(
					"invalid literal for int() with base 10: {}",
					v.repr_short(ERROR_REPR_LIMIT)
				))
			})
		}
		other => Err(EvalError::Type(format!(
			"int() argument must be a string, a bytes-like object or a real number, not '{}'",
			other.type_name()
		))),
	}
}

fn to_float(v: &Value) -> Result<Value, EvalError> {
	match v.as_number() {
		Some(n) => Ok(Value::Float(n.as_f64())),
		None => match v {
			Value::Str(s) => {
				let t = s.trim();
				let lowered = t.to_ascii_lowercase();
				let special = match lowered.trim_start_matches(['+', '-']) {
					"inf" | "infinity" => Some(f64::INFINITY),
					"nan" => Some(f64::NAN),
					_ => None,
				};
				if let Some(f) = special {
					return Ok(Value::Float(if lowered.starts_with('-') { -f } else { f }));
				}
				t.parse::<f64>().map(Value::Float).map_err(|_| {
					EvalError::Value(format!("could not convert string to float: {}", v.repr_short(ERROR_REPR_LIMIT)))
				})
			}
			other => Err(EvalError::Type(format!(
				"float() argument must be a string or a real number, not '{}'",
				other.type_name()
			))),
		},
	}
}

const STR_METHODS: &[&str] = &[
	"lower", "upper", "strip", "lstrip", "rstrip", "startswith", "endswith", "split", "count", "find",
	"replace", "join", "isdigit",
];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items"];
const SEQ_METHODS: &[&str] = &["count", "index"];
const RE_FUNCTIONS: &[&str] = &["search", "match", "fullmatch", "findall", "sub", "split", "compile", "escape"];
const PATTERN_METHODS: &[&str] = &["search", "match", "fullmatch", "findall", "sub", "split"];
const MATCH_METHODS: &[&str] = &["group", "groups", "start", "end", "span"];

/// `obj.name`. Methods come back bound to their receiver.
pub fn get_attribute(obj: &Value, name: &str) -> Result<Value, EvalError> {
	let methods: &[&str] = match obj {
		Value::Str(_) => STR_METHODS,
		Value::Dict(_) => DICT_METHODS,
		Value::List(_) | Value::Tuple(_) => SEQ_METHODS,
		Value::Pattern(_) => PATTERN_METHODS,
		Value::Match(_) => MATCH_METHODS,
		Value::ReModule => RE_FUNCTIONS,
		_ => &[],
	};
	if methods.contains(&name) {
		return Ok(Value::Method(Rc::new((obj.clone(), name.to_string()))));
	}
	match (obj, name) {
		(Value::ReModule, "I" | "IGNORECASE") => return Ok(Value::Int(re::IGNORECASE)),
		(Value::ReModule, "M" | "MULTILINE") => return Ok(Value::Int(re::MULTILINE)),
		(Value::ReModule, "S" | "DOTALL") => return Ok(Value::Int(re::DOTALL)),
		(Value::ReModule, "X" | "VERBOSE") => return Ok(Value::Int(re::VERBOSE)),
		(Value::Pattern(p), "pattern") => return Ok(Value::str(&p.source)),
		(Value::Pattern(p), "flags") => return Ok(Value::Int(p.flags)),
		_ => {}
	}
	Err(EvalError::Attribute(match obj {
		Value::ReModule => format!("module 're' has no attribute '{}'", name),
		other => format!("'{}' object has no attribute '{}'", other.type_name(), name),
	}))
}

pub fn call_method(recv: &Value, name: &str, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	match recv {
		Value::Str(s) => str_method(s, name, args, keywords),
		Value::Dict(_) => dict_method(recv, name, args, keywords),
		Value::List(items) | Value::Tuple(items) => seq_method(recv, items, name, args, keywords),
		Value::ReModule => re_function(name, args, keywords),
		Value::Pattern(p) => pattern_method(p, name, args, keywords),
		Value::Match(_) => match_method(recv, name, args, keywords),
		other => Err(EvalError::Attribute(format!(
			"'{}' object has no attribute '{}'",
			other.type_name(),
			name
		))),
	}
}

fn strip_chars(b: &mut Bound, func: &str) -> Result<Option<Vec<char>>, EvalError> {
	match b.take(0) {
		None | Some(Value::None) => Ok(None),
		Some(Value::Str(chars)) => Ok(Some(chars.chars().collect())),
		Some(other) => Err(EvalError::Type(format!(
			"{} arg must be None or str, not {}",
			func,
			other.type_name()
		))),
	}
}

fn affixes(func: &str, v: Value) -> Result<Vec<Rc<str>>, EvalError> {
	let bad = |t: &str| {
		EvalError::Type(format!(
			"{} first arg must be str or a tuple of str, not {}",
			func, t
		))
	};
	match v {
		Value::Str(s) => Ok(vec![s]),
		Value::Tuple(items) => items
			.iter()
			.map(|i| match i {
				Value::Str(s) => Ok(s.clone()),
				other => Err(bad(other.type_name())),
			})
			.collect(),
		other => Err(bad(other.type_name())),
	}
}

fn str_method(s: &Rc<str>, name: &str, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	let text: &str = s;
	match name {
		"lower" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::str(text.to_lowercase()))
		}
		"upper" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::str(text.to_uppercase()))
		}
		"isdigit" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_numeric())))
		}
		"strip" | "lstrip" | "rstrip" => {
			let mut b = bind(name, args, keywords, &["chars"], 0)?;
			let chars = strip_chars(&mut b, name)?;
			let pred = |c: char| match &chars {
				Some(set) => set.contains(&c),
				None => c.is_whitespace(),
			};
			let out = match name {
				"strip" => text.trim_matches(pred),
				"lstrip" => text.trim_start_matches(pred),
				_ => text.trim_end_matches(pred),
			};
			Ok(Value::str(out))
		}
		"startswith" | "endswith" => {
			let mut b = bind(name, args, keywords, &["prefix"], 1)?;
			let candidates = affixes(name, b.required(0))?;
			Ok(Value::Bool(candidates.iter().any(|a| {
				if name == "startswith" {
					text.starts_with(a.as_ref())
				} else {
					text.ends_with(a.as_ref())
				}
			})))
		}
		"split" => {
			let mut b = bind(name, args, keywords, &["sep", "maxsplit"], 0)?;
			let sep = b.take(0);
			let maxsplit = expect_int(name, b.take(1), -1)?;
			let parts: Vec<Value> = match sep {
				None | Some(Value::None) => split_whitespace(text, maxsplit),
				Some(Value::Str(sep)) => {
					if sep.is_empty() {
						return Err(EvalError::Value("empty separator".to_string()));
					}
					if maxsplit < 0 {
						text.split(sep.as_ref()).map(Value::str).collect()
					} else {
						text.splitn(maxsplit as usize + 1, sep.as_ref()).map(Value::str).collect()
					}
				}
				Some(other) => {
					return Err(EvalError::Type(format!(
						"must be str or None, not {}",
						other.type_name()
					)))
				}
			};
			Ok(Value::list(parts))
		}
		"count" => {
			let mut b = bind(name, args, keywords, &["sub"], 1)?;
			let sub = expect_str(name, &b.required(0))?;
			let n = if sub.is_empty() {
				text.chars().count() + 1
			} else {
				text.matches(sub.as_ref()).count()
			};
			Ok(Value::Int(n as i64))
		}
		"find" => {
			let mut b = bind(name, args, keywords, &["sub"], 1)?;
			let sub = expect_str(name, &b.required(0))?;
			Ok(Value::Int(match text.find(sub.as_ref()) {
				Some(byte) => text[..byte].chars().count() as i64,
				None => -1,
			}))
		}
		"replace" => {
			let mut b = bind(name, args, keywords, &["old", "new", "count"], 2)?;
			let old = expect_str(name, &b.required(0))?;
			let new = expect_str(name, &b.required(1))?;
			let count = expect_int(name, b.take(2), -1)?;
			let text_len = text.chars().count();
			let found = if old.is_empty() {
				text_len + 1
			} else {
				text.matches(old.as_ref()).count()
			};
			let n = if count < 0 { found } else { found.min(count as usize) };
			check_len(
				text_len
					.saturating_sub(n.saturating_mul(old.chars().count()))
					.saturating_add(n.saturating_mul(new.chars().count())),
			)?;
			let out = if count < 0 {
				text.replace(old.as_ref(), &new)
			} else {
				text.replacen(old.as_ref(), &new, n)
			};
			Ok(Value::str(out))
		}
		"join" => {
			let mut b = bind(name, args, keywords, &["iterable"], 1)?;
			let items = iter_values(&b.required(0))?;
			let mut parts: Vec<&str> = Vec::with_capacity(items.len());
			let mut total = text.chars().count().saturating_mul(items.len().saturating_sub(1));
			for (i, item) in items.iter().enumerate() {
				match item {
					Value::Str(p) => {
						total = total.saturating_add(p.chars().count());
						parts.push(p.as_ref());
					}
					other => {
						return Err(EvalError::Type(format!(
							"sequence item {}: expected str instance, {} found",
							i,
							other.type_name()
						)))
					}
				}
			}
			check_len(total)?;
			Ok(Value::str(parts.join(text)))
		}
		_ => Err(EvalError::Attribute(format!("'str' object has no attribute '{}'", name))),
	}
}

fn split_whitespace(text: &str, maxsplit: i64) -> Vec<Value> {
	if maxsplit < 0 {
		return text.split_whitespace().map(Value::str).collect();
	}
	let mut parts = Vec::new();
	let mut rest = text.trim_start();
	while !rest.is_empty() {
		if parts.len() as i64 == maxsplit {
			parts.push(Value::str(rest));
			break;
		}
		match rest.find(char::is_whitespace) {
			Some(end) => {
				parts.push(Value::str(&rest[..end]));
				rest = rest[end..].trim_start();
			}
			None => {
				parts.push(Value::str(rest));
				break;
			}
		}
	}
	parts
}

fn dict_method(recv: &Value, name: &str, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	let Value::Dict(entries) = recv else {
		return Err(EvalError::Attribute(format!("'dict' object has no attribute '{}'", name)));
	};
	match name {
		"get" => {
			let mut b = bind(name, args, keywords, &["key", "default"], 1)?;
			let key = b.required(0);
			check_hashable(&key)?;
			Ok(recv.dict_get(&key).unwrap_or_else(|| b.take(1).unwrap_or(Value::None)))
		}
		"keys" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::list(entries.iter().map(|(k, _)| k.clone()).collect()))
		}
		"values" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::list(entries.iter().map(|(_, v)| v.clone()).collect()))
		}
		"items" => {
			bind(name, args, keywords, &[], 0)?;
			Ok(Value::list(
				entries
					.iter()
					.map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
					.collect(),
			))
		}
		_ => Err(EvalError::Attribute(format!("'dict' object has no attribute '{}'", name))),
	}
}

fn seq_method(
	recv: &Value,
	items: &[Value],
	name: &str,
	args: Vec<Value>,
	keywords: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
	let mut b = bind(name, args, keywords, &["value"], 1)?;
	let needle = b.required(0);
	match name {
		"count" => Ok(Value::Int(items.iter().filter(|v| py_eq(v, &needle)).count() as i64)),
		"index" => match items.iter().position(|v| py_eq(v, &needle)) {
			Some(i) => Ok(Value::Int(i as i64)),
			None => Err(EvalError::Value(match recv {
				Value::Tuple(_) => "tuple.index(x): x not in tuple".to_string(),
				_ => format!("{} is not in list", needle.repr_short(ERROR_REPR_LIMIT)),
			})),
		},
		_ => Err(EvalError::Attribute(format!(
			"'{}' object has no attribute '{}'",
			recv.type_name(),
			name
		))),
	}
}

fn anchor_for(name: &str) -> Option<Anchor> {
	match name {
		"search" => Some(Anchor::Search),
		"match" => Some(Anchor::Start),
		"fullmatch" => Some(Anchor::Full),
		_ => None,
	}
}

fn re_function(name: &str, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	if let Some(anchor) = anchor_for(name) {
		let mut b = bind(name, args, keywords, &["pattern", "string", "flags"], 2)?;
		let flags = expect_int(name, b.take(2), 0)?;
		let pattern = re::compile(&b.required(0), flags)?;
		let text = expect_str(name, &b.required(1))?;
		return re::find(&pattern, &text, anchor);
	}
	match name {
		"findall" => {
			let mut b = bind(name, args, keywords, &["pattern", "string", "flags"], 2)?;
			let flags = expect_int(name, b.take(2), 0)?;
			let pattern = re::compile(&b.required(0), flags)?;
			let text = expect_str(name, &b.required(1))?;
			Ok(re::findall(&pattern, &text))
		}
		"sub" => {
			let mut b = bind(name, args, keywords, &["pattern", "repl", "string", "count", "flags"], 3)?;
			let count = expect_int(name, b.take(3), 0)?.max(0) as usize;
			let flags = expect_int(name, b.take(4), 0)?;
			let pattern = re::compile(&b.required(0), flags)?;
			let repl = expect_str(name, &b.required(1))?;
			let text = expect_str(name, &b.required(2))?;
			re::sub(&pattern, &repl, &text, count)
		}
		"split" => {
			let mut b = bind(name, args, keywords, &["pattern", "string", "maxsplit", "flags"], 2)?;
			let maxsplit = expect_int(name, b.take(2), 0)?.max(0) as usize;
			let flags = expect_int(name, b.take(3), 0)?;
			let pattern = re::compile(&b.required(0), flags)?;
			let text = expect_str(name, &b.required(1))?;
			Ok(re::split(&pattern, &text, maxsplit))
		}
		"compile" => {
			let mut b = bind(name, args, keywords, &["pattern", "flags"], 1)?;
			let flags = expect_int(name, b.take(1), 0)?;
			Ok(Value::Pattern(re::compile(&b.required(0), flags)?))
		}
		"escape" => {
			let mut b = bind(name, args, keywords, &["pattern"], 1)?;
			let text = expect_str(name, &b.required(0))?;
			Ok(Value::str(regex::escape(&text)))
		}
		_ => Err(EvalError::Attribute(format!("module 're' has no attribute '{}'", name))),
	}
}

fn pattern_method(
	pattern: &Rc<Pattern>,
	name: &str,
	args: Vec<Value>,
	keywords: Vec<(String, Value)>,
) -> Result<Value, EvalError> {
	if let Some(anchor) = anchor_for(name) {
		let mut b = bind(name, args, keywords, &["string"], 1)?;
		let text = expect_str(name, &b.required(0))?;
		return re::find(pattern, &text, anchor);
	}
	match name {
		"findall" => {
			let mut b = bind(name, args, keywords, &["string"], 1)?;
			let text = expect_str(name, &b.required(0))?;
			Ok(re::findall(pattern, &text))
		}
		"sub" => {
			let mut b = bind(name, args, keywords, &["repl", "string", "count"], 2)?;
			let repl = expect_str(name, &b.required(0))?;
			let text = expect_str(name, &b.required(1))?;
			let count = expect_int(name, b.take(2), 0)?.max(0) as usize;
			re::sub(pattern, &repl, &text, count)
		}
		"split" => {
			let mut b = bind(name, args, keywords, &["string", "maxsplit"], 1)?;
			let text = expect_str(name, &b.required(0))?;
			let maxsplit = expect_int(name, b.take(1), 0)?.max(0) as usize;
			Ok(re::split(pattern, &text, maxsplit))
		}
		_ => Err(EvalError::Attribute(format!(
			"'re.Pattern' object has no attribute '{}'",
			name
		))),
	}
}

fn group_index(m: &MatchValue, key: &Value) -> Result<usize, EvalError> {
	let no_such = || EvalError::Index("no such group".to_string());
	match key {
		Value::Str(name) => m
			.names
			.iter()
			.position(|n| n.as_deref() == Some(name.as_ref()))
			.ok_or_else(no_such),
		other => {
			let i = other.as_index().ok_or_else(no_such)?;
			if i < 0 || i as usize >= m.groups.len() {
				return Err(no_such());
			}
			Ok(i as usize)
		}
	}
}

fn match_method(recv: &Value, name: &str, args: Vec<Value>, keywords: Vec<(String, Value)>) -> Result<Value, EvalError> {
	let Value::Match(m) = recv else {
		return Err(EvalError::Attribute(format!("object has no attribute '{}'", name)));
	};
	let group_value = |i: usize| m.groups[i].as_ref().map_or(Value::None, Value::str);
	match name {
		"group" => {
			if !keywords.is_empty() {
				return Err(EvalError::Type("group() takes no keyword arguments".to_string()));
			}
			match args.len() {
				0 => Ok(group_value(0)),
				1 => Ok(group_value(group_index(m, &args[0])?)),
				_ => {
					let picked: Result<Vec<Value>, EvalError> =
						args.iter().map(|a| group_index(m, a).map(group_value)).collect();
					Ok(Value::tuple(picked?))
				}
			}
		}
		"groups" => {
			let mut b = bind(name, args, keywords, &["default"], 0)?;
			let default = b.take(0).unwrap_or(Value::None);
			Ok(Value::tuple(
				m.groups
					.iter()
					.skip(1)
					.map(|g| g.as_ref().map_or(default.clone(), Value::str))
					.collect(),
			))
		}
		"start" | "end" | "span" => {
			let mut b = bind(name, args, keywords, &["group"], 0)?;
			let i = match b.take(0) {
				None => 0,
				Some(key) => group_index(m, &key)?,
			};
			let (start, end) = match m.spans[i] {
				Some((s, e)) => (s as i64, e as i64),
				None => (-1, -1),
			};
			Ok(match name {
				"start" => Value::Int(start),
				"end" => Value::Int(end),
				_ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
			})
		}
		_ => Err(EvalError::Attribute(format!(
			"'re.Match' object has no attribute '{}'",
			name
		))),
	}
}

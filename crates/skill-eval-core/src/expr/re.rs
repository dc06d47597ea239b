//! The subset of Python's `re` module available to assertions, backed by the
//! `regex` crate. Backreferences and lookaround are not available.

use std::rc::Rc;

use regex::{Captures, Regex, RegexBuilder};

use super::interp::{check_len, ERROR_REPR_LIMIT};
use super::value::{MatchValue, Pattern, Value};
use super::EvalError;

pub const IGNORECASE: i64 = 2;
pub const MULTILINE: i64 = 8;
pub const DOTALL: i64 = 16;
pub const VERBOSE: i64 = 64;

/// Compiled program size limit for patterns written in assertions.
const REGEX_SIZE_LIMIT: usize = 1 << 22;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
	Search,
	Start,
	Full,
}

fn translate(source: &str, flags: i64, anchor: Anchor) -> String {
	let mut prefix = String::new();
	for (bit, flag) in [(IGNORECASE, 'i'), (MULTILINE, 'm'), (DOTALL, 's'), (VERBOSE, 'x')] {
		if flags & bit != 0 {
			prefix.push(flag);
		}
	}
	let body = source.replace("\\Z", "\\z");
	let body = match anchor {
		Anchor::Search => body,
		Anchor::Start => format!("\\A(?:{})", body),
		Anchor::Full => format!("\\A(?:{})\\z", body),
	};
	if prefix.is_empty() {
		body
	} else {
		format!("(?{}){}", prefix, body)
	}
}

fn build(source: &str, flags: i64, anchor: Anchor) -> Result<Regex, EvalError> {
	RegexBuilder::new(&translate(source, flags, anchor))
		.size_limit(REGEX_SIZE_LIMIT)
		.build()
		.map_err(|e| {
			let detail = e.to_string().lines().last().unwrap_or_default().trim().to_string();
			EvalError::Regex(format!("bad pattern {}: {}", Value::str(source).repr_short(ERROR_REPR_LIMIT), detail))
		})
}

/// `re.compile(pattern, flags)`; a compiled pattern passes through unchanged.
pub fn compile(pattern: &Value, flags: i64) -> Result<Rc<Pattern>, EvalError> {
	match pattern {
		Value::Pattern(p) => {
			if flags != 0 {
				return Err(EvalError::Value(
					"cannot process flags argument with a compiled pattern".to_string(),
				));
			}
			Ok(p.clone())
		}
		Value::Str(s) => Ok(Rc::new(Pattern {
			source: s.to_string(),
			flags,
			regex: build(s, flags, Anchor::Search)?,
		})),
		other => Err(EvalError::Type(format!(
			"first argument must be string or compiled pattern, not {}",
			other.type_name()
		))),
	}
}

fn match_value(regex: &Regex, caps: &Captures<'_>, text: &str) -> Value {
	let char_offset = |byte: usize| text[..byte].chars().count();
	let mut groups = Vec::with_capacity(caps.len());
	let mut spans = Vec::with_capacity(caps.len());
	for i in 0..caps.len() {
		match caps.get(i) {
			Some(m) => {
				groups.push(Some(m.as_str().to_string()));
				spans.push(Some((char_offset(m.start()), char_offset(m.end()))));
			}
			None => {
				groups.push(None);
				spans.push(None);
			}
		}
	}
	let names = regex.capture_names().map(|n| n.map(str::to_string)).collect();
	Value::Match(Rc::new(MatchValue { groups, spans, names }))
}

/// `search`, `match` and `fullmatch` differ only in anchoring.
pub fn find(pattern: &Pattern, text: &str, anchor: Anchor) -> Result<Value, EvalError> {
	let anchored;
	let regex = match anchor {
		Anchor::Search => &pattern.regex,
		_ => {
			anchored = build(&pattern.source, pattern.flags, anchor)?;
			&anchored
		}
	};
	Ok(match regex.captures(text) {
		Some(caps) => match_value(regex, &caps, text),
		None => Value::None,
	})
}

pub fn findall(pattern: &Pattern, text: &str) -> Value {
	let groups = pattern.regex.captures_len() - 1;
	let group_str = |caps: &Captures<'_>, i: usize| {
		Value::str(caps.get(i).map(|m| m.as_str()).unwrap_or_default())
	};
	let items = pattern
		.regex
		.captures_iter(text)
		.map(|caps| match groups {
			0 => group_str(&caps, 0),
			1 => group_str(&caps, 1),
			n => Value::tuple((1..=n).map(|i| group_str(&caps, i)).collect()),
		})
		.collect();
	Value::list(items)
}

/// Rewrite a Python replacement template (`\1`, `\g<name>`) into the
/// `regex` crate's `${1}` form.
pub fn translate_replacement(repl: &str) -> String {
	let chars: Vec<char> = repl.chars().collect();
	let mut out = String::with_capacity(repl.len());
	let mut i = 0;
	while i < chars.len() {
		let c = chars[i];
		if c == '$' {
			out.push_str("$$");
			i += 1;
			continue;
		}
		if c != '\\' || i + 1 == chars.len() {
			out.push(c);
			i += 1;
			continue;
		}
		let next = chars[i + 1];
		if next.is_ascii_digit() {
			let mut j = i + 1;
			while j < chars.len() && j < i + 3 && chars[j].is_ascii_digit() {
				j += 1;
			}
			let group: String = chars[i + 1..j].iter().collect();
			out.push_str(&format!("${{{}}}", group));
			i = j;
			continue;
		}
		if next == 'g' && chars.get(i + 2) == Some(&'<') {
			if let Some(close) = chars[i + 3..].iter().position(|c| *c == '>') {
				let name: String = chars[i + 3..i + 3 + close].iter().collect();
				out.push_str(&format!("${{{}}}", name));
				i += 4 + close;
				continue;
			}
		}
		match next {
			'n' => out.push('\n'),
			't' => out.push('\t'),
			'\\' => out.push('\\'),
			other => {
				out.push('\\');
				out.push(other);
			}
		}
		i += 2;
	}
	out
}

/// The output size is bounded before it is built: each group reference in
/// the template expands to at most the whole match.
pub fn sub(pattern: &Pattern, repl: &str, text: &str, count: usize) -> Result<Value, EvalError> {
	let template = translate_replacement(repl);
	let refs = template.matches('$').count();
	let mut bound = text.len();
	for m in pattern.regex.find_iter(text).take(if count == 0 { usize::MAX } else { count }) {
		bound = bound
			.saturating_add(template.len())
			.saturating_add(refs.saturating_mul(m.len()));
		check_len(bound)?;
	}
	Ok(Value::str(pattern.regex.replacen(text, count, template.as_str())))
}

pub fn split(pattern: &Pattern, text: &str, maxsplit: usize) -> Value {
	let parts: Vec<Value> = if maxsplit == 0 {
		pattern.regex.split(text).map(Value::str).collect()
	} else {
		pattern.regex.splitn(text, maxsplit + 1).map(Value::str).collect()
	};
	Value::list(parts)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pattern(src: &str, flags: i64) -> Rc<Pattern> {
		compile(&Value::str(src), flags).unwrap()
	}

	#[test]
	fn test_anchoring() {
		let p = pattern(r"\d+", 0);
		assert!(matches!(find(&p, "abc 42", Anchor::Search).unwrap(), Value::Match(_)));
		assert!(matches!(find(&p, "abc 42", Anchor::Start).unwrap(), Value::None));
		assert!(matches!(find(&p, "42x", Anchor::Full).unwrap(), Value::None));
		assert!(matches!(find(&p, "42", Anchor::Full).unwrap(), Value::Match(_)));
	}

	#[test]
	fn test_ignorecase_flag() {
		let p = pattern("overview", IGNORECASE);
		assert!(matches!(find(&p, "## Overview", Anchor::Search).unwrap(), Value::Match(_)));
	}

	#[test]
	fn test_findall_with_groups() {
		let p = pattern(r"(\w+)=(\d+)", 0);
		assert_eq!(findall(&p, "a=1 b=2").repr(), "[('a', '1'), ('b', '2')]");
		let p = pattern(r"x(\d)", 0);
		assert_eq!(findall(&p, "x1 x2").repr(), "['1', '2']");
	}

	#[test]
	fn test_python_replacement_template() {
		assert_eq!(translate_replacement(r"<\1>"), "<${1}>");
		assert_eq!(translate_replacement(r"\g<word> costs $5"), "${word} costs $$5");
		let p = pattern(r"(\w+)@", 0);
		assert_eq!(sub(&p, r"\1 at ", "me@host", 0).unwrap().repr(), "'me at host'");
	}

	#[test]
	fn test_bad_pattern_is_regex_error() {
		let err = compile(&Value::str("(unclosed"), 0).unwrap_err();
		assert_eq!(err.kind(), "re.error");
		assert!(err.to_string().starts_with("bad pattern '(unclosed'"));
	}
}

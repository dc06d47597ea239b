use std::rc::Rc;

use super::builtins::{call_builtin, call_method, get_attribute, iter_values};
use super::parser::{Arg, BinOp, CmpOp, Comprehension, Const, Expr, Target, UnaryOp};
use super::value::{py_cmp, py_eq, py_is, Builtin, Number, Value};
use super::{EvalError, Namespace};

/// Upper bound on evaluation steps for a single assertion.
const MAX_STEPS: usize = 1_000_000;

/// Upper bound on the length of any sequence an assertion builds.
pub const MAX_SEQUENCE_LEN: usize = 1 << 20;

/// Longest value repr quoted inside an error message.
pub const ERROR_REPR_LIMIT: usize = 200;

pub struct Interpreter<'g> {
	globals: &'g Namespace,
	locals: Vec<(String, Value)>,
	steps: usize,
}

impl<'g> Interpreter<'g> {
	pub fn new(globals: &'g Namespace) -> Self {
		Self {
			globals,
			locals: Vec::new(),
			steps: 0,
		}
	}

	fn tick(&mut self) -> Result<(), EvalError> {
		self.steps += 1;
		if self.steps > MAX_STEPS {
			return Err(EvalError::Limit("evaluation step limit exceeded".to_string()));
		}
		Ok(())
	}

	fn lookup(&self, name: &str) -> Result<Value, EvalError> {
		if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
			return Ok(v.clone());
		}
		self.globals
			.get(name)
			.cloned()
			.ok_or_else(|| EvalError::Name(name.to_string()))
	}

	pub fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
		self.tick()?;
		match expr {
			Expr::Const(c) => Ok(match c {
				Const::None => Value::None,
				Const::Bool(b) => Value::Bool(*b),
				Const::Int(i) => Value::Int(*i),
				Const::Float(f) => Value::Float(*f),
				Const::Str(s) => Value::str(s),
			}),
			Expr::Name(name) => self.lookup(name),
			Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
			Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
			Expr::Dict(entries) => {
				let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
				for (k, v) in entries {
					let key = self.eval(k)?;
					check_hashable(&key)?;
					let value = self.eval(v)?;
					match out.iter_mut().find(|(existing, _)| py_eq(existing, &key)) {
						Some(slot) => slot.1 = value,
						None => out.push((key, value)),
					}
				}
				Ok(Value::Dict(Rc::new(out)))
			}
			Expr::Unary(op, operand) => {
				let v = self.eval(operand)?;
				unary(*op, &v)
			}
			Expr::Binary(op, left, right) => {
				let l = self.eval(left)?;
				let r = self.eval(right)?;
				binary(*op, &l, &r)
			}
			Expr::And(left, right) => {
				let l = self.eval(left)?;
				if !l.truthy() {
					return Ok(l);
				}
				self.eval(right)
			}
			Expr::Or(left, right) => {
				let l = self.eval(left)?;
				if l.truthy() {
					return Ok(l);
				}
				self.eval(right)
			}
			Expr::Compare(first, rest) => {
				let mut left = self.eval(first)?;
				for (op, right) in rest {
					let right = self.eval(right)?;
					if !compare(*op, &left, &right)? {
						return Ok(Value::Bool(false));
					}
					left = right;
				}
				Ok(Value::Bool(true))
			}
			Expr::IfElse { cond, then, otherwise } => {
				if self.eval(cond)?.truthy() {
					self.eval(then)
				} else {
					self.eval(otherwise)
				}
			}
			Expr::Call(func, args) => self.call(func, args),
			Expr::Attr(object, name) => {
				let v = self.eval(object)?;
				get_attribute(&v, name)
			}
			Expr::Index(object, index) => {
				let obj = self.eval(object)?;
				let idx = self.eval(index)?;
				subscript(&obj, &idx)
			}
			Expr::Slice { object, lower, upper, step } => {
				let obj = self.eval(object)?;
				let lower = self.eval_opt(lower.as_deref())?;
				let upper = self.eval_opt(upper.as_deref())?;
				let step = self.eval_opt(step.as_deref())?;
				slice(&obj, lower, upper, step)
			}
			Expr::Comprehension(comp) => {
				let mut out = Vec::new();
				self.run_comprehension(comp, 0, &mut |v| {
					if out.len() >= MAX_SEQUENCE_LEN {
						return Err(EvalError::Limit("MemoryError: comprehension result too large".to_string()));
					}
					out.push(v);
					Ok(true)
				})?;
				Ok(Value::list(out))
			}
		}
	}

	fn eval_all(&mut self, items: &[Expr]) -> Result<Vec<Value>, EvalError> {
		items.iter().map(|e| self.eval(e)).collect()
	}

	fn eval_opt(&mut self, expr: Option<&Expr>) -> Result<Option<Value>, EvalError> {
		expr.map(|e| self.eval(e)).transpose()
	}

	fn call(&mut self, func: &Expr, args: &[Arg]) -> Result<Value, EvalError> {
		let callee = self.eval(func)?;

		// any()/all() over a generator stop at the first deciding element.
		if let Value::Builtin(b @ (Builtin::Any | Builtin::All)) = callee {
			if let [Arg::Positional(Expr::Comprehension(comp))] = args {
				return self.any_all_lazy(b, comp);
			}
		}

		let mut positional = Vec::new();
		let mut keywords = Vec::new();
		for arg in args {
			match arg {
				Arg::Positional(e) => positional.push(self.eval(e)?),
				Arg::Keyword(name, e) => {
					if keywords.iter().any(|(k, _): &(String, Value)| k == name) {
						return Err(EvalError::Syntax(format!("keyword argument repeated: {}", name)));
					}
					let v = self.eval(e)?;
					keywords.push((name.clone(), v));
				}
			}
		}

		match callee {
			Value::Builtin(b) => call_builtin(b, positional, keywords),
			Value::Method(bound) => call_method(&bound.0, &bound.1, positional, keywords),
			other => Err(EvalError::Type(format!("'{}' object is not callable", other.type_name()))),
		}
	}

	fn any_all_lazy(&mut self, which: Builtin, comp: &Comprehension) -> Result<Value, EvalError> {
		let want = which == Builtin::Any;
		let mut decided = false;
		self.run_comprehension(comp, 0, &mut |v| {
			if v.truthy() == want {
				decided = true;
				return Ok(false);
			}
			Ok(true)
		})?;
		Ok(Value::Bool(if want { decided } else { !decided }))
	}

	/// Drive clause `idx` of a comprehension, feeding produced elements to
	/// `sink`. Returns `Ok(false)` once the sink asked to stop.
	fn run_comprehension(
		&mut self,
		comp: &Comprehension,
		idx: usize,
		sink: &mut dyn FnMut(Value) -> Result<bool, EvalError>,
	) -> Result<bool, EvalError> {
		let Some(clause) = comp.clauses.get(idx) else {
			let v = self.eval(&comp.element)?;
			return sink(v);
		};

		let iterable = self.eval(&clause.iter)?;
		let items = iter_values(&iterable)?;
		let mark = self.locals.len();

		for item in items {
			self.tick()?;
			self.bind(&clause.target, item)?;
			let mut keep = true;
			for cond in &clause.conditions {
				if !self.eval(cond)?.truthy() {
					keep = false;
					break;
				}
			}
			let proceed = if keep { self.run_comprehension(comp, idx + 1, sink) } else { Ok(true) };
			self.locals.truncate(mark);
			if !proceed? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	fn bind(&mut self, target: &Target, value: Value) -> Result<(), EvalError> {
		match target {
			Target::Name(name) => {
				self.locals.push((name.clone(), value));
				Ok(())
			}
			Target::Tuple(targets) => {
				let items = match &value {
					Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Dict(_) => iter_values(&value)?,
					other => {
						return Err(EvalError::Type(format!(
							"cannot unpack non-iterable {} object",
							other.type_name()
						)))
					}
				};
				if items.len() < targets.len() {
					return Err(EvalError::Value(format!(
						"not enough values to unpack (expected {}, got {})",
						targets.len(),
						items.len()
					)));
				}
				if items.len() > targets.len() {
					return Err(EvalError::Value(format!(
						"too many values to unpack (expected {})",
						targets.len()
					)));
				}
				for (t, v) in targets.iter().zip(items) {
					self.bind(t, v)?;
				}
				Ok(())
			}
		}
	}
}

pub fn check_hashable(v: &Value) -> Result<(), EvalError> {
	match v {
		Value::List(_) | Value::Dict(_) => Err(EvalError::Type(format!("unhashable type: '{}'", v.type_name()))),
		_ => Ok(()),
	}
}

fn unary(op: UnaryOp, v: &Value) -> Result<Value, EvalError> {
	let symbol = match op {
		UnaryOp::Not => return Ok(Value::Bool(!v.truthy())),
		UnaryOp::Neg => "-",
		UnaryOp::Pos => "+",
	};
	match (op, v.as_number()) {
		(UnaryOp::Neg, Some(Number::Int(i))) => i
			.checked_neg()
			.map(Value::Int)
			.ok_or_else(|| EvalError::Overflow("integer overflow".to_string())),
		(UnaryOp::Neg, Some(Number::Float(f))) => Ok(Value::Float(-f)),
		(UnaryOp::Pos, Some(Number::Int(i))) => Ok(Value::Int(i)),
		(UnaryOp::Pos, Some(Number::Float(f))) => Ok(Value::Float(f)),
		_ => Err(EvalError::Type(format!(
			"bad operand type for unary {}: '{}'",
			symbol,
			v.type_name()
		))),
	}
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
	if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
		return arithmetic(op, a, b);
	}
	match (op, l, r) {
		(BinOp::Add, Value::Str(a), Value::Str(b)) => {
			check_len(a.chars().count() + b.chars().count())?;
			Ok(Value::str(format!("{}{}", a, b)))
		}
		(BinOp::Add, Value::List(a), Value::List(b)) => {
			check_len(a.len() + b.len())?;
			Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
		}
		(BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
			check_len(a.len() + b.len())?;
			Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
		}
		(BinOp::Add, Value::Str(_), other) => Err(EvalError::Type(format!(
			"can only concatenate str (not \"{}\") to str",
			other.type_name()
		))),
		(BinOp::Add, Value::List(_), other) => Err(EvalError::Type(format!(
			"can only concatenate list (not \"{}\") to list",
			other.type_name()
		))),
		(BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
			if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) && n.as_index().is_some() =>
		{
			let count = n.as_index().unwrap_or(0).max(0) as usize;
			repeat(seq, count)
		}
		_ => Err(EvalError::Type(format!(
			"unsupported operand type(s) for {}: '{}' and '{}'",
			op.symbol(),
			l.type_name(),
			r.type_name()
		))),
	}
}

pub fn check_len(len: usize) -> Result<(), EvalError> {
	if len > MAX_SEQUENCE_LEN {
		return Err(EvalError::Limit("MemoryError: sequence too large".to_string()));
	}
	Ok(())
}

fn repeat(seq: &Value, count: usize) -> Result<Value, EvalError> {
	match seq {
		Value::Str(s) => {
			check_len(s.chars().count().saturating_mul(count))?;
			Ok(Value::str(s.repeat(count)))
		}
		Value::List(items) | Value::Tuple(items) => {
			check_len(items.len().saturating_mul(count))?;
			let mut out = Vec::with_capacity(items.len() * count);
			for _ in 0..count {
				out.extend(items.iter().cloned());
			}
			Ok(match seq {
				Value::Tuple(_) => Value::tuple(out),
				_ => Value::list(out),
			})
		}
		_ => Ok(seq.clone()),
	}
}

fn arithmetic(op: BinOp, a: Number, b: Number) -> Result<Value, EvalError> {
	let overflow = || EvalError::Overflow("integer overflow".to_string());
	match (a, b) {
		(Number::Int(x), Number::Int(y)) => match op {
			BinOp::Add => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
			BinOp::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
			BinOp::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
			BinOp::Div => {
				if y == 0 {
					return Err(EvalError::ZeroDivision("division by zero".to_string()));
				}
				Ok(Value::Float(x as f64 / y as f64))
			}
			BinOp::FloorDiv | BinOp::Mod => {
				if y == 0 {
					return Err(EvalError::ZeroDivision("integer division or modulo by zero".to_string()));
				}
				let q = x.checked_div(y).ok_or_else(overflow)?;
				let r = x % y;
				let adjust = r != 0 && ((r < 0) != (y < 0));
				Ok(Value::Int(match op {
					BinOp::FloorDiv => if adjust { q - 1 } else { q },
					_ => if adjust { r + y } else { r },
				}))
			}
		},
		(a, b) => {
			let (x, y) = (a.as_f64(), b.as_f64());
			match op {
				BinOp::Add => Ok(Value::Float(x + y)),
				BinOp::Sub => Ok(Value::Float(x - y)),
				BinOp::Mul => Ok(Value::Float(x * y)),
				BinOp::Div => {
					if y == 0.0 {
						return Err(EvalError::ZeroDivision("float division by zero".to_string()));
					}
					Ok(Value::Float(x / y))
				}
				BinOp::FloorDiv => {
					if y == 0.0 {
						return Err(EvalError::ZeroDivision("float floor division by zero".to_string()));
					}
					Ok(Value::Float((x / y).floor()))
				}
				BinOp::Mod => {
					if y == 0.0 {
						return Err(EvalError::ZeroDivision("float modulo".to_string()));
					}
					let r = x % y;
					Ok(Value::Float(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }))
				}
			}
		}
	}
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, EvalError> {
	use std::cmp::Ordering::*;
	Ok(match op {
		CmpOp::Eq => py_eq(l, r),
		CmpOp::Ne => !py_eq(l, r),
		CmpOp::Lt => matches!(py_cmp(l, r, "<")?, Some(Less)),
		CmpOp::Le => matches!(py_cmp(l, r, "<=")?, Some(Less | Equal)),
		CmpOp::Gt => matches!(py_cmp(l, r, ">")?, Some(Greater)),
		CmpOp::Ge => matches!(py_cmp(l, r, ">=")?, Some(Greater | Equal)),
		CmpOp::In => contains(r, l)?,
		CmpOp::NotIn => !contains(r, l)?,
		CmpOp::Is => py_is(l, r),
		CmpOp::IsNot => !py_is(l, r),
	})
}

fn contains(container: &Value, item: &Value) -> Result<bool, EvalError> {
	match container {
		Value::Str(haystack) => match item {
			Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
			other => Err(EvalError::Type(format!(
				"'in <string>' requires string as left operand, not {}",
				other.type_name()
			))),
		},
		Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
		Value::Dict(entries) => {
			check_hashable(item)?;
			Ok(entries.iter().any(|(k, _)| py_eq(k, item)))
		}
		other => Err(EvalError::Type(format!(
			"argument of type '{}' is not iterable",
			other.type_name()
		))),
	}
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
	let len = len as i64;
	let i = if idx < 0 { idx + len } else { idx };
	(0..len).contains(&i).then_some(i as usize)
}

pub fn subscript(obj: &Value, idx: &Value) -> Result<Value, EvalError> {
	match obj {
		Value::List(items) | Value::Tuple(items) => {
			let what = obj.type_name();
			let i = idx.as_index().ok_or_else(|| {
				EvalError::Type(format!(
					"{} indices must be integers or slices, not {}",
					what,
					idx.type_name()
				))
			})?;
			normalize_index(i, items.len())
				.map(|i| items[i].clone())
				.ok_or_else(|| EvalError::Index(format!("{} index out of range", what)))
		}
		Value::Str(s) => {
			let i = idx.as_index().ok_or_else(|| {
				EvalError::Type(format!("string indices must be integers, not '{}'", idx.type_name()))
			})?;
			let chars: Vec<char> = s.chars().collect();
			normalize_index(i, chars.len())
				.map(|i| Value::str(chars[i].to_string()))
				.ok_or_else(|| EvalError::Index("string index out of range".to_string()))
		}
		Value::Dict(_) => {
			check_hashable(idx)?;
			obj.dict_get(idx).ok_or_else(|| EvalError::Key(idx.repr_short(ERROR_REPR_LIMIT)))
		}
		Value::Match(_) => call_method(obj, "group", vec![idx.clone()], Vec::new()),
		other => Err(EvalError::Type(format!(
			"'{}' object is not subscriptable",
			other.type_name()
		))),
	}
}

fn slice(obj: &Value, lower: Option<Value>, upper: Option<Value>, step: Option<Value>) -> Result<Value, EvalError> {
	let as_bound = |v: Option<Value>| -> Result<Option<i64>, EvalError> {
		match v {
			None | Some(Value::None) => Ok(None),
			Some(v) => v.as_index().map(Some).ok_or_else(|| {
				EvalError::Type("slice indices must be integers or None or have an __index__ method".to_string())
			}),
		}
	};
	let lower = as_bound(lower)?;
	let upper = as_bound(upper)?;
	let step = as_bound(step)?.unwrap_or(1);
	if step == 0 {
		return Err(EvalError::Value("slice step cannot be zero".to_string()));
	}

	match obj {
		Value::Str(s) => {
			let chars: Vec<char> = s.chars().collect();
			let picked: String = slice_indices(chars.len(), lower, upper, step).into_iter().map(|i| chars[i]).collect();
			Ok(Value::str(picked))
		}
		Value::List(items) | Value::Tuple(items) => {
			let picked: Vec<Value> = slice_indices(items.len(), lower, upper, step)
				.into_iter()
				.map(|i| items[i].clone())
				.collect();
			Ok(match obj {
				Value::Tuple(_) => Value::tuple(picked),
				_ => Value::list(picked),
			})
		}
		other => Err(EvalError::Type(format!(
			"'{}' object is not subscriptable",
			other.type_name()
		))),
	}
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
	let len = len as i64;
	let adjust = |v: Option<i64>, default_fwd: i64, default_back: i64| -> i64 {
		match v {
			None => if step > 0 { default_fwd } else { default_back },
			Some(mut x) => {
				if x < 0 {
					x += len;
					if x < 0 {
						x = if step < 0 { -1 } else { 0 };
					}
				} else if x >= len {
					x = if step < 0 { len - 1 } else { len };
				}
				x
			}
		}
	};
	let start = adjust(lower, 0, len - 1);
	let stop = adjust(upper, len, -1);

	let mut out = Vec::new();
	let mut i = start;
	while (step > 0 && i < stop) || (step < 0 && i > stop) {
		out.push(i as usize);
		i += step;
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_floor_division_and_modulo_follow_python() {
		assert!(matches!(arithmetic(BinOp::FloorDiv, Number::Int(-7), Number::Int(2)), Ok(Value::Int(-4))));
		assert!(matches!(arithmetic(BinOp::Mod, Number::Int(-7), Number::Int(2)), Ok(Value::Int(1))));
		assert!(matches!(arithmetic(BinOp::Mod, Number::Int(7), Number::Int(-2)), Ok(Value::Int(-1))));
	}

	#[test]
	fn test_slice_indices() {
		assert_eq!(slice_indices(5, None, None, -1), vec![4, 3, 2, 1, 0]);
		assert_eq!(slice_indices(5, Some(-2), None, 1), vec![3, 4]);
		assert_eq!(slice_indices(5, Some(1), Some(100), 2), vec![1, 3]);
		assert!(slice_indices(0, None, None, 1).is_empty());
	}

	#[test]
	fn test_repetition_is_capped() {
		let err = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(i64::MAX)).unwrap_err();
		assert!(matches!(err, EvalError::Limit(_)));
	}
}

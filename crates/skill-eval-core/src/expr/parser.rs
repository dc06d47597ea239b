use super::lexer::{tokenize, Spanned, Token};
use super::EvalError;

/// Deepest nesting the parser accepts before giving up. Each link of an
/// operator or postfix chain counts as a level.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
	None,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
	Add,
	Sub,
	Mul,
	Div,
	FloorDiv,
	Mod,
}

impl BinOp {
	pub fn symbol(self) -> &'static str {
		match self {
			BinOp::Add => "+",
			BinOp::Sub => "-",
			BinOp::Mul => "*",
			BinOp::Div => "/",
			BinOp::FloorDiv => "//",
			BinOp::Mod => "%",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CmpOp {
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	In,
	NotIn,
	Is,
	IsNot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
	Neg,
	Pos,
	Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
	Positional(Expr),
	Keyword(String, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
	Name(String),
	Tuple(Vec<Target>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForClause {
	pub target: Target,
	pub iter: Expr,
	pub conditions: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComprehensionKind {
	List,
	Generator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
	pub kind: ComprehensionKind,
	pub element: Expr,
	pub clauses: Vec<ForClause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
	Const(Const),
	Name(String),
	List(Vec<Expr>),
	Tuple(Vec<Expr>),
	Dict(Vec<(Expr, Expr)>),
	Unary(UnaryOp, Box<Expr>),
	Binary(BinOp, Box<Expr>, Box<Expr>),
	And(Box<Expr>, Box<Expr>),
	Or(Box<Expr>, Box<Expr>),
	Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
	IfElse {
		cond: Box<Expr>,
		then: Box<Expr>,
		otherwise: Box<Expr>,
	},
	Call(Box<Expr>, Vec<Arg>),
	Attr(Box<Expr>, String),
	Index(Box<Expr>, Box<Expr>),
	Slice {
		object: Box<Expr>,
		lower: Option<Box<Expr>>,
		upper: Option<Box<Expr>>,
		step: Option<Box<Expr>>,
	},
	Comprehension(Box<Comprehension>),
}

/// Parse a whole assertion into a single expression.
pub fn parse(source: &str) -> Result<Expr, EvalError> {
	let tokens = tokenize(source)?;
	let mut parser = Parser { tokens, pos: 0, depth: 0 };
	if parser.peek() == &Token::Eof {
		return Err(EvalError::Syntax("invalid syntax (<assertion>): empty expression".to_string()));
	}
	let expr = parser.expression()?;
	parser.expect(Token::Eof)?;
	Ok(expr)
}

struct Parser {
	tokens: Vec<Spanned>,
	pos: usize,
	depth: usize,
}

impl Parser {
	fn peek(&self) -> &Token {
		&self.tokens[self.pos].token
	}

	fn peek_at(&self, offset: usize) -> &Token {
		let idx = (self.pos + offset).min(self.tokens.len() - 1);
		&self.tokens[idx].token
	}

	fn advance(&mut self) -> Token {
		let token = self.tokens[self.pos].token.clone();
		if self.pos < self.tokens.len() - 1 {
			self.pos += 1;
		}
		token
	}

	fn eat(&mut self, token: &Token) -> bool {
		if self.peek() == token {
			self.advance();
			true
		} else {
			false
		}
	}

	fn expect(&mut self, token: Token) -> Result<(), EvalError> {
		if self.eat(&token) {
			Ok(())
		} else {
			Err(self.unexpected())
		}
	}

	fn unexpected(&self) -> EvalError {
		let spanned = &self.tokens[self.pos];
		if spanned.token == Token::Assign {
			return EvalError::Syntax(format!(
				"invalid syntax. Maybe you meant '==' instead of '='? (<assertion>, column {})",
				spanned.column
			));
		}
		EvalError::Syntax(format!(
			"invalid syntax (<assertion>, column {}): unexpected {}",
			spanned.column,
			spanned.token.describe()
		))
	}

	fn enter(&mut self) -> Result<(), EvalError> {
		self.depth += 1;
		if self.depth > MAX_DEPTH {
			return Err(EvalError::Syntax("expression nested too deeply".to_string()));
		}
		Ok(())
	}

	fn leave(&mut self) {
		self.depth -= 1;
	}

	fn expression(&mut self) -> Result<Expr, EvalError> {
		self.enter()?;
		let result = self.conditional();
		self.leave();
		result
	}

	fn conditional(&mut self) -> Result<Expr, EvalError> {
		let then = self.disjunction()?;
		if !self.eat(&Token::If) {
			return Ok(then);
		}
		let cond = self.disjunction()?;
		self.expect(Token::Else)?;
		let otherwise = self.expression()?;
		Ok(Expr::IfElse {
			cond: Box::new(cond),
			then: Box::new(then),
			otherwise: Box::new(otherwise),
		})
	}

	fn disjunction(&mut self) -> Result<Expr, EvalError> {
		let mut left = self.conjunction()?;
		let mark = self.depth;
		while self.eat(&Token::Or) {
			self.enter()?;
			let right = self.conjunction()?;
			left = Expr::Or(Box::new(left), Box::new(right));
		}
		self.depth = mark;
		Ok(left)
	}

	fn conjunction(&mut self) -> Result<Expr, EvalError> {
		let mut left = self.inversion()?;
		let mark = self.depth;
		while self.eat(&Token::And) {
			self.enter()?;
			let right = self.inversion()?;
			left = Expr::And(Box::new(left), Box::new(right));
		}
		self.depth = mark;
		Ok(left)
	}

	fn inversion(&mut self) -> Result<Expr, EvalError> {
		if self.eat(&Token::Not) {
			self.enter()?;
			let operand = self.inversion();
			self.leave();
			return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
		}
		self.comparison()
	}

	fn comparison(&mut self) -> Result<Expr, EvalError> {
		let first = self.sum()?;
		let mut rest = Vec::new();
		loop {
			let op = match self.peek() {
				Token::Eq => CmpOp::Eq,
				Token::Ne => CmpOp::Ne,
				Token::Lt => CmpOp::Lt,
				Token::Le => CmpOp::Le,
				Token::Gt => CmpOp::Gt,
				Token::Ge => CmpOp::Ge,
				Token::In => CmpOp::In,
				Token::Not if self.peek_at(1) == &Token::In => {
					self.advance();
					CmpOp::NotIn
				}
				Token::Is if self.peek_at(1) == &Token::Not => {
					self.advance();
					CmpOp::IsNot
				}
				Token::Is => CmpOp::Is,
				_ => break,
			};
			self.advance();
			rest.push((op, self.sum()?));
		}
		if rest.is_empty() {
			Ok(first)
		} else {
			Ok(Expr::Compare(Box::new(first), rest))
		}
	}

	fn sum(&mut self) -> Result<Expr, EvalError> {
		let mut left = self.term()?;
		let mark = self.depth;
		loop {
			let op = match self.peek() {
				Token::Plus => BinOp::Add,
				Token::Minus => BinOp::Sub,
				_ => break,
			};
			self.advance();
			self.enter()?;
			let right = self.term()?;
			left = Expr::Binary(op, Box::new(left), Box::new(right));
		}
		self.depth = mark;
		Ok(left)
	}

	fn term(&mut self) -> Result<Expr, EvalError> {
		let mut left = self.factor()?;
		let mark = self.depth;
		loop {
			let op = match self.peek() {
				Token::Star => BinOp::Mul,
				Token::Slash => BinOp::Div,
				Token::DoubleSlash => BinOp::FloorDiv,
				Token::Percent => BinOp::Mod,
				_ => break,
			};
			self.advance();
			self.enter()?;
			let right = self.factor()?;
			left = Expr::Binary(op, Box::new(left), Box::new(right));
		}
		self.depth = mark;
		Ok(left)
	}

	fn factor(&mut self) -> Result<Expr, EvalError> {
		let op = match self.peek() {
			Token::Minus => UnaryOp::Neg,
			Token::Plus => UnaryOp::Pos,
			_ => return self.primary(),
		};
		self.advance();
		self.enter()?;
		let operand = self.factor();
		self.leave();
		Ok(Expr::Unary(op, Box::new(operand?)))
	}

	fn primary(&mut self) -> Result<Expr, EvalError> {
		let mut expr = self.atom()?;
		let mark = self.depth;
		loop {
			if matches!(self.peek(), Token::LParen | Token::LBracket | Token::Dot) {
				self.enter()?;
			}
			match self.peek() {
				Token::LParen => {
					self.advance();
					let args = self.call_args()?;
					expr = Expr::Call(Box::new(expr), args);
				}
				Token::LBracket => {
					self.advance();
					expr = self.subscript(expr)?;
				}
				Token::Dot => {
					self.advance();
					let Token::Name(name) = self.peek().clone() else {
						return Err(self.unexpected());
					};
					self.advance();
					expr = Expr::Attr(Box::new(expr), name);
				}
				_ => {
					self.depth = mark;
					return Ok(expr);
				}
			}
		}
	}

	fn call_args(&mut self) -> Result<Vec<Arg>, EvalError> {
		let mut args = Vec::new();
		if self.eat(&Token::RParen) {
			return Ok(args);
		}
		loop {
			if let (Token::Name(name), Token::Assign) = (self.peek().clone(), self.peek_at(1)) {
				self.advance();
				self.advance();
				args.push(Arg::Keyword(name, self.expression()?));
			} else {
				let value = self.expression()?;
				if self.peek() == &Token::For && args.is_empty() {
					let comp = self.comprehension(value, ComprehensionKind::Generator)?;
					self.expect(Token::RParen)?;
					return Ok(vec![Arg::Positional(comp)]);
				}
				args.push(Arg::Positional(value));
			}
			if self.eat(&Token::RParen) {
				return Ok(args);
			}
			self.expect(Token::Comma)?;
			if self.eat(&Token::RParen) {
				return Ok(args);
			}
		}
	}

	fn subscript(&mut self, object: Expr) -> Result<Expr, EvalError> {
		let lower = if matches!(self.peek(), Token::Colon) { None } else { Some(self.expression()?) };
		if self.eat(&Token::RBracket) {
			let index = lower.ok_or_else(|| self.unexpected())?;
			return Ok(Expr::Index(Box::new(object), Box::new(index)));
		}
		self.expect(Token::Colon)?;
		let upper = if matches!(self.peek(), Token::Colon | Token::RBracket) {
			None
		} else {
			Some(self.expression()?)
		};
		let step = if self.eat(&Token::Colon) && !matches!(self.peek(), Token::RBracket) {
			Some(self.expression()?)
		} else {
			None
		};
		self.expect(Token::RBracket)?;
		Ok(Expr::Slice {
			object: Box::new(object),
			lower: lower.map(Box::new),
			upper: upper.map(Box::new),
			step: step.map(Box::new),
		})
	}

	fn atom(&mut self) -> Result<Expr, EvalError> {
		match self.peek().clone() {
			Token::Int(i) => {
				self.advance();
				Ok(Expr::Const(Const::Int(i)))
			}
			Token::Float(f) => {
				self.advance();
				Ok(Expr::Const(Const::Float(f)))
			}
			Token::Str(_) => {
				let mut text = String::new();
				while let Token::Str(s) = self.peek().clone() {
					self.advance();
					text.push_str(&s);
				}
				Ok(Expr::Const(Const::Str(text)))
			}
			Token::True => {
				self.advance();
				Ok(Expr::Const(Const::Bool(true)))
			}
			Token::False => {
				self.advance();
				Ok(Expr::Const(Const::Bool(false)))
			}
			Token::None => {
				self.advance();
				Ok(Expr::Const(Const::None))
			}
			Token::Name(name) => {
				self.advance();
				Ok(Expr::Name(name))
			}
			Token::LParen => {
				self.advance();
				self.enter()?;
				let result = self.paren();
				self.leave();
				result
			}
			Token::LBracket => {
				self.advance();
				self.enter()?;
				let result = self.list();
				self.leave();
				result
			}
			Token::LBrace => {
				self.advance();
				self.enter()?;
				let result = self.dict();
				self.leave();
				result
			}
			_ => Err(self.unexpected()),
		}
	}

	fn paren(&mut self) -> Result<Expr, EvalError> {
		if self.eat(&Token::RParen) {
			return Ok(Expr::Tuple(Vec::new()));
		}
		let first = self.expression()?;
		if self.peek() == &Token::For {
			let comp = self.comprehension(first, ComprehensionKind::Generator)?;
			self.expect(Token::RParen)?;
			return Ok(comp);
		}
		if self.eat(&Token::RParen) {
			return Ok(first);
		}
		let mut items = vec![first];
		while self.eat(&Token::Comma) {
			if self.peek() == &Token::RParen {
				break;
			}
			items.push(self.expression()?);
		}
		self.expect(Token::RParen)?;
		Ok(Expr::Tuple(items))
	}

	fn list(&mut self) -> Result<Expr, EvalError> {
		if self.eat(&Token::RBracket) {
			return Ok(Expr::List(Vec::new()));
		}
		let first = self.expression()?;
		if self.peek() == &Token::For {
			let comp = self.comprehension(first, ComprehensionKind::List)?;
			self.expect(Token::RBracket)?;
			return Ok(comp);
		}
		let mut items = vec![first];
		while self.eat(&Token::Comma) {
			if self.peek() == &Token::RBracket {
				break;
			}
			items.push(self.expression()?);
		}
		self.expect(Token::RBracket)?;
		Ok(Expr::List(items))
	}

	fn dict(&mut self) -> Result<Expr, EvalError> {
		let mut entries = Vec::new();
		if self.eat(&Token::RBrace) {
			return Ok(Expr::Dict(entries));
		}
		loop {
			let key = self.expression()?;
			if self.peek() != &Token::Colon {
				return Err(EvalError::Syntax(
					"invalid syntax (<assertion>): set literals are not supported".to_string(),
				));
			}
			self.advance();
			let value = self.expression()?;
			entries.push((key, value));
			if self.eat(&Token::RBrace) {
				return Ok(Expr::Dict(entries));
			}
			self.expect(Token::Comma)?;
			if self.eat(&Token::RBrace) {
				return Ok(Expr::Dict(entries));
			}
		}
	}

	fn comprehension(&mut self, element: Expr, kind: ComprehensionKind) -> Result<Expr, EvalError> {
		let mut clauses = Vec::new();
		while self.eat(&Token::For) {
			let target = self.target_list()?;
			self.expect(Token::In)?;
			let iter = self.disjunction()?;
			let mut conditions = Vec::new();
			while self.eat(&Token::If) {
				conditions.push(self.disjunction()?);
			}
			clauses.push(ForClause { target, iter, conditions });
		}
		Ok(Expr::Comprehension(Box::new(Comprehension { kind, element, clauses })))
	}

	fn target_list(&mut self) -> Result<Target, EvalError> {
		let first = self.target()?;
		if self.peek() != &Token::Comma {
			return Ok(first);
		}
		let mut items = vec![first];
		while self.eat(&Token::Comma) {
			if self.peek() == &Token::In {
				break;
			}
			items.push(self.target()?);
		}
		Ok(Target::Tuple(items))
	}

	fn target(&mut self) -> Result<Target, EvalError> {
		match self.peek().clone() {
			Token::Name(name) => {
				self.advance();
				Ok(Target::Name(name))
			}
			Token::LParen => {
				self.advance();
				let inner = self.target_list()?;
				self.expect(Token::RParen)?;
				Ok(match inner {
					Target::Name(n) => Target::Name(n),
					tuple => tuple,
				})
			}
			_ => Err(self.unexpected()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_precedence() {
		let expr = parse("not a or b and c").unwrap();
		match expr {
			Expr::Or(left, right) => {
				assert!(matches!(*left, Expr::Unary(UnaryOp::Not, _)));
				assert!(matches!(*right, Expr::And(_, _)));
			}
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn test_chained_comparison() {
		let expr = parse("0 < duration_ms <= 1000").unwrap();
		match expr {
			Expr::Compare(_, rest) => assert_eq!(rest.len(), 2),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn test_generator_argument() {
		let expr = parse("any(t['name'] == 'bash' for t in tool_calls if t)").unwrap();
		match expr {
			Expr::Call(_, args) => match &args[0] {
				Arg::Positional(Expr::Comprehension(c)) => {
					assert_eq!(c.kind, ComprehensionKind::Generator);
					assert_eq!(c.clauses[0].conditions.len(), 1);
				}
				other => panic!("unexpected {:?}", other),
			},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn test_not_in_and_is_not() {
		let expr = parse("'x' not in output and outcome is not None").unwrap();
		let Expr::And(left, right) = expr else { panic!("expected and") };
		assert!(matches!(*left, Expr::Compare(_, ref r) if r[0].0 == CmpOp::NotIn));
		assert!(matches!(*right, Expr::Compare(_, ref r) if r[0].0 == CmpOp::IsNot));
	}

	#[test]
	fn test_assignment_is_rejected() {
		let err = parse("output = 'x'").unwrap_err();
		assert!(err.to_string().contains("Maybe you meant '=='"));
	}

	#[test]
	fn test_trailing_tokens_rejected() {
		assert!(parse("len(output) > 0 )").is_err());
		assert!(parse("import os").is_err());
		assert!(parse("").is_err());
	}

	#[test]
	fn test_nesting_limit() {
		let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
		assert_eq!(parse(&deep).unwrap_err().to_string(), "expression nested too deeply");
	}

	#[test]
	fn test_long_chains_hit_the_nesting_limit() {
		let sum = format!("1{} == 0", "+1".repeat(200_000));
		assert_eq!(parse(&sum).unwrap_err().to_string(), "expression nested too deeply");
		let conj = vec!["True"; 200_000].join(" and ");
		assert!(parse(&conj).is_err());
		let subscripts = format!("x{}", "[0]".repeat(200_000));
		assert!(parse(&subscripts).is_err());
		let calls = format!("output{}", ".lower()".repeat(200_000));
		assert!(parse(&calls).is_err());
	}

	#[test]
	fn test_short_chains_still_parse() {
		let sum = format!("1{} == 41", "+1".repeat(40));
		assert!(parse(&sum).is_ok());
		assert!(parse("a and b and c or d or e").is_ok());
		assert!(parse("output.strip().lower().split()[0][:3]").is_ok());
	}

	#[test]
	fn test_slice_forms() {
		assert!(matches!(parse("output[:10]").unwrap(), Expr::Slice { lower: None, .. }));
		assert!(matches!(parse("output[::-1]").unwrap(), Expr::Slice { step: Some(_), .. }));
		assert!(matches!(parse("output[0]").unwrap(), Expr::Index(_, _)));
	}
}

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
	Int(i64),
	Float(f64),
	Str(String),
	Name(String),
	// keywords
	And,
	Or,
	Not,
	In,
	Is,
	If,
	Else,
	For,
	True,
	False,
	None,
	// punctuation
	LParen,
	RParen,
	LBracket,
	RBracket,
	LBrace,
	RBrace,
	Comma,
	Colon,
	Dot,
	Assign,
	// operators
	Plus,
	Minus,
	Star,
	Slash,
	DoubleSlash,
	Percent,
	Eq,
	Ne,
	Lt,
	Le,
	Gt,
	Ge,
	Eof,
}

impl Token {
	pub fn describe(&self) -> String {
		match self {
			Token::Int(i) => i.to_string(),
			Token::Float(f) => f.to_string(),
			Token::Str(_) => "string literal".to_string(),
			Token::Name(n) => format!("'{}'", n),
			Token::Eof => "end of expression".to_string(),
			other => format!("'{}'", other.symbol()),
		}
	}

	fn symbol(&self) -> &'static str {
		match self {
			Token::And => "and",
			Token::Or => "or",
			Token::Not => "not",
			Token::In => "in",
			Token::Is => "is",
			Token::If => "if",
			Token::Else => "else",
			Token::For => "for",
			Token::True => "True",
			Token::False => "False",
			Token::None => "None",
			Token::LParen => "(",
			Token::RParen => ")",
			Token::LBracket => "[",
			Token::RBracket => "]",
			Token::LBrace => "{",
			Token::RBrace => "}",
			Token::Comma => ",",
			Token::Colon => ":",
			Token::Dot => ".",
			Token::Assign => "=",
			Token::Plus => "+",
			Token::Minus => "-",
			Token::Star => "*",
			Token::Slash => "/",
			Token::DoubleSlash => "//",
			Token::Percent => "%",
			Token::Eq => "==",
			Token::Ne => "!=",
			Token::Lt => "<",
			Token::Le => "<=",
			Token::Gt => ">",
			Token::Ge => ">=",
			_ => "",
		}
	}
}

/// A token with the character column it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
	pub token: Token,
	pub column: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, EvalError> {
	let chars: Vec<char> = source.chars().collect();
	let mut tokens = Vec::new();
	let mut i = 0;

	while i < chars.len() {
		let c = chars[i];
		let column = i + 1;

		if c.is_whitespace() {
			i += 1;
			continue;
		}

		if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) {
			let (token, next) = lex_number(&chars, i)?;
			tokens.push(Spanned { token, column });
			i = next;
			continue;
		}

		if c.is_alphabetic() || c == '_' {
			let start = i;
			while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
				i += 1;
			}
			let word: String = chars[start..i].iter().collect();
			let is_raw_prefix = matches!(word.as_str(), "r" | "R");
			if is_raw_prefix && i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
				let (text, next) = lex_string(&chars, i, true)?;
				tokens.push(Spanned { token: Token::Str(text), column });
				i = next;
				continue;
			}
			tokens.push(Spanned { token: keyword_or_name(word), column });
			continue;
		}

		if c == '\'' || c == '"' {
			let (text, next) = lex_string(&chars, i, false)?;
			tokens.push(Spanned { token: Token::Str(text), column });
			i = next;
			continue;
		}

		let next = chars.get(i + 1).copied();
		let (token, width) = match (c, next) {
			('=', Some('=')) => (Token::Eq, 2),
			('!', Some('=')) => (Token::Ne, 2),
			('<', Some('=')) => (Token::Le, 2),
			('>', Some('=')) => (Token::Ge, 2),
			('/', Some('/')) => (Token::DoubleSlash, 2),
			('*', Some('*')) => {
				return Err(EvalError::Syntax(format!(
					"invalid syntax (<assertion>, column {}): '**' is not supported",
					column
				)))
			}
			('=', _) => (Token::Assign, 1),
			('<', _) => (Token::Lt, 1),
			('>', _) => (Token::Gt, 1),
			('(', _) => (Token::LParen, 1),
			(')', _) => (Token::RParen, 1),
			('[', _) => (Token::LBracket, 1),
			(']', _) => (Token::RBracket, 1),
			('{', _) => (Token::LBrace, 1),
			('}', _) => (Token::RBrace, 1),
			(',', _) => (Token::Comma, 1),
			(':', _) => (Token::Colon, 1),
			('.', _) => (Token::Dot, 1),
			('+', _) => (Token::Plus, 1),
			('-', _) => (Token::Minus, 1),
			('*', _) => (Token::Star, 1),
			('/', _) => (Token::Slash, 1),
			('%', _) => (Token::Percent, 1),
			_ => {
				return Err(EvalError::Syntax(format!(
					"invalid character '{}' (<assertion>, column {})",
					c, column
				)))
			}
		};
		tokens.push(Spanned { token, column });
		i += width;
	}

	tokens.push(Spanned { token: Token::Eof, column: chars.len() + 1 });
	Ok(tokens)
}

fn keyword_or_name(word: String) -> Token {
	match word.as_str() {
		"and" => Token::And,
		"or" => Token::Or,
		"not" => Token::Not,
		"in" => Token::In,
		"is" => Token::Is,
		"if" => Token::If,
		"else" => Token::Else,
		"for" => Token::For,
		"True" => Token::True,
		"False" => Token::False,
		"None" => Token::None,
		_ => Token::Name(word),
	}
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
	let mut i = start;
	let mut is_float = false;
	while i < chars.len() {
		let c = chars[i];
		if c.is_ascii_digit() || c == '_' {
			i += 1;
		} else if c == '.' && !is_float {
			is_float = true;
			i += 1;
		} else if (c == 'e' || c == 'E')
			&& chars
				.get(i + 1)
				.is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
		{
			is_float = true;
			i += 2;
		} else {
			break;
		}
	}
	let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
	let bad = || EvalError::Syntax(format!("invalid decimal literal '{}'", text));
	let token = if is_float {
		Token::Float(text.parse().map_err(|_| bad())?)
	} else {
		Token::Int(text.parse().map_err(|_| bad())?)
	};
	Ok((token, i))
}

fn lex_string(chars: &[char], start: usize, raw: bool) -> Result<(String, usize), EvalError> {
	let quote = chars[start];
	let mut out = String::new();
	let mut i = start + 1;
	while i < chars.len() {
		let c = chars[i];
		if c == quote {
			return Ok((out, i + 1));
		}
		if c == '\\' && i + 1 < chars.len() {
			let esc = chars[i + 1];
			if raw {
				out.push('\\');
				out.push(esc);
			} else {
				match esc {
					'n' => out.push('\n'),
					't' => out.push('\t'),
					'r' => out.push('\r'),
					'0' => out.push('\0'),
					'\\' => out.push('\\'),
					'\'' => out.push('\''),
					'"' => out.push('"'),
					other => {
						out.push('\\');
						out.push(other);
					}
				}
			}
			i += 2;
			continue;
		}
		out.push(c);
		i += 1;
	}
	Err(EvalError::Syntax(format!(
		"unterminated string literal (<assertion>, column {})",
		start + 1
	)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn kinds(src: &str) -> Vec<Token> {
		tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
	}

	#[test]
	fn test_tokenize_comparison() {
		assert_eq!(
			kinds("len(output) >= 20"),
			vec![
				Token::Name("len".into()),
				Token::LParen,
				Token::Name("output".into()),
				Token::RParen,
				Token::Ge,
				Token::Int(20),
				Token::Eof
			]
		);
	}

	#[test]
	fn test_raw_strings_keep_backslashes() {
		assert_eq!(kinds(r"r'\d+'")[0], Token::Str(r"\d+".into()));
		assert_eq!(kinds(r"'a\nb'")[0], Token::Str("a\nb".into()));
	}

	#[test]
	fn test_numbers() {
		assert_eq!(kinds("1_000 2.5 .5 1e3")[..4], [Token::Int(1000), Token::Float(2.5), Token::Float(0.5), Token::Float(1000.0)]);
	}

	#[test]
	fn test_unterminated_string_is_syntax_error() {
		let err = tokenize("output == 'abc").unwrap_err();
		assert!(err.to_string().starts_with("unterminated string literal"));
	}
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// What the judge is asked to assess.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeRequest {
	pub task_id: String,
	pub prompt: String,
	pub output: String,
	pub rubric: String,
	pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
	pub score: f64,
	/// Explicit pass/fail when the judge gave one.
	pub passed: Option<bool>,
	pub rationale: String,
}

/// Failures talking to the judge. A judge answering "no" is a verdict, not
/// one of these.
#[derive(Debug, Error)]
pub enum JudgeError {
	#[error("judge request failed: {0}")]
	Transport(String),
	#[error("judge returned HTTP {status}: {body}")]
	Status { status: u16, body: String },
	#[error("unparseable judge verdict: {0}")]
	Unparseable(String),
}

impl From<reqwest::Error> for JudgeError {
	fn from(err: reqwest::Error) -> Self {
		JudgeError::Transport(err.to_string())
	}
}

#[async_trait]
pub trait Judge: Send + Sync {
	async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError>;
}

const SYSTEM_PROMPT: &str = "You are a strict evaluator of AI assistant responses. \
Grade the response against the rubric. Reply with a single JSON object: \
{\"score\": <number between 0 and 1>, \"passed\": <true|false>, \"rationale\": \"<one or two sentences>\"}";

pub fn render_prompt(request: &JudgeRequest) -> String {
	let mut prompt = format!(
		"## Task\n{}\n\n## Rubric\n{}\n\n## Response\n{}\n",
		request.prompt, request.rubric, request.output
	);
	if let Some(reference) = &request.reference {
		prompt.push_str(&format!("\n## Reference answer\n{}\n", reference));
	}
	prompt
}

/// Judge backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpJudge {
	client: Client,
	endpoint: String,
	model: String,
	api_key: Option<String>,
}

impl HttpJudge {
	pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
		let base: String = base_url.into();
		Self {
			client: Client::new(),
			endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
			model: model.into(),
			api_key: None,
		}
	}

	pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());
		self
	}
}

#[async_trait]
impl Judge for HttpJudge {
	async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
		let mut builder = self.client.post(&self.endpoint).json(&json!({
			"model": self.model,
			"messages": [
				{ "role": "system", "content": SYSTEM_PROMPT },
				{ "role": "user", "content": render_prompt(request) }
			],
			"temperature": 0.0
		}));
		if let Some(key) = &self.api_key {
			builder = builder.bearer_auth(key);
		}

		let response = builder.send().await?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(JudgeError::Status {
				status: status.as_u16(),
				body: body.chars().take(500).collect(),
			});
		}
		let body: Value = response.json().await?;
		let content = body["choices"][0]["message"]["content"]
			.as_str()
			.ok_or_else(|| JudgeError::Unparseable("response has no message content".to_string()))?;
		parse_verdict(content)
	}
}

/// Extract a verdict from judge text that embeds a JSON object.
///
/// `score` may be on a 0-1 or 0-10 scale; a bare `verdict: "pass" | "fail"`
/// maps to 1.0 / 0.0.
pub fn parse_verdict(text: &str) -> Result<JudgeVerdict, JudgeError> {
	let unparseable = || JudgeError::Unparseable(text.chars().take(200).collect());
	let start = text.find('{').ok_or_else(unparseable)?;
	let end = text.rfind('}').ok_or_else(unparseable)?;
	if end < start {
		return Err(unparseable());
	}
	let object: Value = serde_json::from_str(&text[start..=end]).map_err(|_| unparseable())?;

	let passed = object.get("passed").and_then(Value::as_bool).or_else(|| {
		match object.get("verdict").and_then(Value::as_str).map(str::to_ascii_lowercase).as_deref() {
			Some("pass" | "yes" | "true") => Some(true),
			Some("fail" | "no" | "false") => Some(false),
			_ => None,
		}
	});

	let raw = object.get("score").and_then(|s| match s {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	});
	let score = match (raw, passed) {
		(Some(s), _) if (0.0..=1.0).contains(&s) => s,
		(Some(s), _) if s > 1.0 && s <= 10.0 => s / 10.0,
		(Some(_), _) => return Err(unparseable()),
		(None, Some(p)) => if p { 1.0 } else { 0.0 },
		(None, None) => return Err(unparseable()),
	};

	let rationale = object
		.get("rationale")
		.or_else(|| object.get("reason"))
		.and_then(Value::as_str)
		.unwrap_or_default()
		.to_string();

	Ok(JudgeVerdict { score, passed, rationale })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_verdict_from_chatty_text() {
		let verdict = parse_verdict(
			"Sure! Here is my grade:\n```json\n{\"score\": 0.8, \"passed\": true, \"rationale\": \"clear\"}\n```",
		)
		.unwrap();
		assert_eq!(verdict.score, 0.8);
		assert_eq!(verdict.passed, Some(true));
		assert_eq!(verdict.rationale, "clear");
	}

	#[test]
	fn test_parse_verdict_scales() {
		assert_eq!(parse_verdict("{\"score\": 7}").unwrap().score, 0.7);
		assert_eq!(parse_verdict("{\"verdict\": \"FAIL\"}").unwrap().score, 0.0);
		assert_eq!(parse_verdict("{\"score\": \"0.5\"}").unwrap().score, 0.5);
	}

	#[test]
	fn test_parse_verdict_rejects_garbage() {
		assert!(matches!(parse_verdict("looks good to me"), Err(JudgeError::Unparseable(_))));
		assert!(parse_verdict("{\"score\": 42}").is_err());
		assert!(parse_verdict("{\"rationale\": \"no score\"}").is_err());
	}

	#[test]
	fn test_prompt_includes_reference() {
		let request = JudgeRequest {
			task_id: "t".into(),
			prompt: "explain".into(),
			output: "it adds".into(),
			rubric: "mentions addition".into(),
			reference: Some("adds two numbers".into()),
		};
		let prompt = render_prompt(&request);
		assert!(prompt.contains("## Rubric\nmentions addition"));
		assert!(prompt.contains("## Reference answer\nadds two numbers"));
	}
}

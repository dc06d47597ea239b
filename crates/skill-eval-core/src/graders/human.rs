use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use skill_eval_types::{meets_threshold, GraderResult, TrialResult};
use tokio::sync::{mpsc, oneshot, OnceCell};

use crate::context::GraderContext;
use crate::error::ConfigError;
use crate::grader::{Grader, GraderConfig, GraderKind};
use crate::task::Task;

/// A score given by a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanLabel {
	pub score: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub passed: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
}

impl HumanLabel {
	pub fn new(score: f64) -> Self {
		Self { score, passed: None, note: None }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRequest {
	pub task_id: String,
	pub prompt: String,
	pub output: String,
	pub instructions: Option<String>,
}

/// Live source of human labels.
#[async_trait]
pub trait HumanReviewer: Send + Sync {
	async fn review(&self, request: ReviewRequest) -> Result<HumanLabel>;
}

/// A review waiting for an answer on the receiving side of a [`ChannelReviewer`].
#[derive(Debug)]
pub struct PendingReview {
	pub request: ReviewRequest,
	reply: oneshot::Sender<HumanLabel>,
}

impl PendingReview {
	pub fn respond(self, label: HumanLabel) {
		// The grader may have timed out already.
		let _ = self.reply.send(label);
	}
}

/// Forwards review requests over a channel so a UI or test harness can
/// answer them.
#[derive(Clone)]
pub struct ChannelReviewer {
	tx: mpsc::Sender<PendingReview>,
}

impl ChannelReviewer {
	pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingReview>) {
		let (tx, rx) = mpsc::channel(buffer.max(1));
		(Self { tx }, rx)
	}
}

#[async_trait]
impl HumanReviewer for ChannelReviewer {
	async fn review(&self, request: ReviewRequest) -> Result<HumanLabel> {
		let (reply, answer) = oneshot::channel();
		self.tx
			.send(PendingReview { request, reply })
			.await
			.map_err(|_| anyhow::anyhow!("no reviewer is listening"))?;
		answer.await.context("reviewer dropped the request without answering")
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LabelEntry {
	Score(f64),
	Label(HumanLabel),
}

impl From<LabelEntry> for HumanLabel {
	fn from(entry: LabelEntry) -> Self {
		match entry {
			LabelEntry::Score(score) => HumanLabel::new(score),
			LabelEntry::Label(label) => label,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HumanParams {
	#[serde(default)]
	scores: HashMap<String, LabelEntry>,
	#[serde(default)]
	dataset: Option<PathBuf>,
	#[serde(default)]
	timeout_secs: Option<f64>,
	#[serde(default)]
	instructions: Option<String>,
	#[serde(default = "default_threshold")]
	threshold: f64,
}

fn default_threshold() -> f64 {
	0.5
}

/// Replays recorded human scores, or asks a live reviewer with a deadline.
pub struct HumanCalibrationGrader {
	name: String,
	recorded: HashMap<String, HumanLabel>,
	dataset: Option<PathBuf>,
	loaded: OnceCell<HashMap<String, HumanLabel>>,
	reviewer: Option<(Arc<dyn HumanReviewer>, Duration)>,
	instructions: Option<String>,
	threshold: f64,
}

impl HumanCalibrationGrader {
	pub fn with_scores(name: impl Into<String>, scores: HashMap<String, HumanLabel>) -> Self {
		Self {
			name: name.into(),
			recorded: scores,
			dataset: None,
			loaded: OnceCell::new(),
			reviewer: None,
			instructions: None,
			threshold: default_threshold(),
		}
	}

	pub fn with_reviewer(name: impl Into<String>, reviewer: Arc<dyn HumanReviewer>, timeout: Duration) -> Self {
		Self {
			reviewer: Some((reviewer, timeout)),
			..Self::with_scores(name, HashMap::new())
		}
	}

	pub fn from_config(config: &GraderConfig, reviewer: Option<Arc<dyn HumanReviewer>>) -> Result<Self, ConfigError> {
		let params: HumanParams = config.params()?;
		config.check_threshold(params.threshold)?;
		let recorded: HashMap<String, HumanLabel> = params
			.scores
			.into_iter()
			.map(|(task, entry)| (task, HumanLabel::from(entry)))
			.collect();
		for (task, label) in &recorded {
			if !(0.0..=1.0).contains(&label.score) {
				return Err(ConfigError::invalid_grader(
					&config.name,
					format!("recorded score {} for task '{}' is outside [0, 1]", label.score, task),
				));
			}
		}

		// `timeout_secs` opts a grader into live review. The reviewer is shared
		// across the eval, so graders without it only replay recorded labels.
		let live = match (reviewer, params.timeout_secs) {
			(_, Some(secs)) if !secs.is_finite() || secs <= 0.0 => {
				return Err(ConfigError::invalid_grader(&config.name, "timeout_secs must be positive"));
			}
			(Some(reviewer), Some(secs)) => Some((reviewer, Duration::from_secs_f64(secs))),
			(None, Some(_)) => {
				return Err(ConfigError::invalid_grader(
					&config.name,
					"timeout_secs is set but no human reviewer is configured",
				));
			}
			(Some(_), None) => {
				tracing::debug!(grader = %config.name, "no timeout_secs; reviewer not consulted");
				None
			}
			(None, None) => None,
		};
		if recorded.is_empty() && params.dataset.is_none() && live.is_none() {
			return Err(ConfigError::invalid_grader(
				&config.name,
				"human_calibration needs recorded `scores`, a `dataset`, or a reviewer with `timeout_secs`",
			));
		}

		Ok(Self {
			name: config.name.clone(),
			recorded,
			dataset: params.dataset,
			loaded: OnceCell::new(),
			reviewer: live,
			instructions: params.instructions,
			threshold: params.threshold,
		})
	}

	async fn recorded_label(&self, task_id: &str) -> Result<Option<HumanLabel>> {
		if let Some(label) = self.recorded.get(task_id) {
			return Ok(Some(label.clone()));
		}
		let Some(path) = &self.dataset else {
			return Ok(None);
		};
		let dataset = self.loaded.get_or_try_init(|| load_dataset(path)).await?;
		Ok(dataset.get(task_id).cloned())
	}

	fn label_result(&self, label: HumanLabel, source: &str) -> GraderResult {
		let passed = label.passed.unwrap_or_else(|| meets_threshold(label.score, self.threshold));
		let message = match &label.note {
			Some(note) => format!("{} human score {:.2}: {}", source, label.score, note),
			None => format!("{} human score {:.2}", source, label.score),
		};
		GraderResult::new(&self.name, GraderKind::HumanCalibration.as_str(), label.score, passed, message).with_details(
			json!({
				"source": source,
				"human_score": label.score,
				"human_passed": label.passed,
				"note": label.note,
				"threshold": self.threshold,
			}),
		)
	}
}

/// Load a YAML (or JSON) map of task id to score or label.
async fn load_dataset(path: &Path) -> Result<HashMap<String, HumanLabel>> {
	#[cfg(not(feature = "sync-fs"))]
	let raw = tokio::fs::read_to_string(path).await;
	#[cfg(feature = "sync-fs")]
	let raw = std::fs::read_to_string(path);
	let raw = raw.with_context(|| format!("failed to read human dataset {}", path.display()))?;
	let entries: HashMap<String, LabelEntry> = serde_yaml::from_str(&raw)
		.with_context(|| format!("failed to parse human dataset {}", path.display()))?;
	Ok(entries.into_iter().map(|(task, entry)| (task, entry.into())).collect())
}

#[async_trait]
impl Grader for HumanCalibrationGrader {
	fn name(&self) -> &str {
		&self.name
	}

	fn kind(&self) -> GraderKind {
		GraderKind::HumanCalibration
	}

	async fn grade(&self, ctx: &GraderContext, task: &Task) -> Result<GraderResult> {
		let kind = GraderKind::HumanCalibration.as_str();
		if let Some(label) = self.recorded_label(&task.id).await? {
			return Ok(self.label_result(label, "recorded"));
		}

		let Some((reviewer, timeout)) = &self.reviewer else {
			return Ok(GraderResult::failure(
				&self.name,
				kind,
				format!("no human score recorded for task '{}'", task.id),
			));
		};

		let request = ReviewRequest {
			task_id: task.id.clone(),
			prompt: task.prompt.clone(),
			output: ctx.output.clone(),
			instructions: self.instructions.clone(),
		};
		tracing::info!(grader = %self.name, task = %task.id, "waiting for human review");
		match tokio::time::timeout(*timeout, reviewer.review(request)).await {
			Ok(Ok(label)) => Ok(self.label_result(label, "live")),
			Ok(Err(err)) => Ok(GraderResult::failure(&self.name, kind, format!("human review failed: {err:#}"))),
			Err(_) => Ok(GraderResult::failure(
				&self.name,
				kind,
				format!("human review timed out after {}s", timeout.as_secs_f64()),
			)),
		}
	}
}

/// Agreement between a human grader and an automated one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
	pub human: String,
	pub automated: String,
	pub samples: usize,
	pub mean_absolute_error: f64,
	/// Fraction of samples where both graders reached the same verdict.
	pub agreement_rate: f64,
}

/// Compare two graders over the trials where both produced a usable result.
/// Returns `None` when there is nothing to compare.
pub fn calibrate<'a>(
	trials: impl IntoIterator<Item = &'a TrialResult>,
	human: &str,
	automated: &str,
) -> Option<CalibrationReport> {
	let mut samples = 0usize;
	let mut abs_error = 0.0;
	let mut agreed = 0usize;
	for trial in trials {
		let (Some(h), Some(a)) = (trial.grader(human), trial.grader(automated)) else {
			continue;
		};
		if h.is_error() || a.is_error() {
			continue;
		}
		samples += 1;
		abs_error += (h.score - a.score).abs();
		if h.passed == a.passed {
			agreed += 1;
		}
	}
	if samples == 0 {
		return None;
	}
	Some(CalibrationReport {
		human: human.to_string(),
		automated: automated.to_string(),
		samples,
		mean_absolute_error: abs_error / samples as f64,
		agreement_rate: agreed as f64 / samples as f64,
	})
}

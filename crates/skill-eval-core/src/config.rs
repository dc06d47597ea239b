use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationPolicy;
use crate::executor::{MockConfig, MockExecutor};
use crate::grader::GraderConfig;
use crate::judge::HttpJudge;
use crate::metric::MetricConfig;
use crate::runner::EvalBuilder;
use crate::task_source::{read_to_string, TaskSource, YamlTaskSource};

/// Top-level `eval.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub name: String,
    pub skill: String,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeConfig>,
    /// Task files or directories, relative to the config file.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<PathBuf>,
    /// Graders added to every task.
    #[serde(default)]
    pub graders: Vec<GraderConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    #[serde(default = "default_trials")]
    pub trials: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_grader_timeout_secs")]
    pub grader_timeout_secs: u64,
}

fn default_tasks() -> Vec<PathBuf> {
    vec![PathBuf::from("tasks")]
}

fn default_trials() -> usize {
    1
}

fn default_concurrency() -> usize {
    4
}

fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_grader_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ExecutorConfig {
    Mock(MockConfig),
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Mock(MockConfig::default())
    }
}

/// OpenAI-compatible judge endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_base_url")]
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_judge_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl EvalConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EvalConfig = serde_yaml::from_str(yaml).context("Invalid eval config")?;
        Ok(config)
    }

    /// Read `eval.yaml` and resolve task paths against its directory.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path).await?;
        let mut config =
            Self::from_yaml(&content).with_context(|| format!("Failed to load {:?}", path))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.tasks = config
            .tasks
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { base.join(p) })
            .collect();
        Ok(config)
    }

    /// Load the tasks and assemble a builder with every collaborator the
    /// config names. Grader and metric validation happens in `build()`.
    pub async fn into_builder(self) -> Result<EvalBuilder> {
        let tasks = YamlTaskSource::new(self.tasks.iter().cloned()).load().await?;

        let executor = match self.executor {
            ExecutorConfig::Mock(mock) => MockExecutor::new(mock)?,
        };
        let mut builder = EvalBuilder::new(self.name, self.skill)
            .executor(Arc::new(executor))
            .tasks(tasks)
            .graders(self.graders)
            .metrics(self.metrics)
            .aggregation(self.aggregation)
            .trials(self.trials)
            .concurrency(self.concurrency)
            .execution_timeout(Duration::from_secs(self.execution_timeout_secs))
            .grader_timeout(Duration::from_secs(self.grader_timeout_secs));

        if let Some(judge) = self.judge {
            let mut client = HttpJudge::new(&judge.base_url, &judge.model);
            match std::env::var(&judge.api_key_env) {
                Ok(key) => client = client.with_api_key(key),
                Err(_) => tracing::warn!(env = %judge.api_key_env, "judge API key variable is not set"),
            }
            builder = builder.judge(Arc::new(client));
        }
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = EvalConfig::from_yaml("name: demo\nskill: code-explainer\n").unwrap();
        assert_eq!(config.trials, 1);
        assert_eq!(config.execution_timeout_secs, 300);
        assert_eq!(config.grader_timeout_secs, 120);
        assert_eq!(config.tasks, vec![PathBuf::from("tasks")]);
        assert_eq!(config.executor, ExecutorConfig::Mock(MockConfig::default()));
        assert!(config.aggregation.partial_pass_threshold.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
name: code-explainer-eval
skill: code-explainer
executor:
  type: mock
  delay_ms: 5
judge:
  model: gpt-4o-mini
metrics:
  - name: completion
    type: task_completion
  - name: overall
    type: composite
    components: { completion: 1 }
aggregation:
  partial_pass_threshold: 0.8
trials: 3
"#;
        let config = EvalConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.metrics.len(), 2);
        assert!(matches!(config.metrics[1].kind, MetricKind::Composite { .. }));
        let judge = config.judge.unwrap();
        assert_eq!(judge.base_url, "https://api.openai.com/v1");
        assert_eq!(judge.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.aggregation.partial_pass_threshold, Some(0.8));
    }

    #[test]
    fn test_unknown_executor_type_is_rejected() {
        assert!(EvalConfig::from_yaml("name: x\nskill: y\nexecutor:\n  type: copilot\n").is_err());
    }

    #[tokio::test]
    async fn test_load_resolves_tasks_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("tasks")).unwrap();
        fs::write(dir.path().join("tasks/one.yaml"), "id: one\nprompt: hi\n").unwrap();
        fs::write(dir.path().join("eval.yaml"), "name: demo\nskill: s\n").unwrap();

        let config = EvalConfig::load(dir.path().join("eval.yaml")).await.unwrap();
        assert_eq!(config.tasks, vec![dir.path().join("tasks")]);
        let eval = config.into_builder().await.unwrap().build().unwrap();
        assert_eq!(eval.task_ids(), vec!["one"]);
    }
}

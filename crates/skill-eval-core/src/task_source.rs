use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::task::Task;

#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Task>>;
}

pub struct VecTaskSource {
    tasks: Vec<Task>,
}

impl VecTaskSource {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl TaskSource for VecTaskSource {
    async fn load(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.clone())
    }
}

/// Task files in YAML. Each path is either a file or a directory whose
/// `*.yaml` / `*.yml` files are read in name order. A file holds one task or
/// a list of tasks.
pub struct YamlTaskSource {
    paths: Vec<PathBuf>,
}

impl YamlTaskSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TaskSource for YamlTaskSource {
    async fn load(&self) -> Result<Vec<Task>> {
        let mut files = Vec::new();
        for path in &self.paths {
            if is_dir(path).await? {
                files.extend(yaml_files_in(path).await?);
            } else {
                files.push(path.clone());
            }
        }

        let mut tasks = Vec::new();
        for file in files {
            let content = read_to_string(&file).await?;
            let value: serde_yaml::Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in {:?}", file))?;
            if value.is_sequence() {
                let many: Vec<Task> =
                    serde_yaml::from_value(value).with_context(|| format!("Invalid task list in {:?}", file))?;
                tasks.extend(many);
            } else {
                let one: Task = serde_yaml::from_value(value).with_context(|| format!("Invalid task in {:?}", file))?;
                tasks.push(one);
            }
        }

        let mut seen = std::collections::HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(anyhow!("Duplicate task id '{}'", task.id));
            }
        }
        tracing::debug!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"))
}

#[cfg(not(feature = "sync-fs"))]
async fn is_dir(path: &Path) -> Result<bool> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {:?}", path))?;
    Ok(meta.is_dir())
}

#[cfg(feature = "sync-fs")]
async fn is_dir(path: &Path) -> Result<bool> {
    let meta = std::fs::metadata(path).with_context(|| format!("Failed to stat {:?}", path))?;
    Ok(meta.is_dir())
}

#[cfg(not(feature = "sync-fs"))]
async fn yaml_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {:?}", dir))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_yaml(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(feature = "sync-fs")]
async fn yaml_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).with_context(|| format!("Failed to list {:?}", dir))? {
            let path = entry?.path();
            if is_yaml(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok::<_, anyhow::Error>(files)
    })
    .await
    .map_err(|e| anyhow!(e))?
}

#[cfg(not(feature = "sync-fs"))]
pub(crate) async fn read_to_string(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
pub(crate) async fn read_to_string(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))
    })
    .await
    .map_err(|e| anyhow!(e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_loads_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), "id: second\nprompt: two\n").unwrap();
        fs::write(
            dir.path().join("a.yml"),
            "- id: first\n  prompt: one\n- id: first-b\n  prompt: one b\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tasks = YamlTaskSource::new([dir.path()]).load().await.unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "first-b", "second"]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "id: same\nprompt: one\n").unwrap();
        fs::write(dir.path().join("b.yaml"), "id: same\nprompt: two\n").unwrap();
        let err = YamlTaskSource::new([dir.path()]).load().await.unwrap_err();
        assert!(err.to_string().contains("Duplicate task id 'same'"));
    }

    #[tokio::test]
    async fn test_bad_task_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "prompt: no id here\n").unwrap();
        let err = YamlTaskSource::new([&path]).load().await.unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }
}

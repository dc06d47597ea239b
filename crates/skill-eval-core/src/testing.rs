use anyhow::Result;
use skill_eval_types::EvalSummary;

/// Helper to assert the eval's overall verdict is a pass.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_skill() -> Result<()> {
///     let eval = Eval::builder("explainer", "code-explainer")
///         .executor(executor)
///         .tasks(tasks)
///         .add_metric(MetricConfig::task_completion("completion"))
///         .build()?;
///
///     let summary = eval.run().await?;
///     assert_eval_passed(&summary)?;
///     Ok(())
/// }
/// ```
pub fn assert_eval_passed(summary: &EvalSummary) -> Result<()> {
    if !summary.passed {
        anyhow::bail!(
            "Evaluation failed: {}\n{}",
            summary.message,
            summary.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert the overall score meets a threshold.
pub fn assert_overall_score(summary: &EvalSummary, min_score: f64) -> Result<()> {
    if summary.overall_score < min_score {
        anyhow::bail!(
            "Evaluation failed: overall score {:.3} is below threshold {:.3}\n{}",
            summary.overall_score,
            min_score,
            summary.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert one task passed.
pub fn assert_task_passed(summary: &EvalSummary, task_id: &str) -> Result<()> {
    let Some(task) = summary.task(task_id) else {
        anyhow::bail!("Task '{}' is not part of eval '{}'", task_id, summary.name);
    };
    if !task.passed {
        anyhow::bail!(
            "Task '{}' failed: {}\n{}",
            task_id,
            task.message,
            summary.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert no task flip-flopped between trials.
pub fn assert_no_flaky_tasks(summary: &EvalSummary) -> Result<()> {
    let flaky: Vec<&str> = summary
        .tasks
        .iter()
        .filter(|t| t.flaky)
        .map(|t| t.task_id.as_str())
        .collect();
    if !flaky.is_empty() {
        anyhow::bail!(
            "Evaluation has {} flaky task(s): {}\n{}",
            flaky.len(),
            flaky.join(", "),
            summary.summary_table()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockExecutor;
    use crate::metric::MetricConfig;
    use crate::runner::Eval;
    use crate::task::Task;
    use skill_eval_types::ExecutionResult;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_helpers_report_failures_with_table() -> Result<()> {
        let executor = MockExecutor::sequence(vec![
            ExecutionResult::completed("ok"),
            ExecutionResult::failed("boom", 1),
        ]);
        let summary = Eval::builder("suite", "skill")
            .executor(Arc::new(executor))
            .add_task(Task::new("steady", "p"))
            .add_metric(MetricConfig::task_completion("completion").with_threshold(0.5))
            .trials(2)
            .concurrency(1)
            .build()?
            .run()
            .await?;

        assert_eval_passed(&summary)?;
        assert_task_passed(&summary, "steady")?;
        assert_overall_score(&summary, 0.5)?;
        let err = assert_no_flaky_tasks(&summary).unwrap_err();
        assert!(err.to_string().contains("1 flaky task(s): steady"));
        assert!(assert_task_passed(&summary, "missing").is_err());
        assert!(assert_overall_score(&summary, 0.9).is_err());
        Ok(())
    }
}

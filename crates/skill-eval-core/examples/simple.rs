use std::sync::Arc;

use serde_json::json;
use skill_eval_core::{
    from_async_fn, Eval, EvalConfig, ExecutionRequest, ExecutionResult, GraderConfig, MetricConfig,
    MockExecutor, Task, ToolCall,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Example 1: Inline tasks against a scripted executor
    let executor = MockExecutor::always(ExecutionResult {
        output: "This function computes Fibonacci numbers recursively.".to_string(),
        tool_calls: vec![ToolCall::new("read_file", json!({ "path": "fib.py" }))],
        success: true,
        skill_invoked: true,
        ..ExecutionResult::default()
    });

    let tasks = vec![
        Task::new("explain-fib", "Explain fib.py")
            .with_should_trigger(true)
            .with_grader(GraderConfig::new(
                "regex",
                "mentions",
                json!({ "must_match": ["(?i)fibonacci", "(?i)recursi"] }),
            ))
            .with_grader(GraderConfig::new(
                "tool_calls",
                "reads-file",
                json!({ "expected": ["read_file"] }),
            )),
        Task::new("assertions", "Explain fib.py briefly").with_grader(GraderConfig::new(
            "script",
            "short",
            json!({ "assertions": ["len(output) < 200", "'Fibonacci' in output"] }),
        )),
    ];

    let eval = Eval::builder("simple", "code-explainer")
        .executor(Arc::new(executor))
        .tasks(tasks)
        .add_metric(MetricConfig::task_completion("completion"))
        .add_metric(MetricConfig::trigger_accuracy("trigger"))
        .add_metric(MetricConfig::behavior_quality("quality", &[]))
        .add_metric(MetricConfig::composite(
            "overall",
            &[("completion", 2.0), ("trigger", 1.0), ("quality", 1.0)],
        ))
        .trials(3)
        .build()?;

    let summary = eval.run().await?;
    println!("{}", summary.summary_table());

    // Example 2: A closure executor
    let echo = from_async_fn(|req: ExecutionRequest| async move {
        Ok::<_, anyhow::Error>(ExecutionResult::completed(format!("{} World!", req.prompt)))
    });
    let eval = Eval::builder("echo", "echo")
        .executor(echo)
        .add_task(Task::new("hello", "Hello").with_grader(GraderConfig::new(
            "regex",
            "world",
            json!({ "must_match": ["World!$"] }),
        )))
        .build()?;
    println!("{}", eval.run().await?.summary_table());

    // Example 3: Load an eval.yaml if provided
    if let Some(path) = std::env::args().nth(1) {
        let config = EvalConfig::load(path).await?;
        let summary = config.into_builder().await?.build()?.run().await?;
        println!("{}", summary.summary_table());
    }

    Ok(())
}

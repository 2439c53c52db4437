//! Benchmarks for workflow execution.
//!
//! Runs inline step lists of varying length through the engine, with
//! context references resolved on every step.

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cadence::{
    Action, ActionDispatcher, ActionError, InMemoryStorage, Params, WorkflowContext,
    WorkflowEngine, WorkflowStep,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Echoes its parameters back.
struct Echo;

#[async_trait]
impl Action for Echo {
    async fn execute(&self, params: Params) -> Result<Value, ActionError> {
        Ok(Value::Object(params))
    }
}

fn steps(count: usize) -> Vec<WorkflowStep> {
    (0..count)
        .map(|i| {
            let input = if i == 0 {
                json!({ "seed": "${seed}" })
            } else {
                json!({ "previous": format!("${{step_{}}}", i - 1) })
            };
            WorkflowStep::new(format!("step {}", i), "echo")
                .with_parameters(input.as_object().cloned().unwrap_or_default())
                .with_output(format!("step_{}", i))
        })
        .collect()
}

fn bench_resolve(c: &mut Criterion) {
    let mut context = WorkflowContext::new();
    for i in 0..50 {
        context.set(format!("var_{}", i), json!({ "index": i, "tags": ["a", "b"] }));
    }

    let mut group = c.benchmark_group("context_resolve");
    for width in [4, 32].iter() {
        let params: Params = (0..*width)
            .map(|i| {
                let value = if i % 2 == 0 {
                    json!(format!("${{var_{}}}", i))
                } else {
                    json!("literal ${not a reference}")
                };
                (format!("p{}", i), value)
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("params", width), &params, |b, params| {
            b.iter(|| context.resolve(params))
        });
    }
    group.finish();
}

fn bench_inline_workflow(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dispatcher = ActionDispatcher::new();
    dispatcher.register("echo", Arc::new(Echo));
    let engine =
        WorkflowEngine::builder(Arc::new(InMemoryStorage::new()), Arc::new(dispatcher)).build();

    let mut group = c.benchmark_group("workflow_inline");
    for count in [5, 25, 100].iter() {
        let steps = steps(*count);
        group.bench_with_input(BenchmarkId::new("steps", count), &steps, |b, steps| {
            b.iter(|| {
                rt.block_on(async {
                    let mut context = WorkflowContext::new();
                    context.set("seed", json!(42));
                    engine.execute_inline(steps, context).await.unwrap()
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_inline_workflow);

criterion_main!(benches);

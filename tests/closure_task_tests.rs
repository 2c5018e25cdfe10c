
use serde_json::{json, Value};
use flowgrid::task::closure::{OperatorCall, OperatorRegistry, TaskContext};
use flowgrid::task::{TaskOutput, TaskRun};
use test_harness::{await_completed, TestRig};

fn sum_registry() -> OperatorRegistry {
    let mut registry = OperatorRegistry::new();
    registry.register("sum", |ctx: &mut TaskContext, params: &Value| {
        let total: i64 = params["values"]
            .as_array()
            .map(|values| values.iter().filter_map(Value::as_i64).sum())
            .unwrap_or(0);
        let count = ctx.get("count").and_then(Value::as_i64).unwrap_or(0);
        ctx.set("count", json!(count + 1));
        Ok(json!({ "sum": total }))
    });
    registry
}

#[tokio::test]
async fn test_closure_round_trip() {
    let rig = TestRig::with_operators(sum_registry()).await;
    rig.spawn_monitor();

    let call = OperatorCall::new("sum", json!({"values": [1, 2]}));
    let delegate = TaskContext::new();
    let task = TaskRun::closure("sum", rig.work_dir(), rig.target_dir(), &call, &delegate).unwrap();
    let handler = rig.executor.create_task_handler(task).await;
    handler.submit().await.unwrap();

    await_completed(&handler).await;

    let task = handler.task();
    let task = task.read().await;
    assert!(task.error.is_none(), "unexpected error: {:?}", task.error);
    assert_eq!(
        task.stdout,
        Some(TaskOutput::Value(json!({"sum": 3})))
    );
    let context = task.context.as_ref().expect("closure result carries a context");
    assert_eq!(context.get("count"), Some(&json!(1)));
}

#[tokio::test]
async fn test_closure_delegate_state_survives_the_wire() {
    let rig = TestRig::with_operators(sum_registry()).await;
    rig.spawn_monitor();

    let call = OperatorCall::new("sum", json!({"values": []}));
    let mut delegate = TaskContext::new();
    delegate.set("count", json!(41));
    delegate.set("label", json!("kept"));
    let task =
        TaskRun::closure("carry", rig.work_dir(), rig.target_dir(), &call, &delegate).unwrap();
    let handler = rig.executor.create_task_handler(task).await;
    handler.submit().await.unwrap();

    await_completed(&handler).await;

    let task = handler.task();
    let task = task.read().await;
    let context = task.context.as_ref().expect("closure result carries a context");
    assert_eq!(context.get("count"), Some(&json!(42)));
    assert_eq!(context.get("label"), Some(&json!("kept")));
}

#[tokio::test]
async fn test_unknown_operator_surfaces_as_task_error() {
    let rig = TestRig::with_operators(OperatorRegistry::new()).await;
    rig.spawn_monitor();

    let call = OperatorCall::new("does-not-exist", json!(null));
    let task = TaskRun::closure(
        "broken",
        rig.work_dir(),
        rig.target_dir(),
        &call,
        &TaskContext::new(),
    )
    .unwrap();
    let handler = rig.executor.create_task_handler(task).await;
    handler.submit().await.unwrap();

    await_completed(&handler).await;

    let task = handler.task();
    let task = task.read().await;
    let error = task.error.as_deref().expect("task should carry an error");
    assert!(error.contains("does-not-exist"), "got: {error}");
    assert!(task.stdout.is_none());
}

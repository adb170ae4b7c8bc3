use kumihimo::prelude::*;
use kumihimo::{ITEM_KEY, PARALLEL_OUTPUT_KEY};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Handlers for the demo workflow: seed data, process items, route,
/// and finally fail with a retryable named error.
fn demo_registry(attempts: Arc<AtomicU32>) -> TaskRegistry {
    let mut tasks = TaskRegistry::new();

    tasks.register(
        "StartTask",
        task_fn(|_token, ctx| async move {
            let mut guard = ctx.lock().await;
            if !guard.contains_key("items_to_process") {
                guard.insert("attempts", 0);
                guard.insert("items_to_process", json!([1, 2, 3]));
                guard.insert("choice_value", "go");
                guard.insert("numeric_value", 10);
            }
            Ok(())
        }),
    );

    tasks.register(
        "MapTask",
        task_fn(|_token, ctx| async move {
            let mut guard = ctx.lock().await;
            let item = guard.get_f64(ITEM_KEY).ok_or_else(|| {
                TaskError::plain(format!("invalid item: {:?}", guard.get(ITEM_KEY)))
            })?;
            guard.insert("processed_item", item * 10.0);
            Ok(())
        }),
    );

    tasks.register(
        "TestRetryCatch",
        task_fn(move |_token, ctx| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                let mut guard = ctx.lock().await;
                let so_far = guard.get_f64("attempts").unwrap_or(0.0);
                guard.insert("attempts", so_far + 1.0);
                Err(TaskError::named(
                    "API_BAD_GATEWAY",
                    "api service is unavailable",
                ))
            }
        }),
    );

    for name in ["BranchATask", "BranchBTask", "DefaultTask", "SucceedingTask"] {
        tasks.register(
            name,
            task_fn(move |_token, ctx| async move {
                ctx.lock().await.insert("ran", name);
                Ok(())
            }),
        );
    }

    tasks
}

fn demo_machine(tasks: &TaskRegistry) -> StateMachine {
    let map_branch = StateMachine::builder()
        .start_at("MapTask")
        .pacing(Duration::ZERO)
        .task(TaskState::new("MapTask", tasks.get("MapTask").unwrap()).next("MapEnd"))
        .end("MapEnd")
        .build()
        .unwrap();

    let branch_a = StateMachine::builder()
        .start_at("BranchATask")
        .pacing(Duration::ZERO)
        .task(TaskState::new("BranchATask", tasks.get("BranchATask").unwrap()))
        .build()
        .unwrap();

    let branch_b = StateMachine::builder()
        .start_at("BranchBTask")
        .pacing(Duration::ZERO)
        .task(TaskState::new("BranchBTask", tasks.get("BranchBTask").unwrap()))
        .build()
        .unwrap();

    StateMachine::builder()
        .start_at("StartTask")
        .pacing(Duration::ZERO)
        .task(TaskState::new("StartTask", tasks.get("StartTask").unwrap()).next("TestPassState"))
        .pass(
            PassState::new("TestPassState", "TestMapState").with_modifier(|ctx| {
                ctx.insert("message", "data has been passed along");
            }),
        )
        .map(MapState::new(
            "TestMapState",
            "items_to_process",
            "map_output",
            map_branch,
            "TestChoiceState",
        ))
        .choice(
            ChoiceState::new("TestChoiceState", "DefaultTask")
                .when(Condition::string_equals("go"), "TestParallelState")
                .when(Condition::numeric_equals(10.0), "SucceedingTask"),
        )
        .parallel(ParallelState::new(
            "TestParallelState",
            vec![branch_a, branch_b],
            "WaitState",
        ))
        .wait(WaitState::new(
            "WaitState",
            Duration::from_millis(10),
            "TestRetryCatch",
        ))
        .task(
            TaskState::new("TestRetryCatch", tasks.get("TestRetryCatch").unwrap())
                .next("FinalEnd")
                .retry(RetryRule::new(
                    "API_BAD_GATEWAY",
                    Duration::from_millis(5),
                    3,
                ))
                .catch(CatchRule::new("API_BAD_GATEWAY", "FailState")),
        )
        .task(TaskState::new("DefaultTask", tasks.get("DefaultTask").unwrap()))
        .task(TaskState::new("SucceedingTask", tasks.get("SucceedingTask").unwrap()))
        .fail("FailState")
        .end("FinalEnd")
        .build()
        .unwrap()
}

const DEMO_DEFINITION: &str = r#"{
    "StartAt": "StartTask",
    "States": {
        "StartTask": { "Type": "Task", "Next": "TestPassState" },
        "TestPassState": { "Type": "Pass", "Next": "TestMapState" },
        "TestMapState": {
            "Type": "Map",
            "InputPath": "$.items_to_process",
            "ResultPath": "$.map_output",
            "Next": "TestChoiceState",
            "Iterator": {
                "StartAt": "MapTask",
                "States": {
                    "MapTask": { "Type": "Task", "Next": "MapEnd" },
                    "MapEnd": { "Type": "End" }
                }
            }
        },
        "TestChoiceState": {
            "Type": "Choice",
            "Choices": [
                {
                    "Condition": { "InputPath": "$.choice_value", "StringEquals": "go" },
                    "Next": "TestParallelState"
                },
                {
                    "Condition": { "InputPath": "$.numeric_value", "NumericEquals": 10 },
                    "Next": "SucceedingTask"
                }
            ],
            "Default": "DefaultTask"
        },
        "TestParallelState": {
            "Type": "Parallel",
            "Next": "WaitState",
            "Branches": [
                {
                    "StartAt": "BranchATask",
                    "States": { "BranchATask": { "Type": "Task", "End": true } }
                },
                {
                    "StartAt": "BranchBTask",
                    "States": { "BranchBTask": { "Type": "Task", "End": true } }
                }
            ]
        },
        "WaitState": { "Type": "Wait", "Seconds": 0, "Next": "TestRetryCatch" },
        "TestRetryCatch": {
            "Type": "Task",
            "Next": "FinalEnd",
            "Retry": [
                { "ErrorEquals": ["API_BAD_GATEWAY"], "IntervalSeconds": 0, "MaxAttempts": 3 }
            ],
            "Catch": [
                { "ErrorEquals": ["API_BAD_GATEWAY"], "Next": "FailState" }
            ]
        },
        "DefaultTask": { "Type": "Task", "End": true },
        "SucceedingTask": { "Type": "Task", "End": true },
        "FailState": { "Type": "Fail" },
        "FinalEnd": { "Type": "End" }
    }
}"#;

#[tokio::test]
async fn test_demo_workflow_retries_then_fails_in_fail_state() {
    init_tracing();
    let attempts = Arc::new(AtomicU32::new(0));
    let tasks = demo_registry(Arc::clone(&attempts));
    let machine = demo_machine(&tasks);

    let error = machine
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap_err();

    // Retry budget of 3 means four executions before the catch fires.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(
        error.to_string(),
        "state 'FailState' failed: failure in state 'FailState'"
    );
}

#[tokio::test]
async fn test_builder_and_definition_runs_agree() {
    init_tracing();

    let built_attempts = Arc::new(AtomicU32::new(0));
    let built_tasks = demo_registry(Arc::clone(&built_attempts));
    let built = demo_machine(&built_tasks);
    let built_error = built
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap_err();

    let loaded_attempts = Arc::new(AtomicU32::new(0));
    let loaded_tasks = demo_registry(Arc::clone(&loaded_attempts));
    let loaded = StateMachineDefinition::from_json(DEMO_DEFINITION)
        .unwrap()
        .compile(&loaded_tasks)
        .unwrap();
    let loaded_error = loaded
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap_err();

    assert_eq!(built_error.to_string(), loaded_error.to_string());
    assert_eq!(
        built_attempts.load(Ordering::SeqCst),
        loaded_attempts.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_map_outputs_follow_input_order_not_completion_order() {
    init_tracing();

    // Later items finish first; the collected outputs must not.
    let iterator = StateMachine::builder()
        .start_at("Process")
        .pacing(Duration::ZERO)
        .task(TaskState::new(
            "Process",
            task_fn(|_token, ctx| async move {
                let item = {
                    let guard = ctx.lock().await;
                    guard
                        .get_f64(ITEM_KEY)
                        .ok_or_else(|| TaskError::plain("item is not a number"))?
                };
                tokio::time::sleep(Duration::from_millis(50 - (item as u64) * 10)).await;
                ctx.lock().await.insert("processed_item", item * 10.0);
                Ok(())
            }),
        ))
        .build()
        .unwrap();

    let machine = StateMachine::builder()
        .start_at("Fan")
        .pacing(Duration::ZERO)
        .map(MapState::new("Fan", "items", "results", iterator, "Done"))
        .end("Done")
        .build()
        .unwrap();

    let mut initial = Context::new();
    initial.insert("items", json!([1, 2, 3, 4]));
    let output = machine
        .run(CancellationToken::new(), initial)
        .await
        .unwrap();

    let results = output.get_array("results").unwrap();
    assert_eq!(results.len(), 4);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result["processed_item"], json!((index + 1) as f64 * 10.0));
    }
}

#[tokio::test]
async fn test_parallel_branches_fold_into_parent_context() {
    init_tracing();

    let branch = |name: &'static str| {
        StateMachine::builder()
            .start_at("Work")
            .pacing(Duration::ZERO)
            .task(TaskState::new(
                "Work",
                task_fn(move |_token, ctx| async move {
                    ctx.lock().await.insert("branch", name);
                    Ok(())
                }),
            ))
            .build()
            .unwrap()
    };

    let machine = StateMachine::builder()
        .start_at("Split")
        .pacing(Duration::ZERO)
        .parallel(ParallelState::new(
            "Split",
            vec![branch("a"), branch("b")],
            "Done",
        ))
        .end("Done")
        .build()
        .unwrap();

    let output = machine
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap();

    let outputs = output.get_array(PARALLEL_OUTPUT_KEY).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["branch"], json!("a"));
    assert_eq!(outputs[1]["branch"], json!("b"));
}

#[tokio::test]
async fn test_unmatched_error_terminates_run_naming_the_task() {
    init_tracing();

    let machine = StateMachine::builder()
        .start_at("Fragile")
        .pacing(Duration::ZERO)
        .task(
            TaskState::new(
                "Fragile",
                task_fn(|_token, _ctx| async {
                    Err(TaskError::named("UNEXPECTED", "nobody handles this"))
                }),
            )
            .next("Done")
            .retry(RetryRule::new("SOMETHING_ELSE", Duration::from_millis(1), 3)),
        )
        .end("Done")
        .build()
        .unwrap();

    let error = machine
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap_err();

    assert!(matches!(
        &error,
        StateMachineError::StateFailed { state, .. } if state.as_str() == "Fragile"
    ));
    assert!(error.to_string().contains("UNEXPECTED"));
}

#[tokio::test]
async fn test_timeout_propagates_as_named_timeout() {
    init_tracing();

    let machine = StateMachine::builder()
        .start_at("Slow")
        .pacing(Duration::ZERO)
        .task(
            TaskState::new(
                "Slow",
                task_fn(|token, _ctx| async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(()),
                        _ = token.cancelled() => Err(TaskError::plain("interrupted")),
                    }
                }),
            )
            .next("Done")
            .timeout(Duration::from_millis(20)),
        )
        .end("Done")
        .build()
        .unwrap();

    let error = machine
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap_err();
    assert!(error.to_string().contains(kumihimo::TIMEOUT_ERROR));
}

#[tokio::test]
async fn test_cancelling_the_run_interrupts_a_wait() {
    init_tracing();

    let machine = StateMachine::builder()
        .start_at("Hold")
        .pacing(Duration::ZERO)
        .wait(WaitState::new("Hold", Duration::from_secs(60), "Done"))
        .end("Done")
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let run = tokio::spawn({
        let token = token.clone();
        async move { machine.run(token, Context::new()).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = run.await.unwrap();
    let error = result.unwrap_err();
    assert!(matches!(
        &error,
        StateMachineError::StateFailed { state, .. } if state.as_str() == "Hold"
    ));
    assert!(error.to_string().contains("cancelled"));
}

#[tokio::test]
async fn test_choice_routes_numeric_path_when_string_rule_misses() {
    init_tracing();

    let mut tasks = TaskRegistry::new();
    tasks.register(
        "StartTask",
        task_fn(|_token, ctx| async move {
            let mut guard = ctx.lock().await;
            guard.insert("choice_value", "halt");
            guard.insert("numeric_value", 10);
            Ok(())
        }),
    );
    for name in ["SucceedingTask", "DefaultTask"] {
        tasks.register(
            name,
            task_fn(move |_token, ctx| async move {
                ctx.lock().await.insert("ran", name);
                Ok(())
            }),
        );
    }

    let machine = StateMachine::builder()
        .start_at("StartTask")
        .pacing(Duration::ZERO)
        .task(TaskState::new("StartTask", tasks.get("StartTask").unwrap()).next("Route"))
        .choice(
            ChoiceState::new("Route", "DefaultTask")
                .when(Condition::string_equals("go"), "DefaultTask")
                .when(
                    Condition::numeric_equals(10.0).input_path("$.numeric_value"),
                    "SucceedingTask",
                ),
        )
        .task(TaskState::new("SucceedingTask", tasks.get("SucceedingTask").unwrap()))
        .task(TaskState::new("DefaultTask", tasks.get("DefaultTask").unwrap()))
        .build()
        .unwrap();

    let output = machine
        .run(CancellationToken::new(), Context::new())
        .await
        .unwrap();
    assert_eq!(output.get_str("ran"), Some("SucceedingTask"));
}

//! Map states: fan-out over an array input.

use crate::context::{Context, SharedContext};
use crate::error::StateMachineError;
use crate::machine::StateMachine;
use crate::state::StateName;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Context key under which each branch receives its array element.
pub const ITEM_KEY: &str = "item";

/// Runs one instantiation of a sub-workflow per element of an array
/// read from the context.
///
/// All branches run concurrently, each with its own isolated context
/// seeded with the element under [`ITEM_KEY`]. The iterator template is
/// shared read-only across branches. Fan-out width is unbounded.
///
/// On success the final context of every branch is collected, ordered
/// by input index regardless of completion order, into an array written
/// at the result key. If any branch fails, the whole state fails and no
/// result is written; when several branches fail, which error surfaces
/// is whichever completion is observed first, and callers must not
/// depend on the selection.
pub struct MapState {
    name: StateName,
    input: String,
    result: String,
    iterator: Arc<StateMachine>,
    next: StateName,
}

impl MapState {
    /// Creates a map state iterating `iterator` over the array at
    /// `input`, writing the collected outputs at `result`.
    pub fn new(
        name: impl Into<StateName>,
        input: impl Into<String>,
        result: impl Into<String>,
        iterator: StateMachine,
        next: impl Into<StateName>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            result: result.into(),
            iterator: Arc::new(iterator),
            next: next.into(),
        }
    }

    /// Returns the state's name.
    pub fn name(&self) -> &StateName {
        &self.name
    }

    pub(crate) fn next(&self) -> &StateName {
        &self.next
    }

    pub(crate) async fn execute(
        &self,
        token: &CancellationToken,
        ctx: &SharedContext,
    ) -> Result<Option<StateName>, StateMachineError> {
        info!("executing map state '{}'", self.name);

        let items = {
            let guard = ctx.lock().await;
            match guard.get(&self.input) {
                Some(Value::Array(items)) => items.clone(),
                _ => {
                    return Err(StateMachineError::InvalidInput {
                        key: self.input.clone(),
                    })
                }
            }
        };

        let total = items.len();
        let mut branches: JoinSet<(usize, Result<Context, StateMachineError>)> = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let machine = Arc::clone(&self.iterator);
            let token = token.clone();
            let mut seed = Context::new();
            seed.insert(ITEM_KEY, item);
            branches.spawn(async move { (index, machine.run_owned(token, seed).await) });
        }

        let outputs = join_branches(&mut branches, total).await?;
        ctx.lock()
            .await
            .insert(self.result.clone(), Value::Array(outputs));

        info!("map state '{}' finished {} branches", self.name, total);
        Ok(Some(self.next.clone()))
    }
}

/// Drains a branch set, collecting outputs by branch index.
///
/// All branches are awaited even after a failure is seen; the first
/// failure observed on the completion channel becomes the result.
pub(crate) async fn join_branches(
    branches: &mut JoinSet<(usize, Result<Context, StateMachineError>)>,
    total: usize,
) -> Result<Vec<Value>, StateMachineError> {
    let mut outputs = vec![Value::Null; total];
    let mut failure: Option<StateMachineError> = None;

    while let Some(joined) = branches.join_next().await {
        match joined {
            Ok((index, Ok(branch_ctx))) => outputs[index] = branch_ctx.into_value(),
            Ok((index, Err(error))) => {
                if failure.is_none() {
                    failure = Some(StateMachineError::Branch {
                        index,
                        source: Box::new(error),
                    });
                }
            }
            Err(error) => {
                if failure.is_none() {
                    failure = Some(StateMachineError::Join(error.to_string()));
                }
            }
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(outputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::machine::StateMachine;
    use crate::task::{task_fn, TaskState};
    use serde_json::json;
    use std::time::Duration;

    fn doubling_iterator() -> StateMachine {
        StateMachine::builder()
            .start_at("Double")
            .pacing(Duration::ZERO)
            .task(TaskState::new(
                "Double",
                task_fn(|_token, ctx| async move {
                    let mut guard = ctx.lock().await;
                    let item = guard.get_f64(ITEM_KEY).ok_or_else(|| {
                        TaskError::plain(format!("invalid item: {:?}", guard.get(ITEM_KEY)))
                    })?;
                    guard.insert("doubled", item * 2.0);
                    Ok(())
                }),
            ))
            .build()
            .unwrap()
    }

    fn failing_iterator() -> StateMachine {
        StateMachine::builder()
            .start_at("Explode")
            .pacing(Duration::ZERO)
            .task(TaskState::new(
                "Explode",
                task_fn(|_token, ctx| async move {
                    let item = ctx.lock().await.get_f64(ITEM_KEY);
                    if item == Some(2.0) {
                        Err(TaskError::named("BAD_ITEM", "cannot process"))
                    } else {
                        Ok(())
                    }
                }),
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_outputs_ordered_by_input_index() {
        let map = MapState::new("Fan", "items", "results", doubling_iterator(), "Next");

        let mut ctx = Context::new();
        ctx.insert("items", json!([1, 2, 3, 4, 5]));
        let ctx = ctx.shared();

        let next = map.execute(&CancellationToken::new(), &ctx).await;
        assert!(matches!(next, Ok(Some(name)) if name.as_str() == "Next"));

        let guard = ctx.lock().await;
        let results = guard.get_array("results").unwrap();
        assert_eq!(results.len(), 5);
        for (index, output) in results.iter().enumerate() {
            assert_eq!(output["doubled"], json!((index + 1) as f64 * 2.0));
        }
    }

    #[tokio::test]
    async fn test_missing_input_is_invalid() {
        let map = MapState::new("Fan", "items", "results", doubling_iterator(), "Next");

        let ctx = Context::new().shared();
        let result = map.execute(&CancellationToken::new(), &ctx).await;
        assert!(matches!(
            result,
            Err(StateMachineError::InvalidInput { key }) if key == "items"
        ));
    }

    #[tokio::test]
    async fn test_non_array_input_is_invalid() {
        let map = MapState::new("Fan", "items", "results", doubling_iterator(), "Next");

        let mut ctx = Context::new();
        ctx.insert("items", "not an array");
        let ctx = ctx.shared();

        let result = map.execute(&CancellationToken::new(), &ctx).await;
        assert!(matches!(result, Err(StateMachineError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_branch_failure_discards_all_outputs() {
        let map = MapState::new("Fan", "items", "results", failing_iterator(), "Next");

        let mut ctx = Context::new();
        ctx.insert("items", json!([1, 2, 3]));
        let ctx = ctx.shared();

        let result = map.execute(&CancellationToken::new(), &ctx).await;
        assert!(matches!(
            result,
            Err(StateMachineError::Branch { index: 1, .. })
        ));
        assert!(!ctx.lock().await.contains_key("results"));
    }
}

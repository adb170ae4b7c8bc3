//! Parallel states: concurrent execution of a fixed branch list.

use crate::context::{Context, SharedContext};
use crate::error::StateMachineError;
use crate::machine::StateMachine;
use crate::map::join_branches;
use crate::state::StateName;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Context key under which a parallel state's branch outputs land.
pub const PARALLEL_OUTPUT_KEY: &str = "parallel_output";

/// Concurrently runs a fixed, statically-configured list of
/// sub-workflow branches.
///
/// Each branch starts with an empty context; there is no input
/// splitting. Join semantics mirror [`MapState`](crate::MapState):
/// every branch is awaited, the final branch contexts are collected in
/// branch-list order at [`PARALLEL_OUTPUT_KEY`], any single failure
/// fails the state with no output written, and the error surfaced when
/// several branches fail is not deterministic.
pub struct ParallelState {
    name: StateName,
    branches: Vec<Arc<StateMachine>>,
    next: StateName,
}

impl ParallelState {
    /// Creates a parallel state running `branches` concurrently.
    pub fn new(
        name: impl Into<StateName>,
        branches: Vec<StateMachine>,
        next: impl Into<StateName>,
    ) -> Self {
        Self {
            name: name.into(),
            branches: branches.into_iter().map(Arc::new).collect(),
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
        info!("executing parallel state '{}'", self.name);

        let total = self.branches.len();
        let mut branches: JoinSet<(usize, Result<Context, StateMachineError>)> = JoinSet::new();
        for (index, branch) in self.branches.iter().enumerate() {
            let machine = Arc::clone(branch);
            let token = token.clone();
            branches.spawn(async move { (index, machine.run_owned(token, Context::new()).await) });
        }

        let outputs = join_branches(&mut branches, total).await?;
        ctx.lock()
            .await
            .insert(PARALLEL_OUTPUT_KEY, Value::Array(outputs));

        info!("parallel state '{}' finished {} branches", self.name, total);
        Ok(Some(self.next.clone()))
    }
}

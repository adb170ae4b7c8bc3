//! The state machine container and its run loop.

use crate::builder::StateMachineBuilder;
use crate::context::{Context, SharedContext};
use crate::error::StateMachineError;
use crate::state::{State, StateName};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Delay applied between successive top-level transitions.
///
/// A deliberate throttle, not a correctness requirement; override with
/// [`StateMachineBuilder::pacing`], including to zero.
pub const DEFAULT_PACING: Duration = Duration::from_millis(50);

/// An immutable graph of named states with a designated start state.
///
/// A machine is constructed once, by [`StateMachineBuilder`] or from a
/// JSON document ([`StateMachineDefinition`](crate::StateMachineDefinition)),
/// and may be run any number of times. `run` borrows the machine
/// immutably, so one machine value can serve as the shared template for
/// concurrent Map/Parallel branches.
pub struct StateMachine {
    states: HashMap<StateName, State>,
    start_at: StateName,
    pacing: Duration,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("start_at", &self.start_at)
            .finish()
    }
}

impl StateMachine {
    pub(crate) fn new(
        states: HashMap<StateName, State>,
        start_at: StateName,
        pacing: Duration,
    ) -> Self {
        Self {
            states,
            start_at,
            pacing,
        }
    }

    /// Creates a new state machine builder.
    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::new()
    }

    /// Returns the name of the start state.
    pub fn start_state(&self) -> &StateName {
        &self.start_at
    }

    /// Returns `true` if a state with the given name exists.
    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Returns an iterator over all registered state names.
    pub fn state_names(&self) -> impl Iterator<Item = &StateName> {
        self.states.keys()
    }

    /// Returns the number of registered states.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Drives one run through the graph.
    ///
    /// A fresh execution context is created from `initial` and threaded
    /// through the states; the loop executes the current state, advances
    /// to the transition it yields, and stops when a state yields no
    /// transition. The run is sequential at this level; concurrency only
    /// happens inside Task, Map, and Parallel states.
    ///
    /// `token` flows into every nested branch run and every task
    /// attempt. Cancelling it interrupts waits and in-flight timers;
    /// already-spawned units of work are signalled, not aborted.
    ///
    /// Returns the final context on success, or a single error wrapped
    /// with the name of the state where it originated.
    pub async fn run(
        &self,
        token: CancellationToken,
        initial: Context,
    ) -> Result<Context, StateMachineError> {
        let ctx: SharedContext = initial.shared();
        let mut current = self.start_at.clone();

        loop {
            let state = self
                .states
                .get(&current)
                .ok_or_else(|| StateMachineError::StateNotFound(current.clone()))?;
            debug!("entering state '{}'", current);

            let next = state.execute(&token, &ctx).await.map_err(|error| {
                StateMachineError::StateFailed {
                    state: current.clone(),
                    source: Box::new(error),
                }
            })?;

            match next {
                Some(name) => {
                    current = name;
                    if !self.pacing.is_zero() {
                        tokio::time::sleep(self.pacing).await;
                    }
                }
                None => break,
            }
        }

        info!("run completed in state '{}'", current);
        // A timed-out task attempt may still hold the context handle;
        // taking the data leaves any late writer a hollow context.
        let mut guard = ctx.lock().await;
        Ok(std::mem::take(&mut *guard))
    }

    /// `run` behind an owned, type-erased future, for spawning branch
    /// runs without the future types of `run` and the fan-out states
    /// recursively containing each other.
    pub(crate) fn run_owned(
        self: Arc<Self>,
        token: CancellationToken,
        initial: Context,
    ) -> Pin<Box<dyn Future<Output = Result<Context, StateMachineError>> + Send>> {
        Box::pin(async move { self.run(token, initial).await })
    }
}

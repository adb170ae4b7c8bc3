//! Commonly used types and traits

pub use crate::builder::StateMachineBuilder;
pub use crate::choice::{ChoiceState, Condition};
pub use crate::context::{Context, SharedContext};
pub use crate::definition::{StateMachineDefinition, TaskRegistry};
pub use crate::error::{StateMachineError, TaskError};
pub use crate::machine::StateMachine;
pub use crate::map::MapState;
pub use crate::parallel::ParallelState;
pub use crate::state::{PassState, StateName, WaitState};
pub use crate::task::{task_fn, CatchRule, RetryRule, TaskHandler, TaskState};
pub use tokio_util::sync::CancellationToken;

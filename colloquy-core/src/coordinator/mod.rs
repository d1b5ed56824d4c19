//! Session orchestration: the per-conversation turn protocol, the
//! orchestration state machine and the plumbing into metrics, traces and
//! history.

mod decomposition;
mod engine;
mod prompts;
mod session;
mod state;

pub use decomposition::{execution_order, Decomposition, Subtask};
pub use engine::{
    estimate_tokens, CancelHandle, CombinedResult, CoordinatorOptions, SessionCoordinator,
};
pub use prompts::DIRECT_PLAN_NOTE;
pub use session::Session;
pub use state::{CoordinatorState, StateChange, StateMachine};

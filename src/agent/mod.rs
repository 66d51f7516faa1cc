//! Agent module: the control loop and everything it owns per task.

mod context;
mod events;
mod orchestrator;
mod session;
mod slot;
mod stagnation;
mod state;
#[cfg(test)]
mod testing;

pub use context::{ContextManager, ConversationEntry, Role, DEFAULT_CONTEXT_WINDOW};
pub use events::{EventPublisher, EventRecord, TaskEvent, EVENT_CAPACITY};
pub use session::{new_task_id, Agent, Collaborators, Session, SessionError, TaskHandle};
pub use slot::{PlanningSlot, SlotPoll};
pub use stagnation::{StagnationConfig, StagnationDetector, StagnationReport};
pub use state::{FailureOrigin, FailureRecord, OrchestratorState, TaskOutcome, TaskStatus};

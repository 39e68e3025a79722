// Job state machine shared by every scheduler backend.
//
// States, events and the transition table live here; backends hold a
// `JobStateMachine` per job and drive it with `JobEvent`s.

pub mod errors;
pub mod events;
pub mod job_state_machine;
pub mod states;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::JobEvent;
pub use job_state_machine::JobStateMachine;
pub use states::{JobState, RunStatus};

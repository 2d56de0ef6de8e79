//! Run and Task state machines.
//!
//! Each machine validates and executes state transitions, enforcing the
//! allowed transition graph, optimistic locking, and timestamp management.
//! Both machines follow the same shape: `is_valid_transition` is a pure
//! predicate over `(from, to)`, and `transition` wraps the status-gated
//! repository update with the side effects the graph requires.

pub mod dispatch;
pub mod run;
pub mod task;

pub use run::RunStateMachine;
pub use task::TaskStateMachine;

//! Shared data model and collaborator capabilities for the tfops bridge.
//!
//! Defines the run actions, trigger requests, review-thread and run-execution
//! capabilities, and the inbound event payloads consumed from the queue.

pub mod inbound_event;
pub mod review_thread;
pub mod run_action;
pub mod run_execution;
pub mod text;

pub use inbound_event::*;
pub use review_thread::*;
pub use run_action::*;
pub use run_execution::*;
pub use text::truncate_chars;

//! Namespace allow-list gating for inbound review events.

pub mod access_gate;
pub mod allow_list;

pub use access_gate::AccessGate;
pub use allow_list::AllowList;

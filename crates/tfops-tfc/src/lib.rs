//! Terraform Cloud implementation of the run-execution capability.
//!
//! [`TfcClient`] looks up the target workspace and creates a run for each
//! trigger request. Comment trailing arguments are translated by
//! [`parse_run_arguments`].

pub mod run_arguments;
pub mod tfc_client;
mod transport;

pub use run_arguments::{parse_run_arguments, RunArguments};
pub use tfc_client::TfcClient;

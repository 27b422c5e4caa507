//! Source-control capability and revision diffing for workspace resolution.
//!
//! [`changed_files`] computes the paths a merge request touches by diffing the
//! merge base of the two revisions against the newest one. [`GitCliRepository`]
//! implements [`SourceControl`] on top of a local clone using the `git` CLI.

pub mod git_cli;
pub mod revision_diff;
pub mod source_control;

pub use git_cli::GitCliRepository;
pub use revision_diff::changed_files;
pub use source_control::{FetchOutcome, SourceControl, SourceControlError, SourceControlResult};

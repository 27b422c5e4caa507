//! GitLab REST implementation of the review-thread capability.

pub mod gitlab_client;
mod transport;

pub use gitlab_client::GitlabClient;

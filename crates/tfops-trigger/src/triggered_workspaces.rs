use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of one isolated per-workspace trigger.
pub enum TriggerOutcome {
    Executed { workspace: String, run_id: String },
    Errored { workspace: String, error: String },
}

impl TriggerOutcome {
    pub fn workspace(&self) -> &str {
        match self {
            Self::Executed { workspace, .. } | Self::Errored { workspace, .. } => workspace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErroredWorkspace {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Aggregate of a trigger batch. Every requested workspace lands in exactly
/// one of the two lists, each ordered by workspace name.
pub struct TriggeredWorkspaces {
    pub executed: Vec<String>,
    pub errored: Vec<ErroredWorkspace>,
}

impl TriggeredWorkspaces {
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = TriggerOutcome>,
    {
        let mut aggregate = Self::default();
        for outcome in outcomes {
            match outcome {
                TriggerOutcome::Executed { workspace, .. } => aggregate.executed.push(workspace),
                TriggerOutcome::Errored { workspace, error } => {
                    aggregate.errored.push(ErroredWorkspace {
                        name: workspace,
                        error,
                    })
                }
            }
        }
        aggregate.executed.sort();
        aggregate.errored.sort_by(|left, right| left.name.cmp(&right.name));
        aggregate
    }

    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.errored.is_empty()
    }

    pub fn total(&self) -> usize {
        self.executed.len() + self.errored.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.errored.is_empty()
    }
}

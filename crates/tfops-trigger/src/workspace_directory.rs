use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Validation failures for a workspace directory mapping.
pub enum WorkspaceDirectoryError {
    #[error("workspace entry {index} has an empty name")]
    EmptyName { index: usize },
    #[error("workspace '{name}' is configured more than once")]
    DuplicateName { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One workspace and the repository directories that feed it.
pub struct WorkspaceEntry {
    pub name: String,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub trigger_dirs: Vec<String>,
}

impl WorkspaceEntry {
    pub fn new(name: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            trigger_dirs: Vec::new(),
        }
    }

    pub fn with_trigger_dirs<I, S>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    fn owns(&self, path: &str) -> bool {
        path_within(path, &self.dir)
            || self
                .trigger_dirs
                .iter()
                .any(|dir| path_within(path, dir))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WorkspaceEntry>", into = "Vec<WorkspaceEntry>")]
/// Maps repository paths to the workspaces that own them.
pub struct WorkspaceDirectory {
    entries: Vec<WorkspaceEntry>,
}

impl WorkspaceDirectory {
    pub fn new(entries: Vec<WorkspaceEntry>) -> Result<Self, WorkspaceDirectoryError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(WorkspaceDirectoryError::EmptyName { index });
            }
            if !seen.insert(name.clone()) {
                return Err(WorkspaceDirectoryError::DuplicateName { name });
            }
            normalized.push(WorkspaceEntry {
                name,
                dir: normalize_dir(&entry.dir),
                trigger_dirs: entry
                    .trigger_dirs
                    .iter()
                    .map(|dir| normalize_dir(dir))
                    .collect(),
            });
        }
        Ok(Self {
            entries: normalized,
        })
    }

    pub fn entries(&self) -> &[WorkspaceEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    pub fn owners_of<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let path = normalize_dir(path);
        self.entries
            .iter()
            .filter(move |entry| entry.owns(&path))
            .map(|entry| entry.name.as_str())
    }

    /// Workspaces owning at least one of `paths`, in ascending name order.
    pub fn workspaces_for_paths<S: AsRef<str>>(&self, paths: &[S]) -> BTreeSet<String> {
        paths
            .iter()
            .flat_map(|path| self.owners_of(path.as_ref()))
            .map(str::to_string)
            .collect()
    }
}

impl TryFrom<Vec<WorkspaceEntry>> for WorkspaceDirectory {
    type Error = WorkspaceDirectoryError;

    fn try_from(entries: Vec<WorkspaceEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<WorkspaceDirectory> for Vec<WorkspaceEntry> {
    fn from(directory: WorkspaceDirectory) -> Self {
        directory.entries
    }
}

fn normalize_dir(raw: &str) -> String {
    let mut value = raw.trim();
    while let Some(stripped) = value.strip_prefix("./") {
        value = stripped;
    }
    let value = value.trim_end_matches('/');
    if value == "." {
        return String::new();
    }
    value.to_string()
}

/// Component-wise prefix match; an empty directory contains every path.
fn path_within(path: &str, dir: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    match path.strip_prefix(dir) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

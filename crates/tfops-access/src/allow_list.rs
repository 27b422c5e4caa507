use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
/// Immutable list of allowed source-namespace prefixes.
pub struct AllowList {
    prefixes: Vec<String>,
}

impl AllowList {
    pub fn from_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized = prefixes
            .into_iter()
            .map(|prefix| prefix.as_ref().trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .collect::<Vec<_>>();
        normalized.sort();
        normalized.dedup();
        Self {
            prefixes: normalized,
        }
    }

    /// Parses a comma-separated list such as `acme/,platform/infra`.
    pub fn from_delimited(raw: &str) -> Self {
        Self::from_prefixes(raw.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn matches(&self, namespace: &str) -> bool {
        let namespace = namespace.trim();
        !namespace.is_empty()
            && self
                .prefixes
                .iter()
                .any(|prefix| namespace.starts_with(prefix.as_str()))
    }
}

impl From<Vec<String>> for AllowList {
    fn from(prefixes: Vec<String>) -> Self {
        Self::from_prefixes(prefixes)
    }
}

impl From<AllowList> for Vec<String> {
    fn from(list: AllowList) -> Self {
        list.prefixes
    }
}

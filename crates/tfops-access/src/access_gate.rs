use std::sync::Arc;

use tracing::debug;

use crate::allow_list::AllowList;

#[derive(Debug, Clone)]
/// Drops events from namespaces this deployment does not own. Rejection is
/// silent; it is not an authorization check on the commenting user.
pub struct AccessGate {
    allow_list: Arc<AllowList>,
}

impl AccessGate {
    pub fn new(allow_list: AllowList) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn is_allowed(&self, source_namespace: &str) -> bool {
        let allowed = self.allow_list.matches(source_namespace);
        if !allowed {
            debug!(
                namespace = source_namespace,
                configured_prefixes = self.allow_list.prefixes().len(),
                "namespace rejected by allow-list"
            );
        }
        allowed
    }
}

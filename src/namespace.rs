use std::path::{Path, PathBuf};

/// Default handle of the agent's own network namespace.
const HOST_NETNS: &str = "/proc/self/ns/net";

/// Per-loop namespace management context.
///
/// Opaque to the tracker: it is created and owned by the discovery loop and
/// lent to collaborators that need to enter a microservice's namespace and
/// return to the agent's own afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceContext {
    origin: PathBuf,
}

impl NamespaceContext {
    pub fn new() -> Self {
        Self::with_origin(HOST_NETNS)
    }

    pub fn with_origin(origin: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    /// Namespace to switch back to once a collaborator is done.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Handle of the network namespace of the process `pid`.
    pub fn netns_of(&self, pid: i64) -> PathBuf {
        PathBuf::from(format!("/proc/{pid}/ns/net"))
    }
}

impl Default for NamespaceContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netns_paths() {
        let ctx = NamespaceContext::new();
        assert_eq!(ctx.origin(), Path::new("/proc/self/ns/net"));
        assert_eq!(ctx.netns_of(42), PathBuf::from("/proc/42/ns/net"));
    }
}

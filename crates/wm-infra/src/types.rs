use std::fmt;

/// Remote operation attempted against a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineAction {
    Create,
    Get,
    Find,
    Delete,
}

impl MachineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Find => "find",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for MachineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-reported lifecycle state, narrowed to what the manager cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Started,
    Active,
}

/// Snapshot of a machine as reported by a provider. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMachine {
    pub id: i64,
    /// `None` when the provider reports a state outside started/active.
    pub state: Option<RemoteState>,
    pub ip_addresses: Vec<String>,
}

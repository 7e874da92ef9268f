use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use wm_infra::ProviderName;
use wm_infra::types::{RemoteMachine, RemoteState};

// ── MachineState ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "machine_state")]
pub enum MachineState {
    #[sqlx(rename = "unknown")]
    #[serde(rename = "unknown")]
    Unknown,
    #[sqlx(rename = "find/received")]
    #[serde(rename = "find/received")]
    FindReceived,
    #[sqlx(rename = "find/finding")]
    #[serde(rename = "find/finding")]
    FindFinding,
    #[sqlx(rename = "find/not-found")]
    #[serde(rename = "find/not-found")]
    FindNotFound,
    #[sqlx(rename = "find/not-findable")]
    #[serde(rename = "find/not-findable")]
    FindNotFindable,
    #[sqlx(rename = "create/received")]
    #[serde(rename = "create/received")]
    CreateReceived,
    #[sqlx(rename = "create/requested")]
    #[serde(rename = "create/requested")]
    CreateRequested,
    #[sqlx(rename = "create/failed")]
    #[serde(rename = "create/failed")]
    CreateFailed,
    #[sqlx(rename = "up/started")]
    #[serde(rename = "up/started")]
    UpStarted,
    #[sqlx(rename = "up/active")]
    #[serde(rename = "up/active")]
    UpActive,
    #[sqlx(rename = "delete/received")]
    #[serde(rename = "delete/received")]
    DeleteReceived,
    #[sqlx(rename = "delete/requested")]
    #[serde(rename = "delete/requested")]
    DeleteRequested,
    #[sqlx(rename = "delete/failed")]
    #[serde(rename = "delete/failed")]
    DeleteFailed,
    #[sqlx(rename = "delete/deleted")]
    #[serde(rename = "delete/deleted")]
    DeleteDeleted,
}

impl MachineState {
    pub const ALL: [Self; 14] = [
        Self::Unknown,
        Self::FindReceived,
        Self::FindFinding,
        Self::FindNotFound,
        Self::FindNotFindable,
        Self::CreateReceived,
        Self::CreateRequested,
        Self::CreateFailed,
        Self::UpStarted,
        Self::UpActive,
        Self::DeleteReceived,
        Self::DeleteRequested,
        Self::DeleteFailed,
        Self::DeleteDeleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::FindReceived => "find/received",
            Self::FindFinding => "find/finding",
            Self::FindNotFound => "find/not-found",
            Self::FindNotFindable => "find/not-findable",
            Self::CreateReceived => "create/received",
            Self::CreateRequested => "create/requested",
            Self::CreateFailed => "create/failed",
            Self::UpStarted => "up/started",
            Self::UpActive => "up/active",
            Self::DeleteReceived => "delete/received",
            Self::DeleteRequested => "delete/requested",
            Self::DeleteFailed => "delete/failed",
            Self::DeleteDeleted => "delete/deleted",
        }
    }

    /// Coarse grouping clients use to decide whether to keep polling.
    pub fn category(&self) -> StateCategory {
        match self {
            Self::Unknown => StateCategory::Unknown,
            Self::FindReceived | Self::FindFinding => StateCategory::Finding,
            Self::CreateReceived | Self::CreateRequested | Self::UpStarted => {
                StateCategory::PreActive
            }
            Self::UpActive => StateCategory::Active,
            Self::DeleteReceived | Self::DeleteRequested => StateCategory::Ending,
            Self::FindNotFound
            | Self::FindNotFindable
            | Self::CreateFailed
            | Self::DeleteFailed
            | Self::DeleteDeleted => StateCategory::End,
        }
    }

    /// A create request may restart the lifecycle from here.
    pub fn is_resettable(&self) -> bool {
        self.category() == StateCategory::End
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid machine state: {s}"))
    }
}

impl From<RemoteState> for MachineState {
    fn from(state: RemoteState) -> Self {
        match state {
            RemoteState::Started => Self::UpStarted,
            RemoteState::Active => Self::UpActive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCategory {
    Unknown,
    Finding,
    PreActive,
    Active,
    Ending,
    End,
}

// ── Machine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Machine {
    pub id: String,
    pub state: MachineState,
    pub remote_id: Option<i64>,
    ip_addresses: Vec<String>,
}

impl Machine {
    pub fn new(id: impl Into<String>, state: MachineState) -> Self {
        Self {
            id: id.into(),
            state,
            remote_id: None,
            ip_addresses: Vec::new(),
        }
    }

    /// Deduplicated, lexicographically sorted.
    pub fn ip_addresses(&self) -> &[String] {
        &self.ip_addresses
    }

    pub fn set_ip_addresses<I, S>(&mut self, ip_addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = ip_addresses.into_iter().map(Into::into).collect();
        self.ip_addresses = unique.into_iter().collect();
    }

    pub fn category(&self) -> StateCategory {
        self.state.category()
    }

    /// Restart the lifecycle for a fresh create request.
    pub fn reset_for_create(&mut self) {
        self.state = MachineState::CreateReceived;
        self.remote_id = None;
        self.ip_addresses.clear();
    }

    /// Fold a provider snapshot into the record.
    ///
    /// The remote state is only adopted while the machine is not being torn
    /// down or already finished.
    pub fn apply_remote(&mut self, remote: &RemoteMachine) {
        self.remote_id = Some(remote.id);
        self.set_ip_addresses(remote.ip_addresses.iter().cloned());

        if let Some(state) = remote.state
            && !matches!(self.category(), StateCategory::Ending | StateCategory::End)
        {
            self.state = state.into();
        }
    }
}

// ── MachineProviderRecord ───────────────────────────────────────────

/// Which provider holds a machine. Stored by name so that providers dropped
/// from configuration still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MachineProviderRecord {
    pub machine_id: String,
    pub provider: String,
}

impl MachineProviderRecord {
    pub fn new(machine_id: impl Into<String>, provider: ProviderName) -> Self {
        Self {
            machine_id: machine_id.into(),
            provider: provider.as_str().to_string(),
        }
    }
}

// ── ActionFailure ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    Unknown,
    UnsupportedProvider,
    ApiLimitExceeded,
    ApiAuthenticationFailure,
    CurlError,
    HttpError,
    UnprocessableRequest,
    RemoteMachineNotFound,
}

impl FailureCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::UnsupportedProvider => 1,
            Self::ApiLimitExceeded => 2,
            Self::ApiAuthenticationFailure => 3,
            Self::CurlError => 4,
            Self::HttpError => 5,
            Self::UnprocessableRequest => 6,
            Self::RemoteMachineNotFound => 7,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::UnsupportedProvider => "unsupported provider",
            Self::ApiLimitExceeded => "api limit exceeded",
            Self::ApiAuthenticationFailure => "api authentication failure",
            Self::CurlError => "curl error",
            Self::HttpError => "http error",
            Self::UnprocessableRequest => "unprocessable request",
            Self::RemoteMachineNotFound => "remote machine not found",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::UnsupportedProvider),
            2 => Some(Self::ApiLimitExceeded),
            3 => Some(Self::ApiAuthenticationFailure),
            4 => Some(Self::CurlError),
            5 => Some(Self::HttpError),
            6 => Some(Self::UnprocessableRequest),
            7 => Some(Self::RemoteMachineNotFound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailureContextValue {
    Int(i64),
    Text(String),
}

impl From<i64> for FailureContextValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for FailureContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FailureContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

pub type FailureContext = BTreeMap<String, FailureContextValue>;

/// The single diagnostic record kept for a machine's terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub machine_id: String,
    pub code: FailureCode,
    pub context: FailureContext,
}

impl ActionFailure {
    pub fn new(machine_id: impl Into<String>, code: FailureCode, context: FailureContext) -> Self {
        Self {
            machine_id: machine_id.into(),
            code,
            context,
        }
    }

    pub fn reason(&self) -> &'static str {
        self.code.reason()
    }
}

// ── MessageState ────────────────────────────────────────────────────

/// Declaration order is lifecycle order; states only ever advance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type, Serialize, Deserialize,
)]
#[sqlx(type_name = "message_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Created,
    Dispatched,
    Handling,
    Handled,
}

impl MessageState {
    /// Still counted as queued work.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, Self::Handled)
    }
}

//! Queue messages.
//!
//! A [`MachineRequest`] is one step of a workflow. Follow-up steps ride along
//! in `on_success` / `on_failure` and are dispatched by the handler once the
//! outcome is known, so a whole workflow is a finite tree of plain values.

use serde::{Deserialize, Serialize};
use wm_db::MachineState;
use wm_infra::types::MachineAction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRequest {
    pub unique_id: String,
    pub machine_id: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub on_success: Vec<MachineRequest>,
    #[serde(default)]
    pub on_failure: Vec<MachineRequest>,
    #[serde(flatten)]
    pub action: RequestAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestAction {
    Create,
    Get,
    Find {
        #[serde(default = "default_not_found_state")]
        on_not_found_state: MachineState,
        #[serde(default)]
        re_dispatch_on_success: bool,
    },
    Delete,
    CheckIsActive,
}

fn default_not_found_state() -> MachineState {
    MachineState::FindNotFound
}

impl RequestAction {
    /// Find with the default not-found state and no self re-dispatch.
    pub fn find() -> Self {
        Self::Find {
            on_not_found_state: default_not_found_state(),
            re_dispatch_on_success: false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Get => "get",
            Self::Find { .. } => "find",
            Self::Delete => "delete",
            Self::CheckIsActive => "check_is_active",
        }
    }

    /// The provider action this request performs, if any.
    pub fn remote_action(&self) -> Option<MachineAction> {
        match self {
            Self::Create => Some(MachineAction::Create),
            Self::Get => Some(MachineAction::Get),
            Self::Find { .. } => Some(MachineAction::Find),
            Self::Delete => Some(MachineAction::Delete),
            Self::CheckIsActive => None,
        }
    }

    /// State a machine is left in when this action fails for good.
    pub fn terminal_state(&self) -> Option<MachineState> {
        match self {
            Self::Create => Some(MachineState::CreateFailed),
            Self::Get => Some(MachineState::FindNotFound),
            Self::Find { .. } => Some(MachineState::FindNotFindable),
            Self::Delete => Some(MachineState::DeleteFailed),
            Self::CheckIsActive => None,
        }
    }
}

impl MachineRequest {
    pub fn new(
        unique_id: impl Into<String>,
        machine_id: impl Into<String>,
        action: RequestAction,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            machine_id: machine_id.into(),
            retry_count: 0,
            on_success: Vec::new(),
            on_failure: Vec::new(),
            action,
        }
    }

    pub fn then_on_success(mut self, request: MachineRequest) -> Self {
        self.on_success.push(request);
        self
    }

    pub fn then_on_failure(mut self, request: MachineRequest) -> Self {
        self.on_failure.push(request);
        self
    }

    /// Copy of this request one retry further along.
    pub fn with_incremented_retry_count(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Copy of this request under a different message id.
    pub fn with_unique_id(&self, unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            ..self.clone()
        }
    }

    pub fn kind(&self) -> &'static str {
        self.action.as_str()
    }
}

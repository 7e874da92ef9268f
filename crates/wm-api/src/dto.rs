use serde::Serialize;
use wm_core::MachineStatus;
use wm_db::{ActionFailure, FailureContext, MachineState, StateCategory};

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MachineResponse {
    pub id: String,
    pub state: MachineState,
    pub ip_addresses: Vec<String>,
    pub state_category: StateCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_failure: Option<FailureResponse>,
}

impl From<MachineStatus> for MachineResponse {
    fn from(status: MachineStatus) -> Self {
        let MachineStatus { machine, failure } = status;
        Self {
            state_category: machine.category(),
            state: machine.state,
            ip_addresses: machine.ip_addresses().to_vec(),
            id: machine.id,
            action_failure: failure.map(FailureResponse::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub code: i32,
    pub reason: &'static str,
    pub context: FailureContext,
}

impl From<ActionFailure> for FailureResponse {
    fn from(failure: ActionFailure) -> Self {
        Self {
            code: failure.code.code(),
            reason: failure.reason(),
            context: failure.context,
        }
    }
}

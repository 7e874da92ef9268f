use std::fmt;
use std::sync::Arc;

use wm_db::MachineState;

use crate::request::{MachineRequest, RequestAction};

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Builds the request trees for each workflow.
///
/// Ids are drawn outermost request first.
#[derive(Clone)]
pub struct RequestFactory {
    next_id: IdGenerator,
}

impl Default for RequestFactory {
    fn default() -> Self {
        Self::with_id_generator(|| uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Debug for RequestFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFactory").finish_non_exhaustive()
    }
}

impl RequestFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_generator(next_id: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            next_id: Arc::new(next_id),
        }
    }

    pub fn request(&self, machine_id: &str, action: RequestAction) -> MachineRequest {
        MachineRequest::new((self.next_id)(), machine_id, action)
    }

    /// Look the machine up first; create it only if no provider has it.
    pub fn find_then_create(&self, machine_id: &str) -> MachineRequest {
        self.request(
            machine_id,
            RequestAction::Find {
                on_not_found_state: MachineState::CreateReceived,
                re_dispatch_on_success: false,
            },
        )
        .then_on_failure(
            self.request(machine_id, RequestAction::Create)
                .then_on_success(self.check_active_then_get(machine_id)),
        )
    }

    pub fn find_then_check_active(&self, machine_id: &str) -> MachineRequest {
        self.request(machine_id, RequestAction::find())
            .then_on_success(self.check_active_then_get(machine_id))
    }

    /// Remove the machine, then keep looking until no provider reports it.
    pub fn delete(&self, machine_id: &str) -> MachineRequest {
        self.request(machine_id, RequestAction::Delete).then_on_success(self.request(
            machine_id,
            RequestAction::Find {
                on_not_found_state: MachineState::DeleteDeleted,
                re_dispatch_on_success: true,
            },
        ))
    }

    /// Same request, next attempt, new message.
    pub fn retry_of(&self, request: &MachineRequest) -> MachineRequest {
        self.renew_ids(&request.with_incremented_retry_count())
    }

    /// Same request and attempt, new message.
    pub fn repeat_of(&self, request: &MachineRequest) -> MachineRequest {
        self.renew_ids(request)
    }

    /// Copy with fresh ids throughout, so that follow-ups of two copies
    /// never share a message id either.
    fn renew_ids(&self, request: &MachineRequest) -> MachineRequest {
        let mut copy = request.with_unique_id((self.next_id)());
        copy.on_success = request.on_success.iter().map(|r| self.renew_ids(r)).collect();
        copy.on_failure = request.on_failure.iter().map(|r| self.renew_ids(r)).collect();
        copy
    }

    fn check_active_then_get(&self, machine_id: &str) -> MachineRequest {
        self.request(machine_id, RequestAction::CheckIsActive)
            .then_on_success(self.request(machine_id, RequestAction::Get))
    }
}

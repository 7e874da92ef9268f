use std::sync::Arc;

use tracing::info;
use wm_db::{ActionFailure, Machine, MachineState, MachineStore, MessageStateStore};

use crate::dispatcher::{DispatchError, RequestDispatcher};
use crate::factory::RequestFactory;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("machine id must not be empty")]
    InvalidId,

    #[error("machine id {0} is taken")]
    IdTaken(String),

    #[error("store error: {0}")]
    Store(#[from] wm_db::Error),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// A machine as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineStatus {
    pub machine: Machine,
    pub failure: Option<ActionFailure>,
}

/// Entry operations: translate a client call into a state change plus the
/// first message of the matching workflow.
#[derive(Clone)]
pub struct MachineService {
    store: Arc<dyn MachineStore>,
    messages: Arc<dyn MessageStateStore>,
    dispatcher: RequestDispatcher,
    factory: RequestFactory,
}

impl MachineService {
    pub fn new(
        store: Arc<dyn MachineStore>,
        messages: Arc<dyn MessageStateStore>,
        dispatcher: RequestDispatcher,
        factory: RequestFactory,
    ) -> Self {
        Self {
            store,
            messages,
            dispatcher,
            factory,
        }
    }

    /// Start (or restart) a machine. Only absent or finished ids are accepted.
    pub async fn create(&self, id: &str) -> Result<MachineStatus, ServiceError> {
        validate(id)?;

        let mut machine = match self.store.find_machine(id).await? {
            Some(machine) if !machine.state.is_resettable() => {
                return Err(ServiceError::IdTaken(id.to_string()));
            }
            Some(machine) => machine,
            None => Machine::new(id, MachineState::CreateReceived),
        };

        machine.reset_for_create();
        self.store.store_machine(&machine).await?;
        self.store.remove_failure(id).await?;

        self.dispatcher
            .dispatch(&self.factory.find_then_create(id))
            .await?;

        info!(machine_id = id, "machine creation accepted");
        Ok(MachineStatus {
            machine,
            failure: None,
        })
    }

    /// Current view of a machine. Unknown ids are looked up on the providers.
    pub async fn status(&self, id: &str) -> Result<MachineStatus, ServiceError> {
        validate(id)?;

        let machine = match self.store.find_machine(id).await? {
            Some(machine) => machine,
            None => {
                let machine = Machine::new(id, MachineState::FindReceived);
                self.store.store_machine(&machine).await?;
                self.dispatcher
                    .dispatch(&self.factory.find_then_check_active(id))
                    .await?;
                info!(machine_id = id, "unknown machine, looking it up");
                machine
            }
        };

        let failure = self.store.find_failure(id).await?;
        Ok(MachineStatus { machine, failure })
    }

    pub async fn delete(&self, id: &str) -> Result<MachineStatus, ServiceError> {
        validate(id)?;

        let mut machine = self
            .store
            .find_machine(id)
            .await?
            .unwrap_or_else(|| Machine::new(id, MachineState::DeleteReceived));
        machine.state = MachineState::DeleteReceived;
        self.store.store_machine(&machine).await?;

        self.dispatcher.dispatch(&self.factory.delete(id)).await?;

        info!(machine_id = id, "machine deletion accepted");
        let failure = self.store.find_failure(id).await?;
        Ok(MachineStatus { machine, failure })
    }

    /// Messages created, dispatched or being handled.
    pub async fn queue_size(&self) -> Result<u64, ServiceError> {
        Ok(self.messages.count_outstanding_messages().await?)
    }
}

fn validate(id: &str) -> Result<(), ServiceError> {
    if id.trim().is_empty() {
        Err(ServiceError::InvalidId)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wm_db::{FailureCode, FailureContext, MemoryStore, StateCategory};
    use wm_infra::ProviderName;
    use wm_infra::testing::ScriptedProvider;

    use super::*;
    use crate::request::RequestAction;
    use crate::testing::Harness;

    fn service(harness: &Harness) -> MachineService {
        harness.service()
    }

    #[tokio::test]
    async fn create_on_absent_id_starts_the_create_workflow() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);

        let status = service.create("m1").await.unwrap();

        assert_eq!(status.machine.state, MachineState::CreateReceived);
        let published = harness.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].0.action,
            RequestAction::Find {
                on_not_found_state: MachineState::CreateReceived,
                re_dispatch_on_success: false,
            }
        );
    }

    #[tokio::test]
    async fn create_on_a_live_machine_is_rejected_without_changes() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);

        for state in MachineState::ALL.into_iter().filter(|s| !s.is_resettable()) {
            let mut machine = Machine::new("m1", state);
            machine.remote_id = Some(9);
            machine.set_ip_addresses(["10.0.0.1"]);
            harness.store.store_machine(&machine).await.unwrap();

            let err = service.create("m1").await.unwrap_err();

            assert!(matches!(err, ServiceError::IdTaken(id) if id == "m1"));
            assert_eq!(harness.store.find_machine("m1").await.unwrap(), Some(machine));
        }
        assert!(harness.queue.published().is_empty());
    }

    #[tokio::test]
    async fn create_on_a_finished_machine_resets_it() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);

        for state in MachineState::ALL.into_iter().filter(|s| s.is_resettable()) {
            let mut machine = Machine::new("m1", state);
            machine.remote_id = Some(9);
            machine.set_ip_addresses(["10.0.0.1"]);
            harness.store.store_machine(&machine).await.unwrap();
            harness
                .store
                .create_failure_if_absent(&ActionFailure::new("m1", FailureCode::HttpError, FailureContext::new()))
                .await
                .unwrap();

            let status = service.create("m1").await.unwrap();

            assert_eq!(status.machine.state, MachineState::CreateReceived);
            assert_eq!(status.machine.remote_id, None);
            assert!(status.machine.ip_addresses().is_empty());
            assert!(harness.store.find_failure("m1").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn status_of_unknown_machine_starts_a_lookup() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);

        let status = service.status("m1").await.unwrap();

        assert_eq!(status.machine.state, MachineState::FindReceived);
        assert_eq!(status.machine.category(), StateCategory::Finding);
        let published = harness.queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0.action, RequestAction::find());
        assert_eq!(published[0].0.on_success[0].action, RequestAction::CheckIsActive);
    }

    #[tokio::test]
    async fn status_reports_the_recorded_failure() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);
        harness.seed("m1", MachineState::CreateFailed).await;
        let failure = ActionFailure::new("m1", FailureCode::ApiLimitExceeded, FailureContext::new());
        harness.store.create_failure_if_absent(&failure).await.unwrap();

        let status = service.status("m1").await.unwrap();

        assert_eq!(status.machine.state, MachineState::CreateFailed);
        assert_eq!(status.failure, Some(failure));
        assert!(harness.queue.published().is_empty());
    }

    #[tokio::test]
    async fn delete_always_starts_the_delete_workflow() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);
        harness.seed("m1", MachineState::UpActive).await;

        for id in ["m1", "m2"] {
            let status = service.delete(id).await.unwrap();
            assert_eq!(status.machine.state, MachineState::DeleteReceived);
        }

        let published = harness.queue.take();
        assert_eq!(published.len(), 2);
        assert!(published.iter().all(|(r, _)| r.action == RequestAction::Delete));
    }

    #[tokio::test]
    async fn queue_size_counts_outstanding_messages() {
        let store = Arc::new(MemoryStore::new());
        let harness = Harness::new(vec![ScriptedProvider::new(ProviderName::Hetzner)]);
        let service = MachineService::new(
            harness.store.clone(),
            store.clone(),
            harness.ctx().dispatcher.clone(),
            harness.factory().clone(),
        );
        store
            .set_message_state("a", wm_db::MessageState::Handling)
            .await
            .unwrap();
        store
            .set_message_state("b", wm_db::MessageState::Handled)
            .await
            .unwrap();

        assert_eq!(service.queue_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_ids_are_rejected() {
        let harness = Harness::new(vec![]);
        let service = service(&harness);

        assert!(matches!(service.status(" ").await, Err(ServiceError::InvalidId)));
    }
}

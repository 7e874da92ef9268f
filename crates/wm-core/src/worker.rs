use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use wm_db::{MessageState, MessageStateStore};

use crate::dispatcher::QueueReceiver;
use crate::handlers::MachineRequestHandler;
use crate::request::MachineRequest;

/// Consumes queued payloads, one task per message.
#[derive(Clone)]
pub struct Worker {
    handler: MachineRequestHandler,
    messages: Arc<dyn MessageStateStore>,
}

impl Worker {
    pub fn new(handler: MachineRequestHandler, messages: Arc<dyn MessageStateStore>) -> Self {
        Self { handler, messages }
    }

    /// Run until every sender of the queue is gone.
    pub async fn run(self, mut receiver: QueueReceiver) {
        info!("worker started");
        while let Some(payload) = receiver.recv().await {
            let worker = self.clone();
            tokio::spawn(async move { worker.process(&payload).await });
        }
        info!("message queue closed, worker stopping");
    }

    pub fn spawn(self, receiver: QueueReceiver) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Handle one payload. Failures are terminal for the message; the queue
    /// never redelivers it.
    pub async fn process(&self, payload: &str) {
        let request: MachineRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "dropping undecodable message");
                return;
            }
        };

        self.mark(&request, MessageState::Handling).await;

        match self.handler.handle(&request).await {
            Ok(()) => debug!(
                unique_id = %request.unique_id,
                machine_id = %request.machine_id,
                kind = request.kind(),
                "request handled"
            ),
            Err(e) => warn!(
                unique_id = %request.unique_id,
                machine_id = %request.machine_id,
                kind = request.kind(),
                error = %e,
                "request failed"
            ),
        }

        self.mark(&request, MessageState::Handled).await;
    }

    async fn mark(&self, request: &MachineRequest, state: MessageState) {
        if let Err(e) = self.messages.set_message_state(&request.unique_id, state).await {
            error!(unique_id = %request.unique_id, error = %e, "failed to update message state");
        }
    }
}

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically forget messages handled more than `retention` ago, so the
/// poll loops don't grow the message table without bound.
pub fn spawn_message_pruner(
    messages: Arc<dyn MessageStateStore>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = messages.prune_handled_messages(retention).await {
                warn!(error = %e, "failed to prune handled messages");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wm_db::{MachineState, MachineStore};
    use wm_infra::ProviderName;
    use wm_infra::failure::FailureKind;
    use wm_infra::testing::{ScriptedProvider, remote_machine};
    use wm_infra::types::RemoteState;

    use super::*;
    use crate::dispatcher::{ChannelQueue, DispatchDelays, RequestDispatcher};
    use crate::factory::RequestFactory;
    use crate::handlers::HandlerContext;
    use crate::service::MachineService;
    use crate::testing::Harness;

    #[tokio::test]
    async fn processing_tracks_message_state() {
        let harness = Harness::new(vec![ScriptedProvider::new(ProviderName::DigitalOcean)]);
        let worker = Worker::new(harness.handler.clone(), harness.store.clone());
        harness.seed("m1", MachineState::UpActive).await;

        let request = harness.factory().request("m1", crate::request::RequestAction::CheckIsActive);
        worker.process(&serde_json::to_string(&request).unwrap()).await;

        assert_eq!(
            harness.store.message_state(&request.unique_id).await,
            Some(MessageState::Handled)
        );
    }

    #[tokio::test]
    async fn garbage_payloads_are_dropped() {
        let harness = Harness::new(vec![]);
        let worker = Worker::new(harness.handler.clone(), harness.store.clone());

        worker.process("{not json").await;

        assert_eq!(harness.store.count_outstanding_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pruner_forgets_handled_messages() {
        let harness = Harness::new(vec![]);
        harness.store.set_message_state("old", MessageState::Handled).await.unwrap();
        harness.store.set_message_state("open", MessageState::Dispatched).await.unwrap();

        let pruner = spawn_message_pruner(harness.store.clone(), Duration::ZERO);
        for _ in 0..200 {
            if harness.store.message_state("old").await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pruner.abort();

        assert_eq!(harness.store.message_state("old").await, None);
        assert_eq!(harness.store.message_state("open").await, Some(MessageState::Dispatched));
    }

    async fn wait_for_state(store: &wm_db::MemoryStore, id: &str, state: MachineState) {
        for _ in 0..200 {
            if store.find_machine(id).await.unwrap().map(|m| m.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("machine {id} never reached {state}");
    }

    /// Wires the real channel queue to the worker, like the binary does.
    fn running_service(providers: Vec<ScriptedProvider>) -> (MachineService, Harness) {
        let harness = Harness::new(providers);
        let (queue, receiver) = ChannelQueue::channel();
        let delays = DispatchDelays {
            check_is_active: Duration::from_millis(5),
            get: Duration::ZERO,
            find: Duration::from_millis(5),
            retry: Duration::from_millis(5),
        };
        let dispatcher = RequestDispatcher::new(Arc::new(queue), harness.store.clone(), delays);
        let factory = RequestFactory::new();

        let ctx = HandlerContext {
            dispatcher: dispatcher.clone(),
            ..harness.ctx().clone()
        };
        Worker::new(MachineRequestHandler::new(ctx), harness.store.clone()).spawn(receiver);

        let service = MachineService::new(harness.store.clone(), harness.store.clone(), dispatcher, factory);
        (service, harness)
    }

    #[tokio::test]
    async fn create_then_status_reaches_active() {
        let (service, harness) = running_service(vec![ScriptedProvider::new(ProviderName::DigitalOcean)
            .on_create(Ok(remote_machine(11, Some(RemoteState::Started), &["10.0.0.5"])))
            .on_get(Ok(None))
            .on_get(Ok(Some(remote_machine(11, Some(RemoteState::Active), &["10.0.0.5"]))))]);

        service.create("m1").await.unwrap();
        wait_for_state(&harness.store, "m1", MachineState::UpActive).await;

        let status = service.status("m1").await.unwrap();
        assert_eq!(status.machine.remote_id, Some(11));
        assert_eq!(status.machine.ip_addresses(), ["10.0.0.5"]);
        assert!(status.failure.is_none());
    }

    #[tokio::test]
    async fn api_limit_on_create_fails_with_one_record() {
        let (service, harness) = running_service(vec![ScriptedProvider::new(ProviderName::DigitalOcean)
            .on_create(Err(FailureKind::ApiLimitExceeded { reset_timestamp: Some(123) }))]);

        service.create("m1").await.unwrap();
        wait_for_state(&harness.store, "m1", MachineState::CreateFailed).await;

        let status = service.status("m1").await.unwrap();
        let failure = status.failure.unwrap();
        assert_eq!(failure.code, wm_db::FailureCode::ApiLimitExceeded);
        assert_eq!(
            failure.context.get("reset-timestamp"),
            Some(&wm_db::FailureContextValue::Int(123))
        );
        assert_eq!(harness.providers[0].calls(wm_infra::types::MachineAction::Create), 1);
    }

    #[tokio::test]
    async fn delete_finishes_once_the_machine_is_gone() {
        let (service, harness) = running_service(vec![ScriptedProvider::new(ProviderName::Hetzner)
            .on_get(Ok(Some(remote_machine(3, Some(RemoteState::Active), &[]))))
            .on_get(Ok(None))]);
        harness.seed("m1", MachineState::UpActive).await;
        harness.store_provider("m1", ProviderName::Hetzner).await;

        service.delete("m1").await.unwrap();
        wait_for_state(&harness.store, "m1", MachineState::DeleteDeleted).await;
    }
}

//! In-memory doubles for exercising handlers and services without a broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use wm_db::{Machine, MachineProviderRecord, MachineState, MachineStore, MemoryStore};
use wm_infra::testing::{ScriptedProvider, remote_machine};
use wm_infra::types::{RemoteMachine, RemoteState};
use wm_infra::{MachineProvider, ProviderName, ProviderRegistry, RemoteMachineManager, RemoteResult};

use crate::dispatcher::{DispatchDelays, DispatchError, MessageQueue, RequestDispatcher};
use crate::factory::RequestFactory;
use crate::handlers::{HandlerContext, MachineRequestHandler};
use crate::recorder::FailureRecorder;
use crate::request::MachineRequest;
use crate::retry::RetryDecider;
use crate::service::MachineService;

/// Queue that keeps every published request instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    published: Mutex<Vec<(MachineRequest, Duration)>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(MachineRequest, Duration)> {
        self.published.lock().unwrap().clone()
    }

    /// Drain everything published so far.
    pub fn take(&self) -> Vec<(MachineRequest, Duration)> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }
}

#[async_trait]
impl MessageQueue for RecordingQueue {
    async fn publish(&self, request: &MachineRequest, delay: Duration) -> Result<(), DispatchError> {
        self.published.lock().unwrap().push((request.clone(), delay));
        Ok(())
    }
}

/// Hetzner stand-in whose `create` and `get` park until released, so a test
/// can change the store while a provider call is in flight. `create` then
/// succeeds with a started machine and `get` finds nothing.
#[derive(Debug, Default)]
pub struct HeldProvider {
    entered: Notify,
    released: Notify,
    removed: AtomicUsize,
}

impl HeldProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a call is parked.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    async fn hold(&self) {
        self.entered.notify_one();
        self.released.notified().await;
    }
}

#[async_trait]
impl MachineProvider for HeldProvider {
    async fn create(&self, _machine_id: &str) -> RemoteResult<RemoteMachine> {
        self.hold().await;
        Ok(remote_machine(7, Some(RemoteState::Started), &["10.0.0.7"]))
    }

    async fn get(&self, _machine_id: &str) -> RemoteResult<Option<RemoteMachine>> {
        self.hold().await;
        Ok(None)
    }

    async fn remove(&self, _machine_id: &str) -> RemoteResult<()> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Hetzner
    }
}

/// Handler stack wired to a [`MemoryStore`], a [`RecordingQueue`] and
/// scripted providers.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<RecordingQueue>,
    pub providers: Vec<Arc<ScriptedProvider>>,
    pub handler: MachineRequestHandler,
}

impl Harness {
    pub fn new(providers: Vec<ScriptedProvider>) -> Self {
        let providers: Vec<Arc<ScriptedProvider>> = providers.into_iter().map(Arc::new).collect();
        let registry = ProviderRegistry::new(
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn MachineProvider>)
                .collect(),
        );
        Self::with_registry(registry, providers)
    }

    /// Harness over arbitrary providers; `providers` stays empty.
    pub fn with_providers(providers: Vec<Arc<dyn MachineProvider>>) -> Self {
        Self::with_registry(ProviderRegistry::new(providers), Vec::new())
    }

    fn with_registry(registry: ProviderRegistry, providers: Vec<Arc<ScriptedProvider>>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(RecordingQueue::new());

        let ctx = HandlerContext {
            store: store.clone(),
            manager: Arc::new(RemoteMachineManager::new(registry)),
            dispatcher: RequestDispatcher::new(queue.clone(), store.clone(), DispatchDelays::default()),
            factory: RequestFactory::new(),
            retry: RetryDecider::default(),
            recorder: FailureRecorder::new(store.clone()),
        };

        Self {
            store,
            queue,
            providers,
            handler: MachineRequestHandler::new(ctx),
        }
    }

    pub fn ctx(&self) -> &HandlerContext {
        self.handler.context()
    }

    pub fn factory(&self) -> &RequestFactory {
        &self.ctx().factory
    }

    /// Entry service sharing this harness's store and queue.
    pub fn service(&self) -> MachineService {
        MachineService::new(
            self.store.clone(),
            self.store.clone(),
            self.ctx().dispatcher.clone(),
            self.factory().clone(),
        )
    }

    pub async fn seed(&self, machine_id: &str, state: MachineState) {
        self.store
            .store_machine(&Machine::new(machine_id, state))
            .await
            .unwrap();
    }

    pub async fn store_provider(&self, machine_id: &str, provider: ProviderName) {
        self.store
            .store_provider(&MachineProviderRecord::new(machine_id, provider))
            .await
            .unwrap();
    }

    /// Current state of a seeded machine.
    pub async fn state(&self, machine_id: &str) -> MachineState {
        self.store
            .find_machine(machine_id)
            .await
            .unwrap()
            .map(|m| m.state)
            .unwrap()
    }
}

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{ActionFailure, Machine, MachineProviderRecord, MessageState};
use crate::{MachineStore, MessageStateStore, Result};

/// Process-local store for running without PostgreSQL and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    machines: RwLock<HashMap<String, Machine>>,
    providers: RwLock<HashMap<String, MachineProviderRecord>>,
    failures: RwLock<HashMap<String, ActionFailure>>,
    messages: RwLock<HashMap<String, (MessageState, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn message_state(&self, unique_id: &str) -> Option<MessageState> {
        self.messages.read().await.get(unique_id).map(|(state, _)| *state)
    }
}

#[async_trait]
impl MachineStore for MemoryStore {
    async fn find_machine(&self, id: &str) -> Result<Option<Machine>> {
        Ok(self.machines.read().await.get(id).cloned())
    }

    async fn store_machine(&self, machine: &Machine) -> Result<()> {
        self.machines
            .write()
            .await
            .insert(machine.id.clone(), machine.clone());
        Ok(())
    }

    async fn find_provider(&self, machine_id: &str) -> Result<Option<MachineProviderRecord>> {
        Ok(self.providers.read().await.get(machine_id).cloned())
    }

    async fn store_provider(&self, record: &MachineProviderRecord) -> Result<()> {
        self.providers
            .write()
            .await
            .insert(record.machine_id.clone(), record.clone());
        Ok(())
    }

    async fn find_failure(&self, machine_id: &str) -> Result<Option<ActionFailure>> {
        Ok(self.failures.read().await.get(machine_id).cloned())
    }

    async fn create_failure_if_absent(&self, failure: &ActionFailure) -> Result<bool> {
        let mut failures = self.failures.write().await;
        if failures.contains_key(&failure.machine_id) {
            debug!(machine_id = %failure.machine_id, "failure already recorded");
            return Ok(false);
        }
        failures.insert(failure.machine_id.clone(), failure.clone());
        Ok(true)
    }

    async fn remove_failure(&self, machine_id: &str) -> Result<()> {
        self.failures.write().await.remove(machine_id);
        Ok(())
    }
}

#[async_trait]
impl MessageStateStore for MemoryStore {
    async fn set_message_state(&self, unique_id: &str, state: MessageState) -> Result<()> {
        let now = Instant::now();
        let mut messages = self.messages.write().await;
        let current = messages.entry(unique_id.to_string()).or_insert((state, now));
        if current.0 < state {
            *current = (state, now);
        }
        Ok(())
    }

    async fn count_outstanding_messages(&self) -> Result<u64> {
        let count = self
            .messages
            .read()
            .await
            .values()
            .filter(|(state, _)| state.is_outstanding())
            .count();
        Ok(count as u64)
    }

    async fn prune_handled_messages(&self, older_than: Duration) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, (state, at)| *state != MessageState::Handled || at.elapsed() < older_than);
        let pruned = (before - messages.len()) as u64;
        if pruned > 0 {
            debug!(pruned, "pruned handled messages");
        }
        Ok(pruned)
    }
}

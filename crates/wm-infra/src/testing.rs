//! Scripted provider for exercising the manager and handlers without a vendor.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::failure::{FailureKind, RemoteFailure};
use crate::types::{MachineAction, RemoteMachine, RemoteState};
use crate::{MachineProvider, ProviderName, RemoteResult};

type Script<T> = Mutex<VecDeque<Result<T, FailureKind>>>;

/// Provider whose answers are queued up front.
///
/// Each queue is consumed in order and its last entry repeats. Unscripted
/// calls answer `create: Unknown`, `get: Ok(None)`, `remove: Ok(())`.
pub struct ScriptedProvider {
    name: ProviderName,
    create: Script<RemoteMachine>,
    get: Script<Option<RemoteMachine>>,
    remove: Script<()>,
    calls: Mutex<HashMap<MachineAction, usize>>,
}

impl ScriptedProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            create: Mutex::default(),
            get: Mutex::default(),
            remove: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn on_create(self, outcome: Result<RemoteMachine, FailureKind>) -> Self {
        self.create.lock().unwrap().push_back(outcome);
        self
    }

    pub fn on_get(self, outcome: Result<Option<RemoteMachine>, FailureKind>) -> Self {
        self.get.lock().unwrap().push_back(outcome);
        self
    }

    pub fn on_remove(self, outcome: Result<(), FailureKind>) -> Self {
        self.remove.lock().unwrap().push_back(outcome);
        self
    }

    /// How many times `action` reached this provider.
    pub fn calls(&self, action: MachineAction) -> usize {
        self.calls.lock().unwrap().get(&action).copied().unwrap_or(0)
    }

    fn next<T: Clone>(
        &self,
        script: &Script<T>,
        action: MachineAction,
        machine_id: &str,
        default: Result<T, FailureKind>,
    ) -> RemoteResult<T> {
        *self.calls.lock().unwrap().entry(action).or_default() += 1;

        let mut script = script.lock().unwrap();
        let outcome = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or(default)
        };

        outcome.map_err(|kind| RemoteFailure::new(Some(self.name), action, machine_id, kind))
    }
}

#[async_trait]
impl MachineProvider for ScriptedProvider {
    async fn create(&self, machine_id: &str) -> RemoteResult<RemoteMachine> {
        self.next(&self.create, MachineAction::Create, machine_id, Err(FailureKind::Unknown))
    }

    async fn get(&self, machine_id: &str) -> RemoteResult<Option<RemoteMachine>> {
        self.next(&self.get, MachineAction::Get, machine_id, Ok(None))
    }

    async fn remove(&self, machine_id: &str) -> RemoteResult<()> {
        self.next(&self.remove, MachineAction::Delete, machine_id, Ok(()))
    }

    fn name(&self) -> ProviderName {
        self.name
    }
}

pub fn remote_machine(id: i64, state: Option<RemoteState>, ip_addresses: &[&str]) -> RemoteMachine {
    RemoteMachine {
        id,
        state,
        ip_addresses: ip_addresses.iter().map(|ip| ip.to_string()).collect(),
    }
}

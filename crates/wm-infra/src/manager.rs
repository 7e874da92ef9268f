use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::failure::{FailureKind, RemoteActionError, RemoteFailure};
use crate::types::{MachineAction, RemoteMachine};
use crate::{MachineProvider, ProviderName, ProviderRegistry};

/// Fans logical machine actions out over the configured providers.
pub struct RemoteMachineManager {
    registry: ProviderRegistry,
}

impl RemoteMachineManager {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Create the machine on the first provider that accepts it.
    pub async fn create(
        &self,
        machine_id: &str,
    ) -> Result<(ProviderName, RemoteMachine), RemoteActionError> {
        let mut failures = Vec::new();

        for provider in self.registry.iter() {
            match provider.create(machine_id).await {
                Ok(remote) => {
                    info!(machine_id, provider = %provider.name(), remote_id = remote.id, "machine created");
                    return Ok((provider.name(), remote));
                }
                Err(failure) => {
                    warn!(machine_id, provider = %provider.name(), error = %failure, "create failed, trying next provider");
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            failures.push(RemoteFailure::unsupported_provider(MachineAction::Create, machine_id));
        }

        Err(RemoteActionError::new(MachineAction::Create, machine_id, failures))
    }

    /// Fetch the machine from the provider it was created on.
    pub async fn get(
        &self,
        provider: Option<&str>,
        machine_id: &str,
    ) -> Result<RemoteMachine, RemoteActionError> {
        let provider = self
            .resolve(provider, MachineAction::Get, machine_id)
            .map_err(RemoteActionError::single)?;

        match provider.get(machine_id).await {
            Ok(Some(remote)) => Ok(remote),
            Ok(None) => Err(RemoteActionError::single(RemoteFailure::new(
                Some(provider.name()),
                MachineAction::Get,
                machine_id,
                FailureKind::NotFound,
            ))),
            Err(failure) => Err(RemoteActionError::single(failure)),
        }
    }

    /// Look for the machine on every provider, in order.
    ///
    /// `Ok(None)` only when every provider answered and none had it; provider
    /// failures are raised only if no other provider found the machine.
    pub async fn find(
        &self,
        machine_id: &str,
    ) -> Result<Option<(ProviderName, RemoteMachine)>, RemoteActionError> {
        let mut failures = Vec::new();

        for provider in self.registry.iter() {
            match provider.get(machine_id).await {
                Ok(Some(remote)) => return Ok(Some((provider.name(), remote))),
                Ok(None) => debug!(machine_id, provider = %provider.name(), "machine not found on provider"),
                Err(failure) if failure.kind == FailureKind::NotFound => {
                    debug!(machine_id, provider = %provider.name(), "machine not found on provider")
                }
                Err(mut failure) => {
                    failure.action = MachineAction::Find;
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            Ok(None)
        } else {
            Err(RemoteActionError::new(MachineAction::Find, machine_id, failures))
        }
    }

    /// Remove the machine from its provider, or from all providers when the
    /// provider is unknown. A provider without the machine counts as success.
    pub async fn remove(
        &self,
        provider: Option<&str>,
        machine_id: &str,
    ) -> Result<(), RemoteActionError> {
        let targets: Vec<&Arc<dyn MachineProvider>> = match provider {
            Some(name) => vec![
                self.resolve(Some(name), MachineAction::Delete, machine_id)
                    .map_err(RemoteActionError::single)?,
            ],
            None => self.registry.iter().collect(),
        };

        let mut failures = Vec::new();
        for provider in targets {
            match provider.remove(machine_id).await {
                Ok(()) => {}
                Err(failure) if failure.kind == FailureKind::NotFound => {
                    debug!(machine_id, provider = %provider.name(), "machine already absent on provider")
                }
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RemoteActionError::new(MachineAction::Delete, machine_id, failures))
        }
    }

    fn resolve(
        &self,
        provider: Option<&str>,
        action: MachineAction,
        machine_id: &str,
    ) -> Result<&Arc<dyn MachineProvider>, RemoteFailure> {
        let Some(raw) = provider else {
            return Err(RemoteFailure::unsupported_provider(action, machine_id));
        };

        let name: ProviderName = raw
            .parse()
            .map_err(|e| RemoteFailure::unsupported_provider(action, machine_id).with_source(e))?;

        self.registry.get(name).ok_or_else(|| {
            RemoteFailure::new(Some(name), action, machine_id, FailureKind::UnsupportedProvider)
        })
    }
}

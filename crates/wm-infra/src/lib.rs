pub mod digitalocean;
pub mod failure;
pub mod hetzner;
pub mod manager;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use failure::RemoteFailure;
use types::RemoteMachine;

pub use manager::RemoteMachineManager;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single provider call.
pub type RemoteResult<T> = std::result::Result<T, RemoteFailure>;

/// Known machine provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    DigitalOcean,
    Hetzner,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalOcean => "digitalocean",
            Self::Hetzner => "hetzner",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "digitalocean" => Ok(Self::DigitalOcean),
            "hetzner" => Ok(Self::Hetzner),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// Backend-agnostic interface to one cloud vendor.
///
/// Machines are addressed by the manager's machine id; each provider derives
/// its own remote name from it. Every error is already classified.
#[async_trait]
pub trait MachineProvider: Send + Sync + 'static {
    /// Create and boot a machine.
    async fn create(&self, machine_id: &str) -> RemoteResult<RemoteMachine>;

    /// Look a machine up. `Ok(None)` when the provider has no such machine.
    async fn get(&self, machine_id: &str) -> RemoteResult<Option<RemoteMachine>>;

    /// Destroy a machine. A missing machine surfaces as a `NotFound` failure.
    async fn remove(&self, machine_id: &str) -> RemoteResult<()>;

    /// Provider identifier.
    fn name(&self) -> ProviderName;
}

/// Ordered registry of configured providers.
///
/// Order matters: creation and lookup try providers front to back.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MachineProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn MachineProvider>>) -> Self {
        Self { providers }
    }

    /// Look up a provider by name.
    pub fn get(&self, name: ProviderName) -> Option<&Arc<dyn MachineProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn MachineProvider>> {
        self.providers.iter()
    }

    /// Names of all configured providers, in order.
    pub fn available(&self) -> Vec<ProviderName> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Returns `true` if no provider is configured.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build all providers whose required env vars are present.
///
/// Providers with missing configuration are skipped with a debug log.
/// Returns an error only if no providers could be constructed at all.
pub fn build_providers() -> Result<ProviderRegistry> {
    dotenvy::dotenv().ok();

    let mut providers: Vec<Arc<dyn MachineProvider>> = Vec::new();

    match digitalocean::DigitalOceanProvider::from_env() {
        Ok(p) => {
            tracing::info!("registered DigitalOcean machine provider");
            providers.push(Arc::new(p));
        }
        Err(e) => tracing::debug!("skipping DigitalOcean provider: {e}"),
    }

    match hetzner::HetznerProvider::from_env() {
        Ok(p) => {
            tracing::info!("registered Hetzner Cloud machine provider");
            providers.push(Arc::new(p));
        }
        Err(e) => tracing::debug!("skipping Hetzner provider: {e}"),
    }

    if providers.is_empty() {
        return Err(Error::MissingEnv(
            "no machine providers configured (set DIGITALOCEAN_API_TOKENS and/or HETZNER_API_TOKEN)".into(),
        ));
    }

    Ok(ProviderRegistry::new(providers))
}

/// Remote name shared by every provider for a given machine id.
pub(crate) fn remote_name(prefix: &str, machine_id: &str) -> String {
    format!("{prefix}-{machine_id}")
}

pub(crate) fn name_prefix_from_env() -> String {
    std::env::var("MACHINE_NAME_PREFIX").unwrap_or_else(|_| "worker".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[test]
    fn provider_names_round_trip_through_strings() {
        for name in [ProviderName::DigitalOcean, ProviderName::Hetzner] {
            assert_eq!(name.as_str().parse::<ProviderName>().unwrap(), name);
        }
        assert!(matches!(
            "linode".parse::<ProviderName>(),
            Err(Error::UnknownProvider(name)) if name == "linode"
        ));
    }

    #[test]
    fn registry_keeps_configured_order() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(ScriptedProvider::new(ProviderName::Hetzner)),
            Arc::new(ScriptedProvider::new(ProviderName::DigitalOcean)),
        ]);

        assert_eq!(
            registry.available(),
            vec![ProviderName::Hetzner, ProviderName::DigitalOcean]
        );
        assert!(registry.get(ProviderName::DigitalOcean).is_some());
        assert!(!registry.is_empty());
        assert!(ProviderRegistry::default().is_empty());
    }
}

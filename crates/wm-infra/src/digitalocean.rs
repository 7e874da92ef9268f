use async_trait::async_trait;
use digitalocean_api::{ClientPool, CreateDropletRequest, Droplet};
use tracing::{info, warn};

use crate::failure::{FailureKind, RemoteFailure, classify_transport};
use crate::types::{MachineAction, RemoteMachine, RemoteState};
use crate::{Error, MachineProvider, ProviderName, RemoteResult, Result};

/// DigitalOcean droplet provider.
///
/// Droplets are named and tagged `{prefix}-{machine_id}`; lookups and
/// deletion go through the tag so no remote id has to be remembered.
pub struct DigitalOceanProvider {
    pool: ClientPool,
    region: String,
    size: String,
    image: String,
    tag: String,
    name_prefix: String,
}

impl DigitalOceanProvider {
    /// Create from env vars:
    ///
    /// - `DIGITALOCEAN_API_TOKENS` (required, comma-separated, tried in order)
    /// - `DIGITALOCEAN_REGION` (default: `"lon1"`)
    /// - `DIGITALOCEAN_SIZE` (default: `"s-1vcpu-1gb"`)
    /// - `DIGITALOCEAN_IMAGE` (default: `"ubuntu-24-04-x64"`)
    /// - `DIGITALOCEAN_TAG` (default: `"worker-manager"`)
    /// - `MACHINE_NAME_PREFIX` (default: `"worker"`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let tokens: Vec<String> = std::env::var("DIGITALOCEAN_API_TOKENS")
            .map_err(|_| Error::MissingEnv("DIGITALOCEAN_API_TOKENS".into()))?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(Error::MissingEnv("DIGITALOCEAN_API_TOKENS".into()));
        }

        Ok(Self {
            pool: ClientPool::new(tokens),
            region: std::env::var("DIGITALOCEAN_REGION").unwrap_or_else(|_| "lon1".into()),
            size: std::env::var("DIGITALOCEAN_SIZE").unwrap_or_else(|_| "s-1vcpu-1gb".into()),
            image: std::env::var("DIGITALOCEAN_IMAGE")
                .unwrap_or_else(|_| "ubuntu-24-04-x64".into()),
            tag: std::env::var("DIGITALOCEAN_TAG").unwrap_or_else(|_| "worker-manager".into()),
            name_prefix: crate::name_prefix_from_env(),
        })
    }

    fn droplet_name(&self, machine_id: &str) -> String {
        crate::remote_name(&self.name_prefix, machine_id)
    }

    fn parse_state(status: &str) -> Option<RemoteState> {
        match status {
            "new" => Some(RemoteState::Started),
            "active" => Some(RemoteState::Active),
            _ => None,
        }
    }

    fn to_remote(droplet: &Droplet) -> RemoteMachine {
        RemoteMachine {
            id: droplet.id,
            state: Self::parse_state(&droplet.status),
            ip_addresses: droplet.ip_addresses(),
        }
    }

    fn failure(
        &self,
        action: MachineAction,
        machine_id: &str,
        err: digitalocean_api::Error,
    ) -> RemoteFailure {
        let kind = classify(&err);
        RemoteFailure::new(Some(self.name()), action, machine_id, kind).with_source(err)
    }
}

/// Reduce a DigitalOcean client error to a failure kind.
pub fn classify(err: &digitalocean_api::Error) -> FailureKind {
    use digitalocean_api::Error;

    match err {
        Error::Request(e) => classify_transport(e),
        Error::Api {
            status,
            rate_limit_reset,
            ..
        } => FailureKind::from_status(
            status.as_u16(),
            err.error_body().map(|body| body.message),
            *rate_limit_reset,
        ),
        Error::NoCredentials | Error::CredentialsExhausted(_) => FailureKind::Authentication,
    }
}

#[async_trait]
impl MachineProvider for DigitalOceanProvider {
    async fn create(&self, machine_id: &str) -> RemoteResult<RemoteMachine> {
        let name = self.droplet_name(machine_id);
        let request = CreateDropletRequest {
            name: name.clone(),
            region: self.region.clone(),
            size: self.size.clone(),
            image: self.image.clone(),
            tags: vec![self.tag.clone(), name],
            user_data: None,
        };

        let droplet = self
            .pool
            .run(|client| client.create_droplet(&request))
            .await
            .map_err(|e| self.failure(MachineAction::Create, machine_id, e))?;

        info!(machine_id, droplet_id = droplet.id, "digitalocean: droplet created");
        Ok(Self::to_remote(&droplet))
    }

    async fn get(&self, machine_id: &str) -> RemoteResult<Option<RemoteMachine>> {
        let tag = self.droplet_name(machine_id);

        let droplets = self
            .pool
            .run(|client| client.list_droplets_by_tag(&tag))
            .await
            .map_err(|e| self.failure(MachineAction::Get, machine_id, e))?;

        if droplets.len() > 1 {
            warn!(machine_id, count = droplets.len(), "digitalocean: several droplets share a tag");
        }

        Ok(droplets.first().map(Self::to_remote))
    }

    async fn remove(&self, machine_id: &str) -> RemoteResult<()> {
        let tag = self.droplet_name(machine_id);

        self.pool
            .run(|client| client.delete_droplets_by_tag(&tag))
            .await
            .map_err(|e| self.failure(MachineAction::Delete, machine_id, e))?;

        info!(machine_id, "digitalocean: droplet removal requested");
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }
}

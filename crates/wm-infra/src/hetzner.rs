use std::net::Ipv6Addr;

use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::servers_api;
use hcloud::models;
use tracing::{info, warn};

use crate::failure::{FailureKind, RemoteFailure, classify_transport};
use crate::types::{MachineAction, RemoteMachine, RemoteState};
use crate::{Error, MachineProvider, ProviderName, RemoteResult, Result};

/// Hetzner Cloud provider using the `hcloud` crate.
///
/// All configuration is loaded from environment variables via `from_env()`.
pub struct HetznerProvider {
    config: Configuration,
    location: String,
    server_type: String,
    image: String,
    ssh_key_names: Vec<String>,
    name_prefix: String,
}

impl HetznerProvider {
    /// Create from env vars:
    ///
    /// - `HETZNER_API_TOKEN` (required)
    /// - `HETZNER_LOCATION` (default: `"fsn1"`)
    /// - `HETZNER_SERVER_TYPE` (default: `"cpx11"`)
    /// - `HETZNER_IMAGE` (default: `"ubuntu-24.04"`)
    /// - `HETZNER_SSH_KEY_NAMES` (comma-separated names, optional)
    /// - `MACHINE_NAME_PREFIX` (default: `"worker"`)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("HETZNER_API_TOKEN")
            .map_err(|_| Error::MissingEnv("HETZNER_API_TOKEN".into()))?;

        let mut config = Configuration::new();
        config.bearer_access_token = Some(token);

        let ssh_key_names: Vec<String> = std::env::var("HETZNER_SSH_KEY_NAMES")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            config,
            location: std::env::var("HETZNER_LOCATION").unwrap_or_else(|_| "fsn1".into()),
            server_type: std::env::var("HETZNER_SERVER_TYPE").unwrap_or_else(|_| "cpx11".into()),
            image: std::env::var("HETZNER_IMAGE").unwrap_or_else(|_| "ubuntu-24.04".into()),
            ssh_key_names,
            name_prefix: crate::name_prefix_from_env(),
        })
    }

    fn server_name(&self, machine_id: &str) -> String {
        crate::remote_name(&self.name_prefix, machine_id)
    }

    fn parse_state(status: &models::server::Status) -> Option<RemoteState> {
        match status {
            models::server::Status::Running => Some(RemoteState::Active),
            models::server::Status::Initializing | models::server::Status::Starting => {
                Some(RemoteState::Started)
            }
            _ => None,
        }
    }

    fn to_remote(server: &models::Server) -> RemoteMachine {
        RemoteMachine {
            id: server.id,
            state: Self::parse_state(&server.status),
            ip_addresses: Self::ip_addresses(server),
        }
    }

    /// Public addresses first, then any private network addresses.
    fn ip_addresses(server: &models::Server) -> Vec<String> {
        let public = &server.public_net;
        let ipv4 = public.ipv4.as_ref().map(|v4| v4.ip.clone());
        let ipv6 = public.ipv6.as_ref().and_then(|v6| first_host(&v6.ip));
        let private = server.private_net.iter().flat_map(|net| {
            net.ip
                .iter()
                .chain(net.alias_ips.iter().flatten())
                .cloned()
        });

        ipv4.into_iter().chain(ipv6).chain(private).collect()
    }

    fn failure<T>(
        &self,
        action: MachineAction,
        machine_id: &str,
        err: hcloud::apis::Error<T>,
    ) -> RemoteFailure
    where
        hcloud::apis::Error<T>: std::fmt::Display,
    {
        let kind = classify(&err);
        RemoteFailure::new(Some(self.name()), action, machine_id, kind).with_source(err.to_string())
    }

    async fn find_server(
        &self,
        action: MachineAction,
        machine_id: &str,
    ) -> RemoteResult<Option<models::Server>> {
        let resp = servers_api::list_servers(
            &self.config,
            servers_api::ListServersParams {
                name: Some(self.server_name(machine_id)),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| self.failure(action, machine_id, e))?;

        Ok(resp.servers.into_iter().next())
    }
}

/// Reduce an `hcloud` error to a failure kind.
///
/// Hetzner reports quota exhaustion as `403 resource_limit_exceeded`, which
/// is an unprocessable request rather than an authentication problem.
pub fn classify<T>(err: &hcloud::apis::Error<T>) -> FailureKind {
    match err {
        hcloud::apis::Error::ResponseError(content) => {
            let (code, message) = error_code_and_message(&content.content);
            match code.as_deref() {
                Some("resource_limit_exceeded") => FailureKind::Unprocessable { reason: message },
                _ => FailureKind::from_status(content.status.as_u16(), message, None),
            }
        }
        hcloud::apis::Error::Reqwest(e) => classify_transport(e),
        _ => FailureKind::Unknown,
    }
}

/// Hetzner hands out an IPv6 /64; the server answers on `::1` of it.
fn first_host(network: &str) -> Option<String> {
    let prefix = network.split('/').next()?;
    let mut segments = prefix.parse::<Ipv6Addr>().ok()?.segments();
    segments[7] = 1;
    Some(Ipv6Addr::from(segments).to_string())
}

/// Extract `error.code` and `error.message` from a Hetzner error document.
fn error_code_and_message(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let field = |name: &str| {
        value
            .get("error")
            .and_then(|e| e.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    (field("code"), field("message"))
}

#[async_trait]
impl MachineProvider for HetznerProvider {
    async fn create(&self, machine_id: &str) -> RemoteResult<RemoteMachine> {
        let ssh_keys = if self.ssh_key_names.is_empty() {
            None
        } else {
            Some(self.ssh_key_names.clone())
        };

        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: models::CreateServerRequest {
                    name: self.server_name(machine_id),
                    server_type: self.server_type.clone(),
                    image: self.image.clone(),
                    location: Some(self.location.clone()),
                    user_data: None,
                    networks: None,
                    firewalls: None,
                    ssh_keys,
                    volumes: None,
                    start_after_create: Some(true),
                    automount: None,
                    datacenter: None,
                    labels: None,
                    placement_group: None,
                    public_net: None,
                },
            },
        )
        .await
        .map_err(|e| self.failure(MachineAction::Create, machine_id, e))?;

        let server = resp.server;
        info!(machine_id, server_id = server.id, "hetzner: server created");

        Ok(Self::to_remote(&server))
    }

    async fn get(&self, machine_id: &str) -> RemoteResult<Option<RemoteMachine>> {
        let server = self.find_server(MachineAction::Get, machine_id).await?;
        Ok(server.as_ref().map(Self::to_remote))
    }

    async fn remove(&self, machine_id: &str) -> RemoteResult<()> {
        let Some(server) = self.find_server(MachineAction::Delete, machine_id).await? else {
            warn!(machine_id, "hetzner: server already gone");
            return Err(RemoteFailure::new(
                Some(self.name()),
                MachineAction::Delete,
                machine_id,
                FailureKind::NotFound,
            ));
        };

        servers_api::delete_server(
            &self.config,
            servers_api::DeleteServerParams { id: server.id },
        )
        .await
        .map_err(|e| self.failure(MachineAction::Delete, machine_id, e))?;

        info!(machine_id, server_id = server.id, "hetzner: server deleted");
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::Hetzner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_statuses_map_onto_remote_states() {
        assert_eq!(
            HetznerProvider::parse_state(&models::server::Status::Running),
            Some(RemoteState::Active)
        );
        assert_eq!(
            HetznerProvider::parse_state(&models::server::Status::Initializing),
            Some(RemoteState::Started)
        );
        assert_eq!(HetznerProvider::parse_state(&models::server::Status::Off), None);
    }

    #[test]
    fn server_addresses_include_public_networks() {
        let public_net: models::ServerPublicNet = serde_json::from_str(
            r#"{
                "floating_ips": [],
                "ipv4": {"blocked": false, "dns_ptr": "static.1.2.0.192.clients.your-server.de", "id": 7, "ip": "192.0.2.1"},
                "ipv6": {"blocked": false, "dns_ptr": [], "id": 8, "ip": "2001:db8:1234::/64"}
            }"#,
        )
        .unwrap();
        let private_net: Vec<models::ServerPrivateNet> = serde_json::from_str(
            r#"[{"alias_ips": ["10.0.0.3"], "ip": "10.0.0.2", "mac_address": "86:00:ff:2a:7d:e1", "network": 4711}]"#,
        )
        .unwrap();
        let server = models::Server {
            id: 42,
            status: models::server::Status::Running,
            public_net: Box::new(public_net),
            private_net,
            ..Default::default()
        };

        let remote = HetznerProvider::to_remote(&server);

        assert_eq!(remote.id, 42);
        assert_eq!(remote.state, Some(RemoteState::Active));
        assert_eq!(
            remote.ip_addresses,
            ["192.0.2.1", "2001:db8:1234::1", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[test]
    fn server_without_public_addresses_reports_none() {
        let public_net: models::ServerPublicNet =
            serde_json::from_str(r#"{"floating_ips": [], "ipv4": null, "ipv6": null}"#).unwrap();
        let server = models::Server {
            public_net: Box::new(public_net),
            ..Default::default()
        };

        assert!(HetznerProvider::to_remote(&server).ip_addresses.is_empty());
    }

    #[test]
    fn malformed_ipv6_networks_are_skipped() {
        assert_eq!(first_host("2a01:4f8:c17:b8f::/64").as_deref(), Some("2a01:4f8:c17:b8f::1"));
        assert_eq!(first_host("not-an-address/64"), None);
    }

    #[test]
    fn client_side_reqwest_errors_are_not_transport_failures() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert!(err.is_builder());

        let kind = classify(&hcloud::apis::Error::<()>::Reqwest(err));

        assert_eq!(kind, FailureKind::Unknown);
        assert!(!kind.is_recoverable_for(MachineAction::Create));
    }

    #[test]
    fn error_documents_are_parsed() {
        let (code, message) = error_code_and_message(
            r#"{"error":{"code":"resource_limit_exceeded","message":"server limit reached"}}"#,
        );
        assert_eq!(code.as_deref(), Some("resource_limit_exceeded"));
        assert_eq!(message.as_deref(), Some("server limit reached"));

        assert_eq!(error_code_and_message("not json"), (None, None));
    }
}

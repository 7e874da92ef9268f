use serde::{Deserialize, Serialize};

// ── Droplet types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: i64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    /// All IPv4 and IPv6 addresses reported for the droplet.
    pub fn ip_addresses(&self) -> Vec<String> {
        self.networks
            .v4
            .iter()
            .chain(self.networks.v6.iter())
            .map(|n| n.ip_address.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<Network>,
    #[serde(default)]
    pub v6: Vec<Network>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DropletResponse {
    pub droplet: Droplet,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DropletsResponse {
    #[serde(default)]
    pub droplets: Vec<Droplet>,
}

/// Error document returned by the API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub id: String,
    pub message: String,
}

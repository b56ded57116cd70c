//! NHN Cloud adapter (Keystone v2 tenant auth).

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::http::{build_client, read_json};
use super::openstack::{self, Flavor, ServerList, VolumeList, AUTH_HEADER};
use super::token::{Token, TokenCache};
use super::{
    assemble, mb_to_gb, AttachedVolume, CloudProvider, CredentialSet, Instance, NetworkInterface, Vendor,
};
use crate::inventory::InventoryRecord;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};

const DEFAULT_ZONE: &str = "kr1";
const PUBLIC_ZONES: &[&str] = &["kr1", "kr2", "jp1"];
const GOV_ZONES: &[&str] = &["kr1", "kr2"];

/// Endpoints for one NHN region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NhnEndpoints {
    pub identity: String,
    pub compute: String,
    pub block_storage: String,
}

impl NhnEndpoints {
    pub fn for_zone(zone: &str, gov: bool) -> ProviderResult<Self> {
        let (zones, domain) = if gov {
            (GOV_ZONES, "gov-nhncloudservice.com")
        } else {
            (PUBLIC_ZONES, "nhncloudservice.com")
        };
        if !zones.contains(&zone) {
            return Err(ProviderError::UnknownZone {
                vendor: Vendor::Nhn.to_string(),
                zone: zone.to_string(),
            });
        }
        Ok(Self {
            identity: format!("https://api-identity-infrastructure.{domain}"),
            compute: format!("https://{zone}-api-instance-infrastructure.{domain}"),
            block_storage: format!("https://{zone}-api-block-storage-infrastructure.{domain}"),
        })
    }
}

pub struct NhnProvider {
    client: Client,
    pub(super) endpoints: NhnEndpoints,
    username: String,
    password: String,
    tenant_id: String,
    tokens: TokenCache,
}

#[derive(Debug, Deserialize)]
struct AuthBody {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: AccessToken,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlavorList {
    #[serde(default)]
    flavors: Vec<Flavor>,
}

fn flavor_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"c(\d+)m(\d+)").expect("valid flavor regex"))
}

/// vCPU count and RAM in GB for a catalog flavor.
///
/// Names such as `m2.c4m8` carry both; otherwise fall back to the numeric fields.
pub fn flavor_size(flavor: &Flavor) -> (Option<u32>, Option<u64>) {
    if let Some(caps) = flavor
        .name
        .as_deref()
        .and_then(|name| flavor_name_regex().captures(name))
    {
        let cores = caps[1].parse::<u32>().ok();
        let gb = caps[2].parse::<u64>().ok();
        if cores.is_some() && gb.is_some() {
            return (cores, gb);
        }
    }
    (flavor.vcpus.map(|v| v as u32), flavor.ram.map(mb_to_gb))
}

impl NhnProvider {
    pub fn from_credentials(creds: &CredentialSet, gov: bool, config: &ProviderConfig) -> ProviderResult<Self> {
        let endpoints = NhnEndpoints::for_zone(&creds.zone_or(DEFAULT_ZONE), gov)?;
        Self::with_endpoints(
            endpoints,
            CredentialSet::require(&creds.username, "username")?,
            CredentialSet::require(&creds.password, "password")?,
            CredentialSet::require(&creds.tenant_id, "tenant_id")?,
            config,
        )
    }

    pub fn with_endpoints(
        endpoints: NhnEndpoints,
        username: String,
        password: String,
        tenant_id: String,
        config: &ProviderConfig,
    ) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            endpoints,
            username,
            password,
            tenant_id,
            tokens: TokenCache::new(Duration::from_secs(config.token_ttl_secs)),
        })
    }

    fn token(&self) -> ProviderResult<Token> {
        self.tokens.get_or_issue(|| self.issue_token())
    }

    fn issue_token(&self) -> ProviderResult<Token> {
        info!(identity = %self.endpoints.identity, tenant = %self.tenant_id, "requesting NHN token");
        let body = json!({
            "auth": {
                "tenantId": self.tenant_id,
                "passwordCredentials": {
                    "username": self.username,
                    "password": self.password,
                }
            }
        });
        let response = self
            .client
            .post(format!("{}/v2.0/tokens", self.endpoints.identity))
            .json(&body)
            .send()?;
        let auth: AuthBody = read_json(response)?;
        let value = auth
            .access
            .token
            .id
            .ok_or(ProviderError::MissingToken("access.token.id"))?;
        Ok(Token {
            value,
            project_id: Some(self.tenant_id.clone()),
        })
    }

    fn get<T: DeserializeOwned>(&self, url: String) -> ProviderResult<T> {
        let token = self.token()?;
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header(AUTH_HEADER, token.value)
            .header("Content-Type", "application/json")
            .send()?;
        read_json(response)
    }

    fn servers(&self) -> ProviderResult<Vec<openstack::Server>> {
        let list: ServerList = self.get(format!(
            "{}/v2/{}/servers/detail",
            self.endpoints.compute, self.tenant_id
        ))?;
        Ok(list.servers)
    }

    fn flavor_catalog(&self) -> ProviderResult<HashMap<String, Flavor>> {
        let list: FlavorList = self.get(format!(
            "{}/v2/{}/flavors/detail",
            self.endpoints.compute, self.tenant_id
        ))?;
        Ok(list
            .flavors
            .into_iter()
            .filter_map(|f| f.id.clone().map(|id| (id, f)))
            .collect())
    }
}

impl CloudProvider for NhnProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Nhn
    }

    fn authenticate(&self) -> ProviderResult<String> {
        Ok(self.token()?.value)
    }

    fn list_instances(&self) -> ProviderResult<Vec<Instance>> {
        let servers = self.servers()?;
        Ok(instances(servers, &self.flavor_catalog()?))
    }

    fn list_volumes(&self) -> ProviderResult<Vec<AttachedVolume>> {
        let list: VolumeList = self.get(format!(
            "{}/v2/{}/volumes/detail",
            self.endpoints.block_storage, self.tenant_id
        ))?;
        Ok(openstack::attached_volumes(list.volumes))
    }

    fn list_network_interfaces(&self) -> ProviderResult<Vec<NetworkInterface>> {
        Ok(openstack::fixed_interfaces(&self.servers()?))
    }

    // Instances and interfaces come from the same server listing.
    fn get_inventory(&self) -> ProviderResult<Vec<InventoryRecord>> {
        let servers = self.servers()?;
        let interfaces = openstack::fixed_interfaces(&servers);
        let instances = instances(servers, &self.flavor_catalog()?);
        let volumes = self.list_volumes()?;
        assemble(Vendor::Nhn, instances, &interfaces, &[], volumes)
    }
}

fn instances(servers: Vec<openstack::Server>, catalog: &HashMap<String, Flavor>) -> Vec<Instance> {
    servers
        .into_iter()
        .map(|server| {
            // Server listings only reference the flavor by id.
            let (vcpus, ram_gb) = server
                .flavor
                .id
                .as_ref()
                .and_then(|id| catalog.get(id))
                .map(flavor_size)
                .unwrap_or_else(|| flavor_size(&server.flavor));
            Instance {
                public_ip: openstack::floating_ip(&server),
                id: server.id,
                name: server.name,
                availability_zone: server.availability_zone,
                status_code: server.vm_state,
                vcpus,
                ram_gb,
                created: server.created,
            }
        })
        .collect()
}

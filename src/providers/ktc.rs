//! KT Cloud adapter.
//!
//! Keystone v3 password auth; the token arrives in the `X-Subject-Token` header and the
//! project id in the body. Public addresses come from the STATICNAT listing.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::http::{build_client, check_status, read_json};
use super::openstack::{self, ServerList, VolumeList, AUTH_HEADER};
use super::token::{Token, TokenCache};
use super::{
    assemble, mb_to_gb, AttachedVolume, CloudProvider, CredentialSet, Instance, NatBinding,
    NetworkInterface, Vendor,
};
use crate::inventory::InventoryRecord;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};

const API_HOST: &str = "https://api.ucloudbiz.olleh.com";
const GOV_ZONE: &str = "gd1";
const DEFAULT_ZONE: &str = "d1";

pub struct KtcProvider {
    client: Client,
    pub(super) base_uri: String,
    username: String,
    password: String,
    tokens: TokenCache,
}

#[derive(Debug, Deserialize)]
struct AuthBody {
    token: AuthToken,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    project: Option<Project>,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PublicIpListing {
    nc_listentpublicipsresponse: PublicIps,
}

#[derive(Debug, Deserialize)]
struct PublicIps {
    #[serde(default)]
    publicips: Vec<PublicIp>,
}

#[derive(Debug, Deserialize)]
struct PublicIp {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    virtualips: Vec<VirtualIp>,
}

#[derive(Debug, Deserialize)]
struct VirtualIp {
    ipaddress: String,
    vmguestip: String,
}

impl KtcProvider {
    /// `force_gov_zone` is set for the `KTCG` tag, which always targets the gov zone.
    pub fn from_credentials(
        creds: &CredentialSet,
        force_gov_zone: bool,
        gov: bool,
        config: &ProviderConfig,
    ) -> ProviderResult<Self> {
        let zone = if force_gov_zone {
            GOV_ZONE.to_string()
        } else {
            creds.zone_or(DEFAULT_ZONE)
        };
        let base_uri = Self::base_uri_for(&zone, gov)?;
        Self::with_base_uri(
            base_uri,
            CredentialSet::require(&creds.username, "username")?,
            CredentialSet::require(&creds.password, "password")?,
            config,
        )
    }

    pub fn with_base_uri(
        base_uri: String,
        username: String,
        password: String,
        config: &ProviderConfig,
    ) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            username,
            password,
            tokens: TokenCache::new(Duration::from_secs(config.token_ttl_secs)),
        })
    }

    pub fn base_uri_for(zone: &str, gov: bool) -> ProviderResult<String> {
        if gov {
            return Ok(format!("{API_HOST}/{GOV_ZONE}"));
        }
        match zone {
            "d1" | "d2" | "d3" => Ok(format!("{API_HOST}/{zone}")),
            _ => Err(ProviderError::UnknownZone {
                vendor: Vendor::Ktc.to_string(),
                zone: zone.to_string(),
            }),
        }
    }

    fn token(&self) -> ProviderResult<Token> {
        self.tokens.get_or_issue(|| self.issue_token())
    }

    fn issue_token(&self) -> ProviderResult<Token> {
        info!(base_uri = %self.base_uri, "requesting KTC token");
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "domain": {"id": "default"},
                            "name": self.username,
                            "password": self.password,
                        }
                    }
                },
                "scope": {
                    "project": {
                        "domain": {"id": "default"},
                        "name": self.username,
                    }
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/identity/auth/tokens", self.base_uri))
            .json(&body)
            .send()?;
        let response = check_status(response)?;

        let value = response
            .headers()
            .get("X-Subject-Token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(ProviderError::MissingToken("X-Subject-Token header"))?;
        let auth: AuthBody = response
            .json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let project_id = auth
            .token
            .project
            .map(|p| p.id)
            .ok_or(ProviderError::MissingToken("token.project.id"))?;

        Ok(Token {
            value,
            project_id: Some(project_id),
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_uri, path);
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
        let list: ServerList = self.get("/server/servers/detail")?;
        Ok(list.servers)
    }
}

fn instance(server: openstack::Server) -> Instance {
    Instance {
        vcpus: server.flavor.vcpus.map(|v| v as u32),
        ram_gb: server.flavor.ram.map(mb_to_gb),
        id: server.id,
        name: server.name,
        availability_zone: server.availability_zone,
        status_code: server.vm_state,
        created: server.created,
        public_ip: None,
    }
}

impl CloudProvider for KtcProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Ktc
    }

    fn authenticate(&self) -> ProviderResult<String> {
        Ok(self.token()?.value)
    }

    fn list_instances(&self) -> ProviderResult<Vec<Instance>> {
        Ok(self.servers()?.into_iter().map(instance).collect())
    }

    fn list_volumes(&self) -> ProviderResult<Vec<AttachedVolume>> {
        let project_id = self
            .token()?
            .project_id
            .ok_or(ProviderError::MissingToken("token.project.id"))?;
        let list: VolumeList = self.get(&format!("/volume/{project_id}/volumes/detail"))?;
        Ok(openstack::attached_volumes(list.volumes))
    }

    fn list_network_interfaces(&self) -> ProviderResult<Vec<NetworkInterface>> {
        Ok(openstack::fixed_interfaces(&self.servers()?))
    }

    fn list_nat_bindings(&self) -> ProviderResult<Vec<NatBinding>> {
        let listing: PublicIpListing = self.get("/nc/IpAddress")?;
        let bindings = listing
            .nc_listentpublicipsresponse
            .publicips
            .into_iter()
            .filter(|ip| ip.kind == "STATICNAT")
            .filter_map(|ip| ip.virtualips.into_iter().next())
            .map(|v| NatBinding {
                private_ip: v.vmguestip,
                public_ip: v.ipaddress,
            })
            .collect();
        Ok(bindings)
    }

    // Instances and interfaces come from the same server listing.
    fn get_inventory(&self) -> ProviderResult<Vec<InventoryRecord>> {
        let servers = self.servers()?;
        let interfaces = openstack::fixed_interfaces(&servers);
        let instances = servers.into_iter().map(instance).collect();
        let bindings = self.list_nat_bindings()?;
        let volumes = self.list_volumes()?;
        assemble(Vendor::Ktc, instances, &interfaces, &bindings, volumes)
    }
}

//! Cloud vendor inventory adapters
//!
//! Each vendor adapter lists instances, volumes and network interfaces in the
//! vendor's own shape; `assemble` joins them into canonical inventory records.

pub mod http;
pub mod ktc;
pub mod ncp;
pub mod nhn;
pub mod openstack;
pub mod token;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::inventory::{find_duplicate_ip, InventoryRecord, VmState, Volume};

pub use ktc::KtcProvider;
pub use ncp::NcpProvider;
pub use nhn::NhnProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vendor {
    Ktc,
    Nhn,
    Ncp,
}

impl Vendor {
    /// The single status code this vendor reports for a running instance.
    pub fn running_code(self) -> &'static str {
        match self {
            Vendor::Ktc | Vendor::Nhn => "active",
            Vendor::Ncp => "RUN",
        }
    }

    pub fn vm_state(self, code: &str) -> VmState {
        if code == self.running_code() {
            VmState::Running
        } else {
            VmState::Stop
        }
    }

    /// Parse a vendor tag. The second value is true for the gov (`G`-suffixed) tags.
    pub fn from_tag(tag: &str) -> ProviderResult<(Self, bool)> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "KTC" => Ok((Vendor::Ktc, false)),
            "KTCG" => Ok((Vendor::Ktc, true)),
            "NHN" => Ok((Vendor::Nhn, false)),
            "NHNG" => Ok((Vendor::Nhn, true)),
            "NCP" => Ok((Vendor::Ncp, false)),
            "NCPG" => Ok((Vendor::Ncp, true)),
            _ => Err(ProviderError::UnknownVendor(tag.to_string())),
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Vendor::Ktc => "KTC",
            Vendor::Nhn => "NHN",
            Vendor::Ncp => "NCP",
        };
        f.write_str(name)
    }
}

/// One account's credentials, as read from the credentials file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialSet {
    pub vendor: String,
    #[serde(default)]
    pub customer: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub gov: bool,
}

impl CredentialSet {
    pub(crate) fn require(value: &Option<String>, field: &'static str) -> ProviderResult<String> {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            _ => Err(ProviderError::MissingCredential(field)),
        }
    }

    pub(crate) fn zone_or(&self, default: &str) -> String {
        match self.zone.as_deref().map(str::trim) {
            Some(z) if !z.is_empty() => z.to_string(),
            _ => default.to_string(),
        }
    }
}

/// Instance as listed by a vendor, before the network and volume joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub availability_zone: String,
    pub status_code: String,
    pub vcpus: Option<u32>,
    pub ram_gb: Option<u64>,
    pub created: String,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub instance_id: String,
    pub private_ip: String,
}

/// Static NAT mapping from a private address to a public one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatBinding {
    pub private_ip: String,
    pub public_ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedVolume {
    pub instance_id: String,
    pub volume: Volume,
}

pub trait CloudProvider {
    fn vendor(&self) -> Vendor;

    /// Returns a usable credential, reusing a cached token while it is still valid.
    fn authenticate(&self) -> ProviderResult<String>;

    fn list_instances(&self) -> ProviderResult<Vec<Instance>>;

    fn list_volumes(&self) -> ProviderResult<Vec<AttachedVolume>>;

    fn list_network_interfaces(&self) -> ProviderResult<Vec<NetworkInterface>>;

    fn list_nat_bindings(&self) -> ProviderResult<Vec<NatBinding>> {
        Ok(Vec::new())
    }

    fn get_inventory(&self) -> ProviderResult<Vec<InventoryRecord>> {
        let instances = self.list_instances()?;
        let interfaces = self.list_network_interfaces()?;
        let bindings = self.list_nat_bindings()?;
        let volumes = self.list_volumes()?;
        assemble(self.vendor(), instances, &interfaces, &bindings, volumes)
    }
}

/// Adapter selected from a credential set.
pub enum Provider {
    Ktc(KtcProvider),
    Nhn(NhnProvider),
    Ncp(NcpProvider),
}

impl Provider {
    pub fn from_credentials(creds: &CredentialSet, config: &ProviderConfig) -> ProviderResult<Self> {
        let (vendor, forced_gov) = Vendor::from_tag(&creds.vendor)?;
        let gov = forced_gov || creds.gov;
        Ok(match vendor {
            Vendor::Ktc => Provider::Ktc(KtcProvider::from_credentials(creds, forced_gov, gov, config)?),
            Vendor::Nhn => Provider::Nhn(NhnProvider::from_credentials(creds, gov, config)?),
            Vendor::Ncp => Provider::Ncp(NcpProvider::from_credentials(creds, gov, config)?),
        })
    }

    fn inner(&self) -> &dyn CloudProvider {
        match self {
            Provider::Ktc(p) => p,
            Provider::Nhn(p) => p,
            Provider::Ncp(p) => p,
        }
    }
}

impl CloudProvider for Provider {
    fn vendor(&self) -> Vendor {
        self.inner().vendor()
    }

    fn authenticate(&self) -> ProviderResult<String> {
        self.inner().authenticate()
    }

    fn list_instances(&self) -> ProviderResult<Vec<Instance>> {
        self.inner().list_instances()
    }

    fn list_volumes(&self) -> ProviderResult<Vec<AttachedVolume>> {
        self.inner().list_volumes()
    }

    fn list_network_interfaces(&self) -> ProviderResult<Vec<NetworkInterface>> {
        self.inner().list_network_interfaces()
    }

    fn list_nat_bindings(&self) -> ProviderResult<Vec<NatBinding>> {
        self.inner().list_nat_bindings()
    }

    fn get_inventory(&self) -> ProviderResult<Vec<InventoryRecord>> {
        self.inner().get_inventory()
    }
}

/// Join vendor listings into canonical records.
///
/// Instances without a resolvable private IP are dropped with a warning. Two
/// records with the same private IP are an error, since the IP is the join key.
pub fn assemble(
    vendor: Vendor,
    instances: Vec<Instance>,
    interfaces: &[NetworkInterface],
    bindings: &[NatBinding],
    volumes: Vec<AttachedVolume>,
) -> ProviderResult<Vec<InventoryRecord>> {
    let mut ip_by_instance: HashMap<&str, &str> = HashMap::new();
    for nic in interfaces {
        ip_by_instance
            .entry(nic.instance_id.as_str())
            .or_insert(nic.private_ip.as_str());
    }

    let public_by_private: HashMap<&str, &str> = bindings
        .iter()
        .map(|b| (b.private_ip.as_str(), b.public_ip.as_str()))
        .collect();

    let mut volumes_by_instance: HashMap<String, Vec<Volume>> = HashMap::new();
    for attached in volumes {
        volumes_by_instance
            .entry(attached.instance_id)
            .or_default()
            .push(attached.volume);
    }

    let mut records = Vec::with_capacity(instances.len());
    for instance in instances {
        let Some(private_ip) = ip_by_instance.get(instance.id.as_str()) else {
            warn!(vendor = %vendor, instance = %instance.name, "no private IP resolved, dropping instance");
            continue;
        };

        let public_ip = instance
            .public_ip
            .clone()
            .or_else(|| public_by_private.get(private_ip).map(|ip| ip.to_string()));

        records.push(InventoryRecord {
            private_ip: private_ip.to_string(),
            public_ip,
            availability_zone: instance.availability_zone,
            vm_state: vendor.vm_state(&instance.status_code),
            name: instance.name,
            vcpus: instance.vcpus,
            ram_gb: instance.ram_gb,
            created_date: created_date(&instance.created),
            volumes: volumes_by_instance.remove(&instance.id).unwrap_or_default(),
        });
    }

    if let Some(ip) = find_duplicate_ip(&records) {
        return Err(ProviderError::DuplicatePrivateIp(ip.to_string()));
    }
    Ok(records)
}

pub fn mb_to_gb(mb: u64) -> u64 {
    mb / 1024
}

pub fn bytes_to_gb(bytes: u64) -> u64 {
    bytes / 1024 / 1024 / 1024
}

/// Date part of a vendor timestamp.
pub fn created_date(timestamp: &str) -> String {
    timestamp.chars().take(10).collect()
}

/// Accepts `4`, `"4"` or null.
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("not a size: {n}"))),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("not a size: {s}"))),
        Some(other) => Err(D::Error::custom(format!("not a size: {other}"))),
    }
}

/// Accepts `true` or `"true"`; anything else is false.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

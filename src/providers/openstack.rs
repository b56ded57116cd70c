// Response shapes shared by the OpenStack-based vendors (KTC, NHN)
use std::collections::BTreeMap;

use serde::Deserialize;

use super::{lenient_bool, lenient_u64, AttachedVolume, NetworkInterface};
use crate::inventory::{Volume, VolumeType};

pub const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Deserialize)]
pub struct ServerList {
    #[serde(default)]
    pub servers: Vec<Server>,
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: String,
    #[serde(rename = "OS-EXT-STS:vm_state", default)]
    pub vm_state: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<Address>>,
    #[serde(default)]
    pub flavor: Flavor,
}

#[derive(Debug, Deserialize)]
pub struct Address {
    pub addr: String,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub kind: String,
}

impl Address {
    pub fn is_floating(&self) -> bool {
        self.kind.eq_ignore_ascii_case("floating")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Flavor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub vcpus: Option<u64>,
    /// MB
    #[serde(default, deserialize_with = "lenient_u64")]
    pub ram: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeList {
    #[serde(default)]
    pub volumes: Vec<CinderVolume>,
}

#[derive(Debug, Deserialize)]
pub struct CinderVolume {
    #[serde(default)]
    pub volume_type: Option<String>,
    /// GB
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub bootable: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct Attachment {
    pub server_id: String,
    #[serde(default)]
    pub device: String,
}

/// First fixed address of each server, in network-name order.
pub fn fixed_interfaces(servers: &[Server]) -> Vec<NetworkInterface> {
    servers
        .iter()
        .filter_map(|server| {
            server
                .addresses
                .values()
                .flatten()
                .find(|a| !a.is_floating())
                .map(|a| NetworkInterface {
                    instance_id: server.id.clone(),
                    private_ip: a.addr.clone(),
                })
        })
        .collect()
}

pub fn floating_ip(server: &Server) -> Option<String> {
    server
        .addresses
        .values()
        .flatten()
        .find(|a| a.is_floating())
        .map(|a| a.addr.clone())
}

/// One entry per attachment; volumes attached nowhere are left out.
pub fn attached_volumes(volumes: Vec<CinderVolume>) -> Vec<AttachedVolume> {
    let mut attached = Vec::new();
    for volume in volumes {
        let volume_type = VolumeType::classify(volume.volume_type.as_deref().unwrap_or_default());
        for attachment in volume.attachments {
            attached.push(AttachedVolume {
                instance_id: attachment.server_id,
                volume: Volume {
                    device: attachment.device,
                    volume_type,
                    size_gb: volume.size.unwrap_or_default(),
                    bootable: volume.bootable,
                },
            });
        }
    }
    attached
}

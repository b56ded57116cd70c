//! Naver Cloud Platform adapter.
//!
//! NCP has no token endpoint: every request carries an HMAC-SHA256 signature over
//! `GET <path>?<query>\n<timestamp ms>\n<access key>`, base64 encoded.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::http::{build_client, read_json};
use super::{
    bytes_to_gb, lenient_u64, AttachedVolume, CloudProvider, CredentialSet, Instance,
    NetworkInterface, Vendor,
};
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::inventory::{Volume, VolumeType};

type HmacSha256 = Hmac<Sha256>;

const PUBLIC_BASE_URI: &str = "https://ncloud.apigw.ntruss.com";
const GOV_BASE_URI: &str = "https://ncloud.apigw.gov-ntruss.com";
const DEFAULT_REGION: &str = "KR";
const PUBLIC_REGIONS: &[&str] = &["KR", "JPN", "SGN"];
const GOV_REGIONS: &[&str] = &["KR"];
const BOOT_STORAGE_TYPE: &str = "BASIC";

pub struct NcpProvider {
    client: Client,
    pub(super) base_uri: String,
    region: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct CodeValue {
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
struct ServerInstanceListEnvelope {
    #[serde(rename = "getServerInstanceListResponse")]
    response: ServerInstanceList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInstanceList {
    #[serde(default)]
    server_instance_list: Vec<ServerInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInstance {
    server_instance_no: String,
    #[serde(default)]
    server_name: String,
    #[serde(default)]
    zone_code: String,
    #[serde(default)]
    server_instance_status: CodeValue,
    #[serde(default, deserialize_with = "lenient_u64")]
    cpu_count: Option<u64>,
    /// Bytes
    #[serde(default, deserialize_with = "lenient_u64")]
    memory_size: Option<u64>,
    #[serde(default)]
    create_date: String,
    #[serde(default)]
    public_ip: String,
}

#[derive(Debug, Deserialize)]
struct NetworkInterfaceListEnvelope {
    #[serde(rename = "getNetworkInterfaceListResponse")]
    response: NetworkInterfaceList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceList {
    #[serde(default)]
    network_interface_list: Vec<NcpInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NcpInterface {
    #[serde(default)]
    instance_no: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockStorageListEnvelope {
    #[serde(rename = "getBlockStorageInstanceListResponse")]
    response: BlockStorageList,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStorageList {
    #[serde(default)]
    block_storage_instance_list: Vec<BlockStorage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStorage {
    #[serde(default)]
    server_instance_no: Option<String>,
    #[serde(default)]
    device_name: String,
    /// Bytes
    #[serde(default, deserialize_with = "lenient_u64")]
    block_storage_size: Option<u64>,
    #[serde(default)]
    block_storage_disk_detail_type: CodeValue,
    #[serde(default)]
    block_storage_type: CodeValue,
}

impl NcpProvider {
    pub fn from_credentials(creds: &CredentialSet, gov: bool, config: &ProviderConfig) -> ProviderResult<Self> {
        let region = creds.zone_or(DEFAULT_REGION);
        let base_uri = Self::base_uri_for(&region, gov)?;
        Self::with_base_uri(
            base_uri,
            region,
            CredentialSet::require(&creds.access_key, "access_key")?,
            CredentialSet::require(&creds.secret_key, "secret_key")?,
            config,
        )
    }

    pub fn with_base_uri(
        base_uri: String,
        region: String,
        access_key: String,
        secret_key: String,
        config: &ProviderConfig,
    ) -> ProviderResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_uri: base_uri.trim_end_matches('/').to_string(),
            region,
            access_key,
            secret_key,
        })
    }

    pub fn base_uri_for(region: &str, gov: bool) -> ProviderResult<String> {
        let (regions, base) = if gov {
            (GOV_REGIONS, GOV_BASE_URI)
        } else {
            (PUBLIC_REGIONS, PUBLIC_BASE_URI)
        };
        if !regions.contains(&region) {
            return Err(ProviderError::UnknownZone {
                vendor: Vendor::Ncp.to_string(),
                zone: region.to_string(),
            });
        }
        Ok(base.to_string())
    }

    /// Signature for one request. `path_and_query` is exactly what goes on the wire.
    pub fn sign(&self, path_and_query: &str, timestamp_ms: &str) -> ProviderResult<String> {
        let message = format!("GET {path_and_query}\n{timestamp_ms}\n{}", self.access_key);
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| ProviderError::MissingCredential("secret_key"))?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn path_for(&self, action: &str) -> String {
        format!(
            "/vserver/v2/{action}?regionCode={}&responseFormatType=json",
            self.region
        )
    }

    fn get<T: DeserializeOwned>(&self, action: &str) -> ProviderResult<T> {
        let path = self.path_for(action);
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&path, &timestamp)?;
        let url = format!("{}{}", self.base_uri, path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .header("x-ncp-apigw-timestamp", timestamp)
            .header("x-ncp-iam-access-key", &self.access_key)
            .header("x-ncp-apigw-signature-v2", signature)
            .send()?;
        read_json(response)
    }
}

impl CloudProvider for NcpProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Ncp
    }

    /// Signing is per request, so the access key is the whole credential.
    fn authenticate(&self) -> ProviderResult<String> {
        Ok(self.access_key.clone())
    }

    fn list_instances(&self) -> ProviderResult<Vec<Instance>> {
        let envelope: ServerInstanceListEnvelope = self.get("getServerInstanceList")?;
        let instances = envelope
            .response
            .server_instance_list
            .into_iter()
            .map(|server| Instance {
                id: server.server_instance_no,
                name: server.server_name,
                availability_zone: server.zone_code,
                status_code: server.server_instance_status.code,
                vcpus: server.cpu_count.map(|c| c as u32),
                ram_gb: server.memory_size.map(bytes_to_gb),
                created: server.create_date,
                public_ip: Some(server.public_ip).filter(|ip| !ip.is_empty()),
            })
            .collect();
        Ok(instances)
    }

    fn list_volumes(&self) -> ProviderResult<Vec<AttachedVolume>> {
        let envelope: BlockStorageListEnvelope = self.get("getBlockStorageInstanceList")?;
        let volumes = envelope
            .response
            .block_storage_instance_list
            .into_iter()
            .filter_map(|storage| {
                let instance_id = storage.server_instance_no.filter(|no| !no.is_empty())?;
                Some(AttachedVolume {
                    instance_id,
                    volume: Volume {
                        device: storage.device_name,
                        volume_type: VolumeType::classify(&storage.block_storage_disk_detail_type.code),
                        size_gb: storage.block_storage_size.map(bytes_to_gb).unwrap_or_default(),
                        bootable: storage.block_storage_type.code == BOOT_STORAGE_TYPE,
                    },
                })
            })
            .collect();
        Ok(volumes)
    }

    fn list_network_interfaces(&self) -> ProviderResult<Vec<NetworkInterface>> {
        let envelope: NetworkInterfaceListEnvelope = self.get("getNetworkInterfaceList")?;
        let interfaces = envelope
            .response
            .network_interface_list
            .into_iter()
            .filter_map(|nic| match (nic.instance_no, nic.ip) {
                (Some(instance_id), Some(private_ip)) => Some(NetworkInterface {
                    instance_id,
                    private_ip,
                }),
                _ => {
                    warn!("skipping network interface without instance or IP");
                    None
                }
            })
            .collect();
        Ok(interfaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::VmState;
    use httpmock::prelude::*;
    use serde_json::json;

    fn provider(base_uri: String) -> NcpProvider {
        NcpProvider::with_base_uri(
            base_uri,
            "KR".to_string(),
            "AK-TEST".to_string(),
            "SK-TEST".to_string(),
            &ProviderConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_signature() {
        let ncp = provider(PUBLIC_BASE_URI.to_string());
        let path = ncp.path_for("getServerInstanceList");
        assert_eq!(
            path,
            "/vserver/v2/getServerInstanceList?regionCode=KR&responseFormatType=json"
        );
        assert_eq!(
            ncp.sign(&path, "1700000000000").unwrap(),
            "WqnGoTLM/VQk+CwQOhIZohSV7NR9XJxE/qZHzBcYaHs="
        );
    }

    #[test]
    fn test_base_uris() {
        assert_eq!(NcpProvider::base_uri_for("JPN", false).unwrap(), PUBLIC_BASE_URI);
        assert_eq!(NcpProvider::base_uri_for("KR", true).unwrap(), GOV_BASE_URI);
        assert!(matches!(
            NcpProvider::base_uri_for("SGN", true),
            Err(ProviderError::UnknownZone { .. })
        ));
    }

    #[test]
    fn test_inventory() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/vserver/v2/getServerInstanceList")
                .query_param("regionCode", "KR")
                .query_param("responseFormatType", "json")
                .header("x-ncp-iam-access-key", "AK-TEST")
                .header_exists("x-ncp-apigw-signature-v2")
                .header_exists("x-ncp-apigw-timestamp");
            then.status(200).json_body(json!({"getServerInstanceListResponse": {
                "totalRows": 2,
                "serverInstanceList": [
                    {
                        "serverInstanceNo": "1001",
                        "serverName": "was01",
                        "zoneCode": "KR-1",
                        "serverInstanceStatus": {"code": "RUN", "codeName": "Server run state"},
                        "cpuCount": 2,
                        "memorySize": 4294967296u64,
                        "createDate": "2024-05-06T07:08:09+0900",
                        "publicIp": "101.79.0.1"
                    },
                    {
                        "serverInstanceNo": "1002",
                        "serverName": "was02",
                        "zoneCode": "KR-2",
                        "serverInstanceStatus": {"code": "NSTOP"},
                        "cpuCount": 4,
                        "memorySize": 17179869184u64,
                        "createDate": "2024-05-07T00:00:00+0900",
                        "publicIp": ""
                    }
                ]
            }}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getNetworkInterfaceList");
            then.status(200).json_body(json!({"getNetworkInterfaceListResponse": {
                "networkInterfaceList": [
                    {"networkInterfaceNo": "1", "instanceNo": "1001", "ip": "10.10.0.5"},
                    {"networkInterfaceNo": "2", "ip": "10.10.0.99"},
                    {"networkInterfaceNo": "3", "instanceNo": "1002", "ip": "10.10.0.6"}
                ]
            }}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getBlockStorageInstanceList");
            then.status(200).json_body(json!({"getBlockStorageInstanceListResponse": {
                "blockStorageInstanceList": [
                    {
                        "serverInstanceNo": "1001",
                        "deviceName": "/dev/xvda",
                        "blockStorageSize": 53687091200u64,
                        "blockStorageType": {"code": "BASIC"},
                        "blockStorageDiskDetailType": {"code": "SSD"}
                    },
                    {
                        "serverInstanceNo": "1001",
                        "deviceName": "/dev/xvdb",
                        "blockStorageSize": 107374182400u64,
                        "blockStorageType": {"code": "SVRBS"},
                        "blockStorageDiskDetailType": {"code": "HDD"}
                    }
                ]
            }}));
        });

        let records = provider(server.base_url()).get_inventory().unwrap();

        assert_eq!(records.len(), 2);
        let was01 = &records[0];
        assert_eq!(was01.private_ip, "10.10.0.5");
        assert_eq!(was01.public_ip.as_deref(), Some("101.79.0.1"));
        assert_eq!(was01.vm_state, VmState::Running);
        assert_eq!(was01.ram_gb, Some(4));
        assert_eq!(was01.created_date, "2024-05-06");
        assert_eq!(was01.volumes.len(), 2);
        assert!(was01.volumes[0].bootable);
        assert_eq!(was01.volumes[0].size_gb, 50);
        assert_eq!(was01.volumes[1].volume_type, VolumeType::Hdd);
        assert!(!was01.volumes[1].bootable);

        let was02 = &records[1];
        assert_eq!(was02.public_ip, None);
        assert_eq!(was02.vm_state, VmState::Stop);
        assert_eq!(was02.ram_gb, Some(16));
    }

    #[test]
    fn test_duplicate_private_ip_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getServerInstanceList");
            then.status(200).json_body(json!({"getServerInstanceListResponse": {
                "serverInstanceList": [
                    {"serverInstanceNo": "1", "serverInstanceStatus": {"code": "RUN"}, "publicIp": ""},
                    {"serverInstanceNo": "2", "serverInstanceStatus": {"code": "RUN"}, "publicIp": ""}
                ]
            }}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getNetworkInterfaceList");
            then.status(200).json_body(json!({"getNetworkInterfaceListResponse": {
                "networkInterfaceList": [
                    {"instanceNo": "1", "ip": "10.0.0.1"},
                    {"instanceNo": "2", "ip": "10.0.0.1"}
                ]
            }}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getBlockStorageInstanceList");
            then.status(200).json_body(json!({"getBlockStorageInstanceListResponse": {
                "blockStorageInstanceList": []
            }}));
        });

        let err = provider(server.base_url()).get_inventory().unwrap_err();
        assert!(matches!(err, ProviderError::DuplicatePrivateIp(ip) if ip == "10.0.0.1"));
    }

    #[test]
    fn test_signature_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/vserver/v2/getServerInstanceList");
            then.status(401).json_body(json!({"responseError": {
                "returnCode": "200",
                "returnMessage": "Authentication Failed"
            }}));
        });

        let err = provider(server.base_url()).list_instances().unwrap_err();
        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Authentication Failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

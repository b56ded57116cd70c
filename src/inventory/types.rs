use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VmState {
    Running,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeType {
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SSD")]
    Ssd,
    Unknown,
}

impl VolumeType {
    /// Classify a free-text vendor label ("General SSD", "HDD", "usb-ssd-provisioned", ...).
    pub fn classify(label: &str) -> Self {
        let upper = label.to_uppercase();
        if upper.contains("SSD") {
            VolumeType::Ssd
        } else if upper.contains("HDD") {
            VolumeType::Hdd
        } else {
            VolumeType::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub device: String,
    pub volume_type: VolumeType,
    pub size_gb: u64,
    pub bootable: bool,
}

/// One VM as reported by a cloud control plane, keyed by `private_ip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub availability_zone: String,
    pub vm_state: VmState,
    pub name: String,
    pub vcpus: Option<u32>,
    pub ram_gb: Option<u64>,
    pub created_date: String,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub device: String,
    pub path: String,
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasMount {
    pub path: String,
    pub size_gb: u64,
}

/// Facts gathered from inside a guest over a remote shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    #[serde(rename = "OS")]
    pub os: String,
    pub hostname: String,
    pub swap: String,
    #[serde(rename = "MountPoint")]
    pub mount_points: Vec<MountPoint>,
    #[serde(rename = "NASsize")]
    pub nas_size: u64,
    #[serde(rename = "NASmounts", default)]
    pub nas_mounts: Vec<NasMount>,
    #[serde(rename = "IPs")]
    pub ips: Vec<String>,
}

/// A host the collector could not turn into facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub host: String,
    pub ip: String,
    pub error: String,
}

/// A single line of the final report: cloud data, guest facts, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub customer: String,
    pub private_ip: String,
    pub instance: Option<InventoryRecord>,
    pub facts: Option<HostFacts>,
}

impl ReportRow {
    pub fn hostname(&self) -> Option<&str> {
        self.facts
            .as_ref()
            .map(|f| f.hostname.as_str())
            .or_else(|| self.instance.as_ref().map(|i| i.name.as_str()))
    }

    pub fn public_ip(&self) -> Option<&str> {
        self.instance.as_ref().and_then(|i| i.public_ip.as_deref())
    }

    /// Case-insensitive match on private IP, public IP, customer or hostname.
    pub fn matches(&self, keyword: &str) -> bool {
        let needle = keyword.to_lowercase();
        let fields = [
            Some(self.private_ip.as_str()),
            self.public_ip(),
            Some(self.customer.as_str()),
            self.hostname(),
        ];
        fields
            .iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str) -> InventoryRecord {
        InventoryRecord {
            private_ip: ip.to_string(),
            public_ip: Some("203.0.113.7".to_string()),
            availability_zone: "kr1-a".to_string(),
            vm_state: VmState::Running,
            name: "web01".to_string(),
            vcpus: Some(2),
            ram_gb: Some(4),
            created_date: "2024-03-01".to_string(),
            volumes: Vec::new(),
        }
    }

    #[test]
    fn test_volume_type_classification() {
        assert_eq!(VolumeType::classify("General SSD"), VolumeType::Ssd);
        assert_eq!(VolumeType::classify("xSSDx"), VolumeType::Ssd);
        assert_eq!(VolumeType::classify("HDD"), VolumeType::Hdd);
        assert_eq!(VolumeType::classify("General HDD"), VolumeType::Hdd);
        assert_eq!(VolumeType::classify("nvme-premium"), VolumeType::Unknown);
        assert_eq!(VolumeType::classify(""), VolumeType::Unknown);
    }

    #[test]
    fn test_vm_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&VmState::Running).unwrap(), "\"RUNNING\"");
        assert_eq!(serde_json::to_string(&VmState::Stop).unwrap(), "\"STOP\"");
    }

    #[test]
    fn test_host_facts_handoff_keys() {
        let facts = HostFacts {
            os: "Ubuntu 22".to_string(),
            hostname: "web01".to_string(),
            swap: String::new(),
            mount_points: Vec::new(),
            nas_size: 0,
            nas_mounts: Vec::new(),
            ips: vec!["10.0.0.5".to_string()],
        };
        let value = serde_json::to_value(&facts).unwrap();
        assert_eq!(value["OS"], "Ubuntu 22");
        assert_eq!(value["NASsize"], 0);
        assert_eq!(value["IPs"][0], "10.0.0.5");
        assert!(value["MountPoint"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_volumes_deserialize_empty() {
        let json = r#"{
            "private_ip": "10.0.0.9",
            "public_ip": null,
            "availability_zone": "d1",
            "vm_state": "STOP",
            "name": "db01",
            "vcpus": null,
            "ram_gb": null,
            "created_date": "2023-01-02"
        }"#;
        let parsed: InventoryRecord = serde_json::from_str(json).unwrap();
        assert!(parsed.volumes.is_empty());
        assert_eq!(parsed.vm_state, VmState::Stop);
    }

    #[test]
    fn test_report_row_search() {
        let row = ReportRow {
            customer: "Acme".to_string(),
            private_ip: "10.0.0.5".to_string(),
            instance: Some(record("10.0.0.5")),
            facts: None,
        };
        assert!(row.matches("acme"));
        assert!(row.matches("10.0.0"));
        assert!(row.matches("203.0.113"));
        assert!(row.matches("WEB01"));
        assert!(!row.matches("db02"));
    }
}

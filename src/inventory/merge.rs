use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::inventory::types::{HostError, HostFacts, InventoryRecord, ReportRow};

/// Accumulates guest facts for one collection run, keyed by private IP.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSet {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostFacts>,
    #[serde(default)]
    pub errors: Vec<HostError>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later hosts reporting the same key replace earlier ones.
    pub fn insert(&mut self, ip: String, facts: HostFacts) {
        if self.hosts.contains_key(&ip) {
            warn!(ip = %ip, "facts for this IP were already collected, replacing");
        }
        self.hosts.insert(ip, facts);
    }

    pub fn record_error(&mut self, error: HostError) {
        self.errors.push(error);
    }

    pub fn get(&self, ip: &str) -> Option<&HostFacts> {
        self.hosts.get(ip)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn merge(&mut self, other: FactSet) {
        for (ip, facts) in other.hosts {
            self.insert(ip, facts);
        }
        self.errors.extend(other.errors);
    }
}

/// Returns the first private IP that appears twice, if any.
pub fn find_duplicate_ip(records: &[InventoryRecord]) -> Option<&str> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|r| r.private_ip.as_str())
        .find(|ip| !seen.insert(*ip))
}

/// Join guest facts onto cloud records by exact private IP.
///
/// Cloud records keep their order; facts with no matching record are appended
/// afterwards as fact-only rows, in IP order.
pub fn reconcile(customer: &str, records: Vec<InventoryRecord>, facts: &FactSet) -> Vec<ReportRow> {
    let mut matched = HashSet::new();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let host_facts = facts.get(&record.private_ip).cloned();
        if host_facts.is_some() {
            matched.insert(record.private_ip.clone());
        }
        rows.push(ReportRow {
            customer: customer.to_string(),
            private_ip: record.private_ip.clone(),
            instance: Some(record),
            facts: host_facts,
        });
    }

    for (ip, host_facts) in &facts.hosts {
        if matched.contains(ip) {
            continue;
        }
        rows.push(ReportRow {
            customer: customer.to_string(),
            private_ip: ip.clone(),
            instance: None,
            facts: Some(host_facts.clone()),
        });
    }

    rows
}

/// Full-refresh report built from one or more customers' record sets.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    pub rows: Vec<ReportRow>,
}

impl InventoryReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_customer(&mut self, rows: Vec<ReportRow>) {
        self.rows.extend(rows);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn search(&self, keyword: &str) -> Vec<&ReportRow> {
        if keyword.trim().is_empty() {
            return self.rows.iter().collect();
        }
        self.rows.iter().filter(|row| row.matches(keyword)).collect()
    }
}

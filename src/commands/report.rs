use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use super::cloud::AccountInventory;
use crate::cli::ReportCommands;
use crate::config::load_document;
use crate::inventory::{find_duplicate_ip, reconcile, FactSet, InventoryRecord, InventoryReport, ReportRow, VmState};
use crate::output::{append_collection_log, output_data, print_info, print_success};

/// Join every customer's cloud records with that customer's facts.
///
/// Customers are emitted in inventory-file order; customers with facts but no cloud
/// records follow as fact-only rows. A private IP reported twice for one customer
/// (two accounts of the same customer) is logged and both rows are kept.
pub fn build_report(
    inventories: Vec<AccountInventory>,
    mut facts: BTreeMap<String, FactSet>,
) -> InventoryReport {
    let mut by_customer: Vec<(String, Vec<_>)> = Vec::new();
    for inventory in inventories {
        match by_customer.iter_mut().find(|(c, _)| *c == inventory.customer) {
            Some((_, records)) => records.extend(inventory.records),
            None => by_customer.push((inventory.customer, inventory.records)),
        }
    }

    let mut report = InventoryReport::new();
    for (customer, records) in by_customer {
        warn_duplicate_ip(&customer, &records);
        let customer_facts = facts.remove(&customer).unwrap_or_default();
        report.extend_customer(reconcile(&customer, records, &customer_facts));
    }
    for (customer, customer_facts) in facts {
        warn!(customer = %customer, "facts given for a customer with no cloud inventory");
        report.extend_customer(reconcile(&customer, Vec::new(), &customer_facts));
    }
    report
}

fn warn_duplicate_ip(customer: &str, records: &[InventoryRecord]) -> Option<String> {
    let ip = find_duplicate_ip(records)?;
    warn!(customer = %customer, ip = %ip, "private IP reported by more than one account");
    Some(ip.to_string())
}

fn load_report(path: &Path) -> Result<InventoryReport, Box<dyn std::error::Error>> {
    Ok(load_document(path)?)
}

pub fn handle_report_command(cmd: &ReportCommands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ReportCommands::Build { inventory, facts, search, format, output, log } => {
            let mut inventories = Vec::new();
            for path in inventory {
                let accounts: Vec<AccountInventory> = load_document(path)?;
                inventories.extend(accounts);
            }

            let mut fact_sets: BTreeMap<String, FactSet> = BTreeMap::new();
            for (customer, path) in facts {
                let set: FactSet = load_document(path)?;
                fact_sets.entry(customer.clone()).or_default().merge(set);
            }

            let mut report = build_report(inventories, fact_sets);
            info!(rows = report.len(), "report built");
            if let Some(keyword) = search {
                report.rows = report.search(keyword).into_iter().cloned().collect();
            }

            emit(&report, format, output.as_deref())?;

            if let (Some(log), Some(output)) = (log, output) {
                append_collection_log(log, &file_name(output), &chrono::Local::now())?;
                print_info(&format!("Logged to {}", log.display()));
            }
        }

        ReportCommands::Search { report, keyword, format } => {
            let report = load_report(report)?;
            let rows: Vec<ReportRow> = report.search(keyword).into_iter().cloned().collect();
            emit(&InventoryReport { rows }, format, None)?;
        }
    }
    Ok(())
}

fn emit(report: &InventoryReport, format: &str, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    if format == "pretty" && output.is_none() {
        print_table(&report.rows);
        return Ok(());
    }
    output_data(report, format, output)?;
    if output.is_some() {
        print_success(&format!("{} row(s)", report.len()));
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_table(rows: &[ReportRow]) {
    println!(
        "{:<12} {:<16} {:<16} {:<20} {:<8} {:>5} {:>7}  {}",
        "CUSTOMER", "PRIVATE IP", "PUBLIC IP", "HOSTNAME", "STATE", "vCPU", "RAM(GB)", "OS"
    );
    for row in rows {
        let instance = row.instance.as_ref();
        let state = match instance.map(|i| i.vm_state) {
            Some(VmState::Running) => "RUNNING",
            Some(VmState::Stop) => "STOP",
            None => "-",
        };
        println!(
            "{:<12} {:<16} {:<16} {:<20} {:<8} {:>5} {:>7}  {}",
            row.customer,
            row.private_ip,
            row.public_ip().unwrap_or("-"),
            row.hostname().unwrap_or("-"),
            state,
            instance.and_then(|i| i.vcpus).map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            instance.and_then(|i| i.ram_gb).map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            row.facts.as_ref().map(|f| f.os.as_str()).unwrap_or("-"),
        );
    }
    println!("{} row(s)", rows.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::HostFacts;

    fn record(ip: &str, name: &str) -> InventoryRecord {
        InventoryRecord {
            private_ip: ip.to_string(),
            public_ip: None,
            availability_zone: "KR-1".to_string(),
            vm_state: VmState::Running,
            name: name.to_string(),
            vcpus: Some(2),
            ram_gb: Some(4),
            created_date: "2024-01-01".to_string(),
            volumes: Vec::new(),
        }
    }

    fn facts(hostname: &str) -> HostFacts {
        HostFacts {
            os: "Rocky Linux 9".to_string(),
            hostname: hostname.to_string(),
            swap: String::new(),
            mount_points: Vec::new(),
            nas_size: 0,
            nas_mounts: Vec::new(),
            ips: Vec::new(),
        }
    }

    #[test]
    fn test_build_report_per_customer() {
        let inventories = vec![
            AccountInventory {
                customer: "acme".to_string(),
                vendor: "NCP".to_string(),
                records: vec![record("10.0.0.1", "a1")],
            },
            AccountInventory {
                customer: "globex".to_string(),
                vendor: "KTC".to_string(),
                records: vec![record("10.0.0.1", "g1")],
            },
            AccountInventory {
                customer: "acme".to_string(),
                vendor: "NHN".to_string(),
                records: vec![record("10.0.0.2", "a2")],
            },
        ];

        let mut acme = FactSet::new();
        acme.insert("10.0.0.2".to_string(), facts("acme-web"));
        let mut initech = FactSet::new();
        initech.insert("172.16.0.1".to_string(), facts("lonely"));
        let fact_sets = BTreeMap::from([
            ("acme".to_string(), acme),
            ("initech".to_string(), initech),
        ]);

        let report = build_report(inventories, fact_sets);
        let summary: Vec<_> = report
            .rows
            .iter()
            .map(|r| (r.customer.as_str(), r.private_ip.as_str(), r.hostname()))
            .collect();
        assert_eq!(
            summary,
            [
                ("acme", "10.0.0.1", Some("a1")),
                ("acme", "10.0.0.2", Some("acme-web")),
                ("globex", "10.0.0.1", Some("g1")),
                ("initech", "172.16.0.1", Some("lonely")),
            ]
        );
        assert!(report.rows[3].instance.is_none());
        // Facts are not shared across customers even when private IPs collide.
        assert!(report.rows[2].facts.is_none());
    }

    #[test]
    fn test_duplicate_ip_across_accounts_keeps_both_rows() {
        let inventories = vec![
            AccountInventory {
                customer: "acme".to_string(),
                vendor: "NCP".to_string(),
                records: vec![record("10.0.0.5", "ncp-web")],
            },
            AccountInventory {
                customer: "acme".to_string(),
                vendor: "KTC".to_string(),
                records: vec![record("10.0.0.5", "ktc-web")],
            },
        ];
        let mut acme = FactSet::new();
        acme.insert("10.0.0.5".to_string(), facts("web"));

        let report = build_report(inventories, BTreeMap::from([("acme".to_string(), acme)]));
        assert_eq!(report.len(), 2);
        assert_eq!(report.rows[0].instance.as_ref().map(|i| i.name.as_str()), Some("ncp-web"));
        assert_eq!(report.rows[1].instance.as_ref().map(|i| i.name.as_str()), Some("ktc-web"));

        let records: Vec<_> = report.rows.iter().filter_map(|r| r.instance.clone()).collect();
        assert_eq!(warn_duplicate_ip("acme", &records).as_deref(), Some("10.0.0.5"));
        assert_eq!(warn_duplicate_ip("acme", &records[..1]), None);
    }

    #[test]
    fn test_report_survives_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = build_report(
            vec![AccountInventory {
                customer: "acme".to_string(),
                vendor: "NCP".to_string(),
                records: vec![record("10.0.0.9", "db01")],
            }],
            BTreeMap::new(),
        );
        output_data(&report, "json", Some(&path)).unwrap();

        let loaded = load_report(&path).unwrap();
        assert_eq!(loaded.search("DB01").len(), 1);
        assert!(loaded.search("nomatch").is_empty());
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cli::CloudCommands;
use crate::config::{load_document, AppConfig, ProviderConfig};
use crate::error::ProviderResult;
use crate::inventory::InventoryRecord;
use crate::output::{output_data, print_error, print_success};
use crate::providers::{CloudProvider, CredentialSet, Provider, Vendor};

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialsFile {
    List(Vec<CredentialSet>),
    Table { accounts: Vec<CredentialSet> },
}

/// Inventory for one account, as written by `cloud inventory` and read by `report build`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInventory {
    pub customer: String,
    pub vendor: String,
    pub records: Vec<InventoryRecord>,
}

pub fn load_credentials(path: &Path) -> Result<Vec<CredentialSet>, Box<dyn std::error::Error>> {
    let accounts = match load_document::<CredentialsFile>(path)? {
        CredentialsFile::List(accounts) | CredentialsFile::Table { accounts } => accounts,
    };
    Ok(accounts)
}

pub fn fetch_account(creds: &CredentialSet, config: &ProviderConfig) -> ProviderResult<AccountInventory> {
    let provider = Provider::from_credentials(creds, config)?;
    let records = provider.get_inventory()?;
    let customer = if creds.customer.trim().is_empty() {
        creds.vendor.to_ascii_uppercase()
    } else {
        creds.customer.clone()
    };
    Ok(AccountInventory {
        customer,
        vendor: creds.vendor.to_ascii_uppercase(),
        records,
    })
}

pub fn handle_cloud_command(cmd: &CloudCommands, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        CloudCommands::Inventory { credentials, vendor, format, output } => {
            let wanted = vendor.as_deref().map(Vendor::from_tag).transpose()?;
            let accounts: Vec<CredentialSet> = load_credentials(credentials)?
                .into_iter()
                .filter(|creds| match wanted {
                    Some((vendor, _)) => Vendor::from_tag(&creds.vendor)
                        .map(|(v, _)| v == vendor)
                        .unwrap_or(false),
                    None => true,
                })
                .collect();

            let mut inventories = Vec::with_capacity(accounts.len());
            let mut failures = 0;
            for creds in &accounts {
                info!(vendor = %creds.vendor, customer = %creds.customer, "fetching inventory");
                match fetch_account(creds, &config.providers) {
                    Ok(inventory) => {
                        info!(customer = %inventory.customer, records = inventory.records.len(), "inventory fetched");
                        inventories.push(inventory);
                    }
                    Err(e) => {
                        error!(vendor = %creds.vendor, customer = %creds.customer, error = %e, "inventory failed");
                        print_error(&format!("{} ({}): {}", creds.customer, creds.vendor, e));
                        failures += 1;
                    }
                }
            }

            if output.is_some() {
                let total: usize = inventories.iter().map(|i| i.records.len()).sum();
                print_success(&format!(
                    "Fetched {} instance(s) from {} account(s)",
                    total,
                    inventories.len()
                ));
            }
            output_data(&inventories, format, output.as_deref())?;

            if failures > 0 {
                return Err(format!("{} of {} account(s) failed", failures, accounts.len()).into());
            }
        }
    }
    Ok(())
}

// Canonical inventory records and the merge step shared by both collection paths
pub mod types;
pub mod merge;

pub use merge::{find_duplicate_ip, reconcile, FactSet, InventoryReport};
pub use types::{HostError, HostFacts, InventoryRecord, ReportRow, VmState, Volume, VolumeType};
